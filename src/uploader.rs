//! Upload orchestration.
//!
//! An [`Uploader`] runs at most one upload at a time. The upload itself runs on a tokio
//! runtime, and every listener callback is marshaled through the [`Dispatcher`] handed to
//! the uploader at construction.

use std::io;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use futures::FutureExt;
use log::{debug, warn};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use url::Url;

use crate::dispatch::Dispatcher;
use crate::error::{
    DEFAULT_ERROR_MESSAGE, ERROR_ILLEGAL_PARAMETERS, ERROR_OCCURS_EXCEPTION, ERROR_SERVER,
    Outcome, UploadError,
};
use crate::listener::{CompletionListener, ListenerSlot, ProgressListener, deliver};
use crate::multipart::{BodyStream, FILE_FIELD_NAME, FilePart, PNG_CONTENT_TYPE};
use crate::progress::{ProgressEvent, ProgressReporter, ProgressStream};
use crate::rest_types::UploadResponse;
use crate::transport::{Transport, TransportError, TransportRequest, TransportResponse};

/// One call to [`Uploader::upload_picture`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub file_path: PathBuf,
    pub url: Url,
    pub field_name: &'static str,
}

struct Session {
    id: u64,
    finished: AtomicBool,
    cancelled: AtomicBool,
}

impl Session {
    fn new(id: u64) -> Self {
        Self {
            id,
            finished: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Claims the right to deliver this session's outcome. Only the first caller wins.
    fn try_finish(&self) -> bool {
        self.finished
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

struct ActiveUpload {
    session: Arc<Session>,
    abort: AbortHandle,
}

struct Shared {
    progress_listener: ListenerSlot<dyn ProgressListener>,
    completion_listener: ListenerSlot<dyn CompletionListener>,
    dispatcher: Box<dyn Dispatcher>,
    // None is Idle, Some is InFlight.
    active: Mutex<Option<ActiveUpload>>,
}

impl Shared {
    fn active(&self) -> MutexGuard<'_, Option<ActiveUpload>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns to Idle if `session` is still the one in flight.
    fn release(&self, session: &Session) {
        let mut active = self.active();
        if active.as_ref().is_some_and(|a| a.session.id == session.id) {
            *active = None;
        }
    }

    /// Queues a progress notification. Progress observed after the outcome was decided is
    /// dropped, so it can never be delivered after the outcome.
    fn post_progress(self: &Arc<Self>, session: &Arc<Session>, event: ProgressEvent) {
        if session.is_finished() {
            debug!("Upload {} already finished, dropping progress", session.id);
            return;
        }
        let shared = self.clone();
        let session = session.clone();
        let event = event.capped();
        self.dispatcher.dispatch(Box::new(move || {
            if session.is_cancelled() {
                return;
            }
            if let Some(listener) = shared.progress_listener.get() {
                listener.on_progress(&event);
            }
        }));
    }

    /// Delivers the session's single outcome. Later calls for the same session are dropped.
    fn complete(self: &Arc<Self>, session: &Arc<Session>, outcome: Outcome) {
        if !session.try_finish() {
            debug!("Upload {} already finished, dropping {:?}", session.id, outcome);
            return;
        }
        self.release(session);

        if session.is_cancelled() {
            return;
        }
        debug!("Upload {} finished: {:?}", session.id, outcome);

        let shared = self.clone();
        let session = session.clone();
        self.dispatcher.dispatch(Box::new(move || {
            if session.is_cancelled() {
                return;
            }
            match shared.completion_listener.get() {
                Some(listener) => deliver(listener.as_ref(), &outcome),
                None => debug!(
                    "No completion listener, dropping outcome of upload {}",
                    session.id
                ),
            }
        }));
    }
}

pub struct Uploader {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    runtime: Handle,
    upload_url: Url,
    default_message: Arc<str>,
    next_session: AtomicU64,
}

impl Uploader {
    pub fn new(
        upload_url: Url,
        transport: impl Transport,
        dispatcher: impl Dispatcher,
        runtime: Handle,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                progress_listener: ListenerSlot::empty(),
                completion_listener: ListenerSlot::empty(),
                dispatcher: Box::new(dispatcher),
                active: Mutex::new(None),
            }),
            transport: Arc::new(transport),
            runtime,
            upload_url,
            default_message: Arc::from(DEFAULT_ERROR_MESSAGE),
            next_session: AtomicU64::new(1),
        }
    }

    /// Replaces the message used for failures that carry no server-provided message.
    pub fn with_default_message(mut self, message: impl Into<String>) -> Self {
        self.default_message = Arc::from(message.into());
        self
    }

    pub fn upload_url(&self) -> &Url {
        &self.upload_url
    }

    pub fn set_progress_listener(&self, listener: impl ProgressListener + 'static) {
        self.shared.progress_listener.set(Some(Arc::new(listener)));
    }

    pub fn clear_progress_listener(&self) {
        self.shared.progress_listener.set(None);
    }

    pub fn set_completion_listener(&self, listener: impl CompletionListener + 'static) {
        self.shared.completion_listener.set(Some(Arc::new(listener)));
    }

    pub fn clear_completion_listener(&self) {
        self.shared.completion_listener.set(None);
    }

    pub fn is_uploading(&self) -> bool {
        self.shared.active().is_some()
    }

    /// Starts uploading `file_path` and returns without waiting for the network.
    ///
    /// An empty path is ignored: no session is created and no callback is delivered.
    /// Every other problem is reported as an [`Outcome::Failure`] to the completion listener.
    pub fn upload_picture(&self, file_path: impl AsRef<Path>) -> Result<(), UploadError> {
        let file_path = file_path.as_ref();
        if file_path.as_os_str().is_empty() {
            debug!("Ignoring upload request with an empty path");
            return Ok(());
        }

        let mut active = self.shared.active();
        if active.is_some() {
            return Err(UploadError::Busy);
        }
        let session = Arc::new(Session::new(
            self.next_session.fetch_add(1, Ordering::Relaxed),
        ));

        let request = UploadRequest {
            file_path: file_path.to_path_buf(),
            url: self.upload_url.clone(),
            field_name: FILE_FIELD_NAME,
        };
        debug!("Starting upload {} of {}", session.id, request.file_path.display());

        let task = UploadTask {
            shared: self.shared.clone(),
            session: session.clone(),
            transport: self.transport.clone(),
            default_message: self.default_message.clone(),
        };
        // The slot stays locked until the abort handle is stored.
        let join = self.runtime.spawn(task.run(request));
        *active = Some(ActiveUpload {
            session,
            abort: join.abort_handle(),
        });
        Ok(())
    }

    /// Aborts the upload in flight, if any. No further callbacks are delivered for it.
    pub fn cancel(&self) -> bool {
        let Some(active) = self.shared.active().take() else {
            return false;
        };
        debug!("Cancelling upload {}", active.session.id);
        active.session.cancel();
        active.abort.abort();
        true
    }
}

struct UploadTask {
    shared: Arc<Shared>,
    session: Arc<Session>,
    transport: Arc<dyn Transport>,
    default_message: Arc<str>,
}

impl UploadTask {
    async fn run(self, request: UploadRequest) {
        let shared = self.shared.clone();
        let session = self.session.clone();
        let default_message = self.default_message.clone();

        let outcome = match AssertUnwindSafe(self.upload(request)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("Upload {} panicked", session.id);
                Outcome::failure(ERROR_OCCURS_EXCEPTION, &*default_message)
            }
        };
        shared.complete(&session, outcome);
    }

    async fn upload(self, request: UploadRequest) -> Outcome {
        match tokio::fs::metadata(&request.file_path).await {
            Ok(metadata) if metadata.is_file() => {}
            _ => {
                debug!("{} is not a regular file", request.file_path.display());
                return Outcome::failure(ERROR_ILLEGAL_PARAMETERS, &*self.default_message);
            }
        }

        let transport_request = match self.build_request(&request).await {
            Ok(transport_request) => transport_request,
            Err(e) => {
                warn!("Failed to build upload request: {:#}", e);
                return Outcome::failure(ERROR_OCCURS_EXCEPTION, &*self.default_message);
            }
        };

        let result = self.transport.execute(transport_request).await;
        classify_response(result, &self.default_message)
    }

    async fn build_request(&self, request: &UploadRequest) -> Result<TransportRequest> {
        let part = FilePart::open(&request.file_path, PNG_CONTENT_TYPE).await?;
        let content_length = part.content_length();

        let reporter = SessionReporter {
            shared: self.shared.clone(),
            session: self.session.clone(),
            default_message: self.default_message.clone(),
        };
        let part = part.map_stream(|body| -> BodyStream {
            Box::pin(ProgressStream::new(body, content_length, reporter))
        });

        Ok(TransportRequest {
            url: request.url.clone(),
            field_name: request.field_name,
            part,
        })
    }
}

struct SessionReporter {
    shared: Arc<Shared>,
    session: Arc<Session>,
    default_message: Arc<str>,
}

impl ProgressReporter for SessionReporter {
    fn report(&mut self, event: ProgressEvent) {
        self.shared.post_progress(&self.session, event);
    }

    fn fault(&mut self, error: &io::Error) {
        warn!("Failed to stream upload {}: {}", self.session.id, error);
        self.shared.complete(
            &self.session,
            Outcome::failure(ERROR_OCCURS_EXCEPTION, &*self.default_message),
        );
    }
}

/// Maps what came back from the transport onto the outcome listeners see.
pub fn classify_response(
    result: std::result::Result<TransportResponse, TransportError>,
    default_message: &str,
) -> Outcome {
    let response = match result {
        Ok(response) => response,
        Err(e) => {
            warn!("Upload request failed: {}", e);
            return Outcome::failure(ERROR_SERVER, "");
        }
    };

    if !response.is_success() {
        return Outcome::failure(i32::from(response.status), default_message);
    }

    match serde_json::from_slice::<UploadResponse>(&response.body) {
        Ok(decoded) => match decoded.uploaded_url() {
            Some(url) => Outcome::success(url),
            None => Outcome::failure(decoded.code, decoded.message.unwrap_or_default()),
        },
        Err(e) => {
            warn!("Failed to decode upload response: {}", e);
            Outcome::failure(ERROR_SERVER, default_message)
        }
    }
}
