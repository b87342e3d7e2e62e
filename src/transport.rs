use std::error::Error as _;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::future::BoxFuture;
use log::{debug, warn};
use reqwest::{Client, Response};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use url::Url;

use crate::multipart::{BodyStream, FilePart};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
pub const READ_TIMEOUT: Duration = Duration::from_secs(20);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TransportRequest {
    pub url: Url,
    pub field_name: &'static str,
    pub part: FilePart,
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Timed out while {phase}")]
    Timeout { phase: &'static str },

    #[error("Request body could not be written: {0}")]
    Body(String),

    #[error("Transport error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        let detail = match e.source() {
            Some(source) => format!("{e}: {source}"),
            None => e.to_string(),
        };
        if e.is_connect() {
            TransportError::Connect(detail)
        } else if e.is_timeout() {
            TransportError::Timeout { phase: "connecting" }
        } else if e.is_body() {
            TransportError::Body(detail)
        } else {
            TransportError::Other(detail)
        }
    }
}

/// Sends one upload request and returns the server's answer.
///
/// Implementations must drain the request's file part to completion or fail, and must not
/// keep it once the returned future resolves.
pub trait Transport: Send + Sync + 'static {
    fn execute(
        &self,
        request: TransportRequest,
    ) -> BoxFuture<'static, std::result::Result<TransportResponse, TransportError>>;
}

/// Sends the upload as a reqwest multipart form.
///
/// The read timeout covers the wait for the response once the body is fully written, and then
/// each chunk of the response body. The write timeout covers every gap between body chunks.
pub struct ReqwestTransport {
    client: Client,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        Self::with_timeouts(CONNECT_TIMEOUT, READ_TIMEOUT, WRITE_TIMEOUT)
    }

    pub fn with_timeouts(connect: Duration, read: Duration, write: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            read_timeout: read,
            write_timeout: write,
        })
    }
}

impl Transport for ReqwestTransport {
    fn execute(
        &self,
        request: TransportRequest,
    ) -> BoxFuture<'static, std::result::Result<TransportResponse, TransportError>> {
        let client = self.client.clone();
        let read_timeout = self.read_timeout;
        let write_timeout = self.write_timeout;

        Box::pin(async move {
            let watchdog = WriteWatchdog::default();
            let part = request.part.map_stream(|body| watchdog.watch(body));
            debug!(
                "POST {} ({} as {}, {} bytes)",
                request.url,
                part.file_name(),
                part.content_type(),
                part.content_length()
            );
            let form = part.into_form(request.field_name)?;

            let send = client.post(request.url).multipart(form).send();
            let awaiting_response = async {
                watchdog.finished().await;
                tokio::time::sleep(read_timeout).await;
            };

            let response = tokio::select! {
                response = send => response?,
                _ = watchdog.stalled(write_timeout) => {
                    warn!("No body progress for {:?}, giving up", write_timeout);
                    return Err(TransportError::Timeout { phase: "writing" });
                }
                _ = awaiting_response => {
                    warn!("No response {:?} after the body was sent, giving up", read_timeout);
                    return Err(TransportError::Timeout { phase: "reading" });
                }
            };

            let status = response.status().as_u16();
            let body = read_body(response, read_timeout).await?;
            debug!("Upload endpoint answered {} with {} bytes", status, body.len());

            Ok(TransportResponse { status, body })
        })
    }
}

/// Collects the response body, allowing at most `timeout` between chunks.
async fn read_body(
    mut response: Response,
    timeout: Duration,
) -> std::result::Result<Bytes, TransportError> {
    let mut body = BytesMut::new();
    loop {
        match tokio::time::timeout(timeout, response.chunk()).await {
            Ok(Ok(Some(chunk))) => body.extend_from_slice(&chunk),
            Ok(Ok(None)) => return Ok(body.freeze()),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(TransportError::Timeout { phase: "reading" }),
        }
    }
}

#[derive(Debug, Default)]
struct WatchState {
    last_pull: Option<Instant>,
    finished: bool,
}

#[derive(Default)]
struct WatchInner {
    state: Mutex<WatchState>,
    done: Notify,
}

/// Tracks how long the HTTP client goes without pulling the next body chunk, and when the
/// body has been fully handed over.
///
/// reqwest only exposes connect and whole-request timeouts, so write stalls are detected here.
#[derive(Clone, Default)]
struct WriteWatchdog {
    inner: Arc<WatchInner>,
}

impl WriteWatchdog {
    fn lock(&self) -> std::sync::MutexGuard<'_, WatchState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn watch(&self, mut body: BodyStream) -> BodyStream {
        let watchdog = self.clone();
        Box::pin(async_stream::stream! {
            while let Some(chunk) = body.next().await {
                watchdog.lock().last_pull = Some(Instant::now());
                yield chunk;
            }
            watchdog.lock().finished = true;
            watchdog.inner.done.notify_one();
        })
    }

    /// Resolves once the whole body has been pulled.
    async fn finished(&self) {
        if self.lock().finished {
            return;
        }
        self.inner.done.notified().await
    }

    /// Resolves once a started body has gone `timeout` without being pulled. Never resolves
    /// after the body has finished.
    async fn stalled(&self, timeout: Duration) {
        let tick = (timeout / 4).max(Duration::from_millis(10));
        loop {
            tokio::time::sleep(tick).await;
            let (finished, last_pull) = {
                let state = self.lock();
                (state.finished, state.last_pull)
            };
            if finished {
                break;
            }
            if last_pull.is_some_and(|last| last.elapsed() >= timeout) {
                return;
            }
        }
        futures::future::pending::<()>().await
    }
}
