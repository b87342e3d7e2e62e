use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use log::trace;

/// Minimum percent delta between two non-terminal progress emissions.
pub const PROGRESS_INTERVAL: u8 = 5;
/// Percent at which the write phase is complete.
pub const UPLOAD_COMPLETE: u8 = 100;
/// Highest percent a listener ever sees. 100 is reserved for the server confirming the upload.
pub const MAX_REPORTED_PERCENT: u8 = UPLOAD_COMPLETE - 1;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub bytes_written: u64,
    pub content_length: u64,
    pub percent: u8,
    /// Every byte of the request body has been handed to the transport.
    pub done: bool,
}

impl ProgressEvent {
    /// The event as listeners see it, with the write-complete 100 capped to 99.
    pub fn capped(self) -> Self {
        Self {
            percent: self.percent.min(MAX_REPORTED_PERCENT),
            ..self
        }
    }
}

/// Decides which writes are worth a progress notification.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    content_length: u64,
    bytes_written: u64,
    last_emitted: u8,
    interval: u8,
    complete: bool,
}

impl ProgressThrottle {
    pub fn new(content_length: u64) -> Self {
        Self::with_interval(content_length, PROGRESS_INTERVAL)
    }

    pub fn with_interval(content_length: u64, interval: u8) -> Self {
        Self {
            content_length,
            bytes_written: 0,
            last_emitted: 0,
            interval,
            complete: false,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    fn percent(&self) -> u8 {
        if self.content_length == 0 {
            return UPLOAD_COMPLETE;
        }
        let percent = self.bytes_written as u128 * 100 / self.content_length as u128;
        percent.min(UPLOAD_COMPLETE as u128) as u8
    }

    /// Accounts for `written` more bytes and returns the event to emit, if any.
    ///
    /// Reaching 100 always emits, once. Below that an event is only emitted when the
    /// percent moved by at least the interval since the last emission.
    pub fn record(&mut self, written: u64) -> Option<ProgressEvent> {
        if self.complete {
            return None;
        }

        self.bytes_written = self.bytes_written.saturating_add(written);
        let percent = self.percent();

        if percent >= UPLOAD_COMPLETE {
            self.complete = true;
            self.last_emitted = percent;
            return Some(self.event(percent));
        }

        if percent.saturating_sub(self.last_emitted) < self.interval {
            trace!(
                "Throttled progress at {}% ({} of {} bytes)",
                percent, self.bytes_written, self.content_length
            );
            return None;
        }

        self.last_emitted = percent;
        Some(self.event(percent))
    }

    fn event(&self, percent: u8) -> ProgressEvent {
        ProgressEvent {
            bytes_written: self.bytes_written,
            content_length: self.content_length,
            percent,
            done: self.bytes_written >= self.content_length,
        }
    }
}

/// Receives what a [`ProgressStream`] observes while the transport drains it.
pub trait ProgressReporter: Send + Unpin {
    fn report(&mut self, event: ProgressEvent);

    /// The wrapped stream failed to produce the next chunk.
    fn fault(&mut self, error: &io::Error);
}

/// Wraps the request body and feeds every chunk handed to the transport through a
/// [`ProgressThrottle`].
pub struct ProgressStream<S, R> {
    inner: S,
    throttle: ProgressThrottle,
    reporter: R,
}

impl<S, R> ProgressStream<S, R>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
    R: ProgressReporter,
{
    pub fn new(inner: S, content_length: u64, reporter: R) -> Self {
        Self {
            inner,
            throttle: ProgressThrottle::new(content_length),
            reporter,
        }
    }
}

impl<S, R> Stream for ProgressStream<S, R>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
    R: ProgressReporter,
{
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        match ready!(this.inner.poll_next_unpin(cx)) {
            Some(Ok(chunk)) => {
                if let Some(event) = this.throttle.record(chunk.len() as u64) {
                    this.reporter.report(event);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(e)) => {
                this.reporter.fault(&e);
                Poll::Ready(Some(Err(e)))
            }
            None => Poll::Ready(None),
        }
    }
}
