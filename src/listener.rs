use std::sync::{Arc, PoisonError, RwLock};

use crate::error::Outcome;
use crate::progress::ProgressEvent;

pub trait ProgressListener: Send + Sync {
    /// `event.percent` is always within `0..=99`.
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressListener for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

pub trait CompletionListener: Send + Sync {
    fn on_success(&self, url: &str);

    fn on_failure(&self, code: i32, message: &str);
}

/// Adapts a closure over [`Outcome`] into a [`CompletionListener`].
pub fn completion_fn<F>(f: F) -> OutcomeFn<F>
where
    F: Fn(Outcome) + Send + Sync,
{
    OutcomeFn(f)
}

pub struct OutcomeFn<F>(F);

impl<F> CompletionListener for OutcomeFn<F>
where
    F: Fn(Outcome) + Send + Sync,
{
    fn on_success(&self, url: &str) {
        (self.0)(Outcome::success(url))
    }

    fn on_failure(&self, code: i32, message: &str) {
        (self.0)(Outcome::failure(code, message))
    }
}

/// An optional listener that can be swapped or cleared while callbacks are in flight.
///
/// Readers take a snapshot with [`ListenerSlot::get`] at the moment they need it.
pub(crate) struct ListenerSlot<L: ?Sized> {
    inner: RwLock<Option<Arc<L>>>,
}

impl<L: ?Sized> ListenerSlot<L> {
    pub(crate) fn empty() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    pub(crate) fn set(&self, listener: Option<Arc<L>>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = listener;
    }

    pub(crate) fn get(&self) -> Option<Arc<L>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub(crate) fn deliver(listener: &dyn CompletionListener, outcome: &Outcome) {
    match outcome {
        Outcome::Success { url } => listener.on_success(url),
        Outcome::Failure { code, message } => listener.on_failure(*code, message),
    }
}
