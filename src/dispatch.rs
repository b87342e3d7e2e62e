//! Delivery of callbacks onto the host's designated execution context.
//!
//! The uploader never invokes a listener directly. It hands a [`Task`] to a [`Dispatcher`],
//! and the dispatcher decides where the task runs: a UI thread, the main thread of a CLI,
//! or simply inline.

use log::debug;
use tokio::sync::mpsc;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Dispatcher: Send + Sync + 'static {
    fn dispatch(&self, task: Task);
}

/// Runs tasks on whichever thread produced them.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl Dispatcher for Inline {
    fn dispatch(&self, task: Task) {
        task()
    }
}

/// Creates a dispatcher whose tasks run wherever the returned receiver is drained.
pub fn context() -> (ContextSender, ContextReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ContextSender { tx }, ContextReceiver { rx })
}

#[derive(Clone)]
pub struct ContextSender {
    tx: mpsc::UnboundedSender<Task>,
}

impl Dispatcher for ContextSender {
    fn dispatch(&self, task: Task) {
        if self.tx.send(task).is_err() {
            debug!("Designated context is gone, dropping callback");
        }
    }
}

pub struct ContextReceiver {
    rx: mpsc::UnboundedReceiver<Task>,
}

impl ContextReceiver {
    /// Runs every task already queued without waiting. Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Waits for the next task and runs it. Returns `false` once every sender is gone.
    pub async fn run_next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Blocking flavour of [`ContextReceiver::run_next`] for hosts driving their own thread.
    ///
    /// Must not be called from within an async context.
    pub fn blocking_run_next(&mut self) -> bool {
        match self.rx.blocking_recv() {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }
}
