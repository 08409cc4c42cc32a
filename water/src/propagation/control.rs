//! Run cancellation and deadlines

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::info;

/// Cancels the run it was created with
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        info!("run cancellation requested");
        self.tx.send_replace(true);
    }
}

/// Observed by a run at phase boundaries and before each per-target call
#[derive(Clone)]
pub struct RunControl {
    rx: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

impl RunControl {
    pub fn new(deadline: Option<Duration>) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let control = Self {
            rx,
            deadline: deadline.map(|d| Instant::now() + d),
        };
        (control, CancelHandle { tx: Arc::new(tx) })
    }

    /// A control that is never cancelled
    pub fn unbounded() -> Self {
        Self::new(None).0
    }

    /// Why the run should stop, if it should
    pub fn stop_reason(&self) -> Option<&'static str> {
        if *self.rx.borrow() {
            Some("run cancelled")
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some("run deadline exceeded")
        } else {
            None
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.stop_reason().is_some()
    }
}
