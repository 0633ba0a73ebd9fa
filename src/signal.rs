//! Broadcast cancellation flag shared between the run loop, in-flight
//! packet evaluations, and the capture reader.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::MatchError;

/// Why a run was told to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// External request (operator signal or driver shutdown).
    Cancelled,
    /// The run's wall-clock budget elapsed.
    DeadlineExceeded,
}

impl From<CancelReason> for MatchError {
    fn from(reason: CancelReason) -> Self {
        match reason {
            CancelReason::Cancelled => MatchError::Cancelled,
            CancelReason::DeadlineExceeded => MatchError::DeadlineExceeded,
        }
    }
}

/// One logical setter, any number of concurrent observers. Once set the
/// signal cannot be unset and the first reason sticks.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<Option<CancelReason>>>,
    rx: watch::Receiver<Option<CancelReason>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Set the signal. Idempotent; a second call never overwrites the reason.
    pub fn cancel(&self, reason: CancelReason) {
        self.tx.send_if_modified(|state| {
            if state.is_none() {
                *state = Some(reason);
                true
            } else {
                false
            }
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        *self.rx.borrow()
    }

    /// The signal's state as a matcher error, if set.
    pub fn error(&self) -> Option<MatchError> {
        self.reason().map(Into::into)
    }

    /// Resolves once the signal is set. Safe to race from many tasks.
    pub async fn cancelled(&self) -> CancelReason {
        let mut rx = self.rx.clone();
        // The borrowed ref must be dropped before `rx` goes out of scope.
        let reason = match rx.wait_for(|state| state.is_some()).await {
            Ok(state) => (*state).unwrap_or(CancelReason::Cancelled),
            // The sender cannot be dropped while `self` holds it, but the
            // channel closing still means shutdown.
            Err(_) => CancelReason::Cancelled,
        };
        reason
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}
