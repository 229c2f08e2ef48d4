//! Cooperative pause and cancellation.
//!
//! A [`JobControl`] is shared between the controller and every worker of a
//! job. Workers call [`JobControl::checkpoint`] between files: the call
//! blocks while the job is paused and returns [`Cancelled`] once the job has
//! been cancelled. Nothing is ever interrupted mid-file.
//!
//! # Example
//!
//! ```
//! use dupelink::job::control::{JobControl, PauseReason};
//!
//! let control = JobControl::new();
//! assert!(control.checkpoint().is_ok());
//!
//! control.pause(PauseReason::Operator);
//! assert!(control.is_paused());
//! control.resume();
//!
//! control.cancel();
//! assert!(control.checkpoint().is_err());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Why a job is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// Requested through the controller API
    Operator,
    /// Requested by the memory guard
    Memory,
}

/// Returned by [`JobControl::checkpoint`] once the job has been cancelled.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("job cancelled")]
pub struct Cancelled;

#[derive(Debug, Default)]
struct ControlInner {
    cancelled: AtomicBool,
    paused: Mutex<Option<PauseReason>>,
    wake: Condvar,
    abort_reason: Mutex<Option<String>>,
}

/// Shared pause/cancel handle for one job.
///
/// Cloning is cheap; all clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct JobControl {
    inner: Arc<ControlInner>,
}

impl JobControl {
    /// Create a handle for a job that is neither paused nor cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn paused_guard(&self) -> MutexGuard<'_, Option<PauseReason>> {
        self.inner
            .paused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Request cancellation and wake any paused worker.
    ///
    /// Returns `true` if this call changed the state.
    pub fn cancel(&self) -> bool {
        let changed = !self.inner.cancelled.swap(true, Ordering::SeqCst);
        // Take the lock so a worker between its check and its wait cannot miss the wakeup.
        let _guard = self.paused_guard();
        self.inner.wake.notify_all();
        changed
    }

    /// Cancel the job because of a fault rather than an operator request.
    ///
    /// The first reason recorded wins; the job ends in the error state.
    pub fn abort(&self, reason: impl Into<String>) -> bool {
        {
            let mut slot = self
                .inner
                .abort_reason
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(reason.into());
            }
        }
        self.cancel()
    }

    /// Reason recorded by [`JobControl::abort`], if any.
    #[must_use]
    pub fn abort_reason(&self) -> Option<String> {
        self.inner
            .abort_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Pause the job. No-op if already paused or cancelled.
    ///
    /// Returns `true` if this call changed the state.
    pub fn pause(&self, reason: PauseReason) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let mut paused = self.paused_guard();
        if paused.is_some() {
            return false;
        }
        *paused = Some(reason);
        true
    }

    /// Resume a paused job. No-op if not paused.
    ///
    /// Returns `true` if this call changed the state.
    pub fn resume(&self) -> bool {
        let mut paused = self.paused_guard();
        if paused.take().is_none() {
            return false;
        }
        self.inner.wake.notify_all();
        true
    }

    /// Whether the job is currently paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused_guard().is_some()
    }

    /// Reason for the current pause, if any.
    #[must_use]
    pub fn pause_reason(&self) -> Option<PauseReason> {
        *self.paused_guard()
    }

    /// Suspension point between units of work.
    ///
    /// Blocks while the job is paused.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if the job was cancelled before or during the wait.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            return Err(Cancelled);
        }

        let mut paused = self.paused_guard();
        while paused.is_some() && !self.is_cancelled() {
            paused = self
                .inner
                .wake
                .wait(paused)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(paused);

        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_pause_resume_are_idempotent() {
        let control = JobControl::new();
        assert!(control.pause(PauseReason::Operator));
        assert!(!control.pause(PauseReason::Memory));
        assert_eq!(control.pause_reason(), Some(PauseReason::Operator));

        assert!(control.resume());
        assert!(!control.resume());
        assert!(!control.is_paused());
    }

    #[test]
    fn test_cancel_is_idempotent_and_blocks_pause() {
        let control = JobControl::new();
        assert!(control.cancel());
        assert!(!control.cancel());
        assert!(!control.pause(PauseReason::Operator));
        assert_eq!(control.checkpoint(), Err(Cancelled));
    }

    #[test]
    fn test_abort_keeps_first_reason() {
        let control = JobControl::new();
        assert!(control.abort("memory ceiling exceeded"));
        assert!(!control.abort("second"));
        assert!(control.is_cancelled());
        assert_eq!(control.abort_reason().as_deref(), Some("memory ceiling exceeded"));
        assert_eq!(JobControl::new().abort_reason(), None);
    }

    #[test]
    fn test_checkpoint_blocks_until_resumed() {
        let control = JobControl::new();
        control.pause(PauseReason::Operator);

        let worker = control.clone();
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let result = worker.checkpoint();
            tx.send(result).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        control.resume();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Ok(()));
        handle.join().unwrap();
    }

    #[test]
    fn test_cancel_wakes_paused_worker() {
        let control = JobControl::new();
        control.pause(PauseReason::Memory);

        let worker = control.clone();
        let handle = thread::spawn(move || worker.checkpoint());

        thread::sleep(Duration::from_millis(50));
        control.cancel();
        assert_eq!(handle.join().unwrap(), Err(Cancelled));
    }
}
