//! Bridge from engine callbacks to job state and subscribers.
//!
//! Each running job owns one [`ProgressTracker`]. Every callback first
//! updates the job's [`JobState`](super::state::JobState) under its lock and
//! then publishes a [`ProgressEvent`] on the controller's [`EventBus`].
//! Polling callers read snapshots; subscribers get the same information
//! pushed.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use super::state::{FileProgress, Phase};
use super::store::JobRecord;
use crate::progress::{ProgressCallback, ProgressEvent};

/// Events buffered per subscriber.
pub const SUBSCRIBER_CAPACITY: usize = 1024;

/// Fan-out of progress events to any number of subscribers.
///
/// Each subscriber gets a bounded channel. Per-item events are dropped for
/// a subscriber whose backlog reaches the last sixteenth of its capacity,
/// which stays reserved for phase, message and finish events. Publishing
/// never blocks a job. Subscribers whose receiver has been dropped are
/// pruned on the next publish.
#[derive(Debug)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<ProgressEvent>>>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_capacity(SUBSCRIBER_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bus buffering at most `capacity` events per subscriber.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(2),
        }
    }

    /// Register a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<ProgressEvent> {
        let (tx, rx) = bounded(self.capacity);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Deliver an event to every live subscriber without blocking.
    pub fn publish(&self, event: ProgressEvent) {
        let lossy_limit = self.capacity - (self.capacity / 16).max(1);
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| {
            if event.is_lossy() && tx.len() >= lossy_limit {
                return true;
            }
            match tx.try_send(event.clone()) {
                Ok(()) | Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
    }

    /// Number of live subscribers (as of the last publish).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// [`ProgressCallback`] that records into a job and publishes events.
pub struct ProgressTracker {
    record: Arc<JobRecord>,
    bus: Arc<EventBus>,
}

impl ProgressTracker {
    /// Track progress for `record`, publishing on `bus`.
    #[must_use]
    pub fn new(record: Arc<JobRecord>, bus: Arc<EventBus>) -> Self {
        Self { record, bus }
    }
}

impl ProgressCallback for ProgressTracker {
    fn on_phase_start(&self, phase: Phase, total: usize) {
        self.record.with_state(|state| state.enter_phase(phase, total));
        log::debug!("Job {}: {} ({} items)", self.record.id(), phase, total);
        self.bus.publish(ProgressEvent::PhaseStarted {
            job: self.record.id(),
            phase,
            total,
        });
    }

    fn on_progress(&self, current: usize, path: &Path) {
        self.record.with_state(|state| state.advance(current));
        self.bus.publish(ProgressEvent::Progress {
            job: self.record.id(),
            current,
            path: path.to_path_buf(),
        });
    }

    fn on_file_progress(&self, path: &Path, bytes_done: u64, bytes_total: u64) {
        self.record.with_state(|state| {
            state.micro_progress.insert(
                path.to_path_buf(),
                FileProgress {
                    bytes_done,
                    bytes_total,
                },
            );
        });
        self.bus.publish(ProgressEvent::FileProgress {
            job: self.record.id(),
            path: path.to_path_buf(),
            bytes_done,
            bytes_total,
        });
    }

    fn on_file_done(&self, path: &Path) {
        self.record.with_state(|state| {
            state.micro_progress.remove(path);
        });
        self.bus.publish(ProgressEvent::FileDone {
            job: self.record.id(),
            path: path.to_path_buf(),
        });
    }

    fn on_phase_end(&self, phase: Phase) {
        self.record.with_state(|state| state.micro_progress.clear());
        self.bus.publish(ProgressEvent::PhaseEnded {
            job: self.record.id(),
            phase,
        });
    }

    fn on_message(&self, message: &str) {
        self.record
            .with_state(|state| state.message = Some(message.to_string()));
        self.bus.publish(ProgressEvent::Message {
            job: self.record.id(),
            message: message.to_string(),
        });
    }
}
