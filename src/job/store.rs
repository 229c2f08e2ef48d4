//! Job records and the job store.
//!
//! A [`JobRecord`] bundles everything the controller knows about one job:
//! its live state, its pause/cancel handle and, once finished, its output.
//! Records live in a [`JobStore`] injected into the controller; the
//! in-process default is [`MemoryJobStore`].

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use super::control::JobControl;
use super::state::{JobId, JobKind, JobState, JobStatus, ProgressSnapshot};
use crate::actions::LinkResult;
use crate::duplicates::ScanResults;

/// Result produced by a finished job.
#[derive(Debug, Clone)]
pub enum JobOutput {
    /// Output of a scan job
    Scan(Arc<ScanResults>),
    /// Output of a link job
    Link(Arc<LinkResult>),
}

/// Everything tracked for one job.
#[derive(Debug)]
pub struct JobRecord {
    id: JobId,
    kind: JobKind,
    state: Mutex<JobState>,
    finished: Condvar,
    control: JobControl,
    output: Mutex<Option<JobOutput>>,
    linked_by: Mutex<Option<JobId>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl JobRecord {
    /// Create a queued record.
    #[must_use]
    pub fn new(id: JobId, kind: JobKind, eta_window: usize) -> Self {
        Self {
            id,
            kind,
            state: Mutex::new(JobState::new(id, kind, eta_window)),
            finished: Condvar::new(),
            control: JobControl::new(),
            output: Mutex::new(None),
            linked_by: Mutex::new(None),
        }
    }

    /// Job identifier.
    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Job kind.
    #[must_use]
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Pause/cancel handle shared with the job's workers.
    #[must_use]
    pub fn control(&self) -> &JobControl {
        &self.control
    }

    /// Mutate the live state under its lock.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut JobState) -> R) -> R {
        f(&mut lock(&self.state))
    }

    /// Stored status, without folding in pauses.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        lock(&self.state).status
    }

    /// Owned progress snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        let pause = self.control.pause_reason();
        lock(&self.state).snapshot(pause)
    }

    /// Mark the job as running.
    pub fn start(&self) {
        let mut state = lock(&self.state);
        if state.status == JobStatus::Queued {
            state.status = JobStatus::Running;
        }
    }

    /// Move to a terminal status and wake waiters.
    pub fn finish(&self, status: JobStatus, error: Option<String>) {
        let mut state = lock(&self.state);
        state.finish(status, error);
        self.finished.notify_all();
    }

    /// Block until the job is terminal or `timeout` elapses.
    ///
    /// Returns the status observed last.
    pub fn wait(&self, timeout: Option<Duration>) -> JobStatus {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = lock(&self.state);
        while !state.status.is_terminal() {
            match deadline {
                None => {
                    state = self
                        .finished
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    state = self
                        .finished
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
        state.status
    }

    /// Store the job's output.
    pub fn set_output(&self, output: JobOutput) {
        *lock(&self.output) = Some(output);
    }

    /// Output, once available.
    #[must_use]
    pub fn output(&self) -> Option<JobOutput> {
        lock(&self.output).clone()
    }

    /// Claim this scan for a link job. Fails with the existing claimant.
    pub fn claim_for_link(&self, link_job: JobId) -> Result<(), JobId> {
        let mut linked_by = lock(&self.linked_by);
        match *linked_by {
            Some(existing) => Err(existing),
            None => {
                *linked_by = Some(link_job);
                Ok(())
            }
        }
    }

    /// Give up a claim made by `link_job`; claims of other jobs are kept.
    pub fn release_link_claim(&self, link_job: JobId) {
        let mut linked_by = lock(&self.linked_by);
        if *linked_by == Some(link_job) {
            *linked_by = None;
        }
    }

    /// Link job that claimed this scan, if any.
    #[must_use]
    pub fn linked_by(&self) -> Option<JobId> {
        *lock(&self.linked_by)
    }
}

/// Storage for job records, keyed by id.
pub trait JobStore: Send + Sync {
    /// Add or replace a record.
    fn insert(&self, record: Arc<JobRecord>);

    /// Look up a record.
    fn get(&self, id: JobId) -> Option<Arc<JobRecord>>;

    /// Remove a record.
    fn remove(&self, id: JobId) -> Option<Arc<JobRecord>>;

    /// All records, ordered by id.
    fn records(&self) -> Vec<Arc<JobRecord>>;
}

/// In-process job store.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<BTreeMap<JobId, Arc<JobRecord>>>,
}

impl MemoryJobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn insert(&self, record: Arc<JobRecord>) {
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id(), record);
    }

    fn get(&self, id: JobId) -> Option<Arc<JobRecord>> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn remove(&self, id: JobId) -> Option<Arc<JobRecord>> {
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    fn records(&self) -> Vec<Arc<JobRecord>> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}
