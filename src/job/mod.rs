//! Job control: scan and link jobs, progress snapshots and events.
//!
//! # Overview
//!
//! [`JobController`] is the surface the outer API layer talks to. Each job
//! runs on its own thread and moves through
//!
//! ```text
//! Queued ─► Running(phase) ─► Done | Error | Cancelled
//!              ▲     │
//!              └─ Paused / MemoryPaused
//! ```
//!
//! Progress is pushed by the engine into the job's state through a
//! [`ProgressTracker`], which also publishes [`ProgressEvent`]s to every
//! subscriber. Callers either poll [`JobController::get_progress`] for an
//! owned [`ProgressSnapshot`] or consume the event channel from
//! [`JobController::subscribe`].
//!
//! Pause, resume and cancel are idempotent and never fail for a finished
//! job. Records live in an injected [`JobStore`] and are only removed by
//! [`JobController::evict`] or [`JobController::clear_finished`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dupelink::config::{ScanRequest, Settings};
//! use dupelink::job::{JobController, MemoryJobStore};
//!
//! let controller = JobController::new(Arc::new(MemoryJobStore::new()), Settings::default());
//! let id = controller.start_scan(ScanRequest::new(vec!["/data".into()])).unwrap();
//! controller.wait(id, None).unwrap();
//! let results = controller.get_results(id).unwrap();
//! println!("{}", results.summary.action_taken);
//! ```

pub mod control;
pub mod eta;
pub mod state;
pub mod store;
pub mod tracker;

pub use control::{Cancelled, JobControl, PauseReason};
pub use state::{
    FileProgress, JobId, JobKind, JobState, JobStatus, MicroProgress, Phase, ProgressSnapshot,
};
pub use store::{JobOutput, JobRecord, JobStore, MemoryJobStore};
pub use tracker::{EventBus, ProgressTracker};

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::Receiver;
use thiserror::Error;

use crate::actions::{
    plan_actions, rollback, FileSystemOps, LinkExecutor, LinkKind, LinkResult, RollbackReport,
    StdFileSystem, UndoError, UndoLog, Verifier,
};
use crate::config::{ConfigError, ScanConfig, ScanRequest, Settings};
use crate::duplicates::{
    DuplicateFinder, DuplicateSet, FinderConfig, FinderError, OriginalStrategy, ScanResults,
    ScanWarning,
};
use crate::memory::{GuardHandle, MemoryGuard, MemoryProbe, SysinfoProbe};
use crate::progress::{ProgressCallback, ProgressEvent};
use crate::scanner::Hasher;

/// Errors returned by controller operations.
#[derive(Debug, Error)]
pub enum JobError {
    /// No job with this id.
    #[error("Unknown job: {0}")]
    NotFound(JobId),

    /// The job is still running.
    #[error("Job {0} has not finished")]
    NotFinished(JobId),

    /// The job finished without producing results.
    #[error("Job {id} produced no results (status: {status})")]
    NoResults {
        /// Job id
        id: JobId,
        /// Final status
        status: JobStatus,
    },

    /// The job is of the other kind.
    #[error("Job {id} is a {actual} job, expected a {expected} job")]
    WrongKind {
        /// Job id
        id: JobId,
        /// Expected kind
        expected: JobKind,
        /// Actual kind
        actual: JobKind,
    },

    /// A selected set index is out of range.
    #[error("Set index {index} is out of range ({len} sets)")]
    InvalidSelection {
        /// Offending index
        index: usize,
        /// Number of sets in the scan
        len: usize,
    },

    /// Every selected set is already linked, or there are none.
    #[error("Nothing to link: no eligible duplicate sets selected")]
    NothingToLink,

    /// The scan's results were already handed to a link job.
    #[error("Scan {scan} was already linked by job {link}")]
    AlreadyLinked {
        /// Scan job
        scan: JobId,
        /// Link job holding the claim
        link: JobId,
    },

    /// Running jobs cannot be evicted.
    #[error("Job {0} is still running")]
    StillRunning(JobId),

    /// Settings are invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The job thread could not be started.
    #[error("Failed to start job thread: {0}")]
    Spawn(#[source] io::Error),

    /// The undo log could not be read.
    #[error(transparent)]
    Undo(#[from] UndoError),
}

/// Parameters of a link job.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkRequest {
    /// What replaces each duplicate
    pub kind: LinkKind,
    /// Re-designate originals with this strategy; `None` keeps the scan's
    pub strategy: Option<OriginalStrategy>,
    /// Set indices to act on; `None` selects every eligible set
    pub selected: Option<Vec<usize>>,
}

impl LinkRequest {
    /// Link every eligible set with the scan's originals.
    #[must_use]
    pub fn new(kind: LinkKind) -> Self {
        Self {
            kind,
            strategy: None,
            selected: None,
        }
    }

    /// Choose originals with `strategy`.
    #[must_use]
    pub fn with_strategy(mut self, strategy: OriginalStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Act only on these set indices.
    #[must_use]
    pub fn with_selection(mut self, indices: Vec<usize>) -> Self {
        self.selected = Some(indices);
        self
    }
}

/// Shared pieces a job thread needs.
#[derive(Clone)]
struct JobContext {
    settings: Settings,
    bus: Arc<EventBus>,
    probe: Arc<dyn MemoryProbe>,
    fs_ops: Arc<dyn FileSystemOps>,
}

impl JobContext {
    fn tracker(&self, record: &Arc<JobRecord>) -> Arc<dyn ProgressCallback> {
        Arc::new(ProgressTracker::new(record.clone(), self.bus.clone()))
    }

    fn start_guard(&self, record: &JobRecord) -> Result<Option<GuardHandle>, String> {
        let Some(policy) = self.settings.memory_policy().map_err(|e| e.to_string())? else {
            return Ok(None);
        };
        MemoryGuard::new(policy, self.probe.clone())
            .spawn(record.control().clone())
            .map(Some)
            .map_err(|e| format!("Failed to start memory guard: {e}"))
    }

    fn finish(&self, record: &JobRecord, status: JobStatus, error: Option<String>) {
        match (&error, status) {
            (Some(e), JobStatus::Error) => log::error!("Job {} failed: {}", record.id(), e),
            _ => log::info!("Job {} finished: {}", record.id(), status),
        }
        record.finish(status, error);
        self.bus.publish(ProgressEvent::Finished {
            job: record.id(),
            status,
        });
    }

    /// Final status after cooperative cancellation.
    fn interrupted(&self, record: &JobRecord) {
        match record.control().abort_reason() {
            Some(reason) => self.finish(record, JobStatus::Error, Some(reason)),
            None => self.finish(record, JobStatus::Cancelled, None),
        }
    }
}

/// Owns every job and exposes the external operations.
pub struct JobController {
    store: Arc<dyn JobStore>,
    context: JobContext,
    next_id: AtomicU64,
}

impl std::fmt::Debug for JobController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobController")
            .field("settings", &self.context.settings)
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl JobController {
    /// Create a controller over `store`.
    ///
    /// Ids continue after the highest id already in the store.
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>, settings: Settings) -> Self {
        let next_id = store
            .records()
            .iter()
            .map(|r| r.id().get())
            .max()
            .map_or(1, |max| max + 1);
        Self {
            store,
            context: JobContext {
                settings,
                bus: Arc::new(EventBus::new()),
                probe: Arc::new(SysinfoProbe::new()),
                fs_ops: Arc::new(StdFileSystem),
            },
            next_id: AtomicU64::new(next_id),
        }
    }

    /// Use another filesystem implementation for link jobs.
    #[must_use]
    pub fn with_filesystem(mut self, ops: Arc<dyn FileSystemOps>) -> Self {
        self.context.fs_ops = ops;
        self
    }

    /// Use another memory probe for the memory guard.
    #[must_use]
    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.context.probe = probe;
        self
    }

    /// Effective settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.context.settings
    }

    fn allocate_id(&self) -> JobId {
        JobId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn record(&self, id: JobId) -> Result<Arc<JobRecord>, JobError> {
        self.store.get(id).ok_or(JobError::NotFound(id))
    }

    fn spawn(
        &self,
        record: Arc<JobRecord>,
        run: impl FnOnce(Arc<JobRecord>) + Send + 'static,
    ) -> Result<JobId, JobError> {
        let id = record.id();
        self.store.insert(record.clone());
        let spawned = thread::Builder::new()
            .name(format!("dupelink-{}-{}", record.kind(), id))
            .spawn(move || run(record));
        if let Err(e) = spawned {
            self.store.remove(id);
            return Err(JobError::Spawn(e));
        }
        Ok(id)
    }

    /// Start a scan job.
    ///
    /// The request is validated on the job thread; an invalid request
    /// produces a job that ends in `error` with the reason as `last_error`.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Spawn`] if the job thread cannot be started.
    pub fn start_scan(&self, request: ScanRequest) -> Result<JobId, JobError> {
        let id = self.allocate_id();
        let record = Arc::new(JobRecord::new(id, JobKind::Scan, self.context.settings.eta_window));
        let context = self.context.clone();
        log::info!("Job {}: scan of {} root(s) queued", id, request.roots.len());
        self.spawn(record, move |record| run_scan(&context, &record, &request))
    }

    /// Current progress, or an `unknown` snapshot for unknown ids.
    #[must_use]
    pub fn get_progress(&self, id: JobId) -> ProgressSnapshot {
        self.store
            .get(id)
            .map_or_else(|| ProgressSnapshot::unknown(id), |record| record.snapshot())
    }

    /// Progress of a link job.
    #[must_use]
    pub fn get_link_progress(&self, id: JobId) -> ProgressSnapshot {
        self.get_progress(id)
    }

    /// Snapshots of every job, by id.
    #[must_use]
    pub fn jobs(&self) -> Vec<ProgressSnapshot> {
        self.store.records().iter().map(|r| r.snapshot()).collect()
    }

    /// Pause a job. No-op if already paused or finished.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::NotFound`] for an unknown id.
    pub fn pause(&self, id: JobId) -> Result<(), JobError> {
        let record = self.record(id)?;
        if !record.status().is_terminal() && record.control().pause(PauseReason::Operator) {
            log::info!("Job {} paused", id);
        }
        Ok(())
    }

    /// Resume a paused job. No-op if not paused or finished.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::NotFound`] for an unknown id.
    pub fn resume(&self, id: JobId) -> Result<(), JobError> {
        let record = self.record(id)?;
        if !record.status().is_terminal() && record.control().resume() {
            log::info!("Job {} resumed", id);
        }
        Ok(())
    }

    /// Cancel a job. No-op if already cancelled or finished.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::NotFound`] for an unknown id.
    pub fn cancel(&self, id: JobId) -> Result<(), JobError> {
        let record = self.record(id)?;
        if !record.status().is_terminal() && record.control().cancel() {
            log::info!("Job {} cancellation requested", id);
        }
        Ok(())
    }

    /// Cancel every unfinished job; returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        self.store
            .records()
            .iter()
            .filter(|r| !r.status().is_terminal() && r.control().cancel())
            .count()
    }

    /// Block until the job finishes or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::NotFound`] for an unknown id.
    pub fn wait(&self, id: JobId, timeout: Option<Duration>) -> Result<JobStatus, JobError> {
        Ok(self.record(id)?.wait(timeout))
    }

    /// Subscribe to progress events of every job.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<ProgressEvent> {
        self.context.bus.subscribe()
    }

    /// Results of a finished scan.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::NotFinished`] while the scan runs and
    /// [`JobError::NoResults`] if it ended without results.
    pub fn get_results(&self, id: JobId) -> Result<Arc<ScanResults>, JobError> {
        let record = self.record(id)?;
        expect_kind(&record, JobKind::Scan)?;
        let status = record.status();
        if !status.is_terminal() {
            return Err(JobError::NotFinished(id));
        }
        match record.output() {
            Some(JobOutput::Scan(results)) => Ok(results),
            _ => Err(JobError::NoResults { id, status }),
        }
    }

    /// Result of a finished (or cancelled) link job.
    ///
    /// # Errors
    ///
    /// Same as [`JobController::get_results`].
    pub fn get_link_result(&self, id: JobId) -> Result<Arc<LinkResult>, JobError> {
        let record = self.record(id)?;
        expect_kind(&record, JobKind::Link)?;
        let status = record.status();
        if !status.is_terminal() {
            return Err(JobError::NotFinished(id));
        }
        match record.output() {
            Some(JobOutput::Link(result)) => Ok(result),
            _ => Err(JobError::NoResults { id, status }),
        }
    }

    /// Start a link job over a finished scan's duplicate sets.
    ///
    /// # Errors
    ///
    /// Fails before any job is created when the scan is unknown, unfinished
    /// or already linked, when a selected index is out of range, or when
    /// no eligible set is selected.
    pub fn perform_link(&self, scan_id: JobId, request: LinkRequest) -> Result<JobId, JobError> {
        let results = self.get_results(scan_id)?;
        let sets = &results.duplicates;

        if let Some(ref selected) = request.selected {
            if let Some(&index) = selected.iter().find(|&&i| i >= sets.len()) {
                return Err(JobError::InvalidSelection {
                    index,
                    len: sets.len(),
                });
            }
        }
        let eligible = match request.selected {
            Some(ref selected) => selected.iter().any(|&i| !sets[i].already_linked),
            None => sets.iter().any(|s| !s.already_linked),
        };
        if !eligible {
            return Err(JobError::NothingToLink);
        }

        let scan_record = self.record(scan_id)?;
        let id = self.allocate_id();
        start_claimed(&scan_record, id, || {
            let record = Arc::new(JobRecord::new(id, JobKind::Link, self.context.settings.eta_window));
            let context = self.context.clone();
            log::info!(
                "Job {}: {} link of scan {} queued",
                id,
                request.kind,
                scan_id
            );
            self.spawn(record, move |record| {
                run_link(&context, &record, scan_id, &results, &request);
            })
        })
    }

    /// Roll back a finished link job from its undo log.
    ///
    /// # Errors
    ///
    /// Returns an error if the job has no result or its log cannot be read.
    pub fn undo_link(&self, id: JobId) -> Result<RollbackReport, JobError> {
        let result = self.get_link_result(id)?;
        let path = result.undo_log.clone().ok_or(JobError::NoResults {
            id,
            status: self.record(id)?.status(),
        })?;
        Ok(rollback(&path, &Hasher::new())?)
    }

    /// Drop a finished job from the store.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::StillRunning`] for unfinished jobs.
    pub fn evict(&self, id: JobId) -> Result<(), JobError> {
        let record = self.record(id)?;
        if !record.status().is_terminal() {
            return Err(JobError::StillRunning(id));
        }
        self.store.remove(id);
        log::debug!("Job {} evicted", id);
        Ok(())
    }

    /// Drop every finished job; returns how many were removed.
    pub fn clear_finished(&self) -> usize {
        let finished: Vec<JobId> = self
            .store
            .records()
            .iter()
            .filter(|r| r.status().is_terminal())
            .map(|r| r.id())
            .collect();
        for id in &finished {
            self.store.remove(*id);
        }
        finished.len()
    }
}

/// Run `start` while holding the scan's link claim. The claim is released
/// again if the link job never starts.
fn start_claimed(
    scan: &JobRecord,
    link: JobId,
    start: impl FnOnce() -> Result<JobId, JobError>,
) -> Result<JobId, JobError> {
    scan.claim_for_link(link)
        .map_err(|existing| JobError::AlreadyLinked {
            scan: scan.id(),
            link: existing,
        })?;
    let started = start();
    if let Err(ref e) = started {
        log::warn!("Job {}: link job {} did not start: {}", scan.id(), link, e);
        scan.release_link_claim(link);
    }
    started
}

fn expect_kind(record: &JobRecord, expected: JobKind) -> Result<(), JobError> {
    if record.kind() == expected {
        Ok(())
    } else {
        Err(JobError::WrongKind {
            id: record.id(),
            expected,
            actual: record.kind(),
        })
    }
}

fn run_scan(context: &JobContext, record: &Arc<JobRecord>, request: &ScanRequest) {
    record.start();

    let config = match ScanConfig::build(request, &context.settings) {
        Ok(config) => config,
        Err(e) => return context.finish(record, JobStatus::Error, Some(e.to_string())),
    };
    let guard = match context.start_guard(record) {
        Ok(guard) => guard,
        Err(e) => return context.finish(record, JobStatus::Error, Some(e)),
    };

    let finder = DuplicateFinder::new(
        FinderConfig::new(config)
            .with_control(record.control().clone())
            .with_progress(context.tracker(record)),
    );
    let outcome = finder.find_duplicates();
    drop(guard);

    match outcome {
        Ok(mut results) => {
            if context.settings.auto_save_results {
                save_results(context, record.id(), &mut results);
            }
            record.set_output(JobOutput::Scan(Arc::new(results)));
            context.finish(record, JobStatus::Done, None);
        }
        Err(FinderError::Cancelled) => context.interrupted(record),
        Err(e) => context.finish(record, JobStatus::Error, Some(e.to_string())),
    }
}

/// Write `scan_results_<id>.json`; failures become scan warnings.
fn save_results(context: &JobContext, id: JobId, results: &mut ScanResults) {
    let Some(dir) = context
        .settings
        .results_dir
        .clone()
        .or_else(|| results.summary.scan_paths.first().cloned())
    else {
        return;
    };
    let path = dir.join(format!("scan_results_{id}.json"));

    let written = File::create(&path).map_err(|e| e.to_string()).and_then(|file| {
        serde_json::to_writer_pretty(BufWriter::new(file), &*results).map_err(|e| e.to_string())
    });
    match written {
        Ok(()) => log::info!("Saved scan results to {}", path.display()),
        Err(e) => {
            log::warn!("Could not save scan results to {}: {}", path.display(), e);
            results.summary.warnings.push(ScanWarning {
                path,
                message: format!("Could not save scan results: {e}"),
            });
        }
    }
}

fn undo_log_path(settings: &Settings, id: JobId) -> PathBuf {
    settings.undo_dir().join(format!(
        "link_{}_{}.jsonl",
        id,
        Utc::now().format("%Y%m%dT%H%M%S")
    ))
}

fn run_link(
    context: &JobContext,
    record: &Arc<JobRecord>,
    scan_id: JobId,
    results: &ScanResults,
    request: &LinkRequest,
) {
    record.start();
    let started = Instant::now();
    let control = record.control().clone();
    let threads = context.settings.hash_threads.max(1);

    let sets: Vec<DuplicateSet> = match request.strategy {
        Some(ref strategy) => results
            .duplicates
            .iter()
            .map(|set| set.with_strategy(strategy))
            .collect(),
        None => results.duplicates.clone(),
    };
    let actions = plan_actions(&sets, request.selected.as_deref(), request.kind);

    let undo = match UndoLog::create(&undo_log_path(&context.settings, record.id()), record.id()) {
        Ok(undo) => undo,
        Err(e) => return context.finish(record, JobStatus::Error, Some(e.to_string())),
    };
    let guard = match context.start_guard(record) {
        Ok(guard) => guard,
        Err(e) => return context.finish(record, JobStatus::Error, Some(e)),
    };

    let tracker = context.tracker(record);
    let executor = LinkExecutor::new(context.fs_ops.clone(), undo)
        .with_threads(threads)
        .with_control(control.clone())
        .with_progress(tracker.clone());
    let executed = executor.execute(actions);
    drop(guard);

    let undo_log = match executor.into_undo_log().seal() {
        Ok(path) => Some(path),
        Err(e) => {
            log::warn!("Could not seal undo log: {}", e);
            None
        }
    };

    let verified = executed.map_err(|e| e.to_string()).and_then(|actions| {
        Verifier::new(Hasher::new())
            .with_threads(threads)
            .with_progress(tracker)
            .verify(actions)
            .map_err(|e| e.to_string())
    });
    let (actions, _stats) = match verified {
        Ok(verified) => verified,
        Err(e) => return context.finish(record, JobStatus::Error, Some(e)),
    };

    let cancelled = control.is_cancelled();
    let result = LinkResult::from_actions(
        scan_id,
        request.kind,
        actions,
        undo_log,
        cancelled,
        started.elapsed().as_secs_f64(),
    );
    log::info!("{}", result.summary);
    let data_loss = (!result.deleted_not_linked.is_empty()).then(|| {
        format!(
            "{} file(s) deleted without a replacement link",
            result.deleted_not_linked.len()
        )
    });
    record.with_state(|state| state.message = Some(result.summary.clone()));
    record.set_output(JobOutput::Link(Arc::new(result)));

    if cancelled {
        context.interrupted(record);
    } else {
        context.finish(record, JobStatus::Done, data_loss);
    }
}
