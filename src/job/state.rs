//! Job identity, phase and status types, and progress snapshots.
//!
//! [`JobState`] is the live, mutable record a job's tracker writes to.
//! Callers never see it directly: [`JobState::snapshot`] produces an owned
//! [`ProgressSnapshot`] copy that is safe to hand across threads.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::control::PauseReason;
use super::eta::ThroughputTracker;

/// Opaque job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw identifier value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// What a job does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Walk, hash and classify
    Scan,
    /// Replace duplicates of a finished scan
    Link,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scan => write!(f, "scan"),
            Self::Link => write!(f, "link"),
        }
    }
}

/// Pipeline phase. Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Walking the roots
    FindingFiles,
    /// Hashing file prefixes
    PreHashing,
    /// Hashing whole files
    FullHashing,
    /// Building duplicate sets
    AnalyzingHashes,
    /// Replacing duplicates
    LinkingFiles,
    /// Checking replaced paths
    VerifyingLinks,
    /// Finished
    Complete,
}

impl Phase {
    /// Human-readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::FindingFiles => "Finding files",
            Self::PreHashing => "Pre-hashing",
            Self::FullHashing => "Full hashing",
            Self::AnalyzingHashes => "Analyzing hashes",
            Self::LinkingFiles => "Linking files",
            Self::VerifyingLinks => "Verifying links",
            Self::Complete => "Complete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Externally visible job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not yet started
    Queued,
    /// Working
    Running,
    /// Paused by the operator
    Paused,
    /// Paused by the memory guard
    MemoryPaused,
    /// Finished successfully
    Done,
    /// Finished with a job-level failure
    Error,
    /// Stopped by cancellation
    Cancelled,
    /// No such job
    Unknown,
}

impl JobStatus {
    /// Whether the job can no longer change state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::MemoryPaused => "memory_paused",
            Self::Done => "done",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        };
        f.write_str(text)
    }
}

/// Bytes hashed so far for one in-flight file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileProgress {
    /// Bytes processed
    pub bytes_done: u64,
    /// File size
    pub bytes_total: u64,
}

/// Per-file entry of a [`ProgressSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicroProgress {
    /// File being processed
    pub path: PathBuf,
    /// Bytes processed
    pub bytes_done: u64,
    /// File size
    pub bytes_total: u64,
    /// Rounded percentage of this file
    pub percentage: u8,
}

/// Live state of one job.
#[derive(Debug, Clone)]
pub struct JobState {
    /// Job identifier
    pub id: JobId,
    /// Job kind
    pub kind: JobKind,
    /// Current phase
    pub phase: Phase,
    /// Current status (pauses are derived from the job control)
    pub status: JobStatus,
    /// Items processed in the current phase
    pub processed: usize,
    /// Items expected in the current phase (0 when unknown)
    pub total: usize,
    /// Wall-clock start time
    pub started_at: DateTime<Utc>,
    /// Monotonic start time
    pub started: Instant,
    /// Wall-clock end time
    pub finished_at: Option<DateTime<Utc>>,
    /// Last job-level error
    pub last_error: Option<String>,
    /// Latest status message
    pub message: Option<String>,
    /// Files currently being hashed
    pub micro_progress: BTreeMap<PathBuf, FileProgress>,
    /// Throughput history for the current phase
    pub throughput: ThroughputTracker,
}

impl JobState {
    /// Fresh queued state.
    #[must_use]
    pub fn new(id: JobId, kind: JobKind, eta_window: usize) -> Self {
        let first_phase = match kind {
            JobKind::Scan => Phase::FindingFiles,
            JobKind::Link => Phase::LinkingFiles,
        };
        Self {
            id,
            kind,
            phase: first_phase,
            status: JobStatus::Queued,
            processed: 0,
            total: 0,
            started_at: Utc::now(),
            started: Instant::now(),
            finished_at: None,
            last_error: None,
            message: None,
            micro_progress: BTreeMap::new(),
            throughput: ThroughputTracker::new(eta_window),
        }
    }

    /// Enter a new phase, resetting per-phase counters.
    pub fn enter_phase(&mut self, phase: Phase, total: usize) {
        self.phase = phase;
        self.total = total;
        self.processed = 0;
        self.micro_progress.clear();
        self.throughput.reset();
        self.throughput.record(0);
    }

    /// Advance the processed counter. It never moves backwards.
    pub fn advance(&mut self, processed: usize) {
        if processed > self.processed {
            self.processed = processed;
            self.throughput.record(processed);
        }
    }

    /// Move to a terminal status.
    pub fn finish(&mut self, status: JobStatus, error: Option<String>) {
        self.status = status;
        if status == JobStatus::Done {
            self.phase = Phase::Complete;
        }
        if error.is_some() {
            self.last_error = error;
        }
        self.micro_progress.clear();
        self.finished_at = Some(Utc::now());
    }

    /// Owned copy for callers, folding in the control's pause state.
    #[must_use]
    pub fn snapshot(&self, pause: Option<PauseReason>) -> ProgressSnapshot {
        let status = match (self.status, pause) {
            (JobStatus::Running, Some(PauseReason::Operator)) => JobStatus::Paused,
            (JobStatus::Running, Some(PauseReason::Memory)) => JobStatus::MemoryPaused,
            (status, _) => status,
        };
        let paused = matches!(status, JobStatus::Paused | JobStatus::MemoryPaused);

        let percentage = match status {
            JobStatus::Done => 100,
            JobStatus::Queued => 0,
            _ if self.total == 0 => 0,
            _ => ((self.processed.min(self.total) as f64 / self.total as f64) * 100.0).round() as u8,
        };

        let eta_seconds = if status == JobStatus::Running {
            self.throughput
                .eta(self.total.saturating_sub(self.processed))
                .map(|eta| eta.as_secs())
        } else {
            None
        };

        let micro_progress = self
            .micro_progress
            .iter()
            .map(|(path, progress)| MicroProgress {
                path: path.clone(),
                bytes_done: progress.bytes_done,
                bytes_total: progress.bytes_total,
                percentage: if progress.bytes_total == 0 {
                    0
                } else {
                    ((progress.bytes_done as f64 / progress.bytes_total as f64) * 100.0).round()
                        as u8
                },
            })
            .collect();

        ProgressSnapshot {
            job_id: self.id,
            kind: self.kind,
            phase: self.phase,
            status,
            percentage,
            processed: self.processed,
            total: self.total,
            eta_seconds,
            paused,
            micro_progress,
            elapsed_seconds: self.started.elapsed().as_secs_f64(),
            message: self.message.clone(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Point-in-time copy of a job's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Job identifier
    pub job_id: JobId,
    /// Job kind
    pub kind: JobKind,
    /// Current phase
    pub phase: Phase,
    /// Current status
    pub status: JobStatus,
    /// Rounded percentage of the current phase
    pub percentage: u8,
    /// Items processed in the current phase
    pub processed: usize,
    /// Items expected in the current phase
    pub total: usize,
    /// Estimated seconds left in the current phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
    /// Whether the job is paused for any reason
    pub paused: bool,
    /// Files currently being hashed
    pub micro_progress: Vec<MicroProgress>,
    /// Seconds since the job started
    pub elapsed_seconds: f64,
    /// Latest status message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Last job-level error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ProgressSnapshot {
    /// Snapshot reported for an id the store does not know.
    #[must_use]
    pub fn unknown(job_id: JobId) -> Self {
        Self {
            job_id,
            kind: JobKind::Scan,
            phase: Phase::FindingFiles,
            status: JobStatus::Unknown,
            percentage: 0,
            processed: 0,
            total: 0,
            eta_seconds: None,
            paused: false,
            micro_progress: Vec::new(),
            elapsed_seconds: 0.0,
            message: None,
            last_error: None,
        }
    }
}
