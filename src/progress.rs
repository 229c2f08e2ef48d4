//! Progress reporting: the engine callback seam, job events, and terminal
//! rendering with indicatif.
//!
//! The scan and link engines report through [`ProgressCallback`]. Inside a
//! job the callback is a [`crate::job::tracker::ProgressTracker`], which
//! updates the job state and publishes a [`ProgressEvent`] for every call.
//! The CLI subscribes to those events and replays them onto a [`Progress`]
//! renderer with [`ProgressEvent::dispatch`].

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::job::{JobId, JobStatus, Phase};

/// Progress callback for the scan and link pipelines.
///
/// Implementations must be cheap: callbacks are invoked from worker threads
/// for every file and, during full hashing, for every chunk.
pub trait ProgressCallback: Send + Sync {
    /// Called when a phase starts.
    ///
    /// `total` is the number of items the phase will process, or 0 when it
    /// is not known in advance (walking).
    fn on_phase_start(&self, phase: Phase, total: usize);

    /// Called after each item is processed.
    ///
    /// `current` is the number of items finished so far (1-based).
    fn on_progress(&self, current: usize, path: &Path);

    /// Called after each chunk of a file is hashed.
    fn on_file_progress(&self, _path: &Path, _bytes_done: u64, _bytes_total: u64) {}

    /// Called when a file is no longer in flight.
    fn on_file_done(&self, _path: &Path) {}

    /// Called when a phase completes.
    fn on_phase_end(&self, phase: Phase);

    /// Called to update the status message.
    fn on_message(&self, _message: &str) {}
}

/// One progress notification published by a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A phase started
    PhaseStarted {
        /// Job
        job: JobId,
        /// Phase
        phase: Phase,
        /// Items in the phase (0 if unknown)
        total: usize,
    },
    /// An item finished
    Progress {
        /// Job
        job: JobId,
        /// Items finished so far
        current: usize,
        /// Item path
        path: PathBuf,
    },
    /// A chunk of a file was hashed
    FileProgress {
        /// Job
        job: JobId,
        /// File path
        path: PathBuf,
        /// Bytes hashed so far
        bytes_done: u64,
        /// File size
        bytes_total: u64,
    },
    /// A file is no longer in flight
    FileDone {
        /// Job
        job: JobId,
        /// File path
        path: PathBuf,
    },
    /// A phase completed
    PhaseEnded {
        /// Job
        job: JobId,
        /// Phase
        phase: Phase,
    },
    /// Status message
    Message {
        /// Job
        job: JobId,
        /// Message text
        message: String,
    },
    /// The job reached a terminal status
    Finished {
        /// Job
        job: JobId,
        /// Final status
        status: JobStatus,
    },
}

impl ProgressEvent {
    /// Job the event belongs to.
    #[must_use]
    pub fn job(&self) -> JobId {
        match self {
            Self::PhaseStarted { job, .. }
            | Self::Progress { job, .. }
            | Self::FileProgress { job, .. }
            | Self::FileDone { job, .. }
            | Self::PhaseEnded { job, .. }
            | Self::Message { job, .. }
            | Self::Finished { job, .. } => *job,
        }
    }

    /// Per-item updates that later events supersede. A subscriber that
    /// falls behind may miss these; phase, message and finish events are
    /// kept.
    #[must_use]
    pub fn is_lossy(&self) -> bool {
        matches!(
            self,
            Self::Progress { .. } | Self::FileProgress { .. } | Self::FileDone { .. }
        )
    }

    /// Replay the event onto a callback. `Finished` has no callback
    /// counterpart and is ignored.
    pub fn dispatch(&self, callback: &dyn ProgressCallback) {
        match self {
            Self::PhaseStarted { phase, total, .. } => callback.on_phase_start(*phase, *total),
            Self::Progress { current, path, .. } => callback.on_progress(*current, path),
            Self::FileProgress {
                path,
                bytes_done,
                bytes_total,
                ..
            } => callback.on_file_progress(path, *bytes_done, *bytes_total),
            Self::FileDone { path, .. } => callback.on_file_done(path),
            Self::PhaseEnded { phase, .. } => callback.on_phase_end(*phase),
            Self::Message { message, .. } => callback.on_message(message),
            Self::Finished { .. } => {}
        }
    }
}

/// Terminal progress reporter using indicatif.
///
/// Shows a spinner while walking and a bar for every counted phase.
pub struct Progress {
    multi: MultiProgress,
    active: Mutex<Option<(Phase, ProgressBar)>>,
    quiet: bool,
    plain: bool,
}

impl Progress {
    /// Create a new progress reporter.
    ///
    /// `quiet` suppresses all output; `plain` drops colors and animation.
    #[must_use]
    pub fn new(quiet: bool, plain: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            active: Mutex::new(None),
            quiet,
            plain,
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<(Phase, ProgressBar)>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spinner style for phases without a known total.
    fn spinner_style(&self) -> ProgressStyle {
        if self.plain {
            ProgressStyle::with_template("{msg} [{elapsed_precise}] {pos} files")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
        } else {
            ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed_precise}] {pos} files")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
        }
    }

    /// Bar style for counted phases.
    fn bar_style(&self) -> ProgressStyle {
        if self.plain {
            ProgressStyle::with_template(
                "[{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%) {msg} (ETA: {eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-")
        } else {
            ProgressStyle::with_template(
                "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg} (ETA: {eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█>-")
        }
    }
}

impl ProgressCallback for Progress {
    fn on_phase_start(&self, phase: Phase, total: usize) {
        if self.quiet {
            return;
        }

        let pb = if phase == Phase::FindingFiles {
            let pb = self.multi.add(ProgressBar::new_spinner());
            pb.set_style(self.spinner_style());
            let tick_rate = if self.plain { 500 } else { 100 };
            pb.enable_steady_tick(Duration::from_millis(tick_rate));
            pb
        } else {
            let pb = self.multi.add(ProgressBar::new(total as u64));
            pb.set_style(self.bar_style());
            pb
        };
        pb.set_message(phase.label());

        if let Some((_, previous)) = self.active().replace((phase, pb)) {
            previous.finish_and_clear();
        }
    }

    fn on_progress(&self, current: usize, path: &Path) {
        if self.quiet {
            return;
        }
        if let Some((phase, pb)) = self.active().as_ref() {
            pb.set_position(current as u64);
            pb.set_message(format!("{}: {}", phase.label(), truncate_path(path, 30)));
        }
    }

    fn on_phase_end(&self, phase: Phase) {
        if self.quiet {
            return;
        }
        let mut active = self.active();
        if active.as_ref().is_some_and(|(current, _)| *current == phase) {
            if let Some((_, pb)) = active.take() {
                pb.finish_with_message(format!("{} complete", phase.label()));
            }
        }
    }

    fn on_message(&self, message: &str) {
        if self.quiet {
            return;
        }
        if let Some((_, pb)) = self.active().as_ref() {
            pb.set_message(message.to_string());
        }
    }
}

/// Shorten a path for display in a progress bar.
fn truncate_path(path: &Path, max_len: usize) -> String {
    let full = path.to_string_lossy();
    if full.chars().count() <= max_len {
        return full.into_owned();
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let name_len = file_name.chars().count();
    if name_len + 4 > max_len {
        let tail: String = file_name
            .chars()
            .skip(name_len.saturating_sub(max_len.saturating_sub(3)))
            .collect();
        return format!("...{tail}");
    }

    format!(".../{file_name}")
}
