//! Process memory guard.
//!
//! A [`MemoryGuard`] samples the resident set size of the current process
//! and acts on one job's [`JobControl`]:
//!
//! - above `warn_ratio × ceiling` it logs one warning per excursion;
//! - above the ceiling it pauses the job (reported as `memory_paused`) or
//!   aborts it (reported as `error`), depending on [`MemoryAction`].
//!
//! A memory pause is never lifted automatically; the operator resumes or
//! cancels. If memory is still above the ceiling after a resume, the next
//! sample pauses the job again.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};

use crate::job::control::{JobControl, PauseReason};

/// Source of the current process's memory usage.
pub trait MemoryProbe: Send + Sync {
    /// Resident set size in bytes, if it can be read.
    fn rss_bytes(&self) -> Option<u64>;
}

/// [`MemoryProbe`] backed by `sysinfo`.
pub struct SysinfoProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl std::fmt::Debug for SysinfoProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysinfoProbe").field("pid", &self.pid).finish()
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProbe {
    /// Probe for the current process.
    #[must_use]
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                log::warn!("Memory guard unavailable: {}", e);
                None
            }
        };
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl MemoryProbe for SysinfoProbe {
    fn rss_bytes(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_process(pid);
        system.process(pid).map(sysinfo::Process::memory)
    }
}

/// What to do when memory exceeds the ceiling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryAction {
    /// Pause the job until the operator resumes or cancels it
    #[default]
    Pause,
    /// Abort the job with an error
    Abort,
}

/// Validated guard thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryPolicy {
    /// RSS ceiling in bytes
    pub ceiling_bytes: u64,
    /// Fraction of the ceiling that triggers a warning
    pub warn_ratio: f64,
    /// Action above the ceiling
    pub action: MemoryAction,
    /// Sampling interval
    pub sample_interval: Duration,
}

impl MemoryPolicy {
    fn warn_bytes(&self) -> u64 {
        (self.ceiling_bytes as f64 * self.warn_ratio) as u64
    }
}

/// Result of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryVerdict {
    /// Below the warning threshold
    Ok,
    /// Between the warning threshold and the ceiling
    Warn,
    /// Above the ceiling; the job was paused
    Paused,
    /// Above the ceiling; the job was aborted
    Aborted,
    /// Usage could not be read
    Unavailable,
}

/// Applies a [`MemoryPolicy`] to one job.
pub struct MemoryGuard {
    policy: MemoryPolicy,
    probe: Arc<dyn MemoryProbe>,
    warned: bool,
}

impl std::fmt::Debug for MemoryGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGuard")
            .field("policy", &self.policy)
            .field("warned", &self.warned)
            .finish_non_exhaustive()
    }
}

impl MemoryGuard {
    /// Create a guard.
    #[must_use]
    pub fn new(policy: MemoryPolicy, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            policy,
            probe,
            warned: false,
        }
    }

    /// Take one sample and act on `control`.
    pub fn check(&mut self, control: &JobControl) -> MemoryVerdict {
        let Some(rss) = self.probe.rss_bytes() else {
            return MemoryVerdict::Unavailable;
        };

        if rss > self.policy.ceiling_bytes {
            let used = bytesize::ByteSize(rss);
            let ceiling = bytesize::ByteSize(self.policy.ceiling_bytes);
            return match self.policy.action {
                MemoryAction::Pause => {
                    if control.pause(PauseReason::Memory) {
                        log::warn!("Memory usage {} exceeds ceiling {}; job paused", used, ceiling);
                    }
                    MemoryVerdict::Paused
                }
                MemoryAction::Abort => {
                    if control.abort(format!("memory usage {used} exceeds ceiling {ceiling}")) {
                        log::error!("Memory usage {} exceeds ceiling {}; job aborted", used, ceiling);
                    }
                    MemoryVerdict::Aborted
                }
            };
        }

        if rss > self.policy.warn_bytes() {
            if !self.warned {
                self.warned = true;
                log::warn!(
                    "Memory usage {} is above {:.0}% of the {} ceiling",
                    bytesize::ByteSize(rss),
                    self.policy.warn_ratio * 100.0,
                    bytesize::ByteSize(self.policy.ceiling_bytes)
                );
            }
            return MemoryVerdict::Warn;
        }

        self.warned = false;
        MemoryVerdict::Ok
    }

    /// Sample on a background thread until the handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the thread cannot be spawned.
    pub fn spawn(mut self, control: JobControl) -> std::io::Result<GuardHandle> {
        let (stop, stopped) = bounded::<()>(1);
        let interval = self.policy.sample_interval;
        let thread = thread::Builder::new()
            .name("dupelink-memory".into())
            .spawn(move || loop {
                if control.is_cancelled() {
                    break;
                }
                self.check(&control);
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        Ok(GuardHandle {
            stop: Some(stop),
            thread: Some(thread),
        })
    }
}

/// Stops and joins the sampling thread when dropped.
#[derive(Debug)]
pub struct GuardHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for GuardHandle {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
