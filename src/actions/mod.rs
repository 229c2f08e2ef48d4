//! Link actions: planning, execution, verification and undo.
//!
//! # Pipeline
//!
//! 1. [`link::plan_actions`] turns selected duplicate sets into
//!    [`LinkAction`]s; the original of a set is never a target.
//! 2. [`link::LinkExecutor`] applies them, writing an [`undo::UndoLogEntry`]
//!    before each removal.
//! 3. [`verify::Verifier`] confirms every applied action.
//! 4. [`LinkResult::from_actions`] summarises the outcome.
//!
//! ```no_run
//! use std::sync::Arc;
//! use dupelink::actions::{plan_actions, LinkExecutor, LinkKind, StdFileSystem, UndoLog, Verifier};
//! use dupelink::job::JobId;
//! # fn sets() -> Vec<dupelink::duplicates::DuplicateSet> { Vec::new() }
//!
//! let actions = plan_actions(&sets(), None, LinkKind::Hard);
//! let log = UndoLog::create("undo.jsonl".as_ref(), JobId::new(1)).unwrap();
//! let executor = LinkExecutor::new(Arc::new(StdFileSystem), log);
//! let actions = executor.execute(actions).unwrap();
//! let (actions, _stats) = Verifier::default().verify(actions).unwrap();
//! ```

pub mod link;
pub mod undo;
pub mod verify;

use std::path::PathBuf;

use serde::{Serialize, Serializer};

pub use link::{
    plan_actions, ActionState, FileSystemOps, LinkAction, LinkError, LinkExecutor, LinkKind,
    StdFileSystem,
};
pub use undo::{rollback, RollbackReport, RollbackSkip, UndoError, UndoLog, UndoLogEntry};
pub use verify::{verify_action, Verifier, VerifyError, VerifyStats};

use crate::job::JobId;

/// Marker reported when verification failed.
pub const SAVINGS_UNCERTAIN: &str = "Verification failed, savings uncertain";

/// Space reclaimed by a link job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceSaved {
    /// Confirmed byte count
    Bytes(u64),
    /// At least one action failed verification
    Uncertain,
}

impl Serialize for SpaceSaved {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Bytes(bytes) => serializer.serialize_u64(*bytes),
            Self::Uncertain => serializer.serialize_str(SAVINGS_UNCERTAIN),
        }
    }
}

impl std::fmt::Display for SpaceSaved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bytes(bytes) => write!(f, "{}", bytesize::ByteSize(*bytes)),
            Self::Uncertain => f.write_str(SAVINGS_UNCERTAIN),
        }
    }
}

/// Outcome of a link job.
#[derive(Debug, Clone, Serialize)]
pub struct LinkResult {
    /// Scan job the sets came from
    pub scan_job: JobId,
    /// Replacement kind
    pub kind: LinkKind,
    /// Human-readable summary
    pub summary: String,
    /// Actions that reached `Linked` or `Verified`
    pub files_linked: usize,
    /// Actions that failed
    pub files_failed: usize,
    /// Actions never attempted (cancelled)
    pub files_skipped: usize,
    /// Actions confirmed by the verifier
    pub files_verified: usize,
    /// Applied actions the verifier rejected
    pub verification_failed: usize,
    /// Number of failed actions
    pub error_count: usize,
    /// Paths deleted without a replacement link
    pub deleted_not_linked: Vec<PathBuf>,
    /// Bytes reclaimed by applied actions
    pub potential_savings: u64,
    /// Confirmed savings, or uncertain
    pub space_saved: SpaceSaved,
    /// Every action with its final state
    pub actions: Vec<LinkAction>,
    /// Sealed undo log
    pub undo_log: Option<PathBuf>,
    /// The job was cancelled before all actions ran
    pub cancelled: bool,
    /// Wall-clock duration in seconds
    pub duration: f64,
}

impl LinkResult {
    /// Summarise final action states.
    #[must_use]
    pub fn from_actions(
        scan_job: JobId,
        kind: LinkKind,
        actions: Vec<LinkAction>,
        undo_log: Option<PathBuf>,
        cancelled: bool,
        duration: f64,
    ) -> Self {
        let files_linked = actions.iter().filter(|a| a.is_applied()).count();
        let files_failed = actions
            .iter()
            .filter(|a| a.state == ActionState::Failed)
            .count();
        let files_skipped = actions
            .iter()
            .filter(|a| a.state == ActionState::Planned)
            .count();
        let files_verified = actions
            .iter()
            .filter(|a| a.state == ActionState::Verified)
            .count();
        let verification_failed = actions.iter().filter(|a| a.verification_failed()).count();
        let deleted_not_linked: Vec<PathBuf> = actions
            .iter()
            .filter(|a| a.deleted_not_linked)
            .map(|a| a.target.clone())
            .collect();
        let potential_savings: u64 = actions
            .iter()
            .filter(|a| a.is_applied())
            .map(|a| a.reclaimed_bytes)
            .sum();
        let space_saved = if verification_failed > 0 {
            SpaceSaved::Uncertain
        } else {
            SpaceSaved::Bytes(potential_savings)
        };

        let mut summary = format!(
            "{} complete. Linked: {}, Failed: {}. Verification: {} OK, {} Failed/Missing.",
            kind.label(),
            files_linked,
            files_failed,
            files_verified,
            verification_failed
        );
        if cancelled {
            summary.push_str(&format!(" Cancelled with {files_skipped} file(s) untouched."));
        }
        if !deleted_not_linked.is_empty() {
            summary.push_str(&format!(
                " {} file(s) deleted without a replacement link.",
                deleted_not_linked.len()
            ));
        }

        Self {
            scan_job,
            kind,
            summary,
            files_linked,
            files_failed,
            files_skipped,
            files_verified,
            verification_failed,
            error_count: files_failed,
            deleted_not_linked,
            potential_savings,
            space_saved,
            actions,
            undo_log,
            cancelled,
            duration,
        }
    }

    /// Some actions failed or were never attempted.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.files_failed > 0 || self.files_skipped > 0
    }
}
