//! Post-link verification.
//!
//! - Hard links: the duplicate path must have the original's device+inode.
//! - Symbolic links: the link must resolve to the original and the content
//!   reached through it must still hash to the recorded value.
//! - Deletions: the duplicate path is gone and the original is still there.
//!
//! A failed check never reverses the action. The action stays `Linked`
//! with [`LinkAction::verification_error`] set, and the job reports its
//! savings as uncertain.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;

use super::link::{ActionState, LinkAction, LinkKind};
use crate::duplicates::default_threads;
use crate::job::Phase;
use crate::progress::ProgressCallback;
use crate::scanner::{hash_to_hex, FileIdentity, HashError, Hasher};

/// Why a replacement could not be confirmed.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Nothing exists at the duplicate path.
    #[error("link missing: {0}")]
    Missing(PathBuf),

    /// The original is gone.
    #[error("original missing: {0}")]
    OriginalMissing(PathBuf),

    /// Hard link does not share the original's inode.
    #[error("identity mismatch: {0}")]
    IdentityMismatch(PathBuf),

    /// Expected a symbolic link.
    #[error("not a symbolic link: {0}")]
    NotASymlink(PathBuf),

    /// Symbolic link resolves somewhere else.
    #[error("{path} resolves to {resolved}")]
    WrongTarget {
        /// Link path
        path: PathBuf,
        /// Where it actually points
        resolved: PathBuf,
    },

    /// Content reached through the link no longer matches.
    #[error("content mismatch: {0}")]
    ContentMismatch(PathBuf),

    /// A deleted duplicate is present again.
    #[error("file still present: {0}")]
    StillPresent(PathBuf),

    /// Hashing through the link failed.
    #[error(transparent)]
    Hash(#[from] HashError),
}

fn exists(path: &std::path::Path) -> Result<bool, io::Error> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Check one applied action against the filesystem.
///
/// # Errors
///
/// Returns the first discrepancy found.
pub fn verify_action(action: &LinkAction, hasher: &Hasher) -> Result<(), VerifyError> {
    let original_present = exists(&action.source).unwrap_or(false);
    if !original_present {
        return Err(VerifyError::OriginalMissing(action.source.clone()));
    }

    match action.kind {
        LinkKind::Hard => {
            let target = FileIdentity::of_path(&action.target)
                .map_err(|_| VerifyError::Missing(action.target.clone()))?;
            let source = FileIdentity::of_path(&action.source)
                .map_err(|_| VerifyError::OriginalMissing(action.source.clone()))?;
            if target.is_none() || target != source {
                return Err(VerifyError::IdentityMismatch(action.target.clone()));
            }
        }
        LinkKind::Symlink => {
            let meta = fs::symlink_metadata(&action.target)
                .map_err(|_| VerifyError::Missing(action.target.clone()))?;
            if !meta.file_type().is_symlink() {
                return Err(VerifyError::NotASymlink(action.target.clone()));
            }
            let resolved = fs::canonicalize(&action.target)
                .map_err(|_| VerifyError::Missing(action.target.clone()))?;
            let expected = fs::canonicalize(&action.source)
                .map_err(|_| VerifyError::OriginalMissing(action.source.clone()))?;
            if resolved != expected {
                return Err(VerifyError::WrongTarget {
                    path: action.target.clone(),
                    resolved,
                });
            }
            let hash = hasher.full_hash(&action.target)?;
            if hash_to_hex(hash) != action.hash {
                return Err(VerifyError::ContentMismatch(action.target.clone()));
            }
        }
        LinkKind::Delete => {
            if exists(&action.target).unwrap_or(true) {
                return Err(VerifyError::StillPresent(action.target.clone()));
            }
        }
    }
    Ok(())
}

/// Summary of a verification pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyStats {
    /// Actions checked
    pub checked: usize,
    /// Actions confirmed
    pub verified: usize,
    /// Actions rejected
    pub failed: usize,
}

/// Verifies applied actions on a bounded worker pool.
pub struct Verifier {
    hasher: Hasher,
    threads: usize,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("threads", &self.threads)
            .field("progress", &self.progress.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new(Hasher::new())
    }
}

impl Verifier {
    /// Create a verifier hashing with `hasher`.
    #[must_use]
    pub fn new(hasher: Hasher) -> Self {
        Self {
            hasher,
            threads: default_threads(),
            progress: None,
        }
    }

    /// Set the worker count (at least 1).
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Attach a progress callback.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Verify every `Linked` action; others pass through untouched.
    ///
    /// # Errors
    ///
    /// Returns an error only if the worker pool cannot be built.
    pub fn verify(
        &self,
        actions: Vec<LinkAction>,
    ) -> Result<(Vec<LinkAction>, VerifyStats), rayon::ThreadPoolBuildError> {
        let total = actions
            .iter()
            .filter(|a| a.state == ActionState::Linked)
            .count();
        if let Some(ref callback) = self.progress {
            callback.on_phase_start(Phase::VerifyingLinks, total);
        }
        log::info!("Verifying {} applied action(s)", total);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|idx| format!("dupelink-verify-{idx}"))
            .build()?;
        let done = AtomicUsize::new(0);

        let actions: Vec<LinkAction> = pool.install(|| {
            actions
                .into_par_iter()
                .map(|mut action| {
                    if action.state != ActionState::Linked {
                        return action;
                    }
                    match verify_action(&action, &self.hasher) {
                        Ok(()) => action.state = ActionState::Verified,
                        Err(e) => {
                            log::warn!(
                                "Verification failed for {}: {}",
                                action.target.display(),
                                e
                            );
                            action.verification_error = Some(e.to_string());
                        }
                    }
                    let current = done.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(ref callback) = self.progress {
                        callback.on_progress(current, &action.target);
                    }
                    action
                })
                .collect()
        });

        let stats = VerifyStats {
            checked: total,
            verified: actions
                .iter()
                .filter(|a| a.state == ActionState::Verified)
                .count(),
            failed: actions.iter().filter(|a| a.verification_failed()).count(),
        };

        if let Some(ref callback) = self.progress {
            callback.on_phase_end(Phase::VerifyingLinks);
        }
        log::info!(
            "Verification complete: {} OK, {} failed",
            stats.verified,
            stats.failed
        );
        Ok((actions, stats))
    }
}
