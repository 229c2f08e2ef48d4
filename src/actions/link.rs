//! Link planning and execution.
//!
//! # Overview
//!
//! [`plan_actions`] turns selected duplicate sets into one [`LinkAction`]
//! per duplicate member. [`LinkExecutor`] then applies them:
//!
//! ```text
//! Planned ─► Deleting ─► Linked ─► Verified
//!    │          │
//!    └──────────┴──────► Failed
//! ```
//!
//! Every action is pre-checked against its walk-time snapshot, and an undo
//! entry is durably written before the duplicate path is removed. Sets are
//! spread over a bounded worker pool; actions of one set run in order on one
//! worker.
//!
//! # Safety
//!
//! Pause and cancel are honoured only between actions. An action that has
//! entered `Deleting` always runs to `Linked` or `Failed`. A failed link
//! after a successful removal is reported as
//! [`LinkError::DeletedButNotLinked`]: the one failure with no automatic
//! recovery.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::undo::{UndoError, UndoLog};
use crate::duplicates::{default_threads, DuplicateSet};
use crate::job::control::JobControl;
use crate::job::Phase;
use crate::progress::ProgressCallback;
use crate::scanner::{hash_to_hex, FileIdentity};

/// What to put in place of a duplicate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// Hard link to the original (same device only)
    Hard,
    /// Symbolic link to the original's absolute path
    Symlink,
    /// Remove the duplicate without a replacement
    Delete,
}

impl LinkKind {
    /// Operation name used in summaries.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Hard => "Hardlink",
            Self::Symlink => "Symlink",
            Self::Delete => "Delete",
        }
    }
}

impl std::fmt::Display for LinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Hard => "hard",
            Self::Symlink => "symlink",
            Self::Delete => "delete",
        };
        write!(f, "{name}")
    }
}

/// Lifecycle of one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    /// Not yet attempted
    Planned,
    /// Duplicate path being removed
    Deleting,
    /// Replacement in place (for deletions: removal done)
    Linked,
    /// Replacement confirmed by the verifier
    Verified,
    /// Pre-check, removal or link creation failed
    Failed,
}

/// One planned replacement of a duplicate by a link to its original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkAction {
    /// Index of the duplicate set in the scan results
    pub set_index: usize,
    /// Replacement kind
    pub kind: LinkKind,
    /// Original (kept) path
    pub source: PathBuf,
    /// Duplicate path that is replaced
    pub target: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Full content hash (hex)
    pub hash: String,
    /// Duplicate's modification time at walk time
    pub expected_modified: SystemTime,
    /// Original's modification time at walk time
    pub source_modified: SystemTime,
    /// Original's identity at walk time
    pub source_identity: Option<FileIdentity>,
    /// Duplicate's identity at walk time
    pub target_identity: Option<FileIdentity>,
    /// Storage is shared with another target of the same set; only the
    /// first holder is credited, and only once every holder is applied
    pub shares_storage: bool,
    /// Current state
    pub state: ActionState,
    /// Bytes freed by this action once applied
    pub reclaimed_bytes: u64,
    /// Failure message
    pub error: Option<String>,
    /// The duplicate was removed but no link could be created
    pub deleted_not_linked: bool,
    /// Verifier's complaint, if any
    pub verification_error: Option<String>,
}

impl LinkAction {
    /// Bytes this action frees when it succeeds.
    #[must_use]
    pub fn planned_bytes(&self) -> u64 {
        if self.shares_storage {
            0
        } else {
            self.size
        }
    }

    /// The filesystem now reflects this action.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self.state, ActionState::Linked | ActionState::Verified)
    }

    /// The verifier rejected this action.
    #[must_use]
    pub fn verification_failed(&self) -> bool {
        self.verification_error.is_some()
    }
}

/// Per-action failure.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The original vanished or is no longer a regular file.
    #[error("original unavailable: {path}")]
    OriginalUnavailable {
        /// Original path
        path: PathBuf,
    },

    /// The original changed since the scan; its content may no longer
    /// match the duplicate.
    #[error("original modified since scan: {0}")]
    OriginalModified(PathBuf),

    /// The duplicate vanished since the scan.
    #[error("file not found: {0}")]
    TargetMissing(PathBuf),

    /// The duplicate changed since the scan.
    #[error("file modified since scan: {0}")]
    Modified(PathBuf),

    /// Hard links cannot span devices.
    #[error("cannot hard link across devices: {target} -> {original}")]
    CrossDevice {
        /// Original path
        original: PathBuf,
        /// Duplicate path
        target: PathBuf,
    },

    /// The undo entry could not be written; nothing was touched.
    #[error("undo log write failed for {path}: {source}")]
    Undo {
        /// Duplicate path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: UndoError,
    },

    /// Removing the duplicate failed; it is still in place.
    #[error("failed to remove {path}: {source}")]
    Remove {
        /// Duplicate path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The duplicate was removed but the link could not be created.
    #[error("DATA LOSS RISK: {path} was deleted but the link could not be created: {source}")]
    DeletedButNotLinked {
        /// Duplicate path, now missing
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The worker pool could not be started.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Filesystem mutations used by the executor.
///
/// The standard implementation is [`StdFileSystem`]; tests substitute
/// implementations that fail on demand.
pub trait FileSystemOps: Send + Sync {
    /// Remove a file.
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Create a hard link at `link` to `original`.
    fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()>;

    /// Create a symbolic link at `link` pointing to `original`.
    fn symlink(&self, original: &Path, link: &Path) -> io::Result<()>;
}

/// [`FileSystemOps`] backed by `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileSystem;

impl FileSystemOps for StdFileSystem {
    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()> {
        fs::hard_link(original, link)
    }

    #[cfg(unix)]
    fn symlink(&self, original: &Path, link: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(original, link)
    }

    #[cfg(windows)]
    fn symlink(&self, original: &Path, link: &Path) -> io::Result<()> {
        std::os::windows::fs::symlink_file(original, link)
    }

    #[cfg(not(any(unix, windows)))]
    fn symlink(&self, _original: &Path, _link: &Path) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "symbolic links are not supported on this platform",
        ))
    }
}

/// Plan actions for the selected sets.
///
/// `selected` holds set indices; `None` selects every set. Sets that are
/// already linked produce no actions, and neither do members that already
/// share the original's identity. The original is never a target.
#[must_use]
pub fn plan_actions(
    sets: &[DuplicateSet],
    selected: Option<&[usize]>,
    kind: LinkKind,
) -> Vec<LinkAction> {
    let indices: Vec<usize> = match selected {
        Some(indices) => {
            let mut indices = indices.to_vec();
            indices.sort_unstable();
            indices.dedup();
            indices
        }
        None => (0..sets.len()).collect(),
    };

    let mut actions = Vec::new();
    for index in indices {
        let Some(set) = sets.get(index) else {
            log::warn!("Ignoring unknown duplicate set index {}", index);
            continue;
        };
        if set.already_linked {
            log::debug!("Skipping set {}: already linked", index);
            continue;
        }

        let hash = hash_to_hex(set.hash);
        let mut seen: Vec<FileIdentity> = set.original.identity.into_iter().collect();
        for duplicate in &set.duplicates {
            if duplicate.path == set.original.path {
                continue;
            }
            if duplicate.identity.is_some() && duplicate.identity == set.original.identity {
                log::trace!(
                    "Skipping {}: already linked to original",
                    duplicate.path.display()
                );
                continue;
            }
            let shares_storage = match duplicate.identity {
                Some(id) if seen.contains(&id) => true,
                Some(id) => {
                    seen.push(id);
                    false
                }
                None => false,
            };
            actions.push(LinkAction {
                set_index: index,
                kind,
                source: set.original.path.clone(),
                target: duplicate.path.clone(),
                size: set.size,
                hash: hash.clone(),
                expected_modified: duplicate.modified,
                source_modified: set.original.modified,
                source_identity: set.original.identity,
                target_identity: duplicate.identity,
                shares_storage,
                state: ActionState::Planned,
                reclaimed_bytes: 0,
                error: None,
                deleted_not_linked: false,
                verification_error: None,
            });
        }
    }

    log::info!("Planned {} {} action(s)", actions.len(), kind);
    actions
}

/// Applies planned actions.
pub struct LinkExecutor {
    ops: Arc<dyn FileSystemOps>,
    undo: Mutex<UndoLog>,
    threads: usize,
    control: Option<JobControl>,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for LinkExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkExecutor")
            .field("threads", &self.threads)
            .field("control", &self.control)
            .field("progress", &self.progress.is_some())
            .finish_non_exhaustive()
    }
}

impl LinkExecutor {
    /// Create an executor writing to `undo`.
    #[must_use]
    pub fn new(ops: Arc<dyn FileSystemOps>, undo: UndoLog) -> Self {
        Self {
            ops,
            undo: Mutex::new(undo),
            threads: default_threads(),
            control: None,
            progress: None,
        }
    }

    /// Set the worker count (at least 1).
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Attach a pause/cancel control.
    #[must_use]
    pub fn with_control(mut self, control: JobControl) -> Self {
        self.control = Some(control);
        self
    }

    /// Attach a progress callback.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Give back the undo log.
    #[must_use]
    pub fn into_undo_log(self) -> UndoLog {
        self.undo.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply all actions, returning them with their final states.
    ///
    /// Actions left `Planned` were not attempted because the job was
    /// cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::ThreadPool`] if the worker pool cannot be built.
    /// Per-action failures are recorded on the actions.
    pub fn execute(&self, actions: Vec<LinkAction>) -> Result<Vec<LinkAction>, LinkError> {
        let total = actions.len();
        if let Some(ref callback) = self.progress {
            callback.on_phase_start(Phase::LinkingFiles, total);
        }
        log::info!("Linking: applying {} action(s)", total);

        let mut by_set: Vec<Vec<LinkAction>> = Vec::new();
        for action in actions {
            match by_set.last_mut() {
                Some(group) if group[0].set_index == action.set_index => group.push(action),
                _ => by_set.push(vec![action]),
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|idx| format!("dupelink-link-{idx}"))
            .build()?;
        let done = AtomicUsize::new(0);

        let results: Vec<Vec<LinkAction>> = pool.install(|| {
            by_set
                .into_par_iter()
                .map(|mut group| {
                    for action in &mut group {
                        if self.checkpoint().is_err() {
                            break;
                        }
                        self.run(action);
                        let current = done.fetch_add(1, Ordering::SeqCst) + 1;
                        if let Some(ref callback) = self.progress {
                            callback.on_progress(current, &action.target);
                        }
                    }
                    group
                })
                .collect()
        });

        if let Some(ref callback) = self.progress {
            callback.on_phase_end(Phase::LinkingFiles);
        }

        let mut actions: Vec<LinkAction> = results.into_iter().flatten().collect();
        settle_shared_storage(&mut actions);
        let applied = actions.iter().filter(|a| a.is_applied()).count();
        let failed = actions
            .iter()
            .filter(|a| a.state == ActionState::Failed)
            .count();
        log::info!(
            "Linking complete: {} applied, {} failed, {} not attempted",
            applied,
            failed,
            total - applied - failed
        );
        Ok(actions)
    }

    fn checkpoint(&self) -> Result<(), crate::job::control::Cancelled> {
        match self.control {
            Some(ref control) => control.checkpoint(),
            None => Ok(()),
        }
    }

    fn run(&self, action: &mut LinkAction) {
        match self.apply(action) {
            Ok(()) => {
                action.state = ActionState::Linked;
                action.reclaimed_bytes = action.planned_bytes();
                log::debug!(
                    "{}: {} -> {}",
                    action.kind.label(),
                    action.target.display(),
                    action.source.display()
                );
            }
            Err(e) => {
                action.state = ActionState::Failed;
                action.error = Some(e.to_string());
                if matches!(e, LinkError::DeletedButNotLinked { .. }) {
                    action.deleted_not_linked = true;
                    log::error!("{}", e);
                } else {
                    log::warn!("Skipping {}: {}", action.target.display(), e);
                }
            }
        }
    }

    fn apply(&self, action: &mut LinkAction) -> Result<(), LinkError> {
        precheck(action)?;

        self.undo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(action)
            .map_err(|source| LinkError::Undo {
                path: action.target.clone(),
                source,
            })?;

        action.state = ActionState::Deleting;
        self.ops
            .remove_file(&action.target)
            .map_err(|source| LinkError::Remove {
                path: action.target.clone(),
                source,
            })?;

        let linked = match action.kind {
            LinkKind::Hard => self.ops.hard_link(&action.source, &action.target),
            LinkKind::Symlink => self.ops.symlink(&action.source, &action.target),
            LinkKind::Delete => Ok(()),
        };
        linked.map_err(|source| LinkError::DeletedButNotLinked {
            path: action.target.clone(),
            source,
        })
    }
}

/// Storage held by several targets of one set is freed only when every
/// holder was replaced; otherwise no holder is credited.
fn settle_shared_storage(actions: &mut [LinkAction]) {
    let mut still_held: Vec<(usize, FileIdentity)> = Vec::new();
    for action in actions.iter().filter(|a| !a.is_applied()) {
        if let Some(id) = action.target_identity {
            still_held.push((action.set_index, id));
        }
    }
    if still_held.is_empty() {
        return;
    }
    for action in actions.iter_mut() {
        if let Some(id) = action.target_identity {
            if still_held.contains(&(action.set_index, id)) {
                action.reclaimed_bytes = 0;
            }
        }
    }
}

/// Check the action against the filesystem before touching anything.
fn precheck(action: &LinkAction) -> Result<(), LinkError> {
    let original = fs::metadata(&action.source)
        .ok()
        .filter(fs::Metadata::is_file)
        .ok_or_else(|| LinkError::OriginalUnavailable {
            path: action.source.clone(),
        })?;
    let source_unchanged = original.len() == action.size
        && original.modified().ok() == Some(action.source_modified)
        && match (action.source_identity, FileIdentity::from_metadata(&original)) {
            (Some(expected), Some(current)) => expected == current,
            _ => true,
        };
    if !source_unchanged {
        return Err(LinkError::OriginalModified(action.source.clone()));
    }

    let target = fs::symlink_metadata(&action.target).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            LinkError::TargetMissing(action.target.clone())
        } else {
            LinkError::Modified(action.target.clone())
        }
    })?;
    let unchanged = target.is_file()
        && target.len() == action.size
        && target.modified().ok() == Some(action.expected_modified);
    if !unchanged {
        return Err(LinkError::Modified(action.target.clone()));
    }

    if action.kind == LinkKind::Hard {
        let source_id = FileIdentity::from_metadata(&original);
        let target_id = FileIdentity::from_metadata(&target);
        if let (Some(s), Some(t)) = (source_id, target_id) {
            if !s.same_device(&t) {
                return Err(LinkError::CrossDevice {
                    original: action.source.clone(),
                    target: action.target.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::undo::UndoLog;
    use crate::duplicates::OriginalStrategy;
    use crate::job::JobId;
    use crate::scanner::{FileRecord, Hasher};
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::TempDir;

    fn record(path: &Path) -> FileRecord {
        let meta = fs::symlink_metadata(path).unwrap();
        FileRecord::new(path.to_path_buf(), meta.len(), meta.modified().unwrap())
            .with_identity(FileIdentity::from_metadata(&meta))
    }

    fn make_set(dir: &Path, names: &[&str], content: &[u8]) -> DuplicateSet {
        let members: Vec<FileRecord> = names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                fs::write(&path, content).unwrap();
                record(&path)
            })
            .collect();
        let hash = Hasher::new().full_hash(&members[0].path).unwrap();
        DuplicateSet::from_members(content.len() as u64, hash, members, &OriginalStrategy::Shallowest)
            .unwrap()
    }

    fn executor(dir: &Path, ops: Arc<dyn FileSystemOps>) -> LinkExecutor {
        let log = UndoLog::create(&dir.join("undo.jsonl"), JobId::new(1)).unwrap();
        LinkExecutor::new(ops, log).with_threads(2)
    }

    struct FailingLinks;

    impl FileSystemOps for FailingLinks {
        fn remove_file(&self, path: &Path) -> io::Result<()> {
            fs::remove_file(path)
        }
        fn hard_link(&self, _: &Path, _: &Path) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "simulated cross-device link"))
        }
        fn symlink(&self, _: &Path, _: &Path) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "simulated failure"))
        }
    }

    #[test]
    fn test_link_kind_labels() {
        assert_eq!(LinkKind::Hard.label(), "Hardlink");
        assert_eq!(LinkKind::Symlink.label(), "Symlink");
        assert_eq!(LinkKind::Delete.label(), "Delete");
        assert_eq!(LinkKind::Symlink.to_string(), "symlink");
        assert_eq!(serde_json::to_string(&LinkKind::Hard).unwrap(), "\"hard\"");
    }

    #[test]
    fn test_plan_never_targets_original() {
        let dir = TempDir::new().unwrap();
        let set = make_set(dir.path(), &["a.bin", "b.bin", "c.bin"], b"same");
        let actions = plan_actions(std::slice::from_ref(&set), None, LinkKind::Hard);

        assert_eq!(actions.len(), 2);
        assert!(actions.iter().all(|a| a.target != set.original.path));
        assert!(actions.iter().all(|a| a.source == set.original.path));
        assert!(actions.iter().all(|a| a.state == ActionState::Planned));
    }

    #[test]
    fn test_plan_respects_selection_and_already_linked() {
        let dir = TempDir::new().unwrap();
        let first = make_set(dir.path(), &["a1", "a2"], b"first");
        let mut second = make_set(dir.path(), &["b1", "b2"], b"second");
        second.already_linked = true;
        let third = make_set(dir.path(), &["c1", "c2"], b"third");
        let sets = vec![first, second, third];

        let all = plan_actions(&sets, None, LinkKind::Delete);
        assert_eq!(all.iter().map(|a| a.set_index).collect::<Vec<_>>(), vec![0, 2]);

        let some = plan_actions(&sets, Some(&[2, 2, 1]), LinkKind::Delete);
        assert_eq!(some.len(), 1);
        assert_eq!(some[0].set_index, 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_plan_skips_members_linked_to_original() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        fs::write(&a, b"content").unwrap();
        fs::hard_link(&a, dir.path().join("b")).unwrap();
        fs::write(dir.path().join("c"), b"content").unwrap();

        let members = ["a", "b", "c"].iter().map(|n| record(&dir.path().join(n))).collect();
        let set = DuplicateSet::from_members(7, 1, members, &OriginalStrategy::Shallowest).unwrap();
        assert!(!set.already_linked);

        let actions = plan_actions(&[set], None, LinkKind::Hard);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].target, dir.path().join("c"));
    }

    #[cfg(unix)]
    #[test]
    fn test_execute_hard_links() {
        let dir = TempDir::new().unwrap();
        let set = make_set(dir.path(), &["a", "b", "c"], b"duplicate content");
        let actions = plan_actions(std::slice::from_ref(&set), None, LinkKind::Hard);

        let exec = executor(dir.path(), Arc::new(StdFileSystem));
        let actions = exec.execute(actions).unwrap();

        let original = FileIdentity::of_path(&set.original.path).unwrap();
        for action in &actions {
            assert_eq!(action.state, ActionState::Linked);
            assert_eq!(action.reclaimed_bytes, 17);
            assert_eq!(FileIdentity::of_path(&action.target).unwrap(), original);
        }

        let entries = UndoLog::read_entries(&dir.path().join("undo.jsonl")).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_execute_symlinks_and_deletes() {
        let dir = TempDir::new().unwrap();
        let sets = vec![
            make_set(dir.path(), &["s1", "s2"], b"symlinked"),
            make_set(dir.path(), &["d1", "d2"], b"deleted"),
        ];
        let mut actions = plan_actions(&sets[..1], None, LinkKind::Symlink);
        actions.extend(plan_actions(&sets, Some(&[1]), LinkKind::Delete));

        let exec = executor(dir.path(), Arc::new(StdFileSystem));
        let actions = exec.execute(actions).unwrap();

        assert_eq!(fs::read_link(dir.path().join("s2")).unwrap(), dir.path().join("s1"));
        assert!(!dir.path().join("d2").exists());
        assert!(dir.path().join("d1").exists());
        assert!(actions.iter().all(|a| a.state == ActionState::Linked));
    }

    #[test]
    fn test_delete_succeeds_link_fails() {
        let dir = TempDir::new().unwrap();
        let set = make_set(dir.path(), &["a", "b"], b"precious");
        let actions = plan_actions(&[set], None, LinkKind::Hard);

        let exec = executor(dir.path(), Arc::new(FailingLinks));
        let actions = exec.execute(actions).unwrap();

        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].state, ActionState::Failed);
        assert!(actions[0].deleted_not_linked);
        assert_eq!(actions[0].reclaimed_bytes, 0);
        assert!(actions[0].error.as_deref().unwrap().contains("DATA LOSS RISK"));
        assert!(!dir.path().join("b").exists());

        // the undo entry was written before the removal
        let entries = UndoLog::read_entries(&dir.path().join("undo.jsonl")).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].target_path, dir.path().join("b"));
    }

    #[test]
    fn test_precheck_detects_modified_target() {
        let dir = TempDir::new().unwrap();
        let set = make_set(dir.path(), &["a", "b"], b"content");
        let mut actions = plan_actions(&[set], None, LinkKind::Delete);
        actions[0].expected_modified = UNIX_EPOCH + Duration::from_secs(1);

        let exec = executor(dir.path(), Arc::new(StdFileSystem));
        let actions = exec.execute(actions).unwrap();

        assert_eq!(actions[0].state, ActionState::Failed);
        assert!(!actions[0].deleted_not_linked);
        assert!(dir.path().join("b").exists());
        assert!(UndoLog::read_entries(&dir.path().join("undo.jsonl"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_precheck_detects_missing_original() {
        let dir = TempDir::new().unwrap();
        let set = make_set(dir.path(), &["a", "b"], b"content");
        fs::remove_file(dir.path().join("a")).unwrap();
        let actions = plan_actions(&[set], None, LinkKind::Symlink);

        let exec = executor(dir.path(), Arc::new(StdFileSystem));
        let actions = exec.execute(actions).unwrap();

        assert_eq!(actions[0].state, ActionState::Failed);
        assert!(actions[0].error.as_deref().unwrap().contains("original unavailable"));
        assert!(dir.path().join("b").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_shared_storage_credited_only_when_every_holder_applied() {
        let dir = TempDir::new().unwrap();
        let original = dir.path().join("a");
        fs::write(&original, b"content").unwrap();
        fs::write(dir.path().join("b"), b"content").unwrap();
        fs::hard_link(dir.path().join("b"), dir.path().join("c")).unwrap();
        let members = ["a", "b", "c"].iter().map(|n| record(&dir.path().join(n))).collect();
        let set = DuplicateSet::from_members(7, 1, members, &OriginalStrategy::Shallowest).unwrap();
        assert_eq!(set.original.path, original);

        let planned = plan_actions(std::slice::from_ref(&set), None, LinkKind::Hard);
        assert_eq!(planned.len(), 2);
        assert_eq!(planned.iter().map(LinkAction::planned_bytes).sum::<u64>(), 7);

        // one holder of the shared inode fails its pre-check
        let mut partial = planned;
        let stale = partial
            .iter_mut()
            .find(|a| a.target == dir.path().join("c"))
            .unwrap();
        stale.expected_modified = UNIX_EPOCH + Duration::from_secs(1);
        let partial = executor(dir.path(), Arc::new(StdFileSystem))
            .execute(partial)
            .unwrap();
        assert_eq!(partial.iter().filter(|a| a.is_applied()).count(), 1);
        assert!(partial.iter().all(|a| a.reclaimed_bytes == 0));
    }

    #[cfg(unix)]
    #[test]
    fn test_shared_storage_credited_once_when_all_applied() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a"), b"content").unwrap();
        fs::write(dir.path().join("b"), b"content").unwrap();
        fs::hard_link(dir.path().join("b"), dir.path().join("c")).unwrap();
        let members = ["a", "b", "c"].iter().map(|n| record(&dir.path().join(n))).collect();
        let set = DuplicateSet::from_members(7, 1, members, &OriginalStrategy::Shallowest).unwrap();

        let actions = executor(dir.path(), Arc::new(StdFileSystem))
            .execute(plan_actions(&[set], None, LinkKind::Hard))
            .unwrap();
        assert!(actions.iter().all(LinkAction::is_applied));
        assert_eq!(actions.iter().map(|a| a.reclaimed_bytes).sum::<u64>(), 7);
    }

    #[test]
    fn test_cancelled_executor_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let set = make_set(dir.path(), &["a", "b", "c"], b"content");
        let actions = plan_actions(&[set], None, LinkKind::Delete);

        let control = JobControl::new();
        control.cancel();
        let exec = executor(dir.path(), Arc::new(StdFileSystem)).with_control(control);
        let actions = exec.execute(actions).unwrap();

        assert!(actions.iter().all(|a| a.state == ActionState::Planned));
        assert!(dir.path().join("b").exists());
        assert!(dir.path().join("c").exists());
    }
}
