//! Directory walker implementation using walkdir.
//!
//! # Overview
//!
//! This module provides the [`Walker`] struct for traversing one or more
//! roots and collecting [`FileRecord`] snapshots for duplicate detection.
//! Traversal is single-threaded: it is bound by directory metadata reads,
//! and a sorted sequential walk keeps the output order deterministic.
//!
//! # Features
//!
//! - Multiple roots walked in the given order
//! - Symbolic links are never followed and never reported as candidates
//! - Directory-name pruning, extension filters and gitignore-style globs
//! - Minimum size filtering (empty files are always skipped)
//! - Permission errors are yielded as warnings without stopping the walk
//! - Cooperative pause/cancel via [`JobControl`], checked between entries
//!
//! # Example
//!
//! ```no_run
//! use dupelink::scanner::{Walker, WalkerConfig};
//! use std::path::PathBuf;
//!
//! let walker = Walker::new(vec![PathBuf::from("/srv/media")], WalkerConfig::default());
//! let files: Vec<_> = walker.walk().filter_map(Result::ok).collect();
//! println!("Found {} files", files.len());
//! ```

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use walkdir::{DirEntry, WalkDir};

use super::hardlink::FileIdentity;
use super::{FileRecord, ScanError, WalkerConfig};
use crate::job::control::JobControl;

/// Directory walker for file discovery.
///
/// The walk is lazy and restartable: every call to [`Walker::walk`] starts a
/// fresh traversal of all roots.
#[derive(Debug)]
pub struct Walker {
    /// Root paths to walk, in order
    roots: Vec<PathBuf>,
    /// Walker configuration
    config: WalkerConfig,
    /// Optional pause/cancel control
    control: Option<JobControl>,
}

impl Walker {
    /// Create a new walker for the given roots.
    #[must_use]
    pub fn new(roots: Vec<PathBuf>, config: WalkerConfig) -> Self {
        Self {
            roots,
            config,
            control: None,
        }
    }

    /// Attach a job control handle.
    ///
    /// The walker blocks while the job is paused and stops yielding entries
    /// once it is cancelled.
    #[must_use]
    pub fn with_control(mut self, control: JobControl) -> Self {
        self.control = Some(control);
        self
    }

    /// Roots this walker traverses.
    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Wait out a pause; returns `true` if the walk must stop.
    fn should_stop(&self) -> bool {
        self.control
            .as_ref()
            .is_some_and(|control| control.checkpoint().is_err())
    }

    /// Build the glob matcher for one root.
    fn build_gitignore(&self, root: &Path) -> Option<Gitignore> {
        let patterns = self.config.ignore.patterns();
        if patterns.is_empty() {
            return None;
        }

        let mut builder = GitignoreBuilder::new(root);
        for pattern in patterns {
            if let Err(e) = builder.add_line(None, pattern) {
                log::warn!("Invalid ignore pattern '{}': {}", pattern, e);
            }
        }

        match builder.build() {
            Ok(gitignore) if !gitignore.is_empty() => Some(gitignore),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Failed to build ignore patterns: {}", e);
                None
            }
        }
    }

    /// Check a path against the glob matcher, relative to its root.
    fn glob_ignored(root: &Path, path: &Path, is_dir: bool, gitignore: Option<&Gitignore>) -> bool {
        let Some(gi) = gitignore else {
            return false;
        };
        let relative_path = path.strip_prefix(root).unwrap_or(path);
        let path_str = relative_path.to_string_lossy();
        let normalized_path = if cfg!(windows) {
            path_str.replace('\\', "/")
        } else {
            path_str.into_owned()
        };
        gi.matched(normalized_path, is_dir).is_ignore()
    }

    /// Directory pruning applied before descending.
    fn keep_entry(&self, root: &Path, entry: &DirEntry, gitignore: Option<&Gitignore>) -> bool {
        if entry.depth() == 0 {
            return true;
        }

        let name = entry.file_name();
        if self.config.skip_hidden && name.to_string_lossy().starts_with('.') {
            log::trace!("Skipping hidden entry: {}", entry.path().display());
            return false;
        }

        if entry.file_type().is_dir() {
            if self.config.ignore.matches_dir_name(name) {
                log::trace!("Ignoring directory: {}", entry.path().display());
                return false;
            }
            if Self::glob_ignored(root, entry.path(), true, gitignore) {
                log::trace!("Ignoring directory by pattern: {}", entry.path().display());
                return false;
            }
        }

        true
    }

    /// Walk every root, yielding file records.
    ///
    /// Errors are yielded as [`ScanError`] values rather than stopping
    /// iteration. Within a root, entries are visited in file-name order.
    pub fn walk(&self) -> impl Iterator<Item = Result<FileRecord, ScanError>> + '_ {
        self.roots
            .iter()
            .flat_map(move |root| self.walk_root(root.as_path()))
    }

    fn walk_root<'a>(
        &'a self,
        root: &'a Path,
    ) -> impl Iterator<Item = Result<FileRecord, ScanError>> + 'a {
        let gitignore = self.build_gitignore(root);
        let prune_gitignore = gitignore.clone();

        log::debug!("Walking root: {}", root.display());

        WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| self.keep_entry(root, entry, prune_gitignore.as_ref()))
            .map_while(move |entry_result| {
                if self.should_stop() {
                    log::debug!("Walker: Cancellation requested, stopping iteration");
                    return None;
                }
                Some(self.process_entry(root, entry_result, gitignore.as_ref()))
            })
            .flatten()
    }

    /// Turn one walkdir entry into a record, a warning, or nothing.
    fn process_entry(
        &self,
        root: &Path,
        entry_result: walkdir::Result<DirEntry>,
        gitignore: Option<&Gitignore>,
    ) -> Option<Result<FileRecord, ScanError>> {
        let entry = match entry_result {
            Ok(entry) => entry,
            Err(e) => return Some(Err(self.handle_walk_error(root, e))),
        };

        if entry.depth() == 0 {
            return None;
        }

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            log::trace!("Skipping symlink: {}", entry.path().display());
            return None;
        }
        if !file_type.is_file() {
            return None;
        }

        let path = entry.path();
        if self.config.ignore.matches_extension(entry.file_name()) {
            log::trace!("Ignoring file by extension: {}", path.display());
            return None;
        }
        if Self::glob_ignored(root, path, false, gitignore) {
            log::trace!("Ignoring file by pattern: {}", path.display());
            return None;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => return Some(Err(self.handle_walk_error(root, e))),
        };

        let size = metadata.len();
        if size == 0 {
            log::trace!("Skipping empty file: {}", path.display());
            return None;
        }
        if self.config.min_size.is_some_and(|min| size < min) {
            log::trace!(
                "Skipping file due to size filter ({}): {}",
                size,
                path.display()
            );
            return None;
        }

        let record = FileRecord::new(
            path.to_path_buf(),
            size,
            metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        )
        .with_created(metadata.created().ok())
        .with_depth(entry.depth())
        .with_identity(FileIdentity::from_metadata(&metadata));

        Some(Ok(record))
    }

    /// Map a walkdir error to a per-path warning.
    fn handle_walk_error(&self, root: &Path, error: walkdir::Error) -> ScanError {
        use std::io::ErrorKind;

        let path = error
            .path()
            .map_or_else(|| root.to_path_buf(), Path::to_path_buf);

        match error.into_io_error() {
            Some(io) if io.kind() == ErrorKind::PermissionDenied => {
                log::warn!("Permission denied: {}", path.display());
                ScanError::PermissionDenied(path)
            }
            Some(io) if io.kind() == ErrorKind::NotFound => {
                log::debug!("Entry vanished during walk: {}", path.display());
                ScanError::NotFound(path)
            }
            Some(io) => {
                log::warn!("I/O error for {}: {}", path.display(), io);
                ScanError::Io { path, source: io }
            }
            None => {
                log::warn!("Filesystem loop detected at {}", path.display());
                ScanError::Io {
                    path,
                    source: std::io::Error::other("filesystem loop"),
                }
            }
        }
    }
}
