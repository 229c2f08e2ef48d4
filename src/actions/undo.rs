//! Append-only undo log and rollback.
//!
//! One JSON-lines file per link job. An entry is appended, flushed and
//! synced before the corresponding duplicate is removed. When the job ends
//! the file is sealed read-only and is never rewritten.
//!
//! Rollback does not need backup copies: every entry's duplicate had the
//! same bytes as its original, so an independent copy of the original is
//! restored at the duplicate path once the original is confirmed unchanged.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::link::{LinkAction, LinkKind};
use crate::job::JobId;
use crate::scanner::{hash_to_hex, FileIdentity, Hasher};

/// Undo log failures.
#[derive(Debug, Error)]
pub enum UndoError {
    /// Reading or writing the log failed.
    #[error("undo log I/O error on {path}: {source}")]
    Io {
        /// Log path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// An entry could not be encoded.
    #[error("failed to encode undo entry: {0}")]
    Encode(#[from] serde_json::Error),

    /// A line of the log is not a valid entry.
    #[error("invalid undo entry at {path}:{line}: {source}")]
    Parse {
        /// Log path
        path: PathBuf,
        /// 1-based line number
        line: usize,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
}

/// One destructive action, recorded before it happens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoLogEntry {
    /// Link job that wrote the entry
    pub job_id: JobId,
    /// Position in the log, from 1
    pub sequence: u64,
    /// When the entry was written
    pub timestamp: DateTime<Utc>,
    /// Action kind
    pub kind: LinkKind,
    /// Original (kept) path
    pub original_path: PathBuf,
    /// Duplicate path about to be replaced
    pub target_path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Content hash (hex)
    pub hash: String,
    /// Original's device+inode
    pub original_identity: Option<FileIdentity>,
    /// Duplicate's device+inode before replacement
    pub target_identity: Option<FileIdentity>,
}

/// Writer for one job's undo log.
#[derive(Debug)]
pub struct UndoLog {
    path: PathBuf,
    file: File,
    job_id: JobId,
    next_sequence: u64,
}

impl UndoLog {
    /// Create a new log; fails if `path` already exists.
    ///
    /// # Errors
    ///
    /// Returns [`UndoError::Io`] if the directory or file cannot be created.
    pub fn create(path: &Path, job_id: JobId) -> Result<Self, UndoError> {
        let io_err = |source| UndoError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(path)
            .map_err(io_err)?;
        log::info!("Undo log: {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file,
            job_id,
            next_sequence: 1,
        })
    }

    /// Log file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries written so far.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.next_sequence - 1
    }

    /// No entries written yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Durably append the entry describing `action`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding, writing or syncing fails.
    pub fn record(&mut self, action: &LinkAction) -> Result<UndoLogEntry, UndoError> {
        let entry = UndoLogEntry {
            job_id: self.job_id,
            sequence: self.next_sequence,
            timestamp: Utc::now(),
            kind: action.kind,
            original_path: action.source.clone(),
            target_path: action.target.clone(),
            size: action.size,
            hash: action.hash.clone(),
            original_identity: action.source_identity,
            target_identity: action.target_identity,
        };
        self.append(&entry)?;
        Ok(entry)
    }

    fn append(&mut self, entry: &UndoLogEntry) -> Result<(), UndoError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .and_then(|()| self.file.flush())
            .and_then(|()| self.file.sync_data())
            .map_err(|source| UndoError::Io {
                path: self.path.clone(),
                source,
            })?;
        self.next_sequence += 1;
        Ok(())
    }

    /// Close the log and make it read-only.
    ///
    /// # Errors
    ///
    /// Returns [`UndoError::Io`] if syncing or changing permissions fails.
    pub fn seal(self) -> Result<PathBuf, UndoError> {
        let io_err = |source| UndoError::Io {
            path: self.path.clone(),
            source,
        };
        self.file.sync_all().map_err(io_err)?;
        let mut permissions = self.file.metadata().map_err(io_err)?.permissions();
        permissions.set_readonly(true);
        fs::set_permissions(&self.path, permissions).map_err(io_err)?;
        log::debug!("Sealed undo log {} ({} entries)", self.path.display(), self.len());
        Ok(self.path)
    }

    /// Read every entry of a log.
    ///
    /// # Errors
    ///
    /// Returns [`UndoError::Io`] if the file cannot be read and
    /// [`UndoError::Parse`] for a malformed line.
    pub fn read_entries(path: &Path) -> Result<Vec<UndoLogEntry>, UndoError> {
        let io_err = |source| UndoError::Io {
            path: path.to_path_buf(),
            source,
        };
        let reader = BufReader::new(File::open(path).map_err(io_err)?);
        let mut entries = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(io_err)?;
            if line.trim().is_empty() {
                continue;
            }
            let entry = serde_json::from_str(&line).map_err(|source| UndoError::Parse {
                path: path.to_path_buf(),
                line: idx + 1,
                source,
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

/// An entry rollback declined to restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackSkip {
    /// Duplicate path
    pub path: PathBuf,
    /// Why it was left alone
    pub reason: String,
}

/// Outcome of a rollback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    /// Paths restored as independent copies
    pub restored: Vec<PathBuf>,
    /// Entries left alone
    pub skipped: Vec<RollbackSkip>,
}

impl RollbackReport {
    /// Every entry was restored.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }

    /// One-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Rollback complete. Restored: {}, Skipped: {}.",
            self.restored.len(),
            self.skipped.len()
        )
    }
}

/// Restore independent copies for every entry of an undo log, newest first.
///
/// An entry is restored only when its duplicate path holds the link this
/// job created (or nothing, after a deletion or a failed link) and the
/// original still hashes to the recorded value.
///
/// # Errors
///
/// Returns an error only if the log itself cannot be read. Per-entry
/// problems are reported in [`RollbackReport::skipped`].
pub fn rollback(path: &Path, hasher: &Hasher) -> Result<RollbackReport, UndoError> {
    let entries = UndoLog::read_entries(path)?;
    log::info!("Rolling back {} entries from {}", entries.len(), path.display());

    let mut report = RollbackReport::default();
    for entry in entries.iter().rev() {
        match restore(entry, hasher) {
            Ok(()) => {
                log::info!("Restored {}", entry.target_path.display());
                report.restored.push(entry.target_path.clone());
            }
            Err(reason) => {
                log::warn!("Not restoring {}: {}", entry.target_path.display(), reason);
                report.skipped.push(RollbackSkip {
                    path: entry.target_path.clone(),
                    reason,
                });
            }
        }
    }
    log::info!("{}", report.summary());
    Ok(report)
}

fn restore(entry: &UndoLogEntry, hasher: &Hasher) -> Result<(), String> {
    let target = &entry.target_path;
    let original = &entry.original_path;

    match fs::symlink_metadata(target) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(format!("cannot inspect target: {e}")),
        Ok(meta) => {
            let replaced = if meta.file_type().is_symlink() {
                entry.kind == LinkKind::Symlink
                    && fs::read_link(target).is_ok_and(|dest| dest == *original)
            } else {
                entry.kind == LinkKind::Hard
                    && FileIdentity::from_metadata(&meta).is_some()
                    && FileIdentity::from_metadata(&meta)
                        == FileIdentity::of_path(original).ok().flatten()
            };
            if !replaced {
                return Err("target no longer holds the link created by this job".to_string());
            }
        }
    }

    let hash = hasher
        .full_hash(original)
        .map_err(|e| format!("original unreadable: {e}"))?;
    if hash_to_hex(hash) != entry.hash {
        return Err("original content changed since linking".to_string());
    }

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = target.with_file_name(format!(".{file_name}.dupelink-restore"));
    fs::copy(original, &staging).map_err(|e| format!("copy failed: {e}"))?;
    if let Err(e) = fs::rename(&staging, target) {
        let _ = fs::remove_file(&staging);
        return Err(format!("rename failed: {e}"));
    }
    Ok(())
}
