//! Scanner module for directory traversal and file hashing.
//!
//! This module provides functionality for:
//! - Walking one or more roots without following symbolic links
//! - Directory-name, extension and glob based ignore rules
//! - Prefix and full-content xxHash64 hashing
//! - Device+inode identity for hard-link awareness
//!
//! # Architecture
//!
//! The scanner is divided into submodules:
//! - [`walker`]: Directory traversal and [`FileRecord`] discovery
//! - [`hasher`]: xxHash64 file hashing (streaming, per-chunk progress)
//! - [`hardlink`]: [`FileIdentity`] extraction
//!
//! # Example
//!
//! ```no_run
//! use dupelink::scanner::{IgnoreRules, Walker, WalkerConfig};
//! use std::path::PathBuf;
//!
//! let config = WalkerConfig {
//!     min_size: Some(1024),
//!     ignore: IgnoreRules::new(vec![".git".into()], vec!["tmp".into()], vec![]),
//!     ..Default::default()
//! };
//!
//! let walker = Walker::new(vec![PathBuf::from(".")], config);
//! for entry in walker.walk() {
//!     match entry {
//!         Ok(file) => println!("{}: {} bytes", file.path.display(), file.size),
//!         Err(e) => eprintln!("Warning: {}", e),
//!     }
//! }
//! ```

pub mod hardlink;
pub mod hasher;
pub mod walker;

use std::ffi::OsStr;
use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

pub use hardlink::FileIdentity;
pub use hasher::{hash_to_hex, hex_to_hash, Hash, Hasher, CHUNK_SIZE, PREHASH_SIZE};
pub use walker::Walker;

/// Snapshot of a regular file taken at walk time.
///
/// The record is never refreshed; anything that mutates the file later
/// (size or mtime change) is detected by comparing against this snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute path to the file
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: SystemTime,
    /// Creation (birth) time, when the platform reports one
    pub created: Option<SystemTime>,
    /// Number of path components below the scan root (1 = directly in the root)
    pub depth: usize,
    /// Device+inode identity, when the platform reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<FileIdentity>,
}

impl FileRecord {
    /// Create a new record with no creation time, depth 0 and no identity.
    #[must_use]
    pub fn new(path: PathBuf, size: u64, modified: SystemTime) -> Self {
        Self {
            path,
            size,
            modified,
            created: None,
            depth: 0,
            identity: None,
        }
    }

    /// Set the creation time.
    #[must_use]
    pub fn with_created(mut self, created: Option<SystemTime>) -> Self {
        self.created = created;
        self
    }

    /// Set the depth below the scan root.
    #[must_use]
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Set the device+inode identity.
    #[must_use]
    pub fn with_identity(mut self, identity: Option<FileIdentity>) -> Self {
        self.identity = identity;
        self
    }

    /// Creation time, falling back to the modification time when the
    /// filesystem does not record birth times.
    #[must_use]
    pub fn created_or_modified(&self) -> SystemTime {
        self.created.unwrap_or(self.modified)
    }
}

/// Ignore rules applied while walking.
///
/// - Directory names match any path component and prune the whole subtree.
/// - Extensions match the end of the file name, case-insensitively.
/// - Patterns are gitignore-style globs evaluated relative to each root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreRules {
    dir_names: Vec<String>,
    extensions: Vec<String>,
    patterns: Vec<String>,
}

impl IgnoreRules {
    /// Build ignore rules, normalising every extension to `.ext` lowercase.
    #[must_use]
    pub fn new(dir_names: Vec<String>, extensions: Vec<String>, patterns: Vec<String>) -> Self {
        let extensions = extensions
            .iter()
            .map(|e| normalize_extension(e))
            .filter(|e| e.len() > 1)
            .collect();
        Self {
            dir_names: dir_names.into_iter().filter(|d| !d.is_empty()).collect(),
            extensions,
            patterns: patterns.into_iter().filter(|p| !p.trim().is_empty()).collect(),
        }
    }

    /// Whether a directory entry with this name should be pruned.
    #[must_use]
    pub fn matches_dir_name(&self, name: &OsStr) -> bool {
        let name = name.to_string_lossy();
        self.dir_names.iter().any(|d| d.as_str() == name)
    }

    /// Whether a file name carries an ignored extension.
    #[must_use]
    pub fn matches_extension(&self, file_name: &OsStr) -> bool {
        if self.extensions.is_empty() {
            return false;
        }
        let lower = file_name.to_string_lossy().to_lowercase();
        self.extensions.iter().any(|ext| lower.ends_with(ext.as_str()))
    }

    /// Ignored directory names.
    #[must_use]
    pub fn dir_names(&self) -> &[String] {
        &self.dir_names
    }

    /// Normalised ignored extensions (`.ext`).
    #[must_use]
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Gitignore-style glob patterns.
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// True when no rule of any kind is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dir_names.is_empty() && self.extensions.is_empty() && self.patterns.is_empty()
    }
}

/// Normalise an extension to lowercase with a single leading dot.
#[must_use]
pub fn normalize_extension(ext: &str) -> String {
    let trimmed = ext.trim().trim_start_matches('.');
    format!(".{}", trimmed.to_lowercase())
}

/// Configuration for directory walking.
#[derive(Debug, Clone, Default)]
pub struct WalkerConfig {
    /// Skip hidden files and directories (names starting with `.`).
    pub skip_hidden: bool,

    /// Minimum file size to include (in bytes).
    /// Empty files are always skipped regardless of this value.
    pub min_size: Option<u64>,

    /// Directory, extension and glob ignore rules.
    pub ignore: IgnoreRules,
}

impl WalkerConfig {
    /// Create a new walker configuration.
    #[must_use]
    pub fn new(skip_hidden: bool, min_size: Option<u64>, ignore: IgnoreRules) -> Self {
        Self {
            skip_hidden,
            min_size,
            ignore,
        }
    }
}

/// Errors that can occur during directory scanning.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// Permission was denied when accessing a file or directory.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// The specified path was not found.
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// The specified path is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// An I/O error occurred while accessing a file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    /// Path the error refers to.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::PermissionDenied(p) | Self::NotFound(p) | Self::NotADirectory(p) => p,
            Self::Io { path, .. } => path,
        }
    }
}

/// Errors that can occur during file hashing.
#[derive(thiserror::Error, Debug)]
pub enum HashError {
    /// The specified file was not found.
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Permission was denied when reading the file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// An I/O error occurred while reading the file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl HashError {
    /// Classify an I/O error for the given path.
    #[must_use]
    pub fn from_io(path: &std::path::Path, error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source: error,
            },
        }
    }

    /// Path the error refers to.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::NotFound(p) | Self::PermissionDenied(p) => p,
            Self::Io { path, .. } => path,
        }
    }
}
