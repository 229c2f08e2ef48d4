//! Device+inode identity for hard-link awareness.
//!
//! # Overview
//!
//! Hard links are multiple directory entries pointing to the same inode.
//! A duplicate set whose members all share one identity is already
//! collapsed and needs no action; a hard-link replacement is correct only
//! when the new path ends up with the original's identity.
//!
//! # Platform Support
//!
//! - **Unix**: Uses (device_id, inode) pairs from file metadata
//! - **Other**: No identity is reported; every file is treated as distinct
//!
//! # Example
//!
//! ```no_run
//! use dupelink::scanner::hardlink::FileIdentity;
//! use std::path::Path;
//!
//! let a = FileIdentity::of_path(Path::new("a.bin")).ok().flatten();
//! let b = FileIdentity::of_path(Path::new("b.bin")).ok().flatten();
//! if a.is_some() && a == b {
//!     println!("a.bin and b.bin are the same file");
//! }
//! ```

use std::collections::HashSet;
use std::fs::Metadata;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Platform identity of a file: the device it lives on and its inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileIdentity {
    /// Device identifier
    pub dev: u64,
    /// Inode number
    pub ino: u64,
}

impl FileIdentity {
    /// Extract the identity from metadata.
    ///
    /// Returns `None` on platforms without inode information.
    #[cfg(unix)]
    #[must_use]
    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    #[cfg(not(unix))]
    #[must_use]
    pub fn from_metadata(_metadata: &Metadata) -> Option<Self> {
        None
    }

    /// Identity of the entry at `path` itself (symbolic links are not followed).
    ///
    /// # Errors
    ///
    /// Returns the I/O error from reading the entry's metadata.
    pub fn of_path(path: &Path) -> io::Result<Option<Self>> {
        let metadata = std::fs::symlink_metadata(path)?;
        Ok(Self::from_metadata(&metadata))
    }

    /// Whether two identities refer to the same filesystem.
    #[must_use]
    pub fn same_device(&self, other: &Self) -> bool {
        self.dev == other.dev
    }

    /// Check if identity detection is supported on this platform.
    #[must_use]
    pub const fn is_supported() -> bool {
        cfg!(unix)
    }
}

/// Count distinct files among a set of optional identities.
///
/// Entries without an identity are counted as distinct files each.
#[must_use]
pub fn distinct_count<'a>(identities: impl IntoIterator<Item = &'a Option<FileIdentity>>) -> usize {
    let mut seen = HashSet::new();
    let mut unknown = 0usize;
    for identity in identities {
        match identity {
            Some(id) => {
                seen.insert(*id);
            }
            None => unknown += 1,
        }
    }
    seen.len() + unknown
}

/// True when every entry reports the same identity.
///
/// An empty input, or any entry without an identity, is never "all shared".
#[must_use]
pub fn all_shared<'a>(identities: impl IntoIterator<Item = &'a Option<FileIdentity>>) -> bool {
    let mut first: Option<FileIdentity> = None;
    for identity in identities {
        match (identity, first) {
            (None, _) => return false,
            (Some(id), None) => first = Some(*id),
            (Some(id), Some(f)) if *id != f => return false,
            _ => {}
        }
    }
    first.is_some()
}
