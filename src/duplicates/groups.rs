//! Size grouping (Phase 1 of duplicate detection).
//!
//! # Overview
//!
//! Files with different sizes cannot be duplicates, so the first phase
//! buckets every discovered file by its exact size and drops buckets with a
//! single member. No file content is read.
//!
//! Groups come back in the order their size was first seen in the input.
//! Because the walker visits entries in sorted order, this makes the whole
//! pipeline's output order reproducible across scans of an unchanged tree.
//!
//! # Example
//!
//! ```
//! use dupelink::scanner::FileRecord;
//! use dupelink::duplicates::group_by_size;
//! use std::path::PathBuf;
//! use std::time::SystemTime;
//!
//! let files = vec![
//!     FileRecord::new(PathBuf::from("/file1.txt"), 1024, SystemTime::now()),
//!     FileRecord::new(PathBuf::from("/file2.txt"), 1024, SystemTime::now()),
//!     FileRecord::new(PathBuf::from("/file3.txt"), 2048, SystemTime::now()),
//! ];
//!
//! let (groups, stats) = group_by_size(files);
//!
//! assert_eq!(stats.total_files, 3);
//! assert_eq!(stats.potential_duplicates, 2);
//! assert_eq!(groups.len(), 1);
//! assert_eq!(groups[0].size, 1024);
//! ```

use std::collections::HashMap;

use crate::scanner::FileRecord;

/// A group of files with the same size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeGroup {
    /// File size in bytes (shared by all files in this group)
    pub size: u64,
    /// Files with this exact size, in discovery order
    pub files: Vec<FileRecord>,
}

impl SizeGroup {
    /// Create a size group with initial files.
    #[must_use]
    pub fn with_files(size: u64, files: Vec<FileRecord>) -> Self {
        Self { size, files }
    }

    /// Number of files in this group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if this group is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Upper bound on reclaimable bytes if every file turned out identical.
    #[must_use]
    pub fn potential_savings(&self) -> u64 {
        self.size * (self.files.len() as u64).saturating_sub(1)
    }
}

/// Statistics from the size grouping phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupingStats {
    /// Total number of files processed
    pub total_files: usize,
    /// Total size of all files in bytes
    pub total_size: u64,
    /// Number of unique file sizes
    pub unique_sizes: usize,
    /// Number of files that could be duplicates (in groups of 2+)
    pub potential_duplicates: usize,
    /// Number of files eliminated as unique (singleton groups)
    pub eliminated_unique: usize,
    /// Number of size groups with 2+ files
    pub duplicate_groups: usize,
}

impl GroupingStats {
    /// Percentage of files eliminated by size grouping.
    #[must_use]
    pub fn elimination_rate(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            (self.eliminated_unique as f64 / self.total_files as f64) * 100.0
        }
    }
}

/// Group files by size, keeping only sizes shared by two or more files.
///
/// # Performance
///
/// - Time complexity: O(n) where n is the number of files
/// - No file I/O is performed (metadata only)
#[must_use]
pub fn group_by_size(files: impl IntoIterator<Item = FileRecord>) -> (Vec<SizeGroup>, GroupingStats) {
    let mut index: HashMap<u64, usize> = HashMap::new();
    let mut all_groups: Vec<SizeGroup> = Vec::new();
    let mut stats = GroupingStats::default();

    for file in files {
        stats.total_files += 1;
        stats.total_size += file.size;

        let slot = *index.entry(file.size).or_insert_with(|| {
            all_groups.push(SizeGroup::with_files(file.size, Vec::new()));
            all_groups.len() - 1
        });
        all_groups[slot].files.push(file);
    }

    stats.unique_sizes = all_groups.len();

    let groups: Vec<SizeGroup> = all_groups
        .into_iter()
        .filter(|group| {
            if group.files.len() == 1 {
                stats.eliminated_unique += 1;
                log::trace!(
                    "Eliminated unique size {}: {}",
                    group.size,
                    group.files[0].path.display()
                );
                false
            } else {
                stats.potential_duplicates += group.files.len();
                stats.duplicate_groups += 1;
                log::debug!(
                    "Size group {} bytes: {} potential duplicates",
                    group.size,
                    group.files.len()
                );
                true
            }
        })
        .collect();

    log::info!(
        "Phase 1 complete: {} files → {} potential duplicates ({:.1}% eliminated)",
        stats.total_files,
        stats.potential_duplicates,
        stats.elimination_rate()
    );

    (groups, stats)
}
