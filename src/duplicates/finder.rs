//! Duplicate finder implementation with multi-phase detection.
//!
//! # Overview
//!
//! This module orchestrates the duplicate detection pipeline:
//! 1. **Walk**: collect [`FileRecord`]s from every root
//! 2. **Phase 1 - Size grouping**: see [`crate::duplicates::groups`]
//! 3. **Phase 2 - Prehash**: hash the first 4 KiB of same-size files
//! 4. **Phase 3 - Full hash**: stream whole files that still match
//! 5. **Analysis**: build [`DuplicateSet`]s and pick originals
//!
//! Phases 2 and 3 run on a dedicated rayon pool bounded by the configured
//! thread count. Pause and cancel are honoured between files; a file that
//! cannot be read is recorded in the phase statistics and skipped.
//!
//! Output order is deterministic: groups follow the order in which their
//! size was first seen during the walk, then ascending hash value.
//!
//! # Example
//!
//! ```no_run
//! use dupelink::config::{ScanConfig, ScanRequest, Settings};
//! use dupelink::duplicates::{DuplicateFinder, FinderConfig};
//!
//! let request = ScanRequest::new(vec![".".into()]);
//! let scan = ScanConfig::build(&request, &Settings::default()).unwrap();
//! let finder = DuplicateFinder::new(FinderConfig::new(scan));
//! let results = finder.find_duplicates().unwrap();
//! println!("{}", results.summary.action_taken);
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytesize::ByteSize;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::classify::{classify, DuplicateSet};
use super::groups::{group_by_size, SizeGroup};
use crate::config::ScanConfig;
use crate::job::control::{Cancelled, JobControl};
use crate::job::Phase;
use crate::progress::ProgressCallback;
use crate::scanner::{hash_to_hex, FileRecord, Hash, HashError, Hasher, Walker};

/// Files above this size are logged when hashing starts.
const LARGE_FILE_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Thread, control and progress settings shared by the hashing phases.
#[derive(Clone)]
pub struct HashConfig {
    /// Worker threads for hashing (minimum 1)
    pub threads: usize,
    /// Optional pause/cancel control
    pub control: Option<JobControl>,
    /// Optional progress callback
    pub progress: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for HashConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashConfig")
            .field("threads", &self.threads)
            .field("control", &self.control)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            control: None,
            progress: None,
        }
    }
}

/// Number of available CPU cores, at least 1.
#[must_use]
pub fn default_threads() -> usize {
    std::thread::available_parallelism().map_or(1, usize::from)
}

impl HashConfig {
    /// Set the number of hashing threads (minimum 1).
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

    fn checkpoint(&self) -> Result<(), Cancelled> {
        match self.control {
            Some(ref control) => control.checkpoint(),
            None => Ok(()),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.control.as_ref().is_some_and(JobControl::is_cancelled)
    }

    fn build_pool(&self) -> Result<rayon::ThreadPool, FinderError> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads.max(1))
            .thread_name(|idx| format!("dupelink-hash-{idx}"))
            .build()
            .map_err(FinderError::ThreadPool)
    }
}

/// Files of one size group sharing a prehash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateGroup {
    /// Position of the originating size group in walk order
    pub order: usize,
    /// File size in bytes
    pub size: u64,
    /// Prefix hash shared by all files
    pub prehash: Hash,
    /// Files, in walk order
    pub files: Vec<FileRecord>,
}

/// Files confirmed identical by full hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedGroup {
    /// File size in bytes
    pub size: u64,
    /// Full-content hash
    pub hash: Hash,
    /// Files, in walk order
    pub files: Vec<FileRecord>,
}

/// Statistics from the prehash phase.
#[derive(Debug, Default)]
pub struct PrehashStats {
    /// Total files that entered Phase 2
    pub input_files: usize,
    /// Number of files successfully hashed
    pub hashed_files: usize,
    /// Number of files that failed to hash
    pub failed_files: usize,
    /// Errors encountered during prehash
    pub errors: Vec<HashError>,
    /// Number of files eliminated by a unique prehash
    pub unique_prehashes: usize,
    /// Number of files that could still be duplicates
    pub potential_duplicates: usize,
    /// Number of prehash groups with 2+ files
    pub duplicate_groups: usize,
}

impl PrehashStats {
    /// Percentage of input files eliminated by prehash comparison.
    #[must_use]
    pub fn elimination_rate(&self) -> f64 {
        if self.input_files == 0 {
            0.0
        } else {
            let eliminated = self.input_files - self.potential_duplicates;
            (eliminated as f64 / self.input_files as f64) * 100.0
        }
    }
}

/// Statistics from the full hash phase.
#[derive(Debug, Default)]
pub struct FullhashStats {
    /// Total files that entered Phase 3
    pub input_files: usize,
    /// Number of files successfully hashed
    pub hashed_files: usize,
    /// Number of files that failed to hash
    pub failed_files: usize,
    /// Errors encountered during full hash
    pub errors: Vec<HashError>,
    /// Total bytes hashed across all files
    pub bytes_hashed: u64,
    /// Number of confirmed duplicate groups
    pub duplicate_groups: usize,
}

/// Group same-size files by the hash of their first 4 KiB (Phase 2).
///
/// Groups whose prehash is unique are eliminated without reading the rest
/// of the file.
///
/// # Errors
///
/// Returns [`FinderError::Cancelled`] if the job is cancelled, or
/// [`FinderError::ThreadPool`] if the worker pool cannot be built.
pub fn phase2_prehash(
    size_groups: Vec<SizeGroup>,
    hasher: &Hasher,
    config: &HashConfig,
) -> Result<(Vec<CandidateGroup>, PrehashStats), FinderError> {
    let all_files: Vec<(usize, FileRecord)> = size_groups
        .into_iter()
        .enumerate()
        .flat_map(|(order, group)| group.files.into_iter().map(move |f| (order, f)))
        .collect();

    let mut stats = PrehashStats {
        input_files: all_files.len(),
        ..Default::default()
    };

    if let Some(ref callback) = config.progress {
        callback.on_phase_start(Phase::PreHashing, all_files.len());
    }

    if all_files.is_empty() {
        log::debug!("Phase 2: No files to process");
        if let Some(ref callback) = config.progress {
            callback.on_phase_end(Phase::PreHashing);
        }
        return Ok((Vec::new(), stats));
    }

    log::info!("Phase 2: Computing prehashes for {} files", all_files.len());

    let pool = config.build_pool()?;
    let done = AtomicUsize::new(0);

    let results: Vec<(usize, FileRecord, Result<Hash, HashError>)> = pool.install(|| {
        all_files
            .into_par_iter()
            .filter_map(|(order, file)| {
                if config.checkpoint().is_err() {
                    return None;
                }
                let result = hasher.prehash(&file.path);
                if let Err(ref e) = result {
                    log::warn!("Failed to prehash {}: {}", file.path.display(), e);
                }
                let current = done.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(ref callback) = config.progress {
                    callback.on_progress(current, &file.path);
                }
                Some((order, file, result))
            })
            .collect()
    });

    if config.is_cancelled() {
        log::info!("Phase 2: Interrupted by cancellation");
        return Err(FinderError::Cancelled);
    }

    let mut grouped: BTreeMap<(usize, u64, Hash), Vec<FileRecord>> = BTreeMap::new();
    for (order, file, result) in results {
        match result {
            Ok(prehash) => {
                stats.hashed_files += 1;
                grouped
                    .entry((order, file.size, prehash))
                    .or_default()
                    .push(file);
            }
            Err(e) => {
                stats.failed_files += 1;
                stats.errors.push(e);
            }
        }
    }

    let candidates: Vec<CandidateGroup> = grouped
        .into_iter()
        .filter_map(|((order, size, prehash), files)| {
            if files.len() == 1 {
                stats.unique_prehashes += 1;
                log::trace!(
                    "Eliminated unique prehash {}: {}",
                    hash_to_hex(prehash),
                    files[0].path.display()
                );
                return None;
            }
            stats.potential_duplicates += files.len();
            stats.duplicate_groups += 1;
            Some(CandidateGroup {
                order,
                size,
                prehash,
                files,
            })
        })
        .collect();

    if let Some(ref callback) = config.progress {
        callback.on_phase_end(Phase::PreHashing);
    }

    log::info!(
        "Phase 2 complete: {} files → {} potential duplicates ({:.1}% eliminated)",
        stats.input_files,
        stats.potential_duplicates,
        stats.elimination_rate()
    );

    Ok((candidates, stats))
}

/// Confirm candidates by hashing whole files (Phase 3).
///
/// Each worker streams its file in chunks and reports per-chunk progress
/// through [`ProgressCallback::on_file_progress`].
///
/// # Errors
///
/// Returns [`FinderError::Cancelled`] if the job is cancelled, or
/// [`FinderError::ThreadPool`] if the worker pool cannot be built.
pub fn phase3_fullhash(
    candidates: Vec<CandidateGroup>,
    hasher: &Hasher,
    config: &HashConfig,
) -> Result<(Vec<ConfirmedGroup>, FullhashStats), FinderError> {
    let all_files: Vec<(usize, FileRecord)> = candidates
        .into_iter()
        .flat_map(|group| {
            let order = group.order;
            group.files.into_iter().map(move |f| (order, f))
        })
        .collect();

    let mut stats = FullhashStats {
        input_files: all_files.len(),
        ..Default::default()
    };

    if let Some(ref callback) = config.progress {
        callback.on_phase_start(Phase::FullHashing, all_files.len());
    }

    if all_files.is_empty() {
        log::debug!("Phase 3: No files to process");
        if let Some(ref callback) = config.progress {
            callback.on_phase_end(Phase::FullHashing);
        }
        return Ok((Vec::new(), stats));
    }

    log::info!(
        "Phase 3: Computing full hashes for {} files",
        all_files.len()
    );

    let pool = config.build_pool()?;
    let done = AtomicUsize::new(0);

    let results: Vec<(usize, FileRecord, Result<Hash, HashError>)> = pool.install(|| {
        all_files
            .into_par_iter()
            .filter_map(|(order, file)| {
                if config.checkpoint().is_err() {
                    return None;
                }

                if file.size > LARGE_FILE_THRESHOLD {
                    log::debug!(
                        "Hashing large file ({} MB): {}",
                        file.size / (1024 * 1024),
                        file.path.display()
                    );
                }

                let result = hasher.full_hash_with_progress(&file.path, |bytes_done, bytes_total| {
                    if let Some(ref callback) = config.progress {
                        callback.on_file_progress(&file.path, bytes_done, bytes_total);
                    }
                });
                if let Err(ref e) = result {
                    log::warn!("Failed to hash {}: {}", file.path.display(), e);
                }

                let current = done.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(ref callback) = config.progress {
                    callback.on_file_done(&file.path);
                    callback.on_progress(current, &file.path);
                }
                Some((order, file, result))
            })
            .collect()
    });

    if config.is_cancelled() {
        log::info!("Phase 3: Interrupted by cancellation");
        return Err(FinderError::Cancelled);
    }

    let mut grouped: BTreeMap<(usize, u64, Hash), Vec<FileRecord>> = BTreeMap::new();
    for (order, file, result) in results {
        match result {
            Ok(hash) => {
                stats.hashed_files += 1;
                stats.bytes_hashed += file.size;
                grouped.entry((order, file.size, hash)).or_default().push(file);
            }
            Err(e) => {
                stats.failed_files += 1;
                stats.errors.push(e);
            }
        }
    }

    let confirmed: Vec<ConfirmedGroup> = grouped
        .into_iter()
        .filter(|(_, files)| files.len() > 1)
        .map(|((_, size, hash), files)| ConfirmedGroup { size, hash, files })
        .collect();
    stats.duplicate_groups = confirmed.len();

    if let Some(ref callback) = config.progress {
        callback.on_phase_end(Phase::FullHashing);
    }

    log::info!(
        "Phase 3 complete: {} groups confirmed, {} hashed",
        stats.duplicate_groups,
        ByteSize::b(stats.bytes_hashed)
    );

    Ok((confirmed, stats))
}

/// Per-path problem recorded during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWarning {
    /// Path the warning refers to
    pub path: PathBuf,
    /// What went wrong
    pub message: String,
}

/// Summary of a finished scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Roots that were walked
    pub scan_paths: Vec<PathBuf>,
    /// Files walked
    pub total_files: usize,
    /// Bytes of every walked file
    pub before_size: u64,
    /// `before_size` minus `potential_savings`
    pub after_size: u64,
    /// Bytes reclaimable by linking every eligible set
    pub potential_savings: u64,
    /// Scan duration in seconds
    pub duration: f64,
    /// Scans never modify the filesystem
    pub is_dry_run: bool,
    /// One-line description of the outcome
    pub action_taken: String,
    /// Duplicate sets found
    pub total_sets_found: usize,
    /// Sets whose members already share one identity
    pub sets_already_linked: usize,
    /// Members that are not the original, over all sets
    pub duplicate_files: usize,
    /// No sets were found
    pub no_duplicates: bool,
    /// Strategy used to choose originals
    pub strategy: String,
    /// Files eliminated by size grouping
    pub eliminated_by_size: usize,
    /// Files eliminated by prehash comparison
    pub eliminated_by_prehash: usize,
    /// Walk errors (permission denied, vanished entries)
    pub walk_errors: usize,
    /// Files that could not be hashed
    pub hash_errors: usize,
    /// Per-path warnings
    pub warnings: Vec<ScanWarning>,
}

impl ScanSummary {
    /// Reclaimable space as a human-readable string.
    #[must_use]
    pub fn savings_display(&self) -> String {
        ByteSize::b(self.potential_savings).to_string()
    }
}

/// Describe a scan outcome in one line.
#[must_use]
pub fn describe_outcome(total_sets: usize, already_linked: usize, potential_savings: u64) -> String {
    if total_sets == 0 {
        return "Scan complete. No duplicates found.".to_string();
    }
    if already_linked == total_sets {
        return format!(
            "Scan complete. Found {total_sets} duplicate sets, all already appear linked. No action taken."
        );
    }

    let mut text = format!("Dry run complete. Found {total_sets} sets");
    if already_linked > 0 {
        text.push_str(&format!(" ({already_linked} sets already linked)"));
    }
    text.push_str(&format!(
        ". Potential savings: {}.",
        ByteSize::b(potential_savings)
    ));
    let ready = total_sets - already_linked;
    text.push_str(&format!(" {ready} sets ready to link."));
    text
}

/// Summary plus duplicate sets, in stable order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResults {
    /// Scan summary
    pub summary: ScanSummary,
    /// Duplicate sets; indices into this list address sets for linking
    pub duplicates: Vec<DuplicateSet>,
}

/// Errors that can occur during duplicate finding.
#[derive(thiserror::Error, Debug)]
pub enum FinderError {
    /// The scan was cancelled.
    #[error("Scan cancelled")]
    Cancelled,

    /// The hashing thread pool could not be created.
    #[error("Failed to build hashing thread pool: {0}")]
    ThreadPool(#[source] rayon::ThreadPoolBuildError),
}

impl From<Cancelled> for FinderError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Configuration for the duplicate finder.
#[derive(Clone)]
pub struct FinderConfig {
    /// Validated scan configuration
    pub scan: ScanConfig,
    /// Optional pause/cancel control
    pub control: Option<JobControl>,
    /// Optional progress callback
    pub progress: Option<Arc<dyn ProgressCallback>>,
}

impl FinderConfig {
    /// Finder for a validated scan configuration.
    #[must_use]
    pub fn new(scan: ScanConfig) -> Self {
        Self {
            scan,
            control: None,
            progress: None,
        }
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

    fn hash_config(&self) -> HashConfig {
        HashConfig {
            threads: self.scan.hash_threads.max(1),
            control: self.control.clone(),
            progress: self.progress.clone(),
        }
    }

    fn checkpoint(&self) -> Result<(), Cancelled> {
        match self.control {
            Some(ref control) => control.checkpoint(),
            None => Ok(()),
        }
    }
}

/// Duplicate finder that runs the complete detection pipeline.
pub struct DuplicateFinder {
    config: FinderConfig,
    hasher: Hasher,
}

impl DuplicateFinder {
    /// Create a new duplicate finder with the given configuration.
    #[must_use]
    pub fn new(config: FinderConfig) -> Self {
        Self {
            config,
            hasher: Hasher::new(),
        }
    }

    /// Walk, hash and classify.
    ///
    /// Per-path problems end up in `summary.warnings`; only cancellation and
    /// pool construction abort the scan.
    ///
    /// # Errors
    ///
    /// Returns [`FinderError::Cancelled`] when the job is cancelled.
    pub fn find_duplicates(&self) -> Result<ScanResults, FinderError> {
        let start_time = Instant::now();
        let scan = &self.config.scan;
        let progress = self.config.progress.as_deref();
        let mut warnings = scan.warnings.clone();

        log::info!(
            "Starting duplicate scan of {} root(s) with {} hashing threads",
            scan.roots.len(),
            scan.hash_threads
        );
        self.config.checkpoint()?;

        if let Some(callback) = progress {
            callback.on_phase_start(Phase::FindingFiles, 0);
        }

        let mut walker = Walker::new(scan.roots.clone(), scan.walker.clone());
        if let Some(ref control) = self.config.control {
            walker = walker.with_control(control.clone());
        }

        let mut files = Vec::new();
        let mut walk_errors = 0usize;
        for result in walker.walk() {
            match result {
                Ok(file) => {
                    files.push(file);
                    if let Some(callback) = progress {
                        callback.on_progress(files.len(), &files[files.len() - 1].path);
                    }
                }
                Err(e) => {
                    walk_errors += 1;
                    warnings.push(ScanWarning {
                        path: e.path().to_path_buf(),
                        message: e.to_string(),
                    });
                }
            }
        }
        self.config.checkpoint()?;

        if let Some(callback) = progress {
            callback.on_phase_end(Phase::FindingFiles);
        }

        let total_files = files.len();
        let before_size: u64 = files.iter().map(|f| f.size).sum();
        log::info!(
            "Found {} files ({} total)",
            total_files,
            ByteSize::b(before_size)
        );

        let (size_groups, size_stats) = group_by_size(files);
        self.config.checkpoint()?;

        let hash_config = self.config.hash_config();
        let (candidates, prehash_stats) = phase2_prehash(size_groups, &self.hasher, &hash_config)?;
        let (confirmed, fullhash_stats) = phase3_fullhash(candidates, &self.hasher, &hash_config)?;

        let hash_errors = prehash_stats.failed_files + fullhash_stats.failed_files;
        warnings.extend(
            prehash_stats
                .errors
                .iter()
                .chain(fullhash_stats.errors.iter())
                .map(|e| ScanWarning {
                    path: e.path().to_path_buf(),
                    message: e.to_string(),
                }),
        );

        if let Some(callback) = progress {
            callback.on_phase_start(Phase::AnalyzingHashes, confirmed.len());
        }
        let group_count = confirmed.len();
        let duplicates = classify(confirmed, &scan.strategy);
        if let Some(callback) = progress {
            if let Some(last) = duplicates.last() {
                callback.on_progress(group_count, &last.original.path);
            }
            callback.on_phase_end(Phase::AnalyzingHashes);
        }

        let total_sets_found = duplicates.len();
        let sets_already_linked = duplicates.iter().filter(|s| s.already_linked).count();
        let potential_savings: u64 = duplicates.iter().map(DuplicateSet::reclaimable_bytes).sum();
        let duplicate_files = duplicates.iter().map(|s| s.duplicates.len()).sum();

        let summary = ScanSummary {
            scan_paths: scan.roots.clone(),
            total_files,
            before_size,
            after_size: before_size.saturating_sub(potential_savings),
            potential_savings,
            duration: start_time.elapsed().as_secs_f64(),
            is_dry_run: true,
            action_taken: describe_outcome(total_sets_found, sets_already_linked, potential_savings),
            total_sets_found,
            sets_already_linked,
            duplicate_files,
            no_duplicates: total_sets_found == 0,
            strategy: scan.strategy.to_string(),
            eliminated_by_size: size_stats.eliminated_unique,
            eliminated_by_prehash: prehash_stats.unique_prehashes,
            walk_errors,
            hash_errors,
            warnings,
        };

        log::info!(
            "Scan complete: {} duplicate sets, {} duplicate files, {} reclaimable",
            summary.total_sets_found,
            summary.duplicate_files,
            summary.savings_display()
        );

        Ok(ScanResults {
            summary,
            duplicates,
        })
    }
}
