//! Duplicate detection: size grouping, hashing phases and classification.
//!
//! - [`groups`]: Phase 1, partition by exact size
//! - [`finder`]: Phases 2 and 3 on a bounded pool, plus the pipeline driver
//! - [`classify`]: duplicate sets, original selection, hard-link detection

pub mod classify;
pub mod finder;
pub mod groups;

pub use classify::{classify, DuplicateSet, OriginalStrategy, StrategyParseError};
pub use finder::{
    default_threads, describe_outcome, phase2_prehash, phase3_fullhash, CandidateGroup,
    ConfirmedGroup, DuplicateFinder, FinderConfig, FinderError, FullhashStats, HashConfig,
    PrehashStats, ScanResults, ScanSummary, ScanWarning,
};
pub use groups::{group_by_size, GroupingStats, SizeGroup};
