//! dupelink - duplicate file finder and link-based deduplication
//!
//! Finds files with identical content under one or more roots and replaces
//! the redundant copies with hard links or symbolic links, or deletes them.
//! Every replacement is recorded in an append-only undo log before any file
//! is touched, and verified afterwards.
//!
//! - [`scanner`]: walking, hashing, inode identity
//! - [`duplicates`]: size grouping, prehash and full-hash phases, duplicate sets
//! - [`actions`]: link planning and execution, undo log, verification
//! - [`job`]: background jobs with pause, resume, cancel and progress
//! - [`memory`]: RSS ceiling enforcement for running jobs

pub mod actions;
pub mod app;
pub mod cli;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod job;
pub mod logging;
pub mod memory;
pub mod progress;
pub mod scanner;
pub mod signal;

pub use app::run_app;
