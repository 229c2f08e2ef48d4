//! Command-line interface definitions for dupelink.
//!
//! # Example
//!
//! ```bash
//! # Dry run: report duplicate sets and potential savings
//! dupelink scan /srv/media /srv/backup
//!
//! # Replace duplicates of sets 0 and 2 with hard links, keeping the oldest copy
//! dupelink scan /srv/media --strategy oldest --link hard --sets 0,2 --yes
//!
//! # Roll a link run back from its undo log
//! dupelink undo ~/.local/share/dupelink/undo/link_2_20240101T120000.jsonl
//!
//! # Show the effective settings
//! dupelink config
//! ```

use bytesize::ByteSize;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::actions::LinkKind;
use crate::duplicates::OriginalStrategy;

/// Find duplicate files and collapse them into hard or symbolic links.
///
/// Every run is a dry run unless `--link` is given. Link runs write an undo
/// log before touching any file.
#[derive(Debug, Parser)]
#[command(name = "dupelink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Report errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Settings file (default: platform config dir)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan directories for duplicate files, optionally linking them
    Scan(ScanArgs),
    /// Restore independent copies from a link run's undo log
    Undo(UndoArgs),
    /// Print the effective settings as TOML
    Config,
}

/// Arguments for the scan subcommand.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Directories to scan
    #[arg(value_name = "PATH", required = true)]
    pub paths: Vec<PathBuf>,

    /// Directory names to skip wherever they occur (repeatable)
    #[arg(long = "ignore-dir", value_name = "NAME")]
    pub ignore_dirs: Vec<String>,

    /// File extensions to skip, case-insensitive (repeatable)
    #[arg(long = "ignore-ext", value_name = "EXT")]
    pub ignore_extensions: Vec<String>,

    /// Gitignore-style glob patterns to skip (repeatable)
    #[arg(short, long = "ignore", value_name = "PATTERN")]
    pub ignore_patterns: Vec<String>,

    /// Minimum file size to consider (e.g., 1KB, 1MB, 1GB)
    ///
    /// Supports suffixes: B, KB, KiB, MB, MiB, GB, GiB, TB, TiB
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub min_size: Option<u64>,

    /// Skip hidden files and directories (starting with .)
    #[arg(long)]
    pub skip_hidden: bool,

    /// Worker threads for hashing and linking (default: CPU cores)
    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,

    /// How to pick the kept copy: oldest, newest, shallowest, pattern:<REGEX>
    #[arg(long, value_name = "STRATEGY", value_parser = parse_strategy)]
    pub strategy: Option<OriginalStrategy>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Save results as scan_results_<job>.json
    #[arg(long)]
    pub save_results: bool,

    /// Replace duplicates after the scan
    #[arg(long, value_enum, value_name = "KIND")]
    pub link: Option<LinkKind>,

    /// Only act on these set indices (comma-separated)
    #[arg(long, value_name = "INDICES", value_delimiter = ',', requires = "link")]
    pub sets: Option<Vec<usize>>,

    /// Skip the confirmation prompt (required in non-interactive mode)
    #[arg(short = 'y', long, requires = "link")]
    pub yes: bool,
}

/// Arguments for the undo subcommand.
#[derive(Debug, Args)]
pub struct UndoArgs {
    /// Undo log written by a link run
    #[arg(value_name = "UNDO_LOG")]
    pub log: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable report
    Text,
    /// JSON for scripting
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

fn parse_strategy(s: &str) -> Result<OriginalStrategy, String> {
    s.parse().map_err(|e: crate::duplicates::StrategyParseError| e.to_string())
}

/// Parse a human-readable size string into bytes.
///
/// Decimal (KB, MB, GB, TB) and binary (KiB, MiB, GiB, TiB) suffixes are
/// accepted case-insensitively; a bare number is a byte count.
///
/// # Examples
///
/// ```
/// use dupelink::cli::parse_size;
///
/// assert_eq!(parse_size("1024").unwrap(), 1024);
/// assert_eq!(parse_size("1KB").unwrap(), 1000);
/// assert_eq!(parse_size("1KiB").unwrap(), 1024);
/// assert_eq!(parse_size("1MiB").unwrap(), 1_048_576);
/// ```
/// # Errors
///
/// Returns an error for an empty or negative size, or one `bytesize`
/// cannot parse.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Size cannot be empty".to_string());
    }
    if s.starts_with('-') {
        return Err("Size cannot be negative".to_string());
    }
    s.parse::<ByteSize>()
        .map(|size| size.as_u64())
        .map_err(|e| format!("Invalid size '{s}': {e}"))
}
