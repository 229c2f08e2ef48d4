//! Layered settings and validated scan configuration.
//!
//! [`Settings`] holds every recognised option. It is assembled with figment
//! from, in increasing priority: built-in defaults, a TOML file, and
//! `DUPELINK_`-prefixed environment variables (nested keys joined by `__`,
//! e.g. `DUPELINK_MEMORY__CEILING_BYTES`). CLI flags are applied on top by
//! the binary.
//!
//! A scan never consumes raw settings directly: [`ScanConfig::build`]
//! merges a [`ScanRequest`] over the settings once, at job start, and either
//! returns a fully validated configuration or a [`ConfigError`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use ignore::gitignore::GitignoreBuilder;
use serde::{Deserialize, Serialize};

use crate::duplicates::{default_threads, OriginalStrategy, ScanWarning, StrategyParseError};
use crate::job::eta::DEFAULT_WINDOW;
use crate::memory::{MemoryAction, MemoryPolicy};
use crate::scanner::{IgnoreRules, WalkerConfig};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "DUPELINK_";

/// Errors from loading settings or validating a scan request.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// None of the requested roots can be read.
    #[error("No readable scan roots")]
    NoReadableRoots,

    /// An ignore glob does not compile.
    #[error("Invalid ignore pattern '{pattern}': {message}")]
    InvalidPattern {
        /// Offending pattern
        pattern: String,
        /// Parser message
        message: String,
    },

    /// The strategy string is not recognised.
    #[error(transparent)]
    InvalidStrategy(#[from] StrategyParseError),

    /// Memory guard settings are inconsistent.
    #[error("Invalid memory settings: {0}")]
    InvalidMemory(String),

    /// An explicitly requested config file does not exist.
    #[error("Config file not found: {0}")]
    MissingFile(PathBuf),

    /// The layered settings could not be extracted.
    #[error("Failed to load settings: {0}")]
    Load(#[source] Box<figment::Error>),

    /// Settings could not be rendered as TOML.
    #[error("Failed to render settings: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Memory guard settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    /// RSS ceiling in bytes; `None` disables the guard
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ceiling_bytes: Option<u64>,
    /// Fraction of the ceiling above which a warning is logged
    pub warn_ratio: f64,
    /// What to do above the ceiling
    pub action: MemoryAction,
    /// Sampling interval in milliseconds
    pub sample_interval_ms: u64,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            ceiling_bytes: None,
            warn_ratio: 0.8,
            action: MemoryAction::Pause,
            sample_interval_ms: 500,
        }
    }
}

impl MemorySettings {
    /// Validated guard policy, or `None` when no ceiling is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidMemory`] for a zero ceiling, a warn
    /// ratio outside `(0, 1]`, or a zero sampling interval.
    pub fn policy(&self) -> Result<Option<MemoryPolicy>, ConfigError> {
        let Some(ceiling) = self.ceiling_bytes else {
            return Ok(None);
        };
        if ceiling == 0 {
            return Err(ConfigError::InvalidMemory("ceiling_bytes must be > 0".into()));
        }
        if !(self.warn_ratio > 0.0 && self.warn_ratio <= 1.0) {
            return Err(ConfigError::InvalidMemory(format!(
                "warn_ratio must be in (0, 1], got {}",
                self.warn_ratio
            )));
        }
        if self.sample_interval_ms == 0 {
            return Err(ConfigError::InvalidMemory(
                "sample_interval_ms must be > 0".into(),
            ));
        }
        Ok(Some(MemoryPolicy {
            ceiling_bytes: ceiling,
            warn_ratio: self.warn_ratio,
            action: self.action,
            sample_interval: Duration::from_millis(self.sample_interval_ms),
        }))
    }
}

/// Every recognised option, with defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Hashing/linking worker threads
    pub hash_threads: usize,
    /// Minimum file size in bytes
    pub min_size: u64,
    /// Skip entries whose name starts with a dot
    pub skip_hidden: bool,
    /// Directory names pruned wherever they occur
    pub ignore_dirs: Vec<String>,
    /// File extensions to skip (case-insensitive)
    pub ignore_extensions: Vec<String>,
    /// Gitignore-style globs, relative to each root
    pub ignore_patterns: Vec<String>,
    /// Original selection strategy
    pub strategy: String,
    /// Memory guard
    pub memory: MemorySettings,
    /// Where undo logs are written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undo_dir: Option<PathBuf>,
    /// Where auto-saved results are written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_dir: Option<PathBuf>,
    /// Save scan results as JSON when a scan finishes
    pub auto_save_results: bool,
    /// Throughput samples used for ETA
    pub eta_window: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hash_threads: default_threads(),
            min_size: 1,
            skip_hidden: false,
            ignore_dirs: Vec::new(),
            ignore_extensions: Vec::new(),
            ignore_patterns: Vec::new(),
            strategy: OriginalStrategy::Oldest.to_string(),
            memory: MemorySettings::default(),
            undo_dir: None,
            results_dir: None,
            auto_save_results: false,
            eta_window: DEFAULT_WINDOW,
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "dupelink", "dupelink")
}

impl Settings {
    /// Platform default config file location.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Layered figment: defaults < TOML file < environment.
    ///
    /// With no explicit path, the platform default file is used if present.
    #[must_use]
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(file) = path.map(Path::to_path_buf).or_else(Self::default_path) {
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load layered settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingFile`] if an explicit path does not
    /// exist, or [`ConfigError::Load`] if a layer cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(file) = path {
            if !file.is_file() {
                return Err(ConfigError::MissingFile(file.to_path_buf()));
            }
        }
        let settings: Settings = Self::figment(path)
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))?;
        log::debug!("Loaded settings: {:?}", settings);
        Ok(settings)
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Render`] if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Directory for undo logs.
    #[must_use]
    pub fn undo_dir(&self) -> PathBuf {
        self.undo_dir.clone().unwrap_or_else(|| {
            project_dirs().map_or_else(
                || std::env::temp_dir().join("dupelink").join("undo"),
                |dirs| dirs.data_dir().join("undo"),
            )
        })
    }

    /// Validated memory policy.
    ///
    /// # Errors
    ///
    /// See [`MemorySettings::policy`].
    pub fn memory_policy(&self) -> Result<Option<MemoryPolicy>, ConfigError> {
        self.memory.policy()
    }
}

/// Caller-supplied options for one scan.
///
/// Lists are added to the ones in [`Settings`]; scalar options override.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanRequest {
    /// Roots to walk
    pub roots: Vec<PathBuf>,
    /// Directory names to prune
    pub ignore_dirs: Vec<String>,
    /// Extensions to skip
    pub ignore_extensions: Vec<String>,
    /// Gitignore-style globs
    pub ignore_patterns: Vec<String>,
    /// Minimum file size in bytes
    pub min_size: Option<u64>,
    /// Skip dot-entries
    pub skip_hidden: Option<bool>,
    /// Hashing threads
    pub hash_threads: Option<usize>,
    /// Original selection strategy
    pub strategy: Option<String>,
}

impl ScanRequest {
    /// Request for the given roots with everything else from settings.
    #[must_use]
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            ..Default::default()
        }
    }
}

/// Validated, immutable configuration for one scan.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Canonical, de-duplicated, non-nested roots
    pub roots: Vec<PathBuf>,
    /// Walker filters
    pub walker: WalkerConfig,
    /// Hashing threads (at least 1)
    pub hash_threads: usize,
    /// Original selection strategy
    pub strategy: OriginalStrategy,
    /// Roots dropped during validation
    pub warnings: Vec<ScanWarning>,
}

fn merged(base: &[String], extra: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(base.len() + extra.len());
    for item in base.iter().chain(extra) {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

impl ScanConfig {
    /// Merge a request over settings and validate the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoReadableRoots`] when no root survives
    /// validation, [`ConfigError::InvalidPattern`] for a bad glob, and
    /// [`ConfigError::InvalidStrategy`] for an unknown strategy.
    pub fn build(request: &ScanRequest, settings: &Settings) -> Result<Self, ConfigError> {
        let mut warnings = Vec::new();
        let roots = resolve_roots(&request.roots, &mut warnings)?;

        let patterns = merged(&settings.ignore_patterns, &request.ignore_patterns);
        validate_patterns(&patterns)?;

        let strategy: OriginalStrategy = request
            .strategy
            .as_deref()
            .unwrap_or(&settings.strategy)
            .parse()?;

        let ignore = IgnoreRules::new(
            merged(&settings.ignore_dirs, &request.ignore_dirs),
            merged(&settings.ignore_extensions, &request.ignore_extensions),
            patterns,
        );
        let walker = WalkerConfig::new(
            request.skip_hidden.unwrap_or(settings.skip_hidden),
            Some(request.min_size.unwrap_or(settings.min_size)),
            ignore,
        );

        Ok(Self {
            roots,
            walker,
            hash_threads: request.hash_threads.unwrap_or(settings.hash_threads).max(1),
            strategy,
            warnings,
        })
    }
}

/// Canonicalise, de-duplicate and fold nested roots.
fn resolve_roots(
    requested: &[PathBuf],
    warnings: &mut Vec<ScanWarning>,
) -> Result<Vec<PathBuf>, ConfigError> {
    let mut roots: Vec<PathBuf> = Vec::new();

    for root in requested {
        let canonical = match fs::canonicalize(root) {
            Ok(path) => path,
            Err(e) => {
                log::warn!("Skipping root {}: {}", root.display(), e);
                warnings.push(ScanWarning {
                    path: root.clone(),
                    message: format!("Skipping unreadable root: {e}"),
                });
                continue;
            }
        };
        if !canonical.is_dir() {
            log::warn!("Skipping root {}: not a directory", root.display());
            warnings.push(ScanWarning {
                path: root.clone(),
                message: "Skipping root: not a directory".to_string(),
            });
            continue;
        }
        if let Err(e) = fs::read_dir(&canonical) {
            log::warn!("Skipping root {}: {}", root.display(), e);
            warnings.push(ScanWarning {
                path: root.clone(),
                message: format!("Skipping unreadable root: {e}"),
            });
            continue;
        }
        if !roots.contains(&canonical) {
            roots.push(canonical);
        }
    }

    let folded: Vec<PathBuf> = roots
        .iter()
        .filter(|root| {
            let nested = roots
                .iter()
                .any(|other| other != *root && root.starts_with(other));
            if nested {
                log::debug!("Folding nested root {}", root.display());
            }
            !nested
        })
        .cloned()
        .collect();

    if folded.is_empty() {
        return Err(ConfigError::NoReadableRoots);
    }
    Ok(folded)
}

fn validate_patterns(patterns: &[String]) -> Result<(), ConfigError> {
    let mut builder = GitignoreBuilder::new("/");
    for pattern in patterns {
        builder
            .add_line(None, pattern)
            .map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
    }
    Ok(())
}
