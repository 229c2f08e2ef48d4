//! Duplicate classification: original selection and hard-link detection.
//!
//! # Overview
//!
//! Confirmed groups from the full-hash phase become [`DuplicateSet`]s. For
//! every set one member is designated the *original* by an
//! [`OriginalStrategy`]; the rest are the duplicates a link job may replace.
//! Ties are always broken by lexicographic path order, so the outcome depends
//! only on the set's members and the strategy.
//!
//! A set whose members all share one device+inode identity is
//! `already_linked`: it is reported, but contributes no savings and is never
//! planned for linking.
//!
//! # Example
//!
//! ```
//! use dupelink::duplicates::OriginalStrategy;
//!
//! let strategy: OriginalStrategy = "pattern:^/archive/".parse().unwrap();
//! assert_eq!(strategy.to_string(), "pattern:^/archive/");
//! assert_eq!("oldest".parse::<OriginalStrategy>().unwrap(), OriginalStrategy::Oldest);
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::finder::ConfirmedGroup;
use crate::scanner::hardlink::{all_shared, distinct_count};
use crate::scanner::{hash_to_hex, hex_to_hash, FileRecord, Hash};

/// Rule for choosing which member of a set is kept.
#[derive(Debug, Clone, Default)]
pub enum OriginalStrategy {
    /// Earliest creation time (modification time where creation is unknown)
    #[default]
    Oldest,
    /// Latest modification time
    Newest,
    /// Fewest path components below the scan root
    Shallowest,
    /// First path, in path order, matching the pattern
    PathPattern(Regex),
}

impl PartialEq for OriginalStrategy {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::PathPattern(a), Self::PathPattern(b)) => a.as_str() == b.as_str(),
            (Self::Oldest, Self::Oldest)
            | (Self::Newest, Self::Newest)
            | (Self::Shallowest, Self::Shallowest) => true,
            _ => false,
        }
    }
}

/// Errors from parsing an [`OriginalStrategy`].
#[derive(thiserror::Error, Debug)]
pub enum StrategyParseError {
    /// Not one of the known strategy names.
    #[error("unknown strategy '{0}' (expected oldest, newest, shallowest or pattern:<regex>)")]
    Unknown(String),

    /// The `pattern:` regex does not compile.
    #[error("invalid strategy pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl FromStr for OriginalStrategy {
    type Err = StrategyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(pattern) = trimmed.strip_prefix("pattern:") {
            return Ok(Self::PathPattern(Regex::new(pattern)?));
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "oldest" | "oldest_creation" => Ok(Self::Oldest),
            "newest" | "newest_modification" => Ok(Self::Newest),
            "shallowest" | "shallowest_path" => Ok(Self::Shallowest),
            _ => Err(StrategyParseError::Unknown(trimmed.to_string())),
        }
    }
}

impl fmt::Display for OriginalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oldest => write!(f, "oldest"),
            Self::Newest => write!(f, "newest"),
            Self::Shallowest => write!(f, "shallowest"),
            Self::PathPattern(re) => write!(f, "pattern:{}", re.as_str()),
        }
    }
}

impl OriginalStrategy {
    /// Order two members: `Less` means `a` is the better original.
    #[must_use]
    pub fn compare(&self, a: &FileRecord, b: &FileRecord) -> Ordering {
        let primary = match self {
            Self::Oldest => a.created_or_modified().cmp(&b.created_or_modified()),
            Self::Newest => b.modified.cmp(&a.modified),
            Self::Shallowest => a.depth.cmp(&b.depth),
            Self::PathPattern(re) => {
                let a_match = re.is_match(&a.path.to_string_lossy());
                let b_match = re.is_match(&b.path.to_string_lossy());
                b_match.cmp(&a_match)
            }
        };
        primary.then_with(|| a.path.cmp(&b.path))
    }

    /// Split members into the original and the path-ordered duplicates.
    ///
    /// Returns `None` for an empty input.
    #[must_use]
    pub fn designate(&self, mut members: Vec<FileRecord>) -> Option<(FileRecord, Vec<FileRecord>)> {
        let best = members
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| self.compare(a, b))
            .map(|(idx, _)| idx)?;
        let original = members.swap_remove(best);
        members.sort_by(|a, b| a.path.cmp(&b.path));
        Some((original, members))
    }
}

/// A group of files with identical size and content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateSet {
    /// Size of each member in bytes
    pub size: u64,
    /// Full-content hash shared by every member
    #[serde(serialize_with = "serialize_hash", deserialize_with = "deserialize_hash")]
    pub hash: Hash,
    /// Member that is kept
    pub original: FileRecord,
    /// Members that may be replaced, in path order
    pub duplicates: Vec<FileRecord>,
    /// All members already share one device+inode
    pub already_linked: bool,
}

fn serialize_hash<S: Serializer>(hash: &Hash, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hash_to_hex(*hash))
}

fn deserialize_hash<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash, D::Error> {
    let hex = String::deserialize(deserializer)?;
    hex_to_hash(&hex).ok_or_else(|| serde::de::Error::custom(format!("invalid hash '{hex}'")))
}

impl DuplicateSet {
    /// Build a set from its members.
    ///
    /// Returns `None` for fewer than two members.
    #[must_use]
    pub fn from_members(
        size: u64,
        hash: Hash,
        members: Vec<FileRecord>,
        strategy: &OriginalStrategy,
    ) -> Option<Self> {
        if members.len() < 2 {
            return None;
        }
        let already_linked = all_shared(members.iter().map(|m| &m.identity));
        let (original, duplicates) = strategy.designate(members)?;
        Some(Self {
            size,
            hash,
            original,
            duplicates,
            already_linked,
        })
    }

    /// All members, original first.
    pub fn members(&self) -> impl Iterator<Item = &FileRecord> {
        std::iter::once(&self.original).chain(self.duplicates.iter())
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.duplicates.len() + 1
    }

    /// Always false: a set has at least an original.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Bytes occupied by all members as if they were independent.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.size * self.len() as u64
    }

    /// Number of distinct files among the members.
    #[must_use]
    pub fn distinct_files(&self) -> usize {
        distinct_count(self.members().map(|m| &m.identity))
    }

    /// Bytes that linking this set would reclaim.
    #[must_use]
    pub fn reclaimable_bytes(&self) -> u64 {
        if self.already_linked {
            return 0;
        }
        self.size * (self.distinct_files() as u64).saturating_sub(1)
    }

    /// Hash as hexadecimal string.
    #[must_use]
    pub fn hash_hex(&self) -> String {
        hash_to_hex(self.hash)
    }

    /// Same set with the original chosen by another strategy.
    ///
    /// Membership and `already_linked` are unchanged.
    #[must_use]
    pub fn with_strategy(&self, strategy: &OriginalStrategy) -> Self {
        let members: Vec<FileRecord> = self.members().cloned().collect();
        match strategy.designate(members) {
            Some((original, duplicates)) => Self {
                original,
                duplicates,
                ..self.clone()
            },
            None => self.clone(),
        }
    }
}

/// Turn confirmed groups into duplicate sets, preserving group order.
#[must_use]
pub fn classify(
    groups: impl IntoIterator<Item = ConfirmedGroup>,
    strategy: &OriginalStrategy,
) -> Vec<DuplicateSet> {
    groups
        .into_iter()
        .filter_map(|group| {
            let set = DuplicateSet::from_members(group.size, group.hash, group.files, strategy)?;
            log::debug!(
                "Duplicate set {}: {} files, {} bytes each, original {}{}",
                set.hash_hex(),
                set.len(),
                set.size,
                set.original.path.display(),
                if set.already_linked {
                    " (already linked)"
                } else {
                    ""
                }
            );
            Some(set)
        })
        .collect()
}
