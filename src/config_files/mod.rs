// src/config_files/mod.rs

//! Pending configuration file updates
//!
//! Package merges never overwrite protected configuration files. The new
//! version is staged next to the live file as `._cfg####_<name>` and left for
//! the administrator. This module finds those markers, decides which ones can
//! be merged without review, and applies merge or discard decisions with a
//! backup of the replaced file.
//!
//! Scan results are cached in the [`CacheStore`](crate::cache::CacheStore)
//! under [`SCAN_CACHE_KEY`]. A cached scan is only trusted while every source
//! file it references still exists; otherwise the whole cache is rebuilt.

mod diff;
mod interactive;
mod marker;
mod reconciler;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub use diff::{is_automergeable, is_trivial_change, unified_diff};
pub use interactive::{
    resolve_interactive, ActionChoice, BatchAction, FileChoice, Prompter, ResolutionSummary,
};
pub use marker::{backup_path, destination_for, parse_marker, MarkerName, BACKUP_PREFIX, MARKER_PREFIX};
pub use reconciler::ConfigReconciler;

/// Cache store key of the reconciliation scan
pub const SCAN_CACHE_KEY: &str = "conf/scanfs";

/// A staged replacement for a live configuration file
///
/// Paths are relative to the system root (they start with `/` and are joined
/// onto the configured root before touching the filesystem).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigUpdateCandidate {
    /// Four-character tag from the marker name
    pub revision_tag: String,
    /// The `._cfg####_name` file
    pub source_path: PathBuf,
    /// The live file it would replace
    pub destination_path: PathBuf,
    /// Whether it can be merged without review
    pub automerge: bool,
}

/// Scan results indexed by a session-wide counter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCache {
    entries: BTreeMap<u32, ConfigUpdateCandidate>,
}

impl ScanCache {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: u32) -> Option<&ConfigUpdateCandidate> {
        self.entries.get(&key)
    }

    /// Keys in ascending order
    pub fn keys(&self) -> Vec<u32> {
        self.entries.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &ConfigUpdateCandidate)> {
        self.entries.iter().map(|(key, candidate)| (*key, candidate))
    }

    /// Highest key in use
    pub fn max_key(&self) -> Option<u32> {
        self.entries.keys().next_back().copied()
    }

    /// Key of the entry staged at `source_path`, if any
    pub fn find_source(&self, source_path: &Path) -> Option<u32> {
        self.iter()
            .find(|(_, candidate)| candidate.source_path == source_path)
            .map(|(key, _)| key)
    }

    fn insert(&mut self, key: u32, candidate: ConfigUpdateCandidate) {
        self.entries.insert(key, candidate);
    }

    fn remove(&mut self, key: u32) -> Option<ConfigUpdateCandidate> {
        self.entries.remove(&key)
    }

    fn get_mut(&mut self, key: u32) -> Option<&mut ConfigUpdateCandidate> {
        self.entries.get_mut(&key)
    }
}

/// Result of looking up a persisted scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Every referenced source still exists
    Hit(ScanCache),
    /// The cache cannot be used and a full scan is needed
    Miss(MissReason),
}

/// Why a persisted scan was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissReason {
    /// No entry, or an entry that could not be decoded
    Absent,
    /// A referenced source file no longer exists
    MissingSource(PathBuf),
}
