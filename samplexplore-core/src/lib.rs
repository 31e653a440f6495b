//! Shared types for samplexplore
//!
//! This crate contains the plain value types handed to front ends
//! (search hits, rebuild progress, index statistics) so they can be
//! rendered without linking the SQLite index itself.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Extensions indexed when nothing else is configured
pub const DEFAULT_EXTENSIONS: &[&str] = &["wav", "aif", "mp3", "flac"];

/// A single search hit, ordered best match first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: i64,
    pub full_path: String,
    pub filename: String,
}

/// Progress of an in-flight rebuild, emitted once per directory visited
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildProgress {
    /// Every file seen so far, whether or not its extension was accepted
    pub files_seen_total: u64,
    /// Files that passed the extension filter
    pub files_accepted_total: u64,
    pub dirs_seen_total: u64,
    /// Directory whose immediate files were just enumerated
    pub current_directory: String,
    /// Set when `current_directory` could not be read and was skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RebuildProgress {
    pub fn is_skipped(&self) -> bool {
        self.error.is_some()
    }
}

/// Index statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub indexed_files: u64,
    pub database_size_bytes: u64,
    /// Root of the last successful rebuild
    pub samples_directory: Option<String>,
    /// RFC 3339 timestamp of the last successful rebuild
    pub last_rebuild_at: Option<String>,
}

/// Lifecycle of the index service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// No store has been opened yet
    #[default]
    Uninitialized,
    /// Store open and idle (or serving searches)
    Connected,
    /// A rebuild is running on the worker lane
    Rebuilding,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Uninitialized => write!(f, "uninitialized"),
            ServiceState::Connected => write!(f, "connected"),
            ServiceState::Rebuilding => write!(f, "rebuilding"),
        }
    }
}
