//! Database module for samplexplore
//!
//! Handles the SQLite file holding the sample table, its FTS5 trigram index
//! and the key/value configuration table.

mod queries;
mod schema;

pub use queries::ReplaceSummary;
pub use schema::IndexStore;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration key holding the root of the last successful rebuild
pub const SAMPLES_DIRECTORY_KEY: &str = "samples_directory";

/// Configuration key holding the RFC 3339 time of the last successful rebuild
pub const LAST_REBUILD_AT_KEY: &str = "last_rebuild_at";

/// Index store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
