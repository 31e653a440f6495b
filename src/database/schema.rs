//! Database schema and initialization

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::info;

use super::StoreError;

/// Rows per multi-row INSERT when nothing else is configured
pub(super) const DEFAULT_BATCH_SIZE: usize = 100;

/// Upper bound keeping a batch below SQLite's bound-parameter limit
pub(super) const MAX_BATCH_SIZE: usize = 5_000;

/// The persisted sample index.
///
/// Not thread-safe; the index service keeps it on its single worker lane.
pub struct IndexStore {
    pub(super) conn: Connection,
    pub(super) db_path: Option<PathBuf>,
    pub(super) batch_size: usize,
}

impl IndexStore {
    /// Open (or create) the index file and ensure the schema exists
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(db_path)?;

        // Enable WAL mode so external readers never block a rebuild
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn,
            db_path: Some(db_path.to_path_buf()),
            batch_size: DEFAULT_BATCH_SIZE,
        };
        store.create_schema()?;

        info!("Opened sample index at {:?}", db_path);
        Ok(store)
    }

    /// Open a throwaway in-memory index
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
            db_path: None,
            batch_size: DEFAULT_BATCH_SIZE,
        };
        store.create_schema()?;
        Ok(store)
    }

    /// Set how many rows go into one INSERT during `replace_all`
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.set_batch_size(batch_size);
        self
    }

    pub fn set_batch_size(&mut self, batch_size: usize) {
        self.batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
    }

    /// Create tables and the full-text index if they are missing.
    /// Safe to call on an initialized store.
    pub fn create_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        info!("Database schema initialized");
        Ok(())
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Get database size in bytes, including the write-ahead log
    /// (0 for in-memory stores)
    pub fn get_size(&self) -> u64 {
        let Some(db_path) = &self.db_path else {
            return 0;
        };

        let mut wal_path = db_path.clone().into_os_string();
        wal_path.push("-wal");

        [db_path.as_path(), Path::new(&wal_path)]
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum()
    }
}

/// SQL schema for the database
const SCHEMA_SQL: &str = r#"
-- One row per indexed sample
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY,
    full_path TEXT NOT NULL UNIQUE,
    filename TEXT NOT NULL
);

-- Trigram index over file names, content-linked to files
CREATE VIRTUAL TABLE IF NOT EXISTS files_fts USING fts5(
    filename,
    content='files',
    content_rowid='id',
    tokenize='trigram'
);

-- Key/value settings that survive rebuilds
CREATE TABLE IF NOT EXISTS configuration (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Recreates the full-text index from the files table
pub(super) const REBUILD_FTS_SQL: &str = r#"
DROP TABLE IF EXISTS files_fts;
CREATE VIRTUAL TABLE files_fts USING fts5(
    filename,
    content='files',
    content_rowid='id',
    tokenize='trigram'
);
INSERT INTO files_fts(files_fts) VALUES('rebuild');
INSERT INTO files_fts(files_fts) VALUES('optimize');
"#;
