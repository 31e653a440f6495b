//! Database query operations

use chrono::Utc;
use rusqlite::{OptionalExtension, Transaction, params, params_from_iter};
use samplexplore_core::{IndexStats, SearchHit};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use super::schema::REBUILD_FTS_SQL;
use super::{IndexStore, LAST_REBUILD_AT_KEY, SAMPLES_DIRECTORY_KEY, StoreError};
use crate::indexer::SampleRecord;
use crate::search::build_match_expression;

/// Outcome of a successful `replace_all`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceSummary {
    pub files_indexed: u64,
    pub batches: u64,
}

impl IndexStore {
    /// Replace every indexed file with `records` in one transaction.
    ///
    /// Deletes all rows, inserts the records in batches, recreates and
    /// optimizes the trigram index and finally records `root` as the samples
    /// directory. On any error nothing is committed and the previous index
    /// stays intact.
    pub fn replace_all<I>(&mut self, root: &Path, records: I) -> Result<ReplaceSummary, StoreError>
    where
        I: IntoIterator<Item = SampleRecord>,
    {
        let start = Instant::now();
        let batch_size = self.batch_size;
        let tx = self.conn.transaction()?;

        let removed = tx.execute("DELETE FROM files", [])?;
        debug!("Cleared {} indexed files", removed);

        let mut summary = ReplaceSummary::default();
        let mut batch: Vec<SampleRecord> = Vec::with_capacity(batch_size);

        for record in records {
            batch.push(record);
            if batch.len() >= batch_size {
                insert_batch(&tx, &batch)?;
                summary.files_indexed += batch.len() as u64;
                summary.batches += 1;
                batch.clear();
            }
        }

        // Flush remaining records
        if !batch.is_empty() {
            insert_batch(&tx, &batch)?;
            summary.files_indexed += batch.len() as u64;
            summary.batches += 1;
        }

        tx.execute_batch(REBUILD_FTS_SQL)?;

        set_config_in(&tx, SAMPLES_DIRECTORY_KEY, &root.to_string_lossy())?;
        set_config_in(&tx, LAST_REBUILD_AT_KEY, &Utc::now().to_rfc3339())?;

        tx.commit()?;

        info!(
            "Indexed {} files from {:?} in {}ms",
            summary.files_indexed,
            root,
            start.elapsed().as_millis()
        );
        Ok(summary)
    }

    /// Search file names, best match first.
    ///
    /// Returns an empty list without querying when the phrase has nothing
    /// searchable left after sanitizing. `max_results` of 0 means no limit.
    pub fn search(&self, phrase: &str, max_results: usize) -> Result<Vec<SearchHit>, StoreError> {
        let Some(expression) = build_match_expression(phrase) else {
            debug!("Search phrase {:?} is empty after sanitizing", phrase);
            return Ok(Vec::new());
        };

        let start = Instant::now();
        let limit: i64 = if max_results == 0 { -1 } else { max_results as i64 };

        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT f.id, f.full_path, f.filename
            FROM (
                SELECT rowid, rank FROM files_fts WHERE files_fts MATCH ?1
            ) AS m
            JOIN files f ON f.id = m.rowid
            ORDER BY m.rank, f.filename
            LIMIT ?2
            "#,
        )?;

        let hits = stmt
            .query_map(params![expression, limit], |row| {
                Ok(SearchHit {
                    id: row.get(0)?,
                    full_path: row.get(1)?,
                    filename: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "Search {:?} returned {} hits in {}ms",
            expression,
            hits.len(),
            start.elapsed().as_millis()
        );
        Ok(hits)
    }

    /// Read a configuration value
    pub fn get_config(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM configuration WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Write a configuration value
    pub fn set_config(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(UPSERT_CONFIG_SQL, params![key, value])?;
        Ok(())
    }

    /// Root of the last successful rebuild
    pub fn samples_directory(&self) -> Result<Option<String>, StoreError> {
        self.get_config(SAMPLES_DIRECTORY_KEY)
    }

    /// Number of indexed files
    pub fn count_files(&self) -> Result<u64, StoreError> {
        let count: u64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Get index statistics
    pub fn stats(&self) -> Result<IndexStats, StoreError> {
        Ok(IndexStats {
            indexed_files: self.count_files()?,
            database_size_bytes: self.get_size(),
            samples_directory: self.samples_directory()?,
            last_rebuild_at: self.get_config(LAST_REBUILD_AT_KEY)?,
        })
    }
}

const UPSERT_CONFIG_SQL: &str = r#"
INSERT INTO configuration (key, value) VALUES (?1, ?2)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#;

fn set_config_in(tx: &Transaction<'_>, key: &str, value: &str) -> Result<(), StoreError> {
    tx.execute(UPSERT_CONFIG_SQL, params![key, value])?;
    Ok(())
}

/// Insert one batch with a single multi-row statement
fn insert_batch(tx: &Transaction<'_>, batch: &[SampleRecord]) -> Result<(), StoreError> {
    let placeholders = vec!["(?, ?)"; batch.len()].join(", ");
    let sql = format!("INSERT INTO files (full_path, filename) VALUES {}", placeholders);

    let mut stmt = tx.prepare_cached(&sql)?;
    stmt.execute(params_from_iter(
        batch
            .iter()
            .flat_map(|r| [r.full_path.as_str(), r.filename.as_str()]),
    ))?;
    debug!("Inserted batch of {} files", batch.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn record(dir: &str, name: &str) -> SampleRecord {
        SampleRecord {
            full_path: format!("{}/{}", dir, name),
            filename: name.to_string(),
        }
    }

    fn records(names: &[&str]) -> Vec<SampleRecord> {
        names.iter().map(|n| record("/samples", n)).collect()
    }

    fn all_paths(store: &IndexStore) -> BTreeSet<String> {
        let mut stmt = store.conn.prepare("SELECT full_path FROM files").unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    fn hit_names(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.filename.as_str()).collect()
    }

    fn drum_store() -> IndexStore {
        let mut store = IndexStore::open_in_memory().unwrap();
        store
            .replace_all(
                Path::new("/samples"),
                records(&[
                    "snare.wav",
                    "kickdrum.wav",
                    "hat.wav",
                    "kick.wav",
                    "clap.wav",
                    "tom.wav",
                ]),
            )
            .unwrap();
        store
    }

    #[test]
    fn replace_all_inserts_in_batches() {
        let mut store = IndexStore::open_in_memory().unwrap().with_batch_size(2);
        let summary = store
            .replace_all(
                Path::new("/samples"),
                records(&["a.wav", "b.wav", "c.wav", "d.wav", "e.wav"]),
            )
            .unwrap();

        assert_eq!(summary.files_indexed, 5);
        assert_eq!(summary.batches, 3);
        assert_eq!(store.count_files().unwrap(), 5);
        assert_eq!(store.samples_directory().unwrap().as_deref(), Some("/samples"));
        assert!(store.get_config(LAST_REBUILD_AT_KEY).unwrap().is_some());
    }

    #[test]
    fn replace_all_drops_stale_rows() {
        let mut store = drum_store();
        store
            .replace_all(Path::new("/other"), vec![record("/other", "bass.wav")])
            .unwrap();

        assert_eq!(
            all_paths(&store),
            BTreeSet::from(["/other/bass.wav".to_string()])
        );
        assert!(store.search("kick", 0).unwrap().is_empty());
        assert_eq!(hit_names(&store.search("bass", 0).unwrap()), vec!["bass.wav"]);
        assert_eq!(store.samples_directory().unwrap().as_deref(), Some("/other"));
    }

    #[test]
    fn replace_all_is_idempotent() {
        let mut store = drum_store();
        let before = all_paths(&store);

        store
            .replace_all(
                Path::new("/samples"),
                records(&[
                    "snare.wav",
                    "kickdrum.wav",
                    "hat.wav",
                    "kick.wav",
                    "clap.wav",
                    "tom.wav",
                ]),
            )
            .unwrap();

        assert_eq!(all_paths(&store), before);
    }

    #[test]
    fn failed_replace_leaves_previous_index_intact() {
        let mut store = drum_store().with_batch_size(1);
        let before = all_paths(&store);
        let root_before = store.samples_directory().unwrap();

        // Second row collides on the unique full_path
        let result = store.replace_all(
            Path::new("/broken"),
            vec![
                record("/broken", "one.wav"),
                record("/broken", "one.wav"),
                record("/broken", "two.wav"),
            ],
        );

        assert!(matches!(result, Err(StoreError::Sqlite(_))));
        assert_eq!(all_paths(&store), before);
        assert_eq!(store.samples_directory().unwrap(), root_before);
        assert_eq!(hit_names(&store.search("snare", 0).unwrap()), vec!["snare.wav"]);
    }

    #[test]
    fn search_ranks_closer_matches_first() {
        let store = drum_store();
        let hits = store.search("kick", 0).unwrap();
        assert_eq!(hit_names(&hits), vec!["kick.wav", "kickdrum.wav"]);
        assert_eq!(hits[0].full_path, "/samples/kick.wav");
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        let store = drum_store();
        assert_eq!(hit_names(&store.search("DRUM", 0).unwrap()), vec!["kickdrum.wav"]);
        assert_eq!(hit_names(&store.search("nar", 0).unwrap()), vec!["snare.wav"]);
    }

    #[test]
    fn search_sanitizes_special_characters() {
        let store = drum_store();
        let hits = store.search("\"kick*.wav\"", 0).unwrap();
        assert_eq!(hit_names(&hits), vec!["kick.wav", "kickdrum.wav"]);

        assert!(store.search(" *.%&' ", 0).unwrap().is_empty());
        assert!(store.search("", 0).unwrap().is_empty());
    }

    #[test]
    fn search_respects_max_results() {
        let store = drum_store();
        let hits = store.search("wav", 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(store.search("wav", 0).unwrap().len(), 6);
    }

    #[test]
    fn search_on_empty_index_returns_nothing() {
        let store = IndexStore::open_in_memory().unwrap();
        assert!(store.search("kick", 0).unwrap().is_empty());
    }

    #[test]
    fn config_values_survive_rebuilds() {
        let mut store = IndexStore::open_in_memory().unwrap();
        assert_eq!(store.get_config("theme").unwrap(), None);

        store.set_config("theme", "dark").unwrap();
        store.set_config("theme", "light").unwrap();
        store
            .replace_all(Path::new("/samples"), records(&["kick.wav"]))
            .unwrap();

        assert_eq!(store.get_config("theme").unwrap().as_deref(), Some("light"));
    }

    #[test]
    fn stats_reflect_last_rebuild() {
        let store = drum_store();
        let stats = store.stats().unwrap();
        assert_eq!(stats.indexed_files, 6);
        assert_eq!(stats.samples_directory.as_deref(), Some("/samples"));
        assert!(stats.last_rebuild_at.is_some());
        assert_eq!(stats.database_size_bytes, 0);
    }
}
