//! Index service
//!
//! Front door for callers. Every operation is queued on one worker lane that
//! owns the open index, so a search never observes a half-finished rebuild
//! and two rebuilds never interleave. Calls return at once with a
//! [`TaskHandle`]; outcomes also reach the per-call [`Callbacks`].

use anyhow::Context;
use samplexplore_core::{IndexStats, RebuildProgress, SearchHit, ServiceState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

use crate::config::{Config, SharedConfig};
use crate::database::IndexStore;
use crate::indexer::{ExtensionFilter, Scanner};
use crate::queue::{Callbacks, Progress, QueueError, TaskHandle, TaskQueue};

/// Service-level failures, reachable through `TaskError::downcast_ref`
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("index is not connected")]
    NotConnected,

    #[error("invalid samples directory {}: {reason}", path.display())]
    InvalidRoot { path: PathBuf, reason: String },
}

/// Serialized access to the sample index
pub struct IndexService {
    queue: TaskQueue<Option<IndexStore>>,
    config: SharedConfig,
    state: Arc<watch::Sender<ServiceState>>,
}

impl IndexService {
    /// Start the service with its worker lane. Must run inside a tokio runtime.
    pub fn new(config: Config) -> Result<Self, QueueError> {
        Self::with_shared_config(SharedConfig::new(config))
    }

    pub fn with_shared_config(config: SharedConfig) -> Result<Self, QueueError> {
        let queue = TaskQueue::spawn("samplexplore-index", None)?;
        let (state, _) = watch::channel(ServiceState::Uninitialized);

        Ok(Self {
            queue,
            config,
            state: Arc::new(state),
        })
    }

    /// Open (or create) the index at `db_path`.
    ///
    /// Replaces any store opened earlier. A failed connect leaves the state
    /// untouched.
    pub fn connect(
        &self,
        db_path: impl Into<PathBuf>,
        callbacks: Callbacks<()>,
    ) -> TaskHandle<()> {
        let db_path = db_path.into();
        let batch_size = self.config.snapshot().index.batch_size;
        let state = Arc::clone(&self.state);

        self.queue.submit(
            move |slot: &mut Option<IndexStore>, _: &Progress<()>| {
                let store = IndexStore::open(&db_path)
                    .with_context(|| format!("Failed to open index at {:?}", db_path))?
                    .with_batch_size(batch_size);
                *slot = Some(store);
                state.send_replace(ServiceState::Connected);
                Ok(())
            },
            callbacks,
        )
    }

    /// Replace the index with the samples found under `root`.
    ///
    /// Uses the extensions and hidden-file setting configured when this is
    /// called. Progress is reported once per directory. On success the root
    /// is recorded as the last indexed directory.
    pub fn rebuild(
        &self,
        root: impl Into<PathBuf>,
        callbacks: Callbacks<(), RebuildProgress>,
    ) -> TaskHandle<()> {
        let root = root.into();
        let scan = self.config.snapshot().scan;
        let state = Arc::clone(&self.state);

        self.queue.submit(
            move |slot: &mut Option<IndexStore>, progress: &Progress<RebuildProgress>| {
                let store = slot.as_mut().ok_or(ServiceError::NotConnected)?;
                let root = validate_root(&root)?;
                let _rebuilding = RebuildingGuard::enter(&state);

                info!("Rebuilding index from {:?}", root);
                let filter = ExtensionFilter::new(&scan.extensions);
                let records = Scanner::new(&root, filter)
                    .skip_hidden(scan.skip_hidden)
                    .scan(|p| {
                        if progress.is_observed() {
                            progress.report(p.clone());
                        }
                    });

                store
                    .replace_all(&root, records)
                    .with_context(|| format!("Failed to rebuild index from {:?}", root))?;
                Ok(())
            },
            callbacks,
        )
    }

    /// Search file names; hits arrive best match first
    pub fn search(
        &self,
        phrase: impl Into<String>,
        callbacks: Callbacks<Vec<SearchHit>>,
    ) -> TaskHandle<Vec<SearchHit>> {
        let phrase = phrase.into();
        let max_results = self.config.snapshot().search.max_results;

        self.with_store(
            move |store| {
                store
                    .search(&phrase, max_results)
                    .with_context(|| format!("Search for {:?} failed", phrase))
            },
            callbacks,
        )
    }

    pub fn stats(&self, callbacks: Callbacks<IndexStats>) -> TaskHandle<IndexStats> {
        self.with_store(
            |store| store.stats().context("Failed to read index statistics"),
            callbacks,
        )
    }

    /// Root of the last successful rebuild, if any
    pub fn last_indexed_root(
        &self,
        callbacks: Callbacks<Option<PathBuf>>,
    ) -> TaskHandle<Option<PathBuf>> {
        self.with_store(
            |store| {
                let root = store
                    .samples_directory()
                    .context("Failed to read samples directory")?;
                Ok(root.map(PathBuf::from))
            },
            callbacks,
        )
    }

    /// Copy of the configuration used for the next submitted operation
    pub fn config(&self) -> Config {
        self.config.snapshot()
    }

    pub fn shared_config(&self) -> &SharedConfig {
        &self.config
    }

    /// Set the extensions accepted by later rebuilds.
    /// An empty list indexes every file.
    pub fn set_extensions<I, S>(&self, extensions: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let filter = ExtensionFilter::new(extensions);
        let extensions: Vec<String> = filter.extensions().map(str::to_string).collect();
        info!("Indexed extensions set to {:?}", extensions);
        self.config.update(|c| c.scan.extensions = extensions);
    }

    pub fn set_samples_directory(&self, dir: Option<PathBuf>) {
        self.config.update(|c| c.scan.samples_directory = dir);
    }

    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.state.subscribe()
    }

    /// Stop the worker lane; see [`TaskQueue::shutdown`]
    pub async fn shutdown(self) {
        self.queue.shutdown().await;
    }

    fn with_store<T, F>(&self, op: F, callbacks: Callbacks<T>) -> TaskHandle<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&IndexStore) -> anyhow::Result<T> + Send + 'static,
    {
        self.queue.submit(
            move |slot: &mut Option<IndexStore>, _: &Progress<()>| {
                let store = slot.as_ref().ok_or(ServiceError::NotConnected)?;
                op(store)
            },
            callbacks,
        )
    }
}

/// Holds the state at `Rebuilding` until dropped
struct RebuildingGuard<'a> {
    state: &'a watch::Sender<ServiceState>,
}

impl<'a> RebuildingGuard<'a> {
    fn enter(state: &'a watch::Sender<ServiceState>) -> Self {
        state.send_replace(ServiceState::Rebuilding);
        Self { state }
    }
}

impl Drop for RebuildingGuard<'_> {
    fn drop(&mut self) {
        self.state.send_replace(ServiceState::Connected);
    }
}

/// Resolve `root` to an absolute, readable directory
fn validate_root(root: &Path) -> Result<PathBuf, ServiceError> {
    let invalid = |reason: String| ServiceError::InvalidRoot {
        path: root.to_path_buf(),
        reason,
    };

    let absolute = std::path::absolute(root).map_err(|e| invalid(e.to_string()))?;
    if !absolute.is_dir() {
        return Err(invalid("not an existing directory".to_string()));
    }
    std::fs::read_dir(&absolute).map_err(|e| invalid(e.to_string()))?;

    Ok(absolute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn validate_root_accepts_directories() {
        let temp = TempDir::new().unwrap();
        let root = validate_root(temp.path()).unwrap();
        assert!(root.is_absolute());
        assert!(root.is_dir());
    }

    #[test]
    fn validate_root_rejects_missing_and_files() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("kick.wav");
        std::fs::write(&file, b"RIFF").unwrap();

        for path in [temp.path().join("missing"), file] {
            match validate_root(&path) {
                Err(ServiceError::InvalidRoot { path: reported, .. }) => {
                    assert_eq!(reported, path)
                }
                other => panic!("expected InvalidRoot, got {:?}", other),
            }
        }
    }

    #[test]
    fn rebuilding_guard_restores_connected() {
        let (tx, rx) = watch::channel(ServiceState::Connected);
        {
            let _guard = RebuildingGuard::enter(&tx);
            assert_eq!(*rx.borrow(), ServiceState::Rebuilding);
        }
        assert_eq!(*rx.borrow(), ServiceState::Connected);
    }

    #[tokio::test]
    async fn set_extensions_normalizes() {
        let service = IndexService::new(Config::default()).unwrap();
        service.set_extensions([".WAV", "aif", ""]);
        assert_eq!(service.config().scan.extensions, vec!["aif", "wav"]);
        assert_eq!(service.state(), ServiceState::Uninitialized);
    }

    #[tokio::test]
    async fn set_samples_directory_updates_snapshot() {
        let service = IndexService::new(Config::default()).unwrap();
        let before = service.config();

        service.set_samples_directory(Some(PathBuf::from("/music/samples")));
        assert_eq!(
            service.config().scan.samples_directory,
            Some(PathBuf::from("/music/samples"))
        );
        assert_eq!(before.scan.samples_directory, None);

        service.set_samples_directory(None);
        assert_eq!(service.config().scan.samples_directory, None);
    }
}
