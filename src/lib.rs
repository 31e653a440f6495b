//! samplexplore - audio sample indexer
//!
//! Scans a samples directory, keeps the file names in a SQLite FTS5 trigram
//! index and answers substring searches over them. All index access is
//! serialized through [`IndexService`].
//!
//! ```no_run
//! use samplexplore::{Callbacks, Config, IndexService, RebuildProgress};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let service = IndexService::new(config.clone())?;
//! service.connect(&config.db_path, Callbacks::new());
//! service.rebuild(
//!     "/samples",
//!     Callbacks::new().on_progress(|p: RebuildProgress| println!("{:?}", p)),
//! );
//! let hits = service.search("kick", Callbacks::new()).wait().await?;
//! # drop(hits);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod database;
pub mod indexer;
pub mod progress;
pub mod queue;
pub mod search;
pub mod service;

pub use config::{Config, SharedConfig};
pub use database::{IndexStore, StoreError};
pub use queue::{Callbacks, Progress, TaskError, TaskHandle, TaskQueue};
pub use samplexplore_core::{IndexStats, RebuildProgress, SearchHit, ServiceState};
pub use service::{IndexService, ServiceError};
