//! Configuration management for samplexplore
//!
//! Handles loading, saving, and sharing the indexer configuration.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use samplexplore_core::DEFAULT_EXTENSIONS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub service: ServiceConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Path to database file (not serialized)
    #[serde(skip)]
    pub db_path: PathBuf,
}

/// Directory scan configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Accepted file extensions, lowercase without the leading dot.
    /// An empty list accepts every file.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Skip files and directories whose name starts with a dot
    #[serde(default)]
    pub skip_hidden: bool,

    /// Samples root chosen by the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples_directory: Option<PathBuf>,
}

/// Index write configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Rows inserted per batch during a rebuild
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// Search configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Maximum number of hits per query (0 = unlimited)
    #[serde(default)]
    pub max_results: usize,
}

/// Service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Log level used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions
fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

fn default_batch_size() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            skip_hidden: false,
            samples_directory: None,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let (config_path, db_path) = Self::get_default_paths();
        Self {
            scan: ScanConfig::default(),
            index: IndexConfig::default(),
            search: SearchConfig::default(),
            service: ServiceConfig::default(),
            config_path,
            db_path,
        }
    }
}

impl Config {
    /// Get default paths for config and database
    fn get_default_paths() -> (PathBuf, PathBuf) {
        if let Some(proj_dirs) = ProjectDirs::from("com", "mwicat", "samplexplore") {
            (
                proj_dirs.config_dir().join("config.toml"),
                proj_dirs.data_dir().join("samplexplore.db"),
            )
        } else {
            // Fallback paths
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            let base = PathBuf::from(home).join(".samplexplore");
            (base.join("config.toml"), base.join("samplexplore.db"))
        }
    }

    /// Load configuration from the default location, or create it if missing
    pub fn load() -> Result<Self> {
        let (config_path, _) = Self::get_default_paths();
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific file, or create a default one there
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let (_, db_path) = Self::get_default_paths();

        let config = if config_path.exists() {
            let content = fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
            let mut config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;
            config.config_path = config_path.to_path_buf();
            config.db_path = db_path;
            config
        } else {
            info!("Config file not found, creating default at {:?}", config_path);
            let config = Config {
                config_path: config_path.to_path_buf(),
                db_path,
                ..Config::default()
            };
            config.save()?;
            config
        };

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // Ensure parent directory exists
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        fs::write(&self.config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", self.config_path))?;

        info!("Configuration saved to {:?}", self.config_path);
        Ok(())
    }
}

/// Thread-safe configuration wrapper
#[derive(Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Config>>,
}

impl SharedConfig {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Copy of the current configuration
    pub fn snapshot(&self) -> Config {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Apply `f` to the configuration under the write lock
    pub fn update<R>(&self, f: impl FnOnce(&mut Config) -> R) -> R {
        let mut config = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut config)
    }
}
