//! samplexplore - audio sample indexer
//!
//! Command line front end: rebuild the index from a samples directory and
//! search it by file name.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use samplexplore::progress::ProgressMode;
use samplexplore::{Callbacks, Config, IndexService, RebuildProgress};

/// samplexplore - find audio samples by name
#[derive(Parser)]
#[command(name = "samplexplore")]
#[command(author = "mwicat")]
#[command(version)]
#[command(about = "Index audio samples and search them by file name", long_about = None)]
struct Cli {
    /// Config file (defaults to the per-user config location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Index database file (defaults to the per-user data location)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the index from a samples directory
    Rebuild {
        /// Samples directory (defaults to the configured one, then the last indexed one)
        dir: Option<PathBuf>,

        /// Extension to index, repeatable (e.g. --ext wav --ext flac)
        #[arg(short, long = "ext")]
        extensions: Vec<String>,

        /// Emit progress as JSON lines on stderr
        #[arg(long)]
        json: bool,

        /// Do not report progress
        #[arg(short, long)]
        quiet: bool,
    },

    /// Search indexed samples by file name
    Search {
        /// Search phrase
        query: String,

        /// Maximum number of results (0 = unlimited)
        #[arg(short = 'n', long)]
        max_results: Option<usize>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show index status
    Status {
        /// Print status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    init_logging(&config.service.log_level);

    let db_path = cli.db.clone().unwrap_or_else(|| config.db_path.clone());

    match cli.command {
        Commands::Rebuild {
            dir,
            extensions,
            json,
            quiet,
        } => {
            rebuild(config, &db_path, dir, extensions, ProgressMode::detect(json, quiet)).await?;
        }

        Commands::Search {
            query,
            max_results,
            json,
        } => {
            search(config, &db_path, &query, max_results, json).await?;
        }

        Commands::Status { json } => {
            show_status(config, &db_path, json).await?;
        }

        Commands::Config => {
            show_config(&config, &db_path)?;
        }
    }

    Ok(())
}

fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Rebuild the index and remember the directory it was built from
async fn rebuild(
    config: Config,
    db_path: &Path,
    dir: Option<PathBuf>,
    extensions: Vec<String>,
    progress: ProgressMode,
) -> Result<()> {
    let mut saved = config.clone();
    let service = IndexService::new(config)?;
    if !extensions.is_empty() {
        service.set_extensions(&extensions);
    }

    service.connect(db_path, Callbacks::new()).wait().await?;

    let root = match dir {
        Some(dir) => dir,
        None => default_root(&service).await?,
    };
    info!("Rebuilding from {:?}", root);

    service
        .rebuild(
            &root,
            Callbacks::new().on_progress(move |p: RebuildProgress| progress.report(&p)),
        )
        .wait()
        .await?;

    let stats = service.stats(Callbacks::new()).wait().await?;
    service.shutdown().await;

    println!(
        "Indexed {} files from {}",
        stats.indexed_files,
        stats.samples_directory.as_deref().unwrap_or("?")
    );

    // Only the chosen directory is persisted, not one-off --ext overrides
    let root = std::path::absolute(&root)?;
    if saved.scan.samples_directory.as_ref() != Some(&root) {
        saved.scan.samples_directory = Some(root);
        saved.save()?;
    }

    Ok(())
}

async fn default_root(service: &IndexService) -> Result<PathBuf> {
    if let Some(dir) = service.config().scan.samples_directory {
        return Ok(dir);
    }
    if let Some(dir) = service.last_indexed_root(Callbacks::new()).wait().await? {
        return Ok(dir);
    }
    bail!("No samples directory configured; pass one to `samplexplore rebuild DIR`")
}

/// Search the index and print hits, best match first
async fn search(
    config: Config,
    db_path: &Path,
    query: &str,
    max_results: Option<usize>,
    json: bool,
) -> Result<()> {
    let service = IndexService::new(config)?;
    if let Some(max) = max_results {
        service.shared_config().update(|c| c.search.max_results = max);
    }

    // The search queues behind the connect
    let connected = service.connect(db_path, Callbacks::new());
    let hits = service.search(query, Callbacks::new()).wait().await;
    connected.wait().await?;
    let hits = hits?;
    service.shutdown().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    println!("Found {} files:", hits.len());
    println!();
    for hit in &hits {
        println!("  {}", hit.full_path);
    }

    Ok(())
}

/// Show index statistics
async fn show_status(config: Config, db_path: &Path, json: bool) -> Result<()> {
    let service = IndexService::new(config)?;
    let connected = service.connect(db_path, Callbacks::new());
    let stats = service.stats(Callbacks::new()).wait().await;
    connected.wait().await?;
    let stats = stats?;
    service.shutdown().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("samplexplore Status");
    println!("===================");
    println!("Database:          {}", db_path.display());
    println!("Indexed files:     {}", stats.indexed_files);
    println!(
        "Database size:     {:.1} MB",
        stats.database_size_bytes as f64 / 1_000_000.0
    );
    println!(
        "Samples directory: {}",
        stats.samples_directory.as_deref().unwrap_or("(none)")
    );
    println!(
        "Last rebuild:      {}",
        stats.last_rebuild_at.as_deref().unwrap_or("never")
    );

    Ok(())
}

/// Show the effective configuration
fn show_config(config: &Config, db_path: &Path) -> Result<()> {
    println!("# config file: {}", config.config_path.display());
    println!("# database:    {}", db_path.display());
    println!();
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
