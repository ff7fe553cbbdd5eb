//! Command implementations for the code index daemon.
//!
//! Handles:
//! - start: Load config, open storage, run the indexer until a signal
//! - search: Query the search index directly
//! - repo, failures, stats: Offline maintenance of the metadata store

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn};

use code_index_pipeline::{CodeIndexer, GracefulManager};
use code_index_search::{CodeSearcher, SearchIndex, SearchIndexConfig};
use code_index_storage::Storage;
use code_index_types::{FailureRecord, IndexTask, QueueKind, RepoRecord, Settings};

use crate::cli::{FailureCommands, RepoCommands};

/// Expand `~` and environment variables in a configured path.
fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.into_owned()),
        Err(_) => PathBuf::from(shellexpand::tilde(path).into_owned()),
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Load settings and expand the configured paths.
pub fn load_settings(config_path: Option<&str>) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    settings.db_path = path_string(&expand_path(&settings.db_path));
    settings.indexer.repo_path = path_string(&expand_path(&settings.indexer.repo_path));
    Ok(settings)
}

fn open_storage(settings: &Settings) -> Result<Arc<Storage>> {
    let db_path = PathBuf::from(&settings.db_path);
    fs::create_dir_all(&db_path).context("Failed to create database directory")?;
    let storage = Storage::open(&db_path)
        .with_context(|| format!("Failed to open storage at {:?}", db_path))?;
    Ok(Arc::new(storage))
}

fn init_logging(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

/// Run termination hooks and flush the store.
async fn terminate(graceful: GracefulManager, storage: Arc<Storage>) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        graceful.terminate();
        storage.flush()
    })
    .await
    .context("Shutdown task failed")?
    .context("Failed to flush storage")?;
    info!("Code index daemon stopped");
    Ok(())
}

/// Run the code indexer until interrupted.
///
/// 1. Load configuration
/// 2. Open the metadata store
/// 3. Start the indexer and wait for it to become ready
/// 4. Serve until SIGINT/SIGTERM, then close the index
pub async fn start_daemon(
    config_path: Option<&str>,
    db_path_override: Option<&str>,
    index_path_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<()> {
    let mut settings = load_settings(config_path)?;

    if let Some(db_path) = db_path_override {
        settings.db_path = path_string(&expand_path(db_path));
    }
    if let Some(index_path) = index_path_override {
        settings.indexer.repo_path = path_string(&expand_path(index_path));
    }
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }

    init_logging(&settings.log_level)?;

    info!("Code index daemon starting...");
    info!("Configuration:");
    info!("  Database path: {}", settings.db_path);
    info!("  Indexing enabled: {}", settings.indexer.repo_indexer_enabled);
    info!("  Backend: {}", settings.indexer.repo_type);
    info!("  Index path: {}", settings.indexer.repo_path);
    info!("  Queue: {}", settings.indexer.queue.kind);

    let storage = open_storage(&settings)?;
    let graceful = GracefulManager::new();
    let indexer = CodeIndexer::open(settings.indexer.clone(), storage.clone(), graceful.clone())
        .context("Invalid indexer configuration")?;
    let startup = indexer.init().context("Failed to initialize code indexer")?;

    tokio::select! {
        result = startup.wait() => match result {
            Ok(elapsed) => {
                if indexer.is_enabled() {
                    info!(elapsed_ms = elapsed.as_millis() as u64, "Code indexer ready");
                }
            }
            Err(e) => {
                terminate(graceful, storage).await?;
                return Err(e).context("Code indexer failed to start");
            }
        },
        _ = shutdown_signal() => {
            return terminate(graceful, storage).await;
        }
    }

    shutdown_signal().await;
    terminate(graceful, storage).await
}

/// Search the index without starting the indexer.
pub fn run_search(
    config_path: Option<&str>,
    keyword: &str,
    repo_ids: &[i64],
    page: i64,
    page_size: usize,
) -> Result<()> {
    let settings = load_settings(config_path)?;
    search_index(&settings, keyword, repo_ids, page, page_size)
}

fn search_index(
    settings: &Settings,
    keyword: &str,
    repo_ids: &[i64],
    page: i64,
    page_size: usize,
) -> Result<()> {
    let index_path = PathBuf::from(&settings.indexer.repo_path);
    if !index_path.join("meta.json").exists() {
        anyhow::bail!(
            "No code index at {:?}; run `code-index start` with indexing enabled first",
            index_path
        );
    }

    let index = SearchIndex::open_or_create(SearchIndexConfig::new(&index_path))
        .context("Failed to open search index")?;
    let searcher = CodeSearcher::new(&index).context("Failed to open index reader")?;
    let page = usize::try_from(page).unwrap_or(0).max(1);
    let results = searcher
        .search(repo_ids, keyword, page, page_size)
        .context("Search failed")?;

    println!("{} matches (page {})", results.total, page);
    for hit in &results.results {
        println!("{}:{}:{}", hit.repo_id, hit.filename, hit.start_line);
        for line in hit.content.lines() {
            println!("    {}", line);
        }
    }
    Ok(())
}

/// Handle `repo` subcommands.
pub fn handle_repo(config_path: Option<&str>, command: RepoCommands) -> Result<()> {
    let settings = load_settings(config_path)?;
    let storage = open_storage(&settings)?;
    repo_command(&settings, &storage, command)
}

fn repo_command(settings: &Settings, storage: &Storage, command: RepoCommands) -> Result<()> {
    match command {
        RepoCommands::Add {
            id,
            owner,
            name,
            path,
        } => {
            let repo = RepoRecord::new(id, owner, name, path_string(&expand_path(&path)));
            storage.put_repo(&repo).context("Failed to store repository")?;
            println!("Added {} ({}) at {}", repo.full_name(), repo.id, repo.path);
            schedule(settings, storage, IndexTask::index(id))?;
        }
        RepoCommands::Remove { id } => {
            if storage.delete_repo(id).context("Failed to remove repository")? {
                println!("Removed repository {}", id);
            } else {
                println!("Repository {} was not registered", id);
            }
            schedule(settings, storage, IndexTask::delete(id))?;
        }
        RepoCommands::List => {
            let repos = storage.list_repos().context("Failed to list repositories")?;
            if repos.is_empty() {
                println!("No repositories registered");
            }
            for repo in repos {
                println!("{:>8}  {:<30}  {}", repo.id, repo.full_name(), repo.path);
            }
        }
    }
    Ok(())
}

/// Leave a task for the next daemon run.
///
/// The persistent queue replays its journal on start. With the channel
/// queue the task is recorded as a failure, which is retried once the
/// indexer is ready.
fn schedule(settings: &Settings, storage: &Storage, task: IndexTask) -> Result<()> {
    if !settings.indexer.repo_indexer_enabled {
        println!("Code indexing is disabled; {} not scheduled", task);
        return Ok(());
    }
    match settings.indexer.queue.kind {
        QueueKind::Persistent => {
            storage
                .enqueue_task(&task)
                .context("Failed to journal index task")?;
        }
        QueueKind::Channel => {
            storage
                .record_failure(&FailureRecord::new(task, "scheduled while daemon was offline"))
                .context("Failed to record index task")?;
        }
    }
    println!("Scheduled {}", task);
    Ok(())
}

/// Handle `failures` subcommands.
pub fn handle_failures(config_path: Option<&str>, command: FailureCommands) -> Result<()> {
    let settings = load_settings(config_path)?;
    let storage = open_storage(&settings)?;
    failure_command(&storage, command)
}

fn failure_command(storage: &Storage, command: FailureCommands) -> Result<()> {
    match command {
        FailureCommands::List => {
            let failures = storage.list_failures().context("Failed to list failures")?;
            if failures.is_empty() {
                println!("No failed tasks");
            }
            for failure in failures {
                println!("{:<16} {}", failure.task().to_string(), failure.error);
            }
        }
        FailureCommands::Clear => {
            let cleared = storage.clear_failures().context("Failed to clear failures")?;
            println!("Cleared {} failed tasks", cleared);
        }
    }
    Ok(())
}

/// Show metadata store statistics.
pub fn show_stats(config_path: Option<&str>) -> Result<()> {
    let settings = load_settings(config_path)?;
    let storage = open_storage(&settings)?;
    let stats = storage.get_stats().context("Failed to read statistics")?;

    println!("Database: {}", settings.db_path);
    println!("  Repositories:    {}", stats.repo_count);
    println!("  Indexed (rows):  {}", stats.status_count);
    println!("  Queued tasks:    {}", stats.queued_count);
    println!("  Failed tasks:    {}", stats.failure_count);
    Ok(())
}
