//! Code index daemon
//!
//! Keeps a code search index in sync with the repositories registered in
//! the metadata store.
//!
//! # Usage
//!
//! ```bash
//! code-index start [--db-path PATH] [--index-path PATH]
//! code-index repo add 42 alice widgets ~/src/widgets
//! code-index search "fn main" --repo 42
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (`<config dir>/code-index/config.toml`)
//! 3. Environment variables (`CODE_INDEX_*`)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use code_index_daemon::{
    handle_failures, handle_repo, run_search, show_stats, start_daemon, Cli, Commands,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Start {
            db_path,
            index_path,
        } => {
            start_daemon(
                config,
                db_path.as_deref(),
                index_path.as_deref(),
                cli.log_level.as_deref(),
            )
            .await?;
        }
        Commands::Search {
            keyword,
            repo,
            page,
            page_size,
        } => {
            run_search(config, &keyword, &repo, page, page_size)?;
        }
        Commands::Repo { command } => {
            handle_repo(config, command)?;
        }
        Commands::Failures { command } => {
            handle_failures(config, command)?;
        }
        Commands::Stats => {
            show_stats(config)?;
        }
    }

    Ok(())
}
