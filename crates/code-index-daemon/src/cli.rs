//! CLI argument parsing for the code index daemon.
//!
//! CLI flags override every other config source.

use clap::{Parser, Subcommand};

/// Code index daemon
///
/// Keeps a code search index in sync with registered repositories.
#[derive(Parser, Debug)]
#[command(name = "code-index")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default <config dir>/code-index/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Daemon commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the indexer until interrupted
    Start {
        /// Override metadata store path
        #[arg(long)]
        db_path: Option<String>,

        /// Override search index path
        #[arg(long)]
        index_path: Option<String>,
    },

    /// Search the code index
    Search {
        /// Keyword or phrase to search for
        keyword: String,

        /// Restrict to these repository ids (repeatable)
        #[arg(short, long)]
        repo: Vec<i64>,

        /// 1-based result page
        #[arg(short, long, default_value = "1")]
        page: i64,

        /// Results per page
        #[arg(long, default_value = "10")]
        page_size: usize,
    },

    /// Manage repositories in the metadata store
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },

    /// Inspect dead-lettered index tasks
    Failures {
        #[command(subcommand)]
        command: FailureCommands,
    },

    /// Show metadata store statistics
    Stats,
}

/// Repository subcommands
///
/// These open the metadata store directly, so the daemon must not be running.
#[derive(Subcommand, Debug, Clone)]
pub enum RepoCommands {
    /// Register a repository and schedule it for indexing
    Add {
        id: i64,
        owner: String,
        name: String,
        /// Working directory to index
        path: String,
    },

    /// Remove a repository and schedule its removal from the index
    Remove { id: i64 },

    /// List registered repositories
    List,
}

/// Dead-letter subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum FailureCommands {
    /// List failed tasks awaiting a retry
    List,

    /// Drop every failed task
    Clear,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_start() {
        let cli = Cli::parse_from(["code-index", "start"]);
        match cli.command {
            Commands::Start {
                db_path,
                index_path,
            } => {
                assert!(db_path.is_none());
                assert!(index_path.is_none());
            }
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_cli_start_with_paths() {
        let cli = Cli::parse_from([
            "code-index",
            "start",
            "--db-path",
            "/custom/db",
            "--index-path",
            "/custom/index",
        ]);
        match cli.command {
            Commands::Start {
                db_path,
                index_path,
            } => {
                assert_eq!(db_path, Some("/custom/db".to_string()));
                assert_eq!(index_path, Some("/custom/index".to_string()));
            }
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::parse_from([
            "code-index",
            "stats",
            "--config",
            "/path/to/config.toml",
            "--log-level",
            "debug",
        ]);
        assert_eq!(cli.config, Some("/path/to/config.toml".to_string()));
        assert_eq!(cli.log_level, Some("debug".to_string()));
        assert!(matches!(cli.command, Commands::Stats));
    }

    #[test]
    fn test_cli_search() {
        let cli = Cli::parse_from([
            "code-index",
            "search",
            "fn main",
            "-r",
            "3",
            "-r",
            "7",
            "--page",
            "2",
        ]);
        match cli.command {
            Commands::Search {
                keyword,
                repo,
                page,
                page_size,
            } => {
                assert_eq!(keyword, "fn main");
                assert_eq!(repo, vec![3, 7]);
                assert_eq!(page, 2);
                assert_eq!(page_size, 10);
            }
            _ => panic!("Expected Search command"),
        }
    }

    #[test]
    fn test_cli_repo_add() {
        let cli = Cli::parse_from(["code-index", "repo", "add", "42", "alice", "widgets", "/src"]);
        match cli.command {
            Commands::Repo {
                command:
                    RepoCommands::Add {
                        id,
                        owner,
                        name,
                        path,
                    },
            } => {
                assert_eq!(id, 42);
                assert_eq!(owner, "alice");
                assert_eq!(name, "widgets");
                assert_eq!(path, "/src");
            }
            _ => panic!("Expected Repo Add command"),
        }
    }

    #[test]
    fn test_cli_failures_clear() {
        let cli = Cli::parse_from(["code-index", "failures", "clear"]);
        assert!(matches!(
            cli.command,
            Commands::Failures {
                command: FailureCommands::Clear
            }
        ));
    }
}
