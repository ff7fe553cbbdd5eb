//! Code index daemon library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands, FailureCommands, RepoCommands};
pub use commands::{
    handle_failures, handle_repo, load_settings, run_search, show_stats, start_daemon,
};
