//! Sync adapter CLI
//!
//! Command-line tools for inspecting and repairing sync controller state.
//!
//! # Commands
//!
//! - `status` - Show the backoff window and node staleness
//! - `backoff` - Request a backoff as a server would
//! - `mark-stale` - Set or clear the stale node flag
//! - `purge` - Reset backoff state
//! - `show-account` - Print the pickled account parameters
//! - `scope` - Print the prefs scope for an account

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use syncadapter_core::GLOBAL_PREFS_SCOPE;
use tracing_subscriber::EnvFilter;

/// Sync adapter maintenance tools.
#[derive(Parser)]
#[command(name = "syncadapter")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the sync data directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the backoff window and node staleness
    Status {
        /// Account prefs scope
        #[arg(short, long, default_value = GLOBAL_PREFS_SCOPE)]
        scope: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Request a fuzzed backoff, as a server response would
    Backoff {
        /// Account prefs scope
        #[arg(short, long, default_value = GLOBAL_PREFS_SCOPE)]
        scope: String,

        /// Backoff duration in milliseconds
        #[arg(short, long)]
        millis: i64,
    },

    /// Mark the node assignment stale
    MarkStale {
        /// Account prefs scope
        #[arg(short, long, default_value = GLOBAL_PREFS_SCOPE)]
        scope: String,

        /// Clear the flag instead of setting it
        #[arg(short, long)]
        clear: bool,
    },

    /// Reset backoff state
    Purge {
        /// Account prefs scope
        #[arg(short, long, default_value = GLOBAL_PREFS_SCOPE)]
        scope: String,
    },

    /// Print the pickled account parameters with secrets redacted
    ShowAccount {
        /// Pickle file name inside the data directory
        #[arg(short, long, default_value = "sync.account.json")]
        file: String,

        /// Output format (text, json)
        #[arg(short = 'o', long, default_value = "text")]
        format: String,
    },

    /// Print the prefs scope for an account
    Scope {
        /// Account username
        username: String,

        /// Storage server URL
        server_url: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Status { scope, format } => {
            let path = cli.path.ok_or("Data directory required for status")?;
            commands::status::run(&path, &scope, &format)?;
        }
        Commands::Backoff { scope, millis } => {
            let path = cli.path.ok_or("Data directory required for backoff")?;
            commands::backoff::run(&path, &scope, millis)?;
        }
        Commands::MarkStale { scope, clear } => {
            let path = cli.path.ok_or("Data directory required for mark-stale")?;
            commands::mark_stale::run(&path, &scope, !clear)?;
        }
        Commands::Purge { scope } => {
            let path = cli.path.ok_or("Data directory required for purge")?;
            commands::purge::run(&path, &scope)?;
        }
        Commands::ShowAccount { file, format } => {
            let path = cli.path.ok_or("Data directory required for show-account")?;
            commands::show_account::run(&path, &file, &format)?;
        }
        Commands::Scope {
            username,
            server_url,
        } => {
            println!("{}", syncadapter_core::prefs_scope(&username, &server_url));
        }
        Commands::Version => {
            println!("syncadapter CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
