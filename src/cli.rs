//! Command-line surface. Grounded on the teacher's `clap::Parser`-derived
//! `Args` struct in `main.rs`, generalized from a single flat flag set to
//! subcommands plus a global `--remote` switch that redirects the
//! config/state/reenable commands at a running instance's admin API instead
//! of the local filesystem.

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "tgfeed", about = "Feed-ingestion and notification pipeline")]
pub struct Cli {
    /// Base URL of a running instance's admin API (e.g. `http://localhost:8080`).
    /// When set, `edit`/`feeds`/`reenable` operate through the admin HTTP
    /// surface instead of reading/writing `STATE_DIRECTORY` directly.
    #[arg(long, global = true)]
    pub remote: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one fetch/decide/send cycle.
    Run {
        /// Fetch and decide as usual, but skip sending, marking seen, and
        /// persisting state.
        #[arg(long)]
        dry: bool,
    },
    /// Open the rules script in `$EDITOR`, validate it, and save it back.
    Edit,
    /// List configured feeds and their current state.
    Feeds,
    /// Clear the disabled flag and error count for one feed.
    Reenable {
        /// The feed URL as it appears in the rules script.
        url: String,
    },
    /// Serve the admin HTTP API (and block until terminated).
    Admin,
}
