//! Command-line interface built on clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cronicle_hooks::EventQuery;

/// Run Cronicle events and follow their jobs.
#[derive(Debug, Parser)]
#[command(name = "cronicle-hooks", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to ./cronicle.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log notification traffic.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Runs an event and waits for its job.
    Run {
        /// Event id, or title with --title.
        event: String,

        /// Look the event up by title instead of id.
        #[arg(long)]
        title: bool,

        /// Return once the job has started.
        #[arg(long)]
        detach: bool,

        /// Seconds between progress refreshes while waiting.
        #[arg(long, default_value_t = 2)]
        poll_secs: u64,
    },

    /// Prints an event definition as JSON.
    Event {
        /// Event id, or title with --title.
        event: String,

        #[arg(long)]
        title: bool,
    },
}

pub fn event_query(event: &str, by_title: bool) -> Option<EventQuery> {
    if by_title {
        EventQuery::from_parts(None, Some(event))
    } else {
        EventQuery::from_parts(Some(event), None)
    }
}
