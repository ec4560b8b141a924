//! Command-line argument definitions.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

/// Work-hour tracker.
///
/// Runs a local daemon that turns development activity into fixed five-hour
/// sessions and idle-bounded work blocks, and reports on them.
#[derive(Debug, Parser)]
#[command(name = "wh", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the tracking daemon in the foreground.
    Daemon,

    /// Show the daemon's health and live sessions.
    Status,

    /// Inspect sessions held by the daemon.
    #[command(subcommand)]
    Sessions(SessionsAction),

    /// Close every active session and work block.
    CloseAll {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Submit an activity, as an editor or agent hook would.
    Submit {
        /// Project the activity belongs to.
        #[arg(long)]
        project: String,

        /// Project root; defaults to the current directory.
        #[arg(long)]
        path: Option<String>,

        /// Activity type (command, edit, query, ...).
        #[arg(long = "type", default_value = "command")]
        activity_type: String,

        /// Reporting source; defaults to hook.
        #[arg(long)]
        source: Option<String>,

        /// The command that was run, if any.
        #[arg(long)]
        command: Option<String>,

        #[arg(long)]
        description: Option<String>,
    },

    /// Summarize recorded work hours.
    Report {
        /// Report on a single UTC day (YYYY-MM-DD) instead of today.
        #[arg(long, conflicts_with = "week")]
        date: Option<NaiveDate>,

        /// Report on the current week (Monday to Sunday).
        #[arg(long)]
        week: bool,

        /// Report on the current calendar month.
        #[arg(long, conflicts_with_all = ["week", "date"])]
        month: bool,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// Session listings.
#[derive(Debug, Subcommand)]
pub enum SessionsAction {
    /// List active sessions.
    Active {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Summarize active sessions with their current project.
    Pending {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List the work blocks of one session.
    Blocks {
        /// Session identifier.
        session_id: String,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}
