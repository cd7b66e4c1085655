use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tasksync", about = "Two-way sync between tasks and GitHub issues")]
pub struct Cli {
    /// Path to the config file [default: ~/.tasksync/config.toml]
    #[arg(long, env = "TASKSYNC_CONFIG", global = true)]
    pub config: Option<String>,

    /// Path to the SQLite database [default: from config, else ~/.tasksync/tasks.db]
    #[arg(long, env = "TASKSYNC_DB", global = true)]
    pub db: Option<String>,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create database and tables (idempotent)
    Init,

    /// Run one reconciliation between the database and GitHub
    Sync {
        /// Pull every issue instead of only those updated since the last sync
        #[arg(long)]
        all_issues: bool,
    },

    /// List sync links
    Links {
        /// Only links whose issue is still open
        #[arg(long)]
        open: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the remaining GitHub API quota
    RateLimit,
}
