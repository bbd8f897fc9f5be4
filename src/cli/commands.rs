//! CLI commands and argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Resumable ctid initial sync for PostgreSQL
#[derive(Parser, Debug)]
#[command(name = "pgctid-sync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Source configuration file (YAML)
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "json")]
    pub format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Test connection to the database
    Check,

    /// Validate the configuration file
    Validate,

    /// Run the initial sync of every stream that needs one
    Read {
        /// Configured catalog (YAML or JSON)
        #[arg(long)]
        catalog: PathBuf,

        /// State file from a previous run (JSON)
        #[arg(short, long)]
        state: Option<PathBuf>,

        /// Inline state JSON
        #[arg(long, conflicts_with = "state")]
        state_json: Option<String>,

        /// Transaction watermark file (JSON); queried from the server when omitted
        #[arg(long)]
        xmin_status: Option<PathBuf>,
    },

    /// Print the chunk queries a sync of one table would run
    Plan {
        /// Table name
        #[arg(long)]
        table: String,

        /// Schema
        #[arg(long, default_value = "public")]
        namespace: String,

        /// Resume after this address, e.g. "(12,4)"
        #[arg(long, default_value = "(0,0)")]
        start: String,
    },
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output (one message per line)
    Json,
    /// Human-readable output
    Pretty,
}
