//! CLI module
//!
//! Command-line interface for running syncs.
//!
//! # Commands
//!
//! - `check` - Test connection to the database
//! - `validate` - Validate the configuration file
//! - `read` - Run the initial sync and emit RECORD/STATE messages
//! - `plan` - Show the chunk queries for a table

mod commands;
mod runner;

pub use commands::{Cli, Commands, OutputFormat};
pub use runner::Runner;
