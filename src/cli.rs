//! Command line argument parsing.
//!
//! Uses clap derive macros; the commands themselves are run by
//! [`crate::run`].

use std::time::Duration;

use clap::{Args, Parser, Subcommand};

/// Run commands on many hosts, but only on one of them at a time.
///
/// Every invocation races for a named lock in the shared store. The winner
/// runs the command; everyone else skips this cycle.
#[derive(Parser, Debug)]
#[command(name = "shedlock")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command while holding a lock.
    ///
    /// Exits with the command's status, or 0 without running it when the
    /// lock is held elsewhere.
    Run(RunArgs),

    /// Print the lock record of a lock as JSON.
    Status(StatusArgs),

    /// Create the lock table if the backend needs one.
    InitSchema,
}

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Lock name.
    #[arg(long)]
    pub name: String,

    /// Release the lock after this long even if the command still runs (e.g. "10m").
    #[arg(long, value_parser = parse_duration)]
    pub lock_at_most_for: Option<Duration>,

    /// Keep the lock at least this long, even if the command finishes sooner (e.g. "1m").
    #[arg(long, value_parser = parse_duration)]
    pub lock_at_least_for: Option<Duration>,

    /// Keep extending the lock while the command runs.
    #[arg(long)]
    pub keep_alive: bool,

    /// Command to run, after `--`.
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Arguments for the `status` command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Lock name.
    pub name: String,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value)
        .map_err(|e| format!("invalid duration '{value}': {e}"))
}
