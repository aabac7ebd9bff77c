//! CLI command definitions for swarm-coord
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

pub mod agents;
pub mod safety;
pub mod tasks;

use agents::AgentsCommand;
use clap::{Args, Parser, Subcommand, ValueEnum};
use safety::SafetyCommand;
use std::path::PathBuf;
use tasks::TasksCommand;

/// Output format flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FormatArg {
    #[default]
    Json,
    Markdown,
}

/// Default seconds between reconciliation passes in watch mode.
pub const DEFAULT_REAP_INTERVAL_SECS: u64 = 30;

/// Shared-state coordination for agent swarms
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Directory holding the shared documents (overrides config)
    #[arg(short, long, global = true, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    /// Output format for command results
    #[arg(short, long, value_enum, default_value_t = FormatArg::Json, global = true)]
    pub format: FormatArg,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Work with the shared task queue
    #[command(subcommand)]
    Tasks(TasksCommand),

    /// Work with the agent registry
    #[command(subcommand)]
    Agents(AgentsCommand),

    /// Release claims held by dead agents
    Reap(ReapArgs),

    /// Inspect the safety log or replay a transcript through the breakers
    #[command(subcommand)]
    Safety(SafetyCommand),
}

/// Arguments for the reap subcommand
#[derive(Args, Debug)]
pub struct ReapArgs {
    /// Also remove dead agents from the registry
    #[arg(long)]
    pub cleanup: bool,

    /// Keep reconciling until interrupted
    #[arg(long)]
    pub watch: bool,

    /// Seconds between passes in watch mode
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_REAP_INTERVAL_SECS)]
    pub interval: u64,
}
