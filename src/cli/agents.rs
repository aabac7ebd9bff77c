//! Agent registry subcommands.

use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum AgentsCommand {
    /// Record a spawned agent process
    Register {
        #[arg(long)]
        id: String,
        #[arg(long)]
        cli: String,
        #[arg(long)]
        genome: String,
        /// Process id (defaults to the invoking process)
        #[arg(long)]
        pid: Option<u32>,
    },

    /// Remove an agent record
    Deregister { id: String },

    /// Split registered agents into running and dead
    List {
        #[arg(long)]
        cli: Option<String>,
    },

    /// Remove every dead agent record
    Cleanup,

    /// Free slots under the population cap
    Capacity {
        /// Cap (defaults to agents.max_agents from config)
        #[arg(long)]
        max: Option<usize>,
    },
}
