//! Reaping of claims held by agents that died without releasing them.
//!
//! Only agents the registry classifies as dead are reaped. Claims by ids that
//! were never registered are left alone. The registry and the task document
//! are locked one after the other, never together.

use crate::error::Result;
use crate::registry::AgentRegistry;
use crate::tasks::TaskStore;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReapReport {
    /// Registered agents whose process is gone.
    pub dead_agents: Vec<String>,
    /// Tasks returned to `open`.
    pub released: Vec<String>,
    /// Registry records removed (only when cleanup was requested).
    pub removed_agents: usize,
}

/// Release claims held by dead agents, then optionally drop their records.
///
/// Cleanup runs after the release so a crash in between leaves the dead
/// records in place for the next pass. It removes only the agents whose
/// claims were just released; an agent found dead later keeps its record
/// until a pass releases its claims.
pub fn reap_orphaned_claims(
    tasks: &TaskStore,
    registry: &AgentRegistry,
    cleanup: bool,
) -> Result<ReapReport> {
    let dead = registry.dead_agent_ids()?;
    let released = tasks.release_claims_by(&dead)?;
    let removed_agents = if cleanup { registry.remove_dead(&dead)? } else { 0 };

    let report = ReapReport {
        dead_agents: dead.into_iter().collect(),
        released,
        removed_agents,
    };
    if !report.released.is_empty() || report.removed_agents > 0 {
        info!(
            released = report.released.len(),
            removed = report.removed_agents,
            "Reconciled orphaned claims"
        );
    }
    Ok(report)
}
