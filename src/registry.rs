//! Liveness-checked directory of spawned agent processes.
//!
//! Liveness is derived from the recorded pid on every query and never stored.
//! This ties the registry to the host that owns the document.

use crate::error::{CoordError, Result};
use crate::store::DocumentStore;
use crate::types::{AgentEntry, AgentQuery, AgentRecord, RegistryDocument, now};
use serde_json::Map;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Maximum length for agent IDs.
pub const MAX_AGENT_ID_LEN: usize = 64;

/// Answers whether a pid currently denotes a live process.
pub trait ProcessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Probe backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProcessProbe;

impl ProcessProbe for OsProcessProbe {
    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        // pid 0 would address our own process group.
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if pid <= 0 {
            return false;
        }
        if unsafe { libc::kill(pid, 0) } == 0 {
            return true;
        }
        // Exists but owned by another user.
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    fn is_alive(&self, pid: u32) -> bool {
        pid != 0 && pid == std::process::id()
    }
}

/// Agent directory stored in one JSON document.
#[derive(Clone)]
pub struct AgentRegistry {
    docs: DocumentStore,
    path: PathBuf,
    probe: Arc<dyn ProcessProbe>,
}

impl AgentRegistry {
    pub fn new(docs: DocumentStore, path: impl Into<PathBuf>) -> Self {
        Self::with_probe(docs, path, Arc::new(OsProcessProbe))
    }

    pub fn with_probe(
        docs: DocumentStore,
        path: impl Into<PathBuf>,
        probe: Arc<dyn ProcessProbe>,
    ) -> Self {
        Self {
            docs,
            path: path.into(),
            probe,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace the record for `agent_id`.
    pub fn register(&self, agent_id: &str, cli: &str, genome: &str, pid: u32) -> Result<AgentRecord> {
        validate_agent_id(agent_id)?;

        let record = self
            .docs
            .try_update(&self.path, RegistryDocument::default, |doc: &mut RegistryDocument| {
                let entry = AgentEntry {
                    cli: cli.to_string(),
                    genome: genome.to_string(),
                    pid,
                    registered_at: Some(now()),
                    extra: Map::new(),
                };
                let record = AgentRecord::from_entry(agent_id, &entry);
                doc.agents.insert(agent_id.to_string(), entry);
                Ok(record)
            })?;

        info!(agent_id, cli, genome, pid, "Agent registered");
        Ok(record)
    }

    /// Remove the record for `agent_id`. Returns whether one existed.
    pub fn deregister(&self, agent_id: &str) -> Result<bool> {
        let removed = self
            .docs
            .try_update(&self.path, RegistryDocument::default, |doc: &mut RegistryDocument| {
                Ok(doc.agents.remove(agent_id).is_some())
            })?;

        if removed {
            info!(agent_id, "Agent deregistered");
        }
        Ok(removed)
    }

    /// All records, optionally only those launched by `filter_cli`,
    /// partitioned into running and dead.
    pub fn query(&self, filter_cli: Option<&str>) -> Result<AgentQuery> {
        let doc: RegistryDocument = self.docs.read(&self.path, RegistryDocument::default)?;

        let mut result = AgentQuery::default();
        for (agent_id, entry) in &doc.agents {
            if filter_cli.is_some_and(|cli| cli != entry.cli) {
                continue;
            }
            let record = AgentRecord::from_entry(agent_id, entry);
            if self.probe.is_alive(entry.pid) {
                result.running.push(record);
            } else {
                result.dead.push(record);
            }
        }
        result.count = result.running.len();
        Ok(result)
    }

    /// Ids of registered agents whose process is gone.
    pub fn dead_agent_ids(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .query(None)?
            .dead
            .into_iter()
            .map(|r| r.agent_id)
            .collect())
    }

    /// Drop every dead record. Returns how many were removed.
    pub fn cleanup(&self) -> Result<usize> {
        let removed = self
            .docs
            .try_update(&self.path, RegistryDocument::default, |doc: &mut RegistryDocument| {
                let dead: Vec<String> = doc
                    .agents
                    .iter()
                    .filter(|(_, entry)| !self.probe.is_alive(entry.pid))
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in &dead {
                    doc.agents.remove(id);
                }
                Ok(dead)
            })?;

        if !removed.is_empty() {
            info!(count = removed.len(), agents = ?removed, "Removed dead agents");
        }
        Ok(removed.len())
    }

    /// Drop the records of `agent_ids` whose process is still gone.
    ///
    /// Liveness is re-checked under the lock, so an id that was dead when the
    /// set was built but answers now is kept. Ids outside the set are never
    /// touched, even if they died since.
    pub fn remove_dead(&self, agent_ids: &BTreeSet<String>) -> Result<usize> {
        if agent_ids.is_empty() {
            return Ok(0);
        }
        let removed = self
            .docs
            .try_update(&self.path, RegistryDocument::default, |doc: &mut RegistryDocument| {
                let dead: Vec<String> = agent_ids
                    .iter()
                    .filter(|id| {
                        doc.agents
                            .get(id.as_str())
                            .is_some_and(|entry| !self.probe.is_alive(entry.pid))
                    })
                    .cloned()
                    .collect();
                for id in &dead {
                    doc.agents.remove(id);
                }
                Ok(dead)
            })?;

        if !removed.is_empty() {
            info!(count = removed.len(), agents = ?removed, "Removed reaped agents");
        }
        Ok(removed.len())
    }

    /// How many more agents may start under a population cap of `max_agents`.
    pub fn capacity(&self, max_agents: usize) -> Result<usize> {
        Ok(max_agents.saturating_sub(self.query(None)?.count))
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn validate_agent_id(agent_id: &str) -> Result<()> {
    if agent_id.trim().is_empty() {
        return Err(CoordError::InvalidInput("agent id cannot be empty".into()));
    }
    if agent_id.len() > MAX_AGENT_ID_LEN {
        return Err(CoordError::InvalidInput(format!(
            "agent id must be at most {MAX_AGENT_ID_LEN} characters, got {}",
            agent_id.len()
        )));
    }
    Ok(())
}
