//! Configuration types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub safety: SafetyConfig,

    #[serde(default)]
    pub agents: AgentsConfig,
}

/// Where the shared documents live and how long to wait for their locks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding every shared document.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default = "default_tasks_file")]
    pub tasks_file: String,

    #[serde(default = "default_registry_file")]
    pub registry_file: String,

    #[serde(default = "default_safety_log_file")]
    pub safety_log_file: String,

    /// Give up on a contended document lock after this long.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Pause between attempts on a contended lock.
    #[serde(default = "default_lock_retry_ms")]
    pub lock_retry_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            tasks_file: default_tasks_file(),
            registry_file: default_registry_file(),
            safety_log_file: default_safety_log_file(),
            lock_timeout_ms: default_lock_timeout_ms(),
            lock_retry_ms: default_lock_retry_ms(),
        }
    }
}

impl StoreConfig {
    pub fn tasks_path(&self) -> PathBuf {
        self.state_dir.join(&self.tasks_file)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.state_dir.join(&self.registry_file)
    }

    pub fn safety_log_path(&self) -> PathBuf {
        self.state_dir.join(&self.safety_log_file)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_retry_interval(&self) -> Duration {
        Duration::from_millis(self.lock_retry_ms.max(1))
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".swarm")
}

fn default_tasks_file() -> String {
    "tasks.json".to_string()
}

fn default_registry_file() -> String {
    "agents.json".to_string()
}

fn default_safety_log_file() -> String {
    "safety_log.json".to_string()
}

fn default_lock_timeout_ms() -> u64 {
    10_000
}

fn default_lock_retry_ms() -> u64 {
    50
}

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Identical consecutive calls that count as a doom loop.
    #[serde(default = "default_doom_loop_threshold")]
    pub doom_loop_threshold: usize,

    /// Consecutive failures before an agent should stop.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Failures kept in the per-agent error history.
    #[serde(default = "default_error_history")]
    pub error_history: usize,

    /// Events kept in the shared safety log.
    #[serde(default = "default_log_cap")]
    pub log_cap: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            doom_loop_threshold: default_doom_loop_threshold(),
            max_consecutive_failures: default_max_consecutive_failures(),
            error_history: default_error_history(),
            log_cap: default_log_cap(),
        }
    }
}

fn default_doom_loop_threshold() -> usize {
    3
}

fn default_max_consecutive_failures() -> u32 {
    5
}

fn default_error_history() -> usize {
    20
}

fn default_log_cap() -> usize {
    1000
}

/// Population settings consumed by the external spawn policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Upper bound on concurrently running agents.
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            max_agents: default_max_agents(),
        }
    }
}

fn default_max_agents() -> usize {
    8
}
