//! Per-agent safety breakers.
//!
//! Breaker state lives in the agent's own memory; only trips are written to
//! the shared [`SafetyLog`]. Breakers are advisory: they return a signal and
//! leave termination to the caller.

pub mod doom_loop;
pub mod log;
pub mod mistakes;

pub use doom_loop::{DoomLoopDetector, signature};
pub use log::{DEFAULT_LOG_CAP, SafetyLog};
pub use mistakes::{ErrorRecord, MistakeStatus, MistakeTracker};

use crate::config::SafetyConfig;

/// Both breakers for one agent.
#[derive(Debug, Clone)]
pub struct SafetyMonitor {
    pub doom_loop: DoomLoopDetector,
    pub mistakes: MistakeTracker,
}

impl SafetyMonitor {
    pub fn new(agent_id: &str, config: &SafetyConfig, log: Option<SafetyLog>) -> Self {
        let mut doom_loop = DoomLoopDetector::new(agent_id, config.doom_loop_threshold);
        let mut mistakes = MistakeTracker::new(agent_id, config.max_consecutive_failures)
            .with_history_cap(config.error_history);
        if let Some(log) = log {
            let log = log.with_cap(config.log_cap);
            doom_loop = doom_loop.with_log(log.clone());
            mistakes = mistakes.with_log(log);
        }
        Self {
            doom_loop,
            mistakes,
        }
    }
}
