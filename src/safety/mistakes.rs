//! Consecutive-failure breaker.

use super::log::SafetyLog;
use crate::types::{SafetyEventKind, Timestamp, now};
use serde::Serialize;
use serde_json::json;
use std::collections::VecDeque;
use tracing::warn;

/// Errors included in a status snapshot.
const STATUS_RECENT_ERRORS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub time: Timestamp,
    pub error: String,
}

/// Snapshot for external reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MistakeStatus {
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub should_terminate: bool,
    pub recent_errors: Vec<ErrorRecord>,
}

/// Counts consecutive failures; any success resets the count.
#[derive(Debug, Clone)]
pub struct MistakeTracker {
    agent_id: String,
    max_consecutive: u32,
    count: u32,
    last_error: Option<String>,
    history: VecDeque<ErrorRecord>,
    history_cap: usize,
    log: Option<SafetyLog>,
}

impl MistakeTracker {
    pub fn new(agent_id: impl Into<String>, max_consecutive: u32) -> Self {
        Self {
            agent_id: agent_id.into(),
            max_consecutive: max_consecutive.max(1),
            count: 0,
            last_error: None,
            history: VecDeque::new(),
            history_cap: 20,
            log: None,
        }
    }

    pub fn with_history_cap(mut self, cap: usize) -> Self {
        self.history_cap = cap.max(1);
        self
    }

    pub fn with_log(mut self, log: SafetyLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn record_success(&mut self) {
        self.count = 0;
        self.last_error = None;
    }

    /// Returns `true` once the agent should terminate.
    pub fn record_failure(&mut self, error: &str) -> bool {
        self.count = self.count.saturating_add(1);
        self.last_error = Some(error.to_string());
        self.history.push_back(ErrorRecord {
            time: now(),
            error: error.to_string(),
        });
        while self.history.len() > self.history_cap {
            self.history.pop_front();
        }

        let should_terminate = self.should_terminate();
        if should_terminate {
            warn!(agent_id = %self.agent_id, failures = self.count, error, "Too many consecutive failures");
            if let Some(ref log) = self.log {
                log.record(
                    SafetyEventKind::MaxMistakes,
                    json!({
                        "agent_id": self.agent_id,
                        "consecutive_failures": self.count,
                        "last_error": error,
                        "recent_errors": self.recent_errors(),
                    }),
                );
            }
        }
        should_terminate
    }

    pub fn should_terminate(&self) -> bool {
        self.count >= self.max_consecutive
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.count
    }

    pub fn get_status(&self) -> MistakeStatus {
        MistakeStatus {
            consecutive_failures: self.count,
            last_error: self.last_error.clone(),
            should_terminate: self.should_terminate(),
            recent_errors: self.recent_errors(),
        }
    }

    fn recent_errors(&self) -> Vec<ErrorRecord> {
        let skip = self.history.len().saturating_sub(STATUS_RECENT_ERRORS);
        self.history.iter().skip(skip).cloned().collect()
    }
}
