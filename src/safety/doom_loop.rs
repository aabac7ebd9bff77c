//! Detects an agent repeating the same call with the same arguments.

use super::log::SafetyLog;
use crate::types::SafetyEventKind;
use serde_json::{Value, json};
use std::collections::VecDeque;
use tracing::warn;

/// Call signature: tool name plus the canonical (key-sorted) JSON of its arguments.
pub fn signature(tool_name: &str, args: &Value) -> String {
    format!("{tool_name}:{args}")
}

/// Sliding window over the last `threshold` call signatures.
#[derive(Debug, Clone)]
pub struct DoomLoopDetector {
    agent_id: String,
    threshold: usize,
    window: VecDeque<String>,
    log: Option<SafetyLog>,
}

impl DoomLoopDetector {
    pub fn new(agent_id: impl Into<String>, threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            agent_id: agent_id.into(),
            threshold,
            window: VecDeque::with_capacity(threshold),
            log: None,
        }
    }

    /// Report trips to the shared safety log.
    pub fn with_log(mut self, log: SafetyLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Record a call. Returns `true` when the window is full of identical calls.
    pub fn check(&mut self, tool_name: &str, args: &Value) -> bool {
        self.window.push_back(signature(tool_name, args));
        while self.window.len() > self.threshold {
            self.window.pop_front();
        }

        let tripped = self.window.len() == self.threshold
            && self.window.iter().all(|s| *s == self.window[0]);

        if tripped {
            warn!(agent_id = %self.agent_id, tool = tool_name, repeats = self.threshold, "Doom loop detected");
            if let Some(ref log) = self.log {
                log.record(
                    SafetyEventKind::DoomLoop,
                    json!({
                        "agent_id": self.agent_id,
                        "tool": tool_name,
                        "args": args,
                        "repeats": self.threshold,
                    }),
                );
            }
        }
        tripped
    }

    /// Forget the window after a genuine change of state.
    pub fn reset(&mut self) {
        self.window.clear();
    }
}
