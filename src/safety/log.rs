//! Append-only shared safety log.

use crate::error::Result;
use crate::store::DocumentStore;
use crate::types::{SafetyEvent, SafetyEventKind, now};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Events kept by default; older ones are dropped first.
pub const DEFAULT_LOG_CAP: usize = 1000;

/// Handle on the safety log document (a JSON array of events).
#[derive(Debug, Clone)]
pub struct SafetyLog {
    docs: DocumentStore,
    path: PathBuf,
    cap: usize,
}

impl SafetyLog {
    pub fn new(docs: DocumentStore, path: impl Into<PathBuf>) -> Self {
        Self {
            docs,
            path: path.into(),
            cap: DEFAULT_LOG_CAP,
        }
    }

    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = cap.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event, truncating the log to the newest `cap` entries.
    pub fn append(&self, kind: SafetyEventKind, data: Value) -> Result<SafetyEvent> {
        let event = SafetyEvent {
            time: now(),
            kind,
            data,
        };
        let cap = self.cap;
        self.docs
            .try_update(&self.path, Vec::new, |events: &mut Vec<SafetyEvent>| {
                events.push(event.clone());
                if events.len() > cap {
                    let excess = events.len() - cap;
                    events.drain(..excess);
                }
                Ok(())
            })?;
        Ok(event)
    }

    /// Append without surfacing failures; breakers must never raise.
    pub(crate) fn record(&self, kind: SafetyEventKind, data: Value) {
        if let Err(err) = self.append(kind, data) {
            warn!(path = %self.path.display(), error = %err, "Failed to append safety event");
        }
    }

    /// The newest `limit` events, oldest first, optionally of one kind.
    pub fn recent(&self, limit: usize, kind: Option<SafetyEventKind>) -> Result<Vec<SafetyEvent>> {
        let events: Vec<SafetyEvent> = self.docs.read(&self.path, Vec::new)?;
        let mut matching: Vec<SafetyEvent> = events
            .into_iter()
            .filter(|e| kind.is_none_or(|k| e.kind == k))
            .collect();
        let skip = matching.len().saturating_sub(limit);
        matching.drain(..skip);
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn log(dir: &TempDir, cap: usize) -> SafetyLog {
        SafetyLog::new(
            DocumentStore::in_memory_locks(Duration::from_secs(1)),
            dir.path().join("safety_log.json"),
        )
        .with_cap(cap)
    }

    #[test]
    fn append_truncates_oldest_first() {
        let dir = TempDir::new().unwrap();
        let log = log(&dir, 3);
        for i in 0..5 {
            log.append(SafetyEventKind::DoomLoop, json!({"n": i})).unwrap();
        }
        let events = log.recent(10, None).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].data["n"], 2);
        assert_eq!(events[2].data["n"], 4);
    }

    #[test]
    fn recent_filters_by_kind_and_limit() {
        let dir = TempDir::new().unwrap();
        let log = log(&dir, DEFAULT_LOG_CAP);
        log.append(SafetyEventKind::DoomLoop, json!({})).unwrap();
        log.append(SafetyEventKind::MaxMistakes, json!({"n": 1})).unwrap();
        log.append(SafetyEventKind::MaxMistakes, json!({"n": 2})).unwrap();

        let events = log.recent(1, Some(SafetyEventKind::MaxMistakes)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["n"], 2);
    }

    #[test]
    fn log_document_is_a_plain_array() {
        let dir = TempDir::new().unwrap();
        let log = log(&dir, DEFAULT_LOG_CAP);
        log.append(SafetyEventKind::DoomLoop, json!({"agent_id": "a"}))
            .unwrap();
        let raw: Value =
            serde_json::from_slice(&std::fs::read(log.path()).unwrap()).unwrap();
        assert_eq!(raw[0]["type"], "doom_loop");
        assert_eq!(raw[0]["data"]["agent_id"], "a");
    }
}
