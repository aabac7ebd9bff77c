//! Core record types for the shared JSON documents.
//!
//! Optional fields are omitted on write and tolerated as missing on read.
//! Fields this crate does not know about are kept in `extra` so that records
//! written by other tools survive a rewrite unchanged.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Timestamp type used in every document.
pub type Timestamp = DateTime<Utc>;

/// Current time.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Parse an RFC 3339 timestamp, or a zone-less ISO 8601 one taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Serde readers accepting whatever [`parse_timestamp`] does.
/// Writes stay RFC 3339.
mod lenient_time {
    use super::{Timestamp, parse_timestamp};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    fn parse<E: Error>(raw: &str) -> Result<Timestamp, E> {
        parse_timestamp(raw).ok_or_else(|| E::custom(format!("invalid timestamp '{raw}'")))
    }

    pub fn required<'de, D: Deserializer<'de>>(d: D) -> Result<Timestamp, D::Error> {
        parse(&String::deserialize(d)?)
    }

    pub fn optional<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Timestamp>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|raw| parse(&raw))
            .transpose()
    }
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Open,
    Claimed,
    Completed,
    Verified,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::Claimed => "claimed",
            TaskStatus::Completed => "completed",
            TaskStatus::Verified => "verified",
            TaskStatus::Blocked => "blocked",
        }
    }

    /// Verified and blocked records are kept for audit only.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Verified | TaskStatus::Blocked)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(TaskStatus::Open),
            "claimed" => Ok(TaskStatus::Claimed),
            "completed" => Ok(TaskStatus::Completed),
            "verified" => Ok(TaskStatus::Verified),
            "blocked" => Ok(TaskStatus::Blocked),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

/// One unit of work, possibly nested under a parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_time::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub claimed_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_time::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<Timestamp>,
    #[serde(
        default,
        deserialize_with = "lenient_time::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub verified_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,

    // Boomerang links
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtasks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    /// A fresh open task with only id and title set.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            task_type: None,
            priority: None,
            app: None,
            status: TaskStatus::Open,
            claimed_by: None,
            claimed_at: None,
            completed_by: None,
            completed_at: None,
            verified_at: None,
            blocked_reason: None,
            parent_id: None,
            subtasks: Vec::new(),
            result_summary: None,
            extra: Map::new(),
        }
    }

    /// Parents coordinate their subtasks and are never claimed directly.
    pub fn is_parent(&self) -> bool {
        !self.subtasks.is_empty()
    }

    pub(crate) fn clear_claim(&mut self) {
        self.claimed_by = None;
        self.claimed_at = None;
    }
}

/// Input for root task insertion.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    /// Explicit id; a petname id is generated when absent.
    pub id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub task_type: Option<String>,
    pub priority: Option<String>,
    pub app: Option<String>,
}

/// Task list filter. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<String>,
    pub app: Option<String>,
    pub claimed_by: Option<String>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        if self.status.is_some_and(|s| s != task.status) {
            return false;
        }
        if let Some(ref t) = self.task_type {
            if task.task_type.as_deref() != Some(t.as_str()) {
                return false;
            }
        }
        if let Some(ref app) = self.app {
            if task.app.as_deref() != Some(app.as_str()) {
                return false;
            }
        }
        if let Some(ref agent) = self.claimed_by {
            if task.claimed_by.as_deref() != Some(agent.as_str()) {
                return false;
            }
        }
        true
    }
}

/// The task document: `{"tasks": [...], "updated": ...}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDocument {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(
        default,
        deserialize_with = "lenient_time::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated: Option<Timestamp>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskDocument {
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Every parent/child link problem in the document.
    ///
    /// A link is sound when the child names the parent in `parent_id` and the
    /// parent lists the child in `subtasks`.
    pub fn link_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for task in &self.tasks {
            if !seen.insert(task.id.as_str()) {
                problems.push(format!("duplicate task id {}", task.id));
            }
        }

        for task in &self.tasks {
            if let Some(ref parent_id) = task.parent_id {
                match self.get(parent_id) {
                    None => problems.push(format!(
                        "task {} references missing parent {}",
                        task.id, parent_id
                    )),
                    Some(parent) if !parent.subtasks.contains(&task.id) => problems.push(format!(
                        "parent {} does not list subtask {}",
                        parent_id, task.id
                    )),
                    Some(_) => {}
                }
            }
            for child_id in &task.subtasks {
                match self.get(child_id) {
                    None => problems.push(format!(
                        "task {} lists missing subtask {}",
                        task.id, child_id
                    )),
                    Some(child) if child.parent_id.as_deref() != Some(task.id.as_str()) => {
                        problems.push(format!(
                            "subtask {} does not point back to parent {}",
                            child_id, task.id
                        ))
                    }
                    Some(_) => {}
                }
            }
        }

        problems
    }
}

/// Stored form of a registry entry (the map key is the agent id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEntry {
    #[serde(default)]
    pub cli: String,
    #[serde(default)]
    pub genome: String,
    #[serde(default)]
    pub pid: u32,
    #[serde(
        default,
        deserialize_with = "lenient_time::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub registered_at: Option<Timestamp>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The registry document: `{"agents": {agent_id: {...}}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryDocument {
    #[serde(default)]
    pub agents: BTreeMap<String, AgentEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A registered agent as returned by queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub cli: String,
    pub genome: String,
    pub pid: u32,
    #[serde(
        default,
        deserialize_with = "lenient_time::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub registered_at: Option<Timestamp>,
}

impl AgentRecord {
    pub fn from_entry(agent_id: &str, entry: &AgentEntry) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            cli: entry.cli.clone(),
            genome: entry.genome.clone(),
            pid: entry.pid,
            registered_at: entry.registered_at,
        }
    }
}

/// Registry snapshot partitioned by liveness.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentQuery {
    pub running: Vec<AgentRecord>,
    pub dead: Vec<AgentRecord>,
    /// Number of running agents.
    pub count: usize,
}

/// Safety log event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyEventKind {
    DoomLoop,
    MaxMistakes,
    /// Any type this crate does not emit.
    #[serde(other)]
    Other,
}

impl FromStr for SafetyEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "doom_loop" => Ok(SafetyEventKind::DoomLoop),
            "max_mistakes" => Ok(SafetyEventKind::MaxMistakes),
            other => Err(format!("unknown safety event type '{other}'")),
        }
    }
}

/// One entry of the append-only safety log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyEvent {
    #[serde(deserialize_with = "lenient_time::required")]
    pub time: Timestamp,
    #[serde(rename = "type")]
    pub kind: SafetyEventKind,
    #[serde(default)]
    pub data: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn zone_less_timestamps_read_as_utc() {
        let task: Task = serde_json::from_value(json!({
            "id": "DEV-001",
            "title": "x",
            "status": "claimed",
            "claimed_at": "2025-01-01T12:00:00.123456",
            "completed_at": "2025-01-02 08:30:00",
            "verified_at": null,
        }))
        .unwrap();
        let claimed = task.claimed_at.unwrap();
        assert_eq!(claimed.to_rfc3339(), "2025-01-01T12:00:00.123456+00:00");
        assert!(task.completed_at.is_some());
        assert!(task.verified_at.is_none());

        // Rewritten with an explicit zone.
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["claimed_at"], "2025-01-01T12:00:00.123456Z");
    }

    #[test]
    fn offset_timestamps_are_normalized_to_utc() {
        let ts = parse_timestamp("2025-01-01T14:00:00+02:00").unwrap();
        assert_eq!(ts, parse_timestamp("2025-01-01T12:00:00Z").unwrap());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn task_tolerates_missing_optional_fields() {
        let task: Task = serde_json::from_value(json!({"id": "DEV-001", "title": "x"})).unwrap();
        assert_eq!(task.status, TaskStatus::Open);
        assert!(task.subtasks.is_empty());
        assert!(task.claimed_by.is_none());
    }

    #[test]
    fn task_omits_absent_fields_and_keeps_unknown_ones() {
        let task: Task = serde_json::from_value(json!({
            "id": "DEV-001",
            "title": "x",
            "type": "bug",
            "status": "open",
            "reviewer_notes": "keep me"
        }))
        .unwrap();
        let out = serde_json::to_value(&task).unwrap();
        let obj = out.as_object().unwrap();
        assert!(!obj.contains_key("claimed_by"));
        assert!(!obj.contains_key("subtasks"));
        assert_eq!(obj["type"], "bug");
        assert_eq!(obj["reviewer_notes"], "keep me");
    }

    #[test]
    fn link_problems_detect_asymmetry() {
        let mut parent = Task::new("P", "parent");
        parent.subtasks.push("C".into());
        let child = Task::new("C", "child");
        let doc = TaskDocument {
            tasks: vec![parent, child],
            ..Default::default()
        };
        let problems = doc.link_problems();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("does not point back"));
    }

    #[test]
    fn unknown_safety_event_kind_is_tolerated() {
        let ev: SafetyEvent = serde_json::from_value(json!({
            "time": "2026-01-01T00:00:00Z",
            "type": "rate_limited",
            "data": {}
        }))
        .unwrap();
        assert_eq!(ev.kind, SafetyEventKind::Other);
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("Claimed".parse::<TaskStatus>().unwrap(), TaskStatus::Claimed);
        assert!("done".parse::<TaskStatus>().is_err());
    }
}
