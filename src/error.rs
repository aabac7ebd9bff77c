//! Error taxonomy for the coordination layer.
//!
//! Every fallible operation returns [`CoordError`]. The CLI renders errors as
//! an [`ErrorReport`] so external tooling can branch on a stable [`ErrorCode`].

use crate::types::TaskStatus;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Kind of entity an id refers to.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Task,
    Agent,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Task => write!(f, "task"),
            EntityKind::Agent => write!(f, "agent"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CoordError {
    #[error("timed out after {waited:?} waiting for lock on {}", .path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("failed to persist {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {}: {source}", .path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("refusing to overwrite unparsable document {}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: EntityKind, id: String },

    #[error("task {task_id} is not open (status '{status}'{})", owner_suffix(.owner))]
    AlreadyClaimed {
        task_id: String,
        status: TaskStatus,
        owner: Option<String>,
    },

    #[error("cannot {action} task {task_id} in status '{status}'")]
    InvalidTransition {
        task_id: String,
        action: &'static str,
        status: TaskStatus,
    },

    #[error("task document has broken parent/child links: {}", .0.join("; "))]
    BrokenLinks(Vec<String>),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

fn owner_suffix(owner: &Option<String>) -> String {
    match owner {
        Some(owner) => format!(", claimed by {owner}"),
        None => String::new(),
    }
}

impl CoordError {
    pub fn task_not_found(id: impl Into<String>) -> Self {
        CoordError::NotFound {
            kind: EntityKind::Task,
            id: id.into(),
        }
    }

    pub fn agent_not_found(id: impl Into<String>) -> Self {
        CoordError::NotFound {
            kind: EntityKind::Agent,
            id: id.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            CoordError::LockTimeout { .. } => ErrorCode::LockTimeout,
            CoordError::Persist { .. } | CoordError::Encode { .. } => ErrorCode::PersistError,
            CoordError::Io { .. } => ErrorCode::IoError,
            CoordError::Corrupt { .. } => ErrorCode::CorruptDocument,
            CoordError::NotFound {
                kind: EntityKind::Task,
                ..
            } => ErrorCode::TaskNotFound,
            CoordError::NotFound {
                kind: EntityKind::Agent,
                ..
            } => ErrorCode::AgentNotFound,
            CoordError::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            CoordError::AlreadyClaimed { .. } => ErrorCode::AlreadyClaimed,
            CoordError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            CoordError::BrokenLinks(_) => ErrorCode::BrokenLinks,
            CoordError::InvalidInput(_) => ErrorCode::InvalidFieldValue,
        }
    }

    /// Whether retrying the same call later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordError::LockTimeout { .. } | CoordError::Persist { .. } | CoordError::Io { .. }
        )
    }

    /// Expected outcome under contention: another process got there first.
    pub fn is_lost_race(&self) -> bool {
        matches!(
            self,
            CoordError::AlreadyClaimed { .. }
                | CoordError::InvalidTransition { .. }
                | CoordError::LockTimeout { .. }
        )
    }
}

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Contention / storage
    LockTimeout,
    PersistError,
    IoError,
    CorruptDocument,

    // Not found errors
    TaskNotFound,
    AgentNotFound,

    // Conflict errors
    AlreadyExists,
    AlreadyClaimed,
    InvalidTransition,
    BrokenLinks,

    // Validation
    InvalidFieldValue,
}

/// Machine-readable error output.
#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl From<&CoordError> for ErrorReport {
    fn from(err: &CoordError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// Result type for coordination operations.
pub type Result<T> = std::result::Result<T, CoordError>;
