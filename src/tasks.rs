//! Hierarchical task queue ("boomerang" parent/subtask pattern).
//!
//! Every mutating operation is a single [`DocumentStore::try_update`], so the
//! check and the change happen under one document lock. Two agents racing to
//! claim the same task are serialized by that lock: exactly one sees `open`.

use crate::error::{CoordError, EntityKind, Result};
use crate::store::DocumentStore;
use crate::types::{NewTask, Task, TaskDocument, TaskFilter, TaskStatus, now};
use petname::{Generator, Petnames};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Attempts at generating a collision-free id before giving up.
const MAX_ID_ATTEMPTS: usize = 100;

/// Words in a generated petname id or suffix.
const ID_WORDS: u8 = 2;

/// Task queue stored in one JSON document.
#[derive(Debug, Clone)]
pub struct TaskStore {
    docs: DocumentStore,
    path: PathBuf,
}

impl TaskStore {
    pub fn new(docs: DocumentStore, path: impl Into<PathBuf>) -> Self {
        Self {
            docs,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the whole document.
    pub fn document(&self) -> Result<TaskDocument> {
        self.docs.read(&self.path, TaskDocument::default)
    }

    /// Tasks matching `filter`, in document order.
    pub fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let doc = self.document()?;
        Ok(doc.tasks.into_iter().filter(|t| filter.matches(t)).collect())
    }

    pub fn get(&self, task_id: &str) -> Result<Task> {
        self.document()?
            .tasks
            .into_iter()
            .find(|t| t.id == task_id)
            .ok_or_else(|| CoordError::task_not_found(task_id))
    }

    /// Insert a root task.
    pub fn add(&self, new: NewTask) -> Result<Task> {
        if new.title.trim().is_empty() {
            return Err(CoordError::InvalidInput("task title is required".into()));
        }
        if let Some(ref id) = new.id {
            validate_id(id)?;
        }

        let task = self.mutate(|doc| {
            let id = match new.id {
                Some(id) if doc.contains(&id) => {
                    return Err(CoordError::AlreadyExists {
                        kind: EntityKind::Task,
                        id,
                    });
                }
                Some(id) => id,
                None => unique_id(doc, |_| generate_words())?,
            };

            let mut task = Task::new(id, new.title);
            task.description = new.description;
            task.task_type = new.task_type;
            task.priority = new.priority;
            task.app = new.app;
            doc.tasks.push(task.clone());
            Ok(task)
        })?;

        info!(task_id = %task.id, "Task added");
        Ok(task)
    }

    /// Claim an open leaf task for `agent_id`.
    pub fn claim(&self, task_id: &str, agent_id: &str) -> Result<Task> {
        if agent_id.trim().is_empty() {
            return Err(CoordError::InvalidInput("agent id is required".into()));
        }

        let task = self.mutate(|doc| {
            let task = find_mut(doc, task_id)?;
            if task.status != TaskStatus::Open {
                return Err(CoordError::AlreadyClaimed {
                    task_id: task_id.to_string(),
                    status: task.status,
                    owner: task.claimed_by.clone(),
                });
            }
            if task.is_parent() {
                return Err(CoordError::InvalidTransition {
                    task_id: task_id.to_string(),
                    action: "claim parent",
                    status: task.status,
                });
            }

            task.status = TaskStatus::Claimed;
            task.claimed_by = Some(agent_id.to_string());
            task.claimed_at = Some(now());
            Ok(task.clone())
        })?;

        info!(task_id, agent_id, "Task claimed");
        Ok(task)
    }

    /// Finish a claimed task.
    pub fn complete(&self, task_id: &str) -> Result<Task> {
        let task = self.mutate(|doc| {
            let task = find_mut(doc, task_id)?;
            require_status(task, TaskStatus::Claimed, "complete")?;
            mark_completed(task);
            Ok(task.clone())
        })?;

        info!(task_id, completed_by = ?task.completed_by, "Task completed");
        Ok(task)
    }

    /// Return a claimed task to the open pool.
    pub fn release(&self, task_id: &str) -> Result<Task> {
        let (task, previous_owner) = self.mutate(|doc| {
            let task = find_mut(doc, task_id)?;
            require_status(task, TaskStatus::Claimed, "release")?;
            let previous_owner = task.claimed_by.clone();
            task.status = TaskStatus::Open;
            task.clear_claim();
            Ok((task.clone(), previous_owner))
        })?;

        info!(task_id, previous_owner = ?previous_owner, "Task released");
        Ok(task)
    }

    /// Mark a completed task as verified.
    pub fn verify(&self, task_id: &str) -> Result<Task> {
        let task = self.mutate(|doc| {
            let task = find_mut(doc, task_id)?;
            require_status(task, TaskStatus::Completed, "verify")?;
            task.status = TaskStatus::Verified;
            task.verified_at = Some(now());
            Ok(task.clone())
        })?;

        info!(task_id, "Task verified");
        Ok(task)
    }

    /// Park an open or claimed task with a reason.
    pub fn block(&self, task_id: &str, reason: &str) -> Result<Task> {
        let task = self.mutate(|doc| {
            let task = find_mut(doc, task_id)?;
            if !matches!(task.status, TaskStatus::Open | TaskStatus::Claimed) {
                return Err(CoordError::InvalidTransition {
                    task_id: task_id.to_string(),
                    action: "block",
                    status: task.status,
                });
            }
            task.status = TaskStatus::Blocked;
            task.blocked_reason = Some(reason.to_string());
            task.clear_claim();
            Ok(task.clone())
        })?;

        info!(task_id, reason, "Task blocked");
        Ok(task)
    }

    /// Create an open child under `parent_id` and link it, in one update.
    ///
    /// The child id is the parent id plus a random suffix, checked against
    /// every existing id inside the same transform.
    pub fn create_subtask(
        &self,
        parent_id: &str,
        title: &str,
        task_type: Option<&str>,
    ) -> Result<Task> {
        if title.trim().is_empty() {
            return Err(CoordError::InvalidInput("subtask title is required".into()));
        }

        let child = self.mutate(|doc| {
            let parent = doc
                .get(parent_id)
                .ok_or_else(|| CoordError::task_not_found(parent_id))?;
            if parent.status == TaskStatus::Claimed {
                return Err(CoordError::InvalidTransition {
                    task_id: parent_id.to_string(),
                    action: "add subtask to",
                    status: parent.status,
                });
            }
            let app = parent.app.clone();
            let priority = parent.priority.clone();

            let id = unique_id(doc, |_| format!("{parent_id}-{}", generate_words()))?;
            let mut child = Task::new(id, title);
            child.task_type = task_type.map(str::to_string);
            child.app = app;
            child.priority = priority;
            child.parent_id = Some(parent_id.to_string());

            find_mut(doc, parent_id)?.subtasks.push(child.id.clone());
            doc.tasks.push(child.clone());
            Ok(child)
        })?;

        info!(parent_id, subtask_id = %child.id, "Subtask created");
        Ok(child)
    }

    /// Complete a subtask and record the summary its parent will collect.
    ///
    /// The parent is left untouched; it learns of completion by polling
    /// [`get_subtasks`](Self::get_subtasks).
    pub fn complete_subtask(&self, subtask_id: &str, result_summary: &str) -> Result<Task> {
        let task = self.mutate(|doc| {
            let task = find_mut(doc, subtask_id)?;
            if task.parent_id.is_none() {
                return Err(CoordError::InvalidInput(format!(
                    "task {subtask_id} is not a subtask"
                )));
            }
            if !matches!(task.status, TaskStatus::Open | TaskStatus::Claimed) {
                return Err(CoordError::InvalidTransition {
                    task_id: subtask_id.to_string(),
                    action: "complete",
                    status: task.status,
                });
            }
            mark_completed(task);
            task.result_summary = Some(result_summary.to_string());
            Ok(task.clone())
        })?;

        info!(subtask_id, parent_id = ?task.parent_id, "Subtask completed");
        Ok(task)
    }

    /// Children of `parent_id`, in the order they were created.
    pub fn get_subtasks(&self, parent_id: &str) -> Result<Vec<Task>> {
        let doc = self.document()?;
        let parent = doc
            .get(parent_id)
            .ok_or_else(|| CoordError::task_not_found(parent_id))?;
        Ok(parent
            .subtasks
            .iter()
            .filter_map(|id| doc.get(id))
            .filter(|child| child.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect())
    }

    /// Parent of `subtask_id`, or `None` for a root task.
    pub fn get_parent(&self, subtask_id: &str) -> Result<Option<Task>> {
        let doc = self.document()?;
        let task = doc
            .get(subtask_id)
            .ok_or_else(|| CoordError::task_not_found(subtask_id))?;
        Ok(task
            .parent_id
            .as_deref()
            .and_then(|pid| doc.get(pid))
            .filter(|parent| parent.subtasks.iter().any(|id| id == subtask_id))
            .cloned())
    }

    /// Release every claim held by one of `agent_ids`. Returns the released ids.
    pub fn release_claims_by(&self, agent_ids: &BTreeSet<String>) -> Result<Vec<String>> {
        if agent_ids.is_empty() {
            return Ok(Vec::new());
        }

        let released = self.mutate(|doc| {
            let mut released = Vec::new();
            for task in doc.tasks.iter_mut() {
                let orphaned = task.status == TaskStatus::Claimed
                    && task
                        .claimed_by
                        .as_ref()
                        .is_some_and(|owner| agent_ids.contains(owner));
                if orphaned {
                    debug!(task_id = %task.id, owner = ?task.claimed_by, "Releasing orphaned claim");
                    task.status = TaskStatus::Open;
                    task.clear_claim();
                    released.push(task.id.clone());
                }
            }
            Ok(released)
        })?;

        if !released.is_empty() {
            info!(count = released.len(), "Released claims held by dead agents");
        }
        Ok(released)
    }

    /// Read-only report of parent/child link violations.
    pub fn check(&self) -> Result<Vec<String>> {
        Ok(self.document()?.link_problems())
    }

    /// Apply `f` and commit only if the result keeps every link intact.
    fn mutate<R>(&self, f: impl FnOnce(&mut TaskDocument) -> Result<R>) -> Result<R> {
        self.docs
            .try_update(&self.path, TaskDocument::default, |doc: &mut TaskDocument| {
                let out = f(doc)?;
                let problems = doc.link_problems();
                if !problems.is_empty() {
                    return Err(CoordError::BrokenLinks(problems));
                }
                doc.updated = Some(now());
                Ok(out)
            })
    }
}

fn find_mut<'a>(doc: &'a mut TaskDocument, task_id: &str) -> Result<&'a mut Task> {
    doc.get_mut(task_id)
        .ok_or_else(|| CoordError::task_not_found(task_id))
}

fn require_status(task: &Task, expected: TaskStatus, action: &'static str) -> Result<()> {
    if task.status == expected {
        Ok(())
    } else {
        Err(CoordError::InvalidTransition {
            task_id: task.id.clone(),
            action,
            status: task.status,
        })
    }
}

fn mark_completed(task: &mut Task) {
    task.status = TaskStatus::Completed;
    task.completed_at = Some(now());
    task.completed_by = task.claimed_by.take();
    task.claimed_at = None;
}

fn validate_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(CoordError::InvalidInput("task id cannot be empty".into()));
    }
    if id.chars().any(char::is_whitespace) {
        return Err(CoordError::InvalidInput(format!(
            "task id '{id}' must not contain whitespace"
        )));
    }
    Ok(())
}

fn generate_words() -> String {
    Petnames::medium()
        .generate_one(ID_WORDS, "-")
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis().to_string())
}

/// Generate ids until one is not already in `doc`.
fn unique_id(doc: &TaskDocument, mut candidate: impl FnMut(usize) -> String) -> Result<String> {
    for attempt in 0..MAX_ID_ATTEMPTS {
        let id = candidate(attempt);
        if !doc.contains(&id) {
            return Ok(id);
        }
    }
    Err(CoordError::InvalidInput(format!(
        "failed to generate a unique task id after {MAX_ID_ATTEMPTS} attempts"
    )))
}
