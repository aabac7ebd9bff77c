//! Output formatting utilities for markdown and JSON.

use crate::types::{AgentQuery, AgentRecord, Task, TaskStatus};
use serde::Serialize;

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Markdown,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "markdown" | "md" => Some(OutputFormat::Markdown),
            _ => None,
        }
    }
}

/// Pretty JSON rendering of any record.
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
}

/// Format a single task as markdown.
pub fn format_task_markdown(task: &Task) -> String {
    let mut md = String::new();

    md.push_str(&format!("## Task: {}\n", task.title));
    md.push_str(&format!("- **id**: `{}`\n", task.id));
    md.push_str(&format!("- **status**: {}\n", task.status));

    if let Some(ref t) = task.task_type {
        md.push_str(&format!("- **type**: {}\n", t));
    }
    if let Some(ref p) = task.priority {
        md.push_str(&format!("- **priority**: {}\n", p));
    }
    if let Some(ref app) = task.app {
        md.push_str(&format!("- **app**: {}\n", app));
    }
    if let Some(ref owner) = task.claimed_by {
        md.push_str(&format!("- **claimed_by**: {}\n", owner));
    }
    if let Some(ref parent_id) = task.parent_id {
        md.push_str(&format!("- **parent_id**: `{}`\n", parent_id));
    }
    if !task.subtasks.is_empty() {
        let children: Vec<String> = task.subtasks.iter().map(|id| format!("`{}`", id)).collect();
        md.push_str(&format!("- **subtasks**: {}\n", children.join(", ")));
    }
    if let Some(ref reason) = task.blocked_reason {
        md.push_str(&format!("- **blocked**: {}\n", reason));
    }

    if let Some(ref desc) = task.description {
        md.push_str("\n### Description\n");
        md.push_str(desc);
        md.push('\n');
    }
    if let Some(ref summary) = task.result_summary {
        md.push_str("\n### Result\n");
        md.push_str(summary);
        md.push('\n');
    }

    md
}

/// Format a list of tasks as markdown, grouped by status.
pub fn format_tasks_markdown(tasks: &[Task]) -> String {
    let mut md = String::new();

    // Verified and blocked records no longer move; call them out in the count.
    let closed = tasks.iter().filter(|t| t.status.is_terminal()).count();
    if closed == 0 {
        md.push_str(&format!("# Tasks ({})\n\n", tasks.len()));
    } else {
        md.push_str(&format!("# Tasks ({}, {} closed)\n\n", tasks.len(), closed));
    }

    // Active work first, then the backlog, then finished records.
    let order = [
        TaskStatus::Claimed,
        TaskStatus::Open,
        TaskStatus::Blocked,
        TaskStatus::Completed,
        TaskStatus::Verified,
    ];
    for status in order {
        let group: Vec<&Task> = tasks.iter().filter(|t| t.status == status).collect();
        if group.is_empty() {
            continue;
        }
        md.push_str(&format!("## {}\n\n", capitalize(status.as_str())));
        for task in group {
            md.push_str(&format_task_short(task));
        }
        md.push('\n');
    }

    md
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().chain(chars).collect(),
    }
}

/// Format a task in short form for lists.
fn format_task_short(task: &Task) -> String {
    let owner = task
        .claimed_by
        .as_ref()
        .map(|o| format!(" @{}", o))
        .unwrap_or_default();

    let children = if task.subtasks.is_empty() {
        String::new()
    } else {
        format!(" [{} subtasks]", task.subtasks.len())
    };

    format!("- {} `{}`{}{}\n", task.title, task.id, owner, children)
}

/// Format a registry query as markdown.
pub fn format_agents_markdown(query: &AgentQuery) -> String {
    let mut md = String::new();

    md.push_str(&format!("# Agents ({} running)\n\n", query.count));

    if !query.running.is_empty() {
        md.push_str("## Running\n\n");
        for agent in &query.running {
            md.push_str(&format_agent_short(agent));
        }
        md.push('\n');
    }
    if !query.dead.is_empty() {
        md.push_str("## Dead\n\n");
        for agent in &query.dead {
            md.push_str(&format_agent_short(agent));
        }
        md.push('\n');
    }

    md
}

fn format_agent_short(agent: &AgentRecord) -> String {
    format!(
        "- `{}` {} / {} (pid {})\n",
        agent.agent_id, agent.cli, agent.genome, agent.pid
    )
}
