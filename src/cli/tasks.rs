//! Task queue subcommands.

use crate::types::{NewTask, TaskFilter, TaskStatus};
use clap::{Args, Subcommand};

#[derive(Subcommand, Debug)]
pub enum TasksCommand {
    /// List tasks matching every given filter
    List(ListArgs),

    /// Show one task
    Get { id: String },

    /// Insert a root task
    Add(AddArgs),

    /// Claim an open task for an agent
    Claim {
        id: String,
        #[arg(long)]
        agent: String,
    },

    /// Mark a claimed task completed
    Complete { id: String },

    /// Return a claimed task to the queue
    Release { id: String },

    /// Mark a completed task verified
    Verify { id: String },

    /// Block an open or claimed task
    Block {
        id: String,
        #[arg(long)]
        reason: String,
    },

    /// Create a subtask under a parent
    Subtask {
        /// Parent task id
        id: String,
        #[arg(long)]
        title: String,
        #[arg(long = "type", value_name = "TYPE")]
        task_type: Option<String>,
    },

    /// Complete a subtask with a result summary
    Finish {
        id: String,
        #[arg(long)]
        summary: String,
    },

    /// List a parent's subtasks in creation order
    Children { id: String },

    /// Show a subtask's parent
    Parent { id: String },

    /// Report broken parent/child links
    Check,
}

#[derive(Args, Debug, Default)]
pub struct ListArgs {
    #[arg(long, value_parser = parse_status)]
    pub status: Option<TaskStatus>,

    #[arg(long = "type", value_name = "TYPE")]
    pub task_type: Option<String>,

    #[arg(long)]
    pub app: Option<String>,

    #[arg(long, value_name = "AGENT")]
    pub claimed_by: Option<String>,
}

impl ListArgs {
    pub fn to_filter(&self) -> TaskFilter {
        TaskFilter {
            status: self.status,
            task_type: self.task_type.clone(),
            app: self.app.clone(),
            claimed_by: self.claimed_by.clone(),
        }
    }
}

#[derive(Args, Debug)]
pub struct AddArgs {
    #[arg(long)]
    pub title: String,

    /// Explicit id (generated when omitted)
    #[arg(long)]
    pub id: Option<String>,

    #[arg(long = "type", value_name = "TYPE")]
    pub task_type: Option<String>,

    #[arg(long)]
    pub priority: Option<String>,

    #[arg(long)]
    pub app: Option<String>,

    #[arg(long)]
    pub description: Option<String>,
}

impl From<AddArgs> for NewTask {
    fn from(args: AddArgs) -> Self {
        NewTask {
            id: args.id,
            title: args.title,
            description: args.description,
            task_type: args.task_type,
            priority: args.priority,
            app: args.app,
        }
    }
}

fn parse_status(s: &str) -> Result<TaskStatus, String> {
    s.parse()
}
