//! Work source: abstraction over the external task queue.
//!
//! The daemon never talks to the queue CLI directly; it goes through
//! [`WorkSource`] so the pool, poller, and reconciler are testable against
//! an in-memory fake. The production implementation shells out to `prog`
//! via the command runner.

mod prog;

use async_trait::async_trait;
use serde::Deserialize;

use crate::runner::RunnerError;
use aether_protocol::{Role, TaskInfo};

pub use prog::ProgWorkSource;

#[derive(Debug, thiserror::Error)]
pub enum WorkSourceError {
    #[error("queue command '{operation}' failed: {message}")]
    CommandFailed { operation: String, message: String },

    #[error("could not parse queue output for '{operation}': {message}")]
    ParseFailed { operation: String, message: String },

    #[error("invalid task id from queue: '{id}'")]
    InvalidTaskId { id: String },

    #[error("failed to run queue command: {source}")]
    Runner {
        #[from]
        source: RunnerError,
    },
}

/// Queue item metadata returned by `show`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskDetail {
    pub id: String,
    /// Item kind as reported by the queue; drives role inference.
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub definition_of_done: String,
}

/// Task ids use a tight character set: first char alphanumeric, the rest
/// alphanumeric plus `.`, `_`, `-`. Ids from external sources failing this
/// predicate are rejected at ingress.
pub fn is_valid_task_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Infer the behavioral role from queue item metadata.
///
/// Planning items get the planner prompt; everything else is a worker.
pub fn role_for_kind(kind: &str) -> Role {
    match kind {
        "plan" | "planning" => Role::Planner,
        _ => Role::Worker,
    }
}

/// Abstraction over the external task queue.
#[async_trait]
pub trait WorkSource: Send + Sync {
    /// Items in "ready" state for this project, highest priority first.
    async fn ready(&self) -> Result<Vec<TaskInfo>, WorkSourceError>;

    /// Metadata for one item.
    async fn show(&self, task_id: &str) -> Result<TaskDetail, WorkSourceError>;

    /// Transition an item from "ready" to "in progress". The daemon's point
    /// of no return for that item.
    async fn claim(&self, task_id: &str) -> Result<(), WorkSourceError>;

    /// Mark an item done.
    async fn complete(&self, task_id: &str) -> Result<(), WorkSourceError>;

    /// Ids of items currently claimed ("in progress") for this project.
    async fn in_progress(&self) -> Result<Vec<String>, WorkSourceError>;

    /// Ids of items awaiting review for this project.
    async fn reviewing(&self) -> Result<Vec<String>, WorkSourceError>;

    /// Most recent activity-log line for an item, if any.
    async fn latest_log_line(&self, task_id: &str) -> Result<Option<String>, WorkSourceError>;

    /// The first `limit` ready items, for status display.
    async fn queue_head(&self, limit: usize) -> Result<Vec<TaskInfo>, WorkSourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_predicate_accepts_typical_ids() {
        for id in ["ts-abc", "a", "T123", "x.y_z-9", "0leading-digit"] {
            assert!(is_valid_task_id(id), "{id} should be valid");
        }
    }

    #[test]
    fn test_task_id_predicate_rejects_bad_ids() {
        for id in ["", "-lead", ".lead", "_lead", "has space", "a/b", "a;b", "ü"] {
            assert!(!is_valid_task_id(id), "{id} should be invalid");
        }
    }

    #[test]
    fn test_role_for_kind() {
        assert_eq!(role_for_kind("task"), Role::Worker);
        assert_eq!(role_for_kind("plan"), Role::Planner);
        assert_eq!(role_for_kind("planning"), Role::Planner);
        assert_eq!(role_for_kind(""), Role::Worker);
        assert_eq!(role_for_kind("bug"), Role::Worker);
    }

    #[test]
    fn test_task_detail_deserializes_prog_show_json() {
        let detail: TaskDetail = serde_json::from_str(
            r#"{"id":"ts-abc","type":"task","title":"Do it","definition_of_done":"Tests pass"}"#,
        )
        .unwrap();
        assert_eq!(detail.id, "ts-abc");
        assert_eq!(detail.kind, "task");
        assert_eq!(detail.definition_of_done, "Tests pass");
    }
}
