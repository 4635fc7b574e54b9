//! `prog` CLI work source.
//!
//! Wraps the external queue CLI behind the [`WorkSource`] trait. List output
//! is line-columnar (`<id> <priority> <title...>`, whitespace-separated,
//! title keeps its spaces); `show` emits a JSON document.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{TaskDetail, WorkSource, WorkSourceError, is_valid_task_id};
use crate::runner::{CmdOutput, CommandRunner};
use aether_protocol::TaskInfo;

pub struct ProgWorkSource {
    runner: Arc<dyn CommandRunner>,
    project: String,
}

impl ProgWorkSource {
    pub fn new(runner: Arc<dyn CommandRunner>, project: impl Into<String>) -> Self {
        Self {
            runner,
            project: project.into(),
        }
    }

    async fn run_prog(
        &self,
        operation: &str,
        args: &[String],
    ) -> Result<CmdOutput, WorkSourceError> {
        let output = self.runner.run("prog", args, None).await?;
        if !output.success() {
            return Err(WorkSourceError::CommandFailed {
                operation: operation.to_string(),
                message: format!(
                    "exit {}: {}",
                    output.status,
                    output.stderr_trimmed()
                ),
            });
        }
        Ok(output)
    }

    /// List item ids in a given queue status for this project.
    async fn list_ids(&self, status: &str, operation: &str) -> Result<Vec<String>, WorkSourceError> {
        let args = vec![
            "list".to_string(),
            "-p".to_string(),
            self.project.clone(),
            "-s".to_string(),
            status.to_string(),
        ];
        let output = self.run_prog(operation, &args).await?;

        let mut ids = Vec::new();
        for line in output.stdout.lines() {
            let Some(id) = line.split_whitespace().next() else {
                continue;
            };
            if !is_valid_task_id(id) {
                warn!(
                    event = "core.worksource.invalid_id_skipped",
                    operation = operation,
                    id = id,
                );
                continue;
            }
            ids.push(id.to_string());
        }
        Ok(ids)
    }
}

/// Parse one `prog list` line: `<id> <priority> <title...>`.
///
/// Returns `None` for blank lines, malformed rows, and rows whose id fails
/// the task-id predicate — the caller logs and moves on.
fn parse_list_line(line: &str) -> Option<TaskInfo> {
    let mut parts = line.split_whitespace();
    let id = parts.next()?;
    let priority: i64 = parts.next()?.parse().ok()?;
    if !is_valid_task_id(id) {
        return None;
    }
    let title = {
        // Everything after the second column, original spacing collapsed
        let rest: Vec<&str> = parts.collect();
        rest.join(" ")
    };
    Some(TaskInfo {
        id: id.to_string(),
        priority,
        title,
    })
}

#[async_trait]
impl WorkSource for ProgWorkSource {
    async fn ready(&self) -> Result<Vec<TaskInfo>, WorkSourceError> {
        let args = vec![
            "list".to_string(),
            "-p".to_string(),
            self.project.clone(),
            "-s".to_string(),
            "ready".to_string(),
        ];
        let output = self.run_prog("ready", &args).await?;

        let mut tasks = Vec::new();
        for line in output.stdout.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_list_line(line) {
                Some(task) => tasks.push(task),
                None => {
                    warn!(
                        event = "core.worksource.unparsed_line_skipped",
                        line = line,
                    );
                }
            }
        }
        debug!(
            event = "core.worksource.ready_completed",
            count = tasks.len(),
        );
        Ok(tasks)
    }

    async fn show(&self, task_id: &str) -> Result<TaskDetail, WorkSourceError> {
        if !is_valid_task_id(task_id) {
            return Err(WorkSourceError::InvalidTaskId {
                id: task_id.to_string(),
            });
        }
        let args = vec![
            "show".to_string(),
            "--json".to_string(),
            task_id.to_string(),
        ];
        let output = self.run_prog("show", &args).await?;
        serde_json::from_str(&output.stdout).map_err(|e| WorkSourceError::ParseFailed {
            operation: "show".to_string(),
            message: e.to_string(),
        })
    }

    async fn claim(&self, task_id: &str) -> Result<(), WorkSourceError> {
        if !is_valid_task_id(task_id) {
            return Err(WorkSourceError::InvalidTaskId {
                id: task_id.to_string(),
            });
        }
        let args = vec!["start".to_string(), task_id.to_string()];
        self.run_prog("claim", &args).await?;
        debug!(event = "core.worksource.claimed", task_id = task_id);
        Ok(())
    }

    async fn complete(&self, task_id: &str) -> Result<(), WorkSourceError> {
        if !is_valid_task_id(task_id) {
            return Err(WorkSourceError::InvalidTaskId {
                id: task_id.to_string(),
            });
        }
        let args = vec!["done".to_string(), task_id.to_string()];
        self.run_prog("complete", &args).await?;
        debug!(event = "core.worksource.completed", task_id = task_id);
        Ok(())
    }

    async fn in_progress(&self) -> Result<Vec<String>, WorkSourceError> {
        self.list_ids("doing", "in_progress").await
    }

    async fn reviewing(&self) -> Result<Vec<String>, WorkSourceError> {
        self.list_ids("review", "reviewing").await
    }

    async fn latest_log_line(&self, task_id: &str) -> Result<Option<String>, WorkSourceError> {
        if !is_valid_task_id(task_id) {
            return Err(WorkSourceError::InvalidTaskId {
                id: task_id.to_string(),
            });
        }
        let args = vec![
            "log".to_string(),
            "-n".to_string(),
            "1".to_string(),
            task_id.to_string(),
        ];
        let output = self.run_prog("latest_log_line", &args).await?;
        let line = output.stdout.lines().next().map(str::to_string);
        Ok(line.filter(|l| !l.trim().is_empty()))
    }

    async fn queue_head(&self, limit: usize) -> Result<Vec<TaskInfo>, WorkSourceError> {
        let mut tasks = self.ready().await?;
        tasks.truncate(limit);
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRunner;

    fn source_with(runner: FakeRunner) -> ProgWorkSource {
        ProgWorkSource::new(Arc::new(runner), "myproj")
    }

    #[test]
    fn test_parse_list_line_full_row() {
        let task = parse_list_line("ts-abc 1 Fix the flaky test").unwrap();
        assert_eq!(task.id, "ts-abc");
        assert_eq!(task.priority, 1);
        assert_eq!(task.title, "Fix the flaky test");
    }

    #[test]
    fn test_parse_list_line_rejects_bad_rows() {
        assert!(parse_list_line("").is_none());
        assert!(parse_list_line("ts-abc").is_none());
        assert!(parse_list_line("ts-abc not-a-priority title").is_none());
        assert!(parse_list_line("-bad 1 title").is_none());
    }

    #[tokio::test]
    async fn test_ready_parses_columns_and_skips_garbage() {
        let runner = FakeRunner::new();
        runner.expect(
            "prog",
            CmdOutput {
                status: 0,
                stdout: "ts-abc 1 Do it\nbad;id 2 Nope\nts-def 2 Another task\n".to_string(),
                stderr: String::new(),
            },
        );
        let source = source_with(runner);

        let tasks = source.ready().await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, "ts-abc");
        assert_eq!(tasks[1].title, "Another task");
    }

    #[tokio::test]
    async fn test_ready_nonzero_exit_is_command_failed() {
        let runner = FakeRunner::new();
        runner.expect(
            "prog",
            CmdOutput {
                status: 1,
                stdout: String::new(),
                stderr: "queue unreachable".to_string(),
            },
        );
        let source = source_with(runner);

        let err = source.ready().await.unwrap_err();
        match err {
            WorkSourceError::CommandFailed { operation, message } => {
                assert_eq!(operation, "ready");
                assert!(message.contains("queue unreachable"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_show_parses_json() {
        let runner = FakeRunner::new();
        runner.expect(
            "prog",
            CmdOutput {
                status: 0,
                stdout: r#"{"id":"ts-abc","type":"task","definition_of_done":"Tests pass"}"#
                    .to_string(),
                stderr: String::new(),
            },
        );
        let source = source_with(runner);

        let detail = source.show("ts-abc").await.unwrap();
        assert_eq!(detail.id, "ts-abc");
        assert_eq!(detail.kind, "task");
    }

    #[tokio::test]
    async fn test_show_rejects_invalid_id_without_running() {
        let runner = FakeRunner::new();
        let source = source_with(runner);

        let err = source.show("bad id").await.unwrap_err();
        assert!(matches!(err, WorkSourceError::InvalidTaskId { .. }));
    }

    #[tokio::test]
    async fn test_claim_uses_start_subcommand() {
        let runner = FakeRunner::new();
        runner.expect(
            "prog",
            CmdOutput {
                status: 0,
                stdout: String::new(),
                stderr: String::new(),
            },
        );
        let invocations = runner.invocations_handle();
        let source = source_with(runner);

        source.claim("ts-abc").await.unwrap();
        let calls = invocations.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, vec!["start".to_string(), "ts-abc".to_string()]);
    }

    #[tokio::test]
    async fn test_in_progress_filters_invalid_ids() {
        let runner = FakeRunner::new();
        runner.expect(
            "prog",
            CmdOutput {
                status: 0,
                stdout: "ts-orphan1 1 One\n/etc/passwd 2 Evil\nts-orphan2 3 Two\n".to_string(),
                stderr: String::new(),
            },
        );
        let source = source_with(runner);

        let ids = source.in_progress().await.unwrap();
        assert_eq!(ids, vec!["ts-orphan1".to_string(), "ts-orphan2".to_string()]);
    }

    #[tokio::test]
    async fn test_latest_log_line_empty_output_is_none() {
        let runner = FakeRunner::new();
        runner.expect(
            "prog",
            CmdOutput {
                status: 0,
                stdout: "\n".to_string(),
                stderr: String::new(),
            },
        );
        let source = source_with(runner);

        assert!(source.latest_log_line("ts-abc").await.unwrap().is_none());
    }
}
