//! Scripted fakes for the runner, work source, and starter seams.
//!
//! Shared by unit tests across the workspace. Panics on misuse are
//! deliberate here: a mis-scripted fake is a test bug.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::runner::{CmdOutput, CommandRunner, RunnerError};
use crate::starter::{AgentChild, ProcessStarter, StartError, StartSpec};
use crate::worksource::{TaskDetail, WorkSource, WorkSourceError};
use aether_protocol::TaskInfo;

// --- FakeRunner ---

struct RunnerRule {
    program: String,
    contains: Vec<String>,
    output: CmdOutput,
}

#[derive(Default)]
struct RunnerState {
    queue: VecDeque<(String, CmdOutput)>,
    rules: Vec<RunnerRule>,
    spawn_errors: VecDeque<String>,
}

/// Scripted [`CommandRunner`].
///
/// Responses are served in this order: queued one-shot outputs, then matching
/// rules, then a default empty success. Every invocation is recorded.
#[derive(Default)]
pub struct FakeRunner {
    state: Mutex<RunnerState>,
    invocations: Arc<Mutex<Vec<(String, Vec<String>)>>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot output for the next call to `program`.
    pub fn expect(&self, program: &str, output: CmdOutput) {
        self.state
            .lock()
            .unwrap()
            .queue
            .push_back((program.to_string(), output));
    }

    /// Add a persistent rule: calls to `program` whose args contain every
    /// string in `contains` get `output`.
    pub fn rule(&self, program: &str, contains: &[&str], output: CmdOutput) {
        self.state.lock().unwrap().rules.push(RunnerRule {
            program: program.to_string(),
            contains: contains.iter().map(|s| s.to_string()).collect(),
            output,
        });
    }

    /// Make the next call to any program fail to spawn.
    pub fn fail_next_spawn(&self, message: &str) {
        self.state
            .lock()
            .unwrap()
            .spawn_errors
            .push_back(message.to_string());
    }

    /// Handle onto the recorded `(program, args)` invocations.
    pub fn invocations_handle(&self) -> Arc<Mutex<Vec<(String, Vec<String>)>>> {
        Arc::clone(&self.invocations)
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        _cwd: Option<&Path>,
    ) -> Result<CmdOutput, RunnerError> {
        self.invocations
            .lock()
            .unwrap()
            .push((program.to_string(), args.to_vec()));

        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.spawn_errors.pop_front() {
            return Err(RunnerError::Spawn {
                program: program.to_string(),
                message,
            });
        }
        if let Some((expected, _)) = state.queue.front()
            && expected == program
        {
            let (_, output) = state.queue.pop_front().unwrap();
            return Ok(output);
        }
        for rule in &state.rules {
            if rule.program == program
                && rule
                    .contains
                    .iter()
                    .all(|needle| args.iter().any(|a| a.contains(needle.as_str())))
            {
                return Ok(rule.output.clone());
            }
        }
        Ok(CmdOutput {
            status: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

// --- FakeWorkSource ---

#[derive(Default)]
struct WorkSourceState {
    ready_batches: VecDeque<Vec<TaskInfo>>,
    details: HashMap<String, TaskDetail>,
    in_progress: Vec<String>,
    reviewing: Vec<String>,
    log_lines: HashMap<String, String>,
    claimed: Vec<String>,
    completed: Vec<String>,
    fail_claim: bool,
    fail_show: bool,
    fail_complete_ids: Vec<String>,
}

/// Scripted in-memory [`WorkSource`].
#[derive(Default)]
pub struct FakeWorkSource {
    state: Mutex<WorkSourceState>,
}

impl FakeWorkSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ready(&self, batch: Vec<TaskInfo>) {
        self.state.lock().unwrap().ready_batches.push_back(batch);
    }

    pub fn set_detail(&self, detail: TaskDetail) {
        self.state
            .lock()
            .unwrap()
            .details
            .insert(detail.id.clone(), detail);
    }

    /// Convenience: a plain worker task with a definition of done.
    pub fn set_task(&self, task_id: &str, title: &str) {
        self.set_detail(TaskDetail {
            id: task_id.to_string(),
            kind: "task".to_string(),
            title: title.to_string(),
            definition_of_done: "Tests pass".to_string(),
        });
    }

    pub fn set_in_progress(&self, ids: Vec<String>) {
        self.state.lock().unwrap().in_progress = ids;
    }

    pub fn set_reviewing(&self, ids: Vec<String>) {
        self.state.lock().unwrap().reviewing = ids;
    }

    pub fn set_log_line(&self, task_id: &str, line: &str) {
        self.state
            .lock()
            .unwrap()
            .log_lines
            .insert(task_id.to_string(), line.to_string());
    }

    pub fn fail_claim(&self, fail: bool) {
        self.state.lock().unwrap().fail_claim = fail;
    }

    pub fn fail_show(&self, fail: bool) {
        self.state.lock().unwrap().fail_show = fail;
    }

    pub fn fail_complete_for(&self, task_id: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_complete_ids
            .push(task_id.to_string());
    }

    pub fn claimed(&self) -> Vec<String> {
        self.state.lock().unwrap().claimed.clone()
    }

    pub fn completed(&self) -> Vec<String> {
        self.state.lock().unwrap().completed.clone()
    }
}

#[async_trait]
impl WorkSource for FakeWorkSource {
    async fn ready(&self) -> Result<Vec<TaskInfo>, WorkSourceError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .ready_batches
            .pop_front()
            .unwrap_or_default())
    }

    async fn show(&self, task_id: &str) -> Result<TaskDetail, WorkSourceError> {
        let state = self.state.lock().unwrap();
        if state.fail_show {
            return Err(WorkSourceError::CommandFailed {
                operation: "show".to_string(),
                message: "scripted show failure".to_string(),
            });
        }
        state
            .details
            .get(task_id)
            .cloned()
            .ok_or_else(|| WorkSourceError::CommandFailed {
                operation: "show".to_string(),
                message: format!("no such task: {task_id}"),
            })
    }

    async fn claim(&self, task_id: &str) -> Result<(), WorkSourceError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_claim {
            return Err(WorkSourceError::CommandFailed {
                operation: "claim".to_string(),
                message: "scripted claim failure".to_string(),
            });
        }
        state.claimed.push(task_id.to_string());
        Ok(())
    }

    async fn complete(&self, task_id: &str) -> Result<(), WorkSourceError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_complete_ids.iter().any(|id| id == task_id) {
            return Err(WorkSourceError::CommandFailed {
                operation: "complete".to_string(),
                message: format!("scripted complete failure for {task_id}"),
            });
        }
        state.completed.push(task_id.to_string());
        Ok(())
    }

    async fn in_progress(&self) -> Result<Vec<String>, WorkSourceError> {
        Ok(self.state.lock().unwrap().in_progress.clone())
    }

    async fn reviewing(&self) -> Result<Vec<String>, WorkSourceError> {
        Ok(self.state.lock().unwrap().reviewing.clone())
    }

    async fn latest_log_line(&self, task_id: &str) -> Result<Option<String>, WorkSourceError> {
        Ok(self.state.lock().unwrap().log_lines.get(task_id).cloned())
    }

    async fn queue_head(&self, limit: usize) -> Result<Vec<TaskInfo>, WorkSourceError> {
        let state = self.state.lock().unwrap();
        let mut head: Vec<TaskInfo> = state
            .ready_batches
            .front()
            .cloned()
            .unwrap_or_default();
        head.truncate(limit);
        Ok(head)
    }
}

// --- FakeStarter ---

struct ChildControl {
    pid: u32,
    exit_tx: Option<oneshot::Sender<i32>>,
}

#[derive(Default)]
struct StarterState {
    next_pid: u32,
    pid_queue: VecDeque<u32>,
    launches: Vec<StartSpec>,
    children: Vec<ChildControl>,
    fail_next: Option<String>,
}

/// Scripted [`ProcessStarter`] handing out children whose exits the test
/// controls.
#[derive(Clone, Default)]
pub struct FakeStarter {
    state: Arc<Mutex<StarterState>>,
}

#[derive(Debug)]
struct FakeChild {
    pid: u32,
    exit_rx: Option<oneshot::Receiver<i32>>,
}

#[async_trait]
impl AgentChild for FakeChild {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn wait(&mut self) -> std::io::Result<i32> {
        let Some(rx) = self.exit_rx.take() else {
            return Ok(-1);
        };
        match rx.await {
            Ok(code) => Ok(code),
            // Controller dropped without sending: treat as a signal death
            Err(_) => Ok(-1),
        }
    }
}

impl FakeStarter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StarterState {
                next_pid: 1000,
                ..Default::default()
            })),
        }
    }

    /// Force a specific PID for the next launch.
    pub fn push_pid(&self, pid: u32) {
        self.state.lock().unwrap().pid_queue.push_back(pid);
    }

    /// Make the next launch fail.
    pub fn fail_next(&self, message: &str) {
        self.state.lock().unwrap().fail_next = Some(message.to_string());
    }

    pub fn launch_count(&self) -> usize {
        self.state.lock().unwrap().launches.len()
    }

    pub fn launches(&self) -> Vec<StartSpec> {
        self.state.lock().unwrap().launches.clone()
    }

    pub fn pid_of(&self, index: usize) -> u32 {
        self.state.lock().unwrap().children[index].pid
    }

    /// Make the `index`-th launched child exit with `code`.
    ///
    /// Panics if that child already exited.
    pub fn exit(&self, index: usize, code: i32) {
        let tx = self.state.lock().unwrap().children[index]
            .exit_tx
            .take()
            .expect("child already exited");
        let _ = tx.send(code);
    }

    /// Make the most recently launched child exit with `code`.
    pub fn exit_latest(&self, code: i32) {
        let index = self.launch_count() - 1;
        self.exit(index, code);
    }
}

#[async_trait]
impl ProcessStarter for FakeStarter {
    async fn start(
        &self,
        spec: StartSpec,
        _output: std::fs::File,
    ) -> Result<Box<dyn AgentChild>, StartError> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.fail_next.take() {
            return Err(StartError::LaunchFailed {
                program: spec.argv.first().cloned().unwrap_or_default(),
                message,
            });
        }
        let pid = state.pid_queue.pop_front().unwrap_or_else(|| {
            let pid = state.next_pid;
            state.next_pid += 1;
            pid
        });
        let (exit_tx, exit_rx) = oneshot::channel();
        state.launches.push(spec);
        state.children.push(ChildControl {
            pid,
            exit_tx: Some(exit_tx),
        });
        Ok(Box::new(FakeChild {
            pid,
            exit_rx: Some(exit_rx),
        }))
    }
}
