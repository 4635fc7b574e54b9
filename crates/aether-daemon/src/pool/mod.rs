//! The agent pool: a fixed-slot scheduler owning child-process lifetimes.
//!
//! Claim → spawn → supervise → reap → bounded respawn. One reaper task per
//! child owns that agent's final state transition; the liveness sweep is the
//! single exception and leaves the reaper to discover the eviction through
//! its generation guard.

mod reaper;
mod sweep;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::registry::SessionRegistry;
use crate::types::ErrorLog;
use aether_core::prompts::PromptError;
use aether_core::starter::{AGENT_ID_ENV, ProcessStarter, StartError, StartSpec};
use aether_core::worksource::{WorkSource, WorkSourceError, role_for_kind};
use aether_core::{NameReservoir, PromptRenderer};
use aether_protocol::{AgentInfo, AgentState, PoolMode, Role, TaskInfo};

/// How often the liveness sweep probes running agents' PIDs.
pub const LIVENESS_INTERVAL: Duration = Duration::from_secs(30);

/// One pool-managed agent. Exists in the agents map only while running; the
/// reaper removes it at exit.
#[derive(Debug, Clone)]
pub struct Agent {
    pub agent_id: String,
    pub task_id: String,
    pub role: Role,
    pub pid: u32,
    /// Empty until the first `session.created` event is correlated, or
    /// prefilled when the spawn resumes a prior session.
    pub session_id: String,
    pub spawn_time: DateTime<Utc>,
    pub state: AgentState,
    pub exit_code: Option<i32>,
    /// Monotone per spawn. The reaper acts only if the map still holds its
    /// own generation, so a leaked reaper after a liveness eviction is inert.
    pub generation: u64,
}

impl Agent {
    pub fn to_info(&self) -> AgentInfo {
        AgentInfo {
            agent_id: self.agent_id.clone(),
            task_id: self.task_id.clone(),
            role: self.role,
            pid: self.pid,
            session_id: self.session_id.clone(),
            spawn_time: self.spawn_time.to_rfc3339(),
            state: self.state,
            exit_code: self.exit_code,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("metadata fetch failed: {0}")]
    Metadata(WorkSourceError),

    #[error("prompt render failed: {0}")]
    Prompt(#[from] PromptError),

    #[error("failed to open log sink: {0}")]
    LogSink(std::io::Error),

    #[error("claim failed: {0}")]
    Claim(WorkSourceError),

    #[error("launch failed (item stays claimed): {0}")]
    Launch(#[from] StartError),
}

/// How a spawn was initiated. Decides whether the claim step runs and where
/// the role and resume session come from.
#[derive(Debug, Clone)]
enum SpawnKind {
    /// Scheduled from a poller batch: claims the item.
    Fresh,
    /// Startup recovery of an already-claimed item: no claim.
    Reclaim,
    /// Crash recovery: no claim, role and session inherited from the
    /// outgoing agent.
    Respawn { role: Role, session_id: String },
}

struct PoolInner {
    mode: PoolMode,
    /// task_id → running Agent. At most one running agent per task.
    agents: HashMap<String, Agent>,
    /// task_id → crash count. Cleared on clean exit.
    retries: HashMap<String, u32>,
    names: NameReservoir,
    next_generation: u64,
}

/// Static collaborators handed to the pool at construction.
pub struct PoolDeps {
    pub work: Arc<dyn WorkSource>,
    pub starter: Arc<dyn ProcessStarter>,
    pub renderer: PromptRenderer,
    pub registry: Arc<SessionRegistry>,
    pub errors: Arc<ErrorLog>,
    pub project: String,
    pub pool_size: usize,
    pub max_retries: u32,
    pub spawn_cmd: String,
    pub server_url: String,
    pub log_dir: PathBuf,
}

#[derive(Clone)]
pub struct Pool {
    inner: Arc<RwLock<PoolInner>>,
    deps: Arc<PoolDeps>,
}

impl Pool {
    pub fn new(deps: PoolDeps) -> Self {
        Self {
            inner: Arc::new(RwLock::new(PoolInner {
                mode: PoolMode::Active,
                agents: HashMap::new(),
                retries: HashMap::new(),
                names: NameReservoir::new(),
                next_generation: 0,
            })),
            deps: Arc::new(deps),
        }
    }

    /// Consume task batches until cancellation.
    pub async fn run(
        &self,
        mut batches: mpsc::Receiver<Vec<TaskInfo>>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(event = "daemon.pool.run_cancelled");
                    return;
                }
                batch = batches.recv() => {
                    match batch {
                        Some(batch) => self.handle_batch(batch).await,
                        None => {
                            debug!(event = "daemon.pool.batch_channel_closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Schedule one incoming batch.
    pub async fn handle_batch(&self, batch: Vec<TaskInfo>) {
        if self.mode() != PoolMode::Active {
            debug!(
                event = "daemon.pool.batch_skipped",
                mode = %self.mode(),
                size = batch.len(),
            );
            return;
        }

        for task in batch {
            {
                let inner = self.inner.read();
                if inner.agents.contains_key(&task.id) {
                    continue;
                }
                if inner.agents.len() >= self.deps.pool_size {
                    debug!(
                        event = "daemon.pool.batch_stopped_full",
                        pool_size = self.deps.pool_size,
                    );
                    break;
                }
            }
            if let Err(e) = self.spawn_task(&task.id, SpawnKind::Fresh).await {
                warn!(
                    event = "daemon.pool.spawn_failed",
                    task_id = %task.id,
                    error = %e,
                );
                self.deps.errors.push(&format!("spawn {}", task.id), &e);
            }
        }
    }

    /// Bring already-claimed-but-orphaned tasks back under supervision.
    /// Returns how many agents were spawned.
    pub async fn reclaim(&self) -> usize {
        let ids = match self.deps.work.in_progress().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(event = "daemon.pool.reclaim_list_failed", error = %e);
                self.deps.errors.push("reclaim", &e);
                return 0;
            }
        };

        let mut spawned = 0;
        for task_id in ids {
            {
                let inner = self.inner.read();
                if inner.mode == PoolMode::Paused {
                    debug!(event = "daemon.pool.reclaim_paused");
                    break;
                }
                if inner.agents.contains_key(&task_id) {
                    continue;
                }
                if inner.agents.len() >= self.deps.pool_size {
                    debug!(event = "daemon.pool.reclaim_stopped_full");
                    break;
                }
            }
            match self.spawn_task(&task_id, SpawnKind::Reclaim).await {
                Ok(()) => spawned += 1,
                Err(e) => {
                    warn!(
                        event = "daemon.pool.reclaim_spawn_failed",
                        task_id = %task_id,
                        error = %e,
                    );
                    self.deps.errors.push(&format!("reclaim {task_id}"), &e);
                }
            }
        }
        info!(event = "daemon.pool.reclaim_completed", spawned = spawned);
        spawned
    }

    /// The spawn sequence. Ordering is deliberate: no failing step may
    /// orphan a claimed queue item.
    async fn spawn_task(&self, task_id: &str, kind: SpawnKind) -> Result<(), SpawnError> {
        // 1+2. Role from metadata (or inherited), prompt rendered fresh so
        // template edits apply on respawn
        let (role, resume_session) = match &kind {
            SpawnKind::Respawn { role, session_id } => (*role, {
                if session_id.is_empty() {
                    None
                } else {
                    Some(session_id.clone())
                }
            }),
            SpawnKind::Fresh | SpawnKind::Reclaim => {
                let detail = self
                    .deps
                    .work
                    .show(task_id)
                    .await
                    .map_err(SpawnError::Metadata)?;
                let role = role_for_kind(&detail.kind);
                // Prior active/idle session means the child resumes it
                let resume = self.lookup_session_for_task(task_id).await;
                (role, resume)
            }
        };
        let prompt = self.deps.renderer.render(role, task_id)?;

        // 3. Log sink, owner-only
        let log_file =
            open_log_sink(&self.deps.log_dir, task_id).map_err(SpawnError::LogSink)?;

        // 5. Claim: the point of no return
        if matches!(kind, SpawnKind::Fresh) {
            if let Err(e) = self.deps.work.claim(task_id).await {
                drop(log_file);
                return Err(SpawnError::Claim(e));
            }
        }

        // 6. Unique human-readable name
        let (agent_name, generation) = {
            let mut inner = self.inner.write();
            inner.next_generation += 1;
            (inner.names.acquire(), inner.next_generation)
        };

        // 7. Launch
        let argv = build_spawn_argv(
            &self.deps.spawn_cmd,
            resume_session.as_deref(),
            &self.deps.server_url,
            &prompt,
        );
        let spec = StartSpec {
            argv,
            env: vec![(AGENT_ID_ENV.to_string(), agent_name.clone())],
            workdir: None,
        };
        let child = match self.deps.starter.start(spec, log_file).await {
            Ok(child) => child,
            Err(e) => {
                // 8. The item stays claimed; recovery is operator action or
                // the next startup's reclaim
                self.inner.write().names.release(&agent_name);
                error!(
                    event = "daemon.pool.launch_failed",
                    task_id = task_id,
                    agent_id = %agent_name,
                    error = %e,
                );
                return Err(SpawnError::Launch(e));
            }
        };

        // 9. Agent becomes visible, reaper takes the handle
        let agent = Agent {
            agent_id: agent_name,
            task_id: task_id.to_string(),
            role,
            pid: child.pid(),
            session_id: resume_session.unwrap_or_default(),
            spawn_time: Utc::now(),
            state: AgentState::Running,
            exit_code: None,
            generation,
        };
        {
            let mut inner = self.inner.write();
            inner.agents.insert(task_id.to_string(), agent.clone());
        }
        info!(
            event = "daemon.pool.agent_spawned",
            task_id = task_id,
            agent_id = %agent.agent_id,
            pid = agent.pid,
            role = %agent.role,
            respawn = matches!(kind, SpawnKind::Respawn { .. }),
        );
        self.spawn_reaper(agent, child);
        Ok(())
    }

    // --- Read-only views ---

    /// Snapshot of running agents, oldest spawn first.
    pub fn status(&self) -> Vec<AgentInfo> {
        let inner = self.inner.read();
        let mut agents: Vec<AgentInfo> = inner.agents.values().map(Agent::to_info).collect();
        agents.sort_by(|a, b| a.spawn_time.cmp(&b.spawn_time));
        agents
    }

    pub fn mode(&self) -> PoolMode {
        self.inner.read().mode
    }

    pub fn running_count(&self) -> usize {
        self.inner.read().agents.len()
    }

    pub fn agent_by_name(&self, agent_id: &str) -> Option<Agent> {
        let inner = self.inner.read();
        inner
            .agents
            .values()
            .find(|a| a.agent_id == agent_id)
            .cloned()
    }

    pub fn task_id_for_agent(&self, agent_id: &str) -> Option<String> {
        self.agent_by_name(agent_id).map(|a| a.task_id)
    }

    /// Running agents not yet correlated to a session: the claim candidates.
    pub fn unassigned_running(&self) -> Vec<(String, String)> {
        let inner = self.inner.read();
        inner
            .agents
            .values()
            .filter(|a| a.session_id.is_empty())
            .map(|a| (a.agent_id.clone(), a.task_id.clone()))
            .collect()
    }

    /// Prior session a task could resume: the most recent active/idle pool
    /// session recorded for it. The spawn sequence consults this; exposed so
    /// clients can preview what a spawn would resume.
    pub async fn lookup_session_for_task(&self, task_id: &str) -> Option<String> {
        match self.deps.registry.lookup_resumable(task_id).await {
            Ok(session) => session,
            Err(e) => {
                warn!(
                    event = "daemon.pool.resume_lookup_failed",
                    task_id = task_id,
                    error = %e,
                );
                None
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn retry_count(&self, task_id: &str) -> Option<u32> {
        self.inner.read().retries.get(task_id).copied()
    }

    // --- Mode transitions ---

    pub fn drain(&self) -> (PoolMode, usize) {
        self.set_mode(PoolMode::Draining)
    }

    pub fn pause(&self) -> (PoolMode, usize) {
        self.set_mode(PoolMode::Paused)
    }

    pub fn resume(&self) -> (PoolMode, usize) {
        self.set_mode(PoolMode::Active)
    }

    fn set_mode(&self, mode: PoolMode) -> (PoolMode, usize) {
        let mut inner = self.inner.write();
        inner.mode = mode;
        info!(event = "daemon.pool.mode_changed", mode = %mode);
        (mode, inner.agents.len())
    }

    // --- Session correlation ---

    /// Bind a session id to an uncorrelated agent. Returns whether it was
    /// set; an already-bound agent is left untouched.
    pub fn set_session_id(&self, agent_id: &str, session_id: &str) -> bool {
        let mut inner = self.inner.write();
        match inner
            .agents
            .values_mut()
            .find(|a| a.agent_id == agent_id)
        {
            Some(agent) if agent.session_id.is_empty() => {
                agent.session_id = session_id.to_string();
                info!(
                    event = "daemon.pool.session_bound",
                    agent_id = agent_id,
                    session_id = session_id,
                );
                true
            }
            _ => false,
        }
    }
}

/// Compose the child's argv from the user-configured command template.
///
/// Appended in order: the resume flag (when a prior session applies), the
/// attach flag (only if the template doesn't already carry one), and the
/// rendered prompt as the final argument.
fn build_spawn_argv(
    spawn_cmd: &str,
    resume_session: Option<&str>,
    server_url: &str,
    prompt: &str,
) -> Vec<String> {
    let mut argv: Vec<String> = spawn_cmd.split_whitespace().map(String::from).collect();
    if let Some(session_id) = resume_session {
        argv.push("--session".to_string());
        argv.push(session_id.to_string());
    }
    if !has_attach_flag(&argv) {
        argv.push("--attach-url".to_string());
        argv.push(server_url.to_string());
    }
    argv.push(prompt.to_string());
    argv
}

/// Exact-token match (`--attach-url` or `--attach-url=...`) so a template
/// mentioning the flag name inside some other word doesn't suppress it.
fn has_attach_flag(argv: &[String]) -> bool {
    argv.iter()
        .any(|arg| arg == "--attach-url" || arg.starts_with("--attach-url="))
}

/// Open the append-only log sink for one task, creating the directory with
/// owner-only permissions.
fn open_log_sink(log_dir: &Path, task_id: &str) -> std::io::Result<std::fs::File> {
    std::fs::create_dir_all(log_dir)?;
    std::fs::set_permissions(log_dir, std::fs::Permissions::from_mode(0o700))?;
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .open(aether_paths::AetherPaths::task_log_file(log_dir, task_id))
}
