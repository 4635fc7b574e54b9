//! The reaper: one task per spawned child, blocking on its wait handle.
//!
//! The reaper owns the agent's final state transition. State cleanup
//! (remove agent, update retries) strictly precedes the respawn attempt, so
//! `status()` can never observe a phantom running agent after exit.

use tracing::{debug, error, info, warn};

use super::{Agent, Pool, SpawnKind};
use crate::registry::{SessionOrigin, SessionStatus};
use aether_core::starter::AgentChild;
use aether_protocol::PoolMode;

/// What the reaper decided under the write lock.
enum ReapOutcome {
    /// Clean exit: retries cleared, no respawn.
    Clean,
    /// Crash, retry budget left, mode permits: respawn with the inherited
    /// session id.
    Respawn { session_id: String },
    /// Crash while paused: the item stays claimed, no new agent.
    PausedNoRespawn,
    /// Crash count exceeded the budget: give up.
    GiveUp { retries: u32 },
    /// The liveness sweep evicted this agent first; this reaper leaked and
    /// must do nothing.
    Evicted,
}

impl Pool {
    pub(super) fn spawn_reaper(&self, agent: Agent, mut child: Box<dyn AgentChild>) {
        let pool = self.clone();
        tokio::spawn(async move {
            // 1. Block on the child's wait. The log sink is owned by the
            // child's stdio and closes with it.
            let exit_code = match child.wait().await {
                Ok(code) => code,
                Err(e) => {
                    warn!(
                        event = "daemon.pool.wait_failed",
                        agent_id = %agent.agent_id,
                        error = %e,
                    );
                    -1
                }
            };
            let clean = exit_code == 0;

            // 2. One write lock: mark exited, remove, release the name,
            // settle the retries entry, and decide what happens next.
            let outcome = pool.reap_locked(&agent, exit_code, clean);

            match outcome {
                ReapOutcome::Evicted => {
                    debug!(
                        event = "daemon.pool.reaper_found_eviction",
                        agent_id = %agent.agent_id,
                    );
                    return;
                }
                _ => {
                    info!(
                        event = "daemon.pool.agent_reaped",
                        agent_id = %agent.agent_id,
                        task_id = %agent.task_id,
                        exit_code = exit_code,
                        clean = clean,
                    );
                }
            }

            // 3. Session registry status: idle on clean exit, terminated on
            // crash. Keyed by session id when known, falling back to
            // origin+work_ref. Best-effort.
            let status = if clean {
                SessionStatus::Idle
            } else {
                SessionStatus::Terminated
            };
            pool.update_session_status(&agent, status).await;

            // 4. Decision
            match outcome {
                ReapOutcome::Clean | ReapOutcome::Evicted => {}
                ReapOutcome::GiveUp { retries } => {
                    error!(
                        event = "daemon.pool.retries_exhausted",
                        task_id = %agent.task_id,
                        retries = retries,
                        max_retries = pool.deps.max_retries,
                    );
                    pool.deps.errors.push(
                        &format!("task {}", agent.task_id),
                        &format!("gave up after {retries} crashes; item stays claimed"),
                    );
                }
                ReapOutcome::PausedNoRespawn => {
                    info!(
                        event = "daemon.pool.respawn_skipped_paused",
                        task_id = %agent.task_id,
                    );
                }
                ReapOutcome::Respawn { session_id } => {
                    let kind = SpawnKind::Respawn {
                        role: agent.role,
                        session_id,
                    };
                    if let Err(e) = pool.spawn_task(&agent.task_id, kind).await {
                        warn!(
                            event = "daemon.pool.respawn_failed",
                            task_id = %agent.task_id,
                            error = %e,
                        );
                        pool.deps
                            .errors
                            .push(&format!("respawn {}", agent.task_id), &e);
                    }
                }
            }
        });
    }

    /// The single-write-lock reap step.
    fn reap_locked(&self, agent: &Agent, exit_code: i32, clean: bool) -> ReapOutcome {
        let mut inner = self.inner.write();

        // Generation guard: the liveness sweep may have evicted this agent
        // (and possibly respawned the task) while wait was hung
        let still_ours = inner
            .agents
            .get(&agent.task_id)
            .is_some_and(|current| current.generation == agent.generation);
        if !still_ours {
            return ReapOutcome::Evicted;
        }

        let Some(mut finished) = inner.agents.remove(&agent.task_id) else {
            return ReapOutcome::Evicted;
        };
        finished.state = aether_protocol::AgentState::Exited;
        finished.exit_code = Some(exit_code);
        inner.names.release(&agent.agent_id);

        if clean {
            inner.retries.remove(&agent.task_id);
            return ReapOutcome::Clean;
        }

        let retries = inner.retries.entry(agent.task_id.clone()).or_insert(0);
        *retries += 1;
        let count = *retries;

        if count > self.deps.max_retries {
            return ReapOutcome::GiveUp { retries: count };
        }
        // Draining still respawns: the queue item is already claimed and
        // nobody else will pick it up
        if inner.mode == PoolMode::Paused {
            return ReapOutcome::PausedNoRespawn;
        }
        ReapOutcome::Respawn {
            session_id: finished.session_id,
        }
    }

    async fn update_session_status(&self, agent: &Agent, status: SessionStatus) {
        let registry = &self.deps.registry;
        if !agent.session_id.is_empty() {
            match registry
                .set_status_by_session(&self.deps.server_url, &agent.session_id, status)
                .await
            {
                Ok(changed) if changed > 0 => return,
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        event = "daemon.pool.registry_status_failed",
                        session_id = %agent.session_id,
                        error = %e,
                    );
                    return;
                }
            }
        }
        if let Err(e) = registry
            .set_status_by_work_ref(SessionOrigin::Pool, &agent.task_id, status)
            .await
        {
            warn!(
                event = "daemon.pool.registry_status_failed",
                task_id = %agent.task_id,
                error = %e,
            );
        }
    }
}
