//! Session claim: atomically bind an unassigned agent to its first observed
//! session identifier.
//!
//! When a `session.created` event arrives, the sender must be either a pool
//! agent or an ad-hoc spawn that was launched without a known session. If
//! exactly one such candidate exists the binding is unambiguous; otherwise
//! the event is stored and correlation waits for a less ambiguous moment.
//!
//! Lock discipline: this module never holds the session-registry lock while
//! calling into the pool, and the pool never takes the registry lock while
//! holding its own. All calls cross narrow pure-data interfaces.

use tracing::{debug, info, warn};

use crate::pool::Pool;
use crate::registry::{SessionOrigin, SessionRecord, SessionRegistry, SessionStatus};
use crate::spawns::SpawnRegistry;

/// Static facts about this daemon needed to mint registry records.
#[derive(Debug, Clone)]
pub struct ClaimContext {
    pub project: String,
    pub server_ref: String,
    /// Working directory recorded on new session records.
    pub directory: String,
}

/// Handle a `session.created` event: bind the session to the unique
/// unassigned candidate, if exactly one exists.
pub async fn handle_session_created(
    pool: &Pool,
    spawns: &SpawnRegistry,
    registry: &SessionRegistry,
    ctx: &ClaimContext,
    session_id: &str,
) {
    let pool_candidates = pool.unassigned_running();
    let spawn_candidates = spawns.unassigned_running();
    let total = pool_candidates.len() + spawn_candidates.len();

    match total {
        0 => {
            debug!(
                event = "daemon.claim.no_candidates",
                session_id = session_id,
            );
        }
        1 => {
            if let Some((agent_id, task_id)) = pool_candidates.into_iter().next() {
                // set_session_id re-checks emptiness under the pool lock, so
                // a concurrent claim for the same agent binds at most once
                if !pool.set_session_id(&agent_id, session_id) {
                    debug!(
                        event = "daemon.claim.lost_race",
                        agent_id = %agent_id,
                        session_id = session_id,
                    );
                    return;
                }
                upsert_record(
                    registry,
                    ctx,
                    session_id,
                    SessionOrigin::Pool,
                    &task_id,
                    &agent_id,
                )
                .await;
                info!(
                    event = "daemon.claim.pool_agent_bound",
                    agent_id = %agent_id,
                    task_id = %task_id,
                    session_id = session_id,
                );
            } else if let Some(spawn_id) = spawn_candidates.into_iter().next() {
                if !spawns.set_session_id(&spawn_id, session_id) {
                    debug!(
                        event = "daemon.claim.lost_race",
                        spawn_id = %spawn_id,
                        session_id = session_id,
                    );
                    return;
                }
                upsert_record(
                    registry,
                    ctx,
                    session_id,
                    SessionOrigin::Spawn,
                    &spawn_id,
                    &spawn_id,
                )
                .await;
                info!(
                    event = "daemon.claim.spawn_bound",
                    spawn_id = %spawn_id,
                    session_id = session_id,
                );
            }
        }
        _ => {
            // Ambiguous: agents launched serially will correlate on a later
            // run. Binding a guess here would poison resume.
            warn!(
                event = "daemon.claim.ambiguous",
                session_id = session_id,
                candidates = total,
            );
        }
    }
}

async fn upsert_record(
    registry: &SessionRegistry,
    ctx: &ClaimContext,
    session_id: &str,
    origin: SessionOrigin,
    work_ref: &str,
    agent_id: &str,
) {
    let record = SessionRecord {
        server_ref: ctx.server_ref.clone(),
        session_id: session_id.to_string(),
        directory: ctx.directory.clone(),
        project: ctx.project.clone(),
        origin,
        work_ref: work_ref.to_string(),
        agent_id: agent_id.to_string(),
        status: SessionStatus::Active,
        created_at: String::new(),
        last_seen_at: String::new(),
        updated_at: String::new(),
    };
    if let Err(e) = registry.upsert(record).await {
        warn!(
            event = "daemon.claim.registry_upsert_failed",
            session_id = session_id,
            error = %e,
        );
    }
}
