//! Request dispatch and method handlers.
//!
//! Every handler validates its inputs before touching state and returns a
//! `Response`; failures never escape as panics. Success/failure across the
//! wire is binary, with `error` carrying the diagnostic.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::detail;
use crate::events::buffer::SessionEvent;
use crate::events::{ClaimContext, EventBuffer, handle_session_created};
use crate::pool::Pool;
use crate::registry::{SessionOrigin, SessionRegistry, SessionStatus};
use crate::spawns::{SpawnEntry, SpawnRegistry};
use crate::types::ErrorLog;
use aether_core::process::{TermOutcome, send_sigterm};
use aether_core::worksource::{WorkSource, is_valid_task_id};
use aether_protocol::methods;
use aether_protocol::{
    EventsListParams, KillResult, LogsPathResult, PoolModeResult, Request, Response,
    SessionEventParams, SpawnDeregisterParams, SpawnInfo, SpawnRegisterParams, StatusFull,
};

/// Cap on one event's serialized `data` payload.
pub const MAX_EVENT_DATA_BYTES: usize = 64 * 1024;

/// How many queue items `status.full` shows.
const QUEUE_HEAD_LIMIT: usize = 5;

/// Tool-call cap for `status.agent`.
const TOOL_CALL_LIMIT: usize = 20;

/// Delay before the shutdown cancel fires, so the response reaches the
/// caller first.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(150);

/// Shared daemon context for all request handlers.
pub struct ServerCtx {
    pub project: String,
    pub pool_size: usize,
    pub spawn_capacity: usize,
    pub log_dir: PathBuf,
    pub pool: Pool,
    pub spawns: Arc<SpawnRegistry>,
    pub events: Arc<EventBuffer>,
    pub registry: Arc<SessionRegistry>,
    pub work: Arc<dyn WorkSource>,
    pub errors: Arc<ErrorLog>,
    pub claim_ctx: ClaimContext,
    pub shutdown: CancellationToken,
}

pub async fn dispatch(ctx: &Arc<ServerCtx>, request: Request) -> Response {
    match request.method.as_str() {
        methods::STATUS_FULL => status_full(ctx).await,
        methods::STATUS_AGENT => match parse_params(request.params) {
            Ok(params) => detail::status_agent(ctx, params, TOOL_CALL_LIMIT).await,
            Err(response) => response,
        },
        methods::LOGS_PATH => match parse_params(request.params) {
            Ok(params) => logs_path(ctx, params),
            Err(response) => response,
        },
        methods::POOL_DRAIN => pool_mode_result(ctx.pool.drain()),
        methods::POOL_PAUSE => pool_mode_result(ctx.pool.pause()),
        methods::POOL_RESUME => pool_mode_result(ctx.pool.resume()),
        methods::AGENT_KILL => match parse_params(request.params) {
            Ok(params) => agent_kill(ctx, params),
            Err(response) => response,
        },
        methods::SHUTDOWN => shutdown(ctx),
        methods::SESSION_EVENT => match parse_params(request.params) {
            Ok(params) => session_event(ctx, params).await,
            Err(response) => response,
        },
        methods::EVENTS_LIST => match parse_params(request.params) {
            Ok(params) => events_list(ctx, params),
            Err(response) => response,
        },
        methods::SPAWN_REGISTER => match parse_params(request.params) {
            Ok(params) => spawn_register(ctx, params),
            Err(response) => response,
        },
        methods::SPAWN_DEREGISTER => match parse_params(request.params) {
            Ok(params) => spawn_deregister(ctx, params).await,
            Err(response) => response,
        },
        other => Response::err(format!("unknown method: {other}")),
    }
}

fn parse_params<T: DeserializeOwned>(
    params: Option<serde_json::Value>,
) -> Result<T, Response> {
    let Some(params) = params else {
        return Err(Response::err("missing params"));
    };
    serde_json::from_value(params).map_err(|e| Response::err(format!("invalid params: {e}")))
}

fn to_response<T: serde::Serialize>(result: &T) -> Response {
    match serde_json::to_value(result) {
        Ok(value) => Response::ok(value),
        Err(e) => Response::err(format!("failed to serialize result: {e}")),
    }
}

// --- status.full ---

async fn status_full(ctx: &ServerCtx) -> Response {
    let queue_head = match ctx.work.queue_head(QUEUE_HEAD_LIMIT).await {
        Ok(head) => head,
        Err(e) => {
            ctx.errors.push("queue_head", &e);
            Vec::new()
        }
    };
    let status = StatusFull {
        project: ctx.project.clone(),
        pool_size: ctx.pool_size,
        pool_mode: ctx.pool.mode(),
        spawn_capacity: ctx.spawn_capacity,
        agents: ctx.pool.status(),
        spawns: ctx
            .spawns
            .list()
            .iter()
            .map(SpawnEntry::to_info)
            .collect::<Vec<SpawnInfo>>(),
        queue_head,
        errors: ctx.errors.list(),
    };
    to_response(&status)
}

// --- logs.path ---

fn logs_path(ctx: &ServerCtx, params: aether_protocol::types::AgentNameParams) -> Response {
    let name = &params.agent_name;
    if let Some(task_id) = ctx.pool.task_id_for_agent(name) {
        let path = aether_paths::AetherPaths::task_log_file(&ctx.log_dir, &task_id);
        return to_response(&LogsPathResult {
            path: path.display().to_string(),
        });
    }
    if let Some(entry) = ctx.spawns.get(name) {
        return match entry.log_path {
            Some(path) => to_response(&LogsPathResult {
                path: path.display().to_string(),
            }),
            None => Response::err(format!("no log path recorded for spawn: {name}")),
        };
    }
    Response::err(format!("agent not found: {name}"))
}

// --- pool.* ---

fn pool_mode_result((mode, running): (aether_protocol::PoolMode, usize)) -> Response {
    to_response(&PoolModeResult { mode, running })
}

// --- agent.kill ---

fn agent_kill(ctx: &ServerCtx, params: aether_protocol::types::AgentNameParams) -> Response {
    let name = &params.agent_name;

    // Resolve and validate under the read lock, then release it before
    // signalling to keep the TOCTOU window minimal
    let (pid, running) = if let Some(agent) = ctx.pool.agent_by_name(name) {
        (agent.pid, true)
    } else if let Some(entry) = ctx.spawns.get(name) {
        (entry.pid, entry.state == aether_protocol::SpawnState::Running)
    } else {
        return Response::err(format!("agent not found: {name}"));
    };

    if !running {
        return Response::err("agent is not running (state: exited)");
    }
    if pid == 0 {
        return Response::err(format!("agent {name} has no valid PID"));
    }

    match send_sigterm(pid) {
        Ok(TermOutcome::Delivered) => {
            info!(event = "daemon.server.agent_killed", agent = %name, pid = pid);
            to_response(&KillResult {
                agent_name: name.clone(),
                pid,
            })
        }
        Ok(TermOutcome::AlreadyExited) => {
            Response::err(format!("agent {name} (PID {pid}) already exited"))
        }
        // EPERM and friends bubble through as-is
        Err(e) => Response::err(e.to_string()),
    }
}

// --- shutdown ---

fn shutdown(ctx: &Arc<ServerCtx>) -> Response {
    info!(event = "daemon.server.shutdown_requested");
    let shutdown = ctx.shutdown.clone();
    tokio::spawn(async move {
        // Give the response a head start to the caller
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        shutdown.cancel();
    });
    Response::ok(json!({"stopping": true}))
}

// --- session.event ---

async fn session_event(ctx: &ServerCtx, params: SessionEventParams) -> Response {
    if params.session_id.is_empty() {
        return Response::err("session_id must not be empty");
    }
    if params.event_type.is_empty() {
        return Response::err("event_type must not be empty");
    }
    let data_len = params.data.to_string().len();
    if data_len > MAX_EVENT_DATA_BYTES {
        return Response::err(format!(
            "event data too large: {data_len} bytes (cap {MAX_EVENT_DATA_BYTES})"
        ));
    }

    let is_session_created = params.event_type == "session.created";
    let session_id = params.session_id.clone();
    ctx.events.push(SessionEvent {
        event_type: params.event_type,
        session_id: params.session_id,
        timestamp: params.timestamp,
        data: params.data,
    });

    if is_session_created {
        handle_session_created(
            &ctx.pool,
            &ctx.spawns,
            &ctx.registry,
            &ctx.claim_ctx,
            &session_id,
        )
        .await;
    }

    Response::ok_empty()
}

// --- events.list ---

fn events_list(ctx: &ServerCtx, params: EventsListParams) -> Response {
    let name = &params.agent_name;
    let session_id = if let Some(agent) = ctx.pool.agent_by_name(name) {
        agent.session_id
    } else if let Some(entry) = ctx.spawns.get(name) {
        entry.session_id
    } else {
        return Response::err(format!("agent not found: {name}"));
    };
    if session_id.is_empty() {
        return Response::err(format!("no session correlated for agent: {name}"));
    }

    let events = match params.after_timestamp {
        Some(after) => ctx.events.events_since(&session_id, after),
        None => ctx.events.events(&session_id),
    };

    let result = if params.raw {
        aether_protocol::EventsListResult {
            session_id,
            events: Some(events.into_iter().map(Into::into).collect()),
            lines: None,
        }
    } else {
        aether_protocol::EventsListResult {
            session_id,
            events: None,
            lines: Some(events.iter().map(detail::format_event_line).collect()),
        }
    };
    to_response(&result)
}

// --- spawn.register / spawn.deregister ---

fn spawn_register(ctx: &ServerCtx, params: SpawnRegisterParams) -> Response {
    if params.spawn_id.is_empty() {
        return Response::err("spawn_id must not be empty");
    }
    if !is_valid_task_id(&params.spawn_id) {
        return Response::err(format!("invalid spawn_id: '{}'", params.spawn_id));
    }
    if params.pid == 0 {
        return Response::err("pid must be positive");
    }

    let mut entry = SpawnEntry::running(&params.spawn_id, params.pid, &params.prompt);
    entry.log_path = params.log_path.map(PathBuf::from);
    match ctx.spawns.register(entry) {
        Ok(()) => Response::ok(json!({"spawn_id": params.spawn_id})),
        Err(e) => Response::err(e.to_string()),
    }
}

async fn spawn_deregister(ctx: &ServerCtx, params: SpawnDeregisterParams) -> Response {
    if params.spawn_id.is_empty() {
        return Response::err("spawn_id must not be empty");
    }

    let marked = ctx.spawns.mark_exited(&params.spawn_id);
    if marked {
        // Best-effort registry update; the spawn is done either way
        let session_id = ctx
            .spawns
            .get(&params.spawn_id)
            .map(|entry| entry.session_id)
            .unwrap_or_default();
        let result = if session_id.is_empty() {
            ctx.registry
                .set_status_by_work_ref(
                    SessionOrigin::Spawn,
                    &params.spawn_id,
                    SessionStatus::Idle,
                )
                .await
        } else {
            ctx.registry
                .set_status_by_session(
                    &ctx.claim_ctx.server_ref,
                    &session_id,
                    SessionStatus::Idle,
                )
                .await
        };
        if let Err(e) = result {
            warn!(
                event = "daemon.server.deregister_registry_failed",
                spawn_id = %params.spawn_id,
                error = %e,
            );
        }
    }
    Response::ok(json!({"spawn_id": params.spawn_id, "marked": marked}))
}
