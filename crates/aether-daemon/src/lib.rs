//! aether-daemon: the aetherflow agent supervisor daemon.
//!
//! Watches the external task queue for ready work, launches agent child
//! processes under a fixed-size pool, correlates them to sessions via their
//! event streams, reconciles finished work back to the queue, and serves an
//! owner-only Unix-socket RPC surface.
//!
//! Architecture:
//! - Poller task: periodic ready-task query, batches to the pool
//! - Pool: slot scheduling, spawn/claim ordering, one reaper task per child
//! - Event plane: bounded per-session ring buffer + session claim
//! - Reconciler: promotes reviewed items once their branch merged
//! - RPC server: accept loop, one task per connection

pub mod backfill;
pub mod errors;
pub mod events;
pub mod poller;
pub mod pool;
pub mod reconciler;
pub mod registry;
pub mod server;
pub mod spawns;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::DaemonError;
use crate::events::{ClaimContext, EventBuffer};
use crate::pool::{LIVENESS_INTERVAL, Pool, PoolDeps};
use crate::reconciler::Reconciler;
use crate::registry::{RemoteSpawnStore, SessionRegistry};
use crate::server::ServerCtx;
use crate::spawns::SpawnRegistry;
use crate::types::ErrorLog;
use aether_config::DaemonConfig;
use aether_core::worksource::WorkSource;
use aether_core::{ProgWorkSource, PromptRenderer, SystemRunner, SystemStarter};

/// Cadence of the spawn-registry and event-buffer sweeps. The TTL they
/// enforce comes from config (`exit_ttl`); only the check cadence is fixed.
const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Retention policy for terminal remote-spawn records.
const REMOTE_SPAWN_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);
const REMOTE_SPAWN_CAP: usize = 500;

/// Grace period for in-flight RPC responses after cancellation.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(2);

/// Compose and run the daemon until SIGINT/SIGTERM or the `shutdown` RPC.
pub async fn run_daemon(config: DaemonConfig) -> Result<(), DaemonError> {
    let paths = match aether_paths::AetherPaths::resolve() {
        Ok(paths) => paths,
        Err(e) => {
            return Err(DaemonError::DirCreate {
                path: "<user-config>/aetherflow".to_string(),
                source: std::io::Error::other(e.to_string()),
            });
        }
    };
    std::fs::create_dir_all(paths.sessions_dir()).map_err(|e| DaemonError::DirCreate {
        path: paths.sessions_dir().display().to_string(),
        source: e,
    })?;

    // Bind the socket before anything else: a failure here must abort
    // startup, not strand a half-running daemon
    let listener = server::bind_socket(&config.socket_path)?;

    let cancel = CancellationToken::new();
    tokio::spawn(wait_for_shutdown_signal(cancel.clone()));

    let errors = Arc::new(ErrorLog::default());
    let runner = Arc::new(SystemRunner::new());
    let work: Arc<dyn WorkSource> =
        Arc::new(ProgWorkSource::new(runner.clone(), config.project.clone()));
    let registry = Arc::new(SessionRegistry::new(paths.sessions_file()));
    let remote_spawns = Arc::new(RemoteSpawnStore::new(paths.remote_spawns_file()));
    let spawns = Arc::new(SpawnRegistry::new(config.spawn_capacity));
    let events = Arc::new(EventBuffer::default());

    let pool = Pool::new(PoolDeps {
        work: Arc::clone(&work),
        starter: Arc::new(SystemStarter::new()),
        renderer: PromptRenderer::new(config.prompt_dir.clone(), config.solo),
        registry: Arc::clone(&registry),
        errors: Arc::clone(&errors),
        project: config.project.clone(),
        pool_size: config.pool_size,
        max_retries: config.max_retries,
        spawn_cmd: config.spawn_cmd.clone(),
        server_url: config.server_url.clone(),
        log_dir: config.log_dir.clone(),
    });

    info!(
        event = "daemon.started",
        pid = std::process::id(),
        project = %config.project,
        pool_size = config.pool_size,
        socket = %config.socket_path.display(),
    );

    // Recover items claimed by a previous daemon life
    pool.reclaim().await;

    // Poller → pool
    let (batch_tx, batch_rx) = mpsc::channel(1);
    let poller_task = tokio::spawn(poller::run(
        Arc::clone(&work),
        config.poll_interval,
        batch_tx,
        Arc::clone(&errors),
        cancel.clone(),
    ));
    let pool_task = {
        let pool = pool.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { pool.run(batch_rx, cancel).await })
    };

    // Reconciler
    let reconciler = Reconciler {
        work: Arc::clone(&work),
        runner: runner.clone(),
        repo_dir: std::env::current_dir().unwrap_or_else(|_| ".".into()),
        mainline: config.mainline_branch.clone(),
        branch_prefix: config.branch_prefix.clone(),
        errors: Arc::clone(&errors),
    };
    let reconciler_task = {
        let cancel = cancel.clone();
        let interval = config.reconcile_interval;
        tokio::spawn(async move { reconciler.run(interval, cancel).await })
    };

    // Sweepers: pool liveness on its own cadence; spawn/event retention and
    // remote-spawn pruning together
    let liveness_task = {
        let pool = pool.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(LIVENESS_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        pool.sweep_liveness();
                    }
                }
            }
        })
    };
    let retention_task = {
        let spawns = Arc::clone(&spawns);
        let events = Arc::clone(&events);
        let remote_spawns = Arc::clone(&remote_spawns);
        let exit_ttl = config.exit_ttl;
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        spawns.sweep_dead(exit_ttl);
                        events.sweep_idle(exit_ttl);
                        if let Err(e) = remote_spawns
                            .prune(REMOTE_SPAWN_RETENTION, REMOTE_SPAWN_CAP)
                            .await
                        {
                            warn!(event = "daemon.remote_spawn_prune_failed", error = %e);
                        }
                    }
                }
            }
        })
    };

    // One-shot backfill of existing sessions
    tokio::spawn(backfill::run(
        Arc::clone(&registry),
        Arc::clone(&events),
        config.server_url.clone(),
    ));

    // RPC server
    let directory = std::env::current_dir()
        .map(|d| d.display().to_string())
        .unwrap_or_default();
    let ctx = Arc::new(ServerCtx {
        project: config.project.clone(),
        pool_size: config.pool_size,
        spawn_capacity: config.spawn_capacity,
        log_dir: config.log_dir.clone(),
        pool,
        spawns,
        events,
        registry,
        work,
        errors,
        claim_ctx: ClaimContext {
            project: config.project.clone(),
            server_ref: config.server_url.clone(),
            directory,
        },
        shutdown: cancel.clone(),
    });
    server::run(listener, ctx, cancel.clone()).await;

    // Cancelled: stop accepting, let in-flight children run, give the
    // subsystem tasks a bounded window to drain
    info!(event = "daemon.shutdown_started");
    let drain = async {
        let _ = poller_task.await;
        let _ = pool_task.await;
        let _ = reconciler_task.await;
        let _ = liveness_task.await;
        let _ = retention_task.await;
    };
    if tokio::time::timeout(SHUTDOWN_DEADLINE, drain).await.is_err() {
        warn!(event = "daemon.shutdown_deadline_exceeded");
    }

    if let Err(e) = std::fs::remove_file(&config.socket_path) {
        warn!(
            event = "daemon.socket_cleanup_failed",
            path = %config.socket_path.display(),
            error = %e,
        );
    }
    info!(event = "daemon.shutdown_completed");
    Ok(())
}

/// Wait for SIGTERM or SIGINT and cancel the root token.
async fn wait_for_shutdown_signal(token: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    let mut sigterm =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(event = "daemon.signal_handler_failed", error = %e);
                ctrl_c.await.ok();
                info!(event = "daemon.signal_received", signal = "SIGINT");
                token.cancel();
                return;
            }
        };

    tokio::select! {
        _ = ctrl_c => {
            info!(event = "daemon.signal_received", signal = "SIGINT");
        }
        _ = sigterm.recv() => {
            info!(event = "daemon.signal_received", signal = "SIGTERM");
        }
    }
    token.cancel();
}
