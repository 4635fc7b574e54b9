use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::registry::{SessionOrigin, SessionRecord, SessionRegistry, SessionStatus};
use crate::types::ErrorLog;
use aether_core::PromptRenderer;
use aether_core::testing::{FakeStarter, FakeWorkSource};
use aether_core::worksource::WorkSource;
use aether_protocol::{AgentState, PoolMode, Role, TaskInfo};

struct Harness {
    pool: Pool,
    work: Arc<FakeWorkSource>,
    starter: FakeStarter,
    registry: Arc<SessionRegistry>,
    _dir: tempfile::TempDir,
}

fn harness(pool_size: usize, max_retries: u32) -> Harness {
    let dir = tempfile::TempDir::new().unwrap();
    let work = Arc::new(FakeWorkSource::new());
    let starter = FakeStarter::new();
    let registry = Arc::new(SessionRegistry::new(dir.path().join("sessions.json")));
    let pool = Pool::new(PoolDeps {
        work: Arc::clone(&work) as Arc<dyn WorkSource>,
        starter: Arc::new(starter.clone()),
        renderer: PromptRenderer::new("", false),
        registry: Arc::clone(&registry),
        errors: Arc::new(ErrorLog::default()),
        project: "myproj".to_string(),
        pool_size,
        max_retries,
        spawn_cmd: "agent-cli run".to_string(),
        server_url: "http://127.0.0.1:4096".to_string(),
        log_dir: dir.path().join("logs"),
    });
    Harness {
        pool,
        work,
        starter,
        registry,
        _dir: dir,
    }
}

fn task(id: &str) -> TaskInfo {
    TaskInfo {
        id: id.to_string(),
        priority: 1,
        title: format!("Task {id}"),
    }
}

/// Wait for an async condition driven by reaper tasks.
async fn settle(mut cond: impl FnMut() -> bool) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 3s");
}

// --- Scheduling ---

#[tokio::test]
async fn test_happy_path_spawn() {
    let h = harness(2, 3);
    h.work.set_task("ts-abc", "Do it");
    h.starter.push_pid(1234);

    h.pool.handle_batch(vec![task("ts-abc")]).await;

    let agents = h.pool.status();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].task_id, "ts-abc");
    assert_eq!(agents[0].pid, 1234);
    assert_eq!(agents[0].role, Role::Worker);
    assert_eq!(agents[0].state, AgentState::Running);
    assert!(agents[0].session_id.is_empty());

    // Claim happened exactly once, before the launch
    assert_eq!(h.work.claimed(), vec!["ts-abc".to_string()]);

    let launches = h.starter.launches();
    assert_eq!(launches.len(), 1);
    let argv = &launches[0].argv;
    // Template tokens first, prompt last
    assert_eq!(argv[0], "agent-cli");
    assert_eq!(argv[1], "run");
    let prompt = argv.last().unwrap();
    assert!(prompt.contains("ts-abc"));
    assert!(!prompt.contains("{{task_id}}"));
    // Attach flag points at the managed server
    assert!(argv.iter().any(|a| a == "--attach-url"));
    assert!(argv.iter().any(|a| a == "http://127.0.0.1:4096"));
    // Agent name in the child environment
    let env = &launches[0].env;
    let agent_env = env
        .iter()
        .find(|(k, _)| k == aether_core::starter::AGENT_ID_ENV)
        .unwrap();
    assert_eq!(agent_env.1, agents[0].agent_id);
}

#[tokio::test]
async fn test_idempotent_schedule_same_task_twice() {
    let h = harness(4, 3);
    h.work.set_task("ts-abc", "Do it");

    h.pool.handle_batch(vec![task("ts-abc")]).await;
    h.pool.handle_batch(vec![task("ts-abc")]).await;

    assert_eq!(h.starter.launch_count(), 1);
    assert_eq!(h.work.claimed().len(), 1);
    assert_eq!(h.pool.running_count(), 1);
}

#[tokio::test]
async fn test_slot_bound_stops_batch() {
    let h = harness(1, 3);
    h.work.set_task("ts-1", "One");
    h.work.set_task("ts-2", "Two");

    h.pool.handle_batch(vec![task("ts-1"), task("ts-2")]).await;

    assert_eq!(h.pool.running_count(), 1);
    assert_eq!(h.starter.launch_count(), 1);
    assert_eq!(h.work.claimed(), vec!["ts-1".to_string()]);
}

#[tokio::test]
async fn test_planner_role_from_metadata() {
    let h = harness(2, 3);
    h.work.set_detail(aether_core::TaskDetail {
        id: "ts-plan".to_string(),
        kind: "plan".to_string(),
        title: "Plan it".to_string(),
        definition_of_done: String::new(),
    });

    h.pool.handle_batch(vec![task("ts-plan")]).await;

    assert_eq!(h.pool.status()[0].role, Role::Planner);
}

// --- Spawn sequence ordering ---

#[tokio::test]
async fn test_metadata_failure_aborts_before_claim() {
    let h = harness(2, 3);
    // No detail scripted: show fails

    h.pool.handle_batch(vec![task("ts-abc")]).await;

    assert!(h.work.claimed().is_empty());
    assert_eq!(h.starter.launch_count(), 0);
    assert_eq!(h.pool.running_count(), 0);
}

#[tokio::test]
async fn test_claim_failure_aborts_before_launch() {
    let h = harness(2, 3);
    h.work.set_task("ts-abc", "Do it");
    h.work.fail_claim(true);

    h.pool.handle_batch(vec![task("ts-abc")]).await;

    assert_eq!(h.starter.launch_count(), 0);
    assert_eq!(h.pool.running_count(), 0);

    // The failure must not leak the reserved name; a later spawn succeeds
    h.work.fail_claim(false);
    h.pool.handle_batch(vec![task("ts-abc")]).await;
    assert_eq!(h.pool.running_count(), 1);
}

#[tokio::test]
async fn test_launch_failure_leaves_item_claimed() {
    let h = harness(2, 3);
    h.work.set_task("ts-abc", "Do it");
    h.starter.fail_next("binary not found");

    h.pool.handle_batch(vec![task("ts-abc")]).await;

    // Claimed but not running: recovery is reclaim on the next startup
    assert_eq!(h.work.claimed(), vec!["ts-abc".to_string()]);
    assert_eq!(h.pool.running_count(), 0);

    h.work.set_in_progress(vec!["ts-abc".to_string()]);
    let spawned = h.pool.reclaim().await;
    assert_eq!(spawned, 1);
    // Reclaim never re-claims
    assert_eq!(h.work.claimed().len(), 1);
}

// --- Reaper ---

#[tokio::test]
async fn test_clean_exit_clears_retries_and_slot() {
    let h = harness(2, 3);
    h.work.set_task("ts-abc", "Do it");
    h.pool.handle_batch(vec![task("ts-abc")]).await;

    h.starter.exit(0, 0);
    let pool = h.pool.clone();
    settle(move || pool.running_count() == 0).await;

    assert_eq!(h.pool.retry_count("ts-abc"), None);
    // No respawn after a clean exit
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.starter.launch_count(), 1);
}

#[tokio::test]
async fn test_crash_respawn_carries_session() {
    let h = harness(2, 3);
    h.work.set_task("ts-abc", "Do it");
    h.pool.handle_batch(vec![task("ts-abc")]).await;

    let agent_id = h.pool.status()[0].agent_id.clone();
    assert!(h.pool.set_session_id(&agent_id, "ses_persist"));

    h.starter.exit(0, 1);
    let starter = h.starter.clone();
    settle(move || starter.launch_count() == 2).await;

    // The respawned command resumes the same session
    let second = &h.starter.launches()[1];
    let argv = &second.argv;
    let session_flag = argv.iter().position(|a| a == "--session").unwrap();
    assert_eq!(argv[session_flag + 1], "ses_persist");

    // And the new agent inherits it
    let pool = h.pool.clone();
    settle(move || pool.running_count() == 1).await;
    assert_eq!(h.pool.status()[0].session_id, "ses_persist");
    assert_eq!(h.pool.retry_count("ts-abc"), Some(1));

    // Respawn never re-claims
    assert_eq!(h.work.claimed().len(), 1);
}

#[tokio::test]
async fn test_retry_exhaustion_stops_respawning() {
    let h = harness(2, 2);
    h.work.set_task("ts-abc", "Do it");
    h.pool.handle_batch(vec![task("ts-abc")]).await;

    // Crash 1 and 2 respawn; crash 3 exceeds max_retries=2
    h.starter.exit(0, 1);
    let starter = h.starter.clone();
    settle(move || starter.launch_count() == 2).await;

    h.starter.exit(1, 1);
    let starter = h.starter.clone();
    settle(move || starter.launch_count() == 3).await;

    h.starter.exit(2, 1);
    let pool = h.pool.clone();
    settle(move || pool.running_count() == 0).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    // Initial + 2 retries, then give-up: a fourth start never happens
    assert_eq!(h.starter.launch_count(), 3);
    // The count stops accumulating
    assert_eq!(h.pool.retry_count("ts-abc"), Some(3));
}

#[tokio::test]
async fn test_pause_blocks_respawn() {
    let h = harness(2, 3);
    h.work.set_task("ts-abc", "Do it");
    h.pool.handle_batch(vec![task("ts-abc")]).await;

    h.pool.pause();
    h.starter.exit(0, 1);
    let pool = h.pool.clone();
    settle(move || pool.running_count() == 0).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.starter.launch_count(), 1);
}

#[tokio::test]
async fn test_drain_allows_respawn_blocks_scheduling() {
    let h = harness(2, 3);
    h.work.set_task("ts-1", "One");
    h.work.set_task("ts-2", "Two");
    h.pool.handle_batch(vec![task("ts-1")]).await;

    let (mode, running) = h.pool.drain();
    assert_eq!(mode, PoolMode::Draining);
    assert_eq!(running, 1);

    // Fresh batches are skipped entirely while draining
    h.pool.handle_batch(vec![task("ts-2")]).await;
    assert_eq!(h.starter.launch_count(), 1);

    // But a crash still respawns: the item is already claimed
    h.starter.exit(0, 1);
    let starter = h.starter.clone();
    settle(move || starter.launch_count() == 2).await;
    assert_eq!(h.pool.running_count(), 1);
}

#[tokio::test]
async fn test_exit_code_minus_one_on_wait_error_counts_as_crash() {
    let h = harness(2, 3);
    h.work.set_task("ts-abc", "Do it");
    h.pool.handle_batch(vec![task("ts-abc")]).await;

    // -1 models a signal death (no exit status)
    h.starter.exit(0, -1);
    let starter = h.starter.clone();
    settle(move || starter.launch_count() == 2).await;
    assert_eq!(h.pool.retry_count("ts-abc"), Some(1));
}

// --- Liveness sweep ---

#[tokio::test]
async fn test_liveness_sweep_frees_slot_and_leaked_reaper_is_inert() {
    let h = harness(1, 3);
    h.work.set_task("ts-1", "One");
    h.work.set_task("ts-2", "Two");
    h.pool.handle_batch(vec![task("ts-1")]).await;

    // PID gone, wait handle still blocked: force-evict
    let evicted = h.pool.sweep_liveness_with(&|_| false);
    assert_eq!(evicted.len(), 1);
    assert_eq!(h.pool.running_count(), 0);

    // The freed slot is immediately schedulable
    h.pool.handle_batch(vec![task("ts-2")]).await;
    assert_eq!(h.pool.running_count(), 1);
    assert_eq!(h.starter.launch_count(), 2);

    // The evicted agent's reaper finally unblocks: it must neither respawn
    // nor disturb the new agent
    h.starter.exit(0, 1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.starter.launch_count(), 2);
    assert_eq!(h.pool.running_count(), 1);
    assert_eq!(h.pool.status()[0].task_id, "ts-2");
}

#[tokio::test]
async fn test_liveness_sweep_spares_live_pids() {
    let h = harness(2, 3);
    h.work.set_task("ts-1", "One");
    h.pool.handle_batch(vec![task("ts-1")]).await;

    let evicted = h.pool.sweep_liveness_with(&|_| true);
    assert!(evicted.is_empty());
    assert_eq!(h.pool.running_count(), 1);
}

// --- Reclaim ---

#[tokio::test]
async fn test_reclaim_spawns_only_orphans() {
    let h = harness(4, 3);
    h.work.set_task("ts-orphan1", "One");
    h.work.set_task("ts-orphan2", "Two");
    h.work.set_task("ts-already", "Running");

    // ts-already is under supervision before reclaim
    h.pool.handle_batch(vec![task("ts-already")]).await;
    h.work.set_in_progress(vec![
        "ts-orphan1".to_string(),
        "ts-orphan2".to_string(),
        "ts-already".to_string(),
    ]);

    let spawned = h.pool.reclaim().await;
    assert_eq!(spawned, 2);
    assert_eq!(h.pool.running_count(), 3);
    // Only the batch spawn claimed; reclaim never does
    assert_eq!(h.work.claimed(), vec!["ts-already".to_string()]);
}

#[tokio::test]
async fn test_reclaim_respects_pause() {
    let h = harness(4, 3);
    h.work.set_task("ts-orphan1", "One");
    h.work.set_in_progress(vec!["ts-orphan1".to_string()]);
    h.pool.pause();

    assert_eq!(h.pool.reclaim().await, 0);
    assert_eq!(h.pool.running_count(), 0);
}

#[tokio::test]
async fn test_reclaim_respects_pool_size() {
    let h = harness(1, 3);
    h.work.set_task("ts-o1", "One");
    h.work.set_task("ts-o2", "Two");
    h.work.set_in_progress(vec!["ts-o1".to_string(), "ts-o2".to_string()]);

    assert_eq!(h.pool.reclaim().await, 1);
    assert_eq!(h.pool.running_count(), 1);
}

// --- Session resume on fresh spawn ---

#[tokio::test]
async fn test_fresh_spawn_resumes_registered_session() {
    let h = harness(2, 3);
    h.work.set_task("ts-abc", "Do it");
    h.registry
        .upsert(SessionRecord {
            server_ref: "http://127.0.0.1:4096".to_string(),
            session_id: "ses_prev".to_string(),
            directory: String::new(),
            project: "myproj".to_string(),
            origin: SessionOrigin::Pool,
            work_ref: "ts-abc".to_string(),
            agent_id: "old-agent-1".to_string(),
            status: SessionStatus::Idle,
            created_at: String::new(),
            last_seen_at: String::new(),
            updated_at: String::new(),
        })
        .await
        .unwrap();

    assert_eq!(
        h.pool.lookup_session_for_task("ts-abc").await.as_deref(),
        Some("ses_prev")
    );

    h.pool.handle_batch(vec![task("ts-abc")]).await;

    let argv = &h.starter.launches()[0].argv;
    let flag = argv.iter().position(|a| a == "--session").unwrap();
    assert_eq!(argv[flag + 1], "ses_prev");
    assert_eq!(h.pool.status()[0].session_id, "ses_prev");
}

#[tokio::test]
async fn test_terminated_session_not_resumed() {
    let h = harness(2, 3);
    h.work.set_task("ts-abc", "Do it");
    h.registry
        .upsert(SessionRecord {
            server_ref: "http://127.0.0.1:4096".to_string(),
            session_id: "ses_dead".to_string(),
            directory: String::new(),
            project: "myproj".to_string(),
            origin: SessionOrigin::Pool,
            work_ref: "ts-abc".to_string(),
            agent_id: "old-agent-1".to_string(),
            status: SessionStatus::Terminated,
            created_at: String::new(),
            last_seen_at: String::new(),
            updated_at: String::new(),
        })
        .await
        .unwrap();

    h.pool.handle_batch(vec![task("ts-abc")]).await;

    assert!(!h.starter.launches()[0].argv.iter().any(|a| a == "--session"));
}

// --- Reap updates the session registry ---

#[tokio::test]
async fn test_reap_marks_session_idle_on_clean_exit() {
    let h = harness(2, 3);
    h.work.set_task("ts-abc", "Do it");
    h.pool.handle_batch(vec![task("ts-abc")]).await;

    let agent_id = h.pool.status()[0].agent_id.clone();
    h.pool.set_session_id(&agent_id, "ses_1");
    h.registry
        .upsert(SessionRecord {
            server_ref: "http://127.0.0.1:4096".to_string(),
            session_id: "ses_1".to_string(),
            directory: String::new(),
            project: "myproj".to_string(),
            origin: SessionOrigin::Pool,
            work_ref: "ts-abc".to_string(),
            agent_id,
            status: SessionStatus::Active,
            created_at: String::new(),
            last_seen_at: String::new(),
            updated_at: String::new(),
        })
        .await
        .unwrap();

    h.starter.exit(0, 0);
    let pool = h.pool.clone();
    settle(move || pool.running_count() == 0).await;

    let registry = Arc::clone(&h.registry);
    settle_async(move || {
        let registry = Arc::clone(&registry);
        async move {
            registry.list().await.unwrap()[0].status == SessionStatus::Idle
        }
    })
    .await;
}

#[tokio::test]
async fn test_reap_marks_session_terminated_on_crash() {
    let h = harness(2, 0);
    h.work.set_task("ts-abc", "Do it");
    h.pool.handle_batch(vec![task("ts-abc")]).await;

    let agent_id = h.pool.status()[0].agent_id.clone();
    h.pool.set_session_id(&agent_id, "ses_1");
    h.registry
        .upsert(SessionRecord {
            server_ref: "http://127.0.0.1:4096".to_string(),
            session_id: "ses_1".to_string(),
            directory: String::new(),
            project: "myproj".to_string(),
            origin: SessionOrigin::Pool,
            work_ref: "ts-abc".to_string(),
            agent_id,
            status: SessionStatus::Active,
            created_at: String::new(),
            last_seen_at: String::new(),
            updated_at: String::new(),
        })
        .await
        .unwrap();

    h.starter.exit(0, 1);
    let pool = h.pool.clone();
    settle(move || pool.running_count() == 0).await;

    let registry = Arc::clone(&h.registry);
    settle_async(move || {
        let registry = Arc::clone(&registry);
        async move {
            registry.list().await.unwrap()[0].status == SessionStatus::Terminated
        }
    })
    .await;
}

/// Async variant of [`settle`] for conditions that must await.
async fn settle_async<F, Fut>(mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..300 {
        if cond().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 3s");
}

// --- Correlation helpers ---

#[tokio::test]
async fn test_set_session_id_only_when_empty() {
    let h = harness(2, 3);
    h.work.set_task("ts-abc", "Do it");
    h.pool.handle_batch(vec![task("ts-abc")]).await;

    let agent_id = h.pool.status()[0].agent_id.clone();
    assert!(h.pool.set_session_id(&agent_id, "ses_a"));
    assert!(!h.pool.set_session_id(&agent_id, "ses_b"));
    assert_eq!(h.pool.status()[0].session_id, "ses_a");
    assert!(!h.pool.set_session_id("no-such-agent", "ses_c"));
}

#[tokio::test]
async fn test_unassigned_running_and_task_lookup() {
    let h = harness(4, 3);
    h.work.set_task("ts-1", "One");
    h.work.set_task("ts-2", "Two");
    h.pool.handle_batch(vec![task("ts-1"), task("ts-2")]).await;

    assert_eq!(h.pool.unassigned_running().len(), 2);

    let agents = h.pool.status();
    let first = &agents[0];
    h.pool.set_session_id(&first.agent_id, "ses_1");
    assert_eq!(h.pool.unassigned_running().len(), 1);

    assert_eq!(
        h.pool.task_id_for_agent(&first.agent_id),
        Some(first.task_id.clone())
    );
    assert_eq!(h.pool.task_id_for_agent("missing"), None);
}

// --- argv construction ---

#[test]
fn test_build_spawn_argv_order() {
    let argv = build_spawn_argv(
        "agent-cli run --verbose",
        Some("ses_1"),
        "http://127.0.0.1:4096",
        "do the thing",
    );
    assert_eq!(
        argv,
        vec![
            "agent-cli",
            "run",
            "--verbose",
            "--session",
            "ses_1",
            "--attach-url",
            "http://127.0.0.1:4096",
            "do the thing",
        ]
    );
}

#[test]
fn test_build_spawn_argv_no_resume() {
    let argv = build_spawn_argv("agent-cli", None, "http://h", "p");
    assert!(!argv.iter().any(|a| a == "--session"));
    assert_eq!(argv.last().unwrap(), "p");
}

#[test]
fn test_attach_flag_not_duplicated() {
    let argv = build_spawn_argv(
        "agent-cli --attach-url=http://custom:1",
        None,
        "http://h",
        "p",
    );
    assert_eq!(
        argv.iter().filter(|a| a.starts_with("--attach-url")).count(),
        1
    );
}

#[test]
fn test_attach_flag_match_is_false_positive_safe() {
    // A token merely containing the flag name must not suppress appending
    let argv = build_spawn_argv("agent-cli --attach-urlish", None, "http://h", "p");
    assert!(argv.iter().any(|a| a == "--attach-url"));
}
