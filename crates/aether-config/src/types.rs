use std::path::PathBuf;
use std::time::Duration;

/// Fully-resolved daemon configuration.
///
/// Produced by [`crate::load`] (defaults + file + CLI overrides) and validated
/// once before startup. All paths are absolute by the time this struct exists.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Unix socket the RPC server binds. Owner-only (0700) after bind.
    pub socket_path: PathBuf,
    /// Work-source project this daemon supervises. Required.
    pub project: String,
    /// Interval between "ready tasks" queries.
    pub poll_interval: Duration,
    /// Maximum concurrently running pool agents.
    pub pool_size: usize,
    /// Command template an agent child is launched with. The daemon appends
    /// a resume flag (when applicable) and the rendered prompt.
    pub spawn_cmd: String,
    /// Crashes tolerated per task before the pool gives up.
    pub max_retries: u32,
    /// Directory holding prompt templates. Empty string means the embedded
    /// defaults; non-empty must contain `worker.md`.
    pub prompt_dir: String,
    /// Solo mode: prompts instruct agents to merge to mainline instead of
    /// opening a PR.
    pub solo: bool,
    /// Directory for per-task agent logs. Resolved absolute at load time.
    pub log_dir: PathBuf,
    /// Interval between reconciler passes. At least 5 seconds.
    pub reconcile_interval: Duration,
    /// Managed-server URL agents attach to; also the backfill endpoint.
    pub server_url: String,
    /// Branch the reconciler checks ancestry against.
    pub mainline_branch: String,
    /// Work branches are named `<branch_prefix>/<task_id>`.
    pub branch_prefix: String,
    /// Maximum concurrently running ad-hoc spawn entries.
    pub spawn_capacity: usize,
    /// Retention for exited spawn entries and idle event-buffer sessions.
    pub exit_ttl: Duration,
}

impl DaemonConfig {
    /// Built-in defaults. `project` and the derived paths are placeholders
    /// until the load step fills them in.
    pub fn defaults() -> Self {
        Self {
            socket_path: PathBuf::new(),
            project: String::new(),
            poll_interval: Duration::from_secs(15),
            pool_size: 2,
            spawn_cmd: String::new(),
            max_retries: 3,
            prompt_dir: String::new(),
            solo: false,
            log_dir: PathBuf::new(),
            reconcile_interval: Duration::from_secs(60),
            server_url: "http://127.0.0.1:4096".to_string(),
            mainline_branch: "main".to_string(),
            branch_prefix: "agent".to_string(),
            spawn_capacity: 32,
            exit_ttl: Duration::from_secs(3600),
        }
    }
}
