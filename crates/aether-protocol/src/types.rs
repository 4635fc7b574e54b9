use serde::{Deserialize, Serialize};

/// Scheduling mode of the agent pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolMode {
    /// New tasks are scheduled and crashed agents respawn.
    Active,
    /// No new tasks; crashed agents still respawn (their items are claimed).
    Draining,
    /// No new tasks and no respawns.
    Paused,
}

impl std::fmt::Display for PoolMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolMode::Active => write!(f, "active"),
            PoolMode::Draining => write!(f, "draining"),
            PoolMode::Paused => write!(f, "paused"),
        }
    }
}

/// Behavioral role of an agent, fixed at creation and carried through respawns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Worker,
    Planner,
    /// Ad-hoc spawn origin marker; never scheduled by the pool.
    Spawn,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Worker => write!(f, "worker"),
            Role::Planner => write!(f, "planner"),
            Role::Spawn => write!(f, "spawn"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Running,
    Exited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpawnState {
    Running,
    Exited,
}

/// A ready queue item as reported by the work source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: String,
    pub priority: i64,
    pub title: String,
}

/// Snapshot of one pool-managed agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent_id: String,
    pub task_id: String,
    pub role: Role,
    pub pid: u32,
    /// Empty until the first `session.created` event is correlated.
    #[serde(default)]
    pub session_id: String,
    /// RFC3339 spawn timestamp.
    pub spawn_time: String,
    pub state: AgentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Snapshot of one ad-hoc spawn entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnInfo {
    pub spawn_id: String,
    pub pid: u32,
    #[serde(default)]
    pub session_id: String,
    pub state: SpawnState,
    /// First-seen prompt, truncated for display.
    pub prompt: String,
    pub spawn_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exited_at: Option<String>,
}

/// `status.full` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusFull {
    pub project: String,
    pub pool_size: usize,
    pub pool_mode: PoolMode,
    pub spawn_capacity: usize,
    /// Pool agents sorted by spawn time, oldest first.
    pub agents: Vec<AgentInfo>,
    pub spawns: Vec<SpawnInfo>,
    pub queue_head: Vec<TaskInfo>,
    /// Accumulated non-fatal errors since startup.
    pub errors: Vec<String>,
}

/// `pool.drain` / `pool.pause` / `pool.resume` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolModeResult {
    pub mode: PoolMode,
    pub running: usize,
}

/// `agent.kill` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillResult {
    pub agent_name: String,
    pub pid: u32,
}

/// `logs.path` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsPathResult {
    pub path: String,
}

/// Params shared by the methods addressing one agent by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentNameParams {
    pub agent_name: String,
}

/// `session.event` params: an opaque event pushed by the child's plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEventParams {
    pub event_type: String,
    pub session_id: String,
    /// Wall-clock milliseconds.
    pub timestamp: i64,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// An event as returned by `events.list` with `raw=true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEventWire {
    pub event_type: String,
    pub session_id: String,
    pub timestamp: i64,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// `events.list` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsListParams {
    pub agent_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_timestamp: Option<i64>,
    /// When true, return raw events instead of formatted display lines.
    #[serde(default)]
    pub raw: bool,
}

/// `events.list` result: raw events or formatted lines, depending on `raw`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsListResult {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<SessionEventWire>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<Vec<String>>,
}

/// `spawn.register` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnRegisterParams {
    pub spawn_id: String,
    pub pid: u32,
    #[serde(default)]
    pub prompt: String,
    /// Where the spawn writes its output, if the registrar knows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<String>,
}

/// `spawn.deregister` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnDeregisterParams {
    pub spawn_id: String,
}

/// One observed tool invocation, extracted from a session's event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallInfo {
    pub part_id: String,
    pub tool: String,
    /// Lifecycle of the invocation: `pending`, `running`, or `completed`.
    pub status: String,
    /// Most informative field of the tool's input, per a per-tool allowlist.
    pub input_summary: String,
}

/// `status.agent` result: per-agent detail composed from several sources.
///
/// Fields sourced from collaborators that failed are left empty and the
/// failure is recorded in `partial_errors` so the client can display what
/// succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDetail {
    pub agent_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    pub pid: u32,
    pub state: AgentState,
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_log_line: Option<String>,
    pub tool_calls: Vec<ToolCallInfo>,
    #[serde(default)]
    pub partial_errors: Vec<String>,
}
