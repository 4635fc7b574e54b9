//! aether-protocol: shared RPC types for aetherflow daemon communication.
//!
//! The wire format is length-less JSON documents streamed back-to-back over a
//! Unix stream socket. Each request is a top-level `{method, params}` object;
//! each response mirrors it as `{success, result?, error?}`.

pub mod client;
pub mod messages;
pub mod types;

pub use client::{Client, ClientError};
pub use messages::{Request, Response, methods};
pub use types::{
    AgentDetail, AgentInfo, AgentNameParams, AgentState, EventsListParams, EventsListResult,
    KillResult,
    LogsPathResult, PoolMode, PoolModeResult, Role, SessionEventParams, SessionEventWire,
    SpawnDeregisterParams, SpawnInfo, SpawnRegisterParams, SpawnState, StatusFull, TaskInfo,
    ToolCallInfo,
};
