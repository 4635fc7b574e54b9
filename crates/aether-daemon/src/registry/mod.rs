//! Durable registries under `<user-config>/aetherflow/sessions/`.
//!
//! Two JSON documents: `sessions.json` (session routing records) and
//! `remote_spawns.json` (externally-hosted agent records). Both are guarded
//! by a sibling `.lock` advisory file lock so cooperating processes
//! serialize, plus an in-process mutex taken **before** the file lock to
//! avoid self-deadlock by reentry.

mod file;
mod remote;
mod store;

pub use remote::{RemoteSpawnRecord, RemoteSpawnState, RemoteSpawnStore};
pub use store::{SessionRecord, SessionRegistry};

use serde::{Deserialize, Serialize};

/// How a session came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionOrigin {
    Pool,
    Spawn,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Idle,
    Terminated,
    Stale,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("timed out acquiring file lock '{path}' (a peer may be stuck)")]
    LockTimeout { path: String },

    #[error("failed to acquire file lock '{path}': {message}")]
    LockFailed { path: String, message: String },

    #[error("registry IO error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize registry '{path}': {message}")]
    Serde { path: String, message: String },

    #[error(
        "registry file '{path}' has schema version {found}, but this daemon supports at most {supported}"
    )]
    UnsupportedVersion {
        path: String,
        found: u32,
        supported: u32,
    },

    #[error(
        "remote spawn for provider '{provider}' request '{request_id}' already exists as spawn '{existing_spawn_id}'"
    )]
    IdempotencyConflict {
        provider: String,
        request_id: String,
        existing_spawn_id: String,
    },
}

impl RegistryError {
    /// Caller-checkable predicate for the `{provider, request_id}`
    /// uniqueness violation.
    pub fn is_idempotency_conflict(&self) -> bool {
        matches!(self, RegistryError::IdempotencyConflict { .. })
    }
}
