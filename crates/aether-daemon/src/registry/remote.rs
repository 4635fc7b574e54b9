//! Durable companion store for externally-hosted ("remote") spawns.
//!
//! Keyed by `spawn_id`, with a `{provider, request_id}` idempotency
//! constraint: a retried provision request must land on the record it
//! created the first time, never mint a second one.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::file::LockedJsonFile;
use super::RegistryError;

const SUPPORTED_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteSpawnState {
    Requested,
    Running,
    Failed,
    Terminated,
}

impl RemoteSpawnState {
    /// Terminal records are eligible for pruning; non-terminal never are.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RemoteSpawnState::Failed | RemoteSpawnState::Terminated)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSpawnRecord {
    pub spawn_id: String,
    pub provider: String,
    pub request_id: String,
    #[serde(default)]
    pub provider_sandbox_id: String,
    #[serde(default)]
    pub provider_operation_id: String,
    #[serde(default)]
    pub server_ref: String,
    #[serde(default)]
    pub session_id: String,
    pub state: RemoteSpawnState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RemoteSpawnDocument {
    version: u32,
    #[serde(default)]
    spawns: Vec<RemoteSpawnRecord>,
}

pub struct RemoteSpawnStore {
    file: LockedJsonFile,
    guard: Mutex<()>,
}

impl RemoteSpawnStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            file: LockedJsonFile::new(path),
            guard: Mutex::new(()),
        }
    }

    fn load_document(&self) -> Result<RemoteSpawnDocument, RegistryError> {
        let Some(doc) = self.file.load::<RemoteSpawnDocument>()? else {
            return Ok(RemoteSpawnDocument {
                version: SUPPORTED_VERSION,
                spawns: Vec::new(),
            });
        };
        if doc.version > SUPPORTED_VERSION {
            return Err(RegistryError::UnsupportedVersion {
                path: self.file.path().display().to_string(),
                found: doc.version,
                supported: SUPPORTED_VERSION,
            });
        }
        Ok(doc)
    }

    /// Insert or update a record.
    ///
    /// A record with the same `{provider, request_id}` but a different
    /// `spawn_id` produces [`RegistryError::IdempotencyConflict`] and leaves
    /// the existing record untouched.
    pub async fn upsert(&self, mut record: RemoteSpawnRecord) -> Result<(), RegistryError> {
        let _in_process = self.guard.lock().await;
        let _flock = self.file.lock().await?;

        let mut doc = self.load_document()?;
        let now = Utc::now().to_rfc3339();

        if let Some(existing) = doc
            .spawns
            .iter()
            .find(|r| r.provider == record.provider && r.request_id == record.request_id)
            && existing.spawn_id != record.spawn_id
        {
            return Err(RegistryError::IdempotencyConflict {
                provider: record.provider,
                request_id: record.request_id,
                existing_spawn_id: existing.spawn_id.clone(),
            });
        }

        match doc.spawns.iter().position(|r| r.spawn_id == record.spawn_id) {
            Some(index) => {
                let current = &mut doc.spawns[index];
                record.created_at = current.created_at.clone();
                record.updated_at = now;
                *current = record;
            }
            None => {
                record.created_at = now.clone();
                record.updated_at = now;
                info!(
                    event = "daemon.registry.remote_spawn_created",
                    spawn_id = %record.spawn_id,
                    provider = %record.provider,
                );
                doc.spawns.push(record);
            }
        }

        self.file.store(&doc)
    }

    pub async fn get(&self, spawn_id: &str) -> Result<Option<RemoteSpawnRecord>, RegistryError> {
        let _in_process = self.guard.lock().await;
        let _flock = self.file.lock().await?;
        let doc = self.load_document()?;
        Ok(doc.spawns.into_iter().find(|r| r.spawn_id == spawn_id))
    }

    pub async fn get_by_provider_request(
        &self,
        provider: &str,
        request_id: &str,
    ) -> Result<Option<RemoteSpawnRecord>, RegistryError> {
        let _in_process = self.guard.lock().await;
        let _flock = self.file.lock().await?;
        let doc = self.load_document()?;
        Ok(doc
            .spawns
            .into_iter()
            .find(|r| r.provider == provider && r.request_id == request_id))
    }

    pub async fn list(&self) -> Result<Vec<RemoteSpawnRecord>, RegistryError> {
        let _in_process = self.guard.lock().await;
        let _flock = self.file.lock().await?;
        let mut doc = self.load_document()?;
        doc.spawns.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(doc.spawns)
    }

    /// Prune terminal records: first those past the retention TTL, then the
    /// oldest until the total count fits the cap. Non-terminal records are
    /// never pruned.
    pub async fn prune(
        &self,
        retention: Duration,
        max_total: usize,
    ) -> Result<usize, RegistryError> {
        let _in_process = self.guard.lock().await;
        let _flock = self.file.lock().await?;

        let mut doc = self.load_document()?;
        let before = doc.spawns.len();
        let now = Utc::now();

        doc.spawns
            .retain(|r| !r.state.is_terminal() || !is_older_than(&r.updated_at, now, retention));

        if doc.spawns.len() > max_total {
            // Oldest-first among terminal records
            let mut terminal: Vec<(String, String)> = doc
                .spawns
                .iter()
                .filter(|r| r.state.is_terminal())
                .map(|r| (r.updated_at.clone(), r.spawn_id.clone()))
                .collect();
            terminal.sort();
            let excess = doc.spawns.len() - max_total;
            let victims: std::collections::HashSet<String> = terminal
                .into_iter()
                .take(excess)
                .map(|(_, spawn_id)| spawn_id)
                .collect();
            doc.spawns.retain(|r| !victims.contains(&r.spawn_id));
        }

        let pruned = before - doc.spawns.len();
        if pruned > 0 {
            self.file.store(&doc)?;
            debug!(event = "daemon.registry.remote_spawns_pruned", pruned = pruned);
        }
        Ok(pruned)
    }
}

fn is_older_than(timestamp: &str, now: DateTime<Utc>, ttl: Duration) -> bool {
    let Ok(ttl) = chrono::Duration::from_std(ttl) else {
        return false;
    };
    match DateTime::parse_from_rfc3339(timestamp) {
        Ok(ts) => now.signed_duration_since(ts.with_timezone(&Utc)) >= ttl,
        // Unparseable timestamps count as ancient
        Err(_) => true,
    }
}
