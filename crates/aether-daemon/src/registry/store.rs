//! The durable session registry: `{server_ref, session_id}` → routing record.

use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::file::LockedJsonFile;
use super::{RegistryError, SessionOrigin, SessionStatus};

/// Highest schema version this daemon can read.
const SUPPORTED_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub server_ref: String,
    pub session_id: String,
    #[serde(default)]
    pub directory: String,
    #[serde(default)]
    pub project: String,
    pub origin: SessionOrigin,
    /// Queue item id for pool sessions, spawn id for ad-hoc ones.
    #[serde(default)]
    pub work_ref: String,
    #[serde(default)]
    pub agent_id: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub last_seen_at: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionDocument {
    version: u32,
    #[serde(default)]
    sessions: Vec<SessionRecord>,
}

/// Sole writer to `sessions.json`.
///
/// Cross-process concurrency is handled by the advisory file lock; the
/// in-process mutex is taken first so a reentrant call cannot deadlock on
/// our own flock.
pub struct SessionRegistry {
    file: LockedJsonFile,
    guard: Mutex<()>,
}

impl SessionRegistry {
    pub fn new(path: PathBuf) -> Self {
        Self {
            file: LockedJsonFile::new(path),
            guard: Mutex::new(()),
        }
    }

    fn load_document(&self) -> Result<SessionDocument, RegistryError> {
        let Some(doc) = self.file.load::<SessionDocument>()? else {
            return Ok(SessionDocument {
                version: SUPPORTED_VERSION,
                sessions: Vec::new(),
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

    /// Insert or update the record keyed by `{server_ref, session_id}`.
    ///
    /// Updates preserve `created_at`, refresh `updated_at`, and refresh
    /// `last_seen_at` unless the incoming status is `terminated`.
    pub async fn upsert(&self, mut record: SessionRecord) -> Result<(), RegistryError> {
        let _in_process = self.guard.lock().await;
        let _flock = self.file.lock().await?;

        let mut doc = self.load_document()?;
        let now = Utc::now().to_rfc3339();

        let existing = doc.sessions.iter().position(|r| {
            r.server_ref == record.server_ref && r.session_id == record.session_id
        });
        match existing {
            Some(index) => {
                let current = &mut doc.sessions[index];
                record.created_at = current.created_at.clone();
                record.updated_at = now.clone();
                record.last_seen_at = if record.status == SessionStatus::Terminated {
                    current.last_seen_at.clone()
                } else {
                    now
                };
                *current = record;
            }
            None => {
                if record.created_at.is_empty() {
                    record.created_at = now.clone();
                }
                record.updated_at = now.clone();
                record.last_seen_at = now;
                info!(
                    event = "daemon.registry.session_created",
                    session_id = %record.session_id,
                    origin = ?record.origin,
                    work_ref = %record.work_ref,
                );
                doc.sessions.push(record);
            }
        }

        self.file.store(&doc)
    }

    /// Set the status of one record by primary key. Returns how many records
    /// changed (0 or 1).
    pub async fn set_status_by_session(
        &self,
        server_ref: &str,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<usize, RegistryError> {
        let _in_process = self.guard.lock().await;
        let _flock = self.file.lock().await?;

        let mut doc = self.load_document()?;
        let now = Utc::now().to_rfc3339();
        let mut changed = 0;
        for record in doc.sessions.iter_mut() {
            if record.server_ref == server_ref && record.session_id == session_id {
                apply_status(record, status, &now);
                changed += 1;
            }
        }
        if changed > 0 {
            self.file.store(&doc)?;
        }
        debug!(
            event = "daemon.registry.status_by_session",
            session_id = session_id,
            status = ?status,
            changed = changed,
        );
        Ok(changed)
    }

    /// Set the status of every record matching `{origin, work_ref}`, in one
    /// locked write so the transition is atomic across rows.
    pub async fn set_status_by_work_ref(
        &self,
        origin: SessionOrigin,
        work_ref: &str,
        status: SessionStatus,
    ) -> Result<usize, RegistryError> {
        let _in_process = self.guard.lock().await;
        let _flock = self.file.lock().await?;

        let mut doc = self.load_document()?;
        let now = Utc::now().to_rfc3339();
        let mut changed = 0;
        for record in doc.sessions.iter_mut() {
            if record.origin == origin && record.work_ref == work_ref {
                apply_status(record, status, &now);
                changed += 1;
            }
        }
        if changed > 0 {
            self.file.store(&doc)?;
        }
        debug!(
            event = "daemon.registry.status_by_work_ref",
            origin = ?origin,
            work_ref = work_ref,
            status = ?status,
            changed = changed,
        );
        Ok(changed)
    }

    /// All records, most recently updated first.
    pub async fn list(&self) -> Result<Vec<SessionRecord>, RegistryError> {
        let _in_process = self.guard.lock().await;
        let _flock = self.file.lock().await?;

        let mut doc = self.load_document()?;
        doc.sessions
            .sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(doc.sessions)
    }

    /// The most recent active/idle pool session for a work item, if any.
    /// Used by the pool to append a resume flag on spawn.
    pub async fn lookup_resumable(
        &self,
        work_ref: &str,
    ) -> Result<Option<String>, RegistryError> {
        let records = self.list().await?;
        Ok(records
            .into_iter()
            .find(|r| {
                r.origin == SessionOrigin::Pool
                    && r.work_ref == work_ref
                    && matches!(r.status, SessionStatus::Active | SessionStatus::Idle)
            })
            .map(|r| r.session_id))
    }
}

fn apply_status(record: &mut SessionRecord, status: SessionStatus, now: &str) {
    record.status = status;
    record.updated_at = now.to_string();
    if status != SessionStatus::Terminated {
        record.last_seen_at = now.to_string();
    }
}
