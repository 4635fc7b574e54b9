//! Locked, atomically-written JSON documents.
//!
//! Writes go temp-file → fsync → rename → directory fsync, so readers in
//! other processes always observe a complete document. Mutations hold an
//! exclusive advisory lock on the sibling `.lock` file, acquired with
//! bounded retry so a stuck peer fails fast instead of wedging the daemon.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::fcntl::{Flock, FlockArg};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use super::RegistryError;

/// How long to retry the advisory lock before giving up.
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

pub(super) struct LockedJsonFile {
    path: PathBuf,
    lock_path: PathBuf,
}

impl LockedJsonFile {
    pub fn new(path: PathBuf) -> Self {
        let lock_path = aether_paths::AetherPaths::lock_file_for(&path);
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the exclusive advisory lock, retrying up to the timeout.
    ///
    /// The lock releases when the returned guard drops (RAII).
    pub async fn lock(&self) -> Result<Flock<File>, RegistryError> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RegistryError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }

        let deadline = tokio::time::Instant::now() + LOCK_TIMEOUT;
        loop {
            let lock_file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .mode(0o600)
                .open(&self.lock_path)
                .map_err(|e| RegistryError::Io {
                    path: self.lock_path.display().to_string(),
                    source: e,
                })?;

            match Flock::lock(lock_file, FlockArg::LockExclusiveNonblock) {
                Ok(guard) => return Ok(guard),
                Err((_, nix::errno::Errno::EWOULDBLOCK)) => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(RegistryError::LockTimeout {
                            path: self.lock_path.display().to_string(),
                        });
                    }
                    tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
                }
                Err((_, errno)) => {
                    return Err(RegistryError::LockFailed {
                        path: self.lock_path.display().to_string(),
                        message: errno.to_string(),
                    });
                }
            }
        }
    }

    /// Read the document, or `None` when the file does not exist yet.
    ///
    /// Call with the lock held when the read must observe a consistent
    /// snapshot relative to other mutators.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>, RegistryError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(RegistryError::Io {
                    path: self.path.display().to_string(),
                    source: e,
                });
            }
        };
        let doc = serde_json::from_str(&content).map_err(|e| RegistryError::Serde {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Some(doc))
    }

    /// Write the full document atomically. Must be called with the lock held.
    pub fn store<T: Serialize>(&self, doc: &T) -> Result<(), RegistryError> {
        let json =
            serde_json::to_string_pretty(doc).map_err(|e| RegistryError::Serde {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })?;

        let io_err = |e: std::io::Error| RegistryError::Io {
            path: self.path.display().to_string(),
            source: e,
        };

        let parent = self.path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent).map_err(io_err)?;

        let temp = self.path.with_extension("json.tmp");
        let write_temp = || -> std::io::Result<()> {
            use std::io::Write;

            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&temp)?;
            // Ensure 0600 even if the temp file pre-existed with wider mode
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            Ok(())
        };
        if let Err(e) = write_temp() {
            cleanup_temp_file(&temp, &e);
            return Err(io_err(e));
        }

        if let Err(e) = std::fs::rename(&temp, &self.path) {
            cleanup_temp_file(&temp, &e);
            return Err(io_err(e));
        }

        // fsync the directory so the rename itself is durable
        match File::open(parent) {
            Ok(dir) => {
                if let Err(e) = dir.sync_all() {
                    warn!(
                        event = "daemon.registry.dir_fsync_failed",
                        path = %parent.display(),
                        error = %e,
                    );
                }
            }
            Err(e) => {
                warn!(
                    event = "daemon.registry.dir_open_failed",
                    path = %parent.display(),
                    error = %e,
                );
            }
        }

        Ok(())
    }
}

fn cleanup_temp_file(temp: &Path, original_error: &std::io::Error) {
    if let Err(cleanup_err) = std::fs::remove_file(temp) {
        warn!(
            event = "daemon.registry.temp_cleanup_failed",
            temp_file = %temp.display(),
            original_error = %original_error,
            cleanup_error = %cleanup_err,
        );
    }
}
