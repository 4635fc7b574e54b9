use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("user config directory not found — set $HOME or $XDG_CONFIG_HOME")]
    ConfigDirNotFound,
}

/// Centralized path construction for the aetherflow directory layout.
///
/// Single source of truth for every path under `<user-config>/aetherflow/`.
/// Use `resolve()` in production code and `from_dir()` in tests.
#[derive(Debug, Clone)]
pub struct AetherPaths {
    base_dir: PathBuf,
}

impl AetherPaths {
    /// Resolve paths from the user's config directory
    /// (`~/.config/aetherflow` on Linux).
    pub fn resolve() -> Result<Self, PathError> {
        let config = dirs::config_dir().ok_or(PathError::ConfigDirNotFound)?;
        Ok(Self {
            base_dir: config.join("aetherflow"),
        })
    }

    /// Create paths from an explicit base directory. Use in tests.
    pub fn from_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// The base `<user-config>/aetherflow` directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    // --- Top-level subdirectories ---

    pub fn sessions_dir(&self) -> PathBuf {
        self.base_dir.join("sessions")
    }

    pub fn sockets_dir(&self) -> PathBuf {
        self.base_dir.join("sockets")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    // --- Top-level files ---

    pub fn user_config(&self) -> PathBuf {
        self.base_dir.join("config.toml")
    }

    // --- Durable registry files ---

    pub fn sessions_file(&self) -> PathBuf {
        self.sessions_dir().join("sessions.json")
    }

    pub fn remote_spawns_file(&self) -> PathBuf {
        self.sessions_dir().join("remote_spawns.json")
    }

    /// Advisory lock file guarding a registry file: `<file>.lock` alongside it.
    pub fn lock_file_for(file: &Path) -> PathBuf {
        let mut os = file.as_os_str().to_os_string();
        os.push(".lock");
        PathBuf::from(os)
    }

    // --- Parameterized paths ---

    /// Default daemon socket for a project: `<base>/sockets/<project>.sock`.
    pub fn daemon_socket(&self, project: &str) -> PathBuf {
        self.sockets_dir().join(format!("{project}.sock"))
    }

    /// Default log directory for a project: `<base>/logs/<project>/`.
    pub fn project_log_dir(&self, project: &str) -> PathBuf {
        self.logs_dir().join(project)
    }

    /// Append-only agent log for one task: `<log_dir>/<task_id>.log`.
    pub fn task_log_file(log_dir: &Path, task_id: &str) -> PathBuf {
        log_dir.join(format!("{task_id}.log"))
    }
}
