#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("project is required (set `project` in config.toml or pass --project)")]
    ProjectMissing,

    #[error(
        "invalid project name '{project}': must start with a letter or digit and contain only letters, digits, '.', '_', '-'"
    )]
    InvalidProject { project: String },

    #[error("poll_interval must be greater than zero")]
    InvalidPollInterval,

    #[error("pool_size must be greater than zero")]
    InvalidPoolSize,

    #[error("spawn_cmd cannot be empty")]
    SpawnCmdEmpty,

    #[error("reconcile_interval must be at least {min_secs} seconds (got {got_secs})")]
    ReconcileIntervalTooShort { min_secs: u64, got_secs: u64 },

    #[error("prompt_dir '{dir}' does not contain worker.md")]
    PromptDirMissingWorker { dir: String },

    #[error("log_dir could not be resolved to an absolute path: {message}")]
    LogDirUnresolvable { message: String },

    #[error("failed to read config file '{path}': {message}")]
    FileRead { path: String, message: String },

    #[error("failed to parse config file '{path}': {message}")]
    FileParse { path: String, message: String },

    #[error("config directory could not be resolved: {source}")]
    Paths {
        #[from]
        source: aether_paths::PathError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_project_display_names_the_value() {
        let err = ConfigError::InvalidProject {
            project: "-bad".to_string(),
        };
        assert!(err.to_string().contains("'-bad'"));
    }

    #[test]
    fn test_reconcile_interval_display_carries_both_bounds() {
        let err = ConfigError::ReconcileIntervalTooShort {
            min_secs: 5,
            got_secs: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("at least 5"));
        assert!(msg.contains("got 1"));
    }
}
