//! Configuration validation.
//!
//! Runs exactly once, after defaults + file + CLI merging and before the
//! daemon starts any subsystem.

use std::time::Duration;

use crate::errors::ConfigError;
use crate::types::DaemonConfig;

/// Minimum reconciler interval. Shorter intervals hammer the queue CLI and
/// the git remote for no benefit.
const MIN_RECONCILE_INTERVAL: Duration = Duration::from_secs(5);

/// Project names share the task-id character set: first char alphanumeric,
/// rest alphanumeric plus `.`, `_`, `-`.
pub fn is_valid_project_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Validate a resolved [`DaemonConfig`].
///
/// # Validation Rules
///
/// - `project` is required and must match the project-name character set
/// - `poll_interval` and `pool_size` must be positive
/// - `spawn_cmd` must be non-empty
/// - `reconcile_interval` must be at least 5 seconds
/// - non-empty `prompt_dir` must contain `worker.md` (empty means embedded)
/// - `log_dir` must be absolute by the time validation runs
pub fn validate_config(config: &DaemonConfig) -> Result<(), ConfigError> {
    if config.project.is_empty() {
        return Err(ConfigError::ProjectMissing);
    }
    if !is_valid_project_name(&config.project) {
        return Err(ConfigError::InvalidProject {
            project: config.project.clone(),
        });
    }

    if config.poll_interval.is_zero() {
        return Err(ConfigError::InvalidPollInterval);
    }
    if config.pool_size == 0 {
        return Err(ConfigError::InvalidPoolSize);
    }

    if config.spawn_cmd.trim().is_empty() {
        return Err(ConfigError::SpawnCmdEmpty);
    }
    // The spawn binary not being on PATH is not fatal (it may be installed
    // later, or the template may use an absolute path), but worth a warning.
    if let Some(program) = config.spawn_cmd.split_whitespace().next()
        && !program.contains('/')
        && which::which(program).is_err()
    {
        tracing::warn!(
            event = "config.spawn_cmd_not_on_path",
            program = program,
        );
    }

    if config.reconcile_interval < MIN_RECONCILE_INTERVAL {
        return Err(ConfigError::ReconcileIntervalTooShort {
            min_secs: MIN_RECONCILE_INTERVAL.as_secs(),
            got_secs: config.reconcile_interval.as_secs(),
        });
    }

    // Empty prompt_dir is the embedded-templates sentinel; a non-empty dir
    // must hold at least the worker template.
    if !config.prompt_dir.is_empty() {
        let worker = std::path::Path::new(&config.prompt_dir).join("worker.md");
        if !worker.is_file() {
            return Err(ConfigError::PromptDirMissingWorker {
                dir: config.prompt_dir.clone(),
            });
        }
    }

    if config.log_dir.is_relative() {
        return Err(ConfigError::LogDirUnresolvable {
            message: format!("'{}' is not absolute", config.log_dir.display()),
        });
    }

    Ok(())
}
