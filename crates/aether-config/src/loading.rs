//! Configuration loading and merging.
//!
//! Later sources override earlier ones: defaults, then the user config file,
//! then CLI flags. Missing config files are not errors; parse failures are.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::errors::ConfigError;
use crate::types::DaemonConfig;
use crate::validation::validate_config;

/// On-disk configuration shape. Every field optional so a partial file
/// overrides only what it names.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub socket_path: Option<PathBuf>,
    pub project: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub pool_size: Option<usize>,
    pub spawn_cmd: Option<String>,
    pub max_retries: Option<u32>,
    pub prompt_dir: Option<String>,
    pub solo: Option<bool>,
    pub log_dir: Option<PathBuf>,
    pub reconcile_interval_secs: Option<u64>,
    pub server_url: Option<String>,
    pub mainline_branch: Option<String>,
    pub branch_prefix: Option<String>,
    pub spawn_capacity: Option<usize>,
    pub exit_ttl_secs: Option<u64>,
}

/// CLI-flag overrides. Same shape as [`FileConfig`]; highest priority.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub socket_path: Option<PathBuf>,
    pub project: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub pool_size: Option<usize>,
    pub spawn_cmd: Option<String>,
    pub max_retries: Option<u32>,
    pub prompt_dir: Option<String>,
    pub solo: Option<bool>,
    pub log_dir: Option<PathBuf>,
    pub reconcile_interval_secs: Option<u64>,
    pub server_url: Option<String>,
}

/// Load the effective configuration: defaults + user file + CLI overrides,
/// then derive default paths and validate.
pub fn load(overrides: CliOverrides) -> Result<DaemonConfig, ConfigError> {
    let paths = aether_paths::AetherPaths::resolve()?;
    load_from(&paths, overrides)
}

/// Like [`load`] but with an explicit paths root. Use in tests.
pub fn load_from(
    paths: &aether_paths::AetherPaths,
    overrides: CliOverrides,
) -> Result<DaemonConfig, ConfigError> {
    let mut config = DaemonConfig::defaults();

    match read_config_file(&paths.user_config()) {
        Ok(Some(file)) => apply_file(&mut config, file),
        Ok(None) => {} // No config file — continue with defaults
        Err(e) => return Err(e),
    }

    apply_overrides(&mut config, overrides);

    // Derive default paths that depend on the project name
    if !config.project.is_empty() {
        if config.socket_path.as_os_str().is_empty() {
            config.socket_path = paths.daemon_socket(&config.project);
        }
        if config.log_dir.as_os_str().is_empty() {
            config.log_dir = paths.project_log_dir(&config.project);
        }
    }

    // Resolve log_dir to absolute before validation so the daemon never
    // depends on its working directory
    if config.log_dir.is_relative() {
        let cwd = std::env::current_dir().map_err(|e| ConfigError::LogDirUnresolvable {
            message: e.to_string(),
        })?;
        config.log_dir = cwd.join(&config.log_dir);
    }

    validate_config(&config)?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<Option<FileConfig>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ConfigError::FileRead {
                path: path.display().to_string(),
                message: e.to_string(),
            });
        }
    };
    let file: FileConfig = toml::from_str(&content).map_err(|e| ConfigError::FileParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    tracing::debug!(
        event = "config.file_loaded",
        path = %path.display(),
    );
    Ok(Some(file))
}

fn apply_file(config: &mut DaemonConfig, file: FileConfig) {
    if let Some(v) = file.socket_path {
        config.socket_path = v;
    }
    if let Some(v) = file.project {
        config.project = v;
    }
    if let Some(v) = file.poll_interval_secs {
        config.poll_interval = Duration::from_secs(v);
    }
    if let Some(v) = file.pool_size {
        config.pool_size = v;
    }
    if let Some(v) = file.spawn_cmd {
        config.spawn_cmd = v;
    }
    if let Some(v) = file.max_retries {
        config.max_retries = v;
    }
    if let Some(v) = file.prompt_dir {
        config.prompt_dir = v;
    }
    if let Some(v) = file.solo {
        config.solo = v;
    }
    if let Some(v) = file.log_dir {
        config.log_dir = v;
    }
    if let Some(v) = file.reconcile_interval_secs {
        config.reconcile_interval = Duration::from_secs(v);
    }
    if let Some(v) = file.server_url {
        config.server_url = v;
    }
    if let Some(v) = file.mainline_branch {
        config.mainline_branch = v;
    }
    if let Some(v) = file.branch_prefix {
        config.branch_prefix = v;
    }
    if let Some(v) = file.spawn_capacity {
        config.spawn_capacity = v;
    }
    if let Some(v) = file.exit_ttl_secs {
        config.exit_ttl = Duration::from_secs(v);
    }
}

fn apply_overrides(config: &mut DaemonConfig, overrides: CliOverrides) {
    if let Some(v) = overrides.socket_path {
        config.socket_path = v;
    }
    if let Some(v) = overrides.project {
        config.project = v;
    }
    if let Some(v) = overrides.poll_interval_secs {
        config.poll_interval = Duration::from_secs(v);
    }
    if let Some(v) = overrides.pool_size {
        config.pool_size = v;
    }
    if let Some(v) = overrides.spawn_cmd {
        config.spawn_cmd = v;
    }
    if let Some(v) = overrides.max_retries {
        config.max_retries = v;
    }
    if let Some(v) = overrides.prompt_dir {
        config.prompt_dir = v;
    }
    if let Some(v) = overrides.solo {
        config.solo = v;
    }
    if let Some(v) = overrides.log_dir {
        config.log_dir = v;
    }
    if let Some(v) = overrides.reconcile_interval_secs {
        config.reconcile_interval = Duration::from_secs(v);
    }
    if let Some(v) = overrides.server_url {
        config.server_url = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aether_paths::AetherPaths;

    fn overrides_with_required() -> CliOverrides {
        CliOverrides {
            project: Some("myproj".to_string()),
            spawn_cmd: Some("agent-cli run".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_load_defaults_with_required_overrides() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = AetherPaths::from_dir(dir.path().to_path_buf());

        let config = load_from(&paths, overrides_with_required()).unwrap();

        assert_eq!(config.project, "myproj");
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.mainline_branch, "main");
        // Derived paths land under the config root
        assert_eq!(config.socket_path, paths.daemon_socket("myproj"));
        assert_eq!(config.log_dir, paths.project_log_dir("myproj"));
        assert!(config.log_dir.is_absolute());
    }

    #[test]
    fn test_load_missing_project_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = AetherPaths::from_dir(dir.path().to_path_buf());

        let result = load_from(&paths, CliOverrides::default());
        assert!(matches!(result, Err(ConfigError::ProjectMissing)));
    }

    #[test]
    fn test_file_config_overrides_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = AetherPaths::from_dir(dir.path().to_path_buf());
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(
            paths.user_config(),
            r#"
project = "filed"
spawn_cmd = "agent-cli run"
pool_size = 7
poll_interval_secs = 3
solo = true
"#,
        )
        .unwrap();

        let config = load_from(&paths, CliOverrides::default()).unwrap();
        assert_eq!(config.project, "filed");
        assert_eq!(config.pool_size, 7);
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert!(config.solo);
    }

    #[test]
    fn test_cli_overrides_beat_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = AetherPaths::from_dir(dir.path().to_path_buf());
        std::fs::write(
            paths.user_config(),
            "project = \"filed\"\nspawn_cmd = \"agent-cli run\"\npool_size = 7\n",
        )
        .unwrap();

        let mut overrides = CliOverrides::default();
        overrides.pool_size = Some(1);
        let config = load_from(&paths, overrides).unwrap();
        assert_eq!(config.pool_size, 1);
        assert_eq!(config.project, "filed");
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = AetherPaths::from_dir(dir.path().to_path_buf());
        std::fs::write(paths.user_config(), "not = [valid").unwrap();

        let result = load_from(&paths, overrides_with_required());
        assert!(matches!(result, Err(ConfigError::FileParse { .. })));
    }

    #[test]
    fn test_explicit_socket_path_is_kept() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = AetherPaths::from_dir(dir.path().to_path_buf());

        let mut overrides = overrides_with_required();
        overrides.socket_path = Some(PathBuf::from("/tmp/custom.sock"));
        let config = load_from(&paths, overrides).unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/custom.sock"));
    }
}
