//! Command runner seam.
//!
//! Everything that shells out — the work source, the reconciler's git
//! queries — goes through [`CommandRunner`] so tests can substitute a
//! scripted fake. A non-zero exit status is not an `Err`: the output is
//! returned with the status recorded and callers decide what failure means.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to execute '{program}': {message}")]
    Spawn { program: String, message: String },
}

/// Captured output of one external program run.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    /// Exit status code; -1 when the process died to a signal.
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Stderr trimmed for log/error messages.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Abstract "run external program, return stdout+stderr".
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<CmdOutput, RunnerError>;
}

/// Production runner backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    /// Working directory applied when a call passes `cwd: None`.
    pub default_cwd: Option<PathBuf>,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cwd(cwd: PathBuf) -> Self {
        Self {
            default_cwd: Some(cwd),
        }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<CmdOutput, RunnerError> {
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args);
        if let Some(dir) = cwd.or(self.default_cwd.as_deref()) {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await.map_err(|e| RunnerError::Spawn {
            program: program.to_string(),
            message: e.to_string(),
        })?;

        let result = CmdOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        tracing::debug!(
            event = "core.runner.completed",
            program = program,
            status = result.status,
        );

        Ok(result)
    }
}
