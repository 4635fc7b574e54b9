//! Process starter seam.
//!
//! Launches one agent child with a specific command line, the agent
//! identifier in its environment, its own process group (so terminal
//! signals never propagate to the daemon), and an output writer for its
//! combined stdout/stderr.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tracing::info;

/// Environment variable carrying the assigned agent name into the child.
pub const AGENT_ID_ENV: &str = "AETHERFLOW_AGENT_ID";

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("spawn command is empty")]
    EmptyCommand,

    #[error("failed to launch '{program}': {message}")]
    LaunchFailed { program: String, message: String },

    #[error("failed to prepare output sink: {source}")]
    OutputSink {
        #[from]
        source: std::io::Error,
    },
}

/// Everything needed to launch one agent child.
#[derive(Debug, Clone)]
pub struct StartSpec {
    /// Full argv: program followed by its arguments (prompt last).
    pub argv: Vec<String>,
    /// Extra environment on top of the daemon's own.
    pub env: Vec<(String, String)>,
    pub workdir: Option<PathBuf>,
}

/// Handle to a launched child. One reaper task blocks on [`wait`] per child.
///
/// [`wait`]: AgentChild::wait
#[async_trait]
pub trait AgentChild: Send + std::fmt::Debug {
    fn pid(&self) -> u32;

    /// Block until the child exits. Returns the exit code: 0 for clean exit,
    /// the status code otherwise, and -1 when the child died to a signal.
    async fn wait(&mut self) -> std::io::Result<i32>;
}

/// Abstract process launcher so tests can substitute controllable children.
#[async_trait]
pub trait ProcessStarter: Send + Sync {
    /// Launch the child described by `spec` with `output` as its combined
    /// stdout/stderr.
    async fn start(
        &self,
        spec: StartSpec,
        output: std::fs::File,
    ) -> Result<Box<dyn AgentChild>, StartError>;
}

/// Production starter backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemStarter;

impl SystemStarter {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug)]
struct SystemChild {
    pid: u32,
    child: tokio::process::Child,
}

#[async_trait]
impl AgentChild for SystemChild {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn wait(&mut self) -> std::io::Result<i32> {
        let status = self.child.wait().await?;
        Ok(status.code().unwrap_or(-1))
    }
}

#[async_trait]
impl ProcessStarter for SystemStarter {
    async fn start(
        &self,
        spec: StartSpec,
        output: std::fs::File,
    ) -> Result<Box<dyn AgentChild>, StartError> {
        let Some((program, args)) = spec.argv.split_first() else {
            return Err(StartError::EmptyCommand);
        };

        let stderr = output.try_clone()?;
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::from(output))
            .stderr(Stdio::from(stderr));
        if let Some(dir) = &spec.workdir {
            cmd.current_dir(dir);
        }
        // Own process group: terminal signals must not reach the daemon's
        // children, and the daemon's signals must not reach them.
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| StartError::LaunchFailed {
            program: program.clone(),
            message: e.to_string(),
        })?;

        let pid = child.id().unwrap_or(0);
        info!(
            event = "core.starter.launched",
            program = %program,
            pid = pid,
        );

        Ok(Box::new(SystemChild { pid, child }))
    }
}
