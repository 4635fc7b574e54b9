//! aether-core: core library for the aetherflow agent supervisor.
//!
//! Provides the seams the daemon is built on: the command runner, the work
//! source over the external task queue, the prompt renderer, the agent name
//! reservoir, and the process starter. Each seam is an async trait with a
//! system implementation and a scripted fake in [`testing`].
//!
//! # Main Entry Points
//!
//! - [`runner`] - run external programs, capture output
//! - [`worksource`] - claim / complete / introspect queue items
//! - [`prompts`] - render the initial message for a role
//! - [`starter`] - launch agent children with their own process group
//! - [`process`] - PID liveness probe and SIGTERM delivery

pub mod logging;
pub mod names;
pub mod process;
pub mod prompts;
pub mod runner;
pub mod starter;
pub mod testing;
pub mod worksource;

// Re-export shared wire/domain types from aether-protocol
pub use aether_protocol::{AgentState, PoolMode, Role, SpawnState, TaskInfo};

pub use logging::init_logging;
pub use names::NameReservoir;
pub use prompts::{PromptError, PromptRenderer};
pub use runner::{CmdOutput, CommandRunner, RunnerError, SystemRunner};
pub use starter::{AgentChild, ProcessStarter, StartError, StartSpec, SystemStarter};
pub use worksource::{ProgWorkSource, TaskDetail, WorkSource, WorkSourceError, is_valid_task_id};
