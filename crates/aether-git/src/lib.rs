//! aether-git: git CLI queries for the reconciler.
//!
//! Everything goes through the [`CommandRunner`] seam rather than
//! `std::process` directly so the reconciler can be tested against a
//! scripted runner. The git CLI inherits the user's SSH agent and credential
//! helpers automatically, which keeps auth code out of the daemon.

mod cli;
mod validation;

pub use cli::{branch_exists, fetch_remote_branch, is_ancestor};
pub use validation::validate_git_arg;

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("invalid git argument for {context}: {reason}")]
    InvalidArgument { context: String, reason: String },

    #[error("git {operation} failed: {message}")]
    OperationFailed { operation: String, message: String },

    #[error("failed to run git: {source}")]
    Runner {
        #[from]
        source: aether_core::RunnerError,
    },
}
