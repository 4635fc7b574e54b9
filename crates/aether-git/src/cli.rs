//! Git CLI wrappers used by the reconciler.

use std::path::Path;

use tracing::{debug, warn};

use crate::GitError;
use crate::validation::validate_git_arg;
use aether_core::CommandRunner;

/// Fetch one branch from a remote.
///
/// Best-effort from the reconciler's point of view: the caller decides
/// whether a failure aborts the pass or is merely logged.
pub async fn fetch_remote_branch(
    runner: &dyn CommandRunner,
    repo: &Path,
    remote: &str,
    branch: &str,
) -> Result<(), GitError> {
    validate_git_arg(remote, "remote name")?;
    validate_git_arg(branch, "branch name")?;

    let args = vec![
        "fetch".to_string(),
        remote.to_string(),
        branch.to_string(),
    ];
    let output = runner.run("git", &args, Some(repo)).await?;
    if output.success() {
        debug!(
            event = "git.fetch_completed",
            remote = remote,
            branch = branch,
        );
        Ok(())
    } else {
        Err(GitError::OperationFailed {
            operation: "fetch".to_string(),
            message: output.stderr_trimmed().to_string(),
        })
    }
}

/// Does `branch` resolve to a commit in this repository?
///
/// Uses `git rev-parse --verify --quiet`, which exits non-zero for unknown
/// refs without writing to stderr.
pub async fn branch_exists(
    runner: &dyn CommandRunner,
    repo: &Path,
    branch: &str,
) -> Result<bool, GitError> {
    validate_git_arg(branch, "branch name")?;

    let args = vec![
        "rev-parse".to_string(),
        "--verify".to_string(),
        "--quiet".to_string(),
        format!("{branch}^{{commit}}"),
    ];
    let output = runner.run("git", &args, Some(repo)).await?;
    Ok(output.success())
}

/// Is `branch` an ancestor of `mainline` (i.e. already merged)?
///
/// `git merge-base --is-ancestor` exit codes: 0 = ancestor, 1 = not an
/// ancestor, anything else is a real failure.
pub async fn is_ancestor(
    runner: &dyn CommandRunner,
    repo: &Path,
    branch: &str,
    mainline: &str,
) -> Result<bool, GitError> {
    validate_git_arg(branch, "branch name")?;
    validate_git_arg(mainline, "mainline branch")?;

    let args = vec![
        "merge-base".to_string(),
        "--is-ancestor".to_string(),
        branch.to_string(),
        mainline.to_string(),
    ];
    let output = runner.run("git", &args, Some(repo)).await?;
    match output.status {
        0 => Ok(true),
        1 => Ok(false),
        code => {
            warn!(
                event = "git.is_ancestor_failed",
                branch = branch,
                mainline = mainline,
                code = code,
                stderr = %output.stderr_trimmed(),
            );
            Err(GitError::OperationFailed {
                operation: "merge-base --is-ancestor".to_string(),
                message: format!("exit {}: {}", code, output.stderr_trimmed()),
            })
        }
    }
}
