//! The reconciler: promote "awaiting review" work items to done once their
//! branch has merged to mainline.
//!
//! A branch that no longer exists counts as merged — post-merge cleanup
//! deletes work branches, and treating absence as failure would strand the
//! item in review forever.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::types::ErrorLog;
use aether_core::runner::CommandRunner;
use aether_core::worksource::{WorkSource, is_valid_task_id};

pub struct Reconciler {
    pub work: Arc<dyn WorkSource>,
    pub runner: Arc<dyn CommandRunner>,
    pub repo_dir: PathBuf,
    pub mainline: String,
    pub branch_prefix: String,
    pub errors: Arc<ErrorLog>,
}

/// Outcome counts for one reconciler pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PassStats {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Reconciler {
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The immediate first tick would race daemon startup; skip it
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(event = "daemon.reconciler.cancelled");
                    return;
                }
                _ = ticker.tick() => {}
            }
            self.pass().await;
        }
    }

    /// One reconciliation pass. Per-item errors are warnings; only a failed
    /// review listing aborts the pass.
    pub async fn pass(&self) -> PassStats {
        let mut stats = PassStats::default();

        // Refresh mainline refs. A missing remote is a valid local-only
        // setup, not an error.
        if let Err(e) = aether_git::fetch_remote_branch(
            self.runner.as_ref(),
            &self.repo_dir,
            "origin",
            &self.mainline,
        )
        .await
        {
            debug!(event = "daemon.reconciler.fetch_skipped", error = %e);
        }

        let ids = match self.work.reviewing().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(event = "daemon.reconciler.reviewing_failed", error = %e);
                self.errors.push("reconcile", &e);
                return stats;
            }
        };

        for task_id in ids {
            if !is_valid_task_id(&task_id) {
                warn!(
                    event = "daemon.reconciler.invalid_id_skipped",
                    task_id = %task_id,
                );
                stats.failed += 1;
                continue;
            }
            match self.is_merged(&task_id).await {
                Ok(true) => match self.work.complete(&task_id).await {
                    Ok(()) => {
                        info!(
                            event = "daemon.reconciler.completed",
                            task_id = %task_id,
                        );
                        stats.completed += 1;
                    }
                    Err(e) => {
                        warn!(
                            event = "daemon.reconciler.complete_failed",
                            task_id = %task_id,
                            error = %e,
                        );
                        stats.failed += 1;
                    }
                },
                Ok(false) => stats.skipped += 1,
                Err(e) => {
                    warn!(
                        event = "daemon.reconciler.check_failed",
                        task_id = %task_id,
                        error = %e,
                    );
                    stats.failed += 1;
                }
            }
        }

        info!(
            event = "daemon.reconciler.pass_completed",
            completed = stats.completed,
            skipped = stats.skipped,
            failed = stats.failed,
        );
        stats
    }

    /// Merged means: the work branch is an ancestor of mainline, or the
    /// branch is gone (cleaned up post-merge).
    async fn is_merged(&self, task_id: &str) -> Result<bool, aether_git::GitError> {
        let branch = format!("{}/{}", self.branch_prefix, task_id);
        let exists =
            aether_git::branch_exists(self.runner.as_ref(), &self.repo_dir, &branch).await?;
        if !exists {
            debug!(
                event = "daemon.reconciler.branch_gone",
                branch = %branch,
            );
            return Ok(true);
        }
        aether_git::is_ancestor(self.runner.as_ref(), &self.repo_dir, &branch, &self.mainline)
            .await
    }
}
