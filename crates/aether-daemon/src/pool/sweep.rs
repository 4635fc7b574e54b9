//! Liveness sweep: evict agents whose process vanished but whose wait
//! handle has hung.
//!
//! A PID reported gone with the reaper still blocked means the agent would
//! otherwise hold its slot forever. Eviction removes the agent and releases
//! the name; the orphaned reaper discovers the eviction through the
//! generation guard and exits without respawning.

use tracing::{info, warn};

use super::Pool;
use aether_core::process::pid_alive;

impl Pool {
    /// Probe each running agent's PID with a no-op signal and force-evict
    /// the dead ones. Returns the evicted agent ids.
    pub fn sweep_liveness(&self) -> Vec<String> {
        self.sweep_liveness_with(&pid_alive)
    }

    pub(crate) fn sweep_liveness_with(&self, probe: &dyn Fn(u32) -> bool) -> Vec<String> {
        // Phase 1: snapshot under the read lock, probe outside any lock
        let running: Vec<(String, String, u32, u64)> = {
            let inner = self.inner.read();
            inner
                .agents
                .values()
                .map(|a| (a.task_id.clone(), a.agent_id.clone(), a.pid, a.generation))
                .collect()
        };
        let dead: Vec<(String, String, u32, u64)> = running
            .into_iter()
            .filter(|(_, _, pid, _)| !probe(*pid))
            .collect();
        if dead.is_empty() {
            return Vec::new();
        }

        // Phase 2: evict under the write lock, re-checking the generation so
        // a task respawned in the gap is untouched
        let mut evicted = Vec::new();
        {
            let mut inner = self.inner.write();
            for (task_id, agent_id, pid, generation) in dead {
                let matches = inner
                    .agents
                    .get(&task_id)
                    .is_some_and(|a| a.generation == generation && !probe(a.pid));
                if !matches {
                    continue;
                }
                inner.agents.remove(&task_id);
                inner.names.release(&agent_id);
                warn!(
                    event = "daemon.pool.agent_evicted",
                    task_id = %task_id,
                    agent_id = %agent_id,
                    pid = pid,
                );
                evicted.push(agent_id);
            }
        }
        if !evicted.is_empty() {
            info!(event = "daemon.pool.liveness_sweep", evicted = evicted.len());
        }
        evicted
    }
}
