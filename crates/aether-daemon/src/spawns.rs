//! Ad-hoc spawn registry.
//!
//! Agents launched outside the pool (by the user, or remotely) register
//! themselves here for observability. Entries are capacity-bounded while
//! running, kept for a TTL after exit, then swept.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};

use aether_core::process::pid_alive;
use aether_protocol::{SpawnInfo, SpawnState};

/// Display bound for the first-seen prompt.
pub const PROMPT_DISPLAY_LIMIT: usize = 160;

#[derive(Debug, thiserror::Error)]
pub enum SpawnRegistryError {
    #[error("spawn capacity reached ({cap} running entries)")]
    CapacityReached { cap: usize },

    #[error("invalid spawn entry: {reason}")]
    InvalidEntry { reason: String },
}

#[derive(Debug, Clone)]
pub struct SpawnEntry {
    pub spawn_id: String,
    pub pid: u32,
    pub session_id: String,
    pub state: SpawnState,
    /// First-seen prompt, truncated to [`PROMPT_DISPLAY_LIMIT`].
    pub prompt: String,
    pub log_path: Option<PathBuf>,
    pub spawn_time: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
}

impl SpawnEntry {
    /// A fresh running entry as created by `spawn.register`.
    pub fn running(spawn_id: impl Into<String>, pid: u32, prompt: &str) -> Self {
        Self {
            spawn_id: spawn_id.into(),
            pid,
            session_id: String::new(),
            state: SpawnState::Running,
            prompt: truncate_prompt(prompt),
            log_path: None,
            spawn_time: Utc::now(),
            exited_at: None,
        }
    }

    pub fn to_info(&self) -> SpawnInfo {
        SpawnInfo {
            spawn_id: self.spawn_id.clone(),
            pid: self.pid,
            session_id: self.session_id.clone(),
            state: self.state,
            prompt: self.prompt.clone(),
            spawn_time: self.spawn_time.to_rfc3339(),
            exited_at: self.exited_at.map(|t| t.to_rfc3339()),
        }
    }
}

fn truncate_prompt(prompt: &str) -> String {
    if prompt.chars().count() <= PROMPT_DISPLAY_LIMIT {
        return prompt.to_string();
    }
    let cut: String = prompt.chars().take(PROMPT_DISPLAY_LIMIT).collect();
    format!("{cut}…")
}

/// What the sweep decided for one entry in phase 1. Re-checked under the
/// write lock in phase 2 before mutating, so a concurrent re-registration is
/// not collateral damage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SweepAction {
    MarkExited(String),
    Remove(String),
}

pub struct SpawnRegistry {
    entries: RwLock<HashMap<String, SpawnEntry>>,
    capacity: usize,
}

impl SpawnRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Create or overwrite an entry.
    ///
    /// New running entries are rejected at capacity; exited entries don't
    /// count toward the cap. Re-registering an existing id overwrites in
    /// place regardless of the cap.
    ///
    /// # Panics
    ///
    /// Panics on an empty `spawn_id` or a zero PID for a running entry —
    /// the RPC boundary validates those, so hitting this is a caller bug.
    pub fn register(&self, entry: SpawnEntry) -> Result<(), SpawnRegistryError> {
        assert!(!entry.spawn_id.is_empty(), "spawn_id must not be empty");
        assert!(
            entry.state != SpawnState::Running || entry.pid > 0,
            "running spawn entry must have a PID"
        );

        // State/timestamp invariant: exited iff exited_at is set
        match (entry.state, entry.exited_at.is_some()) {
            (SpawnState::Exited, false) => {
                return Err(SpawnRegistryError::InvalidEntry {
                    reason: "exited entry without exited_at".to_string(),
                });
            }
            (SpawnState::Running, true) => {
                return Err(SpawnRegistryError::InvalidEntry {
                    reason: "running entry with exited_at".to_string(),
                });
            }
            _ => {}
        }

        let mut entries = self.entries.write();
        let is_new = !entries.contains_key(&entry.spawn_id);
        if is_new && entry.state == SpawnState::Running {
            let running = entries
                .values()
                .filter(|e| e.state == SpawnState::Running)
                .count();
            if running >= self.capacity {
                return Err(SpawnRegistryError::CapacityReached { cap: self.capacity });
            }
        }

        info!(
            event = "daemon.spawns.registered",
            spawn_id = %entry.spawn_id,
            pid = entry.pid,
            new = is_new,
        );
        entries.insert(entry.spawn_id.clone(), entry);
        Ok(())
    }

    /// Transition an entry to exited. Idempotent: the first call stamps
    /// `exited_at` and returns true; later calls return false without
    /// resetting the TTL clock.
    pub fn mark_exited(&self, spawn_id: &str) -> bool {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(spawn_id) else {
            return false;
        };
        if entry.state == SpawnState::Exited {
            return false;
        }
        entry.state = SpawnState::Exited;
        entry.exited_at = Some(Utc::now());
        info!(event = "daemon.spawns.exited", spawn_id = spawn_id);
        true
    }

    pub fn get(&self, spawn_id: &str) -> Option<SpawnEntry> {
        self.entries.read().get(spawn_id).cloned()
    }

    pub fn list(&self) -> Vec<SpawnEntry> {
        let mut entries: Vec<SpawnEntry> = self.entries.read().values().cloned().collect();
        entries.sort_by(|a, b| a.spawn_time.cmp(&b.spawn_time));
        entries
    }

    /// Set the session id if currently empty. Returns whether it was set.
    pub fn set_session_id(&self, spawn_id: &str, session_id: &str) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(spawn_id) {
            Some(entry) if entry.session_id.is_empty() => {
                entry.session_id = session_id.to_string();
                true
            }
            _ => false,
        }
    }

    /// Running entries that have not been correlated to a session yet.
    pub fn unassigned_running(&self) -> Vec<String> {
        self.entries
            .read()
            .values()
            .filter(|e| e.state == SpawnState::Running && e.session_id.is_empty())
            .map(|e| e.spawn_id.clone())
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|e| e.state == SpawnState::Running)
            .count()
    }

    /// Sweep dead and expired entries. Two phases: identify under the read
    /// lock, re-check and mutate under the write lock.
    pub fn sweep_dead(&self, exit_ttl: Duration) -> usize {
        let candidates = self.collect_sweep_candidates(exit_ttl, &pid_alive);
        self.apply_sweep(candidates, exit_ttl, &pid_alive)
    }

    pub(crate) fn collect_sweep_candidates(
        &self,
        exit_ttl: Duration,
        probe: &dyn Fn(u32) -> bool,
    ) -> Vec<SweepAction> {
        let now = Utc::now();
        let entries = self.entries.read();
        let mut actions = Vec::new();
        for entry in entries.values() {
            match entry.state {
                SpawnState::Running if !probe(entry.pid) => {
                    actions.push(SweepAction::MarkExited(entry.spawn_id.clone()));
                }
                SpawnState::Exited => {
                    if let Some(exited_at) = entry.exited_at
                        && is_past_ttl(exited_at, now, exit_ttl)
                    {
                        actions.push(SweepAction::Remove(entry.spawn_id.clone()));
                    }
                }
                _ => {}
            }
        }
        actions
    }

    pub(crate) fn apply_sweep(
        &self,
        candidates: Vec<SweepAction>,
        exit_ttl: Duration,
        probe: &dyn Fn(u32) -> bool,
    ) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write();
        let mut mutated = 0;
        for action in candidates {
            match action {
                SweepAction::MarkExited(spawn_id) => {
                    // Re-check: the entry may have been re-registered with a
                    // live PID between the phases
                    if let Some(entry) = entries.get_mut(&spawn_id)
                        && entry.state == SpawnState::Running
                        && !probe(entry.pid)
                    {
                        entry.state = SpawnState::Exited;
                        entry.exited_at = Some(now);
                        debug!(
                            event = "daemon.spawns.sweep_marked_exited",
                            spawn_id = %spawn_id,
                        );
                        mutated += 1;
                    }
                }
                SweepAction::Remove(spawn_id) => {
                    let expired = entries.get(&spawn_id).is_some_and(|entry| {
                        entry.state == SpawnState::Exited
                            && entry
                                .exited_at
                                .is_some_and(|at| is_past_ttl(at, now, exit_ttl))
                    });
                    if expired {
                        entries.remove(&spawn_id);
                        debug!(event = "daemon.spawns.sweep_removed", spawn_id = %spawn_id);
                        mutated += 1;
                    }
                }
            }
        }
        mutated
    }
}

fn is_past_ttl(exited_at: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
    let Ok(ttl) = chrono::Duration::from_std(ttl) else {
        return false;
    };
    now.signed_duration_since(exited_at) >= ttl
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, pid: u32) -> SpawnEntry {
        SpawnEntry::running(id, pid, "write tests for the parser")
    }

    #[test]
    fn test_register_and_get() {
        let registry = SpawnRegistry::new(4);
        registry.register(entry("sp-1", 100)).unwrap();
        let got = registry.get("sp-1").unwrap();
        assert_eq!(got.pid, 100);
        assert_eq!(got.state, SpawnState::Running);
        assert!(got.exited_at.is_none());
    }

    #[test]
    fn test_reregister_overwrites_in_place() {
        let registry = SpawnRegistry::new(1);
        registry.register(entry("sp-1", 100)).unwrap();
        // Same id at capacity: allowed, count unchanged
        registry.register(entry("sp-1", 200)).unwrap();
        assert_eq!(registry.running_count(), 1);
        assert_eq!(registry.get("sp-1").unwrap().pid, 200);
    }

    #[test]
    fn test_capacity_rejects_new_running_entries() {
        let registry = SpawnRegistry::new(1);
        registry.register(entry("sp-1", 100)).unwrap();
        let err = registry.register(entry("sp-2", 200)).unwrap_err();
        assert!(matches!(err, SpawnRegistryError::CapacityReached { cap: 1 }));
    }

    #[test]
    fn test_capacity_counts_only_running() {
        let registry = SpawnRegistry::new(1);
        // Many exited entries must not block a new running one
        for i in 0..128 {
            let id = format!("sp-old-{i}");
            registry.register(entry(&id, 100 + i)).unwrap();
            assert!(registry.mark_exited(&id));
        }
        registry.register(entry("sp-new", 999)).unwrap();
        assert_eq!(registry.running_count(), 1);
    }

    #[test]
    fn test_mark_exited_idempotent() {
        let registry = SpawnRegistry::new(4);
        registry.register(entry("sp-1", 100)).unwrap();
        assert!(registry.mark_exited("sp-1"));
        let first_exit = registry.get("sp-1").unwrap().exited_at.unwrap();

        // Second call returns false and does not reset the TTL clock
        assert!(!registry.mark_exited("sp-1"));
        assert_eq!(registry.get("sp-1").unwrap().exited_at.unwrap(), first_exit);
    }

    #[test]
    fn test_mark_exited_unknown_id_returns_false() {
        let registry = SpawnRegistry::new(4);
        assert!(!registry.mark_exited("sp-missing"));
    }

    #[test]
    fn test_invariant_exited_requires_timestamp() {
        let registry = SpawnRegistry::new(4);
        let mut bad = entry("sp-1", 100);
        bad.state = SpawnState::Exited;
        // exited_at still None
        let err = registry.register(bad).unwrap_err();
        assert!(matches!(err, SpawnRegistryError::InvalidEntry { .. }));
    }

    #[test]
    fn test_invariant_running_rejects_timestamp() {
        let registry = SpawnRegistry::new(4);
        let mut bad = entry("sp-1", 100);
        bad.exited_at = Some(Utc::now());
        let err = registry.register(bad).unwrap_err();
        assert!(matches!(err, SpawnRegistryError::InvalidEntry { .. }));
    }

    #[test]
    #[should_panic(expected = "spawn_id must not be empty")]
    fn test_empty_spawn_id_is_a_caller_bug() {
        let registry = SpawnRegistry::new(4);
        let _ = registry.register(entry("", 100));
    }

    #[test]
    fn test_set_session_id_once() {
        let registry = SpawnRegistry::new(4);
        registry.register(entry("sp-1", 100)).unwrap();
        assert!(registry.set_session_id("sp-1", "ses_a"));
        assert!(!registry.set_session_id("sp-1", "ses_b"));
        assert_eq!(registry.get("sp-1").unwrap().session_id, "ses_a");
    }

    #[test]
    fn test_unassigned_running_excludes_bound_and_exited() {
        let registry = SpawnRegistry::new(8);
        registry.register(entry("sp-bound", 100)).unwrap();
        registry.set_session_id("sp-bound", "ses_a");
        registry.register(entry("sp-free", 200)).unwrap();
        registry.register(entry("sp-gone", 300)).unwrap();
        registry.mark_exited("sp-gone");

        assert_eq!(registry.unassigned_running(), vec!["sp-free".to_string()]);
    }

    #[test]
    fn test_sweep_marks_dead_running_entries() {
        let registry = SpawnRegistry::new(4);
        // Own PID: alive. Huge PID: dead.
        registry.register(entry("sp-alive", std::process::id())).unwrap();
        registry.register(entry("sp-dead", 4_000_000)).unwrap();

        registry.sweep_dead(Duration::from_secs(3600));

        assert_eq!(registry.get("sp-alive").unwrap().state, SpawnState::Running);
        assert_eq!(registry.get("sp-dead").unwrap().state, SpawnState::Exited);
    }

    #[test]
    fn test_sweep_removes_expired_exited_entries() {
        let registry = SpawnRegistry::new(4);
        registry.register(entry("sp-1", 100)).unwrap();
        registry.mark_exited("sp-1");

        // Zero TTL: expired immediately
        registry.sweep_dead(Duration::ZERO);
        assert!(registry.get("sp-1").is_none());
    }

    #[test]
    fn test_sweep_keeps_recent_exited_entries() {
        let registry = SpawnRegistry::new(4);
        registry.register(entry("sp-1", 100)).unwrap();
        registry.mark_exited("sp-1");

        registry.sweep_dead(Duration::from_secs(3600));
        assert!(registry.get("sp-1").is_some());
    }

    #[test]
    fn test_sweep_toctou_reregistration_survives() {
        let registry = SpawnRegistry::new(4);
        registry.register(entry("sp-1", 100)).unwrap();
        registry.mark_exited("sp-1");

        // Phase 1 identifies sp-1 for removal
        let candidates =
            registry.collect_sweep_candidates(Duration::ZERO, &|_| false);
        assert!(candidates.contains(&SweepAction::Remove("sp-1".to_string())));

        // Concurrent re-registration back to running before phase 2
        registry.register(entry("sp-1", 500)).unwrap();

        // Phase 2 re-checks and must not delete the fresh entry. The live
        // probe keeps it running too.
        registry.apply_sweep(candidates, Duration::ZERO, &|_| true);
        let entry = registry.get("sp-1").unwrap();
        assert_eq!(entry.state, SpawnState::Running);
        assert_eq!(entry.pid, 500);
    }

    #[test]
    fn test_prompt_truncated_for_display() {
        let long = "x".repeat(400);
        let registry = SpawnRegistry::new(4);
        registry
            .register(SpawnEntry::running("sp-1", 100, &long))
            .unwrap();
        let prompt = registry.get("sp-1").unwrap().prompt;
        assert!(prompt.chars().count() <= PROMPT_DISPLAY_LIMIT + 1);
        assert!(prompt.ends_with('…'));
    }
}
