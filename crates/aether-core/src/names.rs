//! Human-readable agent name reservoir.
//!
//! Names look like `bold-otter-3`. Released names return to circulation
//! before new combinations are minted, so long-running daemons don't grow an
//! ever-longer tail of numbers. Not thread-safe on its own; the pool owns
//! one behind its lock.

use std::collections::{HashSet, VecDeque};

const ADJECTIVES: &[&str] = &[
    "bold", "calm", "deft", "eager", "fleet", "keen", "lucid", "merry", "noble", "quick",
    "sly", "stern", "swift", "tidy", "wry",
];

const NOUNS: &[&str] = &[
    "otter", "heron", "lynx", "marten", "osprey", "pika", "raven", "stoat", "tern", "vole",
];

#[derive(Debug, Default)]
pub struct NameReservoir {
    /// Names released by exited agents, reused FIFO.
    free: VecDeque<String>,
    /// Every name currently handed out.
    outstanding: HashSet<String>,
    next_index: usize,
}

impl NameReservoir {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a unique name, preferring released ones.
    pub fn acquire(&mut self) -> String {
        while let Some(name) = self.free.pop_front() {
            if self.outstanding.insert(name.clone()) {
                return name;
            }
        }
        loop {
            let name = self.mint();
            if self.outstanding.insert(name.clone()) {
                return name;
            }
        }
    }

    /// Return a name to circulation. Unknown names are ignored.
    pub fn release(&mut self, name: &str) {
        if self.outstanding.remove(name) {
            self.free.push_back(name.to_string());
        }
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }

    fn mint(&mut self) -> String {
        let i = self.next_index;
        self.next_index += 1;
        let adjective = ADJECTIVES[i % ADJECTIVES.len()];
        let noun = NOUNS[(i / ADJECTIVES.len()) % NOUNS.len()];
        let seq = i / (ADJECTIVES.len() * NOUNS.len()) + 1;
        format!("{adjective}-{noun}-{seq}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_yields_unique_names() {
        let mut reservoir = NameReservoir::new();
        let mut seen = HashSet::new();
        for _ in 0..500 {
            assert!(seen.insert(reservoir.acquire()), "duplicate name handed out");
        }
        assert_eq!(reservoir.outstanding_count(), 500);
    }

    #[test]
    fn test_released_name_returns_to_circulation() {
        let mut reservoir = NameReservoir::new();
        let first = reservoir.acquire();
        let _second = reservoir.acquire();
        reservoir.release(&first);
        assert_eq!(reservoir.acquire(), first);
    }

    #[test]
    fn test_release_unknown_name_is_ignored() {
        let mut reservoir = NameReservoir::new();
        reservoir.release("never-handed-out-1");
        let name = reservoir.acquire();
        assert_ne!(name, "never-handed-out-1");
        assert_eq!(reservoir.outstanding_count(), 1);
    }

    #[test]
    fn test_names_are_adjective_noun_seq() {
        let mut reservoir = NameReservoir::new();
        let name = reservoir.acquire();
        let parts: Vec<&str> = name.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert!(ADJECTIVES.contains(&parts[0]));
        assert!(NOUNS.contains(&parts[1]));
        assert!(parts[2].parse::<usize>().is_ok());
    }
}
