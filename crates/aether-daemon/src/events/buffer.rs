//! Per-session bounded ring buffer of opaque events.
//!
//! Events arrive over the fire-and-forget `session.event` RPC and from the
//! startup backfill. The buffer is the only owner of its slices; readers get
//! copies and never hold the lock across I/O.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

/// Default per-session event cap.
pub const DEFAULT_CAPACITY: usize = 2000;

/// An opaque ingest record. Append-only and immutable once pushed.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub event_type: String,
    pub session_id: String,
    /// Wall-clock milliseconds; monotone with insertion order per session.
    pub timestamp: i64,
    pub data: serde_json::Value,
}

impl From<SessionEvent> for aether_protocol::SessionEventWire {
    fn from(ev: SessionEvent) -> Self {
        Self {
            event_type: ev.event_type,
            session_id: ev.session_id,
            timestamp: ev.timestamp,
            data: ev.data,
        }
    }
}

struct SessionSlot {
    events: VecDeque<SessionEvent>,
    last_push: Instant,
}

/// Maps `session_id -> bounded sequence of events`.
pub struct EventBuffer {
    sessions: RwLock<HashMap<String, SessionSlot>>,
    capacity: usize,
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Append one event. When the session is at capacity the oldest event is
    /// dropped. O(1) amortised.
    pub fn push(&self, event: SessionEvent) {
        let mut sessions = self.sessions.write();
        let slot = sessions
            .entry(event.session_id.clone())
            .or_insert_with(|| SessionSlot {
                events: VecDeque::new(),
                last_push: Instant::now(),
            });
        if slot.events.len() == self.capacity {
            slot.events.pop_front();
        }
        slot.events.push_back(event);
        slot.last_push = Instant::now();
    }

    /// Copy of the session's entire sequence, oldest first.
    pub fn events(&self, session_id: &str) -> Vec<SessionEvent> {
        self.sessions
            .read()
            .get(session_id)
            .map(|slot| slot.events.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Events with `timestamp > after`, oldest first.
    ///
    /// Timestamps are monotone with insertion order, so a reverse scan finds
    /// the boundary without walking the whole buffer.
    pub fn events_since(&self, session_id: &str, after: i64) -> Vec<SessionEvent> {
        let sessions = self.sessions.read();
        let Some(slot) = sessions.get(session_id) else {
            return Vec::new();
        };
        let newer = slot
            .events
            .iter()
            .rev()
            .take_while(|ev| ev.timestamp > after)
            .count();
        slot.events
            .iter()
            .skip(slot.events.len() - newer)
            .cloned()
            .collect()
    }

    /// True when the session has no buffered events.
    pub fn is_empty(&self, session_id: &str) -> bool {
        self.sessions
            .read()
            .get(session_id)
            .is_none_or(|slot| slot.events.is_empty())
    }

    pub fn clear(&self, session_id: &str) {
        self.sessions.write().remove(session_id);
    }

    /// Drop sessions whose last push is older than `ttl`. Returns how many
    /// sessions were dropped.
    pub fn sweep_idle(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, slot| slot.last_push.elapsed() < ttl);
        let dropped = before - sessions.len();
        if dropped > 0 {
            debug!(event = "daemon.events.idle_swept", dropped = dropped);
        }
        dropped
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}
