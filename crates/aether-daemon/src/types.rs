use std::collections::VecDeque;

use parking_lot::Mutex;

/// Bounded list of non-fatal errors, surfaced via `status.full`.
///
/// Oldest entries fall off the front; losing ancient errors is fine, the
/// list exists so an operator can see what has been going wrong recently.
#[derive(Debug)]
pub struct ErrorLog {
    entries: Mutex<VecDeque<String>>,
    cap: usize,
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new(100)
    }
}

impl ErrorLog {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            cap,
        }
    }

    pub fn push(&self, context: &str, error: &dyn std::fmt::Display) {
        let mut entries = self.entries.lock();
        if entries.len() == self.cap {
            entries.pop_front();
        }
        entries.push_back(format!("{context}: {error}"));
    }

    pub fn list(&self) -> Vec<String> {
        self.entries.lock().iter().cloned().collect()
    }
}
