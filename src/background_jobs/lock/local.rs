use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Per-name in-process locks with expiry, used while the coordinator is down.
#[derive(Debug, Default)]
pub struct LocalLocks {
    held: Mutex<HashMap<String, Instant>>,
}

impl LocalLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take `name` for `ttl` unless a live entry exists. Expired entries are replaced.
    pub fn try_acquire(&self, name: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut held = self.held();
        held.retain(|_, expires_at| *expires_at > now);
        if held.contains_key(name) {
            return false;
        }
        held.insert(name.to_string(), now + ttl);
        true
    }

    pub fn release(&self, name: &str) {
        self.held().remove(name);
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held()
            .get(name)
            .is_some_and(|expires_at| *expires_at > Instant::now())
    }
}
