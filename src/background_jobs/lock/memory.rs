use super::{Coordinator, CoordinatorError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// In-memory [`Coordinator`] shared by every lock holding an `Arc` to it.
///
/// Stands in for the external service in single-node setups and tests.
/// [`Self::set_available`] simulates an outage.
#[derive(Debug)]
pub struct MemoryCoordinator {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    available: AtomicBool,
}

impl Default for MemoryCoordinator {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Current live value of `key`.
    pub fn value_of(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries()
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value.clone())
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, (String, Instant)>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<(), CoordinatorError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoordinatorError::Unavailable(
                "memory coordinator switched off".to_string(),
            ))
        }
    }
}

#[async_trait]
impl Coordinator for MemoryCoordinator {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinatorError> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries();
        if let Some((_, expires_at)) = entries.get(key) {
            if *expires_at > now {
                return Ok(false);
            }
        }
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), CoordinatorError> {
        self.check_available()?;
        self.entries().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CoordinatorError> {
        self.check_available()?;
        Ok(self.value_of(key).is_some())
    }

    async fn available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}
