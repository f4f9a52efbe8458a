//! Cross-process mutual exclusion for job runs.
//!
//! A [`Coordinator`] (a fast key-value service with atomic set-if-absent and
//! expiry) arbitrates between fleet members. When it cannot be reached the lock
//! degrades to a per-name, process-local fallback: same-process runs stay
//! exclusive, cross-process races become possible until the coordinator is back.

mod local;
mod memory;
#[cfg(feature = "redis")]
mod redis_coordinator;

pub use local::LocalLocks;
pub use memory::MemoryCoordinator;
#[cfg(feature = "redis")]
pub use redis_coordinator::RedisCoordinator;

use crate::metrics;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Prefix for every lock key written to the coordinator.
pub const LOCK_KEY_PREFIX: &str = "fleet-jobs:lock:";

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Coordinator unavailable: {0}")]
    Unavailable(String),

    #[error("Coordinator call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Coordinator command failed: {0}")]
    Command(String),
}

/// Client of the external coordination service.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Create `key` with `value` expiring after `ttl`, only if it does not exist.
    /// Returns `true` when this call created it.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinatorError>;

    async fn delete(&self, key: &str) -> Result<(), CoordinatorError>;

    async fn exists(&self, key: &str) -> Result<bool, CoordinatorError>;

    /// Cheap reachability check.
    async fn available(&self) -> bool;
}

/// Where a held lock lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockBackend {
    Coordinator,
    /// Process-local fallback while the coordinator is unreachable.
    Local,
}

/// Proof of exclusive ownership of one job name, valid until released or expired.
#[derive(Debug)]
#[must_use = "a held lock should be passed back to DistributedLock::release"]
pub struct LockHandle {
    key: String,
    backend: LockBackend,
    ttl: Duration,
}

impl LockHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn backend(&self) -> LockBackend {
        self.backend
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Non-blocking, TTL-bounded job lock with local degradation.
pub struct DistributedLock {
    coordinator: Option<Arc<dyn Coordinator>>,
    local: LocalLocks,
    owner_id: String,
    call_timeout: Duration,
}

impl DistributedLock {
    /// `owner_id` is stored as the lock value so operators can see who holds it.
    /// `call_timeout` bounds every single coordinator round trip.
    pub fn new(coordinator: Arc<dyn Coordinator>, owner_id: &str, call_timeout: Duration) -> Self {
        Self {
            coordinator: Some(coordinator),
            local: LocalLocks::new(),
            owner_id: owner_id.to_string(),
            call_timeout,
        }
    }

    /// A lock without a coordinator: every acquisition uses the local fallback.
    pub fn local_only(owner_id: &str) -> Self {
        warn!("No lock coordinator configured: job runs are exclusive within this process only");
        Self {
            coordinator: None,
            local: LocalLocks::new(),
            owner_id: owner_id.to_string(),
            call_timeout: Duration::ZERO,
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn coordinator_key(name: &str) -> String {
        format!("{}{}", LOCK_KEY_PREFIX, name)
    }

    async fn with_timeout<T, F>(&self, call: F) -> Result<T, CoordinatorError>
    where
        F: Future<Output = Result<T, CoordinatorError>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CoordinatorError::Timeout(self.call_timeout)),
        }
    }

    async fn coordinator_available(&self, coordinator: &dyn Coordinator) -> bool {
        tokio::time::timeout(self.call_timeout, coordinator.available())
            .await
            .unwrap_or(false)
    }

    fn handle(name: &str, backend: LockBackend, ttl: Duration) -> LockHandle {
        LockHandle {
            key: name.to_string(),
            backend,
            ttl,
        }
    }

    /// Try to take the lock for `name` for at most `ttl`. Never waits.
    ///
    /// The in-process lock is always taken first, so a run that started on the
    /// local fallback still excludes same-process callers once the coordinator
    /// is back. `None` means somebody else holds it, or the coordinator answered
    /// with an error while still reachable (fail closed).
    pub async fn acquire(&self, name: &str, ttl: Duration) -> Option<LockHandle> {
        if !self.local.try_acquire(name, ttl) {
            debug!("Lock for {} is held within this process", name);
            return None;
        }

        let Some(coordinator) = self.coordinator.as_deref() else {
            metrics::record_lock_fallback();
            return Some(Self::handle(name, LockBackend::Local, ttl));
        };

        let key = Self::coordinator_key(name);
        match self
            .with_timeout(coordinator.set_if_absent(&key, &self.owner_id, ttl))
            .await
        {
            Ok(true) => Some(Self::handle(name, LockBackend::Coordinator, ttl)),
            Ok(false) => {
                self.local.release(name);
                None
            }
            Err(e) => {
                metrics::record_coordinator_error("acquire");
                if self.coordinator_available(coordinator).await {
                    error!(
                        "Lock acquisition for {} failed on a reachable coordinator, not running: {}",
                        name, e
                    );
                    self.local.release(name);
                    None
                } else {
                    warn!(
                        "Lock coordinator unreachable ({}), falling back to local lock for {}",
                        e, name
                    );
                    metrics::record_lock_fallback();
                    Some(Self::handle(name, LockBackend::Local, ttl))
                }
            }
        }
    }

    /// Release a lock obtained from [`Self::acquire`]. Idempotent; errors are logged.
    pub async fn release(&self, handle: LockHandle) {
        if handle.backend == LockBackend::Coordinator {
            if let Some(coordinator) = self.coordinator.as_deref() {
                let key = Self::coordinator_key(&handle.key);
                if let Err(e) = self.with_timeout(coordinator.delete(&key)).await {
                    metrics::record_coordinator_error("release");
                    error!(
                        "Failed to release lock for {} (expires within {:?}): {}",
                        handle.key, handle.ttl, e
                    );
                }
            }
        }
        self.local.release(&handle.key);
    }

    /// Whether anyone currently holds the lock for `name`.
    ///
    /// Best effort: an unreachable coordinator reads as "not held".
    pub async fn is_held(&self, name: &str) -> bool {
        if self.local.is_held(name) {
            return true;
        }
        let Some(coordinator) = self.coordinator.as_deref() else {
            return false;
        };
        match self
            .with_timeout(coordinator.exists(&Self::coordinator_key(name)))
            .await
        {
            Ok(held) => held,
            Err(e) => {
                metrics::record_coordinator_error("exists");
                warn!("Could not query lock state for {}: {}", name, e);
                false
            }
        }
    }
}
