use super::job::{JobDefinition, JobError, RegisteredJob};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

/// Catalog of registered jobs keyed by unique name.
///
/// Written at startup, read on every execution. Safe to register from several
/// threads at once.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<RegisteredJob>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<RegisteredJob>>> {
        self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<RegisteredJob>>> {
        self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a job. A name can be registered only once; the first
    /// definition stays in place when a duplicate is rejected.
    pub fn register(&self, definition: JobDefinition) -> Result<(), JobError> {
        let job = RegisteredJob::from_definition(definition)?;

        let mut jobs = self.write();
        if jobs.contains_key(job.name()) {
            return Err(JobError::DuplicateJob(job.name().to_string()));
        }
        info!(
            "Registering job: {} - {} (timeout {:?})",
            job.name(),
            job.description(),
            job.timeout()
        );
        jobs.insert(job.name().to_string(), Arc::new(job));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredJob>> {
        self.read().get(name).cloned()
    }

    /// Snapshot of every registered job, in no particular order.
    pub fn list(&self) -> Vec<Arc<RegisteredJob>> {
        self.read().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::{FnJobHandler, JobContext};
    use serde_json::json;
    use std::time::Duration;

    fn definition(name: &str, description: &str) -> JobDefinition {
        JobDefinition::new(name, description).with_handler(FnJobHandler::new(
            |_ctx: JobContext| async { Ok::<_, anyhow::Error>(json!(null)) },
        ))
    }

    #[test]
    fn test_register_and_get() {
        let registry = JobRegistry::new();
        registry
            .register(definition("ping", "Replies pong").with_timeout(Duration::from_secs(2)))
            .unwrap();

        let job = registry.get("ping").unwrap();
        assert_eq!(job.name(), "ping");
        assert_eq!(job.description(), "Replies pong");
        assert_eq!(job.timeout(), Duration::from_secs(2));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_duplicate_keeps_first_definition() {
        let registry = JobRegistry::new();
        registry.register(definition("ping", "first")).unwrap();

        let err = registry.register(definition("ping", "second")).unwrap_err();
        assert_eq!(err, JobError::DuplicateJob("ping".to_string()));
        assert_eq!(registry.get("ping").unwrap().description(), "first");
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_invalid_definitions_are_not_stored() {
        let registry = JobRegistry::new();
        assert!(matches!(
            registry.register(definition("", "nameless")),
            Err(JobError::InvalidDefinition(_))
        ));
        assert!(matches!(
            registry.register(JobDefinition::new("ping", "no handler")),
            Err(JobError::InvalidDefinition(_))
        ));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_list_returns_snapshot() {
        let registry = JobRegistry::new();
        for name in ["job_a", "job_b", "job_c"] {
            registry.register(definition(name, "")).unwrap();
        }

        let snapshot = registry.list();
        registry.register(definition("job_d", "")).unwrap();

        let mut names: Vec<_> = snapshot.iter().map(|j| j.name().to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["job_a", "job_b", "job_c"]);
        assert_eq!(registry.count(), 4);
    }

    #[test]
    fn test_concurrent_registration_of_same_name() {
        let registry = Arc::new(JobRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry.register(definition("shared", &format!("writer {}", i)))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| *e == JobError::DuplicateJob("shared".to_string())));
        assert_eq!(registry.count(), 1);
    }
}
