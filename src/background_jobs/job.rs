use super::context::JobContext;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Timeout applied when a definition leaves it unset or zero.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Errors returned to callers of the registry and executor.
///
/// Routine job failures are not errors: they end up in the run outcome.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("Invalid job definition: {0}")]
    InvalidDefinition(String),

    #[error("Job already registered: {0}")]
    DuplicateJob(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),
}

/// Business logic of a job.
///
/// Returning `Err` marks the run failed with the error chain as its message.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: JobContext) -> anyhow::Result<JsonValue>;
}

/// Adapts an async closure into a [`JobHandler`].
pub struct FnJobHandler<F> {
    func: F,
}

impl<F, Fut> FnJobHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<JsonValue>> + Send + 'static,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> JobHandler for FnJobHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<JsonValue>> + Send + 'static,
{
    async fn run(&self, ctx: JobContext) -> anyhow::Result<JsonValue> {
        (self.func)(ctx).await
    }
}

/// Adapts a synchronous closure into a [`JobHandler`] running on the blocking pool.
///
/// Blocking work cannot be preempted: past the deadline it is abandoned and keeps
/// running until it returns. Poll `ctx.is_cancelled()` to stop early.
pub struct BlockingJobHandler<F> {
    func: Arc<F>,
}

impl<F> BlockingJobHandler<F>
where
    F: Fn(&JobContext) -> anyhow::Result<JsonValue> + Send + Sync + 'static,
{
    pub fn new(func: F) -> Self {
        Self {
            func: Arc::new(func),
        }
    }
}

#[async_trait]
impl<F> JobHandler for BlockingJobHandler<F>
where
    F: Fn(&JobContext) -> anyhow::Result<JsonValue> + Send + Sync + 'static,
{
    async fn run(&self, ctx: JobContext) -> anyhow::Result<JsonValue> {
        let func = Arc::clone(&self.func);
        tokio::task::spawn_blocking(move || func(&ctx)).await?
    }
}

/// Registration input. Validated into a [`RegisteredJob`] by the registry.
#[derive(Clone)]
pub struct JobDefinition {
    pub name: String,
    pub description: String,
    pub timeout: Option<Duration>,
    pub handler: Option<Arc<dyn JobHandler>>,
}

impl JobDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            timeout: None,
            handler: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_handler(mut self, handler: impl JobHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn with_shared_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.handler = Some(handler);
        self
    }
}

impl std::fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("timeout", &self.timeout)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

/// An accepted, immutable job definition.
pub struct RegisteredJob {
    name: String,
    description: String,
    timeout: Duration,
    handler: Arc<dyn JobHandler>,
}

impl RegisteredJob {
    pub(crate) fn from_definition(definition: JobDefinition) -> Result<Self, JobError> {
        if definition.name.trim().is_empty() {
            return Err(JobError::InvalidDefinition(
                "job name must not be empty".to_string(),
            ));
        }
        let handler = definition.handler.ok_or_else(|| {
            JobError::InvalidDefinition(format!("job {} has no handler", definition.name))
        })?;
        let timeout = match definition.timeout {
            Some(timeout) if !timeout.is_zero() => timeout,
            _ => DEFAULT_JOB_TIMEOUT,
        };

        Ok(Self {
            name: definition.name,
            description: definition.description,
            timeout,
            handler,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn handler(&self) -> Arc<dyn JobHandler> {
        Arc::clone(&self.handler)
    }
}

impl std::fmt::Debug for RegisteredJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredJob")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    struct NoopHandler;

    #[async_trait]
    impl JobHandler for NoopHandler {
        async fn run(&self, _ctx: JobContext) -> anyhow::Result<JsonValue> {
            Ok(json!(null))
        }
    }

    fn test_ctx() -> JobContext {
        JobContext::new(
            "test",
            "run-1",
            CancellationToken::new(),
            Instant::now() + Duration::from_secs(5),
        )
    }

    #[test]
    fn test_timeout_defaults_when_unset_or_zero() {
        let unset = RegisteredJob::from_definition(
            JobDefinition::new("a", "").with_handler(NoopHandler),
        )
        .unwrap();
        assert_eq!(unset.timeout(), DEFAULT_JOB_TIMEOUT);

        let zero = RegisteredJob::from_definition(
            JobDefinition::new("b", "")
                .with_timeout(Duration::ZERO)
                .with_handler(NoopHandler),
        )
        .unwrap();
        assert_eq!(zero.timeout(), DEFAULT_JOB_TIMEOUT);

        let explicit = RegisteredJob::from_definition(
            JobDefinition::new("c", "")
                .with_timeout(Duration::from_secs(2))
                .with_handler(NoopHandler),
        )
        .unwrap();
        assert_eq!(explicit.timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_rejects_empty_name_and_missing_handler() {
        let empty = RegisteredJob::from_definition(
            JobDefinition::new("  ", "blank").with_handler(NoopHandler),
        );
        assert!(matches!(empty, Err(JobError::InvalidDefinition(_))));

        let no_handler = RegisteredJob::from_definition(JobDefinition::new("ping", "no body"));
        assert!(matches!(no_handler, Err(JobError::InvalidDefinition(_))));
    }

    #[tokio::test]
    async fn test_fn_handler_runs_closure() {
        let handler = FnJobHandler::new(|ctx: JobContext| async move {
            Ok::<_, anyhow::Error>(json!({ "job": ctx.job_name }))
        });
        let value = handler.run(test_ctx()).await.unwrap();
        assert_eq!(value, json!({ "job": "test" }));
    }

    #[tokio::test]
    async fn test_blocking_handler_runs_on_blocking_pool() {
        let handler = BlockingJobHandler::new(|ctx: &JobContext| {
            std::thread::sleep(Duration::from_millis(10));
            Ok(json!({ "cancelled": ctx.is_cancelled() }))
        });
        let value = handler.run(test_ctx()).await.unwrap();
        assert_eq!(value, json!({ "cancelled": false }));
    }

    #[tokio::test]
    async fn test_blocking_handler_propagates_error() {
        let handler = BlockingJobHandler::new(|_ctx: &JobContext| anyhow::bail!("disk full"));
        let err = handler.run(test_ctx()).await.unwrap_err();
        assert!(err.to_string().contains("disk full"));
    }
}
