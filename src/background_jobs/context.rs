use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Context handed to a job handler for one execution.
///
/// The cancellation token fires when the job's deadline elapses. Cancellation
/// is cooperative: handlers should check it between units of work.
#[derive(Clone, Debug)]
pub struct JobContext {
    pub job_name: String,
    pub execution_id: String,
    pub cancellation_token: CancellationToken,
    deadline: Instant,
}

impl JobContext {
    pub fn new(
        job_name: &str,
        execution_id: &str,
        cancellation_token: CancellationToken,
        deadline: Instant,
    ) -> Self {
        Self {
            job_name: job_name.to_string(),
            execution_id: execution_id.to_string(),
            cancellation_token,
            deadline,
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.cancellation_token.cancelled().await
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Sleep for `duration`, waking early if the run is cancelled.
    /// Returns `false` when cancelled before the sleep finished.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancellation_token.cancelled() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_wakes_on_cancel() {
        let token = CancellationToken::new();
        let ctx = JobContext::new("ping", "run-1", token.clone(), Instant::now() + Duration::from_secs(60));

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let started = std::time::Instant::now();
        assert!(!ctx.sleep(Duration::from_secs(10)).await);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(ctx.is_cancelled());
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_remaining_saturates_at_zero() {
        let ctx = JobContext::new("ping", "run-1", CancellationToken::new(), Instant::now());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }
}
