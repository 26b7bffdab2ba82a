//! Attempt number, attempt limit and retry deadline for one delivery.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use taskrelay_core::{
    AttemptContext, ConnectionConfig, HandlingError, HandlingResult, QueueName, RetryPolicy,
    RetryPolicyOverride, TaskName,
};

use crate::queue::{QueueService, QueueServiceError};

pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Computes [`AttemptContext`] from delivery headers and the remote queue's
/// retry configuration.
///
/// Every remote call is bounded by `lookup_timeout`; any failure (timeout,
/// transport, non-success status) becomes
/// [`HandlingError::RetryPolicyUnavailable`].
#[derive(Clone)]
pub struct RetryPolicyResolver {
    queue: Arc<dyn QueueService>,
    policy_override: Option<RetryPolicyOverride>,
    lookup_timeout: Duration,
}

impl RetryPolicyResolver {
    pub fn new(queue: Arc<dyn QueueService>) -> Self {
        Self {
            queue,
            policy_override: None,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    /// Settings forced on top of every fetched policy (emulated mode).
    pub fn with_override(mut self, policy_override: Option<RetryPolicyOverride>) -> Self {
        self.policy_override = policy_override;
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub async fn retry_policy(
        &self,
        connection: &ConnectionConfig,
        queue: &str,
    ) -> HandlingResult<RetryPolicy> {
        let policy = self
            .bounded(
                "retry policy",
                self.queue
                    .get_retry_policy(&connection.project, &connection.location, queue),
            )
            .await?;

        Ok(match &self.policy_override {
            Some(overrides) => policy.apply(overrides),
            None => policy,
        })
    }

    pub async fn resolve_attempt(
        &self,
        connection: &ConnectionConfig,
        retry_count: u32,
        queue_header: Option<&str>,
        task_header: Option<&str>,
    ) -> HandlingResult<AttemptContext> {
        let queue = QueueName::new(queue_header.unwrap_or(&connection.queue))?;
        let policy = self.retry_policy(connection, queue.as_str()).await?;

        let attempt = AttemptContext::attempt_from_retry_count(retry_count);

        let retry_until = if attempt > 1 && policy.max_retry_duration.is_some() {
            let task = task_header.ok_or_else(|| {
                HandlingError::malformed("retried delivery without a task name header")
            })?;
            let task = TaskName::new(task)?;
            let remote = self
                .bounded(
                    "task",
                    self.queue.get_task(
                        &connection.project,
                        &connection.location,
                        queue.as_str(),
                        task.as_str(),
                    ),
                )
                .await?;
            policy.retry_until(remote.first_attempt_dispatch_time)
        } else {
            None
        };

        debug!(
            attempt,
            queue = %queue,
            max_tries = ?policy.max_attempts,
            retry_until = ?retry_until,
            "attempt resolved"
        );

        Ok(AttemptContext {
            attempt,
            queue,
            max_tries: policy.max_attempts,
            retry_until,
        })
    }

    async fn bounded<T>(
        &self,
        what: &'static str,
        call: impl Future<Output = Result<T, QueueServiceError>>,
    ) -> HandlingResult<T> {
        let result = match tokio::time::timeout(self.lookup_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(QueueServiceError::Timeout),
        };

        result.map_err(|e| {
            warn!(lookup = what, error = %e, "queue lookup failed");
            HandlingError::retry_policy_unavailable(format!("{what} lookup failed: {e}"))
        })
    }
}

impl core::fmt::Debug for RetryPolicyResolver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RetryPolicyResolver")
            .field("policy_override", &self.policy_override)
            .field("lookup_timeout", &self.lookup_timeout)
            .finish_non_exhaustive()
    }
}
