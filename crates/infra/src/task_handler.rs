//! Push delivery orchestration.
//!
//! One call to [`TaskHandler::handle`] processes one delivery, strictly in
//! order:
//!
//! 1. decode the body (and the retry-count header)
//! 2. resolve the connection the job was enqueued on
//! 3. authenticate the caller against that connection's handler URL
//! 4. compute attempt number, attempt limit and retry deadline
//! 5. dispatch to the worker and wait for its outcome
//!
//! Any step failing ends the delivery with a [`HandlingError`]; later steps
//! never run and no lifecycle event is emitted.

use std::sync::Arc;

use serde::Serialize;
use tracing::{Instrument, info, info_span, warn};

use taskrelay_auth::TokenVerifier;
use taskrelay_core::{
    HandlingError, HandlingResult, InboundDelivery, JobDescriptor, JobId, JobPayload,
    QueueConfigResolver,
};

use crate::retry::RetryPolicyResolver;
use crate::worker::{JobOutcome, Worker, WorkerOptions};

/// Result of a delivery whose job reached the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandledDelivery {
    #[serde(rename = "uuid")]
    pub job_id: JobId,
    pub outcome: JobOutcome,
}

#[derive(Clone)]
pub struct TaskHandler {
    resolver: QueueConfigResolver,
    verifier: TokenVerifier,
    retry: RetryPolicyResolver,
    worker: Arc<dyn Worker>,
    options: WorkerOptions,
}

impl TaskHandler {
    pub fn new(
        resolver: QueueConfigResolver,
        verifier: TokenVerifier,
        retry: RetryPolicyResolver,
        worker: Arc<dyn Worker>,
    ) -> Self {
        Self {
            resolver,
            verifier,
            retry,
            worker,
            options: WorkerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: WorkerOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn handle(&self, delivery: InboundDelivery) -> HandlingResult<HandledDelivery> {
        let span = info_span!(
            "handle_task",
            job_uuid = tracing::field::Empty,
            queue = delivery.queue_name().unwrap_or_default(),
            task = delivery.task_name().unwrap_or_default(),
            attempt = tracing::field::Empty,
        );

        self.handle_inner(delivery)
            .instrument(span)
            .await
            .inspect_err(|e| warn!(error = %e, code = e.code(), "delivery rejected"))
    }

    async fn handle_inner(&self, delivery: InboundDelivery) -> HandlingResult<HandledDelivery> {
        let payload = JobPayload::decode(delivery.body())?;
        let command = payload.command()?;
        let retry_count = delivery.retry_count()?;
        tracing::Span::current().record("job_uuid", payload.uuid.as_str());

        let connection = self.resolver.resolve(&payload)?;

        self.verifier
            .verify(delivery.authorization(), &connection.handler)
            .await
            .map_err(|e| {
                warn!(connection = %connection.name, reason = %e, "identity token rejected");
                HandlingError::Unauthorized
            })?;

        let attempt = self
            .retry
            .resolve_attempt(
                &connection,
                retry_count,
                delivery.queue_name(),
                delivery.task_name(),
            )
            .await?;
        tracing::Span::current().record("attempt", attempt.attempt);

        let job_id = payload.uuid.clone();
        let descriptor = JobDescriptor {
            payload,
            command,
            attempt,
            raw_payload: delivery.body_text(),
        };

        let outcome = self
            .worker
            .process(&connection.name, descriptor, &self.options)
            .await;
        info!(connection = %connection.name, outcome = %outcome, "delivery handled");

        Ok(HandledDelivery { job_id, outcome })
    }
}

impl core::fmt::Debug for TaskHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskHandler")
            .field("resolver", &self.resolver)
            .field("verifier", &self.verifier)
            .field("retry", &self.retry)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
