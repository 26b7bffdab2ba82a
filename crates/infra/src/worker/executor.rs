//! Job executor: handler routing, attempt limits and lifecycle reporting.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use taskrelay_core::{Clock, JobDescriptor, JobId, QueueName, SystemClock};
use taskrelay_events::{ExceptionInfo, JobRef, LifecycleEvent, LifecycleKind, LifecycleSink};

use super::{JobOutcome, Worker, WorkerOptions};

/// What a handler reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Success,
    /// Recoverable failure; retried while attempts and time remain.
    Failure(String),
    /// Permanent failure; never retried.
    Fatal(String),
}

/// Data handed to a job handler.
#[derive(Debug, Clone, PartialEq)]
pub struct JobContext {
    pub job_id: JobId,
    pub display_name: String,
    pub job: String,
    pub connection: String,
    pub queue: QueueName,
    pub attempt: u32,
    pub max_tries: Option<u32>,
    pub args: serde_json::Value,
}

impl JobContext {
    fn new(connection: &str, descriptor: &JobDescriptor) -> Self {
        Self {
            job_id: descriptor.payload.uuid.clone(),
            display_name: descriptor.payload.display_name.clone(),
            job: descriptor.command.job.clone(),
            connection: connection.to_string(),
            queue: descriptor.attempt.queue.clone(),
            attempt: descriptor.attempt.attempt,
            max_tries: descriptor.attempt.max_tries,
            args: descriptor.command.args.clone(),
        }
    }
}

/// Job handler function type.
///
/// Handlers are synchronous and run on the blocking pool.
pub type JobHandler = Arc<dyn Fn(&JobContext) -> JobResult + Send + Sync>;

/// [`Worker`] that routes jobs to registered handlers.
///
/// Routing by job name: exact match first, then the longest matching
/// `prefix.*` category, then `*`.
pub struct JobExecutor {
    handlers: HashMap<String, JobHandler>,
    sink: Arc<dyn LifecycleSink>,
    clock: Arc<dyn Clock>,
}

impl JobExecutor {
    pub fn new(sink: Arc<dyn LifecycleSink>) -> Self {
        Self {
            handlers: HashMap::new(),
            sink,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register a handler for a job name pattern.
    pub fn register_handler<F>(&mut self, pattern: impl Into<String>, handler: F)
    where
        F: Fn(&JobContext) -> JobResult + Send + Sync + 'static,
    {
        self.insert_handler(pattern, Arc::new(handler));
    }

    pub fn insert_handler(&mut self, pattern: impl Into<String>, handler: JobHandler) {
        self.handlers.insert(pattern.into(), handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    fn get_handler(&self, job: &str) -> Option<&JobHandler> {
        if let Some(h) = self.handlers.get(job) {
            return Some(h);
        }

        let category = self
            .handlers
            .iter()
            .filter_map(|(pattern, handler)| {
                let prefix = pattern.strip_suffix(".*")?;
                job.strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('.'))
                    .then_some((prefix.len(), handler))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, handler)| handler);
        if category.is_some() {
            return category;
        }

        self.handlers.get("*")
    }

    async fn emit(&self, job: &JobRef, kind: LifecycleKind) {
        let event = LifecycleEvent::new(job.clone(), self.clock.now(), kind);
        self.sink.emit(&event).await;
    }

    async fn fail(&self, job: &JobRef, exception: ExceptionInfo, raw_payload: String) -> JobOutcome {
        warn!(job_id = %job.job_id, attempt = job.attempt, exception = %exception, "job failed");
        self.emit(
            job,
            LifecycleKind::Failed {
                exception,
                raw_payload,
            },
        )
        .await;
        JobOutcome::Failed
    }
}

impl core::fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut patterns: Vec<_> = self.handlers.keys().collect();
        patterns.sort();
        f.debug_struct("JobExecutor")
            .field("handlers", &patterns)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Worker for JobExecutor {
    async fn process(
        &self,
        connection: &str,
        descriptor: JobDescriptor,
        options: &WorkerOptions,
    ) -> JobOutcome {
        let job = JobRef::from_descriptor(connection, &descriptor);
        self.emit(&job, LifecycleKind::Started).await;

        let attempt = &descriptor.attempt;
        if attempt.already_exhausted(self.clock.now()) {
            let exception = if attempt.max_tries.is_some_and(|max| attempt.attempt > max) {
                ExceptionInfo::new(
                    "max_attempts_exceeded",
                    format!(
                        "attempt {} exceeds the limit of {} attempts",
                        attempt.attempt,
                        attempt.max_tries.unwrap_or_default()
                    ),
                )
            } else {
                ExceptionInfo::new("retry_deadline_passed", "job has been retried for too long")
            };
            return self.fail(&job, exception, descriptor.raw_payload).await;
        }

        let Some(handler) = self.get_handler(&descriptor.command.job).cloned() else {
            let exception = ExceptionInfo::new(
                "no_handler",
                format!("no handler for job: {}", descriptor.command.job),
            );
            return self.fail(&job, exception, descriptor.raw_payload).await;
        };

        debug!(job_id = %job.job_id, job = %descriptor.command.job, attempt = job.attempt, "running job");
        let context = JobContext::new(connection, &descriptor);
        let run = tokio::task::spawn_blocking(move || handler(&context));

        let exception = match tokio::time::timeout(options.timeout, run).await {
            Ok(Ok(JobResult::Success)) => {
                info!(job_id = %job.job_id, attempt = job.attempt, "job succeeded");
                self.emit(&job, LifecycleKind::Succeeded).await;
                return JobOutcome::Succeeded;
            }
            Ok(Ok(JobResult::Fatal(message))) => {
                let exception = ExceptionInfo::new("fatal", message);
                return self.fail(&job, exception, descriptor.raw_payload).await;
            }
            Ok(Ok(JobResult::Failure(message))) => ExceptionInfo::new("job_error", message),
            Ok(Err(join)) => ExceptionInfo::new("panic", join.to_string()),
            Err(_) => ExceptionInfo::new(
                "timeout",
                format!("job exceeded its {}s timeout", options.timeout.as_secs_f64()),
            ),
        };

        if descriptor.attempt.is_last_attempt(self.clock.now()) {
            return self.fail(&job, exception, descriptor.raw_payload).await;
        }

        warn!(job_id = %job.job_id, attempt = job.attempt, exception = %exception, "job errored, will be retried");
        self.emit(&job, LifecycleKind::Errored { exception }).await;
        JobOutcome::Errored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use std::time::Duration;
    use taskrelay_core::{AttemptContext, CommandData, CommandReference, FixedClock, JobPayload};
    use taskrelay_events::RecordingSink;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn descriptor(job: &str, attempt: u32, max_tries: Option<u32>) -> JobDescriptor {
        let command = CommandReference {
            job: job.to_string(),
            connection: None,
            queue: None,
            args: serde_json::json!({"n": 1}),
        };
        JobDescriptor {
            payload: JobPayload {
                uuid: JobId::new("job-1").unwrap(),
                display_name: "Job".to_string(),
                data: CommandData {
                    command_name: None,
                    command: command.encode(),
                },
            },
            command,
            attempt: AttemptContext {
                attempt,
                queue: QueueName::new("default").unwrap(),
                max_tries,
                retry_until: None,
            },
            raw_payload: "{\"raw\":true}".to_string(),
        }
    }

    fn executor(sink: Arc<RecordingSink>) -> JobExecutor {
        let mut executor =
            JobExecutor::new(sink).with_clock(Arc::new(FixedClock::new(now())));
        executor.register_handler("ok", |_ctx| JobResult::Success);
        executor.register_handler("flaky", |_ctx| JobResult::Failure("boom".to_string()));
        executor.register_handler("doomed", |_ctx| JobResult::Fatal("nope".to_string()));
        executor.register_handler("slow", |_ctx| {
            std::thread::sleep(Duration::from_millis(300));
            JobResult::Success
        });
        executor.register_handler("panics", |_ctx| panic!("handler panicked"));
        executor
    }

    async fn run(job: &str, attempt: u32, max_tries: Option<u32>) -> (JobOutcome, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let outcome = executor(sink.clone())
            .process("cloudtasks", descriptor(job, attempt, max_tries), &WorkerOptions::default())
            .await;
        (outcome, sink)
    }

    #[tokio::test]
    async fn success_emits_started_then_succeeded() {
        let (outcome, sink) = run("ok", 1, Some(3)).await;
        assert_eq!(outcome, JobOutcome::Succeeded);
        assert_eq!(sink.names(), vec!["started", "succeeded"]);
    }

    #[tokio::test]
    async fn failure_before_last_attempt_is_errored() {
        let (outcome, sink) = run("flaky", 1, Some(3)).await;
        assert_eq!(outcome, JobOutcome::Errored);
        assert_eq!(sink.names(), vec!["started", "errored"]);
    }

    #[tokio::test]
    async fn failure_on_last_attempt_is_failed_with_raw_payload() {
        let (outcome, sink) = run("flaky", 3, Some(3)).await;
        assert_eq!(outcome, JobOutcome::Failed);

        let events = sink.events();
        assert_eq!(events.len(), 2);
        match &events[1].kind {
            LifecycleKind::Failed {
                exception,
                raw_payload,
            } => {
                assert_eq!(exception.kind, "job_error");
                assert_eq!(raw_payload, "{\"raw\":true}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unlimited_attempts_never_fail_on_error() {
        let (outcome, _) = run("flaky", 500, None).await;
        assert_eq!(outcome, JobOutcome::Errored);
    }

    #[tokio::test]
    async fn fatal_fails_immediately() {
        let (outcome, sink) = run("doomed", 1, Some(10)).await;
        assert_eq!(outcome, JobOutcome::Failed);
        assert_eq!(sink.names(), vec!["started", "failed"]);
    }

    #[tokio::test]
    async fn exhausted_attempts_fail_without_running() {
        let (outcome, sink) = run("ok", 4, Some(3)).await;
        assert_eq!(outcome, JobOutcome::Failed);
        match &sink.events()[1].kind {
            LifecycleKind::Failed { exception, .. } => {
                assert_eq!(exception.kind, "max_attempts_exceeded")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn passed_deadline_fails_without_running() {
        let sink = Arc::new(RecordingSink::new());
        let mut d = descriptor("ok", 2, None);
        d.attempt.retry_until = Some(now() - ChronoDuration::seconds(1));

        let outcome = executor(sink.clone())
            .process("cloudtasks", d, &WorkerOptions::default())
            .await;

        assert_eq!(outcome, JobOutcome::Failed);
        assert_eq!(sink.names(), vec!["started", "failed"]);
    }

    #[tokio::test]
    async fn unknown_job_fails() {
        let (outcome, sink) = run("unregistered", 1, Some(3)).await;
        assert_eq!(outcome, JobOutcome::Failed);
        assert_eq!(sink.names(), vec!["started", "failed"]);
    }

    #[tokio::test]
    async fn timeout_counts_as_error() {
        let sink = Arc::new(RecordingSink::new());
        let outcome = executor(sink.clone())
            .process(
                "cloudtasks",
                descriptor("slow", 1, Some(3)),
                &WorkerOptions::default().with_timeout(Duration::from_millis(20)),
            )
            .await;

        assert_eq!(outcome, JobOutcome::Errored);
        match &sink.events()[1].kind {
            LifecycleKind::Errored { exception } => assert_eq!(exception.kind, "timeout"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn panic_counts_as_error() {
        let (outcome, sink) = run("panics", 1, Some(3)).await;
        assert_eq!(outcome, JobOutcome::Errored);
        assert_eq!(sink.names(), vec!["started", "errored"]);
    }

    #[tokio::test]
    async fn category_and_wildcard_routing() {
        let sink = Arc::new(RecordingSink::new());
        let mut executor = JobExecutor::new(sink.clone());
        executor.register_handler("mail.*", |_ctx| JobResult::Success);
        executor.register_handler("mail.bulk.*", |_ctx| JobResult::Fatal("bulk".to_string()));
        executor.register_handler("*", |_ctx| JobResult::Failure("fallback".to_string()));

        let opts = WorkerOptions::default();
        assert_eq!(
            executor.process("c", descriptor("mail.welcome", 1, Some(1)), &opts).await,
            JobOutcome::Succeeded
        );
        assert_eq!(
            executor.process("c", descriptor("mail.bulk.weekly", 1, Some(5)), &opts).await,
            JobOutcome::Failed
        );
        assert_eq!(
            executor.process("c", descriptor("mailer", 1, Some(5)), &opts).await,
            JobOutcome::Errored
        );
    }

    #[tokio::test]
    async fn handler_sees_attempt_metadata() {
        let sink = Arc::new(RecordingSink::new());
        let seen = Arc::new(std::sync::Mutex::new(None));
        let mut executor = JobExecutor::new(sink);
        let captured = seen.clone();
        executor.register_handler("inspect", move |ctx| {
            *captured.lock().unwrap() = Some(ctx.clone());
            JobResult::Success
        });

        executor
            .process("billing", descriptor("inspect", 2, Some(5)), &WorkerOptions::default())
            .await;

        let ctx = seen.lock().unwrap().clone().unwrap();
        assert_eq!(ctx.connection, "billing");
        assert_eq!(ctx.attempt, 2);
        assert_eq!(ctx.max_tries, Some(5));
        assert_eq!(ctx.args["n"], 1);
    }
}
