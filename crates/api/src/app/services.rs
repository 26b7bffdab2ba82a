//! Service wiring: builds the delivery pipeline from [`AppConfig`].

use std::sync::Arc;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::middleware::AdminAccess;
use taskrelay_auth::{DecodeError, Hs256TokenDecoder, JwksTokenDecoder, TokenDecoder, TokenVerifier};
use taskrelay_core::{Clock, QueueConfigResolver, SystemClock};
use taskrelay_events::{BusSink, EventBus, FanoutSink, InMemoryEventBus, LifecycleEvent};
use taskrelay_infra::worker::JobHandler;
use taskrelay_infra::{
    AppConfig, CloudTasksClient, FailedJobLedger, InMemoryFailedJobLedger, InMemoryTaskStatusStore,
    JobExecutor, LedgerSink, QueueService, QueueServiceError, RetryPolicyResolver, StatusReporter,
    TaskHandler, WorkerOptions,
};

#[derive(Debug, Error)]
pub enum ServicesError {
    #[error("identity token decoder: {0}")]
    Decoder(#[from] DecodeError),

    #[error("queue api client: {0}")]
    QueueApi(#[from] QueueServiceError),

    #[error("failure ledger: {0}")]
    Ledger(String),
}

/// Everything the HTTP layer needs, shared behind an `Arc`.
pub struct AppServices {
    pub handler: TaskHandler,
    pub status: Arc<InMemoryTaskStatusStore>,
    pub ledger: Arc<dyn FailedJobLedger>,
    pub bus: Arc<InMemoryEventBus<LifecycleEvent>>,
    pub admin: Arc<AdminAccess>,
}

impl core::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppServices")
            .field("handler", &self.handler)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Builder for [`AppServices`].
///
/// Defaults follow the config: Cloud Tasks REST client, JWKS (or HS256 when a
/// secret is configured), in-memory status store, system clock. Tests swap
/// the queue service and clock.
pub struct AppServicesBuilder {
    config: AppConfig,
    queue: Option<Arc<dyn QueueService>>,
    ledger: Option<Arc<dyn FailedJobLedger>>,
    clock: Arc<dyn Clock>,
    handlers: Vec<(String, JobHandler)>,
}

impl AppServicesBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            queue: None,
            ledger: None,
            clock: Arc::new(SystemClock),
            handlers: Vec::new(),
        }
    }

    pub fn with_queue_service(mut self, queue: Arc<dyn QueueService>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn FailedJobLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn register_handler(mut self, pattern: impl Into<String>, handler: JobHandler) -> Self {
        self.handlers.push((pattern.into(), handler));
        self
    }

    fn decoder(&self) -> Result<Arc<dyn TokenDecoder>, ServicesError> {
        Ok(match &self.config.auth.hs256_secret {
            Some(secret) => Arc::new(Hs256TokenDecoder::new(secret)),
            None => Arc::new(JwksTokenDecoder::new(
                self.config.auth.jwks_url.clone(),
                self.config.jwks_cache_ttl(),
            )?),
        })
    }

    fn queue_service(&self) -> Result<Arc<dyn QueueService>, ServicesError> {
        if let Some(queue) = &self.queue {
            return Ok(queue.clone());
        }
        Ok(Arc::new(CloudTasksClient::new(
            self.config.queue_api.base_url.clone(),
            self.config.access_token_source(),
            self.config.queue_api_timeout(),
        )?))
    }

    fn failed_job_ledger(&self) -> Result<Arc<dyn FailedJobLedger>, ServicesError> {
        if let Some(ledger) = &self.ledger {
            return Ok(ledger.clone());
        }

        #[cfg(feature = "postgres")]
        if let Some(url) = &self.config.database_url {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .connect_lazy(url)
                .map_err(|e| ServicesError::Ledger(e.to_string()))?;
            info!("failure ledger: postgres");
            return Ok(Arc::new(taskrelay_infra::status::PostgresFailedJobLedger::new(pool)));
        }

        Ok(Arc::new(InMemoryFailedJobLedger::with_capacity(
            self.config.status.max_failed_jobs,
        )))
    }

    pub fn build(self) -> Result<AppServices, ServicesError> {
        let mode = self.config.mode;
        let status = Arc::new(InMemoryTaskStatusStore::with_limits(
            self.config.status.max_tracked_jobs,
            self.config.status.max_history_per_job,
        ));
        let ledger = self.failed_job_ledger()?;
        let bus = Arc::new(InMemoryEventBus::new());

        let sink = FanoutSink::new()
            .with(Arc::new(StatusReporter::new(status.clone())))
            .with(Arc::new(LedgerSink::new(ledger.clone())))
            .with(Arc::new(BusSink::new(bus.clone())));

        let mut executor = JobExecutor::new(Arc::new(sink)).with_clock(self.clock.clone());
        for (pattern, handler) in &self.handlers {
            executor.insert_handler(pattern.clone(), handler.clone());
        }

        let verifier = TokenVerifier::for_mode(self.decoder()?, mode, self.clock.clone());
        let admin = Arc::new(AdminAccess::new(verifier.clone(), &self.config.admin));
        if self.config.admin.audience.is_none() {
            info!("no admin audience configured, read endpoints are disabled");
        }
        let retry = RetryPolicyResolver::new(self.queue_service()?)
            .with_override(mode.retry_policy_override())
            .with_lookup_timeout(self.config.queue_api_timeout());
        let resolver = QueueConfigResolver::new(Arc::new(self.config.registry()));

        info!(
            mode = ?mode,
            connections = self.config.connections.len(),
            handlers = executor.handler_count(),
            "delivery pipeline ready"
        );

        let handler = TaskHandler::new(resolver, verifier, retry, Arc::new(executor))
            .with_options(WorkerOptions::default().with_timeout(self.config.worker_timeout()));

        Ok(AppServices {
            handler,
            status,
            ledger,
            bus,
            admin,
        })
    }
}

/// Log every lifecycle event published on the bus (runs until the bus is dropped).
pub fn spawn_event_logger(bus: &InMemoryEventBus<LifecycleEvent>) -> tokio::task::JoinHandle<()> {
    let subscription = bus.subscribe();
    tokio::task::spawn_blocking(move || loop {
        let missed = subscription.take_missed();
        if missed > 0 {
            warn!(missed, "event logger fell behind, lifecycle events skipped");
        }
        match subscription.recv_timeout(Duration::from_secs(1)) {
            Ok(event) => debug!(
                job_id = %event.job.job_id,
                event = event.name(),
                attempt = event.job.attempt,
                queue = %event.job.queue,
                "lifecycle event"
            ),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    })
}
