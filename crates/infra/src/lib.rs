//! Infrastructure layer: remote queue API, worker, status storage, config and
//! the delivery orchestrator that ties them together.

pub mod config;
pub mod queue;
pub mod retry;
pub mod status;
pub mod task_handler;
pub mod worker;

pub use config::{
    AdminSettings, AppConfig, AuthSettings, QueueApiSettings, StatusSettings, WorkerSettings,
};
pub use queue::{
    CloudTasksClient, InMemoryQueueService, QueueService, QueueServiceError, RemoteTask,
};
pub use retry::RetryPolicyResolver;
pub use status::{
    FailedJobLedger, FailedJobRecord, InMemoryFailedJobLedger, InMemoryTaskStatusStore,
    LedgerSink, StatusReporter, StatusStoreError, TaskStatus, TaskStatusEntry, TaskStatusStore,
};
pub use task_handler::{HandledDelivery, TaskHandler};
pub use worker::{JobContext, JobExecutor, JobOutcome, JobResult, Worker, WorkerOptions};
