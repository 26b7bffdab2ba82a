//! Task status history and the permanent failure ledger.
//!
//! Both are fed exclusively through lifecycle sinks; nothing in the delivery
//! path reads them back.

mod ledger;
#[cfg(feature = "postgres")]
mod postgres;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use taskrelay_core::{JobId, QueueName};
use taskrelay_events::{LifecycleEvent, LifecycleKind, LifecycleSink};

pub use ledger::{
    DEFAULT_FAILED_JOB_CAPACITY, FailedJobLedger, FailedJobRecord, InMemoryFailedJobLedger,
    LedgerSink,
};
#[cfg(feature = "postgres")]
pub use postgres::PostgresFailedJobLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Successful,
    Error,
    Failed,
}

/// One status transition of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusEntry {
    pub status: TaskStatus,
    pub at: DateTime<Utc>,
    pub attempt: u32,
    pub queue: QueueName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StatusStoreError {
    #[error("storage error: {0}")]
    Storage(String),
}

/// Per-job status history keyed by job uuid.
pub trait TaskStatusStore: Send + Sync {
    fn append(&self, job_id: &JobId, entry: TaskStatusEntry) -> Result<(), StatusStoreError>;

    fn history(&self, job_id: &JobId) -> Result<Vec<TaskStatusEntry>, StatusStoreError>;

    fn latest(&self, job_id: &JobId) -> Result<Option<TaskStatusEntry>, StatusStoreError> {
        Ok(self.history(job_id)?.pop())
    }
}

impl<T> TaskStatusStore for Arc<T>
where
    T: TaskStatusStore + ?Sized,
{
    fn append(&self, job_id: &JobId, entry: TaskStatusEntry) -> Result<(), StatusStoreError> {
        (**self).append(job_id, entry)
    }

    fn history(&self, job_id: &JobId) -> Result<Vec<TaskStatusEntry>, StatusStoreError> {
        (**self).history(job_id)
    }
}

pub const DEFAULT_MAX_TRACKED_JOBS: usize = 10_000;
pub const DEFAULT_MAX_HISTORY_PER_JOB: usize = 50;

#[derive(Debug, Default)]
struct StatusEntries {
    by_job: HashMap<JobId, Vec<TaskStatusEntry>>,
    /// Jobs in first-seen order, oldest at the front.
    order: VecDeque<JobId>,
}

/// In-memory status store.
///
/// Tracks at most `max_jobs` jobs (the least recently first-seen job is
/// evicted) and keeps the last `max_history` transitions of each.
#[derive(Debug)]
pub struct InMemoryTaskStatusStore {
    entries: RwLock<StatusEntries>,
    max_jobs: usize,
    max_history: usize,
}

impl Default for InMemoryTaskStatusStore {
    fn default() -> Self {
        Self::with_limits(DEFAULT_MAX_TRACKED_JOBS, DEFAULT_MAX_HISTORY_PER_JOB)
    }
}

impl InMemoryTaskStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_jobs: usize, max_history: usize) -> Self {
        Self {
            entries: RwLock::new(StatusEntries::default()),
            max_jobs: max_jobs.max(1),
            max_history: max_history.max(1),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn job_count(&self) -> usize {
        self.entries.read().map(|e| e.by_job.len()).unwrap_or(0)
    }
}

impl TaskStatusStore for InMemoryTaskStatusStore {
    fn append(&self, job_id: &JobId, entry: TaskStatusEntry) -> Result<(), StatusStoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StatusStoreError::Storage("lock poisoned".to_string()))?;
        let StatusEntries { by_job, order } = &mut *entries;

        if !by_job.contains_key(job_id) {
            while by_job.len() >= self.max_jobs {
                let Some(evicted) = order.pop_front() else { break };
                by_job.remove(&evicted);
            }
            order.push_back(job_id.clone());
        }

        let history = by_job.entry(job_id.clone()).or_default();
        history.push(entry);
        if history.len() > self.max_history {
            let excess = history.len() - self.max_history;
            history.drain(..excess);
        }
        Ok(())
    }

    fn history(&self, job_id: &JobId) -> Result<Vec<TaskStatusEntry>, StatusStoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StatusStoreError::Storage("lock poisoned".to_string()))?;
        Ok(entries.by_job.get(job_id).cloned().unwrap_or_default())
    }
}

/// Lifecycle sink that records status transitions.
#[derive(Debug)]
pub struct StatusReporter<S> {
    store: S,
}

impl<S> StatusReporter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

fn transition(event: &LifecycleEvent) -> TaskStatusEntry {
    let (status, error) = match &event.kind {
        LifecycleKind::Started => (TaskStatus::Running, None),
        LifecycleKind::Succeeded => (TaskStatus::Successful, None),
        LifecycleKind::Errored { exception } => (TaskStatus::Error, Some(exception.to_string())),
        LifecycleKind::Failed { exception, .. } => (TaskStatus::Failed, Some(exception.to_string())),
    };
    TaskStatusEntry {
        status,
        at: event.at,
        attempt: event.job.attempt,
        queue: event.job.queue.clone(),
        error,
    }
}

#[async_trait]
impl<S> LifecycleSink for StatusReporter<S>
where
    S: TaskStatusStore,
{
    async fn emit(&self, event: &LifecycleEvent) {
        if let Err(e) = self.store.append(&event.job.job_id, transition(event)) {
            warn!(job_id = %event.job.job_id, error = %e, "failed to record task status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskrelay_events::{ExceptionInfo, JobRef};

    fn event(kind: LifecycleKind) -> LifecycleEvent {
        LifecycleEvent::new(
            JobRef {
                job_id: JobId::new("job-1").unwrap(),
                display_name: "Job".to_string(),
                connection: "cloudtasks".to_string(),
                queue: QueueName::new("emails").unwrap(),
                attempt: 2,
            },
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            kind,
        )
    }

    #[tokio::test]
    async fn reporter_maps_events_to_statuses() {
        let store = InMemoryTaskStatusStore::arc();
        let reporter = StatusReporter::new(store.clone());

        reporter.emit(&event(LifecycleKind::Started)).await;
        reporter
            .emit(&event(LifecycleKind::Errored {
                exception: ExceptionInfo::new("job_error", "boom"),
            }))
            .await;

        let job_id = JobId::new("job-1").unwrap();
        let history = store.history(&job_id).unwrap();
        let statuses: Vec<_> = history.iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![TaskStatus::Running, TaskStatus::Error]);

        let latest = store.latest(&job_id).unwrap().unwrap();
        assert_eq!(latest.error.as_deref(), Some("job_error: boom"));
        assert_eq!(latest.attempt, 2);
        assert_eq!(latest.queue.as_str(), "emails");
    }

    #[test]
    fn unknown_jobs_have_no_history() {
        let store = InMemoryTaskStatusStore::new();
        let job_id = JobId::new("nope").unwrap();
        assert!(store.history(&job_id).unwrap().is_empty());
        assert!(store.latest(&job_id).unwrap().is_none());
    }

    fn entry(status: TaskStatus, attempt: u32) -> TaskStatusEntry {
        TaskStatusEntry {
            status,
            at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            attempt,
            queue: QueueName::new("emails").unwrap(),
            error: None,
        }
    }

    #[test]
    fn oldest_jobs_are_evicted_at_capacity() {
        let store = InMemoryTaskStatusStore::with_limits(2, 10);
        for n in 0..5 {
            let job_id = JobId::new(format!("job-{n}")).unwrap();
            store.append(&job_id, entry(TaskStatus::Running, 1)).unwrap();
        }

        assert_eq!(store.job_count(), 2);
        assert!(store.history(&JobId::new("job-0").unwrap()).unwrap().is_empty());
        assert!(store.history(&JobId::new("job-2").unwrap()).unwrap().is_empty());
        assert_eq!(store.history(&JobId::new("job-4").unwrap()).unwrap().len(), 1);
    }

    #[test]
    fn updates_to_tracked_jobs_do_not_evict() {
        let store = InMemoryTaskStatusStore::with_limits(2, 10);
        let a = JobId::new("a").unwrap();
        let b = JobId::new("b").unwrap();
        store.append(&a, entry(TaskStatus::Running, 1)).unwrap();
        store.append(&b, entry(TaskStatus::Running, 1)).unwrap();
        store.append(&a, entry(TaskStatus::Successful, 1)).unwrap();

        assert_eq!(store.job_count(), 2);
        assert_eq!(store.history(&a).unwrap().len(), 2);
    }

    #[test]
    fn history_keeps_the_latest_transitions() {
        let store = InMemoryTaskStatusStore::with_limits(10, 3);
        let job_id = JobId::new("job-1").unwrap();
        for attempt in 1..=5 {
            store.append(&job_id, entry(TaskStatus::Error, attempt)).unwrap();
        }

        let attempts: Vec<_> = store.history(&job_id).unwrap().iter().map(|e| e.attempt).collect();
        assert_eq!(attempts, vec![3, 4, 5]);
    }

    #[test]
    fn statuses_serialize_snake_case() {
        assert_eq!(serde_json::to_value(TaskStatus::Successful).unwrap(), "successful");
    }
}
