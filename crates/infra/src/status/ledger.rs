use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use taskrelay_core::{JobId, QueueName};
use taskrelay_events::{ExceptionInfo, LifecycleEvent, LifecycleKind, LifecycleSink};

use super::StatusStoreError;

/// Permanent audit record of a job that will not be retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedJobRecord {
    pub id: Uuid,
    pub job_id: JobId,
    pub connection: String,
    pub queue: QueueName,
    /// Request body exactly as delivered.
    pub payload: String,
    pub exception: ExceptionInfo,
    pub failed_at: DateTime<Utc>,
}

#[async_trait]
pub trait FailedJobLedger: Send + Sync {
    async fn record(&self, record: FailedJobRecord) -> Result<(), StatusStoreError>;

    async fn list(&self, limit: usize) -> Result<Vec<FailedJobRecord>, StatusStoreError>;
}

#[async_trait]
impl<T> FailedJobLedger for Arc<T>
where
    T: FailedJobLedger + ?Sized,
{
    async fn record(&self, record: FailedJobRecord) -> Result<(), StatusStoreError> {
        (**self).record(record).await
    }

    async fn list(&self, limit: usize) -> Result<Vec<FailedJobRecord>, StatusStoreError> {
        (**self).list(limit).await
    }
}

pub const DEFAULT_FAILED_JOB_CAPACITY: usize = 1_000;

/// In-memory ledger. Newest records first in [`list`](FailedJobLedger::list).
///
/// Holds at most `capacity` records; the oldest is evicted first.
#[derive(Debug)]
pub struct InMemoryFailedJobLedger {
    records: RwLock<VecDeque<FailedJobRecord>>,
    capacity: usize,
}

impl Default for InMemoryFailedJobLedger {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_FAILED_JOB_CAPACITY)
    }
}

impl InMemoryFailedJobLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FailedJobLedger for InMemoryFailedJobLedger {
    async fn record(&self, record: FailedJobRecord) -> Result<(), StatusStoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StatusStoreError::Storage("lock poisoned".to_string()))?;
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<FailedJobRecord>, StatusStoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| StatusStoreError::Storage("lock poisoned".to_string()))?;
        Ok(records.iter().rev().take(limit).cloned().collect())
    }
}

/// Lifecycle sink that writes `Failed` events to a [`FailedJobLedger`].
#[derive(Debug)]
pub struct LedgerSink<L> {
    ledger: L,
}

impl<L> LedgerSink<L> {
    pub fn new(ledger: L) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl<L> LifecycleSink for LedgerSink<L>
where
    L: FailedJobLedger,
{
    async fn emit(&self, event: &LifecycleEvent) {
        let LifecycleKind::Failed {
            exception,
            raw_payload,
        } = &event.kind
        else {
            return;
        };

        let record = FailedJobRecord {
            id: Uuid::now_v7(),
            job_id: event.job.job_id.clone(),
            connection: event.job.connection.clone(),
            queue: event.job.queue.clone(),
            payload: raw_payload.clone(),
            exception: exception.clone(),
            failed_at: event.at,
        };

        match self.ledger.record(record).await {
            Ok(()) => info!(job_id = %event.job.job_id, queue = %event.job.queue, "failed job recorded"),
            Err(e) => error!(job_id = %event.job.job_id, error = %e, "failed to record failed job"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskrelay_events::JobRef;

    fn event(kind: LifecycleKind) -> LifecycleEvent {
        LifecycleEvent::new(
            JobRef {
                job_id: JobId::new("job-9").unwrap(),
                display_name: "Job".to_string(),
                connection: "billing".to_string(),
                queue: QueueName::new("invoices").unwrap(),
                attempt: 3,
            },
            Utc::now(),
            kind,
        )
    }

    #[tokio::test]
    async fn only_failed_events_reach_the_ledger() {
        let ledger = InMemoryFailedJobLedger::arc();
        let sink = LedgerSink::new(ledger.clone());

        sink.emit(&event(LifecycleKind::Started)).await;
        sink.emit(&event(LifecycleKind::Errored {
            exception: ExceptionInfo::new("job_error", "boom"),
        }))
        .await;
        assert!(ledger.is_empty());

        sink.emit(&event(LifecycleKind::Failed {
            exception: ExceptionInfo::new("job_error", "boom"),
            raw_payload: "{\"uuid\":\"job-9\"}".to_string(),
        }))
        .await;

        let records = ledger.list(10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].connection, "billing");
        assert_eq!(records[0].queue.as_str(), "invoices");
        assert_eq!(records[0].payload, "{\"uuid\":\"job-9\"}");
    }

    fn record(n: usize) -> FailedJobRecord {
        FailedJobRecord {
            id: Uuid::now_v7(),
            job_id: JobId::new(format!("job-{n}")).unwrap(),
            connection: "c".to_string(),
            queue: QueueName::new("q").unwrap(),
            payload: String::new(),
            exception: ExceptionInfo::new("fatal", "x"),
            failed_at: Utc::now(),
        }
    }

    fn ids(records: &[FailedJobRecord]) -> Vec<String> {
        records.iter().map(|r| r.job_id.as_str().to_string()).collect()
    }

    #[tokio::test]
    async fn list_returns_newest_first() {
        let ledger = InMemoryFailedJobLedger::new();
        for n in 0..3 {
            ledger.record(record(n)).await.unwrap();
        }

        let listed = ledger.list(2).await.unwrap();
        assert_eq!(ids(&listed), vec!["job-2", "job-1"]);
    }

    #[tokio::test]
    async fn oldest_records_are_evicted_at_capacity() {
        let ledger = InMemoryFailedJobLedger::with_capacity(3);
        for n in 0..10 {
            ledger.record(record(n)).await.unwrap();
        }

        assert_eq!(ledger.len(), 3);
        let listed = ledger.list(100).await.unwrap();
        assert_eq!(ids(&listed), vec!["job-9", "job-8", "job-7"]);
    }
}
