//! Lifecycle events emitted around one attempt of a job.
//!
//! For a single delivery the worker emits exactly:
//!
//! ```text
//! Started → Succeeded
//! Started → Errored   (attempt failed, the scheduler will redeliver)
//! Started → Failed    (terminal; also written to the failure ledger)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taskrelay_core::{JobDescriptor, JobId, QueueName};

/// Identity and attempt metadata shared by every event of one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRef {
    pub job_id: JobId,
    pub display_name: String,
    pub connection: String,
    pub queue: QueueName,
    pub attempt: u32,
}

impl JobRef {
    pub fn from_descriptor(connection: &str, descriptor: &JobDescriptor) -> Self {
        Self {
            job_id: descriptor.payload.uuid.clone(),
            display_name: descriptor.payload.display_name.clone(),
            connection: connection.to_string(),
            queue: descriptor.attempt.queue.clone(),
            attempt: descriptor.attempt.attempt,
        }
    }
}

/// What went wrong during an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    /// Short classifier, e.g. `job_error`, `timeout`, `max_attempts_exceeded`.
    pub kind: String,
    pub message: String,
}

impl ExceptionInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl core::fmt::Display for ExceptionInfo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleKind {
    Started,
    Succeeded,
    Errored { exception: ExceptionInfo },
    Failed {
        exception: ExceptionInfo,
        raw_payload: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub job: JobRef,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: LifecycleKind,
}

impl LifecycleEvent {
    pub fn new(job: JobRef, at: DateTime<Utc>, kind: LifecycleKind) -> Self {
        Self { job, at, kind }
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            LifecycleKind::Started => "started",
            LifecycleKind::Succeeded => "succeeded",
            LifecycleKind::Errored { .. } => "errored",
            LifecycleKind::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.kind, LifecycleKind::Started)
    }
}
