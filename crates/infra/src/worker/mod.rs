//! Job execution for one delivered attempt.

mod executor;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use taskrelay_core::JobDescriptor;

pub use executor::{JobContext, JobExecutor, JobHandler, JobResult};

pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(60);

/// Default execution options passed with every dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Upper bound on a single handler run; exceeding it counts as an error.
    pub timeout: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_JOB_TIMEOUT,
        }
    }
}

impl WorkerOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Terminal result of one attempt, as reported in lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    /// Attempt failed; the scheduler will redeliver.
    Errored,
    /// No further attempts will be made.
    Failed,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Succeeded => "succeeded",
            JobOutcome::Errored => "errored",
            JobOutcome::Failed => "failed",
        }
    }
}

impl core::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs a job and reports its lifecycle.
///
/// Implementations emit exactly one `Started` and one terminal event per call
/// and never return an error: job failures are outcomes.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn process(
        &self,
        connection: &str,
        descriptor: JobDescriptor,
        options: &WorkerOptions,
    ) -> JobOutcome;
}
