//! Read access to the remote queue service (retry policies and task metadata).

mod cloud_tasks;
mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use taskrelay_core::RetryPolicy;

pub use cloud_tasks::{AccessTokenSource, CloudTasksClient, DEFAULT_CLOUD_TASKS_URL};
pub use memory::InMemoryQueueService;

/// Task metadata relevant to retry bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteTask {
    /// When the scheduler first dispatched the task (absent until it has).
    pub first_attempt_dispatch_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum QueueServiceError {
    #[error("queue api transport error: {0}")]
    Transport(String),
    #[error("queue api returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("queue api response could not be decoded: {0}")]
    Decode(String),
    #[error("queue api credentials unavailable: {0}")]
    Credentials(String),
    #[error("queue api call timed out")]
    Timeout,
    #[error("invalid queue api resource: {0}")]
    InvalidResource(String),
}

#[async_trait]
pub trait QueueService: Send + Sync {
    async fn get_retry_policy(
        &self,
        project: &str,
        location: &str,
        queue: &str,
    ) -> Result<RetryPolicy, QueueServiceError>;

    async fn get_task(
        &self,
        project: &str,
        location: &str,
        queue: &str,
        task: &str,
    ) -> Result<RemoteTask, QueueServiceError>;
}

/// Parse a protobuf JSON duration (`"3600s"`, `"0.5s"`).
pub fn parse_api_duration(raw: &str) -> Result<Duration, QueueServiceError> {
    let invalid = || QueueServiceError::Decode(format!("invalid duration `{raw}`"));

    let number = raw.trim().strip_suffix('s').ok_or_else(invalid)?;
    let (secs, frac) = match number.split_once('.') {
        Some((secs, frac)) => (secs, frac),
        None => (number, ""),
    };
    if secs.is_empty() || frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let secs: u64 = secs.parse().map_err(|_| invalid())?;
    let nanos: u32 = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<9}").parse().map_err(|_| invalid())?
    };
    Ok(Duration::new(secs, nanos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_api_durations() {
        assert_eq!(parse_api_duration("3600s"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_api_duration("0.5s"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_api_duration("0s"), Ok(Duration::ZERO));
        assert_eq!(parse_api_duration("1.000000001s"), Ok(Duration::new(1, 1)));
    }

    #[test]
    fn rejects_garbage_durations() {
        for raw in ["", "s", "10", "-1s", "1.s5", "abc s", "1.0000000001s"] {
            assert!(parse_api_duration(raw).is_err(), "{raw} should not parse");
        }
    }
}
