//! Delivery handling error model.

use thiserror::Error;

/// Result type used across the delivery pipeline.
pub type HandlingResult<T> = Result<T, HandlingError>;

/// Framework-level failure of a single push delivery.
///
/// Every variant is terminal for the current delivery: nothing is retried
/// internally, the scheduler redelivers according to its own policy. Failures
/// raised by job code are *not* represented here; the worker reports them as
/// lifecycle events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlingError {
    /// The request carried no body.
    #[error("request body is empty")]
    EmptyBody,

    /// The body (or one of the delivery headers) could not be decoded.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The job names a connection with no registered configuration.
    #[error("no queue connection configured for '{0}'")]
    UnknownConnection(String),

    /// Token validation failed.
    ///
    /// Deliberately carries no detail about which check failed.
    #[error("unauthorized")]
    Unauthorized,

    /// The remote queue/task lookup could not be completed.
    #[error("retry policy unavailable: {0}")]
    RetryPolicyUnavailable(String),
}

impl HandlingError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedPayload(msg.into())
    }

    pub fn unknown_connection(name: impl Into<String>) -> Self {
        Self::UnknownConnection(name.into())
    }

    pub fn retry_policy_unavailable(msg: impl Into<String>) -> Self {
        Self::RetryPolicyUnavailable(msg.into())
    }

    /// Stable machine-readable code (used in HTTP error bodies and logs).
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyBody => "empty_body",
            Self::MalformedPayload(_) => "malformed_payload",
            Self::UnknownConnection(_) => "unknown_connection",
            Self::Unauthorized => "unauthorized",
            Self::RetryPolicyUnavailable(_) => "retry_policy_unavailable",
        }
    }
}
