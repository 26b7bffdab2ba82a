//! Wire payload of a push delivery.
//!
//! The scheduler posts the job exactly as it was enqueued:
//!
//! ```text
//! {
//!   "uuid": "5c1e…",
//!   "displayName": "SendInvoiceReminder",
//!   "data": {
//!     "commandName": "SendInvoiceReminder",
//!     "command": "{\"job\":\"invoices.remind\",\"connection\":\"billing\",\"args\":{…}}"
//!   }
//! }
//! ```
//!
//! `data.command` is itself a serialized document (the command reference).
//! Both layers are decoded and validated up front so a malformed delivery is
//! rejected before any other work happens.

use serde::{Deserialize, Serialize};

use crate::error::{HandlingError, HandlingResult};
use crate::id::JobId;

/// Decoded push body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    /// Correlation key (creation → running → terminal state).
    pub uuid: JobId,

    pub display_name: String,

    pub data: CommandData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_name: Option<String>,

    /// Serialized [`CommandReference`].
    pub command: String,
}

/// The job's command: which handler runs it and where it was enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReference {
    /// Handler name the worker routes on.
    pub job: String,

    /// Connection the job was enqueued on (`None` = registry default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,

    /// Queue the job was enqueued on (informational; the delivery header wins).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,

    /// Handler arguments.
    #[serde(default)]
    pub args: serde_json::Value,
}

impl JobPayload {
    /// Decode and validate a raw request body.
    ///
    /// - whitespace-only bodies are [`HandlingError::EmptyBody`]
    /// - anything that is not a complete payload (including an undecodable
    ///   command reference) is [`HandlingError::MalformedPayload`]
    pub fn decode(body: &[u8]) -> HandlingResult<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(HandlingError::EmptyBody);
        }

        let payload: Self = serde_json::from_slice(body)
            .map_err(|e| HandlingError::malformed(format!("invalid job payload: {e}")))?;

        payload.command()?;
        Ok(payload)
    }

    /// Decode the embedded command reference.
    pub fn command(&self) -> HandlingResult<CommandReference> {
        CommandReference::decode(&self.data.command)
    }
}

impl CommandReference {
    pub fn decode(raw: &str) -> HandlingResult<Self> {
        let command: Self = serde_json::from_str(raw)
            .map_err(|e| HandlingError::malformed(format!("invalid command reference: {e}")))?;

        if command.job.trim().is_empty() {
            return Err(HandlingError::malformed("command reference names no job"));
        }
        if command
            .connection
            .as_deref()
            .is_some_and(|c| c.trim().is_empty())
        {
            return Err(HandlingError::malformed("command reference has a blank connection"));
        }

        Ok(command)
    }

    pub fn encode(&self) -> String {
        // A struct of strings and a JSON value always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}
