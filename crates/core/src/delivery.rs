//! Inbound push delivery (body + the headers the scheduler sets).

use std::collections::BTreeMap;

use crate::error::{HandlingError, HandlingResult};

pub const AUTHORIZATION_HEADER: &str = "authorization";
pub const RETRY_COUNT_HEADER: &str = "x-cloudtasks-taskretrycount";
pub const QUEUE_NAME_HEADER: &str = "x-cloudtasks-queuename";
pub const TASK_NAME_HEADER: &str = "x-cloudtasks-taskname";

/// One HTTP delivery, captured verbatim.
///
/// Header names are stored lowercase so lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundDelivery {
    body: Vec<u8>,
    headers: BTreeMap<String, String>,
}

impl InboundDelivery {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body as text (lossy), as stored in failure records.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn authorization(&self) -> Option<&str> {
        self.header(AUTHORIZATION_HEADER)
    }

    /// Number of previous attempts; a missing header means first delivery.
    pub fn retry_count(&self) -> HandlingResult<u32> {
        match self.non_blank(RETRY_COUNT_HEADER) {
            None => Ok(0),
            Some(raw) => raw.parse::<u32>().map_err(|_| {
                HandlingError::malformed(format!("invalid task retry count header: '{raw}'"))
            }),
        }
    }

    pub fn queue_name(&self) -> Option<&str> {
        self.non_blank(QUEUE_NAME_HEADER)
    }

    pub fn task_name(&self) -> Option<&str> {
        self.non_blank(TASK_NAME_HEADER)
    }

    fn non_blank(&self, name: &str) -> Option<&str> {
        self.header(name).map(str::trim).filter(|v| !v.is_empty())
    }
}
