//! Strongly-typed identifiers carried by a delivery.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::HandlingError;

/// Correlation key of a job across its whole lifecycle (payload `uuid`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

/// Name of a remote queue (short form, e.g. `default`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

/// Name of a remote task (short form, last path segment).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskName(String);

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create the identifier, rejecting blank values.
            pub fn new(value: impl Into<String>) -> Result<Self, HandlingError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(HandlingError::malformed(concat!($name, " must not be empty")));
                }
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $t {
            type Error = HandlingError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = HandlingError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

impl_string_newtype!(JobId, "job uuid");
impl_string_newtype!(QueueName, "queue name");
impl_string_newtype!(TaskName, "task name");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_ids_are_rejected() {
        assert!(JobId::new("").is_err());
        assert!(QueueName::new("   ").is_err());
        assert!(matches!(
            TaskName::new(""),
            Err(HandlingError::MalformedPayload(_))
        ));
    }

    #[test]
    fn deserialization_validates() {
        let err = serde_json::from_str::<JobId>("\"\"");
        assert!(err.is_err());

        let id: JobId = serde_json::from_str("\"0b6d\"").unwrap();
        assert_eq!(id.as_str(), "0b6d");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"0b6d\"");
    }
}
