//! Runtime mode (production vs. emulated scheduler).

use serde::{Deserialize, Serialize};

use crate::attempt::RetryPolicyOverride;

/// Selects which trust anchors and retry settings apply.
///
/// `Emulated` is meant for a local Cloud Tasks emulator and automated tests:
/// it accepts the emulator's token issuer and forces fast, deterministic retry
/// settings. It is chosen by configuration, never by inspecting the process
/// environment at request time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    #[default]
    Production,
    Emulated,
}

impl RuntimeMode {
    pub fn is_emulated(&self) -> bool {
        matches!(self, RuntimeMode::Emulated)
    }

    /// Retry settings forced on top of the remote queue's policy.
    pub fn retry_policy_override(&self) -> Option<RetryPolicyOverride> {
        match self {
            RuntimeMode::Production => None,
            RuntimeMode::Emulated => Some(RetryPolicyOverride::emulated()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_has_no_override() {
        assert!(RuntimeMode::Production.retry_policy_override().is_none());
        assert!(RuntimeMode::Emulated.retry_policy_override().is_some());
    }

    #[test]
    fn deserializes_snake_case() {
        let mode: RuntimeMode = serde_json::from_str("\"emulated\"").unwrap();
        assert_eq!(mode, RuntimeMode::Emulated);
    }
}
