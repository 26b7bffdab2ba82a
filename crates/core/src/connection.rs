//! Queue connection configuration and lookup.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{HandlingError, HandlingResult};
use crate::payload::JobPayload;

fn default_queue() -> String {
    "default".to_string()
}

/// Settings of one logical queue connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Connection name; filled in by the resolver.
    #[serde(default)]
    pub name: String,

    /// Cloud project id.
    pub project: String,

    /// Queue location (e.g. `europe-west1`).
    pub location: String,

    /// Public URL of this service's handler; also the expected token audience.
    pub handler: String,

    /// Queue used when a delivery does not name one.
    #[serde(default = "default_queue")]
    pub queue: String,
}

impl ConnectionConfig {
    pub fn new(
        project: impl Into<String>,
        location: impl Into<String>,
        handler: impl Into<String>,
    ) -> Self {
        Self {
            name: String::new(),
            project: project.into(),
            location: location.into(),
            handler: handler.into(),
            queue: default_queue(),
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Full resource path of a queue on this connection.
    pub fn queue_path(&self, queue: &str) -> String {
        format!(
            "projects/{}/locations/{}/queues/{}",
            self.project, self.location, queue
        )
    }

    /// Full resource path of a task on this connection.
    pub fn task_path(&self, queue: &str, task: &str) -> String {
        format!("{}/tasks/{}", self.queue_path(queue), task)
    }

    /// Checks that required settings are present.
    pub fn validate(&self) -> Result<(), String> {
        let missing = [
            ("project", &self.project),
            ("location", &self.location),
            ("handler", &self.handler),
            ("queue", &self.queue),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty());

        match missing {
            Some((field, _)) => Err(format!("connection setting '{field}' must not be empty")),
            None => Ok(()),
        }
    }
}

/// Read-only registry of connections, built once at startup.
///
/// Shared behind an `Arc`; never mutated after construction, so concurrent
/// reads need no locking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRegistry {
    default_connection: String,
    connections: BTreeMap<String, ConnectionConfig>,
}

impl ConnectionRegistry {
    pub fn new(default_connection: impl Into<String>) -> Self {
        Self {
            default_connection: default_connection.into(),
            connections: BTreeMap::new(),
        }
    }

    pub fn with_connection(mut self, name: impl Into<String>, config: ConnectionConfig) -> Self {
        self.connections.insert(name.into(), config);
        self
    }

    pub fn default_connection(&self) -> &str {
        &self.default_connection
    }

    pub fn get(&self, name: &str) -> Option<&ConnectionConfig> {
        self.connections.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.connections.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// Maps a job payload to the connection it was enqueued on.
#[derive(Debug, Clone)]
pub struct QueueConfigResolver {
    registry: Arc<ConnectionRegistry>,
}

impl QueueConfigResolver {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Resolve the payload's connection (falling back to the registry default)
    /// and return its settings with `name` set to the resolved name.
    pub fn resolve(&self, payload: &JobPayload) -> HandlingResult<ConnectionConfig> {
        let command = payload.command()?;
        let name = command
            .connection
            .unwrap_or_else(|| self.registry.default_connection().to_string());

        let mut config = self
            .registry
            .get(&name)
            .cloned()
            .ok_or_else(|| HandlingError::unknown_connection(name.clone()))?;
        config.name = name;
        Ok(config)
    }
}
