//! Service configuration.
//!
//! Layered: built-in defaults, then an optional file (`TASKRELAY_CONFIG`, or
//! `taskrelay.{toml,yaml,json}` in the working directory), then environment
//! variables prefixed `TASKRELAY__` with `__` between nesting levels, e.g.
//! `TASKRELAY__CONNECTIONS__CLOUDTASKS__HANDLER`.

use std::collections::BTreeMap;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use taskrelay_core::{ConnectionConfig, ConnectionRegistry, RuntimeMode};

use crate::queue::{AccessTokenSource, DEFAULT_CLOUD_TASKS_URL};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Listen address of the HTTP server.
    pub bind: String,
    pub mode: RuntimeMode,
    pub default_connection: String,
    pub connections: BTreeMap<String, ConnectionConfig>,
    pub queue_api: QueueApiSettings,
    pub auth: AuthSettings,
    pub worker: WorkerSettings,
    pub status: StatusSettings,
    pub admin: AdminSettings,
    /// Postgres URL for the failure ledger (in-memory when absent or when
    /// built without the `postgres` feature).
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueApiSettings {
    pub base_url: String,
    /// Static bearer token; when absent the metadata server is used
    /// (production) or no token is sent (emulated).
    pub access_token: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub jwks_url: String,
    pub jwks_cache_ttl_secs: u64,
    /// Shared secret for HS256 tokens (emulator / tests). Replaces JWKS.
    pub hs256_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub timeout_secs: u64,
}

/// Limits of the in-memory status store and failure ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSettings {
    pub max_tracked_jobs: usize,
    pub max_history_per_job: usize,
    pub max_failed_jobs: usize,
}

/// Access to the read endpoints (`/tasks/{uuid}`, `/failed-jobs`).
///
/// Callers present an identity token whose audience is `audience`; when
/// `allowed_emails` is non-empty the token's `email` must be listed. Without
/// an audience the read endpoints reject every request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminSettings {
    pub audience: Option<String>,
    pub allowed_emails: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            mode: RuntimeMode::Production,
            default_connection: "cloudtasks".to_string(),
            connections: BTreeMap::new(),
            queue_api: QueueApiSettings::default(),
            auth: AuthSettings::default(),
            worker: WorkerSettings::default(),
            status: StatusSettings::default(),
            admin: AdminSettings::default(),
            database_url: None,
        }
    }
}

impl Default for QueueApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CLOUD_TASKS_URL.to_string(),
            access_token: None,
            timeout_secs: 10,
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwks_url: taskrelay_auth::DEFAULT_GOOGLE_JWKS_URL.to_string(),
            jwks_cache_ttl_secs: 300,
            hs256_secret: None,
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self { timeout_secs: 60 }
    }
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            max_tracked_jobs: crate::status::DEFAULT_MAX_TRACKED_JOBS,
            max_history_per_job: crate::status::DEFAULT_MAX_HISTORY_PER_JOB,
            max_failed_jobs: crate::status::DEFAULT_FAILED_JOB_CAPACITY,
        }
    }
}

impl AppConfig {
    /// Load from the optional file at `path` plus `TASKRELAY__*` overrides.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name("taskrelay").required(false),
        };

        let config = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("TASKRELAY")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let app: AppConfig = config.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    /// Load using the `TASKRELAY_CONFIG` environment variable as the file path.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var("TASKRELAY_CONFIG").ok();
        Self::load(path.as_deref())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("queue_api.timeout_secs", self.queue_api.timeout_secs as usize),
            ("worker.timeout_secs", self.worker.timeout_secs as usize),
            ("auth.jwks_cache_ttl_secs", self.auth.jwks_cache_ttl_secs as usize),
            ("status.max_tracked_jobs", self.status.max_tracked_jobs),
            ("status.max_history_per_job", self.status.max_history_per_job),
            ("status.max_failed_jobs", self.status.max_failed_jobs),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Message(format!("{name} must be greater than zero")));
        }
        for (name, connection) in &self.connections {
            connection
                .validate()
                .map_err(|e| ConfigError::Message(format!("connection `{name}`: {e}")))?;
        }
        if !self.connections.is_empty() && !self.connections.contains_key(&self.default_connection) {
            return Err(ConfigError::Message(format!(
                "default connection `{}` is not configured",
                self.default_connection
            )));
        }
        Ok(())
    }

    pub fn registry(&self) -> ConnectionRegistry {
        self.connections
            .iter()
            .fold(ConnectionRegistry::new(&self.default_connection), |registry, (name, connection)| {
                let mut connection = connection.clone();
                connection.name = name.clone();
                registry.with_connection(name.clone(), connection)
            })
    }

    pub fn access_token_source(&self) -> AccessTokenSource {
        match (&self.queue_api.access_token, self.mode) {
            (Some(token), _) => AccessTokenSource::Static(token.clone()),
            (None, RuntimeMode::Production) => AccessTokenSource::metadata_server(),
            (None, RuntimeMode::Emulated) => AccessTokenSource::Anonymous,
        }
    }

    pub fn queue_api_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_api.timeout_secs)
    }

    pub fn jwks_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.auth.jwks_cache_ttl_secs)
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker.timeout_secs)
    }
}
