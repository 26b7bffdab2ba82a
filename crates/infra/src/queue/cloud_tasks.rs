//! Cloud Tasks v2 REST client (read-only subset).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use taskrelay_core::RetryPolicy;

use super::{QueueService, QueueServiceError, RemoteTask, parse_api_duration};

pub const DEFAULT_CLOUD_TASKS_URL: &str = "https://cloudtasks.googleapis.com";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Where the bearer token for API calls comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessTokenSource {
    /// Fixed token (local tooling, emulators).
    Static(String),
    /// GCE / Cloud Run metadata server of the running instance.
    Metadata { url: String },
    /// No `Authorization` header (emulators that do not check).
    Anonymous,
}

impl AccessTokenSource {
    pub fn metadata_server() -> Self {
        AccessTokenSource::Metadata {
            url: METADATA_TOKEN_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueResource {
    #[serde(default)]
    retry_config: Option<QueueRetryConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueRetryConfig {
    #[serde(default)]
    max_attempts: Option<i64>,
    #[serde(default)]
    max_retry_duration: Option<String>,
    #[serde(default)]
    min_backoff: Option<String>,
    #[serde(default)]
    max_backoff: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskResource {
    #[serde(default)]
    first_attempt: Option<TaskAttempt>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskAttempt {
    #[serde(default)]
    dispatch_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[serde(default)]
    status: String,
}

impl QueueRetryConfig {
    fn into_policy(self) -> Result<RetryPolicy, QueueServiceError> {
        let defaults = RetryPolicy::default();
        let max_retry_duration = self
            .max_retry_duration
            .as_deref()
            .map(parse_api_duration)
            .transpose()?
            .filter(|d| !d.is_zero());

        Ok(RetryPolicy {
            max_attempts: RetryPolicy::max_attempts_from_remote(self.max_attempts),
            max_retry_duration,
            min_backoff: match self.min_backoff.as_deref() {
                Some(raw) => parse_api_duration(raw)?,
                None => defaults.min_backoff,
            },
            max_backoff: match self.max_backoff.as_deref() {
                Some(raw) => parse_api_duration(raw)?,
                None => defaults.max_backoff,
            },
        })
    }
}

/// Reads queue retry configuration and task metadata over REST.
#[derive(Debug)]
pub struct CloudTasksClient {
    base_url: Url,
    tokens: AccessTokenSource,
    cached_token: Mutex<Option<CachedToken>>,
    http: reqwest::Client,
}

impl CloudTasksClient {
    pub fn new(
        base_url: impl Into<String>,
        tokens: AccessTokenSource,
        timeout: Duration,
    ) -> Result<Self, QueueServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QueueServiceError::Transport(format!("failed to build http client: {e}")))?;

        let base_url = base_url.into();
        let base_url = Url::parse(&base_url)
            .map_err(|e| QueueServiceError::InvalidResource(format!("base url `{base_url}`: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(QueueServiceError::InvalidResource(format!(
                "base url `{base_url}` cannot carry a path"
            )));
        }

        Ok(Self {
            base_url,
            tokens,
            cached_token: Mutex::new(None),
            http,
        })
    }

    /// `{base}/v2/{segments…}` with every segment percent-encoded.
    fn resource_url(&self, segments: &[&str]) -> Result<Url, QueueServiceError> {
        if let Some(bad) = segments
            .iter()
            .find(|s| s.is_empty() || **s == "." || **s == "..")
        {
            return Err(QueueServiceError::InvalidResource(format!(
                "invalid resource name segment `{bad}`"
            )));
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| QueueServiceError::InvalidResource("base url cannot carry a path".to_string()))?
            .pop_if_empty()
            .push("v2")
            .extend(segments);
        Ok(url)
    }

    fn queue_url(&self, project: &str, location: &str, queue: &str) -> Result<Url, QueueServiceError> {
        self.resource_url(&["projects", project, "locations", location, "queues", queue])
    }

    async fn access_token(&self) -> Result<Option<String>, QueueServiceError> {
        match &self.tokens {
            AccessTokenSource::Anonymous => Ok(None),
            AccessTokenSource::Static(token) => Ok(Some(token.clone())),
            AccessTokenSource::Metadata { url } => {
                let mut cached = self.cached_token.lock().await;
                if let Some(token) = cached.as_ref().filter(|t| t.expires_at > Instant::now()) {
                    return Ok(Some(token.token.clone()));
                }

                debug!(url = %url, "fetching access token from metadata server");
                let fetched = self
                    .http
                    .get(url)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await
                    .map_err(|e| QueueServiceError::Credentials(e.to_string()))?
                    .error_for_status()
                    .map_err(|e| QueueServiceError::Credentials(e.to_string()))?
                    .json::<MetadataToken>()
                    .await
                    .map_err(|e| QueueServiceError::Credentials(e.to_string()))?;

                let lifetime =
                    Duration::from_secs(fetched.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
                *cached = Some(CachedToken {
                    token: fetched.access_token.clone(),
                    expires_at: Instant::now() + lifetime,
                });
                Ok(Some(fetched.access_token))
            }
        }
    }

    async fn get_json<T>(&self, url: Url) -> Result<T, QueueServiceError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let mut request = self.http.get(url);
        if let Some(token) = self.access_token().await? {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| QueueServiceError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            let message = match serde_json::from_str::<ApiErrorResponse>(&body) {
                Ok(parsed) => format!("{} ({})", parsed.error.message, parsed.error.status),
                Err(_) => body,
            };
            return Err(QueueServiceError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| QueueServiceError::Decode(e.to_string()))
    }
}

#[async_trait]
impl QueueService for CloudTasksClient {
    #[instrument(skip(self), level = "debug")]
    async fn get_retry_policy(
        &self,
        project: &str,
        location: &str,
        queue: &str,
    ) -> Result<RetryPolicy, QueueServiceError> {
        let resource: QueueResource = self
            .get_json(self.queue_url(project, location, queue)?)
            .await?;
        resource.retry_config.unwrap_or_default().into_policy()
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_task(
        &self,
        project: &str,
        location: &str,
        queue: &str,
        task: &str,
    ) -> Result<RemoteTask, QueueServiceError> {
        let mut url = self.resource_url(&[
            "projects", project, "locations", location, "queues", queue, "tasks", task,
        ])?;
        url.query_pairs_mut().append_pair("responseView", "FULL");
        let resource: TaskResource = self.get_json(url).await?;
        Ok(RemoteTask {
            first_attempt_dispatch_time: resource.first_attempt.and_then(|a| a.dispatch_time),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    async fn queue(
        Path((project, _location, queue)): Path<(String, String, String)>,
        headers: HeaderMap,
    ) -> axum::response::Response {
        if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer tkn") {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        if project == "missing" {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": {"code": 404, "message": "Queue not found", "status": "NOT_FOUND"}})),
            )
                .into_response();
        }
        let body = match queue.as_str() {
            "team/a b" => json!({"name": "q", "retryConfig": {"maxAttempts": 7}}),
            "unlimited" => json!({"name": "q", "retryConfig": {"maxAttempts": -1, "minBackoff": "0.1s", "maxBackoff": "3600s"}}),
            _ => json!({"name": "q", "retryConfig": {"maxAttempts": 5, "maxRetryDuration": "3600s", "minBackoff": "0.5s", "maxBackoff": "10s"}}),
        };
        Json(body).into_response()
    }

    async fn task(
        Path((_project, _location, _queue, task)): Path<(String, String, String, String)>,
    ) -> Json<serde_json::Value> {
        match task.as_str() {
            "fresh" => Json(json!({"name": "t"})),
            _ => Json(json!({"name": "t", "firstAttempt": {"dispatchTime": "2024-01-01T00:00:00.5Z"}})),
        }
    }

    async fn spawn_fake_api() -> String {
        let app = Router::new()
            .route("/v2/projects/:project/locations/:location/queues/:queue", get(queue))
            .route(
                "/v2/projects/:project/locations/:location/queues/:queue/tasks/:task",
                get(task),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base: &str) -> CloudTasksClient {
        CloudTasksClient::new(
            base,
            AccessTokenSource::Static("tkn".to_string()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn reads_retry_policy() {
        let base = spawn_fake_api().await;
        let policy = client(&base).get_retry_policy("p", "l", "default").await.unwrap();

        assert_eq!(policy.max_attempts, Some(5));
        assert_eq!(policy.max_retry_duration, Some(Duration::from_secs(3600)));
        assert_eq!(policy.min_backoff, Duration::from_millis(500));
        assert_eq!(policy.max_backoff, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn negative_max_attempts_means_unlimited() {
        let base = spawn_fake_api().await;
        let policy = client(&base).get_retry_policy("p", "l", "unlimited").await.unwrap();

        assert_eq!(policy.max_attempts, None);
        assert_eq!(policy.max_retry_duration, None);
    }

    #[tokio::test]
    async fn api_errors_carry_status_and_message() {
        let base = spawn_fake_api().await;
        let err = client(&base).get_retry_policy("missing", "l", "q").await.unwrap_err();

        assert_eq!(
            err,
            QueueServiceError::Status {
                status: 404,
                message: "Queue not found (NOT_FOUND)".to_string()
            }
        );
    }

    #[tokio::test]
    async fn anonymous_requests_are_rejected_by_authenticated_api() {
        let base = spawn_fake_api().await;
        let anonymous =
            CloudTasksClient::new(&base, AccessTokenSource::Anonymous, Duration::from_secs(5)).unwrap();

        assert!(matches!(
            anonymous.get_retry_policy("p", "l", "q").await,
            Err(QueueServiceError::Status { status: 401, .. })
        ));
    }

    #[tokio::test]
    async fn reads_first_attempt_dispatch_time() {
        let base = spawn_fake_api().await;
        let c = client(&base);

        let retried = c.get_task("p", "l", "q", "retried").await.unwrap();
        assert_eq!(
            retried.first_attempt_dispatch_time,
            Some(DateTime::parse_from_rfc3339("2024-01-01T00:00:00.5Z").unwrap().with_timezone(&Utc))
        );

        let fresh = c.get_task("p", "l", "q", "fresh").await.unwrap();
        assert_eq!(fresh.first_attempt_dispatch_time, None);
    }

    #[tokio::test]
    async fn names_are_encoded_as_single_path_segments() {
        let base = spawn_fake_api().await;
        let policy = client(&format!("{base}/"))
            .get_retry_policy("p", "l", "team/a b")
            .await
            .unwrap();
        assert_eq!(policy.max_attempts, Some(7));
    }

    #[tokio::test]
    async fn dot_segments_are_rejected_before_any_request() {
        let c = client("http://127.0.0.1:9");
        assert!(matches!(
            c.get_task("p", "l", "q", "..").await,
            Err(QueueServiceError::InvalidResource(_))
        ));
        assert!(matches!(
            c.get_retry_policy("p", "l", "").await,
            Err(QueueServiceError::InvalidResource(_))
        ));
    }

    #[test]
    fn resource_urls_keep_the_base_path() {
        let c = client("http://emulator.test/prefix/");
        let url = c.queue_url("p", "l", "a?b#c").unwrap();
        assert_eq!(url.as_str(), "http://emulator.test/prefix/v2/projects/p/locations/l/queues/a%3Fb%23c");
    }

    #[tokio::test]
    async fn unreachable_api_is_a_transport_error() {
        let c = client("http://127.0.0.1:9");
        assert!(matches!(
            c.get_retry_policy("p", "l", "q").await,
            Err(QueueServiceError::Transport(_))
        ));
    }
}
