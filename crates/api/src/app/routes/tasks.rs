use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use taskrelay_core::delivery::{
    AUTHORIZATION_HEADER, QUEUE_NAME_HEADER, RETRY_COUNT_HEADER, TASK_NAME_HEADER,
};
use taskrelay_core::{InboundDelivery, JobId};
use taskrelay_infra::TaskStatusStore;

use crate::app::errors::{handling_error_to_response, json_error, store_error_to_response};
use crate::app::services::AppServices;

const DEFAULT_FAILED_JOBS_LIMIT: usize = 50;
const MAX_FAILED_JOBS_LIMIT: usize = 500;

fn delivery_from_request(headers: &HeaderMap, body: Bytes) -> InboundDelivery {
    [
        AUTHORIZATION_HEADER,
        RETRY_COUNT_HEADER,
        QUEUE_NAME_HEADER,
        TASK_NAME_HEADER,
    ]
    .into_iter()
    .filter_map(|name| {
        let value = headers.get(name)?.to_str().ok()?;
        Some((name, value.to_string()))
    })
    .fold(InboundDelivery::new(body.to_vec()), |delivery, (name, value)| {
        delivery.with_header(name, value)
    })
}

/// Push delivery endpoint invoked by the scheduler.
pub async fn handle_task(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let delivery = delivery_from_request(&headers, body);
    match services.handler.handle(delivery).await {
        Ok(handled) => (StatusCode::OK, Json(handled)).into_response(),
        Err(e) => handling_error_to_response(e),
    }
}

pub async fn task_status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(uuid): Path<String>,
) -> axum::response::Response {
    let Ok(job_id) = JobId::new(uuid) else {
        return json_error(StatusCode::BAD_REQUEST, "invalid_uuid", "uuid must not be blank");
    };

    match services.status.history(&job_id) {
        Ok(history) if history.is_empty() => {
            json_error(StatusCode::NOT_FOUND, "not_found", "not found")
        }
        Ok(history) => Json(history).into_response(),
        Err(e) => store_error_to_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct FailedJobsQuery {
    pub limit: Option<usize>,
}

pub async fn failed_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<FailedJobsQuery>,
) -> axum::response::Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_FAILED_JOBS_LIMIT)
        .min(MAX_FAILED_JOBS_LIMIT);

    match services.ledger.list(limit).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => store_error_to_response(e),
    }
}
