use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use taskrelay_core::HandlingError;
use taskrelay_infra::StatusStoreError;

/// Map a rejected delivery to its HTTP response.
///
/// Any non-2xx makes the scheduler redeliver; client errors still do, so a
/// poison delivery is bounded by the queue's own retry settings.
pub fn handling_error_to_response(err: HandlingError) -> axum::response::Response {
    let code = err.code();
    match err {
        HandlingError::EmptyBody | HandlingError::MalformedPayload(_) => {
            json_error(StatusCode::BAD_REQUEST, code, err.to_string())
        }
        HandlingError::Unauthorized => json_error(StatusCode::UNAUTHORIZED, code, "unauthorized"),
        HandlingError::UnknownConnection(_) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, code, err.to_string())
        }
        HandlingError::RetryPolicyUnavailable(_) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, code, err.to_string())
        }
    }
}

pub fn store_error_to_response(err: StatusStoreError) -> axum::response::Response {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
