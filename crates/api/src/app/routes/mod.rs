use axum::{
    routing::{get, post},
    Router,
};

pub mod system;
pub mod tasks;

/// Scheduler-facing delivery endpoint.
pub fn router() -> Router {
    Router::new().route("/handle-task", post(tasks::handle_task))
}

/// Status read side; mounted behind the admin auth layer.
pub fn admin_router() -> Router {
    Router::new()
        .route("/tasks/:uuid", get(tasks::task_status))
        .route("/failed-jobs", get(tasks::failed_jobs))
}
