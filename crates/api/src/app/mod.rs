//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: delivery pipeline wiring (verifier, queue client, worker, sinks)
//! - `routes/`: HTTP routes + handlers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, AppServicesBuilder, ServicesError, spawn_event_logger};

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>) -> Router {
    // Read routes: require an admin identity token.
    let admin = routes::admin_router().layer(axum::middleware::from_fn_with_state(
        services.admin.clone(),
        middleware::admin_auth_middleware,
    ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .merge(admin)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
