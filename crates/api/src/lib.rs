//! HTTP API: push delivery endpoint, status lookup and service wiring.

pub mod app;
pub mod middleware;
