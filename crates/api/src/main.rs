use std::sync::Arc;

use anyhow::Context;

use taskrelay_api::app::{self, AppServicesBuilder};
use taskrelay_infra::{AppConfig, JobContext, JobResult};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskrelay_observability::init();

    let config = AppConfig::from_env().context("failed to load configuration")?;
    let bind = config.bind.clone();

    // Built-in job used for smoke-testing a queue end to end.
    let services = AppServicesBuilder::new(config)
        .register_handler(
            "taskrelay.log",
            Arc::new(|ctx: &JobContext| {
                tracing::info!(job_id = %ctx.job_id, attempt = ctx.attempt, args = %ctx.args, "taskrelay.log");
                JobResult::Success
            }),
        )
        .build()
        .context("failed to wire services")?;
    let services = Arc::new(services);

    let _event_logger = app::spawn_event_logger(&services.bus);
    let router = app::build_app(services);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, router).await.context("server error")?;
    Ok(())
}
