//! Postgres-backed failure ledger.
//!
//! Expects a `failed_jobs` table:
//!
//! ```sql
//! CREATE TABLE failed_jobs (
//!     id          UUID PRIMARY KEY,
//!     job_id      TEXT NOT NULL,
//!     connection  TEXT NOT NULL,
//!     queue       TEXT NOT NULL,
//!     payload     TEXT NOT NULL,
//!     exception   JSONB NOT NULL,
//!     failed_at   TIMESTAMPTZ NOT NULL
//! );
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::instrument;
use uuid::Uuid;

use taskrelay_core::{JobId, QueueName};
use taskrelay_events::ExceptionInfo;

use super::StatusStoreError;
use super::ledger::{FailedJobLedger, FailedJobRecord};

#[derive(Debug, Clone)]
pub struct PostgresFailedJobLedger {
    pool: Arc<PgPool>,
}

impl PostgresFailedJobLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[derive(Debug, FromRow)]
struct FailedJobRow {
    id: Uuid,
    job_id: String,
    connection: String,
    queue: String,
    payload: String,
    exception: serde_json::Value,
    failed_at: DateTime<Utc>,
}

impl TryFrom<FailedJobRow> for FailedJobRecord {
    type Error = StatusStoreError;

    fn try_from(row: FailedJobRow) -> Result<Self, Self::Error> {
        Ok(FailedJobRecord {
            id: row.id,
            job_id: JobId::new(row.job_id).map_err(invalid_row)?,
            connection: row.connection,
            queue: QueueName::new(row.queue).map_err(invalid_row)?,
            payload: row.payload,
            exception: serde_json::from_value::<ExceptionInfo>(row.exception).map_err(invalid_row)?,
            failed_at: row.failed_at,
        })
    }
}

fn invalid_row(e: impl core::fmt::Display) -> StatusStoreError {
    StatusStoreError::Storage(format!("invalid failed_jobs row: {e}"))
}

fn map_sqlx_error(operation: &str, e: sqlx::Error) -> StatusStoreError {
    StatusStoreError::Storage(format!("{operation}: {e}"))
}

#[async_trait]
impl FailedJobLedger for PostgresFailedJobLedger {
    #[instrument(skip(self, record), fields(job_id = %record.job_id), err)]
    async fn record(&self, record: FailedJobRecord) -> Result<(), StatusStoreError> {
        let exception = serde_json::to_value(&record.exception)
            .map_err(|e| StatusStoreError::Storage(format!("encode exception: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO failed_jobs (id, job_id, connection, queue, payload, exception, failed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(record.job_id.as_str())
        .bind(&record.connection)
        .bind(record.queue.as_str())
        .bind(&record.payload)
        .bind(exception)
        .bind(record.failed_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record", e))?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list(&self, limit: usize) -> Result<Vec<FailedJobRecord>, StatusStoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, FailedJobRow>(
            r#"
            SELECT id, job_id, connection, queue, payload, exception, failed_at
            FROM failed_jobs
            ORDER BY failed_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list", e))?;

        rows.into_iter().map(FailedJobRecord::try_from).collect()
    }
}
