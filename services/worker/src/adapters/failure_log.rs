//! services/worker/src/adapters/failure_log.rs
//!
//! Failure-logger adapters. Both emit a `tracing` event; the Postgres one also
//! keeps the report in `failure_logs`.

use async_trait::async_trait;
use auto_apply_core::domain::FailureReport;
use auto_apply_core::ports::{FailureLogger, PortResult};
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use super::db::db_error;

fn trace_report(report: &FailureReport) {
    error!(
        task = %report.task,
        platform = report.platform.as_deref().unwrap_or("-"),
        error_type = %report.error_type,
        user_id = ?report.user_id,
        job_id = report.job_id.as_deref().unwrap_or("-"),
        "{}",
        report.message
    );
}

/// Forwards failure reports to the tracing subscriber only.
#[derive(Clone, Default)]
pub struct TracingFailureLogger;

#[async_trait]
impl FailureLogger for TracingFailureLogger {
    async fn log_error(&self, report: &FailureReport) -> PortResult<()> {
        trace_report(report);
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgFailureLogger {
    pool: PgPool,
}

impl PgFailureLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FailureLogger for PgFailureLogger {
    async fn log_error(&self, report: &FailureReport) -> PortResult<()> {
        trace_report(report);
        sqlx::query(
            "INSERT INTO failure_logs (id, task, platform, error_type, message, user_id, job_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(Uuid::new_v4())
        .bind(&report.task)
        .bind(&report.platform)
        .bind(&report.error_type)
        .bind(&report.message)
        .bind(report.user_id)
        .bind(&report.job_id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}
