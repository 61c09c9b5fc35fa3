//! services/worker/src/adapters/application.rs
//!
//! Direct submissions are written to the `applications` table, where the
//! submission runner picks them up. A second submission for the same job is
//! reported back as a rejected application.

use async_trait::async_trait;
use auto_apply_core::domain::{ApplicationResult, Job, UserProfile};
use auto_apply_core::ports::{JobApplicationService, PortResult};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use super::db::db_error;

#[derive(Clone)]
pub struct PgApplicationAdapter {
    pool: PgPool,
}

impl PgApplicationAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobApplicationService for PgApplicationAdapter {
    async fn apply(&self, job: &Job, profile: &UserProfile) -> PortResult<ApplicationResult> {
        let result = sqlx::query(
            "INSERT INTO applications (id, user_id, job_id, platform, resume_ref) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (user_id, job_id) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(profile.user_id)
        .bind(&job.id)
        .bind(&job.source)
        .bind(&profile.resume_ref)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Ok(ApplicationResult::rejected(format!(
                "already applied to job {}",
                job.id
            )));
        }

        info!(user_id = %profile.user_id, job_id = %job.id, "Application recorded.");
        Ok(ApplicationResult::submitted())
    }
}
