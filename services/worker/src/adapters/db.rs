//! services/worker/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of
//! every persistence port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use auto_apply_core::domain::{
    ActivityLogEntry, AutoApplyConfig, CycleStatus, QueueStatus, QueuedApplication, QuotaState,
    UserProfile,
};
use auto_apply_core::platform::PlatformLimits;
use auto_apply_core::ports::{
    ActivityLogRepository, AutoApplyConfigRepository, AutoApplyJobQueueRepository, PortError,
    PortResult, ProfileRepository, RateLimitRepository,
};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements all persistence ports.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a new `PgStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs the embedded migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

/// Maps `sqlx` errors onto the port error type: `RowNotFound` is `NotFound`,
/// everything else is `Unexpected`.
pub(crate) fn db_error(e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound("row not found".to_string()),
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn to_db(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn from_db(n: i32) -> u32 {
    n.max(0) as u32
}

fn to_db_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct ConfigRecord {
    user_id: Uuid,
    enabled: bool,
    keywords: Vec<String>,
    locations: Vec<String>,
    min_salary: Option<i64>,
    daily_limit: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl ConfigRecord {
    fn to_domain(self) -> AutoApplyConfig {
        AutoApplyConfig {
            user_id: self.user_id,
            enabled: self.enabled,
            keywords: self.keywords,
            locations: self.locations,
            min_salary: self.min_salary,
            daily_limit: from_db(self.daily_limit),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct ActivityRecord {
    id: Uuid,
    cycle_id: Uuid,
    user_id: Uuid,
    cycle_start: DateTime<Utc>,
    cycle_end: Option<DateTime<Utc>>,
    cycle_status: String,
    jobs_searched: i32,
    jobs_matched: i32,
    jobs_applied: i32,
    jobs_queued: i32,
    applications_successful: i32,
    applications_failed: i32,
    errors: Vec<String>,
    screenshot_refs: Vec<String>,
}
impl ActivityRecord {
    fn to_domain(self) -> PortResult<ActivityLogEntry> {
        Ok(ActivityLogEntry {
            id: self.id,
            cycle_id: self.cycle_id,
            user_id: self.user_id,
            cycle_start: self.cycle_start,
            cycle_end: self.cycle_end,
            cycle_status: self.cycle_status.parse::<CycleStatus>()?,
            jobs_searched: from_db(self.jobs_searched),
            jobs_matched: from_db(self.jobs_matched),
            jobs_applied: from_db(self.jobs_applied),
            jobs_queued: from_db(self.jobs_queued),
            applications_successful: from_db(self.applications_successful),
            applications_failed: from_db(self.applications_failed),
            errors: self.errors,
            screenshot_refs: self.screenshot_refs,
        })
    }
}

#[derive(FromRow)]
struct QueueRecord {
    id: Uuid,
    user_id: Uuid,
    job_id: String,
    platform: String,
    status: String,
    queued_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
}
impl QueueRecord {
    fn to_domain(self) -> PortResult<QueuedApplication> {
        Ok(QueuedApplication {
            id: self.id,
            user_id: self.user_id,
            job_id: self.job_id,
            platform: self.platform,
            status: self.status.parse::<QueueStatus>()?,
            queued_at: self.queued_at,
            processed_at: self.processed_at,
            error_message: self.error_message,
        })
    }
}

#[derive(FromRow)]
struct QuotaRecord {
    user_id: Uuid,
    platform: String,
    hourly_count: i32,
    daily_count: i32,
    last_reset: DateTime<Utc>,
    hour_started: DateTime<Utc>,
    last_application: Option<DateTime<Utc>>,
}
impl QuotaRecord {
    fn to_domain(self) -> QuotaState {
        QuotaState {
            user_id: self.user_id,
            platform: self.platform,
            hourly_count: from_db(self.hourly_count),
            daily_count: from_db(self.daily_count),
            last_reset: self.last_reset,
            hour_started: self.hour_started,
            last_application: self.last_application,
        }
    }
}

#[derive(FromRow)]
struct OverrideRecord {
    hourly_limit: i32,
    daily_limit: i32,
    burst_floor: i32,
}
impl OverrideRecord {
    fn to_domain(self) -> PlatformLimits {
        PlatformLimits::new(
            from_db(self.hourly_limit),
            from_db(self.daily_limit),
            from_db(self.burst_floor),
        )
    }
}

#[derive(FromRow)]
struct ProfileRecord {
    user_id: Uuid,
    full_name: Option<String>,
    email: Option<String>,
    resume_ref: Option<String>,
}
impl ProfileRecord {
    fn to_domain(self) -> UserProfile {
        UserProfile {
            user_id: self.user_id,
            full_name: self.full_name,
            email: self.email,
            resume_ref: self.resume_ref,
        }
    }
}

//=========================================================================================
// `AutoApplyConfigRepository` Implementation
//=========================================================================================

const CONFIG_COLUMNS: &str =
    "user_id, enabled, keywords, locations, min_salary, daily_limit, created_at, updated_at";

#[async_trait]
impl AutoApplyConfigRepository for PgStore {
    async fn get_config(&self, user_id: Uuid) -> PortResult<Option<AutoApplyConfig>> {
        let record = sqlx::query_as::<_, ConfigRecord>(&format!(
            "SELECT {} FROM auto_apply_configs WHERE user_id = $1",
            CONFIG_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(record.map(ConfigRecord::to_domain))
    }

    async fn save_config(&self, config: &AutoApplyConfig) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO auto_apply_configs \
                (user_id, enabled, keywords, locations, min_salary, daily_limit, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (user_id) DO UPDATE SET \
                enabled = EXCLUDED.enabled, \
                keywords = EXCLUDED.keywords, \
                locations = EXCLUDED.locations, \
                min_salary = EXCLUDED.min_salary, \
                daily_limit = EXCLUDED.daily_limit, \
                updated_at = EXCLUDED.updated_at",
        )
        .bind(config.user_id)
        .bind(config.enabled)
        .bind(&config.keywords)
        .bind(&config.locations)
        .bind(config.min_salary)
        .bind(to_db(config.daily_limit))
        .bind(config.created_at)
        .bind(config.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn list_enabled_configs(&self) -> PortResult<Vec<AutoApplyConfig>> {
        let records = sqlx::query_as::<_, ConfigRecord>(&format!(
            "SELECT {} FROM auto_apply_configs WHERE enabled ORDER BY created_at",
            CONFIG_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(records.into_iter().map(ConfigRecord::to_domain).collect())
    }
}

//=========================================================================================
// `ActivityLogRepository` Implementation
//=========================================================================================

#[async_trait]
impl ActivityLogRepository for PgStore {
    async fn create_entry(&self, entry: &ActivityLogEntry) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO auto_apply_activity_logs \
                (id, cycle_id, user_id, cycle_start, cycle_end, cycle_status, jobs_searched, \
                 jobs_matched, jobs_applied, jobs_queued, applications_successful, \
                 applications_failed, errors, screenshot_refs) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(entry.id)
        .bind(entry.cycle_id)
        .bind(entry.user_id)
        .bind(entry.cycle_start)
        .bind(entry.cycle_end)
        .bind(entry.cycle_status.as_str())
        .bind(to_db(entry.jobs_searched))
        .bind(to_db(entry.jobs_matched))
        .bind(to_db(entry.jobs_applied))
        .bind(to_db(entry.jobs_queued))
        .bind(to_db(entry.applications_successful))
        .bind(to_db(entry.applications_failed))
        .bind(&entry.errors)
        .bind(&entry.screenshot_refs)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn update_entry(&self, entry: &ActivityLogEntry) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE auto_apply_activity_logs SET \
                cycle_end = $2, cycle_status = $3, jobs_searched = $4, jobs_matched = $5, \
                jobs_applied = $6, jobs_queued = $7, applications_successful = $8, \
                applications_failed = $9, errors = $10, screenshot_refs = $11 \
             WHERE id = $1",
        )
        .bind(entry.id)
        .bind(entry.cycle_end)
        .bind(entry.cycle_status.as_str())
        .bind(to_db(entry.jobs_searched))
        .bind(to_db(entry.jobs_matched))
        .bind(to_db(entry.jobs_applied))
        .bind(to_db(entry.jobs_queued))
        .bind(to_db(entry.applications_successful))
        .bind(to_db(entry.applications_failed))
        .bind(&entry.errors)
        .bind(&entry.screenshot_refs)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Activity entry {} not found",
                entry.id
            )));
        }
        Ok(())
    }

    async fn list_entries(
        &self,
        user_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> PortResult<Vec<ActivityLogEntry>> {
        let records = sqlx::query_as::<_, ActivityRecord>(
            "SELECT id, cycle_id, user_id, cycle_start, cycle_end, cycle_status, jobs_searched, \
                    jobs_matched, jobs_applied, jobs_queued, applications_successful, \
                    applications_failed, errors, screenshot_refs \
             FROM auto_apply_activity_logs \
             WHERE user_id = $1 \
             ORDER BY cycle_start DESC \
             LIMIT $2 OFFSET $3",
        )
        .bind(user_id)
        .bind(to_db_count(limit))
        .bind(to_db_count(offset))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        records.into_iter().map(ActivityRecord::to_domain).collect()
    }
}

//=========================================================================================
// `AutoApplyJobQueueRepository` Implementation
//=========================================================================================

const QUEUE_COLUMNS: &str =
    "id, user_id, job_id, platform, status, queued_at, processed_at, error_message";

#[async_trait]
impl AutoApplyJobQueueRepository for PgStore {
    async fn insert_item(&self, item: &QueuedApplication) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO auto_apply_job_queue \
                (id, user_id, job_id, platform, status, queued_at, processed_at, error_message) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(item.id)
        .bind(item.user_id)
        .bind(&item.job_id)
        .bind(&item.platform)
        .bind(item.status.as_str())
        .bind(item.queued_at)
        .bind(item.processed_at)
        .bind(&item.error_message)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get_item(&self, id: Uuid) -> PortResult<Option<QueuedApplication>> {
        let record = sqlx::query_as::<_, QueueRecord>(&format!(
            "SELECT {} FROM auto_apply_job_queue WHERE id = $1",
            QUEUE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        record.map(QueueRecord::to_domain).transpose()
    }

    async fn latest_item_for_job(
        &self,
        user_id: Uuid,
        job_id: &str,
    ) -> PortResult<Option<QueuedApplication>> {
        let record = sqlx::query_as::<_, QueueRecord>(&format!(
            "SELECT {} FROM auto_apply_job_queue \
             WHERE user_id = $1 AND job_id = $2 \
             ORDER BY queued_at DESC LIMIT 1",
            QUEUE_COLUMNS
        ))
        .bind(user_id)
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        record.map(QueueRecord::to_domain).transpose()
    }

    async fn list_items(
        &self,
        user_id: Uuid,
        statuses: &[QueueStatus],
        limit: usize,
    ) -> PortResult<Vec<QueuedApplication>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let records = sqlx::query_as::<_, QueueRecord>(&format!(
            "SELECT {} FROM auto_apply_job_queue \
             WHERE user_id = $1 AND (cardinality($2::text[]) = 0 OR status = ANY($2)) \
             ORDER BY queued_at ASC LIMIT $3",
            QUEUE_COLUMNS
        ))
        .bind(user_id)
        .bind(&statuses)
        .bind(to_db_count(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        records.into_iter().map(QueueRecord::to_domain).collect()
    }

    async fn update_item(&self, item: &QueuedApplication) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE auto_apply_job_queue \
             SET status = $2, processed_at = $3, error_message = $4 \
             WHERE id = $1",
        )
        .bind(item.id)
        .bind(item.status.as_str())
        .bind(item.processed_at)
        .bind(&item.error_message)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Queue item {} not found",
                item.id
            )));
        }
        Ok(())
    }
}

//=========================================================================================
// `RateLimitRepository` Implementation
//=========================================================================================

#[async_trait]
impl RateLimitRepository for PgStore {
    async fn get_quota_state(
        &self,
        user_id: Uuid,
        platform: &str,
    ) -> PortResult<Option<QuotaState>> {
        let record = sqlx::query_as::<_, QuotaRecord>(
            "SELECT user_id, platform, hourly_count, daily_count, last_reset, hour_started, \
                    last_application \
             FROM rate_limit_states WHERE user_id = $1 AND platform = $2",
        )
        .bind(user_id)
        .bind(platform)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(record.map(QuotaRecord::to_domain))
    }

    async fn save_quota_state(&self, state: &QuotaState) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO rate_limit_states \
                (user_id, platform, hourly_count, daily_count, last_reset, hour_started, last_application) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (user_id, platform) DO UPDATE SET \
                hourly_count = EXCLUDED.hourly_count, \
                daily_count = EXCLUDED.daily_count, \
                last_reset = EXCLUDED.last_reset, \
                hour_started = EXCLUDED.hour_started, \
                last_application = EXCLUDED.last_application",
        )
        .bind(state.user_id)
        .bind(&state.platform)
        .bind(to_db(state.hourly_count))
        .bind(to_db(state.daily_count))
        .bind(state.last_reset)
        .bind(state.hour_started)
        .bind(state.last_application)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get_limit_override(
        &self,
        user_id: Uuid,
        platform: &str,
    ) -> PortResult<Option<PlatformLimits>> {
        let record = sqlx::query_as::<_, OverrideRecord>(
            "SELECT hourly_limit, daily_limit, burst_floor \
             FROM rate_limit_overrides WHERE user_id = $1 AND platform = $2",
        )
        .bind(user_id)
        .bind(platform)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(record.map(OverrideRecord::to_domain))
    }

    async fn save_limit_override(
        &self,
        user_id: Uuid,
        platform: &str,
        limits: PlatformLimits,
    ) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO rate_limit_overrides \
                (user_id, platform, hourly_limit, daily_limit, burst_floor, updated_at) \
             VALUES ($1, $2, $3, $4, $5, NOW()) \
             ON CONFLICT (user_id, platform) DO UPDATE SET \
                hourly_limit = EXCLUDED.hourly_limit, \
                daily_limit = EXCLUDED.daily_limit, \
                burst_floor = EXCLUDED.burst_floor, \
                updated_at = NOW()",
        )
        .bind(user_id)
        .bind(platform)
        .bind(to_db(limits.hourly))
        .bind(to_db(limits.daily))
        .bind(to_db(limits.burst_floor))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}

//=========================================================================================
// `ProfileRepository` Implementation
//=========================================================================================

#[async_trait]
impl ProfileRepository for PgStore {
    async fn get_profile(&self, user_id: Uuid) -> PortResult<Option<UserProfile>> {
        let record = sqlx::query_as::<_, ProfileRecord>(
            "SELECT user_id, full_name, email, resume_ref FROM user_profiles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(record.map(ProfileRecord::to_domain))
    }
}
