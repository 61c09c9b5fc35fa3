//! crates/auto_apply_core/src/domain.rs
//!
//! Defines the pure, core data structures for the auto-apply engine.
//! These structs are independent of any database; they derive `serde` so an
//! outer HTTP layer can expose them as-is.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ports::PortError;

//=========================================================================================
// Configuration
//=========================================================================================

/// Per-user auto-apply configuration. One row per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoApplyConfig {
    pub user_id: Uuid,
    pub enabled: bool,
    pub keywords: Vec<String>,
    pub locations: Vec<String>,
    pub min_salary: Option<i64>,
    /// Max attempts per cycle run, across all platforms.
    pub daily_limit: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Daily cap given to configs created without an explicit one.
pub const DEFAULT_DAILY_LIMIT: u32 = 10;

impl AutoApplyConfig {
    /// A disabled config with empty criteria, ready to be patched.
    pub fn new(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            enabled: false,
            keywords: Vec::new(),
            locations: Vec::new(),
            min_salary: None,
            daily_limit: DEFAULT_DAILY_LIMIT,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builds the criteria handed to the job-search collaborator.
    pub fn search_criteria(&self, limit: usize) -> SearchCriteria {
        SearchCriteria {
            keywords: normalize_terms(&self.keywords),
            locations: normalize_terms(&self.locations),
            min_salary: self.min_salary,
            limit,
        }
    }

    /// Applies a partial update. `None` fields are left untouched.
    pub fn apply_update(&mut self, update: ConfigUpdate, now: DateTime<Utc>) {
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        if let Some(keywords) = update.keywords {
            self.keywords = keywords;
        }
        if let Some(locations) = update.locations {
            self.locations = locations;
        }
        if let Some(min_salary) = update.min_salary {
            self.min_salary = min_salary;
        }
        if let Some(daily_limit) = update.daily_limit {
            self.daily_limit = daily_limit;
        }
        self.updated_at = now;
    }
}

/// Patch payload for `create_or_update_config`.
///
/// `min_salary` is doubly optional so a caller can clear the floor
/// (`Some(None)`) as well as leave it alone (`None`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub enabled: Option<bool>,
    pub keywords: Option<Vec<String>>,
    pub locations: Option<Vec<String>>,
    pub min_salary: Option<Option<i64>>,
    pub daily_limit: Option<u32>,
}

fn normalize_terms(terms: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(terms.len());
    for term in terms {
        let term = term.trim();
        if term.is_empty() || out.iter().any(|t| t.eq_ignore_ascii_case(term)) {
            continue;
        }
        out.push(term.to_string());
    }
    out
}

//=========================================================================================
// Jobs and applications
//=========================================================================================

/// What the job-search collaborator is asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub keywords: Vec<String>,
    pub locations: Vec<String>,
    pub min_salary: Option<i64>,
    pub limit: usize,
}

/// A job posting returned by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    /// Source board the posting came from, e.g. `"linkedin"`.
    pub source: String,
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub salary: Option<i64>,
    /// The posting can only be completed on the employer's own site.
    pub external_application: bool,
}

impl Job {
    /// A job with no advertised salary always passes the floor.
    pub fn meets_salary_floor(&self, min_salary: Option<i64>) -> bool {
        match (self.salary, min_salary) {
            (Some(salary), Some(floor)) => salary >= floor,
            _ => true,
        }
    }
}

/// Applicant data handed to the application collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub resume_ref: Option<String>,
}

impl UserProfile {
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            full_name: None,
            email: None,
            resume_ref: None,
        }
    }
}

/// Outcome reported by the application collaborator.
/// A `success == false` result is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationResult {
    pub success: bool,
    pub error: Option<String>,
    pub screenshot_ref: Option<String>,
}

impl ApplicationResult {
    pub fn submitted() -> Self {
        Self {
            success: true,
            error: None,
            screenshot_ref: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
            screenshot_ref: None,
        }
    }
}

//=========================================================================================
// Job queue
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Retry,
    Skipped,
    Processed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Retry => "retry",
            QueueStatus::Skipped => "skipped",
            QueueStatus::Processed => "processed",
        }
    }

    /// Still waiting for someone to act on it.
    pub fn is_open(&self) -> bool {
        matches!(self, QueueStatus::Queued | QueueStatus::Retry)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(QueueStatus::Queued),
            "retry" => Ok(QueueStatus::Retry),
            "skipped" => Ok(QueueStatus::Skipped),
            "processed" => Ok(QueueStatus::Processed),
            other => Err(PortError::InvalidInput(format!(
                "unknown queue status '{}'",
                other
            ))),
        }
    }
}

/// A matched job deferred for out-of-band completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedApplication {
    pub id: Uuid,
    pub user_id: Uuid,
    pub job_id: String,
    pub platform: String,
    pub status: QueueStatus,
    pub queued_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

//=========================================================================================
// Activity ledger
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Running,
    Completed,
    Failed,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Running => "running",
            CycleStatus::Completed => "completed",
            CycleStatus::Failed => "failed",
        }
    }
}

impl FromStr for CycleStatus {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(CycleStatus::Running),
            "completed" => Ok(CycleStatus::Completed),
            "failed" => Ok(CycleStatus::Failed),
            other => Err(PortError::InvalidInput(format!(
                "unknown cycle status '{}'",
                other
            ))),
        }
    }
}

/// One row per cycle execution per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: Uuid,
    /// Shared by every entry written during the same tick.
    pub cycle_id: Uuid,
    pub user_id: Uuid,
    pub cycle_start: DateTime<Utc>,
    pub cycle_end: Option<DateTime<Utc>>,
    pub cycle_status: CycleStatus,
    pub jobs_searched: u32,
    pub jobs_matched: u32,
    pub jobs_applied: u32,
    pub jobs_queued: u32,
    pub applications_successful: u32,
    pub applications_failed: u32,
    pub errors: Vec<String>,
    pub screenshot_refs: Vec<String>,
}

impl ActivityLogEntry {
    pub fn start(cycle_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            cycle_id,
            user_id,
            cycle_start: now,
            cycle_end: None,
            cycle_status: CycleStatus::Running,
            jobs_searched: 0,
            jobs_matched: 0,
            jobs_applied: 0,
            jobs_queued: 0,
            applications_successful: 0,
            applications_failed: 0,
            errors: Vec::new(),
            screenshot_refs: Vec::new(),
        }
    }
}

//=========================================================================================
// Quota state
//=========================================================================================

/// Counters for one `(user_id, platform)` key. Owned by the rate limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaState {
    pub user_id: Uuid,
    pub platform: String,
    pub hourly_count: u32,
    pub daily_count: u32,
    /// Start of the UTC day the daily counter belongs to.
    pub last_reset: DateTime<Utc>,
    /// Start of the clock hour the hourly counter belongs to.
    pub hour_started: DateTime<Utc>,
    pub last_application: Option<DateTime<Utc>>,
}

//=========================================================================================
// Failure reports
//=========================================================================================

/// Payload for the failure logger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Pipeline stage that failed, e.g. `"job_search"`.
    pub task: String,
    pub platform: Option<String>,
    pub error_type: String,
    pub message: String,
    pub user_id: Option<Uuid>,
    pub job_id: Option<String>,
}
