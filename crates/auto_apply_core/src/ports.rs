//! crates/auto_apply_core/src/ports.rs
//!
//! Defines the service contracts (traits) the engine depends on.
//! These traits form the boundary of the hexagonal architecture: the engine only
//! knows their method contracts, never the storage or network technology behind them.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{
    ActivityLogEntry, ApplicationResult, AutoApplyConfig, FailureReport, Job, QueueStatus,
    QueuedApplication, QuotaState, SearchCriteria, UserProfile,
};
use crate::platform::PlatformLimits;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl PortError {
    /// Short label used as `error_type` in failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PortError::NotFound(_) => "not_found",
            PortError::InvalidInput(_) => "invalid_input",
            PortError::Timeout(_) => "timeout",
            PortError::Unexpected(_) => "unexpected",
        }
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Persistence Ports
//=========================================================================================

#[async_trait]
pub trait AutoApplyConfigRepository: Send + Sync {
    async fn get_config(&self, user_id: Uuid) -> PortResult<Option<AutoApplyConfig>>;

    /// Inserts or replaces the config keyed by `user_id`.
    async fn save_config(&self, config: &AutoApplyConfig) -> PortResult<()>;

    async fn list_enabled_configs(&self) -> PortResult<Vec<AutoApplyConfig>>;
}

#[async_trait]
pub trait ActivityLogRepository: Send + Sync {
    async fn create_entry(&self, entry: &ActivityLogEntry) -> PortResult<()>;

    async fn update_entry(&self, entry: &ActivityLogEntry) -> PortResult<()>;

    /// Newest first.
    async fn list_entries(
        &self,
        user_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> PortResult<Vec<ActivityLogEntry>>;
}

#[async_trait]
pub trait AutoApplyJobQueueRepository: Send + Sync {
    async fn insert_item(&self, item: &QueuedApplication) -> PortResult<()>;

    async fn get_item(&self, id: Uuid) -> PortResult<Option<QueuedApplication>>;

    /// Most recently queued row for this job, whatever its status.
    async fn latest_item_for_job(
        &self,
        user_id: Uuid,
        job_id: &str,
    ) -> PortResult<Option<QueuedApplication>>;

    /// Oldest first. An empty `statuses` slice matches every status.
    async fn list_items(
        &self,
        user_id: Uuid,
        statuses: &[QueueStatus],
        limit: usize,
    ) -> PortResult<Vec<QueuedApplication>>;

    async fn update_item(&self, item: &QueuedApplication) -> PortResult<()>;
}

#[async_trait]
pub trait RateLimitRepository: Send + Sync {
    async fn get_quota_state(&self, user_id: Uuid, platform: &str)
        -> PortResult<Option<QuotaState>>;

    async fn save_quota_state(&self, state: &QuotaState) -> PortResult<()>;

    async fn get_limit_override(
        &self,
        user_id: Uuid,
        platform: &str,
    ) -> PortResult<Option<PlatformLimits>>;

    async fn save_limit_override(
        &self,
        user_id: Uuid,
        platform: &str,
        limits: PlatformLimits,
    ) -> PortResult<()>;
}

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn get_profile(&self, user_id: Uuid) -> PortResult<Option<UserProfile>>;
}

//=========================================================================================
// Collaborator Ports
//=========================================================================================

#[async_trait]
pub trait JobSearchService: Send + Sync {
    /// Finds postings matching the criteria. Any error is opaque to the engine.
    async fn search(&self, criteria: &SearchCriteria) -> PortResult<Vec<Job>>;
}

#[async_trait]
pub trait JobApplicationService: Send + Sync {
    /// Attempts a direct submission. A rejected submission is `Ok` with
    /// `success == false`; `Err` means the infrastructure itself failed.
    async fn apply(&self, job: &Job, profile: &UserProfile) -> PortResult<ApplicationResult>;
}

#[async_trait]
pub trait FailureLogger: Send + Sync {
    /// Fire-and-forget; callers ignore the result beyond logging it.
    async fn log_error(&self, report: &FailureReport) -> PortResult<()>;
}
