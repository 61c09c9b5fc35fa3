pub mod activity;
pub mod auto_apply;
pub mod domain;
pub mod job_queue;
pub mod memory;
pub mod platform;
pub mod ports;
pub mod rate_limiter;

pub use auto_apply::{AutoApplyService, CycleSummary, EnginePorts, OrchestratorSettings};
pub use domain::{
    ActivityLogEntry, ApplicationResult, AutoApplyConfig, ConfigUpdate, CycleStatus,
    FailureReport, Job, QueueStatus, QueuedApplication, QuotaState, SearchCriteria, UserProfile,
};
pub use platform::{Platform, PlatformLimits, RateLimitConfig};
pub use ports::{
    ActivityLogRepository, AutoApplyConfigRepository, AutoApplyJobQueueRepository,
    FailureLogger, JobApplicationService, JobSearchService, PortError, PortResult,
    ProfileRepository, RateLimitRepository,
};
pub use rate_limiter::{RateDecision, RateLimiter, RateStatus};
