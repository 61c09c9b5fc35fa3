//! crates/auto_apply_core/src/auto_apply.rs
//!
//! The cycle orchestrator and the administrative operations around it.
//!
//! One call to `run_cycle` fans out over every enabled config. Each config runs
//! as its own task: its errors, timeouts and panics end up in its own ledger
//! entry and never reach sibling tasks or the caller.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::activity::ActivityLedger;
use crate::domain::{
    ActivityLogEntry, AutoApplyConfig, ConfigUpdate, CycleStatus, FailureReport, Job,
    QueuedApplication, UserProfile,
};
use crate::job_queue::JobQueue;
use crate::platform::{PlatformLimits, RateLimitConfig};
use crate::ports::{
    ActivityLogRepository, AutoApplyConfigRepository, AutoApplyJobQueueRepository,
    FailureLogger, JobApplicationService, JobSearchService, PortError, PortResult,
    ProfileRepository, RateLimitRepository,
};
use crate::rate_limiter::RateLimiter;

//=========================================================================================
// Wiring
//=========================================================================================

/// Every port the engine talks to, created once at startup.
#[derive(Clone)]
pub struct EnginePorts {
    pub configs: Arc<dyn AutoApplyConfigRepository>,
    pub activity: Arc<dyn ActivityLogRepository>,
    pub queue: Arc<dyn AutoApplyJobQueueRepository>,
    pub rate_limits: Arc<dyn RateLimitRepository>,
    pub profiles: Arc<dyn ProfileRepository>,
    pub job_search: Arc<dyn JobSearchService>,
    pub job_application: Arc<dyn JobApplicationService>,
    pub failure_logger: Arc<dyn FailureLogger>,
}

/// Tuning for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub search_timeout: Duration,
    pub apply_timeout: Duration,
    /// How many user cycles may run at the same time.
    pub max_concurrent_cycles: usize,
    /// How many postings to ask the search collaborator for.
    pub search_result_limit: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            search_timeout: Duration::from_secs(30),
            apply_timeout: Duration::from_secs(60),
            max_concurrent_cycles: 8,
            search_result_limit: 50,
        }
    }
}

//=========================================================================================
// Cycle results
//=========================================================================================

/// Totals for one `run_cycle` call, for the caller's logs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub cycle_id: Uuid,
    pub configs_processed: u32,
    pub completed: u32,
    pub failed: u32,
    pub jobs_applied: u32,
    pub jobs_queued: u32,
    pub applications_failed: u32,
    pub duration_ms: u64,
}

impl CycleSummary {
    fn new(cycle_id: Uuid) -> Self {
        Self {
            cycle_id,
            ..Self::default()
        }
    }

    fn absorb(&mut self, entry: &ActivityLogEntry) {
        self.configs_processed += 1;
        match entry.cycle_status {
            CycleStatus::Failed => self.failed += 1,
            _ => self.completed += 1,
        }
        self.jobs_applied += entry.jobs_applied;
        self.jobs_queued += entry.jobs_queued;
        self.applications_failed += entry.applications_failed;
    }
}

/// An infrastructure failure inside one user's cycle.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {source}")]
struct StageError {
    stage: &'static str,
    platform: Option<String>,
    job_id: Option<String>,
    #[source]
    source: PortError,
}

impl StageError {
    fn new(stage: &'static str, source: PortError) -> Self {
        Self {
            stage,
            platform: None,
            job_id: None,
            source,
        }
    }

    fn for_job(stage: &'static str, job: &Job, source: PortError) -> Self {
        Self {
            stage,
            platform: Some(job.source.clone()),
            job_id: Some(job.id.clone()),
            source,
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn bounded<T>(
    stage: &'static str,
    limit: Duration,
    call: impl Future<Output = PortResult<T>>,
) -> PortResult<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(PortError::Timeout(format!(
            "{} did not finish within {:?}",
            stage, limit
        ))),
    }
}

//=========================================================================================
// The service
//=========================================================================================

#[derive(Clone)]
pub struct AutoApplyService {
    configs: Arc<dyn AutoApplyConfigRepository>,
    profiles: Arc<dyn ProfileRepository>,
    job_search: Arc<dyn JobSearchService>,
    job_application: Arc<dyn JobApplicationService>,
    failure_logger: Arc<dyn FailureLogger>,
    rate_limiter: Arc<RateLimiter>,
    queue: Arc<JobQueue>,
    ledger: Arc<ActivityLedger>,
    settings: OrchestratorSettings,
}

impl AutoApplyService {
    pub fn new(
        ports: EnginePorts,
        rate_limits: RateLimitConfig,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            configs: ports.configs,
            profiles: ports.profiles,
            job_search: ports.job_search,
            job_application: ports.job_application,
            failure_logger: ports.failure_logger,
            rate_limiter: Arc::new(RateLimiter::new(ports.rate_limits, rate_limits)),
            queue: Arc::new(JobQueue::new(ports.queue)),
            ledger: Arc::new(ActivityLedger::new(ports.activity)),
            settings,
        }
    }

    /// The quota tracker, for direct `can_apply` / `record_application` /
    /// `get_rate_status` calls.
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn job_queue(&self) -> &JobQueue {
        &self.queue
    }

    //-------------------------------------------------------------------------------------
    // Cycle orchestration
    //-------------------------------------------------------------------------------------

    /// Runs one pass over every enabled config. Never fails: per-user errors
    /// are visible through the activity ledger and the failure logger.
    pub async fn run_cycle(&self) -> CycleSummary {
        let cycle_id = Uuid::new_v4();
        let started = Instant::now();
        let mut summary = CycleSummary::new(cycle_id);

        let configs = match self.configs.list_enabled_configs().await {
            Ok(configs) => configs,
            Err(e) => {
                error!(%cycle_id, "Failed to load auto-apply configs: {}", e);
                self.report(FailureReport {
                    task: "load_configs".to_string(),
                    platform: None,
                    error_type: e.kind().to_string(),
                    message: e.to_string(),
                    user_id: None,
                    job_id: None,
                })
                .await;
                summary.duration_ms = started.elapsed().as_millis() as u64;
                return summary;
            }
        };
        info!(%cycle_id, configs = configs.len(), "Auto-apply cycle started.");

        let slots = Arc::new(Semaphore::new(self.settings.max_concurrent_cycles.max(1)));
        let mut tasks = JoinSet::new();
        for config in configs {
            let service = self.clone();
            let slots = slots.clone();
            tasks.spawn(async move {
                let _slot = slots.acquire_owned().await.ok();
                service.run_user_cycle(cycle_id, config).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => summary.absorb(&entry),
                Err(e) => {
                    error!(%cycle_id, "User cycle task did not complete: {}", e);
                    summary.configs_processed += 1;
                    summary.failed += 1;
                }
            }
        }

        let pruned = self.rate_limiter.prune_idle_locks();
        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            %cycle_id,
            processed = summary.configs_processed,
            completed = summary.completed,
            failed = summary.failed,
            applied = summary.jobs_applied,
            queued = summary.jobs_queued,
            pruned_locks = pruned,
            duration_ms = summary.duration_ms,
            "Auto-apply cycle finished."
        );
        summary
    }

    /// Runs one config end to end and returns its finalized ledger entry.
    async fn run_user_cycle(&self, cycle_id: Uuid, config: AutoApplyConfig) -> ActivityLogEntry {
        let user_id = config.user_id;
        let mut entry = ActivityLogEntry::start(cycle_id, user_id, Utc::now());

        if let Err(e) = self.ledger.open(&entry).await {
            error!(%user_id, "Failed to open activity entry: {}", e);
            let failure = StageError::new("activity_log", e);
            self.report_stage(user_id, &failure).await;
            entry.errors.push(failure.to_string());
            entry.cycle_status = CycleStatus::Failed;
            entry.cycle_end = Some(Utc::now());
            return entry;
        }

        let outcome = AssertUnwindSafe(self.process_config(&config, &mut entry))
            .catch_unwind()
            .await;

        entry.cycle_status = match outcome {
            Ok(Ok(())) => CycleStatus::Completed,
            Ok(Err(failure)) => {
                error!(%user_id, "Auto-apply cycle failed: {}", failure);
                self.report_stage(user_id, &failure).await;
                entry.errors.push(failure.to_string());
                CycleStatus::Failed
            }
            Err(payload) => {
                let message = format!("cycle panicked: {}", panic_message(payload));
                error!(%user_id, "{}", message);
                self.report(FailureReport {
                    task: "auto_apply_cycle".to_string(),
                    platform: None,
                    error_type: "panic".to_string(),
                    message: message.clone(),
                    user_id: Some(user_id),
                    job_id: None,
                })
                .await;
                entry.errors.push(message);
                CycleStatus::Failed
            }
        };
        entry.cycle_end = Some(Utc::now());

        if let Err(first) = self.ledger.close(&entry).await {
            warn!(%user_id, "Finalizing activity entry failed, retrying: {}", first);
            if let Err(e) = self.ledger.close(&entry).await {
                error!(%user_id, "Failed to finalize activity entry: {}", e);
                let failure = StageError::new("activity_log", e);
                self.report_stage(user_id, &failure).await;
                // The stored row is stuck at `running`; never report it as completed.
                entry.errors.push(failure.to_string());
                entry.cycle_status = CycleStatus::Failed;
            }
        }
        entry
    }

    /// Search, then evaluate matched jobs one at a time.
    async fn process_config(
        &self,
        config: &AutoApplyConfig,
        entry: &mut ActivityLogEntry,
    ) -> Result<(), StageError> {
        let user_id = config.user_id;

        let criteria = config.search_criteria(self.settings.search_result_limit);
        let jobs = bounded(
            "job_search",
            self.settings.search_timeout,
            self.job_search.search(&criteria),
        )
        .await
        .map_err(|e| StageError::new("job_search", e))?;

        entry.jobs_searched = jobs.len() as u32;
        let matched: Vec<Job> = jobs
            .into_iter()
            .filter(|job| job.meets_salary_floor(config.min_salary))
            .collect();
        entry.jobs_matched = matched.len() as u32;
        self.ledger
            .checkpoint(entry)
            .await
            .map_err(|e| StageError::new("activity_log", e))?;
        debug!(%user_id, searched = entry.jobs_searched, matched = entry.jobs_matched, "Search complete.");

        let profile = if matched.iter().any(|job| !job.external_application) {
            self.profiles
                .get_profile(user_id)
                .await
                .map_err(|e| StageError::new("load_profile", e))?
                .unwrap_or_else(|| UserProfile::empty(user_id))
        } else {
            UserProfile::empty(user_id)
        };
        let mut attempts: u32 = 0;

        for job in &matched {
            if attempts >= config.daily_limit {
                info!(%user_id, limit = config.daily_limit, "Daily limit reached for this cycle.");
                break;
            }

            let permit = match self.rate_limiter.acquire(user_id, &job.source).await {
                Ok(permit) => permit,
                Err(decision) => {
                    debug!(
                        %user_id,
                        job_id = %job.id,
                        platform = %job.source,
                        retry_after = ?decision.retry_after,
                        "Quota denied, skipping job."
                    );
                    continue;
                }
            };

            if job.external_application {
                drop(permit);
                self.queue
                    .add_to_queue(user_id, &job.id, &job.source)
                    .await
                    .map_err(|e| StageError::for_job("job_queue", job, e))?;
                attempts += 1;
                entry.jobs_queued += 1;
                self.ledger
                    .checkpoint(entry)
                    .await
                    .map_err(|e| StageError::new("activity_log", e))?;
                continue;
            }

            attempts += 1;
            let result = bounded(
                "job_application",
                self.settings.apply_timeout,
                self.job_application.apply(job, &profile),
            )
            .await
            .map_err(|e| StageError::for_job("job_application", job, e))?;

            if result.success {
                entry.jobs_applied += 1;
                entry.applications_successful += 1;
                info!(%user_id, job_id = %job.id, platform = %job.source, "Application submitted.");
                // The submission already happened; a failed quota write is
                // recorded but does not stop the cycle.
                if let Err(e) = permit.commit().await {
                    let failure = StageError::for_job("record_application", job, e);
                    warn!(%user_id, "Quota not recorded: {}", failure);
                    self.report_stage(user_id, &failure).await;
                    entry.errors.push(failure.to_string());
                }
            } else {
                drop(permit);
                entry.applications_failed += 1;
                warn!(
                    %user_id,
                    job_id = %job.id,
                    platform = %job.source,
                    "Application rejected: {}",
                    result.error.as_deref().unwrap_or("no reason given")
                );
            }
            if let Some(screenshot) = result.screenshot_ref {
                entry.screenshot_refs.push(screenshot);
            }
            self.ledger
                .checkpoint(entry)
                .await
                .map_err(|e| StageError::new("activity_log", e))?;
        }

        Ok(())
    }

    async fn report_stage(&self, user_id: Uuid, failure: &StageError) {
        self.report(FailureReport {
            task: failure.stage.to_string(),
            platform: failure.platform.clone(),
            error_type: failure.source.kind().to_string(),
            message: failure.source.to_string(),
            user_id: Some(user_id),
            job_id: failure.job_id.clone(),
        })
        .await;
    }

    async fn report(&self, report: FailureReport) {
        if let Err(e) = self.failure_logger.log_error(&report).await {
            warn!("Failure logger unavailable: {}", e);
        }
    }

    //-------------------------------------------------------------------------------------
    // Administration
    //-------------------------------------------------------------------------------------

    /// Creates the config if absent, otherwise patches the given fields.
    pub async fn create_or_update_config(
        &self,
        user_id: Uuid,
        update: ConfigUpdate,
    ) -> PortResult<AutoApplyConfig> {
        if update.daily_limit == Some(0) {
            return Err(PortError::InvalidInput(
                "daily_limit must be at least 1".to_string(),
            ));
        }
        if let Some(Some(min_salary)) = update.min_salary {
            if min_salary < 0 {
                return Err(PortError::InvalidInput(
                    "min_salary cannot be negative".to_string(),
                ));
            }
        }

        let now = Utc::now();
        let mut config = self
            .configs
            .get_config(user_id)
            .await?
            .unwrap_or_else(|| AutoApplyConfig::new(user_id, now));
        config.apply_update(update, now);
        self.configs.save_config(&config).await?;
        info!(%user_id, enabled = config.enabled, "Auto-apply config saved.");
        Ok(config)
    }

    pub async fn get_config(&self, user_id: Uuid) -> PortResult<AutoApplyConfig> {
        self.configs
            .get_config(user_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("No auto-apply config for user {}", user_id)))
    }

    pub async fn toggle_auto_apply(
        &self,
        user_id: Uuid,
        enabled: bool,
    ) -> PortResult<AutoApplyConfig> {
        self.create_or_update_config(
            user_id,
            ConfigUpdate {
                enabled: Some(enabled),
                ..ConfigUpdate::default()
            },
        )
        .await
    }

    pub async fn update_rate_limits(
        &self,
        user_id: Uuid,
        platform: &str,
        hourly_limit: u32,
        daily_limit: u32,
    ) -> PortResult<PlatformLimits> {
        let limits = self
            .rate_limiter
            .update_limits(user_id, platform, hourly_limit, daily_limit)
            .await?;
        info!(%user_id, platform, hourly_limit, daily_limit, "Rate limits updated.");
        Ok(limits)
    }

    pub async fn get_activity_log(
        &self,
        user_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> PortResult<Vec<ActivityLogEntry>> {
        self.ledger.history(user_id, limit, offset).await
    }

    /// Jobs waiting to be completed on an external site.
    pub async fn get_external_site_queue(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> PortResult<Vec<QueuedApplication>> {
        self.queue.get_open_jobs(user_id, limit).await
    }

    pub async fn retry_queued_application(
        &self,
        user_id: Uuid,
        job_id: &str,
    ) -> PortResult<QueuedApplication> {
        self.queue.retry_queued_application(user_id, job_id).await
    }

    pub async fn skip_queued_application(
        &self,
        user_id: Uuid,
        job_id: &str,
        reason: &str,
    ) -> PortResult<QueuedApplication> {
        self.queue
            .skip_queued_application(user_id, job_id, reason)
            .await
    }
}
