//! Scenario tests for the cycle orchestrator.
//!
//! Collaborators are stubbed; persistence is the in-memory store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use auto_apply_core::memory::InMemoryStore;
use auto_apply_core::{
    ActivityLogEntry, ActivityLogRepository, ApplicationResult, AutoApplyService, ConfigUpdate,
    CycleStatus, EnginePorts, FailureLogger, FailureReport, Job, JobApplicationService,
    JobSearchService, OrchestratorSettings, PlatformLimits, PortError, PortResult, QueueStatus,
    QuotaState, RateLimitConfig, RateLimitRepository, SearchCriteria, UserProfile,
};
use tokio::sync::Mutex;
use uuid::Uuid;

// =============================================================================
// Stub collaborators
// =============================================================================

/// Returns canned jobs keyed by the first search keyword.
/// The keyword `explode` fails, `stall` never answers in time.
#[derive(Default)]
struct StubSearch {
    results: HashMap<String, Vec<Job>>,
}

#[async_trait]
impl JobSearchService for StubSearch {
    async fn search(&self, criteria: &SearchCriteria) -> PortResult<Vec<Job>> {
        let keyword = criteria.keywords.first().cloned().unwrap_or_default();
        match keyword.as_str() {
            "explode" => Err(PortError::Unexpected("search backend returned 502".to_string())),
            "stall" => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Vec::new())
            }
            _ => Ok(self.results.get(&keyword).cloned().unwrap_or_default()),
        }
    }
}

/// Succeeds unless the job id says otherwise.
#[derive(Default)]
struct StubApplier {
    applied: Mutex<Vec<String>>,
}

impl StubApplier {
    async fn applied(&self) -> Vec<String> {
        self.applied.lock().await.clone()
    }
}

#[async_trait]
impl JobApplicationService for StubApplier {
    async fn apply(&self, job: &Job, _profile: &UserProfile) -> PortResult<ApplicationResult> {
        self.applied.lock().await.push(job.id.clone());
        if job.id.starts_with("reject") {
            return Ok(ApplicationResult::rejected("form validation failed"));
        }
        if job.id.starts_with("boom") {
            return Err(PortError::Unexpected("browser crashed".to_string()));
        }
        if job.id.starts_with("panic") {
            panic!("apply blew up");
        }
        if job.id.starts_with("slow") {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        Ok(ApplicationResult {
            success: true,
            error: None,
            screenshot_ref: Some(format!("screens/{}.png", job.id)),
        })
    }
}

#[derive(Default)]
struct RecordingFailureLogger {
    reports: Mutex<Vec<FailureReport>>,
}

#[async_trait]
impl FailureLogger for RecordingFailureLogger {
    async fn log_error(&self, report: &FailureReport) -> PortResult<()> {
        self.reports.lock().await.push(report.clone());
        Ok(())
    }
}

/// Quota reads go to the store; every counter write fails.
struct FailingQuotaWrites(Arc<InMemoryStore>);

#[async_trait]
impl RateLimitRepository for FailingQuotaWrites {
    async fn get_quota_state(&self, user_id: Uuid, platform: &str) -> PortResult<Option<QuotaState>> {
        self.0.get_quota_state(user_id, platform).await
    }
    async fn save_quota_state(&self, _state: &QuotaState) -> PortResult<()> {
        Err(PortError::Unexpected("disk full".to_string()))
    }
    async fn get_limit_override(
        &self,
        user_id: Uuid,
        platform: &str,
    ) -> PortResult<Option<PlatformLimits>> {
        self.0.get_limit_override(user_id, platform).await
    }
    async fn save_limit_override(
        &self,
        user_id: Uuid,
        platform: &str,
        limits: PlatformLimits,
    ) -> PortResult<()> {
        self.0.save_limit_override(user_id, platform, limits).await
    }
}

/// Accepts checkpoints but refuses to store a finished entry.
struct UnclosableLedger {
    store: Arc<InMemoryStore>,
    close_attempts: AtomicUsize,
}

#[async_trait]
impl ActivityLogRepository for UnclosableLedger {
    async fn create_entry(&self, entry: &ActivityLogEntry) -> PortResult<()> {
        self.store.create_entry(entry).await
    }
    async fn update_entry(&self, entry: &ActivityLogEntry) -> PortResult<()> {
        if entry.cycle_end.is_some() {
            self.close_attempts.fetch_add(1, Ordering::SeqCst);
            return Err(PortError::Unexpected("connection reset".to_string()));
        }
        self.store.update_entry(entry).await
    }
    async fn list_entries(
        &self,
        user_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> PortResult<Vec<ActivityLogEntry>> {
        self.store.list_entries(user_id, limit, offset).await
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    service: AutoApplyService,
    store: Arc<InMemoryStore>,
    applier: Arc<StubApplier>,
    failures: Arc<RecordingFailureLogger>,
}

fn harness(search: StubSearch) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    harness_with(search, store.clone(), store.clone(), store)
}

fn harness_with(
    search: StubSearch,
    store: Arc<InMemoryStore>,
    activity: Arc<dyn ActivityLogRepository>,
    rate_limits: Arc<dyn RateLimitRepository>,
) -> Harness {
    let applier = Arc::new(StubApplier::default());
    let failures = Arc::new(RecordingFailureLogger::default());
    let ports = EnginePorts {
        configs: store.clone(),
        activity,
        queue: store.clone(),
        rate_limits,
        profiles: store.clone(),
        job_search: Arc::new(search),
        job_application: applier.clone(),
        failure_logger: failures.clone(),
    };
    let settings = OrchestratorSettings {
        search_timeout: Duration::from_millis(100),
        apply_timeout: Duration::from_millis(100),
        max_concurrent_cycles: 4,
        search_result_limit: 50,
    };
    Harness {
        service: AutoApplyService::new(ports, RateLimitConfig::default(), settings),
        store,
        applier,
        failures,
    }
}

fn job(id: &str, source: &str, external: bool) -> Job {
    Job {
        id: id.to_string(),
        source: source.to_string(),
        title: format!("Rust Engineer ({})", id),
        company: Some("Acme".to_string()),
        location: Some("Remote".to_string()),
        salary: None,
        external_application: external,
    }
}

async fn enable(service: &AutoApplyService, user: Uuid, keyword: &str, daily_limit: u32) {
    service
        .create_or_update_config(
            user,
            ConfigUpdate {
                enabled: Some(true),
                keywords: Some(vec![keyword.to_string()]),
                locations: Some(vec!["Remote".to_string()]),
                daily_limit: Some(daily_limit),
                ..ConfigUpdate::default()
            },
        )
        .await
        .expect("config saved");
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_external_job_is_queued_without_apply_or_quota() {
    let mut search = StubSearch::default();
    search.results.insert(
        "rust".to_string(),
        vec![job("ext-1", "indeed", true), job("direct-1", "indeed", false)],
    );
    let h = harness(search);
    let user = Uuid::new_v4();
    enable(&h.service, user, "rust", 10).await;

    let summary = h.service.run_cycle().await;
    assert_eq!(summary.configs_processed, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.jobs_queued, 1);
    assert_eq!(summary.jobs_applied, 1);

    assert_eq!(h.applier.applied().await, vec!["direct-1".to_string()]);

    let queue = h.service.get_external_site_queue(user, 10).await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].job_id, "ext-1");
    assert_eq!(queue[0].status, QueueStatus::Queued);

    // Only the direct submission counted against the quota.
    let status = h.service.rate_limiter().get_rate_status(user, "indeed").await.unwrap();
    assert_eq!(status.hourly_used, 1);
}

#[tokio::test]
async fn test_search_failure_does_not_affect_other_users() {
    let mut search = StubSearch::default();
    search
        .results
        .insert("rust".to_string(), vec![job("direct-1", "linkedin", false)]);
    let h = harness(search);
    let (user_a, user_b) = (Uuid::new_v4(), Uuid::new_v4());
    enable(&h.service, user_a, "explode", 10).await;
    enable(&h.service, user_b, "rust", 10).await;

    let summary = h.service.run_cycle().await;
    assert_eq!(summary.configs_processed, 2);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);

    let a_log = h.service.get_activity_log(user_a, 10, 0).await.unwrap();
    assert_eq!(a_log.len(), 1);
    assert_eq!(a_log[0].cycle_status, CycleStatus::Failed);
    assert!(!a_log[0].errors.is_empty());
    assert!(a_log[0].errors[0].contains("job_search"));
    assert!(a_log[0].cycle_end.is_some());

    let b_log = h.service.get_activity_log(user_b, 10, 0).await.unwrap();
    assert_eq!(b_log[0].cycle_status, CycleStatus::Completed);
    assert_eq!(b_log[0].jobs_applied, 1);
    assert!(b_log[0].errors.is_empty());
    assert_eq!(a_log[0].cycle_id, b_log[0].cycle_id);

    let reports = h.failures.reports.lock().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].task, "job_search");
    assert_eq!(reports[0].user_id, Some(user_a));
}

#[tokio::test]
async fn test_quota_denials_skip_jobs_without_errors() {
    let mut search = StubSearch::default();
    let jobs = (0..8)
        .map(|i| job(&format!("li-{}", i), "linkedin", false))
        .collect();
    search.results.insert("rust".to_string(), jobs);
    let h = harness(search);
    let user = Uuid::new_v4();
    enable(&h.service, user, "rust", 20).await;

    h.service.run_cycle().await;

    let entry = &h.service.get_activity_log(user, 1, 0).await.unwrap()[0];
    // LinkedIn allows 5 per hour; the rest are denied and skipped.
    assert_eq!(entry.cycle_status, CycleStatus::Completed);
    assert_eq!(entry.jobs_searched, 8);
    assert_eq!(entry.jobs_applied, 5);
    assert_eq!(entry.applications_successful, 5);
    assert_eq!(entry.applications_failed, 0);
    assert!(entry.errors.is_empty());
    assert_eq!(h.applier.applied().await.len(), 5);
    assert_eq!(entry.screenshot_refs.len(), 5);
}

#[tokio::test]
async fn test_daily_limit_caps_attempts_per_cycle() {
    let mut search = StubSearch::default();
    let jobs = (0..6)
        .map(|i| job(&format!("in-{}", i), "indeed", false))
        .collect();
    search.results.insert("rust".to_string(), jobs);
    let h = harness(search);
    let user = Uuid::new_v4();
    enable(&h.service, user, "rust", 2).await;

    h.service.run_cycle().await;

    assert_eq!(h.applier.applied().await, vec!["in-0".to_string(), "in-1".to_string()]);
}

#[tokio::test]
async fn test_rejected_application_is_counted_not_charged() {
    let mut search = StubSearch::default();
    search.results.insert(
        "rust".to_string(),
        vec![job("reject-1", "glassdoor", false), job("ok-1", "glassdoor", false)],
    );
    let h = harness(search);
    let user = Uuid::new_v4();
    enable(&h.service, user, "rust", 10).await;

    h.service.run_cycle().await;

    let entry = &h.service.get_activity_log(user, 1, 0).await.unwrap()[0];
    assert_eq!(entry.cycle_status, CycleStatus::Completed);
    assert_eq!(entry.applications_failed, 1);
    assert_eq!(entry.applications_successful, 1);
    assert_eq!(entry.jobs_applied, 1);
    assert!(h.failures.reports.lock().await.is_empty());

    let state = h.store.quota_state(user, "glassdoor").await.unwrap();
    assert_eq!(state.hourly_count, 1);
}

#[tokio::test]
async fn test_apply_error_fails_only_that_cycle() {
    let mut search = StubSearch::default();
    search.results.insert(
        "rust".to_string(),
        vec![job("ok-1", "indeed", false), job("boom-1", "indeed", false), job("ok-2", "indeed", false)],
    );
    search
        .results
        .insert("go".to_string(), vec![job("ok-3", "email", false)]);
    let h = harness(search);
    let (user_a, user_b) = (Uuid::new_v4(), Uuid::new_v4());
    enable(&h.service, user_a, "rust", 10).await;
    enable(&h.service, user_b, "go", 10).await;

    let summary = h.service.run_cycle().await;
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.completed, 1);

    let entry = &h.service.get_activity_log(user_a, 1, 0).await.unwrap()[0];
    assert_eq!(entry.cycle_status, CycleStatus::Failed);
    assert_eq!(entry.jobs_applied, 1, "the job before the failure still counts");
    assert!(entry.errors[0].contains("job_application"));

    let reports = h.failures.reports.lock().await;
    assert_eq!(reports[0].job_id.as_deref(), Some("boom-1"));
    assert_eq!(reports[0].platform.as_deref(), Some("indeed"));
}

#[tokio::test]
async fn test_quota_write_failure_keeps_submitted_applications() {
    let mut search = StubSearch::default();
    let jobs = (0..3)
        .map(|i| job(&format!("in-{}", i), "indeed", false))
        .collect();
    search.results.insert("rust".to_string(), jobs);
    let store = Arc::new(InMemoryStore::new());
    let quotas = Arc::new(FailingQuotaWrites(store.clone()));
    let h = harness_with(search, store.clone(), store, quotas);
    let user = Uuid::new_v4();
    enable(&h.service, user, "rust", 10).await;

    let summary = h.service.run_cycle().await;
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.jobs_applied, 3);

    assert_eq!(h.applier.applied().await.len(), 3);
    let entry = &h.service.get_activity_log(user, 1, 0).await.unwrap()[0];
    assert_eq!(entry.cycle_status, CycleStatus::Completed);
    assert_eq!(entry.jobs_applied, 3);
    assert_eq!(entry.applications_successful, 3);
    assert_eq!(entry.errors.len(), 3);
    assert!(entry.errors.iter().all(|e| e.contains("record_application")));

    let reports = h.failures.reports.lock().await;
    assert_eq!(reports.len(), 3);
    assert_eq!(reports[0].task, "record_application");
    assert_eq!(reports[0].job_id.as_deref(), Some("in-0"));
    assert!(h.store.quota_state(user, "indeed").await.is_none());
}

#[tokio::test]
async fn test_unfinalized_ledger_entry_counts_as_failed() {
    let store = Arc::new(InMemoryStore::new());
    let ledger = Arc::new(UnclosableLedger {
        store: store.clone(),
        close_attempts: AtomicUsize::new(0),
    });
    let h = harness_with(StubSearch::default(), store.clone(), ledger.clone(), store);
    let user = Uuid::new_v4();
    enable(&h.service, user, "quiet", 10).await;

    let summary = h.service.run_cycle().await;
    assert_eq!(summary.configs_processed, 1);
    assert_eq!(summary.completed, 0);
    assert_eq!(summary.failed, 1);

    // One retry, then give up.
    assert_eq!(ledger.close_attempts.load(Ordering::SeqCst), 2);
    let stored = h.store.activity_entries().await;
    assert_eq!(stored[0].cycle_status, CycleStatus::Running);

    let reports = h.failures.reports.lock().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].task, "activity_log");
}

#[tokio::test]
async fn test_timeouts_are_failures() {
    let mut search = StubSearch::default();
    search
        .results
        .insert("rust".to_string(), vec![job("slow-1", "linkedin", false)]);
    let h = harness(search);
    let (user_a, user_b) = (Uuid::new_v4(), Uuid::new_v4());
    enable(&h.service, user_a, "stall", 10).await;
    enable(&h.service, user_b, "rust", 10).await;

    let summary = h.service.run_cycle().await;
    assert_eq!(summary.failed, 2);

    for user in [user_a, user_b] {
        let entry = &h.service.get_activity_log(user, 1, 0).await.unwrap()[0];
        assert_eq!(entry.cycle_status, CycleStatus::Failed);
        assert!(entry.errors[0].contains("Timed out"));
    }
    // A timed-out submission never consumes quota.
    assert!(h.store.quota_state(user_b, "linkedin").await.is_none());
}

#[tokio::test]
async fn test_panicking_collaborator_is_contained() {
    let mut search = StubSearch::default();
    search
        .results
        .insert("rust".to_string(), vec![job("panic-1", "indeed", false)]);
    search
        .results
        .insert("go".to_string(), vec![job("ok-1", "indeed", false)]);
    let h = harness(search);
    let (user_a, user_b) = (Uuid::new_v4(), Uuid::new_v4());
    enable(&h.service, user_a, "rust", 10).await;
    enable(&h.service, user_b, "go", 10).await;

    let summary = h.service.run_cycle().await;
    assert_eq!(summary.configs_processed, 2);
    assert_eq!(summary.failed, 1);

    let entry = &h.service.get_activity_log(user_a, 1, 0).await.unwrap()[0];
    assert_eq!(entry.cycle_status, CycleStatus::Failed);
    assert!(entry.errors[0].contains("apply blew up"));
    assert!(entry.cycle_end.is_some());
}

#[tokio::test]
async fn test_salary_floor_filters_matches() {
    let mut rich = job("rich", "indeed", false);
    rich.salary = Some(150_000);
    let mut poor = job("poor", "indeed", false);
    poor.salary = Some(40_000);
    let unknown = job("unknown", "indeed", false);

    let mut search = StubSearch::default();
    search
        .results
        .insert("rust".to_string(), vec![rich, poor, unknown]);
    let h = harness(search);
    let user = Uuid::new_v4();
    enable(&h.service, user, "rust", 10).await;
    h.service
        .create_or_update_config(
            user,
            ConfigUpdate {
                min_salary: Some(Some(100_000)),
                ..ConfigUpdate::default()
            },
        )
        .await
        .unwrap();

    h.service.run_cycle().await;

    let entry = &h.service.get_activity_log(user, 1, 0).await.unwrap()[0];
    assert_eq!(entry.jobs_searched, 3);
    assert_eq!(entry.jobs_matched, 2);
    assert_eq!(h.applier.applied().await, vec!["rich".to_string(), "unknown".to_string()]);
}

#[tokio::test]
async fn test_disabled_configs_are_not_processed() {
    let mut search = StubSearch::default();
    search
        .results
        .insert("rust".to_string(), vec![job("ok-1", "indeed", false)]);
    let h = harness(search);
    let user = Uuid::new_v4();
    enable(&h.service, user, "rust", 10).await;
    h.service.toggle_auto_apply(user, false).await.unwrap();

    let summary = h.service.run_cycle().await;
    assert_eq!(summary.configs_processed, 0);
    assert!(h.applier.applied().await.is_empty());
    assert!(h.store.activity_entries().await.is_empty());
}

#[tokio::test]
async fn test_skip_queued_application_through_service() {
    let mut search = StubSearch::default();
    search
        .results
        .insert("rust".to_string(), vec![job("ext-9", "linkedin", true)]);
    let h = harness(search);
    let user = Uuid::new_v4();
    enable(&h.service, user, "rust", 10).await;
    h.service.run_cycle().await;

    let skipped = h
        .service
        .skip_queued_application(user, "ext-9", "duplicate")
        .await
        .unwrap();
    assert_eq!(skipped.status, QueueStatus::Skipped);

    let writes = h.store.write_count();
    let again = h
        .service
        .skip_queued_application(user, "ext-9", "duplicate")
        .await
        .unwrap();
    assert_eq!(again.status, QueueStatus::Skipped);
    assert_eq!(h.store.write_count(), writes);
    assert!(h.service.get_external_site_queue(user, 10).await.unwrap().is_empty());

    // Running again re-queues the job since nothing is open for it any more.
    h.service.run_cycle().await;
    let open = h.service.get_external_site_queue(user, 10).await.unwrap();
    assert_eq!(open.len(), 1);
    let retried = h.service.retry_queued_application(user, "ext-9").await.unwrap();
    assert_eq!(retried.status, QueueStatus::Retry);
}

// =============================================================================
// Administration
// =============================================================================

#[tokio::test]
async fn test_config_upsert_and_validation() {
    let h = harness(StubSearch::default());
    let user = Uuid::new_v4();

    assert!(matches!(
        h.service.get_config(user).await,
        Err(PortError::NotFound(_))
    ));

    let created = h
        .service
        .create_or_update_config(
            user,
            ConfigUpdate {
                keywords: Some(vec!["rust".to_string()]),
                ..ConfigUpdate::default()
            },
        )
        .await
        .unwrap();
    assert!(!created.enabled);
    assert_eq!(created.daily_limit, 10);

    let patched = h
        .service
        .create_or_update_config(
            user,
            ConfigUpdate {
                daily_limit: Some(3),
                ..ConfigUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(patched.keywords, vec!["rust".to_string()]);
    assert_eq!(patched.daily_limit, 3);
    assert_eq!(patched.created_at, created.created_at);

    let toggled = h.service.toggle_auto_apply(user, true).await.unwrap();
    assert!(toggled.enabled);
    assert_eq!(h.service.get_config(user).await.unwrap(), toggled);

    let bad = h
        .service
        .create_or_update_config(
            user,
            ConfigUpdate {
                daily_limit: Some(0),
                ..ConfigUpdate::default()
            },
        )
        .await;
    assert!(matches!(bad, Err(PortError::InvalidInput(_))));
}

#[tokio::test]
async fn test_update_rate_limits_applies_to_next_cycle() {
    let mut search = StubSearch::default();
    let jobs = (0..5)
        .map(|i| job(&format!("li-{}", i), "linkedin", false))
        .collect();
    search.results.insert("rust".to_string(), jobs);
    let h = harness(search);
    let user = Uuid::new_v4();
    enable(&h.service, user, "rust", 10).await;

    h.service
        .update_rate_limits(user, "linkedin", 2, 20)
        .await
        .unwrap();
    assert!(h.service.update_rate_limits(user, "linkedin", 30, 20).await.is_err());

    h.service.run_cycle().await;
    assert_eq!(h.applier.applied().await.len(), 2);

    let status = h.service.rate_limiter().get_rate_status(user, "linkedin").await.unwrap();
    assert_eq!(status.hourly_limit, 2);
    assert_eq!(status.daily_limit, 20);
    assert_eq!(status.hourly_remaining, 0);
}

#[tokio::test]
async fn test_activity_log_is_paged_newest_first() {
    let h = harness(StubSearch::default());
    let user = Uuid::new_v4();
    enable(&h.service, user, "nothing", 10).await;

    let mut cycle_ids = Vec::new();
    for _ in 0..3 {
        cycle_ids.push(h.service.run_cycle().await.cycle_id);
    }

    let page = h.service.get_activity_log(user, 2, 0).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].cycle_id, cycle_ids[2]);
    assert_eq!(page[1].cycle_id, cycle_ids[1]);

    let rest = h.service.get_activity_log(user, 2, 2).await.unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].cycle_id, cycle_ids[0]);
}
