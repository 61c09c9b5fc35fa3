//! crates/auto_apply_core/src/rate_limiter.rs
//!
//! Per-user, per-platform quota tracking.
//!
//! Counters live in a single store (the `RateLimitRepository`); there is no
//! separate cache tier to keep in sync. Every read-modify-write for a
//! `(user_id, platform)` key happens while holding that key's async mutex, so
//! concurrent attempts for the same key serialize.
//!
//! The per-key mutexes live in a table sharded by user. A shard lock is only
//! taken for a map lookup and is never held across an `.await`; the only lock
//! held across storage I/O is the key's own mutex, so cycles for different
//! users never wait on each other.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::QuotaState;
use crate::platform::{Platform, PlatformLimits, RateLimitConfig};
use crate::ports::{PortError, PortResult, RateLimitRepository};

/// How long a fail-closed denial asks the caller to back off.
const TRACKER_BACKOFF_MINUTES: i64 = 5;

const LOCK_SHARDS: usize = 16;

//=========================================================================================
// Decisions and status snapshots
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    HourlyLimit,
    DailyLimit,
    BurstFloor,
    TrackerUnavailable,
}

/// Result of a quota check. A denial is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    pub retry_after: Option<DateTime<Utc>>,
    pub reason: Option<DenyReason>,
}

impl RateDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            retry_after: None,
            reason: None,
        }
    }

    pub fn deny(retry_after: DateTime<Utc>, reason: DenyReason) -> Self {
        Self {
            allowed: false,
            retry_after: Some(retry_after),
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateState {
    Active,
    Blocked,
}

/// Read-only view of one key's quota usage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateStatus {
    pub platform: Platform,
    pub hourly_used: u32,
    pub hourly_limit: u32,
    pub hourly_remaining: u32,
    pub hourly_percentage: f64,
    pub daily_used: u32,
    pub daily_limit: u32,
    pub daily_remaining: u32,
    pub daily_percentage: f64,
    pub status: RateState,
    pub retry_after: Option<DateTime<Utc>>,
}

//=========================================================================================
// Window arithmetic
//=========================================================================================

fn floor_to(now: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
    let ts = now.timestamp();
    Utc.timestamp_opt(ts - ts.rem_euclid(secs), 0)
        .single()
        .unwrap_or(now)
}

/// Start of the clock hour containing `now`.
pub fn hour_start(now: DateTime<Utc>) -> DateTime<Utc> {
    floor_to(now, 3_600)
}

/// Start of the UTC day containing `now`.
pub fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    floor_to(now, 86_400)
}

pub fn next_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    hour_start(now) + Duration::hours(1)
}

pub fn next_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    day_start(now) + Duration::days(1)
}

fn fresh_state(user_id: Uuid, platform: Platform, now: DateTime<Utc>) -> QuotaState {
    QuotaState {
        user_id,
        platform: platform.as_str().to_string(),
        hourly_count: 0,
        daily_count: 0,
        last_reset: day_start(now),
        hour_started: hour_start(now),
        last_application: None,
    }
}

/// Zeroes counters whose window has passed. Returns whether anything changed.
/// Rolling twice at the same instant is a no-op the second time.
fn roll_windows(state: &mut QuotaState, now: DateTime<Utc>) -> bool {
    let mut changed = false;

    let today = day_start(now);
    if state.last_reset < today {
        state.hourly_count = 0;
        state.daily_count = 0;
        state.last_reset = today;
        changed = true;
    }

    let this_hour = hour_start(now);
    if state.hour_started < this_hour {
        state.hourly_count = 0;
        state.hour_started = this_hour;
        changed = true;
    }

    changed
}

/// Applies the hourly cap, the daily cap and the burst floor, in that order.
/// `state` must already be rolled to `now`.
fn evaluate(state: &QuotaState, limits: PlatformLimits, now: DateTime<Utc>) -> RateDecision {
    if state.hourly_count >= limits.hourly {
        return RateDecision::deny(next_hour(now), DenyReason::HourlyLimit);
    }
    if state.daily_count >= limits.daily {
        return RateDecision::deny(next_midnight(now), DenyReason::DailyLimit);
    }

    // Once the hour's headroom drops under the floor, spread the remaining
    // attempts evenly between the last application and the end of the hour.
    let remaining = limits.hourly - state.hourly_count;
    if remaining < limits.burst_floor {
        if let Some(last) = state.last_application {
            if last >= state.hour_started {
                let hour_end = state.hour_started + Duration::hours(1);
                let slot = last + (hour_end - last) / (remaining as i32 + 1);
                if now < slot {
                    return RateDecision::deny(slot, DenyReason::BurstFloor);
                }
            }
        }
    }

    RateDecision::allow()
}

fn percentage(used: u32, limit: u32) -> f64 {
    if limit == 0 {
        return 100.0;
    }
    (f64::from(used) * 100.0 / f64::from(limit)).min(100.0)
}

//=========================================================================================
// The tracker
//=========================================================================================

type QuotaKey = (Uuid, Platform);
type LockShard = SyncMutex<HashMap<QuotaKey, Arc<Mutex<()>>>>;

/// Quota tracker shared by every concurrent cycle.
pub struct RateLimiter {
    repo: Arc<dyn RateLimitRepository>,
    config: RateLimitConfig,
    locks: Vec<LockShard>,
    consecutive_errors: AtomicU32,
}

impl RateLimiter {
    pub fn new(repo: Arc<dyn RateLimitRepository>, config: RateLimitConfig) -> Self {
        Self {
            repo,
            config,
            locks: (0..LOCK_SHARDS)
                .map(|_| SyncMutex::new(HashMap::new()))
                .collect(),
            consecutive_errors: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn shard(&self, user_id: Uuid) -> &LockShard {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        &self.locks[(hasher.finish() as usize) % self.locks.len()]
    }

    async fn lock_key(&self, user_id: Uuid, platform: Platform) -> OwnedMutexGuard<()> {
        // The shard guard is dropped before the await below.
        let key_lock = self
            .shard(user_id)
            .lock()
            .entry((user_id, platform))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        key_lock.lock_owned().await
    }

    /// Drops lock-table entries nobody is holding.
    pub fn prune_idle_locks(&self) -> usize {
        self.locks
            .iter()
            .map(|shard| {
                let mut locks = shard.lock();
                let before = locks.len();
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
                before - locks.len()
            })
            .sum()
    }

    async fn limits_for(&self, user_id: Uuid, platform: Platform) -> PortResult<PlatformLimits> {
        let limits = self
            .repo
            .get_limit_override(user_id, platform.as_str())
            .await?
            .unwrap_or_else(|| self.config.limits(platform));
        Ok(limits)
    }

    /// Check under an already-held key lock. Persists a window rollover.
    async fn check_locked(
        &self,
        user_id: Uuid,
        platform: Platform,
        now: DateTime<Utc>,
    ) -> PortResult<RateDecision> {
        let limits = self.limits_for(user_id, platform).await?;
        let state = match self.repo.get_quota_state(user_id, platform.as_str()).await? {
            Some(mut state) => {
                if roll_windows(&mut state, now) {
                    debug!(%user_id, %platform, "quota window rolled over");
                    self.repo.save_quota_state(&state).await?;
                }
                state
            }
            None => fresh_state(user_id, platform, now),
        };
        Ok(evaluate(&state, limits, now))
    }

    /// Increment under an already-held key lock.
    async fn record_locked(
        &self,
        user_id: Uuid,
        platform: Platform,
        now: DateTime<Utc>,
    ) -> PortResult<QuotaState> {
        let state = match self.repo.get_quota_state(user_id, platform.as_str()).await? {
            Some(mut state) => {
                roll_windows(&mut state, now);
                state.hourly_count += 1;
                state.daily_count += 1;
                state.last_application = Some(now);
                state
            }
            None => QuotaState {
                hourly_count: 1,
                daily_count: 1,
                last_application: Some(now),
                ..fresh_state(user_id, platform, now)
            },
        };
        self.repo.save_quota_state(&state).await?;
        Ok(state)
    }

    fn tracker_failed(&self, user_id: Uuid, platform: Platform, err: &PortError) -> RateDecision {
        let failures = self.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;
        match self.config.fail_closed_after {
            Some(threshold) if failures >= threshold => {
                warn!(%user_id, %platform, failures, "quota tracker unavailable, denying: {}", err);
                RateDecision::deny(
                    Utc::now() + Duration::minutes(TRACKER_BACKOFF_MINUTES),
                    DenyReason::TrackerUnavailable,
                )
            }
            _ => {
                warn!(%user_id, %platform, failures, "quota check failed, allowing: {}", err);
                RateDecision::allow()
            }
        }
    }

    fn tracker_ok(&self) {
        self.consecutive_errors.store(0, Ordering::Relaxed);
    }

    /// Checks whether `user_id` may apply on `platform` right now.
    pub async fn can_apply(&self, user_id: Uuid, platform: &str) -> RateDecision {
        self.can_apply_at(user_id, platform, Utc::now()).await
    }

    /// `can_apply` evaluated at an explicit instant.
    pub async fn can_apply_at(
        &self,
        user_id: Uuid,
        platform: &str,
        now: DateTime<Utc>,
    ) -> RateDecision {
        let Some(platform) = Platform::from_source(platform) else {
            debug!(%user_id, platform, "untracked platform, allowing");
            return RateDecision::allow();
        };
        let _guard = self.lock_key(user_id, platform).await;
        match self.check_locked(user_id, platform, now).await {
            Ok(decision) => {
                self.tracker_ok();
                decision
            }
            Err(e) => self.tracker_failed(user_id, platform, &e),
        }
    }

    /// Counts one application against both windows. Unknown platforms are a no-op.
    pub async fn record_application(&self, user_id: Uuid, platform: &str) -> PortResult<()> {
        self.record_application_at(user_id, platform, Utc::now()).await
    }

    pub async fn record_application_at(
        &self,
        user_id: Uuid,
        platform: &str,
        now: DateTime<Utc>,
    ) -> PortResult<()> {
        let Some(platform) = Platform::from_source(platform) else {
            return Ok(());
        };
        let _guard = self.lock_key(user_id, platform).await;
        self.record_locked(user_id, platform, now).await?;
        Ok(())
    }

    /// Checks the quota and, if allowed, keeps the key locked until the
    /// returned permit is committed or dropped. No other attempt for the same
    /// key can pass a check in between.
    pub async fn acquire(&self, user_id: Uuid, platform: &str) -> Result<QuotaPermit<'_>, RateDecision> {
        let Some(platform) = Platform::from_source(platform) else {
            return Ok(QuotaPermit {
                limiter: self,
                user_id,
                tracked: None,
            });
        };
        let guard = self.lock_key(user_id, platform).await;
        let decision = match self.check_locked(user_id, platform, Utc::now()).await {
            Ok(decision) => {
                self.tracker_ok();
                decision
            }
            Err(e) => self.tracker_failed(user_id, platform, &e),
        };
        if !decision.allowed {
            return Err(decision);
        }
        Ok(QuotaPermit {
            limiter: self,
            user_id,
            tracked: Some((platform, guard)),
        })
    }

    /// Usage snapshot. Never writes, not even a window rollover.
    pub async fn get_rate_status(&self, user_id: Uuid, platform: &str) -> PortResult<RateStatus> {
        self.get_rate_status_at(user_id, platform, Utc::now()).await
    }

    pub async fn get_rate_status_at(
        &self,
        user_id: Uuid,
        platform: &str,
        now: DateTime<Utc>,
    ) -> PortResult<RateStatus> {
        let platform: Platform = platform.parse()?;
        let limits = self.limits_for(user_id, platform).await?;
        let mut state = self
            .repo
            .get_quota_state(user_id, platform.as_str())
            .await?
            .unwrap_or_else(|| fresh_state(user_id, platform, now));
        roll_windows(&mut state, now);
        let decision = evaluate(&state, limits, now);

        Ok(RateStatus {
            platform,
            hourly_used: state.hourly_count,
            hourly_limit: limits.hourly,
            hourly_remaining: limits.hourly.saturating_sub(state.hourly_count),
            hourly_percentage: percentage(state.hourly_count, limits.hourly),
            daily_used: state.daily_count,
            daily_limit: limits.daily,
            daily_remaining: limits.daily.saturating_sub(state.daily_count),
            daily_percentage: percentage(state.daily_count, limits.daily),
            status: if decision.allowed {
                RateState::Active
            } else {
                RateState::Blocked
            },
            retry_after: decision.retry_after,
        })
    }

    /// Stores a per-user override of the platform defaults. The burst floor
    /// keeps the platform default.
    pub async fn update_limits(
        &self,
        user_id: Uuid,
        platform: &str,
        hourly: u32,
        daily: u32,
    ) -> PortResult<PlatformLimits> {
        let platform: Platform = platform.parse()?;
        let limits = PlatformLimits {
            hourly,
            daily,
            burst_floor: self.config.limits(platform).burst_floor,
        };
        limits.validate()?;

        let _guard = self.lock_key(user_id, platform).await;
        self.repo
            .save_limit_override(user_id, platform.as_str(), limits)
            .await?;
        Ok(limits)
    }
}

/// A granted quota check that still holds its key lock.
pub struct QuotaPermit<'a> {
    limiter: &'a RateLimiter,
    user_id: Uuid,
    tracked: Option<(Platform, OwnedMutexGuard<()>)>,
}

impl QuotaPermit<'_> {
    /// Records the application, then releases the key lock.
    pub async fn commit(self) -> PortResult<()> {
        if let Some((platform, _guard)) = &self.tracked {
            self.limiter
                .record_locked(self.user_id, *platform, Utc::now())
                .await?;
        }
        Ok(())
    }
}
