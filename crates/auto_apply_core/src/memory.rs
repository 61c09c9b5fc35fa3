//! crates/auto_apply_core/src/memory.rs
//!
//! A process-local implementation of every persistence port, used by tests
//! and for running the engine without a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    ActivityLogEntry, AutoApplyConfig, QueueStatus, QueuedApplication, QuotaState, UserProfile,
};
use crate::platform::PlatformLimits;
use crate::ports::{
    ActivityLogRepository, AutoApplyConfigRepository, AutoApplyJobQueueRepository, PortError,
    PortResult, ProfileRepository, RateLimitRepository,
};

type PlatformKey = (Uuid, String);

#[derive(Default)]
pub struct InMemoryStore {
    configs: Mutex<HashMap<Uuid, AutoApplyConfig>>,
    activity: Mutex<Vec<ActivityLogEntry>>,
    queue: Mutex<Vec<QueuedApplication>>,
    quotas: Mutex<HashMap<PlatformKey, QuotaState>>,
    overrides: Mutex<HashMap<PlatformKey, PlatformLimits>>,
    profiles: Mutex<HashMap<Uuid, UserProfile>>,
    writes: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating calls served so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn wrote(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    pub async fn insert_profile(&self, profile: UserProfile) {
        self.profiles.lock().await.insert(profile.user_id, profile);
    }

    pub async fn quota_state(&self, user_id: Uuid, platform: &str) -> Option<QuotaState> {
        self.quotas
            .lock()
            .await
            .get(&(user_id, platform.to_string()))
            .cloned()
    }

    pub async fn queue_items(&self) -> Vec<QueuedApplication> {
        self.queue.lock().await.clone()
    }

    pub async fn activity_entries(&self) -> Vec<ActivityLogEntry> {
        self.activity.lock().await.clone()
    }
}

#[async_trait]
impl AutoApplyConfigRepository for InMemoryStore {
    async fn get_config(&self, user_id: Uuid) -> PortResult<Option<AutoApplyConfig>> {
        Ok(self.configs.lock().await.get(&user_id).cloned())
    }

    async fn save_config(&self, config: &AutoApplyConfig) -> PortResult<()> {
        self.configs
            .lock()
            .await
            .insert(config.user_id, config.clone());
        self.wrote();
        Ok(())
    }

    async fn list_enabled_configs(&self) -> PortResult<Vec<AutoApplyConfig>> {
        let mut configs: Vec<AutoApplyConfig> = self
            .configs
            .lock()
            .await
            .values()
            .filter(|c| c.enabled)
            .cloned()
            .collect();
        configs.sort_by_key(|c| c.created_at);
        Ok(configs)
    }
}

#[async_trait]
impl ActivityLogRepository for InMemoryStore {
    async fn create_entry(&self, entry: &ActivityLogEntry) -> PortResult<()> {
        self.activity.lock().await.push(entry.clone());
        self.wrote();
        Ok(())
    }

    async fn update_entry(&self, entry: &ActivityLogEntry) -> PortResult<()> {
        let mut activity = self.activity.lock().await;
        let slot = activity
            .iter_mut()
            .find(|e| e.id == entry.id)
            .ok_or_else(|| PortError::NotFound(format!("Activity entry {} not found", entry.id)))?;
        *slot = entry.clone();
        self.wrote();
        Ok(())
    }

    async fn list_entries(
        &self,
        user_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> PortResult<Vec<ActivityLogEntry>> {
        let mut entries: Vec<ActivityLogEntry> = self
            .activity
            .lock()
            .await
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.cycle_start.cmp(&a.cycle_start));
        Ok(entries.into_iter().skip(offset).take(limit).collect())
    }
}

#[async_trait]
impl AutoApplyJobQueueRepository for InMemoryStore {
    async fn insert_item(&self, item: &QueuedApplication) -> PortResult<()> {
        self.queue.lock().await.push(item.clone());
        self.wrote();
        Ok(())
    }

    async fn get_item(&self, id: Uuid) -> PortResult<Option<QueuedApplication>> {
        Ok(self.queue.lock().await.iter().find(|i| i.id == id).cloned())
    }

    async fn latest_item_for_job(
        &self,
        user_id: Uuid,
        job_id: &str,
    ) -> PortResult<Option<QueuedApplication>> {
        Ok(self
            .queue
            .lock()
            .await
            .iter()
            .filter(|i| i.user_id == user_id && i.job_id == job_id)
            .max_by_key(|i| i.queued_at)
            .cloned())
    }

    async fn list_items(
        &self,
        user_id: Uuid,
        statuses: &[QueueStatus],
        limit: usize,
    ) -> PortResult<Vec<QueuedApplication>> {
        let mut items: Vec<QueuedApplication> = self
            .queue
            .lock()
            .await
            .iter()
            .filter(|i| i.user_id == user_id)
            .filter(|i| statuses.is_empty() || statuses.contains(&i.status))
            .cloned()
            .collect();
        items.sort_by_key(|i| i.queued_at);
        items.truncate(limit);
        Ok(items)
    }

    async fn update_item(&self, item: &QueuedApplication) -> PortResult<()> {
        let mut queue = self.queue.lock().await;
        let slot = queue
            .iter_mut()
            .find(|i| i.id == item.id)
            .ok_or_else(|| PortError::NotFound(format!("Queue item {} not found", item.id)))?;
        *slot = item.clone();
        self.wrote();
        Ok(())
    }
}

#[async_trait]
impl RateLimitRepository for InMemoryStore {
    async fn get_quota_state(
        &self,
        user_id: Uuid,
        platform: &str,
    ) -> PortResult<Option<QuotaState>> {
        Ok(self.quota_state(user_id, platform).await)
    }

    async fn save_quota_state(&self, state: &QuotaState) -> PortResult<()> {
        self.quotas
            .lock()
            .await
            .insert((state.user_id, state.platform.clone()), state.clone());
        self.wrote();
        Ok(())
    }

    async fn get_limit_override(
        &self,
        user_id: Uuid,
        platform: &str,
    ) -> PortResult<Option<PlatformLimits>> {
        Ok(self
            .overrides
            .lock()
            .await
            .get(&(user_id, platform.to_string()))
            .copied())
    }

    async fn save_limit_override(
        &self,
        user_id: Uuid,
        platform: &str,
        limits: PlatformLimits,
    ) -> PortResult<()> {
        self.overrides
            .lock()
            .await
            .insert((user_id, platform.to_string()), limits);
        self.wrote();
        Ok(())
    }
}

#[async_trait]
impl ProfileRepository for InMemoryStore {
    async fn get_profile(&self, user_id: Uuid) -> PortResult<Option<UserProfile>> {
        Ok(self.profiles.lock().await.get(&user_id).cloned())
    }
}
