//! crates/auto_apply_core/src/activity.rs
//!
//! The per-user activity ledger written by the orchestrator.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::ActivityLogEntry;
use crate::ports::{ActivityLogRepository, PortResult};

/// Upper bound on a single page of activity history.
pub const MAX_ACTIVITY_PAGE: usize = 100;

pub struct ActivityLedger {
    repo: Arc<dyn ActivityLogRepository>,
}

impl ActivityLedger {
    pub fn new(repo: Arc<dyn ActivityLogRepository>) -> Self {
        Self { repo }
    }

    /// Persists a freshly started (`running`) entry.
    pub async fn open(&self, entry: &ActivityLogEntry) -> PortResult<()> {
        self.repo.create_entry(entry).await
    }

    /// Persists intermediate counters while the cycle is still running.
    pub async fn checkpoint(&self, entry: &ActivityLogEntry) -> PortResult<()> {
        self.repo.update_entry(entry).await
    }

    /// Persists the final state. Called exactly once per entry.
    pub async fn close(&self, entry: &ActivityLogEntry) -> PortResult<()> {
        debug_assert!(entry.cycle_end.is_some());
        self.repo.update_entry(entry).await
    }

    /// Newest first.
    pub async fn history(
        &self,
        user_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> PortResult<Vec<ActivityLogEntry>> {
        self.repo
            .list_entries(user_id, limit.min(MAX_ACTIVITY_PAGE), offset)
            .await
    }
}
