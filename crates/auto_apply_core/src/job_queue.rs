//! crates/auto_apply_core/src/job_queue.rs
//!
//! Backlog of matched jobs that need out-of-band completion.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{QueueStatus, QueuedApplication};
use crate::ports::{AutoApplyJobQueueRepository, PortError, PortResult};

pub struct JobQueue {
    repo: Arc<dyn AutoApplyJobQueueRepository>,
}

impl JobQueue {
    pub fn new(repo: Arc<dyn AutoApplyJobQueueRepository>) -> Self {
        Self { repo }
    }

    /// Queues a job. If the same job is already waiting (`queued` or `retry`),
    /// the existing row is returned instead of a duplicate.
    pub async fn add_to_queue(
        &self,
        user_id: Uuid,
        job_id: &str,
        platform: &str,
    ) -> PortResult<QueuedApplication> {
        if let Some(existing) = self.repo.latest_item_for_job(user_id, job_id).await? {
            if existing.status.is_open() {
                debug!(%user_id, job_id, "job already queued");
                return Ok(existing);
            }
        }

        let item = QueuedApplication {
            id: Uuid::new_v4(),
            user_id,
            job_id: job_id.to_string(),
            platform: platform.to_string(),
            status: QueueStatus::Queued,
            queued_at: Utc::now(),
            processed_at: None,
            error_message: None,
        };
        self.repo.insert_item(&item).await?;
        info!(%user_id, job_id, platform, "queued job for external completion");
        Ok(item)
    }

    /// Oldest first. `None` returns every status.
    pub async fn get_queued_jobs(
        &self,
        user_id: Uuid,
        status: Option<QueueStatus>,
        limit: usize,
    ) -> PortResult<Vec<QueuedApplication>> {
        let statuses: Vec<QueueStatus> = status.into_iter().collect();
        self.repo.list_items(user_id, &statuses, limit).await
    }

    /// Items still waiting on the user: `queued` and `retry`.
    pub async fn get_open_jobs(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> PortResult<Vec<QueuedApplication>> {
        self.repo
            .list_items(user_id, &[QueueStatus::Queued, QueueStatus::Retry], limit)
            .await
    }

    /// Moves an item to `retry` or `skipped`. Asking for the status an item
    /// already has is a no-op.
    pub async fn update_status(
        &self,
        queue_id: Uuid,
        new_status: QueueStatus,
    ) -> PortResult<QueuedApplication> {
        self.transition(queue_id, new_status, None).await
    }

    async fn transition(
        &self,
        queue_id: Uuid,
        new_status: QueueStatus,
        reason: Option<String>,
    ) -> PortResult<QueuedApplication> {
        if !matches!(new_status, QueueStatus::Retry | QueueStatus::Skipped) {
            return Err(PortError::InvalidInput(format!(
                "cannot move a queued application to '{}'",
                new_status
            )));
        }

        let mut item = self
            .repo
            .get_item(queue_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Queue item {} not found", queue_id)))?;

        if item.status == new_status {
            debug!(%queue_id, status = %new_status, "queue item already in requested status");
            return Ok(item);
        }
        if item.status == QueueStatus::Processed {
            return Err(PortError::InvalidInput(format!(
                "queue item {} was already processed",
                queue_id
            )));
        }

        item.status = new_status;
        item.error_message = match new_status {
            QueueStatus::Skipped => reason,
            _ => None,
        };
        self.repo.update_item(&item).await?;
        info!(%queue_id, status = %new_status, "queue item updated");
        Ok(item)
    }

    async fn latest_for_job(&self, user_id: Uuid, job_id: &str) -> PortResult<QueuedApplication> {
        self.repo
            .latest_item_for_job(user_id, job_id)
            .await?
            .ok_or_else(|| {
                PortError::NotFound(format!("No queued application for job {}", job_id))
            })
    }

    pub async fn retry_queued_application(
        &self,
        user_id: Uuid,
        job_id: &str,
    ) -> PortResult<QueuedApplication> {
        let item = self.latest_for_job(user_id, job_id).await?;
        self.transition(item.id, QueueStatus::Retry, None).await
    }

    pub async fn skip_queued_application(
        &self,
        user_id: Uuid,
        job_id: &str,
        reason: &str,
    ) -> PortResult<QueuedApplication> {
        let item = self.latest_for_job(user_id, job_id).await?;
        self.transition(item.id, QueueStatus::Skipped, Some(reason.to_string()))
            .await
    }

    /// Called by whoever completed the application out of band.
    pub async fn mark_processed(
        &self,
        queue_id: Uuid,
        error: Option<String>,
    ) -> PortResult<QueuedApplication> {
        let mut item = self
            .repo
            .get_item(queue_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Queue item {} not found", queue_id)))?;
        if item.status == QueueStatus::Processed {
            return Ok(item);
        }

        item.status = QueueStatus::Processed;
        item.processed_at = Some(Utc::now());
        item.error_message = error;
        self.repo.update_item(&item).await?;
        Ok(item)
    }
}
