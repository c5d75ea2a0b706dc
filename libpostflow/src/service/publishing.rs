//! Scheduling, immediate publishing, cancellation and retries
//!
//! Nothing here waits for a platform: immediate work is handed to the worker
//! pool through the [`DispatchQueue`] and observed through the logs or the
//! `publish_result` events.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::dispatcher::PublishingDispatcher;
use crate::error::Result;
use crate::queue::{DispatchJob, DispatchQueue};
use crate::scheduling::parse_schedule;
use crate::types::PublishingLog;

#[derive(Clone)]
pub struct PublishingService {
    dispatcher: Arc<PublishingDispatcher>,
    queue: DispatchQueue,
}

impl PublishingService {
    pub fn new(dispatcher: Arc<PublishingDispatcher>, queue: DispatchQueue) -> Self {
        Self { dispatcher, queue }
    }

    /// Create pending logs for approved content; the scheduler picks them up
    /// once `scheduled_at` has passed
    ///
    /// # Errors
    ///
    /// Returns `NotApproved` unless the content is `approved`.
    pub async fn schedule(
        &self,
        content_id: Uuid,
        account_ids: &[Uuid],
        scheduled_at: DateTime<Utc>,
    ) -> Result<Vec<PublishingLog>> {
        self.dispatcher
            .schedule(content_id, account_ids, Some(scheduled_at))
            .await
    }

    /// Like [`schedule`](Self::schedule), taking a human-readable time such
    /// as "2h" or "2025-11-20 15:00"
    pub async fn schedule_at(
        &self,
        content_id: Uuid,
        account_ids: &[Uuid],
        when: &str,
    ) -> Result<Vec<PublishingLog>> {
        let scheduled_at = parse_schedule(when, Utc::now())?;
        self.schedule(content_id, account_ids, scheduled_at).await
    }

    /// Create logs due now and queue them for the workers straight away
    pub async fn publish_now(
        &self,
        content_id: Uuid,
        account_ids: &[Uuid],
    ) -> Result<Vec<PublishingLog>> {
        let logs = self.dispatcher.schedule(content_id, account_ids, None).await?;
        for log in &logs {
            self.queue.enqueue(DispatchJob::Claim(log.id)).await?;
        }

        info!(content_id = %content_id, logs = logs.len(), "Publish now requested");
        Ok(logs)
    }

    /// Cancel a log that no worker has claimed yet
    pub async fn cancel(&self, log_id: Uuid) -> Result<PublishingLog> {
        self.dispatcher.cancel(log_id).await
    }

    /// Re-attempt a failed log
    ///
    /// The returned log is already `publishing`; the attempt itself runs on
    /// the worker pool. If the pool no longer accepts work the log goes back
    /// to `failed` so it can be retried later.
    pub async fn retry(&self, log_id: Uuid) -> Result<PublishingLog> {
        let log = self.dispatcher.retry(log_id).await?;
        if let Err(e) = self.queue.enqueue(DispatchJob::Resume(log.id)).await {
            self.dispatcher
                .release_retry(log.id, &format!("Retry not dispatched: {}", e))
                .await?;
            return Err(e);
        }
        Ok(log)
    }
}
