//! Publishing dispatcher
//!
//! Turns approved content into one publishing log per target account and
//! drives each log through its platform's [`Publisher`]:
//!
//! ```text
//! pending --claim--> publishing --> success
//!    |                    |
//!    v                    v
//! cancelled             failed --retry--> publishing
//! ```
//!
//! Every state change a second worker could race on is a conditional update
//! in the [`Store`], so a log is published by at most one worker at a time.
//! Publish failures never escape [`PublishingDispatcher::execute`]: they end
//! up in the log's `error_message` and in a `publish_result` event.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db::Store;
use crate::error::{PlatformError, PostflowError, Result};
use crate::events::{Event, EventBus};
use crate::publishers::{Publisher, PublisherRegistry};
use crate::resilience::{CircuitBreakerRegistry, RateLimiter, RetryPolicy};
use crate::types::{
    ContentItem, ContentStatus, PlatformAccount, PlatformPostRef, PublishingLog, PublishingStatus,
};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// What happened to a log handed to the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteOutcome {
    Published(PlatformPostRef),
    Failed(String),
    /// The log was not in a state this call may act on (already claimed,
    /// finished or cancelled)
    Skipped(PublishingStatus),
}

pub struct PublishingDispatcher {
    store: Arc<dyn Store>,
    publishers: PublisherRegistry,
    rate_limiter: Arc<RateLimiter>,
    breakers: Arc<CircuitBreakerRegistry>,
    retry: RetryPolicy,
    call_timeout: Duration,
    events: EventBus,
}

impl PublishingDispatcher {
    /// Dispatcher with default resilience settings
    pub fn new(store: Arc<dyn Store>, publishers: PublisherRegistry, events: EventBus) -> Self {
        Self::from_config(&Config::default(), store, publishers, events)
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn Store>,
        publishers: PublisherRegistry,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            publishers,
            rate_limiter: Arc::new(RateLimiter::from_config(&config.rate_limits)),
            breakers: Arc::new(CircuitBreakerRegistry::from_config(&config.resilience)),
            retry: RetryPolicy::from_config(&config.resilience),
            call_timeout: config.resilience.call_timeout(),
            events,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn with_breakers(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = breakers;
        self
    }

    /// Upper bound on one platform call; zero falls back to 30s
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = if call_timeout.is_zero() {
            DEFAULT_CALL_TIMEOUT
        } else {
            call_timeout
        };
        self
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Create one pending log per account for approved content
    ///
    /// `scheduled_at = None` means "as soon as possible".
    ///
    /// # Errors
    ///
    /// - `NotFound` if the content does not exist
    /// - `NotApproved` unless the content is `approved`
    /// - `InvalidInput` for an empty or duplicated account list
    pub async fn schedule(
        &self,
        content_id: Uuid,
        account_ids: &[Uuid],
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<Vec<PublishingLog>> {
        let content = self
            .store
            .get_content(content_id)
            .await?
            .ok_or_else(|| PostflowError::NotFound(format!("content {}", content_id)))?;

        if content.status != ContentStatus::Approved {
            return Err(PostflowError::NotApproved {
                content_id,
                status: content.status,
            });
        }

        if account_ids.is_empty() {
            return Err(PostflowError::InvalidInput(
                "at least one platform account is required".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = account_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(PostflowError::InvalidInput(format!(
                "platform account {} listed more than once",
                duplicate
            )));
        }

        let scheduled_at = scheduled_at.unwrap_or_else(Utc::now);
        let logs: Vec<PublishingLog> = account_ids
            .iter()
            .map(|account_id| PublishingLog::pending(content_id, *account_id, Some(scheduled_at)))
            .collect();

        self.store.insert_logs(&logs).await?;

        info!(
            content_id = %content_id,
            logs = logs.len(),
            scheduled_at = %scheduled_at,
            "Scheduled publishing"
        );
        Ok(logs)
    }

    /// Claim a pending log and publish it
    ///
    /// A log that is not `pending` (or that another worker claims first) is
    /// left alone and reported as `Skipped`. Publish failures are recorded
    /// on the log and returned as `Failed`, not as `Err`.
    pub async fn execute(&self, log_id: Uuid) -> Result<ExecuteOutcome> {
        let log = self.load_log(log_id).await?;
        if log.status != PublishingStatus::Pending {
            debug!(log_id = %log_id, status = %log.status, "Log not pending, skipping");
            return Ok(ExecuteOutcome::Skipped(log.status));
        }

        if !self.store.claim_log(log_id).await? {
            info!(log_id = %log_id, "Log claimed by another worker, skipping");
            let current = self.load_log(log_id).await?;
            return Ok(ExecuteOutcome::Skipped(current.status));
        }

        self.run_claimed(log).await
    }

    /// Publish a log that a retry already moved to `publishing`
    pub async fn execute_claimed(&self, log_id: Uuid) -> Result<ExecuteOutcome> {
        let log = self.load_log(log_id).await?;
        if log.status != PublishingStatus::Publishing {
            debug!(log_id = %log_id, status = %log.status, "Log not publishing, skipping");
            return Ok(ExecuteOutcome::Skipped(log.status));
        }
        self.run_claimed(log).await
    }

    /// Cancel a log that has not been claimed yet
    pub async fn cancel(&self, log_id: Uuid) -> Result<PublishingLog> {
        let log = self.load_log(log_id).await?;
        if log.status != PublishingStatus::Pending || !self.store.cancel_log(log_id).await? {
            let current = self.load_log(log_id).await?;
            return Err(PostflowError::InvalidState(format!(
                "only pending publishing can be cancelled (log {} is {})",
                log_id, current.status
            )));
        }

        info!(log_id = %log_id, "Publishing cancelled");
        self.load_log(log_id).await
    }

    /// Move a failed log back to `publishing`, counting one retry
    ///
    /// The returned log is claimed for the caller; hand it to
    /// [`execute_claimed`](Self::execute_claimed) (usually through the work
    /// queue) to make the attempt.
    pub async fn retry(&self, log_id: Uuid) -> Result<PublishingLog> {
        let log = self.load_log(log_id).await?;
        if log.status != PublishingStatus::Failed || !self.store.claim_retry(log_id).await? {
            let current = self.load_log(log_id).await?;
            return Err(PostflowError::InvalidState(format!(
                "only failed publishing can be retried (log {} is {})",
                log_id, current.status
            )));
        }

        let claimed = self.load_log(log_id).await?;
        info!(log_id = %log_id, retry_count = claimed.retry_count, "Publishing retry requested");
        Ok(claimed)
    }

    /// Hand a retry claim back when no worker will run it
    ///
    /// The log returns to `failed` with `reason` as its error and the retry
    /// that [`retry`](Self::retry) counted is given back.
    pub async fn release_retry(&self, log_id: Uuid, reason: &str) -> Result<()> {
        if self.store.release_retry(log_id, reason).await? {
            warn!(log_id = %log_id, detail = %reason, "Retry released back to failed");
        } else {
            warn!(log_id = %log_id, "Retry claim already moved on, nothing to release");
        }
        Ok(())
    }

    async fn load_log(&self, log_id: Uuid) -> Result<PublishingLog> {
        self.store
            .get_log(log_id)
            .await?
            .ok_or_else(|| PostflowError::NotFound(format!("publishing log {}", log_id)))
    }

    async fn run_claimed(&self, log: PublishingLog) -> Result<ExecuteOutcome> {
        // The log is already claimed, so a store error here must still fail it
        let resolved = match self.resolve(&log).await {
            Ok(resolved) => resolved,
            Err(e) => Err(format!("Could not load publishing inputs: {}", e)),
        };
        let (content, account, publisher) = match resolved {
            Ok(resolved) => resolved,
            Err(reason) => {
                error!(log_id = %log.id, "Cannot publish: {}", reason);
                self.store.complete_log_failure(log.id, &reason, 0).await?;
                return Ok(ExecuteOutcome::Failed(reason));
            }
        };

        let platform = account.platform.clone();
        let label = format!("{} (log {})", platform, log.id);

        let outcome = self
            .retry
            .run(&label, |_| self.attempt(publisher.as_ref(), &content, &account))
            .await;
        let retries_used = outcome.retries_used();

        match outcome.result {
            Ok(post) => {
                let now = Utc::now();
                if !self.store.complete_log_success(log.id, &post, now).await? {
                    let current = self.load_log(log.id).await?;
                    warn!(
                        log_id = %log.id,
                        status = %current.status,
                        post_id = %post.post_id,
                        "Log left publishing state before success was recorded"
                    );
                    return Ok(ExecuteOutcome::Skipped(current.status));
                }
                self.store.mark_content_published(content.id, now).await?;

                info!(
                    log_id = %log.id,
                    content_id = %content.id,
                    platform = %platform,
                    post_id = %post.post_id,
                    "Published"
                );
                self.events.emit(Event::PublishResult {
                    recipient: content.created_by,
                    content_id: content.id,
                    log_id: log.id,
                    platform,
                    success: true,
                    message: post.post_url.clone().unwrap_or_else(|| post.post_id.clone()),
                });
                Ok(ExecuteOutcome::Published(post))
            }
            Err(e) => {
                let message = e.to_string();
                if matches!(e, PostflowError::Platform(PlatformError::CircuitOpen(_))) {
                    warn!(log_id = %log.id, platform = %platform, "Publish short-circuited: circuit open");
                } else {
                    error!(
                        log_id = %log.id,
                        platform = %platform,
                        retries_used,
                        "Publish failed: {}",
                        message
                    );
                }

                if !self
                    .store
                    .complete_log_failure(log.id, &message, retries_used)
                    .await?
                {
                    warn!(log_id = %log.id, "Log left publishing state before failure was recorded");
                }
                self.events.emit(Event::PublishResult {
                    recipient: content.created_by,
                    content_id: content.id,
                    log_id: log.id,
                    platform,
                    success: false,
                    message: message.clone(),
                });
                Ok(ExecuteOutcome::Failed(message))
            }
        }
    }

    /// Load everything an attempt needs. The inner `Err` is a reason to fail
    /// the log without contacting the platform.
    async fn resolve(
        &self,
        log: &PublishingLog,
    ) -> Result<std::result::Result<(ContentItem, PlatformAccount, Arc<dyn Publisher>), String>>
    {
        let content = self.store.get_content(log.content_id).await?;
        let account = self.store.get_account(log.platform_account_id).await?;

        let (content, account) = match (content, account) {
            (Some(content), Some(account)) => (content, account),
            (None, _) => return Ok(Err(format!("Content {} not found", log.content_id))),
            (_, None) => {
                return Ok(Err(format!(
                    "Platform account {} not found",
                    log.platform_account_id
                )))
            }
        };

        // Sibling logs may already have published the content
        if !matches!(
            content.status,
            ContentStatus::Approved | ContentStatus::Published
        ) {
            return Ok(Err(PostflowError::NotApproved {
                content_id: content.id,
                status: content.status,
            }
            .to_string()));
        }

        if !account.is_connected {
            return Ok(Err(format!(
                "Platform account {} ({}) is disconnected",
                account.account_name, account.platform
            )));
        }

        let publisher = match self.publishers.get(&account.platform) {
            Some(publisher) => publisher,
            None => {
                return Ok(Err(format!(
                    "No publisher registered for platform '{}'",
                    account.platform
                )))
            }
        };

        Ok(Ok((content, account, publisher)))
    }

    /// One rate-limited, circuit-guarded, time-bounded platform call
    async fn attempt(
        &self,
        publisher: &dyn Publisher,
        content: &ContentItem,
        account: &PlatformAccount,
    ) -> Result<PlatformPostRef> {
        let platform = account.platform.as_str();

        if !self.rate_limiter.check(platform) {
            return Err(PlatformError::RateLimit(format!(
                "local budget for {} exhausted ({}/hour)",
                platform,
                self.rate_limiter.limit_for(platform)
            ))
            .into());
        }

        let breaker = self.breakers.get(platform);
        breaker
            .call(|| async {
                self.rate_limiter.record(platform);
                match tokio::time::timeout(self.call_timeout, publisher.publish(content, account))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(PlatformError::Timeout(format!(
                        "{} did not answer within {:?}",
                        platform, self.call_timeout
                    ))
                    .into()),
                }
            })
            .await
    }
}
