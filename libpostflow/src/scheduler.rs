//! Periodic housekeeping: due-work scan and token refresh
//!
//! The scan only enqueues [`DispatchJob::Claim`] jobs; the worker pool does
//! the publishing. Enqueueing a log twice is harmless because the claim in
//! the dispatcher is atomic.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::SchedulingConfig;
use crate::db::Store;
use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::publishers::PublisherRegistry;
use crate::queue::{DispatchJob, DispatchQueue};
use crate::types::PlatformAccount;

/// Outcome of one token refresh pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub checked: usize,
    pub refreshed: usize,
    pub failed: usize,
}

pub struct Scheduler {
    store: Arc<dyn Store>,
    queue: DispatchQueue,
    publishers: PublisherRegistry,
    events: EventBus,
    poll_interval: Duration,
    refresh_interval: Duration,
    refresh_window: ChronoDuration,
}

impl Scheduler {
    pub fn new(
        config: &SchedulingConfig,
        store: Arc<dyn Store>,
        queue: DispatchQueue,
        publishers: PublisherRegistry,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            queue,
            publishers,
            events,
            poll_interval: non_zero(config.poll_interval()),
            refresh_interval: non_zero(config.token_refresh_interval()),
            refresh_window: config.token_refresh_window(),
        }
    }

    /// Enqueue every pending log due at `now`, returning how many were queued
    pub async fn scan_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.store.due_logs(now).await?;
        if due.is_empty() {
            return Ok(0);
        }

        info!("Found {} publishing log(s) due", due.len());
        for log in &due {
            self.queue.enqueue(DispatchJob::Claim(log.id)).await?;
        }
        Ok(due.len())
    }

    /// Refresh tokens that expire within the refresh window of `now`
    ///
    /// A failed refresh never disconnects the account; it is logged and
    /// reported as a `token_refresh_failed` event.
    pub async fn refresh_expiring_tokens(&self, now: DateTime<Utc>) -> Result<RefreshReport> {
        let accounts = self
            .store
            .accounts_expiring_before(now + self.refresh_window)
            .await?;

        let mut report = RefreshReport {
            checked: accounts.len(),
            ..RefreshReport::default()
        };

        for account in accounts {
            match self.refresh_account(&account).await {
                Ok(()) => {
                    info!(account_id = %account.id, platform = %account.platform, "Token refreshed");
                    report.refreshed += 1;
                }
                Err(reason) => {
                    error!(
                        account_id = %account.id,
                        platform = %account.platform,
                        "Token refresh failed: {}",
                        reason
                    );
                    self.events.emit(Event::TokenRefreshFailed {
                        account_id: account.id,
                        platform: account.platform.clone(),
                        error: reason,
                    });
                    report.failed += 1;
                }
            }
        }

        if report.checked > 0 {
            info!(
                checked = report.checked,
                refreshed = report.refreshed,
                failed = report.failed,
                "Token refresh pass complete"
            );
        }
        Ok(report)
    }

    async fn refresh_account(&self, account: &PlatformAccount) -> std::result::Result<(), String> {
        let publisher = self.publishers.get(&account.platform).ok_or_else(|| {
            format!("no publisher registered for platform '{}'", account.platform)
        })?;

        let token = publisher
            .refresh_token(account)
            .await
            .map_err(|e| e.to_string())?;

        self.store
            .update_account_token(account.id, &token)
            .await
            .map_err(|e| format!("could not store refreshed token: {}", e))
    }

    /// Run both passes on their intervals until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut scan = interval(self.poll_interval);
        scan.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut refresh = interval(self.refresh_interval);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            refresh_interval_secs = self.refresh_interval.as_secs(),
            "Scheduler started"
        );

        loop {
            let tick = tokio::select! {
                _ = scan.tick() => Tick::Scan,
                _ = refresh.tick() => Tick::Refresh,
                changed = shutdown.changed() => match changed {
                    Ok(()) => Tick::Signal,
                    Err(_) => Tick::Stop,
                },
            };

            match tick {
                Tick::Scan => {
                    if let Err(e) = self.scan_once(Utc::now()).await {
                        error!("Error scanning for due publishing: {}", e);
                    }
                }
                Tick::Refresh => {
                    if let Err(e) = self.refresh_expiring_tokens(Utc::now()).await {
                        error!("Error refreshing platform tokens: {}", e);
                    }
                }
                Tick::Signal if !*shutdown.borrow() => debug!("Ignoring spurious wakeup"),
                Tick::Signal | Tick::Stop => break,
            }
        }

        info!("Scheduler stopped");
    }
}

enum Tick {
    Scan,
    Refresh,
    Signal,
    Stop,
}

fn non_zero(duration: Duration) -> Duration {
    if duration.is_zero() {
        warn!("Zero scheduler interval configured, using 1s");
        Duration::from_secs(1)
    } else {
        duration
    }
}
