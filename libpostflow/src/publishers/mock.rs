//! Mock publisher implementation for testing
//!
//! A configurable publisher that can simulate successes, scripted failure
//! sequences and network latency. It is designed for integration tests of
//! the dispatcher and scheduler without real platform credentials or network
//! access.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

use crate::error::{PlatformError, Result};
use crate::publishers::Publisher;
use crate::types::{ContentItem, PlatformAccount, PlatformPostRef, RefreshedToken};

/// What a single mocked call does
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Succeed,
    Fail(PlatformError),
}

#[derive(Debug, Default)]
struct MockState {
    /// Consumed front to back before `fallback` applies
    script: VecDeque<MockOutcome>,
    publish_calls: usize,
    refresh_calls: usize,
    published: Vec<(Uuid, Uuid)>,
}

/// Mock publisher for testing
///
/// Clones share call counters and the remaining script.
#[derive(Debug, Clone)]
pub struct MockPublisher {
    platform: String,
    fallback: MockOutcome,
    refresh: MockOutcome,
    delay: Duration,
    state: Arc<Mutex<MockState>>,
}

impl MockPublisher {
    fn new(platform: &str, fallback: MockOutcome) -> Self {
        Self {
            platform: platform.to_string(),
            fallback,
            refresh: MockOutcome::Fail(PlatformError::NotImplemented(format!(
                "mock token refresh for {}",
                platform
            ))),
            delay: Duration::from_millis(0),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Create a mock publisher that always succeeds
    pub fn success(platform: &str) -> Self {
        Self::new(platform, MockOutcome::Succeed)
    }

    /// Create a mock publisher that always fails with `error`
    pub fn failing(platform: &str, error: PlatformError) -> Self {
        Self::new(platform, MockOutcome::Fail(error))
    }

    /// Play `outcomes` in order, then fall back to success
    pub fn scripted(platform: &str, outcomes: Vec<MockOutcome>) -> Self {
        let publisher = Self::success(platform);
        publisher.lock().script = outcomes.into();
        publisher
    }

    /// Simulate network latency before every publish
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make `refresh_token` succeed or fail as given
    pub fn with_refresh(mut self, outcome: MockOutcome) -> Self {
        self.refresh = outcome;
        self
    }

    /// Get the number of times publish was called
    pub fn publish_call_count(&self) -> usize {
        self.lock().publish_calls
    }

    /// Get the number of times refresh_token was called
    pub fn refresh_call_count(&self) -> usize {
        self.lock().refresh_calls
    }

    /// `(content_id, account_id)` pairs that were published successfully
    pub fn published(&self) -> Vec<(Uuid, Uuid)> {
        self.lock().published.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn publish(
        &self,
        content: &ContentItem,
        account: &PlatformAccount,
    ) -> Result<PlatformPostRef> {
        let (outcome, call) = {
            let mut state = self.lock();
            state.publish_calls += 1;
            let outcome = state
                .script
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone());
            (outcome, state.publish_calls)
        };

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        match outcome {
            MockOutcome::Succeed => {
                self.lock().published.push((content.id, account.id));
                let post_id = format!("{}-{}", self.platform, call);
                Ok(PlatformPostRef {
                    post_url: Some(format!("https://{}.example/p/{}", self.platform, post_id)),
                    post_id,
                })
            }
            MockOutcome::Fail(error) => Err(error.into()),
        }
    }

    async fn refresh_token(&self, account: &PlatformAccount) -> Result<RefreshedToken> {
        self.lock().refresh_calls += 1;

        match &self.refresh {
            MockOutcome::Succeed => Ok(RefreshedToken {
                access_token: format!("{}-refreshed", account.account_name),
                refresh_token: account.refresh_token.clone(),
                expires_at: Some(Utc::now() + ChronoDuration::days(60)),
            }),
            MockOutcome::Fail(error) => Err(error.clone().into()),
        }
    }
}
