//! Platform publisher abstraction
//!
//! Concrete clients (Instagram, Facebook, YouTube, ...) live outside this
//! crate and implement [`Publisher`]. The dispatcher looks them up by the
//! platform name stored on each [`PlatformAccount`].
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use libpostflow::publishers::{PublisherRegistry, mock::MockPublisher};
//!
//! let mut registry = PublisherRegistry::new();
//! registry.register(Arc::new(MockPublisher::success("instagram")));
//! assert!(registry.get("instagram").is_some());
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{PlatformError, Result};
use crate::types::{ContentItem, PlatformAccount, PlatformPostRef, RefreshedToken};

// Mock publisher is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Uniform "publish one content item to one account" capability
///
/// Errors must be classifiable: return `PlatformError::Network`,
/// `PlatformError::Timeout`, `PlatformError::RateLimit` or
/// `PlatformError::Http` with the upstream status for anything worth
/// retrying, and `Validation`/`Authentication`/`Posting` for the rest.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Lowercase platform identifier (e.g. "instagram", "youtube")
    fn platform(&self) -> &str;

    /// Publish the content to the account and report where it landed
    async fn publish(
        &self,
        content: &ContentItem,
        account: &PlatformAccount,
    ) -> Result<PlatformPostRef>;

    /// Exchange the account's refresh credentials for a new access token
    async fn refresh_token(&self, account: &PlatformAccount) -> Result<RefreshedToken> {
        Err(PlatformError::NotImplemented(format!(
            "token refresh for {} (account {})",
            self.platform(),
            account.account_name
        ))
        .into())
    }
}

/// Publishers keyed by platform name
#[derive(Clone, Default)]
pub struct PublisherRegistry {
    publishers: HashMap<String, Arc<dyn Publisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a publisher under its own platform name, replacing any previous one
    pub fn register(&mut self, publisher: Arc<dyn Publisher>) {
        self.publishers
            .insert(publisher.platform().to_string(), publisher);
    }

    pub fn with(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.register(publisher);
        self
    }

    pub fn get(&self, platform: &str) -> Option<Arc<dyn Publisher>> {
        self.publishers.get(platform).cloned()
    }

    /// Registered platform names, sorted
    pub fn platforms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.publishers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}
