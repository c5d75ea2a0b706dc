//! Service layer for Postflow
//!
//! This module is the boundary an API server (or any other embedding
//! interface) talks to. It never waits on a platform call: publishing is
//! queued for the worker pool and its outcome arrives through the logs and
//! the event bus.
//!
//! # Architecture
//!
//! `PostflowService` is a facade over specialized sub-services that share
//! the same store:
//!
//! - `ContentService`: Content creation and the approval workflow
//! - `PublishingService`: Schedule, publish now, cancel and retry
//! - `HistoryService`: Publishing logs, queue and history views
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use libpostflow::{Config, Database, PublishingDaemon};
//! use libpostflow::events::TracingSink;
//! use libpostflow::publishers::PublisherRegistry;
//! use libpostflow::types::{Actor, ContentStatus, Role};
//! use libpostflow::workflow::TransitionRequest;
//!
//! # async fn example(content_id: uuid::Uuid, manager: uuid::Uuid) -> libpostflow::Result<()> {
//! let config = Config::load()?;
//! let store = Arc::new(Database::new(&config.database.path).await?);
//! let publishers = PublisherRegistry::new();
//! let daemon = PublishingDaemon::start(&config, store, publishers, Arc::new(TracingSink))?;
//!
//! let service = daemon.service();
//! service
//!     .content()
//!     .request_transition(
//!         content_id,
//!         TransitionRequest {
//!             actor: Actor::new(manager, Role::Manager),
//!             to_status: ContentStatus::ClientReview,
//!             comment: None,
//!             is_urgent: false,
//!         },
//!     )
//!     .await?;
//!
//! daemon.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod content;
pub mod history;
pub mod publishing;

use std::sync::Arc;

use self::content::ContentService;
use self::history::HistoryService;
use self::publishing::PublishingService;
use crate::db::Store;
use crate::dispatcher::PublishingDispatcher;
use crate::events::{EventBus, EventReceiver};
use crate::queue::DispatchQueue;
use crate::workflow::ApprovalWorkflow;

/// Main service facade that coordinates all sub-services
///
/// Cheap to clone; clones share the store, dispatcher and queue.
#[derive(Clone)]
pub struct PostflowService {
    content: ContentService,
    publishing: PublishingService,
    history: HistoryService,
    event_bus: EventBus,
}

impl PostflowService {
    /// Build the facade over a dispatcher and the queue feeding its workers
    pub fn new(
        store: Arc<dyn Store>,
        workflow: Arc<ApprovalWorkflow>,
        dispatcher: Arc<PublishingDispatcher>,
        queue: DispatchQueue,
    ) -> Self {
        let event_bus = dispatcher.events().clone();

        Self {
            content: ContentService::new(Arc::clone(&store), workflow),
            publishing: PublishingService::new(dispatcher, queue),
            history: HistoryService::new(store),
            event_bus,
        }
    }

    pub fn content(&self) -> &ContentService {
        &self.content
    }

    pub fn publishing(&self) -> &PublishingService {
        &self.publishing
    }

    pub fn history(&self) -> &HistoryService {
        &self.history
    }

    /// Subscribe to publishing and token events
    ///
    /// Returns a receiver for events emitted after this call. Multiple
    /// subscribers are supported.
    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }
}
