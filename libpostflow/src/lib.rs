//! Postflow - content approval and multi-platform publishing engine
//!
//! This library moves content through a role-gated review workflow and
//! publishes approved content to external platforms, guarding every
//! platform call with a rate limiter, a circuit breaker and a retry policy.

pub mod config;
pub mod daemon;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod logging;
pub mod publishers;
pub mod queue;
pub mod resilience;
pub mod scheduler;
pub mod scheduling;
pub mod service;
pub mod types;
pub mod workflow;

// Re-export commonly used types
pub use config::Config;
pub use daemon::PublishingDaemon;
pub use db::{Database, HistoryFilter, Store};
pub use dispatcher::{ExecuteOutcome, PublishingDispatcher};
pub use error::{PlatformError, PostflowError, Result};
pub use events::{Event, EventBus, NotificationSink};
pub use publishers::{Publisher, PublisherRegistry};
pub use service::PostflowService;
pub use types::{
    Actor, ApprovalRecord, ContentItem, ContentStatus, ContentType, NewContent, PlatformAccount,
    PlatformPostRef, PublishingLog, PublishingStatus, Role,
};
pub use workflow::{ApprovalWorkflow, TransitionRequest};
