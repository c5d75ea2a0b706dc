//! Event bus and notification delivery
//!
//! The dispatcher and scheduler emit [`Event`]s onto an in-process
//! [`EventBus`] built on `tokio::sync::broadcast`. Emitting never blocks and
//! never fails: with no subscriber the event is simply dropped.
//!
//! Delivery to the outside world (websocket fan-out, mail, chat, ...) happens
//! in a separate consumer task started by [`spawn_delivery`], which hands
//! each event to a [`NotificationSink`]. Sink errors are logged and
//! swallowed, so a broken notification channel can never change a publish
//! outcome.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use libpostflow::events::{spawn_delivery, EventBus, TracingSink};
//!
//! # async fn example() {
//! let bus = EventBus::new(100);
//! let delivery = spawn_delivery(&bus, Arc::new(TracingSink));
//! // ... run the dispatcher ...
//! delivery.stop().await;
//! # }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;

/// Event receiver type alias
pub type EventReceiver = broadcast::Receiver<Event>;

/// Event bus for distributing workflow events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus with the specified capacity
    ///
    /// The capacity determines how many events can be buffered per subscriber
    /// before older events are dropped (if the subscriber is lagging).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: Event) {
        // send() returns Err if no receivers exist, which is fine
        let _ = self.sender.send(event);
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Events emitted by the publishing engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Outcome of one publishing log, addressed to the content's creator
    PublishResult {
        recipient: Uuid,
        content_id: Uuid,
        log_id: Uuid,
        platform: String,
        success: bool,
        /// Post URL (or id) on success, error text on failure
        message: String,
    },

    /// A platform token could not be refreshed before expiry
    TokenRefreshFailed {
        account_id: Uuid,
        platform: String,
        error: String,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::PublishResult { .. } => "publish_result",
            Event::TokenRefreshFailed { .. } => "token_refresh_failed",
        }
    }
}

/// Fire-and-forget destination for events
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, event: &Event) -> Result<()>;
}

/// Sink that only writes events to the log
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn deliver(&self, event: &Event) -> Result<()> {
        match event {
            Event::PublishResult {
                recipient,
                log_id,
                platform,
                success,
                message,
                ..
            } => info!(
                %recipient,
                %log_id,
                platform = %platform,
                success,
                detail = %message,
                "publish_result notification"
            ),
            Event::TokenRefreshFailed {
                account_id,
                platform,
                error,
            } => warn!(
                %account_id,
                platform = %platform,
                error = %error,
                "token_refresh_failed notification"
            ),
        }
        Ok(())
    }
}

/// Running notification consumer
pub struct DeliveryTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl DeliveryTask {
    /// Deliver whatever is already queued, then end the task
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            warn!("Notification delivery task ended abnormally: {}", e);
        }
    }
}

/// Start a task that forwards bus events to `sink`
pub fn spawn_delivery(bus: &EventBus, sink: Arc<dyn NotificationSink>) -> DeliveryTask {
    let mut receiver = bus.subscribe();
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                received = receiver.recv() => Next::Received(received),
                changed = stop_rx.changed() => match changed {
                    Ok(()) => Next::StopChanged,
                    // A dropped stop handle counts as a stop request
                    Err(_) => Next::Stop,
                },
            };

            match next {
                Next::Received(Ok(event)) => deliver(sink.as_ref(), &event).await,
                Next::Received(Err(RecvError::Lagged(skipped))) => {
                    warn!(skipped, "Notification consumer lagged, events dropped");
                }
                Next::Received(Err(RecvError::Closed)) => break,
                Next::StopChanged if !*stop_rx.borrow() => {}
                Next::StopChanged | Next::Stop => {
                    drain(&mut receiver, sink.as_ref()).await;
                    break;
                }
            }
        }
        debug!("Notification delivery stopped");
    });

    DeliveryTask {
        stop: stop_tx,
        handle,
    }
}

enum Next {
    Received(std::result::Result<Event, RecvError>),
    StopChanged,
    Stop,
}

/// Deliver what was emitted before the stop request
async fn drain(receiver: &mut EventReceiver, sink: &dyn NotificationSink) {
    while let Ok(event) = receiver.try_recv() {
        deliver(sink, &event).await;
    }
}

async fn deliver(sink: &dyn NotificationSink, event: &Event) {
    if let Err(e) = sink.deliver(event).await {
        warn!(event = event.kind(), "Notification delivery failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatformError;
    use std::sync::Mutex;

    fn publish_result(success: bool) -> Event {
        Event::PublishResult {
            recipient: Uuid::new_v4(),
            content_id: Uuid::new_v4(),
            log_id: Uuid::new_v4(),
            platform: "instagram".to_string(),
            success,
            message: "https://instagram.example/p/1".to_string(),
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        events: Mutex<Vec<Event>>,
    }

    #[async_trait]
    impl NotificationSink for CollectingSink {
        async fn deliver(&self, event: &Event) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl NotificationSink for BrokenSink {
        async fn deliver(&self, _event: &Event) -> Result<()> {
            Err(PlatformError::Network("websocket gone".to_string()).into())
        }
    }

    #[tokio::test]
    async fn test_event_emission_and_subscription() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let event = publish_result(true);
        event_bus.emit(event.clone());

        assert_eq!(receiver.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_no_subscribers() {
        let event_bus = EventBus::new(10);

        // Emit event with no subscribers - should not panic or block
        event_bus.emit(publish_result(false));
        assert_eq!(event_bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = Event::TokenRefreshFailed {
            account_id: Uuid::nil(),
            platform: "youtube".to_string(),
            error: "invalid_grant".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"token_refresh_failed\""));

        let deserialized: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, event);
        assert_eq!(publish_result(true).kind(), "publish_result");
    }

    #[tokio::test]
    async fn test_delivery_forwards_events_and_drains_on_stop() {
        let bus = EventBus::new(10);
        let sink = Arc::new(CollectingSink::default());
        let delivery = spawn_delivery(&bus, sink.clone());

        bus.emit(publish_result(true));
        bus.emit(publish_result(false));
        delivery.stop().await;

        assert_eq!(sink.events.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delivery_failures_are_swallowed() {
        let bus = EventBus::new(10);
        let delivery = spawn_delivery(&bus, Arc::new(BrokenSink));

        bus.emit(publish_result(true));
        bus.emit(publish_result(true));

        // The consumer keeps running and stops cleanly
        delivery.stop().await;
    }
}
