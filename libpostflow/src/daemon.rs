//! Long-running publishing engine
//!
//! [`PublishingDaemon`] wires the pieces an embedding service needs running
//! in the background: the worker pool, the scheduler loop and the
//! notification consumer. Callers talk to it through [`PostflowService`].

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::Store;
use crate::dispatcher::PublishingDispatcher;
use crate::error::Result;
use crate::events::{spawn_delivery, DeliveryTask, EventBus, NotificationSink};
use crate::publishers::PublisherRegistry;
use crate::queue::WorkerPool;
use crate::scheduler::Scheduler;
use crate::service::PostflowService;
use crate::workflow::ApprovalWorkflow;

pub struct PublishingDaemon {
    service: PostflowService,
    dispatcher: Arc<PublishingDispatcher>,
    scheduler_stop: watch::Sender<bool>,
    scheduler: JoinHandle<()>,
    workers: WorkerPool,
    delivery: DeliveryTask,
}

impl PublishingDaemon {
    /// Start workers, scheduler and notification delivery
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the workflow
    /// transition table is inconsistent. Nothing has been spawned in that
    /// case.
    pub fn start(
        config: &Config,
        store: Arc<dyn Store>,
        publishers: PublisherRegistry,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        config.validate()?;
        let workflow = Arc::new(ApprovalWorkflow::new(Arc::clone(&store))?);

        if publishers.is_empty() {
            warn!("No publishers registered, every publish will fail");
        }

        let events = EventBus::new(config.notifications.capacity);
        // Subscribe before anything can emit
        let delivery = spawn_delivery(&events, sink);

        let dispatcher = Arc::new(PublishingDispatcher::from_config(
            config,
            Arc::clone(&store),
            publishers.clone(),
            events.clone(),
        ));

        let (queue, workers) = WorkerPool::spawn(
            Arc::clone(&dispatcher),
            config.scheduling.workers,
            config.scheduling.queue_capacity,
        );

        let scheduler = Scheduler::new(
            &config.scheduling,
            Arc::clone(&store),
            queue.clone(),
            publishers.clone(),
            events,
        );
        let (scheduler_stop, stop_rx) = watch::channel(false);
        let scheduler = tokio::spawn(scheduler.run(stop_rx));

        let service = PostflowService::new(store, workflow, Arc::clone(&dispatcher), queue);

        info!(
            workers = workers.size(),
            platforms = ?publishers.platforms(),
            "Publishing daemon started"
        );

        Ok(Self {
            service,
            dispatcher,
            scheduler_stop,
            scheduler,
            workers,
            delivery,
        })
    }

    pub fn service(&self) -> &PostflowService {
        &self.service
    }

    pub fn dispatcher(&self) -> &Arc<PublishingDispatcher> {
        &self.dispatcher
    }

    /// Stop scanning, let workers finish queued and in-flight publishes,
    /// then flush pending notifications
    pub async fn shutdown(self) {
        info!("Shutdown requested, stopping publishing daemon");

        let _ = self.scheduler_stop.send(true);
        if let Err(e) = self.scheduler.await {
            error!("Scheduler task ended abnormally: {}", e);
        }

        self.workers.shutdown().await;
        self.delivery.stop().await;

        info!("Publishing daemon stopped");
    }
}
