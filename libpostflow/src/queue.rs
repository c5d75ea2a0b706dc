//! Work queue and worker pool for publish jobs
//!
//! Producers (the scheduler scan, "publish now", manual retries) only push
//! small [`DispatchJob`]s onto a bounded channel. A fixed number of workers
//! share the receiving end and run the dispatcher, so a slow platform never
//! holds up the scan loop.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dispatcher::{ExecuteOutcome, PublishingDispatcher};
use crate::error::{PostflowError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchJob {
    /// Claim a pending log and publish it
    Claim(Uuid),
    /// Publish a log that a retry already moved to `publishing`
    Resume(Uuid),
}

impl DispatchJob {
    pub fn log_id(&self) -> Uuid {
        match self {
            DispatchJob::Claim(id) | DispatchJob::Resume(id) => *id,
        }
    }
}

/// Sending half of the work queue
#[derive(Clone)]
pub struct DispatchQueue {
    sender: mpsc::Sender<DispatchJob>,
}

impl DispatchQueue {
    /// Bounded queue and its receiving end, for callers that consume jobs
    /// themselves
    pub fn channel(capacity: usize) -> (DispatchQueue, mpsc::Receiver<DispatchJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (DispatchQueue { sender }, receiver)
    }

    /// Queue a job, waiting for buffer space if the workers are behind
    pub async fn enqueue(&self, job: DispatchJob) -> Result<()> {
        self.sender.send(job).await.map_err(|_| {
            PostflowError::InvalidState(format!(
                "dispatch queue is closed, dropping job for log {}",
                job.log_id()
            ))
        })
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Fixed set of workers draining a [`DispatchQueue`]
pub struct WorkerPool {
    stop: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks and return the queue that feeds them
    pub fn spawn(
        dispatcher: Arc<PublishingDispatcher>,
        workers: usize,
        capacity: usize,
    ) -> (DispatchQueue, WorkerPool) {
        let (queue, receiver) = DispatchQueue::channel(capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let (stop, stop_rx) = watch::channel(false);

        let handles = (0..workers.max(1))
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    dispatcher.clone(),
                    receiver.clone(),
                    stop_rx.clone(),
                ))
            })
            .collect();

        (queue, WorkerPool { stop, handles })
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Close the queue, let workers finish buffered and in-flight jobs, and
    /// wait for them
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                error!("Publish worker ended abnormally: {}", e);
            }
        }
        info!("Publish workers stopped");
    }
}

async fn worker_loop(
    worker: usize,
    dispatcher: Arc<PublishingDispatcher>,
    receiver: Arc<Mutex<mpsc::Receiver<DispatchJob>>>,
    mut stop: watch::Receiver<bool>,
) {
    debug!(worker, "Publish worker started");

    loop {
        let job = {
            let mut rx = receiver.lock().await;
            if *stop.borrow() {
                rx.close();
            }
            let received = tokio::select! {
                job = rx.recv() => Some(job),
                _ = stop.changed() => None,
            };
            match received {
                Some(job) => job,
                None => {
                    // Closed queues still hand out what is buffered
                    rx.close();
                    rx.recv().await
                }
            }
        };

        match job {
            Some(job) => run_job(worker, &dispatcher, job).await,
            None => break,
        }
    }

    debug!(worker, "Publish worker exiting");
}

async fn run_job(worker: usize, dispatcher: &PublishingDispatcher, job: DispatchJob) {
    let result = match job {
        DispatchJob::Claim(log_id) => dispatcher.execute(log_id).await,
        DispatchJob::Resume(log_id) => dispatcher.execute_claimed(log_id).await,
    };

    match result {
        Ok(ExecuteOutcome::Published(_)) => {
            debug!(worker, log_id = %job.log_id(), "Job published")
        }
        Ok(ExecuteOutcome::Failed(reason)) => {
            debug!(worker, log_id = %job.log_id(), "Job failed: {}", reason)
        }
        Ok(ExecuteOutcome::Skipped(status)) => {
            debug!(worker, log_id = %job.log_id(), status = %status, "Job skipped")
        }
        Err(e) => warn!(worker, log_id = %job.log_id(), "Job could not run: {}", e),
    }
}
