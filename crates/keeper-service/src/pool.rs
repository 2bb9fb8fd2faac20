//! Worker pool — a fixed set of tokio workers draining a bounded queue.
//!
//! Submission never blocks: a full queue rejects the job with
//! [`SubmitError::QueueFull`]. Workers share one receiver and stop on a
//! `watch` shutdown signal; jobs still queued at shutdown are dropped.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("work queue is full")]
    QueueFull,
    #[error("worker pool is stopped")]
    Stopped,
}

pub struct WorkerPool<J> {
    sender: mpsc::Sender<J>,
    shutdown_tx: watch::Sender<bool>,
    stopped: AtomicBool,
    workers: Vec<JoinHandle<()>>,
}

impl<J: Send + 'static> WorkerPool<J> {
    /// Spawn `workers` tasks running `handler` for each job from a queue
    /// holding at most `queue_length` jobs. Both are raised to at least 1.
    pub fn new<H, Fut>(workers: usize, queue_length: usize, handler: H) -> Self
    where
        H: Fn(J) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::channel(queue_length.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let handler = Arc::new(handler);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = (0..workers)
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    Arc::clone(&receiver),
                    Arc::clone(&handler),
                    shutdown_rx.clone(),
                ))
            })
            .collect();

        info!(workers, queue_length, "worker pool started");
        Self {
            sender,
            shutdown_tx,
            stopped: AtomicBool::new(false),
            workers: handles,
        }
    }

    /// Enqueue a job without waiting for queue space.
    pub fn submit(&self, job: J) -> Result<(), SubmitError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(SubmitError::Stopped);
        }
        self.sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                debug!("work queue full, job rejected");
                SubmitError::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => SubmitError::Stopped,
        })
    }

    /// Free queue slots right now.
    pub fn available_capacity(&self) -> usize {
        self.sender.capacity()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop accepting jobs and stop every worker. A job mid-flight is
    /// aborted.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        for handle in &self.workers {
            handle.abort();
        }
        info!("worker pool stopped");
    }
}

impl<J> Drop for WorkerPool<J> {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn run_worker<J, H, Fut>(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<J>>>,
    handler: Arc<H>,
    mut shutdown: watch::Receiver<bool>,
) where
    H: Fn(J) -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.changed() => None,
                job = receiver.recv() => job,
            }
        };
        match job {
            Some(job) => (*handler)(job).await,
            None => break,
        }
    }
    debug!(worker, "worker exiting");
}
