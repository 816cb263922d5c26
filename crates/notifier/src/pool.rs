//! Bounded worker pool.
//!
//! A fixed number of tokio workers drain one shared bounded queue and hand
//! each job to the mail transport. Submission never waits: when the queue is
//! full the job is shed and recorded as `Failed(QueueSaturated)`.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use shelfcast_common::types::{FailureReason, JobStatus, NotificationJob};

use crate::config::DispatcherConfig;
use crate::registry::TaskRegistry;
use crate::transport::{MailTransport, TransportError};

/// Result of a pool shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every queued and in-flight job finished before the deadline.
    Clean,
    /// The deadline expired; `abandoned` jobs were failed without delivery.
    TimedOut { abandoned: usize },
    /// Workers exited before the deadline but left `abandoned` jobs behind.
    Incomplete { abandoned: usize },
}

/// Fixed-size pool of notification workers.
pub struct WorkerPool {
    sender: RwLock<Option<mpsc::Sender<NotificationJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    registry: Arc<TaskRegistry>,
}

impl WorkerPool {
    /// Spawn `config.worker_count` workers on the current tokio runtime.
    pub fn start(
        config: &DispatcherConfig,
        transport: Arc<dyn MailTransport>,
        registry: Arc<TaskRegistry>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let workers = (0..config.worker_count)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&rx),
                    Arc::clone(&transport),
                    Arc::clone(&registry),
                    config.send_interval,
                ))
            })
            .collect();

        tracing::info!(
            workers = config.worker_count,
            queue_capacity = config.queue_capacity,
            "Notification worker pool started"
        );

        Self {
            sender: RwLock::new(Some(tx)),
            workers: Mutex::new(workers),
            registry,
        }
    }

    /// Enqueue a job without waiting.
    ///
    /// Returns false when the job was shed; its failure is already recorded.
    pub fn submit(&self, job: NotificationJob) -> bool {
        let rejected = match self.sender.read().as_ref() {
            None => Some((job, FailureReason::PoolClosed)),
            Some(sender) => match sender.try_send(job) {
                Ok(()) => None,
                Err(TrySendError::Full(job)) => Some((job, FailureReason::QueueSaturated)),
                Err(TrySendError::Closed(job)) => Some((job, FailureReason::PoolClosed)),
            },
        };

        let Some((job, reason)) = rejected else {
            return true;
        };

        tracing::warn!(
            job_id = %job.job_id,
            recipient = %job.recipient,
            reason = %reason,
            "Dropping notification job"
        );
        self.registry
            .record_terminal_status(job.job_id, JobStatus::failed(job.job_id, reason));
        false
    }

    /// Number of jobs waiting in the queue.
    pub fn queued(&self) -> usize {
        self.sender
            .read()
            .as_ref()
            .map(|s| s.max_capacity() - s.capacity())
            .unwrap_or(0)
    }

    /// Close the queue and wait up to `timeout` for workers to drain it.
    ///
    /// On timeout the workers are aborted and every job still outstanding is
    /// recorded as `Failed(Abandoned)`. Calling this again is a no-op.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownOutcome {
        // Dropping the only sender closes the queue once it drains.
        self.sender.write().take();

        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return ShutdownOutcome::Clean;
        }

        let aborts: Vec<_> = workers.iter().map(|w| w.abort_handle()).collect();

        match tokio::time::timeout(timeout, futures::future::join_all(workers)).await {
            Ok(_) => {
                let abandoned = self.registry.abandon_outstanding();
                if abandoned == 0 {
                    tracing::info!("Notification worker pool drained");
                    ShutdownOutcome::Clean
                } else {
                    tracing::warn!(abandoned, "Notification workers exited with jobs outstanding");
                    ShutdownOutcome::Incomplete { abandoned }
                }
            }
            Err(_) => {
                for abort in aborts {
                    abort.abort();
                }
                let abandoned = self.registry.abandon_outstanding();
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    abandoned,
                    "Notification worker pool shutdown timed out"
                );
                ShutdownOutcome::TimedOut { abandoned }
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<NotificationJob>>>,
    transport: Arc<dyn MailTransport>,
    registry: Arc<TaskRegistry>,
    send_interval: Duration,
) {
    loop {
        // Hold the receiver lock only while waiting for the next job.
        let job = queue.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };

        registry.mark_in_progress(job.job_id);

        let attempt = AssertUnwindSafe(transport.send(&job.recipient, &job.subject, &job.body))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(TransportError::Other(panic_message(panic))));

        let status = match attempt {
            Ok(()) => {
                tracing::info!(
                    worker_id,
                    job_id = %job.job_id,
                    recipient = %job.recipient,
                    "Email sent"
                );
                JobStatus::completed(job.job_id)
            }
            Err(e) => {
                tracing::warn!(
                    worker_id,
                    job_id = %job.job_id,
                    recipient = %job.recipient,
                    error = %e,
                    "Failed to send email"
                );
                JobStatus::failed(job.job_id, FailureReason::TransportFailure(e.to_string()))
            }
        };

        registry.record_terminal_status(job.job_id, status);

        if !send_interval.is_zero() {
            tokio::time::sleep(send_interval).await;
        }
    }

    tracing::debug!(worker_id, "Notification worker stopped");
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("transport panicked: {}", detail)
}
