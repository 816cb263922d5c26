//! Bulk notification dispatcher.
//!
//! The only entry point callers use:
//! 1. Validate the recipient list (the only step that can fail)
//! 2. Register the batch task and return its id immediately
//! 3. Submit one job per recipient to the worker pool from a background task,
//!    tracked so that shutdown waits for it before closing the queue
//!
//! Everything that goes wrong after step 2 ends up as a job-level `Failed`
//! status, never as an error returned from here.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::{JoinHandle, JoinSet};

use shelfcast_common::error::DispatchError;
use shelfcast_common::types::{NotificationJob, TaskId, TaskSnapshot};

use crate::config::DispatcherConfig;
use crate::pool::{ShutdownOutcome, WorkerPool};
use crate::registry::TaskRegistry;
use crate::retention::spawn_retention_sweeper;
use crate::stream::TaskStream;
use crate::transport::MailTransport;

/// Owns the registry, the worker pool and the retention sweeper.
pub struct Dispatcher {
    config: DispatcherConfig,
    registry: Arc<TaskRegistry>,
    pool: Arc<WorkerPool>,
    submitters: Mutex<JoinSet<()>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Build a dispatcher and start its workers on the current tokio runtime.
    pub fn new(
        config: DispatcherConfig,
        transport: Arc<dyn MailTransport>,
    ) -> Result<Self, DispatchError> {
        config.validate()?;

        let registry = Arc::new(TaskRegistry::new(config.task_retention));
        let pool = Arc::new(WorkerPool::start(&config, transport, Arc::clone(&registry)));
        let sweeper = spawn_retention_sweeper(Arc::clone(&registry), config.sweep_interval);

        Ok(Self {
            config,
            registry,
            pool,
            submitters: Mutex::new(JoinSet::new()),
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    /// Accept a batch and return its task id without waiting for delivery.
    ///
    /// Recipients are trimmed and de-duplicated. An empty list yields a task
    /// that is already complete with `total = 0`.
    pub fn submit_batch(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<TaskId, DispatchError> {
        let recipients = self.validate(recipients)?;

        let task_id = self.registry.create_task(&recipients);
        let entry = self.registry.get_task(task_id)?;
        if entry.total() == 0 {
            tracing::info!(task_id = %task_id, "Empty batch completed immediately");
            return Ok(task_id);
        }

        let jobs: Vec<NotificationJob> = entry
            .assignments()
            .iter()
            .map(|(recipient, job_id)| NotificationJob {
                job_id: *job_id,
                recipient: recipient.clone(),
                subject: subject.to_string(),
                body: body.to_string(),
            })
            .collect();

        tracing::info!(
            task_id = %task_id,
            total = jobs.len(),
            "Bulk notification batch accepted"
        );

        let pool = Arc::clone(&self.pool);
        let mut submitters = self.submitters.lock();
        // Reap loops that already finished
        while submitters.try_join_next().is_some() {}
        submitters.spawn(async move {
            let submitted = jobs.len();
            let accepted = jobs
                .into_iter()
                .map(|job| pool.submit(job))
                .filter(|accepted| *accepted)
                .count();
            tracing::debug!(
                task_id = %task_id,
                submitted,
                accepted,
                queued = pool.queued(),
                "Batch jobs handed to worker pool"
            );
        });

        Ok(task_id)
    }

    /// Current progress of a task.
    pub fn snapshot(&self, task_id: TaskId) -> Result<TaskSnapshot, DispatchError> {
        self.registry.snapshot(task_id)
    }

    /// Live status stream of a task (one subscriber at a time).
    pub fn subscribe(&self, task_id: TaskId) -> Result<TaskStream, DispatchError> {
        self.registry.subscribe(task_id)
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Stop the sweeper, finish handing accepted batches to the pool, then
    /// close the queue and drain workers for up to `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownOutcome {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }

        let mut submitters = std::mem::take(&mut *self.submitters.lock());
        while let Some(result) = submitters.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Batch submission loop failed");
            }
        }

        let outcome = self.pool.shutdown(timeout).await;
        match outcome {
            ShutdownOutcome::Clean => tracing::info!("Dispatcher shut down cleanly"),
            ShutdownOutcome::TimedOut { abandoned } => {
                tracing::warn!(abandoned, "Dispatcher shutdown timed out")
            }
            ShutdownOutcome::Incomplete { abandoned } => {
                tracing::warn!(abandoned, "Dispatcher shut down with undelivered jobs")
            }
        }
        outcome
    }

    fn validate(&self, recipients: &[String]) -> Result<Vec<String>, DispatchError> {
        if recipients.len() > self.config.max_batch_size {
            return Err(DispatchError::InvalidInput(format!(
                "batch of {} recipients exceeds the limit of {}",
                recipients.len(),
                self.config.max_batch_size
            )));
        }

        recipients
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let trimmed = r.trim();
                if trimmed.is_empty() {
                    Err(DispatchError::InvalidInput(format!(
                        "recipient at position {} is blank",
                        i
                    )))
                } else {
                    Ok(trimmed.to_string())
                }
            })
            .collect()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.abort();
        }
        // Let in-flight submission loops finish on their own
        self.submitters.get_mut().detach_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LogTransport;

    fn dispatcher(max_batch_size: usize) -> Dispatcher {
        let config = DispatcherConfig {
            worker_count: 2,
            queue_capacity: 16,
            send_interval: Duration::ZERO,
            max_batch_size,
            ..Default::default()
        };
        Dispatcher::new(config, Arc::new(LogTransport)).unwrap()
    }

    fn recipients(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_blank_recipient_rejected_before_task_creation() {
        let dispatcher = dispatcher(10);
        let err = dispatcher
            .submit_batch(&recipients(&["a@x.com", "  "]), "s", "b")
            .unwrap_err();

        assert!(matches!(err, DispatchError::InvalidInput(_)));
        assert!(dispatcher.registry().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_batch_rejected() {
        let dispatcher = dispatcher(2);
        let err = dispatcher
            .submit_batch(&recipients(&["a@x.com", "b@x.com", "c@x.com"]), "s", "b")
            .unwrap_err();

        assert!(err.to_string().contains("exceeds the limit"));
        assert!(dispatcher.registry().is_empty());
    }

    #[tokio::test]
    async fn test_recipients_trimmed_and_deduplicated() {
        let dispatcher = dispatcher(10);
        let task_id = dispatcher
            .submit_batch(&recipients(&[" a@x.com", "a@x.com ", "b@x.com"]), "s", "b")
            .unwrap();

        let snapshot = dispatcher.snapshot(task_id).unwrap();
        assert_eq!(snapshot.total, 2);
        assert_eq!(snapshot.statuses[0].recipient, "a@x.com");
    }

    #[tokio::test]
    async fn test_empty_batch_completes_immediately() {
        let dispatcher = dispatcher(10);
        let task_id = dispatcher.submit_batch(&[], "s", "b").unwrap();

        let snapshot = dispatcher.snapshot(task_id).unwrap();
        assert_eq!(snapshot.total, 0);
        assert_eq!(snapshot.completed, 0);
        assert!(!snapshot.in_progress);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = DispatcherConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert!(Dispatcher::new(config, Arc::new(LogTransport)).is_err());
    }
}
