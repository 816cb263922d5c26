//! Dispatcher tuning knobs.

use std::time::Duration;

use shelfcast_common::config::AppConfig;
use shelfcast_common::error::DispatchError;

/// Default number of concurrent workers.
const DEFAULT_WORKERS: usize = 10;

/// Default capacity of the shared job queue.
const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Configuration for the worker pool, registry and orchestrator.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of workers pulling from the shared queue.
    pub worker_count: usize,
    /// Fixed capacity of the shared queue; submissions beyond it are shed.
    pub queue_capacity: usize,
    /// Pause a worker takes after each delivery attempt.
    pub send_interval: Duration,
    /// Largest batch accepted by `submit_batch`.
    pub max_batch_size: usize,
    /// How long a completed task stays in the registry.
    pub task_retention: Duration,
    /// Period of the retention sweep.
    pub sweep_interval: Duration,
}

impl DispatcherConfig {
    /// Reject configurations the pool cannot run with.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.worker_count == 0 {
            return Err(DispatchError::InvalidInput(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(DispatchError::InvalidInput(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(DispatchError::InvalidInput(
                "sweep_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            send_interval: Duration::from_millis(100),
            max_batch_size: 10_000,
            task_retention: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl From<&AppConfig> for DispatcherConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            worker_count: config.notifier_workers,
            queue_capacity: config.notifier_queue_capacity,
            send_interval: Duration::from_millis(config.notifier_send_interval_ms),
            max_batch_size: config.notifier_max_batch_size,
            task_retention: Duration::from_secs(config.notifier_task_retention_secs),
            sweep_interval: Duration::from_secs(config.notifier_sweep_interval_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(DispatcherConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = DispatcherConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DispatchError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = DispatcherConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
