//! Periodic eviction of completed tasks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::registry::TaskRegistry;

/// Spawn a task that purges expired tasks every `interval`.
///
/// Runs until the returned handle is aborted.
pub fn spawn_retention_sweeper(registry: Arc<TaskRegistry>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let purged = registry.purge_expired(Utc::now());
            if purged > 0 {
                tracing::debug!(
                    purged,
                    remaining = registry.len(),
                    "Purged expired notification tasks"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sweeper_evicts_completed_tasks() {
        let registry = Arc::new(TaskRegistry::new(Duration::ZERO));
        let task_id = registry.create_task(&[]);

        let sweeper = spawn_retention_sweeper(Arc::clone(&registry), Duration::from_millis(10));

        let evicted = tokio::time::timeout(Duration::from_secs(2), async {
            while registry.get_task(task_id).is_ok() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;

        sweeper.abort();
        assert!(evicted.is_ok());
        assert!(registry.is_empty());
    }
}
