//! In-memory task registry.
//!
//! Maps task ids to batch task records and job ids back to their owning task.
//! Both maps are concurrent (`DashMap`), so lookups of different tasks never
//! contend. Each task guards its mutable state with its own mutex; recording a
//! terminal status (store, count, publish, close) happens under that lock, so
//! exactly one writer observes the transition to `completed == total`.
//!
//! Completed tasks are kept for `task_retention` and then dropped by
//! `purge_expired` (driven by the retention sweeper).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use shelfcast_common::error::DispatchError;
use shelfcast_common::types::{
    FailureReason, JobId, JobState, JobStatus, JobStatusEvent, RecipientStatus, TaskId,
    TaskSnapshot, TaskSummary,
};

use crate::stream::{SubscriberSlot, TaskStream};

/// Mutable part of a batch task.
#[derive(Debug)]
struct TaskState {
    completed: usize,
    statuses: HashMap<JobId, JobStatus>,
    completed_at: Option<DateTime<Utc>>,
    subscriber: SubscriberSlot,
}

/// One batch task: immutable assignment plus lock-guarded progress.
#[derive(Debug)]
pub struct TaskEntry {
    task_id: TaskId,
    created_at: DateTime<Utc>,
    /// Recipient → job assignment in submission order (recipients unique).
    assignments: Vec<(String, JobId)>,
    /// Position of each job in `assignments`.
    positions: HashMap<JobId, usize>,
    state: Mutex<TaskState>,
}

impl TaskEntry {
    fn new(task_id: TaskId, recipients: Vec<String>) -> Self {
        let now = Utc::now();
        let assignments: Vec<(String, JobId)> = recipients
            .into_iter()
            .map(|recipient| (recipient, Uuid::new_v4()))
            .collect();
        let positions = assignments
            .iter()
            .enumerate()
            .map(|(i, (_, job_id))| (*job_id, i))
            .collect();
        let statuses = assignments
            .iter()
            .map(|(_, job_id)| (*job_id, JobStatus::pending(*job_id)))
            .collect();

        Self {
            task_id,
            created_at: now,
            state: Mutex::new(TaskState {
                completed: 0,
                statuses,
                completed_at: assignments.is_empty().then_some(now),
                subscriber: SubscriberSlot::default(),
            }),
            assignments,
            positions,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn total(&self) -> usize {
        self.assignments.len()
    }

    pub fn assignments(&self) -> &[(String, JobId)] {
        &self.assignments
    }

    fn recipient_of(&self, job_id: JobId) -> &str {
        self.positions
            .get(&job_id)
            .map(|&i| self.assignments[i].0.as_str())
            .unwrap_or_default()
    }

    fn event_for(&self, status: &JobStatus) -> JobStatusEvent {
        JobStatusEvent {
            recipient: self.recipient_of(status.job_id).to_string(),
            job_id: status.job_id,
            state: status.state,
            observed_at: status.observed_at,
            failure: status.failure.clone(),
        }
    }

    fn summary_of(&self, state: &TaskState) -> TaskSummary {
        TaskSummary {
            task_id: self.task_id,
            total: self.total(),
            completed: state.completed,
            in_progress: state.completed < self.total(),
        }
    }

    /// Current counters of the task.
    pub fn summary(&self) -> TaskSummary {
        let state = self.state.lock();
        self.summary_of(&state)
    }

    /// Consistent point-in-time copy of the task.
    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.state.lock();
        let statuses = self
            .assignments
            .iter()
            .filter_map(|(recipient, job_id)| {
                state.statuses.get(job_id).map(|s| RecipientStatus {
                    recipient: recipient.clone(),
                    job_id: *job_id,
                    state: s.state,
                    observed_at: s.observed_at,
                    failure: s.failure.clone(),
                })
            })
            .collect();

        TaskSnapshot {
            task_id: self.task_id,
            total: self.total(),
            completed: state.completed,
            in_progress: state.completed < self.total(),
            created_at: self.created_at,
            completed_at: state.completed_at,
            statuses,
        }
    }

    fn mark_in_progress(&self, job_id: JobId) -> bool {
        let mut state = self.state.lock();
        match state.statuses.get(&job_id) {
            Some(current) if current.state == JobState::Pending => {}
            _ => return false,
        }

        let status = JobStatus::in_progress(job_id);
        let event = self.event_for(&status);
        state.statuses.insert(job_id, status);
        state.subscriber.publish(event);
        true
    }

    fn record_terminal(&self, status: JobStatus) -> bool {
        let mut state = self.state.lock();
        match state.statuses.get(&status.job_id) {
            Some(current) if !current.state.is_terminal() => {}
            _ => return false,
        }

        let event = self.event_for(&status);
        state.statuses.insert(status.job_id, status);
        state.completed += 1;
        state.subscriber.publish(event);

        if state.completed == self.total() {
            state.completed_at = Some(Utc::now());
            state.subscriber.close();
            tracing::info!(
                task_id = %self.task_id,
                total = self.total(),
                "Batch task completed"
            );
        }
        true
    }

    fn subscribe(self: &Arc<Self>) -> Result<TaskStream, DispatchError> {
        let mut state = self.state.lock();
        if state.completed == self.total() {
            return Ok(TaskStream::finished(self.summary_of(&state)));
        }

        let rx = state.subscriber.attach(self.task_id)?;
        Ok(TaskStream::live(rx, Arc::clone(self)))
    }

    /// Fail every job that has not reached a terminal state.
    fn abandon_outstanding(&self) -> usize {
        let outstanding: Vec<JobId> = {
            let state = self.state.lock();
            state
                .statuses
                .values()
                .filter(|s| !s.state.is_terminal())
                .map(|s| s.job_id)
                .collect()
        };

        outstanding
            .into_iter()
            .filter(|job_id| {
                self.record_terminal(JobStatus::failed(*job_id, FailureReason::Abandoned))
            })
            .count()
    }

    fn outstanding(&self) -> usize {
        let state = self.state.lock();
        self.total() - state.completed
    }

    fn expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        let state = self.state.lock();
        state
            .completed_at
            .and_then(|at| (now - at).to_std().ok())
            .is_some_and(|age| age >= retention)
    }
}

/// Concurrent store of batch tasks.
pub struct TaskRegistry {
    tasks: DashMap<TaskId, Arc<TaskEntry>>,
    job_index: DashMap<JobId, TaskId>,
    retention: Duration,
}

impl TaskRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            tasks: DashMap::new(),
            job_index: DashMap::new(),
            retention,
        }
    }

    /// Register a new batch task and return its id.
    ///
    /// Duplicate recipients collapse onto the first occurrence. An empty list
    /// produces a task that is already complete.
    pub fn create_task(&self, recipients: &[String]) -> TaskId {
        let mut seen = HashSet::with_capacity(recipients.len());
        let unique: Vec<String> = recipients
            .iter()
            .filter(|r| seen.insert(r.as_str()))
            .cloned()
            .collect();

        let task_id = Uuid::new_v4();
        let entry = Arc::new(TaskEntry::new(task_id, unique));
        for (_, job_id) in entry.assignments() {
            self.job_index.insert(*job_id, task_id);
        }

        tracing::debug!(
            task_id = %task_id,
            total = entry.total(),
            duplicates = recipients.len() - entry.total(),
            "Batch task created"
        );

        self.tasks.insert(task_id, entry);
        task_id
    }

    /// Look up a task record.
    pub fn get_task(&self, task_id: TaskId) -> Result<Arc<TaskEntry>, DispatchError> {
        self.tasks
            .get(&task_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(DispatchError::TaskNotFound(task_id))
    }

    pub fn snapshot(&self, task_id: TaskId) -> Result<TaskSnapshot, DispatchError> {
        Ok(self.get_task(task_id)?.snapshot())
    }

    /// Attach the single live subscriber of a task.
    pub fn subscribe(&self, task_id: TaskId) -> Result<TaskStream, DispatchError> {
        self.get_task(task_id)?.subscribe()
    }

    fn owner_of(&self, job_id: JobId) -> Option<Arc<TaskEntry>> {
        let task_id = *self.job_index.get(&job_id)?.value();
        self.tasks.get(&task_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Move a pending job to `InProgress`. Returns false if the job is unknown
    /// or already past `Pending`.
    pub fn mark_in_progress(&self, job_id: JobId) -> bool {
        self.owner_of(job_id)
            .is_some_and(|entry| entry.mark_in_progress(job_id))
    }

    /// Record the terminal outcome of a job.
    ///
    /// Returns true only for the first terminal write of a known job; later
    /// writes for the same job are ignored and never counted twice.
    pub fn record_terminal_status(&self, job_id: JobId, status: JobStatus) -> bool {
        if !status.state.is_terminal() || status.job_id != job_id {
            tracing::warn!(
                job_id = %job_id,
                state = %status.state,
                "Ignoring non-terminal or mismatched status"
            );
            return false;
        }

        let Some(entry) = self.owner_of(job_id) else {
            tracing::debug!(job_id = %job_id, "Terminal status for unknown job");
            return false;
        };

        let recorded = entry.record_terminal(status);
        if !recorded {
            tracing::debug!(
                task_id = %entry.task_id(),
                job_id = %job_id,
                "Duplicate terminal status ignored"
            );
        }
        recorded
    }

    /// Number of jobs, across all tasks, without a terminal status.
    pub fn outstanding_jobs(&self) -> usize {
        self.entries().iter().map(|e| e.outstanding()).sum()
    }

    /// Fail every outstanding job with `Abandoned`; returns how many.
    pub fn abandon_outstanding(&self) -> usize {
        self.entries().iter().map(|e| e.abandon_outstanding()).sum()
    }

    /// Drop tasks that completed more than `retention` before `now`.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<Arc<TaskEntry>> = self
            .entries()
            .into_iter()
            .filter(|e| e.expired(now, self.retention))
            .collect();

        for entry in &expired {
            self.tasks.remove(&entry.task_id());
            for (_, job_id) in entry.assignments() {
                self.job_index.remove(job_id);
            }
        }

        expired.len()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn entries(&self) -> Vec<Arc<TaskEntry>> {
        self.tasks.iter().map(|e| Arc::clone(e.value())).collect()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use shelfcast_common::types::StreamEvent;

    fn recipients(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn job_ids(registry: &TaskRegistry, task_id: TaskId) -> Vec<JobId> {
        registry
            .get_task(task_id)
            .unwrap()
            .assignments()
            .iter()
            .map(|(_, id)| *id)
            .collect()
    }

    #[test]
    fn test_create_task_starts_pending() {
        let registry = TaskRegistry::default();
        let task_id = registry.create_task(&recipients(&["a@x.com", "b@x.com"]));

        let snapshot = registry.snapshot(task_id).unwrap();
        assert_eq!(snapshot.total, 2);
        assert_eq!(snapshot.completed, 0);
        assert!(snapshot.in_progress);
        assert_eq!(snapshot.count(JobState::Pending), 2);
        assert_eq!(snapshot.statuses[0].recipient, "a@x.com");
        assert_eq!(snapshot.statuses[1].recipient, "b@x.com");
    }

    #[test]
    fn test_duplicate_recipients_collapse() {
        let registry = TaskRegistry::default();
        let task_id = registry.create_task(&recipients(&["a@x.com", "b@x.com", "a@x.com"]));

        let snapshot = registry.snapshot(task_id).unwrap();
        assert_eq!(snapshot.total, 2);
        assert_ne!(snapshot.statuses[0].job_id, snapshot.statuses[1].job_id);
    }

    #[test]
    fn test_empty_task_is_complete() {
        let registry = TaskRegistry::default();
        let task_id = registry.create_task(&[]);

        let snapshot = registry.snapshot(task_id).unwrap();
        assert_eq!(snapshot.total, 0);
        assert!(!snapshot.in_progress);
        assert!(snapshot.completed_at.is_some());
    }

    #[test]
    fn test_unknown_task_not_found() {
        let registry = TaskRegistry::default();
        let id = Uuid::new_v4();
        assert_eq!(
            registry.snapshot(id).unwrap_err(),
            DispatchError::TaskNotFound(id)
        );
    }

    #[test]
    fn test_terminal_status_counted_once() {
        let registry = TaskRegistry::default();
        let task_id = registry.create_task(&recipients(&["a@x.com", "b@x.com"]));
        let jobs = job_ids(&registry, task_id);

        assert!(registry.record_terminal_status(jobs[0], JobStatus::completed(jobs[0])));
        assert!(!registry.record_terminal_status(jobs[0], JobStatus::completed(jobs[0])));
        assert!(!registry.record_terminal_status(
            jobs[0],
            JobStatus::failed(jobs[0], FailureReason::QueueSaturated)
        ));

        let snapshot = registry.snapshot(task_id).unwrap();
        assert_eq!(snapshot.completed, 1);
        assert!(snapshot.in_progress);
        assert_eq!(snapshot.statuses[0].state, JobState::Completed);
    }

    #[test]
    fn test_non_terminal_status_rejected() {
        let registry = TaskRegistry::default();
        let task_id = registry.create_task(&recipients(&["a@x.com"]));
        let job = job_ids(&registry, task_id)[0];

        assert!(!registry.record_terminal_status(job, JobStatus::in_progress(job)));
        assert_eq!(registry.snapshot(task_id).unwrap().completed, 0);
    }

    #[test]
    fn test_in_progress_never_overrides_terminal() {
        let registry = TaskRegistry::default();
        let task_id = registry.create_task(&recipients(&["a@x.com"]));
        let job = job_ids(&registry, task_id)[0];

        assert!(registry.mark_in_progress(job));
        assert!(!registry.mark_in_progress(job));
        assert!(registry.record_terminal_status(job, JobStatus::completed(job)));
        assert!(!registry.mark_in_progress(job));

        let snapshot = registry.snapshot(task_id).unwrap();
        assert_eq!(snapshot.statuses[0].state, JobState::Completed);
        assert!(!snapshot.in_progress);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicate_writers_never_double_count() {
        let registry = Arc::new(TaskRegistry::default());
        let list: Vec<String> = (0..50).map(|i| format!("user{}@x.com", i)).collect();
        let task_id = registry.create_task(&list);
        let jobs = job_ids(&registry, task_id);

        // Eight writers race to record every job.
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let jobs = jobs.clone();
            handles.push(tokio::spawn(async move {
                let mut wins = 0usize;
                for job in jobs {
                    if registry.record_terminal_status(job, JobStatus::completed(job)) {
                        wins += 1;
                    }
                    tokio::task::yield_now().await;
                }
                wins
            }));
        }

        let mut total_wins = 0;
        for handle in handles {
            total_wins += handle.await.unwrap();
        }

        assert_eq!(total_wins, 50);
        let snapshot = registry.snapshot(task_id).unwrap();
        assert_eq!(snapshot.completed, 50);
        assert!(!snapshot.in_progress);
    }

    #[tokio::test]
    async fn test_subscriber_sees_live_events_then_summary() {
        let registry = TaskRegistry::default();
        let task_id = registry.create_task(&recipients(&["a@x.com", "b@x.com"]));
        let jobs = job_ids(&registry, task_id);

        // Recorded before subscription: not replayed
        registry.mark_in_progress(jobs[0]);

        let stream = registry.subscribe(task_id).unwrap();
        registry.record_terminal_status(jobs[0], JobStatus::completed(jobs[0]));
        registry.record_terminal_status(
            jobs[1],
            JobStatus::failed(jobs[1], FailureReason::QueueSaturated),
        );

        let events: Vec<StreamEvent> = stream.collect().await;
        assert_eq!(events.len(), 3);
        match &events[0] {
            StreamEvent::Status(e) => {
                assert_eq!(e.recipient, "a@x.com");
                assert_eq!(e.state, JobState::Completed);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match &events[1] {
            StreamEvent::Status(e) => {
                assert_eq!(e.recipient, "b@x.com");
                assert_eq!(e.failure, Some(FailureReason::QueueSaturated));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(
            events[2],
            StreamEvent::Complete(TaskSummary {
                task_id,
                total: 2,
                completed: 2,
                in_progress: false,
            })
        );
    }

    #[test]
    fn test_second_subscriber_rejected() {
        let registry = TaskRegistry::default();
        let task_id = registry.create_task(&recipients(&["a@x.com"]));

        let first = registry.subscribe(task_id).unwrap();
        assert_eq!(
            registry.subscribe(task_id).unwrap_err(),
            DispatchError::SubscriberActive(task_id)
        );

        drop(first);
        assert!(registry.subscribe(task_id).is_ok());
    }

    #[test]
    fn test_abandon_outstanding_completes_tasks() {
        let registry = TaskRegistry::default();
        let task_id = registry.create_task(&recipients(&["a@x.com", "b@x.com", "c@x.com"]));
        let jobs = job_ids(&registry, task_id);
        registry.record_terminal_status(jobs[0], JobStatus::completed(jobs[0]));

        assert_eq!(registry.outstanding_jobs(), 2);
        assert_eq!(registry.abandon_outstanding(), 2);
        assert_eq!(registry.outstanding_jobs(), 0);

        let snapshot = registry.snapshot(task_id).unwrap();
        assert!(!snapshot.in_progress);
        assert_eq!(snapshot.count(JobState::Failed), 2);
        assert_eq!(snapshot.statuses[1].failure, Some(FailureReason::Abandoned));
    }

    #[test]
    fn test_purge_expired_only_drops_old_completed_tasks() {
        let registry = TaskRegistry::new(Duration::from_secs(60));
        let done = registry.create_task(&[]);
        let running = registry.create_task(&recipients(&["a@x.com"]));
        let running_job = job_ids(&registry, running)[0];

        // Not yet past retention
        assert_eq!(registry.purge_expired(Utc::now()), 0);

        let later = Utc::now() + chrono::Duration::seconds(120);
        assert_eq!(registry.purge_expired(later), 1);
        assert!(registry.get_task(done).is_err());
        assert!(registry.get_task(running).is_ok());

        // Job index of purged tasks is cleaned, live ones untouched
        assert!(registry.mark_in_progress(running_job));
        assert_eq!(registry.len(), 1);
    }
}
