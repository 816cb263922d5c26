use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one bulk submission.
pub type TaskId = Uuid;

/// Identifier of one notification within a batch.
pub type JobId = Uuid;

/// Lifecycle state of a single notification job.
///
/// Transitions are strictly `Pending → (InProgress) → Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobState {
    /// `Completed` and `Failed` admit no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::InProgress => write!(f, "in_progress"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// Why a job ended up `Failed`.
///
/// These are job-level outcomes; they never cross the dispatcher boundary as errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// Shed because the worker queue was full at submission time.
    QueueSaturated,
    /// The mail transport reported a failure.
    TransportFailure(String),
    /// Submitted after the worker pool stopped accepting jobs.
    PoolClosed,
    /// Still outstanding when the shutdown deadline expired.
    Abandoned,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::QueueSaturated => write!(f, "queue capacity exceeded"),
            FailureReason::TransportFailure(msg) => write!(f, "transport failure: {}", msg),
            FailureReason::PoolClosed => write!(f, "worker pool closed"),
            FailureReason::Abandoned => write!(f, "abandoned during shutdown"),
        }
    }
}

/// A single notification to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationJob {
    pub job_id: JobId,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Latest observed status of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub state: JobState,
    pub observed_at: DateTime<Utc>,
    pub failure: Option<FailureReason>,
}

impl JobStatus {
    pub fn pending(job_id: JobId) -> Self {
        Self::with_state(job_id, JobState::Pending)
    }

    pub fn in_progress(job_id: JobId) -> Self {
        Self::with_state(job_id, JobState::InProgress)
    }

    pub fn completed(job_id: JobId) -> Self {
        Self::with_state(job_id, JobState::Completed)
    }

    pub fn failed(job_id: JobId, reason: FailureReason) -> Self {
        Self {
            job_id,
            state: JobState::Failed,
            observed_at: Utc::now(),
            failure: Some(reason),
        }
    }

    fn with_state(job_id: JobId, state: JobState) -> Self {
        Self {
            job_id,
            state,
            observed_at: Utc::now(),
            failure: None,
        }
    }
}

/// Per-recipient line of a task snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientStatus {
    pub recipient: String,
    pub job_id: JobId,
    pub state: JobState,
    pub observed_at: DateTime<Utc>,
    pub failure: Option<FailureReason>,
}

/// Point-in-time view of a batch task, returned by polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub total: usize,
    pub completed: usize,
    pub in_progress: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// One entry per recipient, in submission order.
    pub statuses: Vec<RecipientStatus>,
}

impl TaskSnapshot {
    /// Number of jobs currently in the given state.
    pub fn count(&self, state: JobState) -> usize {
        self.statuses.iter().filter(|s| s.state == state).count()
    }
}

/// A status change pushed to a live subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusEvent {
    pub recipient: String,
    pub job_id: JobId,
    pub state: JobState,
    pub observed_at: DateTime<Utc>,
    pub failure: Option<FailureReason>,
}

/// Final event of a status stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub total: usize,
    pub completed: usize,
    pub in_progress: bool,
}

/// Item yielded by a task's status stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Status(JobStatusEvent),
    Complete(TaskSummary),
}

impl StreamEvent {
    /// Server-sent event name for this item.
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamEvent::Status(_) => "status",
            StreamEvent::Complete(_) => "complete",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::InProgress.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }

    #[test]
    fn test_job_state_serializes_snake_case() {
        let json = serde_json::to_value(JobState::InProgress).unwrap();
        assert_eq!(json, "in_progress");
        assert_eq!(JobState::InProgress.to_string(), "in_progress");
    }

    #[test]
    fn test_failure_reason_json_shape() {
        let json = serde_json::to_value(FailureReason::TransportFailure("smtp 550".into())).unwrap();
        assert_eq!(json["kind"], "transport_failure");
        assert_eq!(json["detail"], "smtp 550");

        let json = serde_json::to_value(FailureReason::QueueSaturated).unwrap();
        assert_eq!(json["kind"], "queue_saturated");
    }

    #[test]
    fn test_failed_status_carries_reason() {
        let id = Uuid::new_v4();
        let status = JobStatus::failed(id, FailureReason::QueueSaturated);
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.failure, Some(FailureReason::QueueSaturated));
        assert!(JobStatus::completed(id).failure.is_none());
    }

    #[test]
    fn test_stream_event_names() {
        let summary = StreamEvent::Complete(TaskSummary {
            task_id: Uuid::new_v4(),
            total: 0,
            completed: 0,
            in_progress: false,
        });
        assert_eq!(summary.event_name(), "complete");
    }
}
