//! Live status streams.
//!
//! Each task has a single subscriber slot. A subscriber receives every status
//! event recorded after it attached, followed by exactly one `Complete`
//! summary once the task finishes. Subscribing to a finished task yields the
//! summary alone.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;

use shelfcast_common::error::DispatchError;
use shelfcast_common::types::{JobStatusEvent, StreamEvent, TaskId, TaskSummary};

use crate::registry::TaskEntry;

/// Holder of the (at most one) live subscriber of a task.
#[derive(Debug, Default)]
pub(crate) struct SubscriberSlot {
    sender: Option<mpsc::UnboundedSender<JobStatusEvent>>,
}

impl SubscriberSlot {
    /// Attach a new subscriber, failing if a live one is already attached.
    ///
    /// A subscriber whose stream was dropped no longer counts as live.
    pub(crate) fn attach(
        &mut self,
        task_id: TaskId,
    ) -> Result<mpsc::UnboundedReceiver<JobStatusEvent>, DispatchError> {
        if let Some(sender) = &self.sender
            && !sender.is_closed()
        {
            return Err(DispatchError::SubscriberActive(task_id));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.sender = Some(tx);
        Ok(rx)
    }

    /// Push an event to the subscriber, if any. Never blocks.
    pub(crate) fn publish(&mut self, event: JobStatusEvent) {
        if let Some(sender) = &self.sender
            && sender.send(event).is_err()
        {
            // Receiver dropped
            self.sender = None;
        }
    }

    /// End the live stream; the subscriber then emits its summary.
    pub(crate) fn close(&mut self) {
        self.sender = None;
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.sender.as_ref().is_some_and(|s| !s.is_closed())
    }
}

/// Finite, non-restartable sequence of status events for one task.
pub struct TaskStream {
    inner: BoxStream<'static, StreamEvent>,
}

impl TaskStream {
    /// Tail `rx` until the task closes it, then emit the task's summary.
    pub(crate) fn live(rx: mpsc::UnboundedReceiver<JobStatusEvent>, entry: Arc<TaskEntry>) -> Self {
        let inner = stream::unfold(Some((rx, entry)), |state| async move {
            let (mut rx, entry) = state?;
            match rx.recv().await {
                Some(event) => Some((StreamEvent::Status(event), Some((rx, entry)))),
                None => Some((StreamEvent::Complete(entry.summary()), None)),
            }
        })
        .boxed();

        Self { inner }
    }

    /// Stream for a task that has already finished.
    pub(crate) fn finished(summary: TaskSummary) -> Self {
        Self {
            inner: stream::once(async move { StreamEvent::Complete(summary) }).boxed(),
        }
    }
}

impl Stream for TaskStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for TaskStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStream").finish_non_exhaustive()
    }
}
