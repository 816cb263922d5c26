//! Bulk notification routes.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shelfcast_common::error::{AppError, DispatchError};
use shelfcast_common::types::{StreamEvent, TaskId, TaskSnapshot};

use crate::middleware::auth::AuthUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/notifications/bulk", post(submit_bulk))
        .route("/api/notifications/tasks/{task_id}", get(get_task))
        .route("/api/notifications/tasks/{task_id}/stream", get(stream_task))
}

/// Request body for a bulk notification.
#[derive(Debug, Deserialize)]
pub struct BulkNotificationRequest {
    pub recipients: Vec<String>,
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default = "default_body")]
    pub body: String,
}

fn default_subject() -> String {
    "Library Update".to_string()
}

fn default_body() -> String {
    "New books added!".to_string()
}

/// Response for an accepted batch.
#[derive(Debug, Serialize, Deserialize)]
pub struct BulkNotificationResponse {
    pub task_id: TaskId,
}

/// POST /api/notifications/bulk: Queue a notification for every recipient.
///
/// Returns as soon as the batch is registered; delivery happens in the background.
async fn submit_bulk(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<BulkNotificationRequest>,
) -> Result<(StatusCode, Json<BulkNotificationResponse>), AppError> {
    let task_id = state
        .dispatcher
        .submit_batch(&req.recipients, &req.subject, &req.body)?;

    tracing::info!(
        user = %auth.username,
        task_id = %task_id,
        recipients = req.recipients.len(),
        "Bulk notifications queued"
    );

    Ok((StatusCode::ACCEPTED, Json(BulkNotificationResponse { task_id })))
}

/// GET /api/notifications/tasks/{task_id}: Current batch progress.
async fn get_task(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskSnapshot>, AppError> {
    Ok(Json(state.dispatcher.snapshot(task_id)?))
}

/// GET /api/notifications/tasks/{task_id}/stream: Live progress as server-sent events.
///
/// Emits `status` events while the batch runs and one final `complete` event.
/// Only one stream per task may be open at a time.
async fn stream_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(task_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    if !accepts_event_stream(&headers) {
        return Err(DispatchError::StreamUnavailable(
            "client does not accept text/event-stream; poll the task instead".to_string(),
        )
        .into());
    }

    let stream = state.dispatcher.subscribe(task_id)?;

    tracing::debug!(
        user = %auth.username,
        task_id = %task_id,
        "Status stream opened"
    );

    let events = stream.map(|event| Ok(to_sse(&event)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// A missing `Accept` header counts as accepting anything.
fn accepts_event_stream(headers: &HeaderMap) -> bool {
    let Some(accept) = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()) else {
        return true;
    };

    accept.split(',').any(|media| {
        let media = media.split(';').next().unwrap_or_default().trim();
        matches!(media, "text/event-stream" | "text/*" | "*/*")
    })
}

/// Encode a stream item as an SSE event named after its kind.
fn to_sse(event: &StreamEvent) -> Event {
    let data = match event {
        StreamEvent::Status(status) => serde_json::to_string(status),
        StreamEvent::Complete(summary) => serde_json::to_string(summary),
    };

    match data {
        Ok(data) => Event::default().event(event.event_name()).data(data),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode stream event");
            Event::default().comment("encoding error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let req: BulkNotificationRequest =
            serde_json::from_value(serde_json::json!({ "recipients": ["a@x.com"] })).unwrap();
        assert_eq!(req.subject, "Library Update");
        assert_eq!(req.body, "New books added!");
    }

    #[test]
    fn test_request_requires_recipients() {
        let result: Result<BulkNotificationRequest, _> =
            serde_json::from_value(serde_json::json!({ "subject": "hi" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_accepts_event_stream() {
        let mut headers = HeaderMap::new();
        assert!(accepts_event_stream(&headers));

        headers.insert(header::ACCEPT, "text/event-stream".parse().unwrap());
        assert!(accepts_event_stream(&headers));

        headers.insert(header::ACCEPT, "application/json;q=0.9, */*;q=0.1".parse().unwrap());
        assert!(accepts_event_stream(&headers));

        headers.insert(header::ACCEPT, "application/json".parse().unwrap());
        assert!(!accepts_event_stream(&headers));
    }
}
