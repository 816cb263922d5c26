//! Shelfcast HTTP API.
//!
//! Endpoints:
//! - GET  /health: liveness
//! - POST /api/notifications/bulk: submit a bulk notification batch
//! - GET  /api/notifications/tasks/{task_id}: poll batch progress
//! - GET  /api/notifications/tasks/{task_id}/stream: live progress (SSE)

pub mod middleware;
pub mod routes;
pub mod state;
