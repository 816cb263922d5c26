//! Shared application state for the Axum API server.

use std::sync::Arc;

use shelfcast_common::config::AppConfig;
use shelfcast_notifier::Dispatcher;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, config: AppConfig) -> Self {
        Self { dispatcher, config }
    }
}
