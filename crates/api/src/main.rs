//! Shelfcast API server binary entrypoint.

use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use shelfcast_common::config::AppConfig;
use shelfcast_notifier::{
    Dispatcher, DispatcherConfig, LogTransport, MailTransport, ResendTransport, ShutdownOutcome,
};

use shelfcast_api::routes::create_router;
use shelfcast_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("shelfcast_api=debug,shelfcast_notifier=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Shelfcast API server...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Pick the mail transport
    let transport: Arc<dyn MailTransport> = match &config.resend_api_key {
        Some(api_key) => {
            tracing::info!("Email delivery via Resend");
            Arc::new(
                ResendTransport::new(
                    config.resend_api_url.clone(),
                    api_key.clone(),
                    config.email_from.clone(),
                )
                .map_err(|e| anyhow::anyhow!("Failed to build mail client: {}", e))?,
            )
        }
        None => {
            tracing::warn!("RESEND_API_KEY not set, notifications will only be logged");
            Arc::new(LogTransport)
        }
    };

    // Start the dispatcher
    let dispatcher = Arc::new(
        Dispatcher::new(DispatcherConfig::from(&config), transport)
            .map_err(|e| anyhow::anyhow!("Invalid notifier configuration: {}", e))?,
    );
    tracing::info!(workers = config.notifier_workers, "Notification workers started");

    // Build application state
    let shutdown_timeout = Duration::from_secs(config.notifier_shutdown_timeout_secs);
    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(Arc::clone(&dispatcher), config);

    // Build router
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("API server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain the notification queue
    tracing::info!("HTTP server stopped, draining notification queue...");
    match dispatcher.shutdown(shutdown_timeout).await {
        ShutdownOutcome::Clean => {}
        ShutdownOutcome::TimedOut { abandoned } | ShutdownOutcome::Incomplete { abandoned } => {
            tracing::warn!(abandoned, "Some notifications were not delivered");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
