use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Address the API server binds to (default: 0.0.0.0:8080)
    pub bind_addr: String,

    /// JWT secret for API authentication
    pub jwt_secret: String,

    /// Lifetime of tokens minted by `encode_jwt` (tooling and tests only)
    pub jwt_expiry_hours: u64,

    /// Number of concurrent notification workers (default: 10)
    pub notifier_workers: usize,

    /// Capacity of the shared job queue (default: 1000)
    pub notifier_queue_capacity: usize,

    /// Pause each worker takes after a delivery attempt, in milliseconds (default: 100)
    pub notifier_send_interval_ms: u64,

    /// Largest accepted batch (default: 10000)
    pub notifier_max_batch_size: usize,

    /// How long shutdown waits for in-flight jobs (default: 30)
    pub notifier_shutdown_timeout_secs: u64,

    /// How long a completed task stays queryable (default: 3600)
    pub notifier_task_retention_secs: u64,

    /// How often completed tasks are swept (default: 60)
    pub notifier_sweep_interval_secs: u64,

    /// Resend API key for email delivery
    pub resend_api_key: Option<String>,

    /// Resend API endpoint
    pub resend_api_url: String,

    /// Email sender address
    pub email_from: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            bind_addr: std::env::var("API_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            jwt_secret: std::env::var("JWT_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable is required"))?,
            jwt_expiry_hours: parse_var("JWT_EXPIRY_HOURS", "24")?,
            notifier_workers: parse_var("NOTIFIER_WORKERS", "10")?,
            notifier_queue_capacity: parse_var("NOTIFIER_QUEUE_CAPACITY", "1000")?,
            notifier_send_interval_ms: parse_var("NOTIFIER_SEND_INTERVAL_MS", "100")?,
            notifier_max_batch_size: parse_var("NOTIFIER_MAX_BATCH_SIZE", "10000")?,
            notifier_shutdown_timeout_secs: parse_var("NOTIFIER_SHUTDOWN_TIMEOUT_SECS", "30")?,
            notifier_task_retention_secs: parse_var("NOTIFIER_TASK_RETENTION_SECS", "3600")?,
            notifier_sweep_interval_secs: parse_var("NOTIFIER_SWEEP_INTERVAL_SECS", "60")?,
            resend_api_key: std::env::var("RESEND_API_KEY").ok(),
            resend_api_url: std::env::var("RESEND_API_URL")
                .unwrap_or_else(|_| "https://api.resend.com/emails".to_string()),
            email_from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Library <noreply@library.local>".to_string()),
        })
    }
}

/// Read a numeric variable, falling back to `default` when unset.
fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> anyhow::Result<T> {
    parse_value(name, std::env::var(name).ok().as_deref(), default)
}

fn parse_value<T: std::str::FromStr>(
    name: &str,
    value: Option<&str>,
    default: &str,
) -> anyhow::Result<T> {
    value
        .unwrap_or(default)
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("{} must be a valid {}", name, std::any::type_name::<T>()))
}
