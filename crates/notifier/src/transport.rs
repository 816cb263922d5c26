//! Mail transport capability.
//!
//! The dispatcher only knows that delivering one message can succeed or fail.
//! Concrete transports:
//! - `ResendTransport`: Resend HTTP API via `reqwest`
//! - `LogTransport`: logs the message and reports success (local development)

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Failure reported by a transport for a single delivery attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("{0}")]
    Other(String),
}

/// Delivers one notification to one recipient.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), TransportError>;
}

/// Upper bound on one Resend API call, connect included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Request body accepted by the Resend `/emails` endpoint.
#[derive(Debug, Serialize)]
struct ResendEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
}

/// Email delivery through the Resend HTTP API.
pub struct ResendTransport {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl ResendTransport {
    pub fn new(api_url: String, api_key: String, from: String) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            api_url,
            api_key,
            from,
        })
    }
}

#[async_trait]
impl MailTransport for ResendTransport {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), TransportError> {
        let email = ResendEmail {
            from: &self.from,
            to: [recipient],
            subject,
            text: body,
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&email)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// Transport that only logs; used when no mail API key is configured.
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), TransportError> {
        tracing::info!(
            recipient,
            subject,
            body_len = body.len(),
            "Email delivered to log transport"
        );
        Ok(())
    }
}
