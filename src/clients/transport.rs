use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, info};

use crate::models::channel::Channel;

/// One rendered message for one channel, addressed to every resolved
/// recipient of a queue entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub channel: Channel,
    pub to: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
    /// Plain-text alternative of an HTML email body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_body: Option<String>,
    /// Queue entry id, forwarded so providers can correlate callbacks.
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{reason}")]
pub struct TransportFailure {
    pub reason: String,
    /// Transient failures (timeouts, throttling, provider outages) are
    /// eligible for a scheduled retry.
    pub transient: bool,
}

impl TransportFailure {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            transient: true,
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            transient: false,
        }
    }
}

/// Sends a single rendered message over one channel. Implementations must
/// not retry internally.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportFailure>;
}

/// Provider gateway reached over HTTP: the message is POSTed as JSON.
pub struct HttpTransport {
    http_client: Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, anyhow::Error> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        let endpoint = endpoint.into();
        info!(endpoint = %endpoint, "HTTP transport initialized");

        Ok(Self {
            http_client,
            endpoint,
        })
    }

    fn classify_status(status: StatusCode, body: &str) -> TransportFailure {
        let reason = format!("provider returned {}: {}", status, body.trim());
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            TransportFailure::transient(reason)
        } else {
            TransportFailure::permanent(reason)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportFailure> {
        debug!(
            channel = %message.channel,
            recipients = message.to.len(),
            reference = %message.reference,
            "Sending message through HTTP transport"
        );

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(message)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportFailure::transient(format!("provider timed out: {}", e))
                } else if e.is_connect() || e.is_request() {
                    TransportFailure::transient(format!("provider unreachable: {}", e))
                } else {
                    TransportFailure::permanent(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            info!(
                channel = %message.channel,
                reference = %message.reference,
                "Message accepted by provider"
            );
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Self::classify_status(status, &body))
        }
    }
}
