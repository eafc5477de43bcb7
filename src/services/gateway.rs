use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::PushGatewayConfig;
use crate::error::{AppError, AppResult};

/// One outbound push message addressed to a single device token.
#[derive(Debug, Clone, Serialize)]
pub struct PushMessage {
    /// Destination device token.
    pub to: String,
    pub title: String,
    pub body: String,
    /// Deep-link payload; always carries the notification id plus any
    /// domain ids so the receiving client can route.
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    pub priority: String,
}

impl PushMessage {
    pub fn new(to: String, title: String, body: String, data: serde_json::Value) -> Self {
        Self {
            to,
            title,
            body,
            data,
            sound: Some("default".to_string()),
            priority: "high".to_string(),
        }
    }
}

/// Per-message delivery ticket returned by the gateway, one per message
/// in batch order.
#[derive(Debug, Clone, Deserialize)]
pub struct PushTicket {
    /// "ok" or "error"
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<PushTicketDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushTicketDetails {
    /// Machine-readable error code, e.g. "DeviceNotRegistered".
    #[serde(default)]
    pub error: Option<String>,
}

/// Ticket constructors for scripted gateways in tests.
#[cfg(test)]
impl PushTicket {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            message: None,
            details: None,
        }
    }

    pub fn error(code: &str, message: &str) -> Self {
        Self {
            status: "error".to_string(),
            message: Some(message.to_string()),
            details: Some(PushTicketDetails {
                error: Some(code.to_string()),
            }),
        }
    }
}

/// Classified outcome of one delivery attempt for one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Token permanently unusable; deactivated so later sweeps skip it.
    InvalidToken,
    /// Worth retrying on a later sweep.
    Transient,
    RateLimited,
}

impl DeliveryOutcome {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryOutcome::Transient | DeliveryOutcome::RateLimited)
    }
}

/// Classify a per-message ticket into a delivery outcome.
///
/// Unknown error codes classify as transient; the sweep attempt cap bounds
/// how long they keep a notification pending.
pub fn classify_ticket(ticket: &PushTicket) -> DeliveryOutcome {
    if ticket.status == "ok" {
        return DeliveryOutcome::Delivered;
    }

    let code = ticket
        .details
        .as_ref()
        .and_then(|d| d.error.as_deref())
        .unwrap_or("")
        .to_lowercase();
    let message = ticket.message.as_deref().unwrap_or("").to_lowercase();

    if code.contains("devicenotregistered")
        || code.contains("invalidcredentials")
        || code.contains("invalid_token")
        || message.contains("not registered")
        || message.contains("unregistered")
        || message.contains("invalid token")
    {
        return DeliveryOutcome::InvalidToken;
    }

    if code.contains("messageratelimit")
        || code.contains("rate_limited")
        || message.contains("too many requests")
        || message.contains("rate limit")
        || message.contains("429")
    {
        return DeliveryOutcome::RateLimited;
    }

    DeliveryOutcome::Transient
}

/// Classify a whole-call gateway failure (network error, timeout,
/// non-success status). Applied to every message of the failed chunk.
pub fn classify_call_failure(err: &AppError) -> DeliveryOutcome {
    let text = err.to_string().to_lowercase();
    if text.contains("429") || text.contains("too many requests") || text.contains("rate limit") {
        DeliveryOutcome::RateLimited
    } else {
        DeliveryOutcome::Transient
    }
}

/// Outbound delivery seam in front of the external push gateway.
///
/// `send_batch` is one network round trip; callers chunk larger audiences
/// to `batch_size` messages per call.
#[async_trait]
pub trait PushGateway: Send + Sync + 'static {
    async fn send_batch(&self, messages: &[PushMessage]) -> AppResult<Vec<PushTicket>>;

    /// Gateway-imposed per-call message limit.
    fn batch_size(&self) -> usize;
}

/// HTTP push gateway client. Posts a JSON array of messages and expects a
/// JSON array of tickets, one per message, in order.
pub struct HttpPushGateway {
    client: reqwest::Client,
    url: String,
    access_token: Option<String>,
    batch_size: usize,
}

impl HttpPushGateway {
    pub fn new(config: &PushGatewayConfig) -> AppResult<Self> {
        url::Url::parse(&config.url)
            .map_err(|e| AppError::Config(format!("Invalid push gateway URL: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(AppError::Request)?;

        Ok(Self {
            client,
            url: config.url.clone(),
            access_token: config.access_token.clone(),
            batch_size: config.batch_size.max(1),
        })
    }
}

#[async_trait]
impl PushGateway for HttpPushGateway {
    async fn send_batch(&self, messages: &[PushMessage]) -> AppResult<Vec<PushTicket>> {
        let mut request = self.client.post(&self.url).json(messages);
        if let Some(ref token) = self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(AppError::Request)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Gateway(format!(
                "Push gateway returned {}: {}",
                status, body
            )));
        }

        let tickets: Vec<PushTicket> = response.json().await.map_err(AppError::Request)?;
        Ok(tickets)
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }
}
