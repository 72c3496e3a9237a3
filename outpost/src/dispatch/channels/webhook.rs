//! Generic webhook publisher.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::dispatch::publisher::{ChannelPublisher, ErrorKind, PublishError, PublishReceipt};
use crate::utils::http_client::build_channel_client;
use crate::utils::text::truncate_chars;

/// Longest upstream body excerpt carried in an error message.
const BODY_EXCERPT_CHARS: usize = 500;

/// Webhook channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Endpoint that receives the payload as a JSON POST.
    pub url: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// JSON pointer to the remote id in the response body.
    #[serde(default = "default_remote_id_pointer")]
    pub remote_id_pointer: String,
}

fn default_timeout() -> u64 {
    30
}

fn default_remote_id_pointer() -> String {
    "/id".to_string()
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bearer_token: None,
            timeout_secs: default_timeout(),
            remote_id_pointer: default_remote_id_pointer(),
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        let url = reqwest::Url::parse(&self.url)
            .map_err(|e| format!("invalid webhook url '{}': {e}", self.url))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!("webhook url '{}' must be http or https", self.url));
        }
        if !self.remote_id_pointer.is_empty() && !self.remote_id_pointer.starts_with('/') {
            return Err(format!(
                "remote_id_pointer '{}' must be empty or start with '/'",
                self.remote_id_pointer
            ));
        }
        Ok(())
    }
}

/// Publishes payloads by POSTing them to an HTTP endpoint.
pub struct WebhookPublisher {
    channel: String,
    service: String,
    config: WebhookConfig,
    client: Client,
}

impl WebhookPublisher {
    pub fn new(channel: String, service: String, config: WebhookConfig) -> Self {
        let client = build_channel_client(Duration::from_secs(config.timeout_secs));
        Self {
            channel,
            service,
            config,
            client,
        }
    }

    fn remote_id_from_body(&self, body: &str) -> Option<String> {
        if body.trim().is_empty() || self.config.remote_id_pointer.is_empty() {
            return None;
        }
        match serde_json::from_str::<Value>(body) {
            Ok(value) => extract_remote_id(&value, &self.config.remote_id_pointer),
            Err(e) => {
                warn!(
                    channel = %self.channel,
                    error = %e,
                    body = truncate_chars(body.trim(), BODY_EXCERPT_CHARS),
                    "Webhook accepted the post with a non-JSON body; no remote id recorded"
                );
                None
            }
        }
    }
}

#[async_trait]
impl ChannelPublisher for WebhookPublisher {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn service(&self) -> &str {
        &self.service
    }

    async fn publish(&self, payload: &Value) -> Result<PublishReceipt, PublishError> {
        let mut request = self.client.post(&self.config.url).json(payload);
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        // Accepted by the platform; nothing past this point is an error.
        let remote_id = match response.text().await {
            Ok(body) => self.remote_id_from_body(&body),
            Err(e) => {
                warn!(
                    channel = %self.channel,
                    status = %status,
                    error = %e,
                    "Webhook accepted the post but its response body could not be read"
                );
                None
            }
        };

        debug!(channel = %self.channel, remote_id = ?remote_id, "Webhook publish accepted");
        Ok(PublishReceipt {
            remote_id,
            follow_up: None,
        })
    }
}

/// Map a non-success HTTP status to a classified error.
fn classify_status(status: StatusCode, body: &str) -> PublishError {
    let excerpt = truncate_chars(body.trim(), BODY_EXCERPT_CHARS);
    let message = if excerpt.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {excerpt}")
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS => PublishError::rate_limited(message),
        StatusCode::REQUEST_TIMEOUT => PublishError::timeout(message),
        s if s.is_server_error() => PublishError::new(ErrorKind::Other, message, true),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            PublishError::invalid(message)
        }
        s if s.is_client_error() => PublishError::rejected(message),
        // 1xx/3xx that reqwest did not resolve.
        _ => PublishError::unclassified(message),
    }
}

fn transport_error(err: reqwest::Error) -> PublishError {
    let message = err.to_string();
    if err.is_timeout() {
        PublishError::timeout(message)
    } else if err.is_connect() || err.is_request() || err.is_body() {
        PublishError::network(message)
    } else {
        PublishError::unclassified(message)
    }
}

fn extract_remote_id(body: &Value, pointer: &str) -> Option<String> {
    match body.pointer(pointer)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
