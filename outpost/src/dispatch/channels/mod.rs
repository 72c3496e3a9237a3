//! Channel adapters built from configuration.

mod webhook;

pub use webhook::{WebhookConfig, WebhookPublisher};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::publisher::ChannelPublisher;
use crate::{Error, Result};

/// One configured channel lane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel: String,
    /// Breaker key; defaults to the channel name.
    #[serde(default)]
    pub service: Option<String>,
    #[serde(flatten)]
    pub kind: ChannelKind,
}

/// Adapter type and its settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelKind {
    /// Generic HTTP POST adapter.
    Webhook(WebhookConfig),
}

impl ChannelConfig {
    pub fn service(&self) -> &str {
        self.service.as_deref().unwrap_or(&self.channel)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel.trim().is_empty() {
            return Err(Error::config("channel name must not be empty"));
        }
        if self.service.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(Error::config(format!(
                "channel '{}' has an empty service name",
                self.channel
            )));
        }
        match &self.kind {
            ChannelKind::Webhook(config) => config
                .validate()
                .map_err(|e| Error::config(format!("channel '{}': {e}", self.channel))),
        }
    }

    /// Build the publisher for this channel.
    pub fn build(&self) -> Result<Arc<dyn ChannelPublisher>> {
        self.validate()?;
        match &self.kind {
            ChannelKind::Webhook(config) => Ok(Arc::new(WebhookPublisher::new(
                self.channel.clone(),
                self.service().to_string(),
                config.clone(),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_webhook_channel() {
        let config: ChannelConfig = serde_json::from_str(
            r#"{
                "channel": "meta_facebook",
                "service": "meta",
                "type": "webhook",
                "url": "https://publish.example.com/facebook"
            }"#,
        )
        .unwrap();

        assert_eq!(config.service(), "meta");
        let ChannelKind::Webhook(webhook) = &config.kind;
        assert_eq!(webhook.timeout_secs, 30);
        assert_eq!(webhook.remote_id_pointer, "/id");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_service_defaults_to_channel() {
        let config: ChannelConfig = serde_json::from_str(
            r#"{"channel":"linkedin","type":"webhook","url":"http://localhost:9000/post"}"#,
        )
        .unwrap();
        assert_eq!(config.service(), "linkedin");
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let config: ChannelConfig = serde_json::from_str(
            r#"{"channel":"linkedin","type":"webhook","url":"ftp://example.com"}"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
        assert!(config.build().is_err());
    }
}
