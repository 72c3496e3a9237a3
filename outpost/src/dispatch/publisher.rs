//! The channel-side contract: publish a payload, get a remote id or a
//! classified error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::classify::looks_transient;

/// How a publish attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// The platform throttled us.
    RateLimited,
    Timeout,
    /// Connection-level failure before a response arrived.
    Network,
    /// The platform refused this request.
    Rejected,
    /// The payload itself is unusable.
    Invalid,
    Other,
}

/// A failed publish, carrying its own retryability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct PublishError {
    pub message: String,
    pub retryable: bool,
    pub kind: ErrorKind,
}

impl PublishError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            message: message.into(),
            retryable,
            kind,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message, true)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message, true)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message, true)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Rejected, message, false)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invalid, message, false)
    }

    /// An error the channel could not classify.
    ///
    /// Network- or timeout-shaped messages get the matching kind. Everything
    /// is retryable: an unknown failure must not silently drop a job, and the
    /// attempt ceiling bounds the retries.
    pub fn unclassified(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = looks_transient(&message).unwrap_or(ErrorKind::Other);
        Self::new(kind, message, true)
    }
}

/// Secondary action to schedule after a successful publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUp {
    pub channel: String,
    pub payload: Value,
    /// Delay after the parent completes.
    #[serde(default)]
    pub delay_secs: u64,
    /// Distinguishes several follow-ups of one parent on the same channel.
    #[serde(default)]
    pub discriminator: String,
}

/// What a channel returns on success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub remote_id: Option<String>,
    pub follow_up: Option<FollowUp>,
}

impl PublishReceipt {
    pub fn new(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: Some(remote_id.into()),
            follow_up: None,
        }
    }

    pub fn with_follow_up(mut self, follow_up: FollowUp) -> Self {
        self.follow_up = Some(follow_up);
        self
    }
}

/// A client for one external platform lane.
#[async_trait]
pub trait ChannelPublisher: Send + Sync {
    /// Channel name this publisher serves.
    fn channel(&self) -> &str;

    /// Circuit breaker key. Channels on the same platform share one.
    fn service(&self) -> &str {
        self.channel()
    }

    async fn publish(&self, payload: &Value) -> Result<PublishReceipt, PublishError>;
}
