//! Dispatch of claimed jobs to channel publishers.
//!
//! Each channel has one [`Dispatcher`] wrapping its [`ChannelPublisher`] in
//! the circuit breaker of the publisher's service. The
//! [`DispatcherRegistry`] routes a claimed job to its channel's dispatcher.

pub mod channels;
mod classify;
mod dispatcher;
mod follow_up;
mod publisher;
mod registry;

pub use channels::{ChannelConfig, ChannelKind, WebhookConfig, WebhookPublisher};
pub use classify::{looks_transient, panic_message};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use follow_up::follow_up_key;
pub use publisher::{ChannelPublisher, ErrorKind, FollowUp, PublishError, PublishReceipt};
pub use registry::{DispatcherRegistry, NO_DISPATCHER_MESSAGE};
