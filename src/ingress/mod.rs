//! Event ingress
//!
//! Broker messages are parsed into `UserEvent`s and applied to the feature
//! store by a single long-lived consumer task.

mod consumer;
mod message;
mod source;

pub use consumer::{ConsumerHandle, ConsumerStats, EventConsumer, DEFAULT_RETRY_BACKOFF};
pub use message::EventMessage;
pub use source::{channel, ChannelEventSource, Delivery, EventPublisher, EventSource, PublishError};
