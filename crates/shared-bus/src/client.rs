//! # Bus Client
//!
//! The narrow contract the relay consumes from a message bus: receive with a
//! bounded wait, acknowledge, negative-acknowledge, produce and close.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::events::{MessageId, OutboundMessage, RawMessage};
use crate::shutdown::ShutdownSignal;

/// Errors from bus operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The bus connection has been closed.
    #[error("Bus connection closed")]
    Closed,

    /// Ack/nack for a message that is not currently in flight.
    #[error("Message {0} is not in flight")]
    UnknownMessage(MessageId),

    /// Any transport-level failure.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result of a single bounded receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A message was delivered and is now in flight.
    Message(RawMessage),
    /// The wait elapsed with nothing to deliver.
    Timeout,
    /// The shutdown signal fired while waiting.
    Cancelled,
}

/// Client side of a durable message bus.
///
/// Every message returned by [`BusClient::receive`] must be settled by
/// exactly one call to [`BusClient::acknowledge`] or
/// [`BusClient::negative_acknowledge`].
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Wait up to `timeout` for the next message on the consumer topic.
    async fn receive(
        &self,
        timeout: Duration,
        shutdown: &mut ShutdownSignal,
    ) -> Result<Received, BusError>;

    /// Confirm processing; the message will not be redelivered.
    async fn acknowledge(&self, message: &RawMessage) -> Result<(), BusError>;

    /// Report a processing failure; the message will be redelivered.
    async fn negative_acknowledge(&self, message: &RawMessage) -> Result<(), BusError>;

    /// Publish a message to `topic`.
    async fn produce(&self, topic: &str, message: OutboundMessage) -> Result<MessageId, BusError>;

    /// Release the connection.
    async fn close(&self) -> Result<(), BusError>;
}

#[async_trait]
impl<T: BusClient + ?Sized> BusClient for Arc<T> {
    async fn receive(
        &self,
        timeout: Duration,
        shutdown: &mut ShutdownSignal,
    ) -> Result<Received, BusError> {
        (**self).receive(timeout, shutdown).await
    }

    async fn acknowledge(&self, message: &RawMessage) -> Result<(), BusError> {
        (**self).acknowledge(message).await
    }

    async fn negative_acknowledge(&self, message: &RawMessage) -> Result<(), BusError> {
        (**self).negative_acknowledge(message).await
    }

    async fn produce(&self, topic: &str, message: OutboundMessage) -> Result<MessageId, BusError> {
        (**self).produce(topic, message).await
    }

    async fn close(&self) -> Result<(), BusError> {
        (**self).close().await
    }
}
