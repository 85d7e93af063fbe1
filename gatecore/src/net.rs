use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::protocol::message::Topic;

/// An event produced by the transport layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport has successfully connected and subscribed.
    Connected,
    /// A message was published on a subscribed topic.
    Message { topic: String, payload: Bytes },
    /// The connection was lost.
    Disconnected,
}

/// Represents an active publish/subscribe connection.
///
/// Delivery is at most once with no ordering guarantee; the session protocol
/// owns every retry decision.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publishes `payload` on `topic`.
    async fn publish(&self, topic: Topic, payload: &[u8]) -> Result<()>;

    /// Closes the connection.
    async fn disconnect(&self);
}

/// A factory responsible for creating new transport instances.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Connects, subscribes to the inbound topics and returns the transport
    /// along with its stream of events.
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>)>;
}
