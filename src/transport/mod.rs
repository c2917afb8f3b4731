//! Publish/subscribe transport.
//!
//! [`PubSubClient`] is the seam to a concrete broker connection. The MQTT
//! client (feature `mqtt`) talks to a real broker; [`LoopbackClient`] is an
//! in-process broker for embedding and tests. [`PubSubService`] sits on top of
//! a client, remembers every subscription, hands inbound messages to a
//! bounded worker pool and reconnects after connection loss.

use std::sync::Arc;

use crate::error::TransportError;
use crate::topic::TopicFilter;

mod loopback;
#[cfg(feature = "mqtt")]
mod mqtt;
mod service;
mod worker;

pub use loopback::LoopbackClient;
#[cfg(feature = "mqtt")]
pub use mqtt::{MqttClient, MqttConfig};
pub use service::{PubSubConfig, PubSubService};
pub use worker::{WorkerPool, WorkerPoolConfig};

/// Callback for inbound messages: `(topic, payload)`.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Callback invoked when an established connection is lost, with a reason.
pub type ConnectionLossHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// One connection to a publish/subscribe broker.
///
/// Handlers are invoked on transport-owned threads and must not block.
pub trait PubSubClient: Send + Sync {
    /// Establishes the connection. Subscriptions of a previous connection
    /// are not restored.
    fn connect(&self, host: &str, port: u16) -> Result<(), TransportError>;

    /// Closes the connection without triggering the loss handler.
    fn disconnect(&self) -> Result<(), TransportError>;

    /// Whether the connection is currently established.
    fn is_connected(&self) -> bool;

    /// Publishes a payload (at-most-once while disconnected: fails fast).
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Subscribes a handler to a topic filter.
    fn subscribe(&self, filter: &TopicFilter, handler: MessageHandler) -> Result<(), TransportError>;

    /// Removes the subscription for a topic filter.
    fn unsubscribe(&self, filter: &TopicFilter) -> Result<(), TransportError>;

    /// Installs the callback for unexpected connection loss.
    fn set_connection_loss_handler(&self, handler: ConnectionLossHandler);
}
