//! Publish/subscribe transport
//!
//! The session talks to the broker only through [`Transport`], so tests can
//! swap in a mock and the MQTT client stays replaceable.

use tokio::sync::mpsc;

pub mod mqtt;

pub use mqtt::ConnectionState;

/// A message delivered by the broker on a subscribed topic
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: false,
        }
    }
}

/// Transport abstraction for the dashboard session
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connect to the broker
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Disconnect and stop background work
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Subscribe to a topic filter. The subscription is kept across reconnects.
    async fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error>;

    /// Publish a payload; fire-and-forget, no acknowledgement is awaited
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool)
        -> Result<(), Self::Error>;

    fn is_connected(&self) -> bool;

    /// Current connection state, `None` before the first connect
    fn connection_state(&self) -> Option<ConnectionState>;

    fn is_permanently_disconnected(&self) -> bool;

    /// Where incoming messages are forwarded
    async fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>);
}
