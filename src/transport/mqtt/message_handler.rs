//! Pure routing of rumqttc events plus inbound message forwarding

use crate::transport::InboundMessage;
use rumqttc::v5::{mqttbytes::QoS, Event};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Pure decisions about MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Classify an event from the rumqttc event loop
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => {
                use rumqttc::v5::mqttbytes::v5::Packet;
                match incoming {
                    Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                    Packet::Publish(publish) => EventRoute::MessageReceived(InboundMessage {
                        topic: String::from_utf8_lossy(&publish.topic).to_string(),
                        payload: publish.payload.to_vec(),
                        retain: publish.retain,
                    }),
                    Packet::Disconnect(_) => EventRoute::Disconnected,
                    Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                        packet_id: suback.pkid,
                        filters: suback.return_codes.len(),
                    },
                    other => EventRoute::InfrastructureEvent(format!("{other:?}")),
                }
            }
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// QoS for outbound publishes. Commands are fire-and-forget, so QoS 0
    /// unless the message is retained.
    pub fn determine_qos_level(retain: bool) -> QoS {
        match retain {
            true => QoS::AtLeastOnce,
            false => QoS::AtMostOnce,
        }
    }

    /// QoS requested for the telemetry subscription
    pub fn subscription_qos() -> QoS {
        QoS::AtLeastOnce
    }
}

/// Routing decision for one MQTT event
#[derive(Debug, Clone)]
pub enum EventRoute {
    ConnectionAcknowledged,
    MessageReceived(InboundMessage),
    /// Broker sent DISCONNECT
    Disconnected,
    SubscriptionConfirmed { packet_id: u16, filters: usize },
    /// PingResp and the like
    InfrastructureEvent(String),
    OutgoingEvent,
}

/// Hands inbound messages to the session queue
#[derive(Default)]
pub struct MessageForwarder {
    sender: Option<mpsc::Sender<InboundMessage>>,
}

impl MessageForwarder {
    pub fn new() -> Self {
        Self { sender: None }
    }

    pub fn set_sender(&mut self, sender: mpsc::Sender<InboundMessage>) {
        self.sender = Some(sender);
    }

    pub async fn forward(&self, message: InboundMessage) -> Result<(), String> {
        match &self.sender {
            Some(sender) => {
                debug!(topic = %message.topic, bytes = message.payload.len(), "Forwarding inbound message");
                sender
                    .send(message)
                    .await
                    .map_err(|e| format!("Session queue closed: {e}"))
            }
            None => {
                warn!(topic = %message.topic, "Received MQTT message but no receiver is set - message dropped");
                Err("No message sender configured".to_string())
            }
        }
    }
}
