//! MQTT client I/O
//!
//! Owns the rumqttc client, runs the event loop under a reconnection
//! supervisor and forwards inbound publishes to the session.

use super::connection::{configure_mqtt_options, ConnectionState, MqttError, ReconnectConfig};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, MessageForwarder, MessageHandler};
use crate::config::{redact_broker_url, MqttSection};
use crate::transport::{InboundMessage, Transport};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::PublishProperties;
use rumqttc::v5::{AsyncClient, ConnectionError, EventLoop};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Capacity of the rumqttc request channel
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// MQTT transport for the dashboard
pub struct MqttClient {
    config: MqttSection,
    client: Arc<Mutex<AsyncClient>>,
    /// Taken by `connect`; the mutex keeps the client `Sync`
    event_loop: Option<Mutex<EventLoop>>,
    event_loop_handle: Option<JoinHandle<()>>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    state_tx: Option<watch::Sender<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    reconnect_config: ReconnectConfig,
    /// Shared with the supervisor so every ConnAck restores them
    subscribed_topics: Arc<Mutex<Vec<String>>>,
    message_forwarder: Arc<Mutex<MessageForwarder>>,
}

impl MqttClient {
    pub fn new(config: MqttSection) -> Result<Self, MqttError> {
        let mqtt_options = configure_mqtt_options(&config)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        Ok(MqttClient {
            config,
            client: Arc::new(Mutex::new(client)),
            event_loop: Some(Mutex::new(event_loop)),
            event_loop_handle: None,
            state_rx: None,
            state_tx: None,
            shutdown_tx: None,
            reconnect_config: ReconnectConfig::default(),
            subscribed_topics: Arc::new(Mutex::new(Vec::new())),
            message_forwarder: Arc::new(Mutex::new(MessageForwarder::new())),
        })
    }

    /// Replace the reconnect policy; only effective before `connect`
    pub fn with_reconnect_config(
        mut self,
        reconnect_config: ReconnectConfig,
    ) -> Result<Self, MqttError> {
        HealthMonitor::validate_connection_config(&reconnect_config)
            .map_err(MqttError::InvalidReconnectConfig)?;
        self.reconnect_config = reconnect_config;
        Ok(self)
    }

    /// Topics restored after every reconnect
    pub async fn subscribed_topics(&self) -> Vec<String> {
        self.subscribed_topics.lock().await.clone()
    }

    #[allow(clippy::type_complexity)]
    fn setup_connection_channels() -> (
        (
            watch::Sender<ConnectionState>,
            watch::Receiver<ConnectionState>,
        ),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        (
            watch::channel(ConnectionState::Connecting),
            watch::channel(false),
        )
    }

    /// Wait until the supervisor reports a ConnAck
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let wait = async {
            loop {
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailedStr(
                        "State channel closed".to_string(),
                    ));
                }
                match *state_rx.borrow() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(ref reason) => {
                        return Err(MqttError::ConnectionFailedStr(reason.clone()));
                    }
                    ConnectionState::PermanentlyDisconnected(ref reason) => {
                        return Err(MqttError::ConnectionFailedStr(format!(
                            "Permanently disconnected: {reason}"
                        )));
                    }
                    ConnectionState::Connecting | ConnectionState::Reconnecting(_) => continue,
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectTimeout(timeout)),
        }
    }

    /// Start the event loop supervisor and wait for the first ConnAck.
    ///
    /// An error here does not stop the supervisor; it keeps reconnecting in
    /// the background until `disconnect` is called.
    pub async fn connect(&mut self) -> Result<(), MqttError> {
        let event_loop = self
            .event_loop
            .take()
            .ok_or_else(|| {
                MqttError::ConnectionFailedStr("Event loop already started".to_string())
            })?
            .into_inner();

        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) =
            Self::setup_connection_channels();
        self.state_rx = Some(state_rx.clone());
        self.state_tx = Some(state_tx.clone());
        self.shutdown_tx = Some(shutdown_tx);

        let supervisor = Supervisor {
            config: self.config.clone(),
            reconnect_config: self.reconnect_config.clone(),
            client: self.client.clone(),
            subscribed_topics: self.subscribed_topics.clone(),
            message_forwarder: self.message_forwarder.clone(),
            state_tx,
            shutdown_rx,
            reconnect_attempts: 0,
        };

        let span = crate::mqtt_span!(broker = %redact_broker_url(&self.config.broker_url));
        self.event_loop_handle = Some(tokio::spawn(supervisor.run(event_loop).instrument(span)));

        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        Self::wait_for_connection_confirmation(state_rx, timeout).await
    }

    /// Stop the supervisor and close the connection
    pub async fn disconnect(&mut self) -> Result<(), MqttError> {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
            debug!("Sent shutdown signal to reconnection supervisor");
        }

        // The broker may already be gone; a failed DISCONNECT is not worth surfacing
        if let Err(e) = self.client.lock().await.disconnect().await {
            debug!(error = %e, "MQTT disconnect request failed");
        }

        if let Some(state_tx) = &self.state_tx {
            let _ = state_tx.send(ConnectionState::Disconnected(
                "Client disconnected".to_string(),
            ));
        }

        if let Some(handle) = self.event_loop_handle.take() {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => debug!("Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!(error = %e, "Event loop task ended with error");
                }
                Err(_) => warn!("Event loop task didn't shut down gracefully, forcing abort"),
                _ => {}
            }
        }

        info!("MQTT client disconnected");
        Ok(())
    }

    /// `None` before `connect` was called
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    pub fn is_permanently_disconnected(&self) -> bool {
        matches!(
            self.connection_state(),
            Some(ConnectionState::PermanentlyDisconnected(_))
        )
    }

    fn check_connection_state(&self) -> Result<(), MqttError> {
        let state_rx = self.state_rx.as_ref().ok_or_else(|| {
            MqttError::ConnectionFailedStr("Client not connected".to_string())
        })?;

        let current_state = state_rx.borrow().clone();
        if !HealthMonitor::can_publish(&current_state) {
            return Err(MqttError::NotConnected {
                state: current_state,
            });
        }
        Ok(())
    }

    /// Subscribe to a topic filter.
    ///
    /// The topic is tracked first; when not connected the subscribe request
    /// is deferred to the next ConnAck.
    pub async fn subscribe(&mut self, topic: &str) -> Result<(), MqttError> {
        {
            let mut topics = self.subscribed_topics.lock().await;
            if !topics.iter().any(|t| t == topic) {
                topics.push(topic.to_string());
            }
        }

        let connected = self
            .connection_state()
            .is_some_and(|state| HealthMonitor::can_subscribe(&state));
        if !connected {
            info!(topic, "Not connected yet, subscription deferred until ConnAck");
            return Ok(());
        }

        let client = self.client.lock().await;
        client
            .subscribe(topic, MessageHandler::subscription_qos())
            .await
            .map_err(|e| MqttError::SubscriptionFailed {
                topic: topic.to_string(),
                source: Box::new(e),
            })?;

        info!(topic, "Subscribed");
        Ok(())
    }

    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), MqttError> {
        self.check_connection_state()?;

        let qos = MessageHandler::determine_qos_level(retain);
        let client = self.client.lock().await;
        client
            .publish_with_properties(topic, qos, retain, payload, PublishProperties::default())
            .await
            .map_err(|e| MqttError::PublishFailed {
                topic: topic.to_string(),
                source: Box::new(e),
            })?;

        debug!(topic, ?qos, retain, "Published");
        Ok(())
    }
}

/// Background task that polls the event loop and reconnects on failure
struct Supervisor {
    config: MqttSection,
    reconnect_config: ReconnectConfig,
    client: Arc<Mutex<AsyncClient>>,
    subscribed_topics: Arc<Mutex<Vec<String>>>,
    message_forwarder: Arc<Mutex<MessageForwarder>>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_rx: watch::Receiver<bool>,
    reconnect_attempts: u32,
}

impl Supervisor {
    async fn run(mut self, mut event_loop: EventLoop) {
        info!("Starting MQTT event loop with reconnection supervisor");

        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping reconnection supervisor");
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    let keep_running = match event_result {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            self.process_event_route(route, &mut event_loop).await
                        }
                        Err(e) => self.handle_event_loop_error(e, &mut event_loop).await,
                    };
                    if !keep_running {
                        break;
                    }
                }
            }
        }

        info!("MQTT event loop stopped");
    }

    fn transition(&self, event: ConnectionEvent) {
        let next = HealthMonitor::determine_next_state(event);
        let previous = self.state_tx.send_replace(next.clone());
        HealthMonitor::log_state_transition(&previous, &next);
    }

    /// Returns false when the supervisor should stop
    async fn process_event_route(&mut self, route: EventRoute, event_loop: &mut EventLoop) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                self.transition(ConnectionEvent::ConnAckReceived);
                self.reconnect_attempts = 0;
                let _ = self.resubscribe_to_topics().await;
                true
            }
            EventRoute::MessageReceived(message) => {
                self.handle_message_received(message).await;
                true
            }
            EventRoute::Disconnected => {
                self.transition(ConnectionEvent::DisconnectedByBroker);
                self.attempt_reconnection(event_loop).await
            }
            EventRoute::SubscriptionConfirmed { packet_id, filters } => {
                debug!(packet_id, filters, "Subscription confirmed");
                true
            }
            EventRoute::InfrastructureEvent(event) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    async fn handle_event_loop_error(
        &mut self,
        error: ConnectionError,
        event_loop: &mut EventLoop,
    ) -> bool {
        // Only the first failure of an outage is worth an error line
        if self.reconnect_attempts == 0 {
            error!(error = %error, "MQTT event loop error");
        } else {
            debug!(error = %error, attempt = self.reconnect_attempts, "MQTT reconnect failed");
        }
        self.transition(ConnectionEvent::NetworkError(error.to_string()));
        self.attempt_reconnection(event_loop).await
    }

    async fn handle_message_received(&self, message: InboundMessage) {
        let forwarder = self.message_forwarder.lock().await;
        if let Err(e) = forwarder.forward(message).await {
            error!("Failed to forward inbound message: {}", e);
        }
    }

    /// Queue a SUBSCRIBE for every tracked topic from a separate task.
    ///
    /// The caller is the task polling the event loop, so it must not wait on
    /// the request channel.
    async fn resubscribe_to_topics(&self) -> JoinHandle<()> {
        let topics = self.subscribed_topics.lock().await.clone();
        let client = self.client.lock().await.clone();
        tokio::spawn(async move {
            for topic in topics {
                match client
                    .subscribe(topic.as_str(), MessageHandler::subscription_qos())
                    .await
                {
                    Ok(()) => info!(topic = %topic, "Subscribed"),
                    Err(e) => error!(topic = %topic, error = %e, "Failed to subscribe"),
                }
            }
        })
    }

    /// Sleep that ends early on shutdown. Returns false if shutdown was requested.
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }

    async fn attempt_reconnection(&mut self, event_loop: &mut EventLoop) -> bool {
        let decision = HealthMonitor::should_attempt_reconnection(
            self.reconnect_attempts,
            &self.reconnect_config,
            *self.shutdown_rx.borrow(),
        );

        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                self.reconnect_attempts = attempt;
                self.transition(ConnectionEvent::ReconnectionStarted(attempt));
                debug!(attempt, delay_ms, "Scheduling reconnection");

                if !Self::interruptible_sleep(self.shutdown_rx.clone(), delay_ms).await {
                    return false;
                }
                if *self.shutdown_rx.borrow() {
                    return false;
                }

                self.apply_new_connection(event_loop).await;
                true
            }
            ReconnectionDecision::AbortShutdownRequested => {
                info!("Shutdown signal received, stopping reconnection");
                false
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                let reason = format!(
                    "Max reconnection attempts ({}) exceeded",
                    self.reconnect_attempts
                );
                self.transition(ConnectionEvent::PermanentFailure(reason));
                false
            }
        }
    }

    /// Swap in a fresh client and event loop
    async fn apply_new_connection(&self, event_loop: &mut EventLoop) {
        match configure_mqtt_options(&self.config) {
            Ok(options) => {
                let (client, new_event_loop) =
                    AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
                *event_loop = new_event_loop;
                *self.client.lock().await = client;
                debug!("Created new connection for reconnection attempt");
            }
            Err(e) => error!(error = %e, "Failed to create new connection"),
        }
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        MqttClient::connect(self).await
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        MqttClient::disconnect(self).await
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error> {
        MqttClient::subscribe(self, topic).await
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), Self::Error> {
        MqttClient::publish(self, topic, payload, retain).await
    }

    fn is_connected(&self) -> bool {
        matches!(self.connection_state(), Some(ConnectionState::Connected))
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        MqttClient::connection_state(self)
    }

    fn is_permanently_disconnected(&self) -> bool {
        MqttClient::is_permanently_disconnected(self)
    }

    async fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        self.message_forwarder.lock().await.set_sender(sender);
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> MqttSection {
        MqttSection::new("mqtt://localhost:1883", "/topic/esp32data")
    }

    #[test]
    fn test_setup_connection_channels() {
        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) =
            MqttClient::setup_connection_channels();

        assert_eq!(*state_rx.borrow(), ConnectionState::Connecting);
        assert!(!(*shutdown_rx.borrow()));

        state_tx.send(ConnectionState::Connected).unwrap();
        assert_eq!(*state_rx.borrow(), ConnectionState::Connected);

        shutdown_tx.send(true).unwrap();
        assert!(*shutdown_rx.borrow());
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_success() {
        let ((state_tx, state_rx), _) = MqttClient::setup_connection_channels();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Reconnecting(1));
            let _ = state_tx.send(ConnectionState::Connected);
            // Keep the sender alive until the waiter has seen the value
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(500))
                .await;
        assert!(result.is_ok(), "Should successfully wait for connection");
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_timeout() {
        let ((state_tx, state_rx), _) = MqttClient::setup_connection_channels();

        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(50))
                .await;
        assert!(matches!(result, Err(MqttError::ConnectTimeout(_))));
        drop(state_tx);
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_disconnected() {
        let ((state_tx, state_rx), _) = MqttClient::setup_connection_channels();

        state_tx
            .send(ConnectionState::Disconnected("connection refused".to_string()))
            .unwrap();

        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(100))
                .await;
        match result {
            Err(MqttError::ConnectionFailedStr(reason)) => {
                assert_eq!(reason, "connection refused")
            }
            other => panic!("expected ConnectionFailedStr, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_new_client_is_not_connected() {
        let client = MqttClient::new(test_config()).unwrap();

        assert_eq!(client.connection_state(), None);
        assert!(!Transport::is_connected(&client));
        assert!(!client.is_permanently_disconnected());
    }

    #[tokio::test]
    async fn test_new_client_rejects_invalid_url() {
        let config = MqttSection::new("ftp://localhost", "/topic/esp32data");
        assert!(matches!(
            MqttClient::new(config),
            Err(MqttError::InvalidBrokerUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_with_reconnect_config_validates() {
        let limited = ReconnectConfig {
            max_attempts: Some(3),
            ..Default::default()
        };
        assert!(MqttClient::new(test_config())
            .unwrap()
            .with_reconnect_config(limited)
            .is_ok());

        let invalid = ReconnectConfig {
            max_attempts: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            MqttClient::new(test_config())
                .unwrap()
                .with_reconnect_config(invalid),
            Err(MqttError::InvalidReconnectConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_publish_before_connect_fails() {
        let client = MqttClient::new(test_config()).unwrap();

        let result = client
            .publish("/topic/phoneData", b"{\"phoneData\":{}}".to_vec(), false)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_subscribe_before_connect_is_deferred() {
        let mut client = MqttClient::new(test_config()).unwrap();

        client.subscribe("/topic/esp32data").await.unwrap();
        client.subscribe("/topic/esp32data").await.unwrap();

        assert_eq!(client.subscribed_topics().await, vec!["/topic/esp32data"]);
    }

    #[test]
    fn test_client_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MqttClient>();
    }

    #[tokio::test]
    async fn test_resubscribe_does_not_block_on_full_request_channel() {
        let options = configure_mqtt_options(&test_config()).unwrap();
        let (client, _event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let topics: Vec<String> = (0..REQUEST_CHANNEL_CAPACITY * 3)
            .map(|i| format!("/topic/sensor{i}"))
            .collect();
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Connected);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let supervisor = Supervisor {
            config: test_config(),
            reconnect_config: ReconnectConfig::default(),
            client: Arc::new(Mutex::new(client)),
            subscribed_topics: Arc::new(Mutex::new(topics)),
            message_forwarder: Arc::new(Mutex::new(MessageForwarder::new())),
            state_tx,
            shutdown_rx,
            reconnect_attempts: 0,
        };

        // Nobody polls the event loop, so the channel fills after ten requests
        let task = tokio::time::timeout(
            Duration::from_millis(500),
            supervisor.resubscribe_to_topics(),
        )
        .await
        .expect("resubscribe must return while the request channel is full");

        assert!(!task.is_finished());
        task.abort();
    }

    #[tokio::test]
    async fn test_connect_twice_fails() {
        let mut client = MqttClient::new(test_config()).unwrap();
        // Steal the event loop so the second path is exercised without a broker
        client.event_loop.take();

        let result = client.connect().await;
        assert!(matches!(result, Err(MqttError::ConnectionFailedStr(_))));
    }
}
