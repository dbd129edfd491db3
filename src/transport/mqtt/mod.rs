//! MQTT transport built on rumqttc (v5)
//!
//! Split into pure and impure parts:
//!
//! - [`connection`] - connection state, reconnect policy, client options
//! - [`message_handler`] - event routing and inbound filtering
//! - [`health_monitor`] - reconnection decisions and state transitions
//! - [`client`] - the I/O: event loop supervisor, publish, subscribe
//!
//! ```rust,no_run
//! use envdash::config::MqttSection;
//! use envdash::transport::mqtt::MqttClient;
//!
//! # tokio_test::block_on(async {
//! let config = MqttSection::new("mqtt://localhost:1883", "/topic/esp32data");
//! let mut client = MqttClient::new(config)?;
//! client.connect().await?;
//! client.subscribe("/topic/esp32data").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{ConnectionState, MqttError, ReconnectConfig};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, MessageHandler};
