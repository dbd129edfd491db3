//! envdash - telemetry ingestion and setpoint control for an environmental
//! monitoring dashboard
//!
//! # Overview
//!
//! A microcontroller publishes sensor and weather telemetry over MQTT; the
//! dashboard shows it and sends user-controlled setpoints back. This crate is
//! the core of that dashboard:
//! - Telemetry decoding with explicit optional fields
//! - State reconciliation: sparse merges, air-quality index, hazard flags
//! - Setpoint commands gated on the restored stored setpoints
//! - Setpoint persistence across restarts
//! - An MQTT transport with reconnection
//!
//! # Quick Start
//!
//! ```rust
//! use envdash::protocol::TelemetryDecoder;
//! use envdash::state::{StateReconciler, UserIntent};
//!
//! let payload = br#"{"internal_data":{"gas_resistance":1000,"internal_humidity":50},
//!                    "weather_data":{"weather_alert_description":"Heavy Rain and Fog expected"}}"#;
//! let record = TelemetryDecoder::decode(payload).unwrap();
//!
//! let mut reconciler = StateReconciler::new();
//! reconciler.apply_telemetry(&record);
//! assert!(reconciler.hazards().rain && reconciler.hazards().fog);
//!
//! let delta = reconciler.apply_user_intent(UserIntent::SetDesiredTemperature(35.0));
//! assert_eq!(delta.setpoints.desired_temperature, 30.0);
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod publisher;
pub mod session;
pub mod state;
pub mod storage;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, DashboardConfig};
pub use error::{DashboardError, DashboardResult};
pub use protocol::{DecodeError, PhoneCommand, TelemetryDecoder, TelemetryRecord, COMMAND_TOPIC};
pub use publisher::CommandPublisher;
pub use session::{Session, SessionEvent, SessionHandle};
pub use state::{DashboardSnapshot, Readiness, StateDelta, StateReconciler, UserIntent};
pub use storage::{JsonFileStore, PersistenceError, SetpointStore};
pub use transport::mqtt::MqttClient;
