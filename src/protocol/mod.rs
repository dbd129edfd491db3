//! Wire formats exchanged with the monitoring device
//!
//! Inbound telemetry decoding, the outbound setpoint command and the topic
//! helpers shared by both directions.

pub mod command;
pub mod telemetry;
pub mod topics;

pub use command::{PhoneCommand, PhoneData};
pub use telemetry::{DecodeError, InternalData, TelemetryDecoder, TelemetryRecord, WeatherData};
pub use topics::{topic_matches, validate_topic_filter, TopicError, COMMAND_TOPIC};
