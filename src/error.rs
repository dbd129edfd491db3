//! Top-level error type for the dashboard core
//!
//! Each layer keeps its own error enum; this one gathers them for callers
//! that drive the whole session (the binary, integration tests).

use crate::config::ConfigError;
use crate::protocol::{DecodeError, TopicError};
use crate::storage::PersistenceError;
use crate::transport::mqtt::MqttError;
use thiserror::Error;

/// Main error type for dashboard operations
#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("Telemetry decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Transport error: {0}")]
    Transport(#[from] MqttError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid topic: {0}")]
    Topic(#[from] TopicError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session is no longer running")]
    SessionClosed,

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl DashboardError {
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}

/// Result alias for dashboard operations
pub type DashboardResult<T> = Result<T, DashboardError>;
