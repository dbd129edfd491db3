//! Observability: structured logging and per-session counters

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};
pub use metrics::{MetricsSnapshot, SessionMetrics};

pub use logging::{mqtt_span, session_span, telemetry_span};
