//! Topic constants and MQTT topic-filter matching
//!
//! The dashboard listens on one configured telemetry filter and writes commands
//! to a single fixed topic the device firmware subscribes to.

use thiserror::Error;

/// Outbound topic the device listens on for setpoint commands
pub const COMMAND_TOPIC: &str = "/topic/phoneData";

/// Check whether a concrete topic name matches a subscription filter.
///
/// Supports the MQTT wildcards `+` (exactly one level) and `#` (this level and
/// everything below). Levels are compared literally, so `/a/b` and `a/b` are
/// different topics.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Validate a subscription filter
pub fn validate_topic_filter(filter: &str) -> Result<(), TopicError> {
    if filter.is_empty() {
        return Err(TopicError::Empty);
    }

    let levels: Vec<&str> = filter.split('/').collect();
    for (index, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || index != levels.len() - 1) {
            return Err(TopicError::MisplacedMultiLevelWildcard(filter.to_string()));
        }
        if level.contains('+') && *level != "+" {
            return Err(TopicError::MisplacedSingleLevelWildcard(filter.to_string()));
        }
    }

    Ok(())
}

/// Topic filter validation errors
#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic filter cannot be empty")]
    Empty,
    #[error("'#' must be the last level on its own: {0}")]
    MisplacedMultiLevelWildcard(String),
    #[error("'+' must occupy a whole level: {0}")]
    MisplacedSingleLevelWildcard(String),
}
