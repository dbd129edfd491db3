//! Telemetry decoding for device reports
//!
//! The device publishes UTF-8 JSON shaped as
//! `{ "internal_data": { .. }, "weather_data": { .. } }` where both groups and
//! every leaf inside them are optional. Decoding is pure: it turns the payload
//! into a [`TelemetryRecord`] whose fields are `None` when absent, so callers
//! can tell "not reported" apart from a reported zero.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Readings from the device's own sensors plus its echoed configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InternalData {
    pub internal_temperature: Option<f64>,
    pub internal_humidity: Option<f64>,
    pub gas_resistance: Option<f64>,
    pub desired_temperature: Option<f64>,
    pub window_deg: Option<f64>,
    pub is_auto: Option<bool>,
}

/// Weather report relayed by the device
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WeatherData {
    pub weather_temperature: Option<f64>,
    pub weather_humidity: Option<f64>,
    pub weather_wind_speed: Option<f64>,
    pub weather_wind_deg: Option<f64>,
    pub weather_alert_event: Option<String>,
    pub weather_alert_description: Option<String>,
}

impl WeatherData {
    /// True when either alert text field is present
    pub fn has_alert(&self) -> bool {
        self.weather_alert_event.is_some() || self.weather_alert_description.is_some()
    }
}

/// One decoded telemetry message
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub internal_data: Option<InternalData>,
    pub weather_data: Option<WeatherData>,
}

impl TelemetryRecord {
    /// True when the record carries no recognised field at all
    pub fn is_empty(&self) -> bool {
        self.internal_data.is_none() && self.weather_data.is_none()
    }
}

/// Telemetry decoding failures
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("Malformed telemetry payload: {0}")]
    Malformed(String),
}

/// Stateless decoder for device telemetry payloads
pub struct TelemetryDecoder;

impl TelemetryDecoder {
    /// Decode a raw payload into a typed record.
    ///
    /// Returns [`DecodeError::Malformed`] when the payload is not UTF-8 JSON or
    /// its top level is not an object. Unknown fields are ignored; a leaf with
    /// an unexpected type is treated as absent.
    pub fn decode(payload: &[u8]) -> Result<TelemetryRecord, DecodeError> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| DecodeError::Malformed(format!("payload is not UTF-8: {e}")))?;

        let value: Value = serde_json::from_str(text)
            .map_err(|e| DecodeError::Malformed(format!("invalid JSON: {e}")))?;

        let root = value.as_object().ok_or_else(|| {
            DecodeError::Malformed(format!("expected a JSON object, got {}", json_kind(&value)))
        })?;

        Ok(TelemetryRecord {
            internal_data: group(root, "internal_data").map(decode_internal),
            weather_data: group(root, "weather_data").map(decode_weather),
        })
    }
}

fn decode_internal(fields: &Map<String, Value>) -> InternalData {
    InternalData {
        internal_temperature: number(fields, "internal_temperature"),
        internal_humidity: number(fields, "internal_humidity"),
        gas_resistance: number(fields, "gas_resistance"),
        desired_temperature: number(fields, "desired_temperature"),
        window_deg: number(fields, "window_deg"),
        is_auto: flag(fields, "is_auto"),
    }
}

fn decode_weather(fields: &Map<String, Value>) -> WeatherData {
    WeatherData {
        weather_temperature: number(fields, "weather_temperature"),
        weather_humidity: number(fields, "weather_humidity"),
        weather_wind_speed: number(fields, "weather_wind_speed"),
        weather_wind_deg: number(fields, "weather_wind_deg"),
        weather_alert_event: text(fields, "weather_alert_event"),
        weather_alert_description: text(fields, "weather_alert_description"),
    }
}

fn group<'a>(root: &'a Map<String, Value>, name: &str) -> Option<&'a Map<String, Value>> {
    match root.get(name) {
        None | Some(Value::Null) => None,
        Some(Value::Object(fields)) => Some(fields),
        Some(other) => {
            debug!(group = name, kind = json_kind(other), "Ignoring non-object telemetry group");
            None
        }
    }
}

fn number(fields: &Map<String, Value>, name: &str) -> Option<f64> {
    match fields.get(name)? {
        Value::Number(n) => n.as_f64(),
        Value::Null => None,
        other => {
            debug!(field = name, kind = json_kind(other), "Ignoring non-numeric telemetry field");
            None
        }
    }
}

// The firmware sends is_auto as 0/1; booleans are accepted as well.
fn flag(fields: &Map<String, Value>, name: &str) -> Option<bool> {
    match fields.get(name)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::Null => None,
        other => {
            debug!(field = name, kind = json_kind(other), "Ignoring non-boolean telemetry field");
            None
        }
    }
}

fn text(fields: &Map<String, Value>, name: &str) -> Option<String> {
    match fields.get(name)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => {
            debug!(field = name, kind = json_kind(other), "Ignoring non-string telemetry field");
            None
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_payload() {
        let payload = br#"{
            "internal_data": {
                "internal_temperature": 22.4,
                "internal_humidity": 41,
                "gas_resistance": 15234.5,
                "desired_temperature": 21,
                "window_deg": -30,
                "is_auto": 1
            },
            "weather_data": {
                "weather_temperature": 8.2,
                "weather_humidity": 87,
                "weather_wind_speed": 14.4,
                "weather_wind_deg": 225,
                "weather_alert_event": "Yellow wind warning",
                "weather_alert_description": "Strong wind gusts expected"
            }
        }"#;

        let record = TelemetryDecoder::decode(payload).unwrap();
        let internal = record.internal_data.unwrap();
        assert_eq!(internal.internal_temperature, Some(22.4));
        assert_eq!(internal.internal_humidity, Some(41.0));
        assert_eq!(internal.gas_resistance, Some(15234.5));
        assert_eq!(internal.desired_temperature, Some(21.0));
        assert_eq!(internal.window_deg, Some(-30.0));
        assert_eq!(internal.is_auto, Some(true));

        let weather = record.weather_data.unwrap();
        assert_eq!(weather.weather_wind_deg, Some(225.0));
        assert_eq!(
            weather.weather_alert_event.as_deref(),
            Some("Yellow wind warning")
        );
        assert!(weather.has_alert());
    }

    #[test]
    fn test_absent_fields_stay_absent() {
        let record =
            TelemetryDecoder::decode(br#"{"internal_data": {"internal_humidity": 55}}"#).unwrap();

        let internal = record.internal_data.unwrap();
        assert_eq!(internal.internal_humidity, Some(55.0));
        assert_eq!(internal.internal_temperature, None);
        assert_eq!(internal.gas_resistance, None);
        assert!(record.weather_data.is_none());
    }

    #[test]
    fn test_zero_is_present_not_absent() {
        let record = TelemetryDecoder::decode(
            br#"{"internal_data": {"internal_temperature": 0, "window_deg": 0, "is_auto": 0}}"#,
        )
        .unwrap();

        let internal = record.internal_data.unwrap();
        assert_eq!(internal.internal_temperature, Some(0.0));
        assert_eq!(internal.window_deg, Some(0.0));
        assert_eq!(internal.is_auto, Some(false));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let record = TelemetryDecoder::decode(
            br#"{"firmware": "1.2.0", "internal_data": {"battery": 3.7, "internal_temperature": 19.5}}"#,
        )
        .unwrap();

        let internal = record.internal_data.unwrap();
        assert_eq!(internal.internal_temperature, Some(19.5));
    }

    #[test]
    fn test_wrong_leaf_type_is_treated_as_absent() {
        let record = TelemetryDecoder::decode(
            br#"{"internal_data": {"internal_temperature": "hot", "internal_humidity": 40},
                 "weather_data": {"weather_alert_event": 3}}"#,
        )
        .unwrap();

        let internal = record.internal_data.unwrap();
        assert_eq!(internal.internal_temperature, None);
        assert_eq!(internal.internal_humidity, Some(40.0));
        assert_eq!(record.weather_data.unwrap().weather_alert_event, None);
    }

    #[test]
    fn test_is_auto_accepts_boolean() {
        let record = TelemetryDecoder::decode(br#"{"internal_data": {"is_auto": true}}"#).unwrap();
        assert_eq!(record.internal_data.unwrap().is_auto, Some(true));
    }

    #[test]
    fn test_empty_object_decodes_to_empty_record() {
        let record = TelemetryDecoder::decode(b"{}").unwrap();
        assert!(record.is_empty());
    }

    #[test]
    fn test_truncated_payload_is_malformed() {
        let result = TelemetryDecoder::decode(br#"{"internal_data": {"internal_temperature": 2"#);
        assert!(matches!(result, Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_unbalanced_payload_is_malformed() {
        let result = TelemetryDecoder::decode(br#"{"weather_data": }}"#);
        assert!(matches!(result, Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_non_object_top_level_is_malformed() {
        assert!(matches!(
            TelemetryDecoder::decode(b"42"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            TelemetryDecoder::decode(b"[1, 2]"),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let result = TelemetryDecoder::decode(&[0x7b, 0xff, 0xfe, 0x7d]);
        assert!(matches!(result, Err(DecodeError::Malformed(_))));
    }
}
