//! Outbound setpoint command sent to the device
//!
//! Wire shape: `{"phoneData":{"windowDeg":-30,"desiredTemperature":21,"isAuto":1}}`
//! or `{"phoneData":{}}` as a no-op before the session is ready.

use serde::{Deserialize, Serialize};

/// Top-level command envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneCommand {
    #[serde(rename = "phoneData")]
    pub phone_data: PhoneData,
}

/// User-controlled setpoints as the firmware expects them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_deg: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired_temperature: Option<i32>,
    /// 1 = automatic climate mode, 0 = manual window control
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_auto: Option<u8>,
}

impl PhoneCommand {
    /// The empty command published while stored setpoints are unknown
    pub fn noop() -> Self {
        Self {
            phone_data: PhoneData::default(),
        }
    }

    /// A full setpoint command
    pub fn setpoints(window_deg: i32, desired_temperature: i32, is_auto: bool) -> Self {
        Self {
            phone_data: PhoneData {
                window_deg: Some(window_deg),
                desired_temperature: Some(desired_temperature),
                is_auto: Some(u8::from(is_auto)),
            },
        }
    }

    pub fn is_noop(&self) -> bool {
        self.phone_data == PhoneData::default()
    }

    /// Serialize to the JSON payload published on the command topic
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
