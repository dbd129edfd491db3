//! Device-side state: sensor readings, derived air quality and setpoints

use crate::protocol::PhoneCommand;
use serde::Serialize;

/// Default target temperature in °C
pub const DEFAULT_DESIRED_TEMPERATURE: f64 = 20.0;
pub const MIN_DESIRED_TEMPERATURE: f64 = 10.0;
pub const MAX_DESIRED_TEMPERATURE: f64 = 30.0;

/// Default window angle in degrees (closed)
pub const DEFAULT_WINDOW_ANGLE: f64 = 0.0;
pub const MIN_WINDOW_ANGLE: f64 = -90.0;
pub const MAX_WINDOW_ANGLE: f64 = 90.0;

/// Which setpoint slider accepts input.
///
/// Auto mode lets the device drive the window from the temperature target, so
/// only the temperature slider is live; manual mode hands the window to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SliderLock {
    TempActive,
    WindowActive,
}

impl SliderLock {
    pub fn for_mode(is_auto: bool) -> Self {
        if is_auto {
            SliderLock::TempActive
        } else {
            SliderLock::WindowActive
        }
    }
}

/// The three user-controlled values sent to the device and persisted locally
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Setpoints {
    pub desired_temperature: f64,
    pub window_angle: f64,
    pub is_auto: bool,
}

impl Default for Setpoints {
    fn default() -> Self {
        Self {
            desired_temperature: DEFAULT_DESIRED_TEMPERATURE,
            window_angle: DEFAULT_WINDOW_ANGLE,
            is_auto: false,
        }
    }
}

impl Setpoints {
    /// Build the outbound command carrying all three setpoints
    pub fn to_command(&self) -> PhoneCommand {
        PhoneCommand::setpoints(
            self.window_angle as i32,
            self.desired_temperature as i32,
            self.is_auto,
        )
    }
}

/// Snap a target temperature onto the 1 °C grid inside [10, 30].
/// Returns `None` for NaN.
pub fn normalize_desired_temperature(value: f64) -> Option<f64> {
    clamp_step(value, MIN_DESIRED_TEMPERATURE, MAX_DESIRED_TEMPERATURE)
}

/// Snap a window angle onto the 1° grid inside [-90, 90].
/// Returns `None` for NaN.
pub fn normalize_window_angle(value: f64) -> Option<f64> {
    clamp_step(value, MIN_WINDOW_ANGLE, MAX_WINDOW_ANGLE)
}

fn clamp_step(value: f64, min: f64, max: f64) -> Option<f64> {
    if value.is_nan() {
        return None;
    }
    Some(value.round().clamp(min, max))
}

/// Live state of the monitoring device as seen by the dashboard
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceState {
    pub internal_temperature: Option<f64>,
    pub internal_humidity: Option<f64>,
    /// Ohms, positive when reported
    pub gas_resistance: Option<f64>,
    /// Derived from gas resistance and humidity, never transmitted
    pub air_quality_index: f64,
    pub desired_temperature: f64,
    pub window_angle: f64,
    is_auto_mode: bool,
    slider_lock: SliderLock,
}

impl Default for DeviceState {
    fn default() -> Self {
        let setpoints = Setpoints::default();
        Self {
            internal_temperature: None,
            internal_humidity: None,
            gas_resistance: None,
            air_quality_index: 0.0,
            desired_temperature: setpoints.desired_temperature,
            window_angle: setpoints.window_angle,
            is_auto_mode: setpoints.is_auto,
            slider_lock: SliderLock::for_mode(setpoints.is_auto),
        }
    }
}

impl DeviceState {
    pub fn is_auto_mode(&self) -> bool {
        self.is_auto_mode
    }

    pub fn slider_lock(&self) -> SliderLock {
        self.slider_lock
    }

    /// Switch mode; the slider lock always follows.
    pub fn set_auto_mode(&mut self, is_auto: bool) {
        self.is_auto_mode = is_auto;
        self.slider_lock = SliderLock::for_mode(is_auto);
    }

    pub fn setpoints(&self) -> Setpoints {
        Setpoints {
            desired_temperature: self.desired_temperature,
            window_angle: self.window_angle,
            is_auto: self.is_auto_mode,
        }
    }
}

/// Indoor air quality score: `ln(gas_resistance) + 0.04 * humidity`.
///
/// `None` unless the gas resistance is positive (the logarithm is undefined otherwise).
pub fn air_quality_index(gas_resistance: f64, humidity: f64) -> Option<f64> {
    (gas_resistance > 0.0).then(|| gas_resistance.ln() + 0.04 * humidity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let state = DeviceState::default();
        assert_eq!(state.desired_temperature, 20.0);
        assert_eq!(state.window_angle, 0.0);
        assert!(!state.is_auto_mode());
        assert_eq!(state.slider_lock(), SliderLock::WindowActive);
        assert_eq!(state.internal_temperature, None);
    }

    #[test]
    fn test_slider_lock_follows_mode() {
        let mut state = DeviceState::default();

        state.set_auto_mode(true);
        assert_eq!(state.slider_lock(), SliderLock::TempActive);

        state.set_auto_mode(false);
        assert_eq!(state.slider_lock(), SliderLock::WindowActive);
    }

    #[test]
    fn test_temperature_clamp_and_step() {
        assert_eq!(normalize_desired_temperature(35.0), Some(30.0));
        assert_eq!(normalize_desired_temperature(-5.0), Some(10.0));
        assert_eq!(normalize_desired_temperature(21.4), Some(21.0));
        assert_eq!(normalize_desired_temperature(21.6), Some(22.0));
        assert_eq!(normalize_desired_temperature(f64::INFINITY), Some(30.0));
        assert_eq!(normalize_desired_temperature(f64::NAN), None);
    }

    #[test]
    fn test_window_clamp_and_step() {
        assert_eq!(normalize_window_angle(-200.0), Some(-90.0));
        assert_eq!(normalize_window_angle(120.0), Some(90.0));
        assert_eq!(normalize_window_angle(-44.7), Some(-45.0));
        assert_eq!(normalize_window_angle(f64::NAN), None);
    }

    #[test]
    fn test_air_quality_index() {
        let aqi = air_quality_index(1000.0, 50.0).unwrap();
        assert!((aqi - 8.9078).abs() < 1e-3);

        assert_eq!(air_quality_index(0.0, 50.0), None);
        assert_eq!(air_quality_index(-10.0, 50.0), None);
    }

    #[test]
    fn test_setpoints_to_command() {
        let setpoints = Setpoints {
            desired_temperature: 24.0,
            window_angle: -15.0,
            is_auto: true,
        };
        assert_eq!(
            setpoints.to_command(),
            PhoneCommand::setpoints(-15, 24, true)
        );
    }
}
