//! State reconciliation
//!
//! [`StateReconciler`] exclusively owns the device and weather state. It folds
//! decoded telemetry, user intents and restored setpoints into that state and
//! reports each change as a [`StateDelta`], which the session uses to decide
//! what to publish and what to checkpoint.

use super::device::{
    air_quality_index, normalize_desired_temperature, normalize_window_angle, DeviceState,
    Setpoints,
};
use super::hazards::{classify_alert, HazardFlags};
use super::weather::WeatherState;
use super::DashboardSnapshot;
use crate::protocol::{InternalData, TelemetryRecord, WeatherData};
use crate::storage::StoredSetpoints;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Individually tracked state fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateField {
    InternalTemperature,
    InternalHumidity,
    GasResistance,
    AirQualityIndex,
    DesiredTemperature,
    WindowAngle,
    AutoMode,
    SliderLock,
    WeatherTemperature,
    WeatherHumidity,
    WindSpeed,
    WindDirection,
    AlertEvent,
    AlertDescription,
    HazardFlags,
}

impl StateField {
    /// Fields that make up the outbound command and the persisted checkpoint
    pub const SETPOINTS: [StateField; 3] = [
        StateField::DesiredTemperature,
        StateField::WindowAngle,
        StateField::AutoMode,
    ];

    pub fn is_setpoint(&self) -> bool {
        Self::SETPOINTS.contains(self)
    }
}

/// Who caused a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    /// Telemetry reported by the device
    Device,
    /// A gesture from the presentation layer
    User,
    /// Setpoints restored from persistence
    Storage,
}

/// Outcome of one reconciliation step
#[derive(Debug, Clone, PartialEq)]
pub struct StateDelta {
    pub origin: ChangeOrigin,
    /// Fields whose value actually changed
    pub changed: BTreeSet<StateField>,
    /// Setpoints after the step
    pub setpoints: Setpoints,
}

impl StateDelta {
    fn new(origin: ChangeOrigin) -> Self {
        Self {
            origin,
            changed: BTreeSet::new(),
            setpoints: Setpoints::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    pub fn contains(&self, field: StateField) -> bool {
        self.changed.contains(&field)
    }

    /// True when any of the three user-controlled fields changed
    pub fn touches_setpoints(&self) -> bool {
        self.changed.iter().any(StateField::is_setpoint)
    }
}

/// A setpoint change requested by the user
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UserIntent {
    SetDesiredTemperature(f64),
    SetWindowAngle(f64),
    SetAutoMode(bool),
}

/// Whether stored setpoints have been restored yet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Readiness {
    #[default]
    Uninitialized,
    Seeding,
    Ready,
}

/// Owner of all dashboard state
#[derive(Debug, Clone, Default)]
pub struct StateReconciler {
    device: DeviceState,
    weather: WeatherState,
    hazards: HazardFlags,
    readiness: Readiness,
    /// Setpoints set this session before seeding finished, and by whom;
    /// seeding skips them
    fresh_setpoints: BTreeMap<StateField, ChangeOrigin>,
    /// Handover of `fresh_setpoints` once ready, until the session takes it
    held_setpoints: Option<StateDelta>,
    last_telemetry_at: Option<DateTime<Utc>>,
}

impl StateReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(&self) -> &DeviceState {
        &self.device
    }

    pub fn weather(&self) -> &WeatherState {
        &self.weather
    }

    pub fn hazards(&self) -> &HazardFlags {
        &self.hazards
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    pub fn is_ready(&self) -> bool {
        self.readiness == Readiness::Ready
    }

    pub fn setpoints(&self) -> Setpoints {
        self.device.setpoints()
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        DashboardSnapshot {
            device: self.device.clone(),
            weather: self.weather.clone(),
            hazards: self.hazards,
            readiness: self.readiness,
            last_telemetry_at: self.last_telemetry_at,
        }
    }

    /// Merge one telemetry record. Only fields present in the record are written.
    pub fn apply_telemetry(&mut self, record: &TelemetryRecord) -> StateDelta {
        let mut delta = StateDelta::new(ChangeOrigin::Device);

        if let Some(internal) = &record.internal_data {
            self.merge_internal(internal, &mut delta);
        }
        if let Some(weather) = &record.weather_data {
            self.merge_weather(weather, &mut delta);
        }

        if let (Some(gas), Some(humidity)) =
            (self.device.gas_resistance, self.device.internal_humidity)
        {
            match air_quality_index(gas, humidity) {
                Some(aqi) => assign(
                    &mut self.device.air_quality_index,
                    aqi,
                    StateField::AirQualityIndex,
                    &mut delta,
                ),
                None => warn!(
                    gas_resistance = gas,
                    "Non-positive gas resistance, keeping previous air quality index"
                ),
            }
        }

        self.last_telemetry_at = Some(Utc::now());
        delta.setpoints = self.device.setpoints();
        delta
    }

    fn merge_internal(&mut self, internal: &InternalData, delta: &mut StateDelta) {
        let device = &mut self.device;

        if let Some(value) = internal.internal_temperature {
            assign(
                &mut device.internal_temperature,
                Some(value),
                StateField::InternalTemperature,
                delta,
            );
        }
        if let Some(value) = internal.internal_humidity {
            assign(
                &mut device.internal_humidity,
                Some(value),
                StateField::InternalHumidity,
                delta,
            );
        }
        if let Some(value) = internal.gas_resistance {
            assign(
                &mut device.gas_resistance,
                Some(value),
                StateField::GasResistance,
                delta,
            );
        }

        // The device echoes its active configuration
        if let Some(value) = internal.desired_temperature.and_then(normalize_desired_temperature) {
            assign(
                &mut device.desired_temperature,
                value,
                StateField::DesiredTemperature,
                delta,
            );
            self.fresh_setpoints.insert(StateField::DesiredTemperature, ChangeOrigin::Device);
        }
        if let Some(value) = internal.window_deg.and_then(normalize_window_angle) {
            assign(
                &mut device.window_angle,
                value,
                StateField::WindowAngle,
                delta,
            );
            self.fresh_setpoints.insert(StateField::WindowAngle, ChangeOrigin::Device);
        }
        if let Some(is_auto) = internal.is_auto {
            self.assign_auto_mode(is_auto, delta);
            self.fresh_setpoints.insert(StateField::AutoMode, ChangeOrigin::Device);
        }
    }

    fn merge_weather(&mut self, report: &WeatherData, delta: &mut StateDelta) {
        let weather = &mut self.weather;

        if let Some(value) = report.weather_temperature {
            assign(
                &mut weather.temperature,
                Some(value),
                StateField::WeatherTemperature,
                delta,
            );
        }
        if let Some(value) = report.weather_humidity {
            assign(
                &mut weather.humidity,
                Some(value),
                StateField::WeatherHumidity,
                delta,
            );
        }
        if let Some(value) = report.weather_wind_speed {
            assign(
                &mut weather.wind_speed,
                Some(value),
                StateField::WindSpeed,
                delta,
            );
        }
        if let Some(value) = report.weather_wind_deg {
            assign(
                &mut weather.wind_direction_deg,
                Some(value),
                StateField::WindDirection,
                delta,
            );
        }

        // Headline and body are read together, so they are replaced together
        if report.has_alert() {
            assign(
                &mut weather.alert_event_text,
                report.weather_alert_event.clone().unwrap_or_default(),
                StateField::AlertEvent,
                delta,
            );
            assign(
                &mut weather.alert_description_text,
                report.weather_alert_description.clone().unwrap_or_default(),
                StateField::AlertDescription,
                delta,
            );

            let hazards = classify_alert(
                &self.weather.alert_event_text,
                &self.weather.alert_description_text,
            );
            debug!(
                severity = ?hazards.severity_color,
                hazards = ?hazards.active(),
                "Classified weather alert"
            );
            assign(&mut self.hazards, hazards, StateField::HazardFlags, delta);
        }
    }

    /// Apply a user gesture. Values are clamped and stepped before use.
    pub fn apply_user_intent(&mut self, intent: UserIntent) -> StateDelta {
        let mut delta = StateDelta::new(ChangeOrigin::User);

        match intent {
            UserIntent::SetDesiredTemperature(requested) => {
                match normalize_desired_temperature(requested) {
                    Some(value) => {
                        assign(
                            &mut self.device.desired_temperature,
                            value,
                            StateField::DesiredTemperature,
                            &mut delta,
                        );
                        self.fresh_setpoints
                            .insert(StateField::DesiredTemperature, ChangeOrigin::User);
                    }
                    None => warn!(requested, "Ignoring non-numeric desired temperature"),
                }
            }
            UserIntent::SetWindowAngle(requested) => match normalize_window_angle(requested) {
                Some(value) => {
                    assign(
                        &mut self.device.window_angle,
                        value,
                        StateField::WindowAngle,
                        &mut delta,
                    );
                    self.fresh_setpoints.insert(StateField::WindowAngle, ChangeOrigin::User);
                }
                None => warn!(requested, "Ignoring non-numeric window angle"),
            },
            UserIntent::SetAutoMode(is_auto) => {
                self.assign_auto_mode(is_auto, &mut delta);
                self.fresh_setpoints.insert(StateField::AutoMode, ChangeOrigin::User);
            }
        }

        delta.setpoints = self.device.setpoints();
        delta
    }

    fn assign_auto_mode(&mut self, is_auto: bool, delta: &mut StateDelta) {
        let previous_lock = self.device.slider_lock();
        if self.device.is_auto_mode() != is_auto {
            delta.changed.insert(StateField::AutoMode);
        }
        self.device.set_auto_mode(is_auto);
        if self.device.slider_lock() != previous_lock {
            delta.changed.insert(StateField::SliderLock);
        }
    }

    /// Mark the start of the persistence load. Returns false if seeding
    /// already started or finished.
    pub fn begin_seeding(&mut self) -> bool {
        if self.readiness != Readiness::Uninitialized {
            return false;
        }
        self.readiness = Readiness::Seeding;
        debug!("Setpoint seeding started");
        true
    }

    /// Fold restored setpoints in and become ready.
    ///
    /// Setpoints already set this session by the device or the user are newer
    /// than the stored ones and are left alone.
    pub fn apply_seed(&mut self, stored: &StoredSetpoints) -> StateDelta {
        let mut delta = StateDelta::new(ChangeOrigin::Storage);

        if self.readiness == Readiness::Ready {
            warn!("Ignoring setpoint seed after the session became ready");
            delta.setpoints = self.device.setpoints();
            return delta;
        }

        if let Some(value) = stored
            .desired_temperature
            .filter(|_| !self.fresh_setpoints.contains_key(&StateField::DesiredTemperature))
            .and_then(normalize_desired_temperature)
        {
            assign(
                &mut self.device.desired_temperature,
                value,
                StateField::DesiredTemperature,
                &mut delta,
            );
        }
        if let Some(value) = stored
            .window_angle
            .filter(|_| !self.fresh_setpoints.contains_key(&StateField::WindowAngle))
            .and_then(normalize_window_angle)
        {
            assign(
                &mut self.device.window_angle,
                value,
                StateField::WindowAngle,
                &mut delta,
            );
        }
        if let Some(is_auto) = stored
            .is_auto
            .filter(|_| !self.fresh_setpoints.contains_key(&StateField::AutoMode))
        {
            self.assign_auto_mode(is_auto, &mut delta);
        }

        self.mark_ready();
        delta.setpoints = self.device.setpoints();
        delta
    }

    /// Become ready without restored data (nothing stored, or the load failed)
    pub fn complete_seeding_without_data(&mut self) {
        if self.readiness != Readiness::Ready {
            self.mark_ready();
        }
    }

    /// Setpoints set before the session became ready, as one delta.
    ///
    /// Commands sent while seeding carried no values and nothing was
    /// checkpointed, so these still have to reach the device and the store.
    /// Returns `None` when nothing was held or it was already taken.
    pub fn take_held_setpoints(&mut self) -> Option<StateDelta> {
        self.held_setpoints.take()
    }

    fn mark_ready(&mut self) {
        self.readiness = Readiness::Ready;

        let fresh = std::mem::take(&mut self.fresh_setpoints);
        if !fresh.is_empty() {
            let origin = if fresh.values().any(|origin| *origin == ChangeOrigin::User) {
                ChangeOrigin::User
            } else {
                ChangeOrigin::Device
            };
            let mut held = StateDelta::new(origin);
            held.changed.extend(fresh.into_keys());
            held.setpoints = self.device.setpoints();
            debug!(
                origin = ?held.origin,
                fields = ?held.changed,
                "Holding setpoints set while seeding"
            );
            self.held_setpoints = Some(held);
        }

        info!(setpoints = ?self.device.setpoints(), "Session ready");
    }
}

fn assign<T: PartialEq>(slot: &mut T, value: T, field: StateField, delta: &mut StateDelta) {
    if *slot != value {
        delta.changed.insert(field);
    }
    *slot = value;
}
