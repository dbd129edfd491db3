//! Dashboard state model
//!
//! Pure data and transitions. Nothing in here performs I/O; the session owns a
//! [`StateReconciler`] and drives transport and storage around it.

pub mod device;
pub mod hazards;
pub mod reconciler;
pub mod weather;

pub use device::{air_quality_index, DeviceState, Setpoints, SliderLock};
pub use hazards::{classify_alert, HazardFlags, SeverityColor};
pub use reconciler::{
    ChangeOrigin, Readiness, StateDelta, StateField, StateReconciler, UserIntent,
};
pub use weather::{CompassPoint, WeatherState};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Read-only copy of the full dashboard state for presentation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardSnapshot {
    pub device: DeviceState,
    pub weather: WeatherState,
    pub hazards: HazardFlags,
    pub readiness: Readiness,
    pub last_telemetry_at: Option<DateTime<Utc>>,
}
