//! Weather alert classification
//!
//! Alerts arrive as free text. Hazards and severity are found by
//! case-insensitive substring search, so "rain" also matches "raining" and
//! "terrain".

use serde::Serialize;

/// Severity colour taken from the alert headline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeverityColor {
    #[default]
    None,
    Yellow,
    Orange,
    Red,
}

impl SeverityColor {
    /// Colour name used by the dashboard's warning icon
    pub fn display_color(&self) -> &'static str {
        match self {
            SeverityColor::None => "lightgray",
            SeverityColor::Yellow => "gold",
            SeverityColor::Orange => "darkorange",
            SeverityColor::Red => "firebrick",
        }
    }
}

/// Hazards named by the current alert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HazardFlags {
    pub snow: bool,
    pub blizzard: bool,
    pub fog: bool,
    pub wind: bool,
    pub rain: bool,
    pub hail: bool,
    pub thunderstorm: bool,
    pub sleet: bool,
    pub high_temperature: bool,
    pub low_temperature: bool,
    pub severity_color: SeverityColor,
}

impl HazardFlags {
    /// Names of the raised flags, in vocabulary order
    pub fn active(&self) -> Vec<&'static str> {
        [
            ("snow", self.snow),
            ("blizzard", self.blizzard),
            ("fog", self.fog),
            ("wind", self.wind),
            ("rain", self.rain),
            ("hail", self.hail),
            ("thunderstorm", self.thunderstorm),
            ("sleet", self.sleet),
            ("high_temperature", self.high_temperature),
            ("low_temperature", self.low_temperature),
        ]
        .into_iter()
        .filter_map(|(name, raised)| raised.then_some(name))
        .collect()
    }

    pub fn any(&self) -> bool {
        !self.active().is_empty()
    }
}

/// Classify an alert from its headline (`event`) and body (`description`).
pub fn classify_alert(event: &str, description: &str) -> HazardFlags {
    let event = event.to_lowercase();
    let description = description.to_lowercase();

    HazardFlags {
        snow: description.contains("snow"),
        blizzard: description.contains("blizzard"),
        fog: description.contains("fog"),
        wind: description.contains("wind"),
        rain: description.contains("rain"),
        hail: description.contains("hail"),
        thunderstorm: description.contains("thunderstorm"),
        sleet: description.contains("sleet"),
        high_temperature: event.contains("high temperature"),
        low_temperature: event.contains("low temperature"),
        severity_color: severity_color(&event),
    }
}

// Checked in scan order; each later hit overrides the earlier one.
fn severity_color(event: &str) -> SeverityColor {
    let mut color = SeverityColor::None;
    if event.contains("yellow") {
        color = SeverityColor::Yellow;
    }
    if event.contains("orange") {
        color = SeverityColor::Orange;
    }
    if event.contains("red") {
        color = SeverityColor::Red;
    }
    color
}
