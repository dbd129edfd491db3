//! Outdoor weather as relayed by the device

use serde::Serialize;

/// Latest weather report and alert text
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WeatherState {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
    /// Compass bearing the wind comes from, as reported
    pub wind_direction_deg: Option<f64>,
    /// Alert headline, carries the severity keyword
    pub alert_event_text: String,
    /// Alert body, carries the hazard keywords
    pub alert_description_text: String,
}

impl WeatherState {
    /// Wind bearing folded into [0, 360)
    pub fn wind_bearing(&self) -> Option<f64> {
        self.wind_direction_deg
            .filter(|deg| deg.is_finite())
            .map(|deg| deg.rem_euclid(360.0))
    }

    pub fn compass_point(&self) -> Option<CompassPoint> {
        self.wind_bearing().map(CompassPoint::from_bearing)
    }
}

/// Eight-point compass heading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompassPoint {
    N,
    NE,
    E,
    SE,
    S,
    SW,
    W,
    NW,
}

impl CompassPoint {
    const ALL: [CompassPoint; 8] = [
        CompassPoint::N,
        CompassPoint::NE,
        CompassPoint::E,
        CompassPoint::SE,
        CompassPoint::S,
        CompassPoint::SW,
        CompassPoint::W,
        CompassPoint::NW,
    ];

    /// Nearest heading for a bearing in degrees
    pub fn from_bearing(bearing: f64) -> Self {
        let index = ((bearing.rem_euclid(360.0) + 22.5) / 45.0).floor() as usize % 8;
        Self::ALL[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wind_bearing_normalisation() {
        let mut weather = WeatherState::default();
        assert_eq!(weather.wind_bearing(), None);

        weather.wind_direction_deg = Some(370.0);
        assert_eq!(weather.wind_bearing(), Some(10.0));

        weather.wind_direction_deg = Some(-90.0);
        assert_eq!(weather.wind_bearing(), Some(270.0));

        weather.wind_direction_deg = Some(360.0);
        assert_eq!(weather.wind_bearing(), Some(0.0));
    }

    #[test]
    fn test_compass_points() {
        assert_eq!(CompassPoint::from_bearing(0.0), CompassPoint::N);
        assert_eq!(CompassPoint::from_bearing(22.4), CompassPoint::N);
        assert_eq!(CompassPoint::from_bearing(22.5), CompassPoint::NE);
        assert_eq!(CompassPoint::from_bearing(90.0), CompassPoint::E);
        assert_eq!(CompassPoint::from_bearing(225.0), CompassPoint::SW);
        assert_eq!(CompassPoint::from_bearing(337.5), CompassPoint::N);
        assert_eq!(CompassPoint::from_bearing(359.0), CompassPoint::N);
    }

    #[test]
    fn test_compass_point_from_state() {
        let weather = WeatherState {
            wind_direction_deg: Some(180.0),
            ..Default::default()
        };
        assert_eq!(weather.compass_point(), Some(CompassPoint::S));
    }
}
