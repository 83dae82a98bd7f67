//! Sensor mounting geometry

use serde::Serialize;

use crate::config::GeometryConfig;
use crate::error::{Error, Result};
use crate::ingest::ChannelLabel;

/// Position of one sensor, as reported by the config endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelPosition {
    pub label: ChannelLabel,
    pub angle_deg: f64,
    pub x: f64,
    pub y: f64,
}

/// Where each channel's sensor sits on the target perimeter
///
/// Target center is the origin; angles run counter-clockwise from +x.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorGeometry {
    sensor_radius: f64,
    angles_rad: [f64; ChannelLabel::COUNT],
}

impl SensorGeometry {
    /// Compass-default angles at the given radius
    pub fn with_radius(sensor_radius: f64) -> Self {
        let mut angles_rad = [0.0; ChannelLabel::COUNT];
        for label in ChannelLabel::ALL {
            angles_rad[label.index()] = label.default_angle_deg().to_radians();
        }
        Self {
            sensor_radius,
            angles_rad,
        }
    }

    pub fn from_config(config: &GeometryConfig) -> Result<Self> {
        if !(config.sensor_radius.is_finite() && config.sensor_radius > 0.0) {
            return Err(Error::Config(format!(
                "sensor_radius must be > 0, got {}",
                config.sensor_radius
            )));
        }
        let mut geometry = Self::with_radius(config.sensor_radius);
        for (key, degrees) in &config.angles_deg {
            let label: ChannelLabel = key
                .parse()
                .map_err(|e| Error::Config(format!("geometry.angles_deg: {}", e)))?;
            if !degrees.is_finite() {
                return Err(Error::Config(format!("geometry angle for {} is not finite", label)));
            }
            geometry.angles_rad[label.index()] = degrees.to_radians();
        }
        Ok(geometry)
    }

    pub fn sensor_radius(&self) -> f64 {
        self.sensor_radius
    }

    /// Unit vector from center towards the sensor
    pub fn direction(&self, label: ChannelLabel) -> (f64, f64) {
        let a = self.angles_rad[label.index()];
        (a.cos(), a.sin())
    }

    pub fn position(&self, label: ChannelLabel) -> (f64, f64) {
        let (ux, uy) = self.direction(label);
        (ux * self.sensor_radius, uy * self.sensor_radius)
    }

    /// Every channel's position, for display
    pub fn describe(&self) -> Vec<ChannelPosition> {
        ChannelLabel::ALL
            .iter()
            .map(|label| {
                let (x, y) = self.position(*label);
                ChannelPosition {
                    label: *label,
                    angle_deg: self.angles_rad[label.index()].to_degrees(),
                    x,
                    y,
                }
            })
            .collect()
    }
}
