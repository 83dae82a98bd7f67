//! Energy-ratio centroid estimator
//!
//! Direction comes from the energy-weighted mean of the sensor unit
//! vectors. Radius comes from how strongly the loudest channel dominates:
//! the normalised dominance `d = (ρ - 1/n) / (1 - 1/n)`, with `ρ` the
//! loudest channel's share of total energy, is 0 for perfectly uniform
//! energies and 1 when a single channel carries everything. The
//! dominance → radius mapping is material dependent and pluggable through
//! [`RadiusCurve`].

use std::fmt::Debug;

use super::geometry::SensorGeometry;
use crate::config::RadiusCurveConfig;
use crate::error::{Error, Result};
use crate::fusion::FusedChannel;
use crate::ingest::ChannelSet;

/// Maps normalised dominance (0..=1) to a radius
pub trait RadiusCurve: Debug + Send + Sync {
    fn radius(&self, dominance: f64) -> f64;
}

/// `r = d · max_radius`
#[derive(Debug, Clone)]
pub struct LinearCurve {
    pub max_radius: f64,
}

impl RadiusCurve for LinearCurve {
    fn radius(&self, dominance: f64) -> f64 {
        dominance.clamp(0.0, 1.0) * self.max_radius
    }
}

/// `r = d^exponent · max_radius`
#[derive(Debug, Clone)]
pub struct PowerCurve {
    pub max_radius: f64,
    pub exponent: f64,
}

impl RadiusCurve for PowerCurve {
    fn radius(&self, dominance: f64) -> f64 {
        dominance.clamp(0.0, 1.0).powf(self.exponent) * self.max_radius
    }
}

/// Piecewise-linear lookup, clamped at both ends
#[derive(Debug, Clone)]
pub struct TableCurve {
    points: Vec<(f64, f64)>,
}

impl TableCurve {
    /// Points must be sorted by strictly increasing dominance
    pub fn new(points: Vec<(f64, f64)>) -> Result<Self> {
        if points.len() < 2 {
            return Err(Error::Config("radius table needs at least two points".into()));
        }
        if points
            .iter()
            .any(|(d, r)| !d.is_finite() || !r.is_finite() || *r < 0.0)
        {
            return Err(Error::Config("radius table values must be finite, radius >= 0".into()));
        }
        if points.windows(2).any(|w| w[1].0 <= w[0].0) {
            return Err(Error::Config(
                "radius table dominance must be strictly increasing".into(),
            ));
        }
        Ok(Self { points })
    }
}

impl RadiusCurve for TableCurve {
    fn radius(&self, dominance: f64) -> f64 {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];
        if dominance <= first.0 {
            return first.1;
        }
        if dominance >= last.0 {
            return last.1;
        }
        for w in self.points.windows(2) {
            let (d0, r0) = w[0];
            let (d1, r1) = w[1];
            if dominance <= d1 {
                return r0 + (r1 - r0) * (dominance - d0) / (d1 - d0);
            }
        }
        last.1
    }
}

impl RadiusCurveConfig {
    /// Instantiate the configured curve
    pub fn build(&self) -> Result<Box<dyn RadiusCurve>> {
        let positive = |v: f64, name: &str| {
            if v.is_finite() && v > 0.0 {
                Ok(v)
            } else {
                Err(Error::Config(format!("radius_curve {} must be > 0, got {}", name, v)))
            }
        };
        Ok(match self {
            RadiusCurveConfig::Linear { max_radius } => Box::new(LinearCurve {
                max_radius: positive(*max_radius, "max_radius")?,
            }),
            RadiusCurveConfig::Power {
                max_radius,
                exponent,
            } => Box::new(PowerCurve {
                max_radius: positive(*max_radius, "max_radius")?,
                exponent: positive(*exponent, "exponent")?,
            }),
            RadiusCurveConfig::Table { points } => Box::new(TableCurve::new(
                points.iter().map(|p| (p[0], p[1])).collect(),
            )?),
        })
    }
}

/// Output of the energy estimator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyEstimate {
    pub x: f64,
    pub y: f64,
    pub confidence: f64,
    pub dominance: f64,
}

#[derive(Debug)]
pub struct EnergyEstimator {
    geometry: SensorGeometry,
    curve: Box<dyn RadiusCurve>,
}

impl EnergyEstimator {
    pub fn new(geometry: SensorGeometry, curve: Box<dyn RadiusCurve>) -> Self {
        Self { geometry, curve }
    }

    /// `None` when no channel carries energy
    pub fn estimate(&self, channels: &ChannelSet<FusedChannel>) -> Option<EnergyEstimate> {
        let mut energies: Vec<f64> = Vec::with_capacity(channels.len());
        let (mut vx, mut vy, mut total) = (0.0, 0.0, 0.0);
        for (label, channel) in channels.iter() {
            let e = channel.sample.energy.max(0.0);
            let (ux, uy) = self.geometry.direction(label);
            vx += e * ux;
            vy += e * uy;
            total += e;
            energies.push(e);
        }
        if energies.is_empty() || total <= 0.0 {
            return None;
        }

        let n = energies.len() as f64;
        energies.sort_by(|a, b| b.total_cmp(a));

        let dominance = normalised_share(energies[0] / total, 1.0 / n);
        let confidence = if energies.len() > 2 {
            let top_two = (energies[0] + energies[1]) / total;
            dominance.max(normalised_share(top_two, 2.0 / n))
        } else {
            dominance
        };

        let norm = (vx * vx + vy * vy).sqrt() / total;
        let (x, y) = if norm < 1e-9 {
            (0.0, 0.0)
        } else {
            let r = self.curve.radius(dominance);
            let len = (vx * vx + vy * vy).sqrt();
            (r * vx / len, r * vy / len)
        };

        Some(EnergyEstimate {
            x,
            y,
            confidence: confidence.clamp(0.0, 1.0),
            dominance,
        })
    }
}

/// Rescale a share so the uniform value maps to 0 and 1.0 maps to 1
fn normalised_share(share: f64, uniform: f64) -> f64 {
    if uniform >= 1.0 {
        return 1.0;
    }
    ((share - uniform) / (1.0 - uniform)).clamp(0.0, 1.0)
}
