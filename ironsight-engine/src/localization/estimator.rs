//! Dual-estimator blend
//!
//! Energy ratio is robust close to a sensor but saturates near center;
//! TDOA is precise everywhere but needs clean timing on enough channels.
//! The final position is their confidence-weighted average.

use ironsight_common::events::EstimateDiagnostics;
use tracing::trace;

use super::energy::{EnergyEstimate, EnergyEstimator};
use super::geometry::SensorGeometry;
use super::tdoa::{TdoaEstimate, TdoaEstimator};
use crate::config::{GeometryConfig, LocalizationConfig};
use crate::error::Result;
use crate::fusion::FusedEvent;

/// Position estimate for one fused event, before calibration
#[derive(Debug, Clone, PartialEq)]
pub struct LocalizationEstimate {
    pub x: f64,
    pub y: f64,
    pub r: f64,
    pub energy_conf: f64,
    pub tdoa_conf: f64,
    pub energy: Option<EnergyEstimate>,
    pub tdoa: Option<TdoaEstimate>,
}

impl LocalizationEstimate {
    pub fn diagnostics(&self) -> EstimateDiagnostics {
        EstimateDiagnostics {
            energy_x: self.energy.map(|e| e.x),
            energy_y: self.energy.map(|e| e.y),
            energy_conf: self.energy_conf,
            tdoa_x: self.tdoa.map(|t| t.x),
            tdoa_y: self.tdoa.map(|t| t.y),
            tdoa_conf: self.tdoa_conf,
            tdoa_residual_us: self.tdoa.map(|t| t.residual_us),
            raw_r: self.r,
        }
    }
}

/// Stateless apart from its configuration
#[derive(Debug)]
pub struct LocalizationEstimator {
    energy: EnergyEstimator,
    tdoa: TdoaEstimator,
}

impl LocalizationEstimator {
    pub fn new(energy: EnergyEstimator, tdoa: TdoaEstimator) -> Self {
        Self { energy, tdoa }
    }

    pub fn from_config(geometry: &GeometryConfig, config: &LocalizationConfig) -> Result<Self> {
        let geometry = SensorGeometry::from_config(geometry)?;
        let curve = config.radius_curve.build()?;
        Ok(Self {
            energy: EnergyEstimator::new(geometry.clone(), curve),
            tdoa: TdoaEstimator::new(
                geometry,
                config.wave_speed,
                config.residual_scale_us,
                config.max_radius,
            ),
        })
    }

    /// Locate one event
    ///
    /// `None` only when neither estimator is feasible (no channel energy and
    /// too few timed channels).
    pub fn estimate(&self, event: &FusedEvent) -> Option<LocalizationEstimate> {
        let energy = self.energy.estimate(&event.channels);
        let tdoa = match self.tdoa.estimate(&event.channels) {
            Ok(t) => Some(t),
            Err(e) => {
                trace!("TDOA infeasible for event {}: {}", event.id, e);
                None
            }
        };

        let (x, y) = match (&energy, &tdoa) {
            (Some(e), Some(t)) => {
                let w = e.confidence + t.confidence;
                if w > 0.0 {
                    (
                        (e.x * e.confidence + t.x * t.confidence) / w,
                        (e.y * e.confidence + t.y * t.confidence) / w,
                    )
                } else {
                    ((e.x + t.x) / 2.0, (e.y + t.y) / 2.0)
                }
            }
            (Some(e), None) => (e.x, e.y),
            (None, Some(t)) => (t.x, t.y),
            (None, None) => return None,
        };

        Some(LocalizationEstimate {
            x,
            y,
            r: (x * x + y * y).sqrt(),
            energy_conf: energy.map_or(0.0, |e| e.confidence),
            tdoa_conf: tdoa.map_or(0.0, |t| t.confidence),
            energy,
            tdoa,
        })
    }
}
