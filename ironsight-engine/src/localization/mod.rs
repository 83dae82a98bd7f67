//! Localization estimator
//!
//! [`FusedEvent`](crate::fusion::FusedEvent) → raw `(x, y)` with
//! per-estimator confidences.

mod energy;
mod estimator;
mod geometry;
mod tdoa;

pub use energy::{
    EnergyEstimate, EnergyEstimator, LinearCurve, PowerCurve, RadiusCurve, TableCurve,
};
pub use estimator::{LocalizationEstimate, LocalizationEstimator};
pub use geometry::{ChannelPosition, SensorGeometry};
pub use tdoa::{
    HyperbolicSolver, RangeDifference, SolverError, TdoaEstimate, TdoaEstimator, TdoaSolution,
    MIN_TDOA_CHANNELS,
};
