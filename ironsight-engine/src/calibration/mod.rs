//! Calibration fitter
//!
//! Collects (raw estimate, ground-truth click) pairs and fits the affine
//! correction applied to every scored shot.

mod collector;
mod fitter;
mod store;

pub use collector::CalibrationCollector;
pub use fitter::{fit_affine, CalibrationPair, MIN_CALIBRATION_SAMPLES};
pub use store::ActiveModel;

use thiserror::Error;

/// Calibration failures surfaced to the operator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("need at least {need} confirmed samples, have {have}")]
    InsufficientSamples { have: usize, need: usize },

    #[error("degenerate sample geometry: {0}")]
    DegenerateGeometry(String),

    #[error("no impact is awaiting a ground-truth click")]
    NoPendingSample,

    #[error("ground truth must be finite")]
    InvalidGroundTruth,

    #[error("not in calibration mode")]
    NotCalibrating,

    #[error("model version {offered} does not supersede active version {active}")]
    StaleVersion { active: u64, offered: u64 },
}
