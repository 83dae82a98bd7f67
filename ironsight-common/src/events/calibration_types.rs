//! Calibration payload types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fitted affine correction `corrected = matrix · raw + bias`
///
/// Exactly one model is active at a time. Models are immutable; a refit
/// produces a new model with a higher `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationModel {
    pub matrix: [[f64; 2]; 2],
    pub bias: [f64; 2],
    /// Mean Euclidean fit error against ground truth, in cm
    pub mean_error_cm: f64,
    /// Worst Euclidean fit error against ground truth, in cm
    pub max_error_cm: f64,
    /// Number of samples the fit used (0 for identity)
    pub n: usize,
    pub version: u64,
    pub fitted_at: DateTime<Utc>,
}

impl CalibrationModel {
    /// Identity transform with the given version
    pub fn identity(version: u64) -> Self {
        Self {
            matrix: [[1.0, 0.0], [0.0, 1.0]],
            bias: [0.0, 0.0],
            mean_error_cm: 0.0,
            max_error_cm: 0.0,
            n: 0,
            version,
            fitted_at: Utc::now(),
        }
    }

    /// Apply the correction to a raw position
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let m = &self.matrix;
        (
            m[0][0] * x + m[0][1] * y + self.bias[0],
            m[1][0] * x + m[1][1] * y + self.bias[1],
        )
    }

    pub fn is_identity(&self) -> bool {
        self.matrix == [[1.0, 0.0], [0.0, 1.0]] && self.bias == [0.0, 0.0]
    }
}

/// Raw estimate awaiting an operator click
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PendingSample {
    pub raw_x: f64,
    pub raw_y: f64,
}

/// Calibration state as reported to the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationStatus {
    /// Pipeline is in calibration mode
    pub collecting: bool,
    /// Collection paused for a retrieval break
    pub paused: bool,
    /// Confirmed (raw, ground truth) pairs
    pub sample_count: usize,
    pub min_samples: usize,
    pub pending: Option<PendingSample>,
    pub model: CalibrationModel,
    /// Why the most recent fit was rejected; cleared by a successful fit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_fit_error: Option<String>,
}
