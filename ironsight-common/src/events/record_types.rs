//! Per-shot persisted record handed to the external logger

use serde::{Deserialize, Serialize};

use super::scoring_types::Shot;

/// Raw features of one sensor channel as fused into the shot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRecord {
    /// Channel label (N, E, S, W, NE, NW, SE, SW)
    pub label: String,
    /// Node that reported this channel
    pub node_id: String,
    pub peak: f64,
    pub energy: f64,
    pub energy2: f64,
    /// Arrival offset relative to the node's earliest channel, if valid
    pub tdoa_us: Option<f64>,
}

/// Localization diagnostics for one shot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateDiagnostics {
    pub energy_x: Option<f64>,
    pub energy_y: Option<f64>,
    pub energy_conf: f64,
    pub tdoa_x: Option<f64>,
    pub tdoa_y: Option<f64>,
    pub tdoa_conf: f64,
    /// RMS residual of the TDOA solve in microseconds
    pub tdoa_residual_us: Option<f64>,
    pub raw_r: f64,
}

/// Operator-measured position for offline accuracy analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruth {
    pub x: f64,
    pub y: f64,
    pub r: f64,
    pub score: u8,
    pub is_x: bool,
    /// Euclidean distance between the corrected shot and ground truth, in cm
    pub error_cm: f64,
}

/// One row per shot for the external logger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotRecord {
    pub shot: Shot,
    pub channels: Vec<ChannelRecord>,
    pub node_ids: Vec<String>,
    pub fusion_confidence: f64,
    pub diagnostics: EstimateDiagnostics,
    pub ground_truth: Option<GroundTruth>,
}
