//! Calibration sample collection

use ironsight_common::events::{CalibrationModel, PendingSample};

use super::fitter::{fit_affine, CalibrationPair};
use super::CalibrationError;

/// Pending click plus confirmed pairs for one calibration run
///
/// Owned by the scoring processor; never shared.
#[derive(Debug, Clone)]
pub struct CalibrationCollector {
    pairs: Vec<CalibrationPair>,
    pending: Option<PendingSample>,
    paused: bool,
    units_to_cm: f64,
}

impl CalibrationCollector {
    pub fn new(units_to_cm: f64) -> Self {
        Self {
            pairs: Vec::new(),
            pending: None,
            paused: false,
            units_to_cm,
        }
    }

    /// Forget every sample and the pending click
    pub fn restart(&mut self) {
        self.pairs.clear();
        self.pending = None;
        self.paused = false;
    }

    /// Hold a raw estimate for the operator to click
    ///
    /// A newer impact replaces an unconfirmed one. Returns `None` while
    /// paused.
    pub fn offer(&mut self, raw_x: f64, raw_y: f64) -> Option<PendingSample> {
        if self.paused {
            return None;
        }
        let sample = PendingSample { raw_x, raw_y };
        self.pending = Some(sample);
        Some(sample)
    }

    pub fn discard_pending(&mut self) -> Option<PendingSample> {
        self.pending.take()
    }

    /// Pair the pending estimate with ground truth
    ///
    /// Returns the confirmed sample count.
    pub fn confirm(&mut self, gt_x: f64, gt_y: f64) -> Result<usize, CalibrationError> {
        if !(gt_x.is_finite() && gt_y.is_finite()) {
            return Err(CalibrationError::InvalidGroundTruth);
        }
        let pending = self.pending.take().ok_or(CalibrationError::NoPendingSample)?;
        self.pairs.push(CalibrationPair {
            raw_x: pending.raw_x,
            raw_y: pending.raw_y,
            gt_x,
            gt_y,
        });
        Ok(self.pairs.len())
    }

    /// Fit over every confirmed pair
    pub fn fit(&self, version: u64) -> Result<CalibrationModel, CalibrationError> {
        fit_affine(&self.pairs, self.units_to_cm, version)
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pending(&self) -> Option<PendingSample> {
        self.pending
    }

    pub fn sample_count(&self) -> usize {
        self.pairs.len()
    }

    pub fn pairs(&self) -> &[CalibrationPair] {
        &self.pairs
    }
}
