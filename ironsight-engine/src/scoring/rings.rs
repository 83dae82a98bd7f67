//! Ring table: radius → score

use ironsight_common::events::RingScore;

use crate::error::{Error, Result};

/// Ring count: X plus 10 down to 1
pub const RING_COUNT: usize = 11;

/// Ordered ring radii, innermost (X) first
///
/// The first radius `>= r` decides the ring; anything beyond the last
/// radius is a miss.
#[derive(Debug, Clone, PartialEq)]
pub struct RingTable {
    radii: Vec<f64>,
}

impl RingTable {
    /// Validate and build a table from `[X, 10, 9, ..., 1]` radii
    pub fn new(radii: Vec<f64>) -> Result<Self> {
        if radii.len() != RING_COUNT {
            return Err(Error::Config(format!(
                "ring_radii needs {} values (X, 10..1), got {}",
                RING_COUNT,
                radii.len()
            )));
        }
        if radii.iter().any(|r| !r.is_finite() || *r <= 0.0) {
            return Err(Error::Config(
                "ring_radii must be positive and finite".to_string(),
            ));
        }
        if radii.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::Config(
                "ring_radii must be strictly increasing".to_string(),
            ));
        }
        Ok(Self { radii })
    }

    pub fn radii(&self) -> &[f64] {
        &self.radii
    }

    /// Outermost scoring radius
    pub fn outer_radius(&self) -> f64 {
        self.radii[RING_COUNT - 1]
    }

    pub fn score(&self, r: f64) -> RingScore {
        match self.radii.iter().position(|&limit| r <= limit) {
            Some(0) => RingScore::X,
            // index 1 is the 10 ring, index 10 the 1 ring
            Some(i) => RingScore::points((RING_COUNT - i) as u8),
            None => RingScore::MISS,
        }
    }
}
