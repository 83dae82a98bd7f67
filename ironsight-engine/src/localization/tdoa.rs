//! TDOA multilateration
//!
//! Each channel's arrival offset is relative to its own node's earliest
//! channel, so range-difference equations are only formed between channels
//! of the same timing group. Every group contributes `k - 1` equations
//! (k = its channels with valid timing) against its earliest channel; the
//! stacked system is solved by Gauss-Newton starting at target center.

use thiserror::Error;

use super::geometry::SensorGeometry;
use crate::fusion::FusedChannel;
use crate::ingest::{ChannelLabel, ChannelSet};

/// Minimum channels with valid timing for a solve
pub const MIN_TDOA_CHANNELS: usize = 3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("need at least {need} timed channels, have {have}")]
    InsufficientChannels { need: usize, have: usize },

    #[error("singular / degenerate geometry")]
    SingularGeometry,

    #[error("did not converge after {iterations} iterations")]
    DidNotConverge { iterations: usize },

    #[error("solution r={r:.3} beyond plausible radius {max:.3}")]
    OutOfBounds { r: f64, max: f64 },
}

/// One hyperbola: `|p - anchor| - |p - reference| = range_diff`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeDifference {
    pub reference: (f64, f64),
    pub anchor: (f64, f64),
    pub range_diff: f64,
}

/// Converged position with its RMS range residual
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TdoaSolution {
    pub x: f64,
    pub y: f64,
    /// RMS of the equation residuals, sensor-plane units
    pub residual: f64,
    pub iterations: usize,
    pub equations: usize,
}

/// Gauss-Newton solver over stacked range differences
#[derive(Debug, Clone)]
pub struct HyperbolicSolver {
    /// Maximum iterations (default 50)
    pub max_iterations: usize,
    /// Convergence threshold on the step length (default 1e-9)
    pub tolerance: f64,
}

impl Default for HyperbolicSolver {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            tolerance: 1e-9,
        }
    }
}

impl HyperbolicSolver {
    /// Solve from `start`; needs at least two equations
    pub fn solve(
        &self,
        equations: &[RangeDifference],
        start: (f64, f64),
    ) -> Result<TdoaSolution, SolverError> {
        let m = equations.len();
        if m < 2 {
            return Err(SolverError::InsufficientChannels {
                need: MIN_TDOA_CHANNELS,
                have: m + 1,
            });
        }

        let (mut x, mut y) = start;
        for iter in 0..self.max_iterations {
            let mut jtj = [[0.0f64; 2]; 2];
            let mut jtr = [0.0f64; 2];

            for eq in equations {
                let da = dist(x, y, eq.anchor).max(1e-15);
                let dr = dist(x, y, eq.reference).max(1e-15);
                let ri = (da - dr) - eq.range_diff;

                let jx = (x - eq.anchor.0) / da - (x - eq.reference.0) / dr;
                let jy = (y - eq.anchor.1) / da - (y - eq.reference.1) / dr;

                jtj[0][0] += jx * jx;
                jtj[0][1] += jx * jy;
                jtj[1][0] += jy * jx;
                jtj[1][1] += jy * jy;
                jtr[0] += jx * ri;
                jtr[1] += jy * ri;
            }

            let det = jtj[0][0] * jtj[1][1] - jtj[0][1] * jtj[1][0];
            if det.abs() < 1e-30 {
                return Err(SolverError::SingularGeometry);
            }
            let inv_det = 1.0 / det;
            let mut delta_x = inv_det * (jtj[1][1] * jtr[0] - jtj[0][1] * jtr[1]);
            let mut delta_y = inv_det * (-jtj[1][0] * jtr[0] + jtj[0][0] * jtr[1]);

            // Halve the step while it makes the fit worse
            let cost = residual_rms(x, y, equations);
            let mut halvings = 0;
            while halvings < 6 && residual_rms(x - delta_x, y - delta_y, equations) > cost {
                delta_x *= 0.5;
                delta_y *= 0.5;
                halvings += 1;
            }

            x -= delta_x;
            y -= delta_y;
            if !(x.is_finite() && y.is_finite()) {
                return Err(SolverError::DidNotConverge { iterations: iter + 1 });
            }

            if (delta_x * delta_x + delta_y * delta_y).sqrt() < self.tolerance {
                return Ok(TdoaSolution {
                    x,
                    y,
                    residual: residual_rms(x, y, equations),
                    iterations: iter + 1,
                    equations: m,
                });
            }
        }

        Err(SolverError::DidNotConverge {
            iterations: self.max_iterations,
        })
    }
}

/// TDOA position with confidence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TdoaEstimate {
    pub x: f64,
    pub y: f64,
    pub confidence: f64,
    pub residual_us: f64,
    pub equations: usize,
}

#[derive(Debug, Clone)]
pub struct TdoaEstimator {
    geometry: SensorGeometry,
    solver: HyperbolicSolver,
    /// units per second
    wave_speed: f64,
    residual_scale_us: f64,
    max_radius: f64,
}

impl TdoaEstimator {
    pub fn new(
        geometry: SensorGeometry,
        wave_speed: f64,
        residual_scale_us: f64,
        max_radius: f64,
    ) -> Self {
        Self {
            geometry,
            solver: HyperbolicSolver::default(),
            wave_speed,
            residual_scale_us,
            max_radius,
        }
    }

    /// Build the range-difference system for a fused event
    pub fn equations(&self, channels: &ChannelSet<FusedChannel>) -> Vec<RangeDifference> {
        let timed: Vec<(ChannelLabel, usize, f64)> = channels
            .iter()
            .filter_map(|(label, c)| c.sample.tdoa_us.map(|t| (label, c.group, t)))
            .collect();

        let mut groups: Vec<usize> = timed.iter().map(|(_, g, _)| *g).collect();
        groups.sort_unstable();
        groups.dedup();

        let mut equations = Vec::new();
        for group in groups {
            let members: Vec<&(ChannelLabel, usize, f64)> =
                timed.iter().filter(|(_, g, _)| *g == group).collect();
            let Some(reference) = members.iter().min_by(|a, b| a.2.total_cmp(&b.2)) else {
                continue;
            };
            let ref_pos = self.geometry.position(reference.0);
            for member in &members {
                if member.0 == reference.0 {
                    continue;
                }
                equations.push(RangeDifference {
                    reference: ref_pos,
                    anchor: self.geometry.position(member.0),
                    range_diff: self.wave_speed * (member.2 - reference.2) * 1e-6,
                });
            }
        }
        equations
    }

    pub fn estimate(&self, channels: &ChannelSet<FusedChannel>) -> Result<TdoaEstimate, SolverError> {
        let timed = channels
            .iter()
            .filter(|(_, c)| c.sample.tdoa_us.is_some())
            .count();
        if timed < MIN_TDOA_CHANNELS {
            return Err(SolverError::InsufficientChannels {
                need: MIN_TDOA_CHANNELS,
                have: timed,
            });
        }

        let equations = self.equations(channels);
        if equations.len() < 2 {
            return Err(SolverError::InsufficientChannels {
                need: MIN_TDOA_CHANNELS,
                have: equations.len() + 1,
            });
        }

        let solution = self.solver.solve(&equations, (0.0, 0.0))?;
        let r = (solution.x * solution.x + solution.y * solution.y).sqrt();
        if r > self.max_radius {
            return Err(SolverError::OutOfBounds {
                r,
                max: self.max_radius,
            });
        }

        let residual_us = solution.residual / self.wave_speed * 1e6;
        let m = solution.equations as f64;
        // Fewer equations leave less redundancy to catch a bad timing
        let redundancy = 1.0 - 1.0 / (m + 1.0);
        let confidence = (-residual_us / self.residual_scale_us).exp() * redundancy;

        Ok(TdoaEstimate {
            x: solution.x,
            y: solution.y,
            confidence: confidence.clamp(0.0, 1.0),
            residual_us,
            equations: solution.equations,
        })
    }
}

fn dist(x: f64, y: f64, p: (f64, f64)) -> f64 {
    ((x - p.0).powi(2) + (y - p.1).powi(2)).sqrt()
}

fn residual_rms(x: f64, y: f64, equations: &[RangeDifference]) -> f64 {
    let sum: f64 = equations
        .iter()
        .map(|eq| {
            let r = (dist(x, y, eq.anchor) - dist(x, y, eq.reference)) - eq.range_diff;
            r * r
        })
        .sum();
    (sum / equations.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::SensorChannelSample;

    const SPEED: f64 = 600.0;

    fn estimator() -> TdoaEstimator {
        TdoaEstimator::new(SensorGeometry::with_radius(0.5), SPEED, 50.0, 1.0)
    }

    /// Offsets (us) a node would report for an impact at (x, y)
    fn synthetic(labels: &[ChannelLabel], group: usize, x: f64, y: f64) -> Vec<(ChannelLabel, FusedChannel)> {
        let g = SensorGeometry::with_radius(0.5);
        let arrival: Vec<f64> = labels
            .iter()
            .map(|l| dist(x, y, g.position(*l)) / SPEED * 1e6)
            .collect();
        let first = arrival.iter().cloned().fold(f64::INFINITY, f64::min);
        labels
            .iter()
            .zip(arrival)
            .map(|(l, t)| {
                (
                    *l,
                    FusedChannel {
                        node_id: format!("node{}", group),
                        group,
                        sample: SensorChannelSample {
                            peak: 1.0,
                            energy: 1.0,
                            energy2: 0.0,
                            tdoa_us: Some(t - first),
                        },
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_recovers_known_position_from_four_channels() {
        use ChannelLabel::*;
        for &(x, y) in &[(0.12, -0.07), (0.0, 0.0), (-0.2, 0.15), (0.05, 0.3)] {
            let channels: ChannelSet<FusedChannel> =
                synthetic(&[N, E, S, W], 0, x, y).into_iter().collect();
            let est = estimator().estimate(&channels).unwrap();
            assert!((est.x - x).abs() < 1e-3, "x {} vs {}", est.x, x);
            assert!((est.y - y).abs() < 1e-3, "y {} vs {}", est.y, y);
            assert!(est.residual_us < 1e-3);
            assert_eq!(est.equations, 3);
            assert!((est.confidence - 0.75).abs() < 1e-3);
        }
    }

    #[test]
    fn test_two_groups_with_independent_references() {
        use ChannelLabel::*;
        let (x, y) = (-0.1, -0.18);
        let mut all = synthetic(&[N, E, S, W], 0, x, y);
        // Second node's clock offset is irrelevant: its offsets are relative
        all.extend(synthetic(&[NE, NW, SE, SW], 1, x, y));
        let channels: ChannelSet<FusedChannel> = all.into_iter().collect();

        let est = estimator().estimate(&channels).unwrap();
        assert_eq!(est.equations, 6);
        assert!((est.x - x).abs() < 1e-3);
        assert!((est.y - y).abs() < 1e-3);
    }

    #[test]
    fn test_fewer_than_three_timed_channels_is_infeasible() {
        use ChannelLabel::*;
        let mut channels: ChannelSet<FusedChannel> =
            synthetic(&[N, E, S, W], 0, 0.1, 0.1).into_iter().collect();
        for label in [S, W] {
            let mut c = channels.get(label).unwrap().clone();
            c.sample.tdoa_us = None;
            channels.insert(label, c);
        }
        assert!(matches!(
            estimator().estimate(&channels),
            Err(SolverError::InsufficientChannels { have: 2, .. })
        ));
    }

    #[test]
    fn test_noisy_timing_lowers_confidence() {
        use ChannelLabel::*;
        let clean: ChannelSet<FusedChannel> =
            synthetic(&[N, E, S, W, NE], 0, 0.1, 0.05).into_iter().collect();
        let mut noisy = clean.clone();
        let mut c = noisy.get(E).unwrap().clone();
        c.sample.tdoa_us = c.sample.tdoa_us.map(|t| t + 80.0);
        noisy.insert(E, c);

        let clean_est = estimator().estimate(&clean).unwrap();
        let noisy_est = estimator().estimate(&noisy).unwrap();
        assert!(noisy_est.residual_us > clean_est.residual_us);
        assert!(noisy_est.confidence < clean_est.confidence);
    }

    #[test]
    fn test_solver_rejects_single_equation() {
        let eq = RangeDifference {
            reference: (0.0, 0.5),
            anchor: (0.5, 0.0),
            range_diff: 0.0,
        };
        assert!(HyperbolicSolver::default().solve(&[eq], (0.0, 0.0)).is_err());
    }
}
