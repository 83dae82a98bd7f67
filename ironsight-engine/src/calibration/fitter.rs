//! Affine least-squares fit
//!
//! Finds `A` (2×2) and `b` minimising `Σ |A·raw_i + b - gt_i|²`. The two
//! output coordinates decouple into independent 3-parameter regressions
//! sharing one normal matrix `XᵀX`, with rows `[raw_x, raw_y, 1]`.

use chrono::Utc;
use ironsight_common::events::CalibrationModel;

use super::CalibrationError;

/// Minimum confirmed pairs before a fit is attempted
pub const MIN_CALIBRATION_SAMPLES: usize = 3;

/// Below this eigenvalue ratio the ground-truth cloud is treated as a line
const COLLINEAR_RATIO: f64 = 1e-6;

/// Below this the normal matrix is treated as singular (scale-free:
/// determinant over the product of its diagonal)
const SINGULAR_RATIO: f64 = 1e-10;

/// A raw estimate paired with the operator's ground-truth click
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationPair {
    pub raw_x: f64,
    pub raw_y: f64,
    pub gt_x: f64,
    pub gt_y: f64,
}

/// Fit a model from `pairs`
///
/// Errors are reported in centimetres: `units_to_cm` converts sensor-plane
/// units (100 for metres).
pub fn fit_affine(
    pairs: &[CalibrationPair],
    units_to_cm: f64,
    version: u64,
) -> Result<CalibrationModel, CalibrationError> {
    if pairs.len() < MIN_CALIBRATION_SAMPLES {
        return Err(CalibrationError::InsufficientSamples {
            have: pairs.len(),
            need: MIN_CALIBRATION_SAMPLES,
        });
    }

    check_ground_truth_spread(pairs)?;

    let mut xtx = [[0.0f64; 3]; 3];
    let mut xtg_x = [0.0f64; 3];
    let mut xtg_y = [0.0f64; 3];
    for p in pairs {
        let row = [p.raw_x, p.raw_y, 1.0];
        for i in 0..3 {
            for j in 0..3 {
                xtx[i][j] += row[i] * row[j];
            }
            xtg_x[i] += row[i] * p.gt_x;
            xtg_y[i] += row[i] * p.gt_y;
        }
    }

    let inv = invert_3x3(xtx).ok_or_else(|| {
        CalibrationError::DegenerateGeometry("raw estimates are collinear".to_string())
    })?;
    let beta_x = mat_vec(&inv, &xtg_x);
    let beta_y = mat_vec(&inv, &xtg_y);

    let matrix = [[beta_x[0], beta_x[1]], [beta_y[0], beta_y[1]]];
    let bias = [beta_x[2], beta_y[2]];
    if matrix.iter().flatten().chain(bias.iter()).any(|v| !v.is_finite()) {
        return Err(CalibrationError::DegenerateGeometry(
            "fit produced non-finite coefficients".to_string(),
        ));
    }

    let mut model = CalibrationModel {
        matrix,
        bias,
        mean_error_cm: 0.0,
        max_error_cm: 0.0,
        n: pairs.len(),
        version,
        fitted_at: Utc::now(),
    };

    let errors: Vec<f64> = pairs
        .iter()
        .map(|p| {
            let (cx, cy) = model.apply(p.raw_x, p.raw_y);
            ((cx - p.gt_x).powi(2) + (cy - p.gt_y).powi(2)).sqrt() * units_to_cm
        })
        .collect();
    model.mean_error_cm = errors.iter().sum::<f64>() / errors.len() as f64;
    model.max_error_cm = errors.iter().cloned().fold(0.0, f64::max);

    Ok(model)
}

/// Reject ground truth that is (nearly) a single point or a line
fn check_ground_truth_spread(pairs: &[CalibrationPair]) -> Result<(), CalibrationError> {
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.gt_x).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.gt_y).sum::<f64>() / n;
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for p in pairs {
        let dx = p.gt_x - mx;
        let dy = p.gt_y - my;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }

    // Eigenvalues of the 2×2 scatter matrix
    let trace = sxx + syy;
    let diff = ((sxx - syy).powi(2) + 4.0 * sxy * sxy).sqrt();
    let l_max = (trace + diff) / 2.0;
    let l_min = (trace - diff) / 2.0;

    if l_max <= f64::EPSILON || l_min / l_max < COLLINEAR_RATIO {
        return Err(CalibrationError::DegenerateGeometry(
            "ground-truth points are collinear".to_string(),
        ));
    }
    Ok(())
}

fn invert_3x3(a: [[f64; 3]; 3]) -> Option<[[f64; 3]; 3]> {
    let det = a[0][0] * (a[1][1] * a[2][2] - a[1][2] * a[2][1])
        - a[0][1] * (a[1][0] * a[2][2] - a[1][2] * a[2][0])
        + a[0][2] * (a[1][0] * a[2][1] - a[1][1] * a[2][0]);
    let scale = a[0][0] * a[1][1] * a[2][2];
    if det.abs() < 1e-30 || scale <= 0.0 || det.abs() / scale < SINGULAR_RATIO {
        return None;
    }
    let inv = 1.0 / det;
    let mut out = [[0.0f64; 3]; 3];
    out[0][0] = inv * (a[1][1] * a[2][2] - a[1][2] * a[2][1]);
    out[0][1] = inv * (a[0][2] * a[2][1] - a[0][1] * a[2][2]);
    out[0][2] = inv * (a[0][1] * a[1][2] - a[0][2] * a[1][1]);
    out[1][0] = inv * (a[1][2] * a[2][0] - a[1][0] * a[2][2]);
    out[1][1] = inv * (a[0][0] * a[2][2] - a[0][2] * a[2][0]);
    out[1][2] = inv * (a[0][2] * a[1][0] - a[0][0] * a[1][2]);
    out[2][0] = inv * (a[1][0] * a[2][1] - a[1][1] * a[2][0]);
    out[2][1] = inv * (a[0][1] * a[2][0] - a[0][0] * a[2][1]);
    out[2][2] = inv * (a[0][0] * a[1][1] - a[0][1] * a[1][0]);
    Some(out)
}

fn mat_vec(m: &[[f64; 3]; 3], v: &[f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}
