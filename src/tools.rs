//! Radar observation model, its Jacobian, and accuracy metrics.

use std::f64::consts::PI;

use crate::error::{FusionError, FusionResult};
use crate::types::{RadarJacobian, RadarVec, StateVec};

/// Smallest radius the radar model is evaluated at [m].
///
/// Range rate and the bearing derivatives divide by the radius, so positions
/// closer to the sensor than this are treated as lying on this circle.
pub const MIN_RANGE: f64 = 1e-3;

/// Wrap an angle into (-π, π].
///
/// Constant time for any finite input; non-finite input is returned as is.
pub fn normalize_angle(angle: f64) -> f64 {
    if !angle.is_finite() {
        return angle;
    }
    let wrapped = PI - (PI - angle).rem_euclid(2.0 * PI);
    // rem_euclid can round up to exactly 2π for tiny negative remainders
    if wrapped <= -PI {
        PI
    } else {
        wrapped
    }
}

/// Radius of the state's position, floored at [`MIN_RANGE`].
///
/// Returns the radius and whether the floor was applied.
pub fn floored_range(x: &StateVec) -> (f64, bool) {
    let range = x[0].hypot(x[1]);
    if range < MIN_RANGE {
        (MIN_RANGE, true)
    } else {
        (range, false)
    }
}

/// Nonlinear radar observation h(x) = [ρ, φ, ρ̇].
///
/// The second tuple element is true when the range floor was applied.
pub fn radar_measurement(x: &StateVec) -> (RadarVec, bool) {
    let (px, py, vx, vy) = (x[0], x[1], x[2], x[3]);
    let (rho, floored) = floored_range(x);
    let phi = py.atan2(px);
    let rho_dot = (px * vx + py * vy) / rho;
    (RadarVec::new(rho, phi, rho_dot), floored)
}

/// Jacobian of [`radar_measurement`] with respect to the state.
pub fn calculate_jacobian(x: &StateVec) -> RadarJacobian {
    let (px, py, vx, vy) = (x[0], x[1], x[2], x[3]);
    let (c2, _) = floored_range(x);
    let c1 = c2 * c2;
    let c3 = c1 * c2;

    RadarJacobian::new(
        px / c2,
        py / c2,
        0.0,
        0.0,
        -py / c1,
        px / c1,
        0.0,
        0.0,
        py * (vx * py - vy * px) / c3,
        px * (px * vy - py * vx) / c3,
        px / c2,
        py / c2,
    )
}

/// Component-wise root mean squared error between estimates and ground truth.
pub fn calculate_rmse(estimations: &[StateVec], ground_truth: &[StateVec]) -> FusionResult<StateVec> {
    if estimations.is_empty() {
        return Err(FusionError::InvalidMetricInput("no estimations".to_string()));
    }
    if estimations.len() != ground_truth.len() {
        return Err(FusionError::InvalidMetricInput(format!(
            "{} estimations vs {} ground truth samples",
            estimations.len(),
            ground_truth.len()
        )));
    }

    let sum_sq = estimations
        .iter()
        .zip(ground_truth)
        .fold(StateVec::zeros(), |acc, (est, gt)| {
            let residual = est - gt;
            acc + residual.component_mul(&residual)
        });

    Ok((sum_sq / estimations.len() as f64).map(f64::sqrt))
}
