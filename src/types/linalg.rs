//! Linear algebra type system for the lidar/radar tracker
//!
//! Provides compile-time dimension checking and clean type aliases
//! for the Kalman and extended Kalman update paths.

use nalgebra::{SMatrix, SVector};

// ===== State Dimensions =====
pub const STATE_DIM: usize = 4; // (px, py, vx, vy)

// ===== Measurement Dimensions =====
pub const MEASURE_DIM_LASER: usize = 2; // (px, py)
pub const MEASURE_DIM_RADAR: usize = 3; // (rho, phi, rho_dot)

// ===== State Types =====
pub type StateVec = SVector<f64, STATE_DIM>;
pub type StateMat = SMatrix<f64, STATE_DIM, STATE_DIM>;

// Laser (linear) measurement types
pub type LaserVec = SVector<f64, MEASURE_DIM_LASER>;
pub type LaserNoise = SMatrix<f64, MEASURE_DIM_LASER, MEASURE_DIM_LASER>;
pub type LaserObsMat = SMatrix<f64, MEASURE_DIM_LASER, STATE_DIM>; // 2×4

// Radar (nonlinear) measurement types
pub type RadarVec = SVector<f64, MEASURE_DIM_RADAR>;
pub type RadarNoise = SMatrix<f64, MEASURE_DIM_RADAR, MEASURE_DIM_RADAR>;
pub type RadarJacobian = SMatrix<f64, MEASURE_DIM_RADAR, STATE_DIM>; // 3×4

/// Observation matrix for the laser: picks position out of the state.
pub fn laser_observation_matrix() -> LaserObsMat {
    LaserObsMat::new(
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0,
    )
}

/// Largest absolute asymmetry `|P[i,j] - P[j,i]|` of a square matrix.
pub fn max_asymmetry(p: &StateMat) -> f64 {
    (p - p.transpose()).amax()
}
