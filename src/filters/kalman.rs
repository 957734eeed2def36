//! Constant-velocity Kalman filter with a linear and an extended update.
//!
//! State vector (4D):
//! [0-1]: Position (px, py) [m]
//! [2-3]: Velocity (vx, vy) [m/s]
//!
//! The process model matrices are built per step from the elapsed time by
//! [`transition_matrix`] and [`process_noise`]; observation models and noise
//! are passed into each update by the caller.

use nalgebra::{Const, DimMin, SMatrix, SVector};
use serde::{Deserialize, Serialize};

use crate::error::{FusionError, FusionResult};
use crate::tools::{normalize_angle, radar_measurement};
use crate::types::{
    LaserNoise, LaserObsMat, LaserVec, RadarJacobian, RadarNoise, RadarVec, SensorKind, StateMat,
    StateVec, STATE_DIM,
};

/// Index of the bearing component in a radar measurement
const BEARING: usize = 1;

/// Constant-velocity transition over `dt` seconds.
pub fn transition_matrix(dt: f64) -> StateMat {
    let mut f = StateMat::identity();
    f[(0, 2)] = dt;
    f[(1, 3)] = dt;
    f
}

/// Discretised white-noise-acceleration process noise.
///
/// `noise_ax`/`noise_ay` are the acceleration variances per axis [m²/s⁴].
pub fn process_noise(dt: f64, noise_ax: f64, noise_ay: f64) -> StateMat {
    let dt_2 = dt * dt;
    let dt_3 = dt_2 * dt;
    let dt_4 = dt_3 * dt;

    let q_pos = dt_4 / 4.0;
    let q_cross = dt_3 / 2.0;

    StateMat::new(
        q_pos * noise_ax, 0.0, q_cross * noise_ax, 0.0, //
        0.0, q_pos * noise_ay, 0.0, q_cross * noise_ay, //
        q_cross * noise_ax, 0.0, dt_2 * noise_ax, 0.0, //
        0.0, q_cross * noise_ay, 0.0, dt_2 * noise_ay,
    )
}

/// Residual and its covariance from one measurement update.
#[derive(Clone, Debug, PartialEq)]
pub struct Innovation<const M: usize> {
    /// y = z - h(x)
    pub residual: SVector<f64, M>,

    /// S = H P Hᵀ + R
    pub covariance: SMatrix<f64, M, M>,

    /// Normalised innovation squared, yᵀ S⁻¹ y
    pub nis: f64,
}

impl<const M: usize> Innovation<M> {
    /// Number of rows in the observation model that produced this innovation
    pub fn observation_rows(&self) -> usize {
        M
    }
}

pub type LaserInnovation = Innovation<2>;
pub type RadarInnovation = Innovation<3>;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KalmanFilterState {
    /// Position (px, py) [m]
    pub position: (f64, f64),

    /// Velocity (vx, vy) [m/s]
    pub velocity: (f64, f64),

    /// Covariance trace for uncertainty
    pub covariance_trace: f64,

    /// Update counters
    pub predictions: u64,
    pub laser_updates: u64,
    pub radar_updates: u64,
}

#[derive(Clone, Debug)]
pub struct KalmanFilter {
    /// State vector [4D]
    state: StateVec,

    /// Covariance matrix [4x4]
    covariance: StateMat,

    predictions: u64,
    laser_updates: u64,
    radar_updates: u64,
}

impl KalmanFilter {
    pub fn new(state: StateVec, covariance: StateMat) -> Self {
        Self {
            state,
            covariance,
            predictions: 0,
            laser_updates: 0,
            radar_updates: 0,
        }
    }

    pub fn state(&self) -> &StateVec {
        &self.state
    }

    pub fn covariance(&self) -> &StateMat {
        &self.covariance
    }

    /// Time update: x = F x, P = F P Fᵀ + Q
    pub fn predict(&mut self, f: &StateMat, q: &StateMat) {
        self.state = f * self.state;
        self.covariance = f * self.covariance * f.transpose() + q;
        self.predictions += 1;
    }

    /// Linear (laser) measurement update.
    pub fn update(
        &mut self,
        z: &LaserVec,
        h: &LaserObsMat,
        r: &LaserNoise,
    ) -> FusionResult<Innovation<2>> {
        let residual = z - h * self.state;
        let innovation = self
            .correct(residual, h, r)
            .ok_or(FusionError::SingularInnovation {
                sensor: SensorKind::Laser,
            })?;
        self.laser_updates += 1;
        Ok(innovation)
    }

    /// Extended (radar) measurement update.
    ///
    /// The residual is taken against the nonlinear h(x); `hj` is only used to
    /// propagate covariance. The bearing residual is wrapped into (-π, π].
    pub fn update_ekf(
        &mut self,
        z: &RadarVec,
        hj: &RadarJacobian,
        r: &RadarNoise,
    ) -> FusionResult<Innovation<3>> {
        let (predicted, _) = radar_measurement(&self.state);
        let mut residual = z - predicted;
        residual[BEARING] = normalize_angle(residual[BEARING]);

        let innovation = self
            .correct(residual, hj, r)
            .ok_or(FusionError::SingularInnovation {
                sensor: SensorKind::Radar,
            })?;
        self.radar_updates += 1;
        Ok(innovation)
    }

    /// Shared gain/correction step. Nothing is written unless S inverts and
    /// the corrected estimate is finite.
    fn correct<const M: usize>(
        &mut self,
        residual: SVector<f64, M>,
        h: &SMatrix<f64, M, STATE_DIM>,
        r: &SMatrix<f64, M, M>,
    ) -> Option<Innovation<M>>
    where
        Const<M>: DimMin<Const<M>, Output = Const<M>>,
    {
        let p = &self.covariance;
        let h_t = h.transpose();
        let ph_t = p * h_t;
        let s = h * ph_t + r;
        let s_inv = s.try_inverse()?;

        let k = ph_t * s_inv;
        let new_state = self.state + k * residual;

        let i_minus_kh = StateMat::identity() - k * h;
        let mut new_cov = i_minus_kh * p;

        // Symmetrize to limit numerical drift
        new_cov = (new_cov + new_cov.transpose()) * 0.5;

        if !new_state.iter().chain(new_cov.iter()).all(|v| v.is_finite()) {
            return None;
        }

        let nis = (residual.transpose() * s_inv * residual)[(0, 0)];

        self.state = new_state;
        self.covariance = new_cov;

        Some(Innovation {
            residual,
            covariance: s,
            nis,
        })
    }

    /// Get current state snapshot
    pub fn get_state(&self) -> KalmanFilterState {
        KalmanFilterState {
            position: (self.state[0], self.state[1]),
            velocity: (self.state[2], self.state[3]),
            covariance_trace: self.covariance.trace(),
            predictions: self.predictions,
            laser_updates: self.laser_updates,
            radar_updates: self.radar_updates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::calculate_jacobian;
    use crate::types::{laser_observation_matrix, max_asymmetry};
    use approx::assert_relative_eq;

    fn initial_covariance() -> StateMat {
        StateMat::from_diagonal(&StateVec::new(1.0, 1.0, 1000.0, 1000.0))
    }

    fn laser_noise() -> LaserNoise {
        LaserNoise::from_diagonal_element(0.0225)
    }

    fn radar_noise() -> RadarNoise {
        RadarNoise::from_diagonal(&RadarVec::new(0.09, 0.0009, 0.09))
    }

    #[test]
    fn test_transition_matrix() {
        let f = transition_matrix(0.1);
        assert_eq!(f[(0, 2)], 0.1);
        assert_eq!(f[(1, 3)], 0.1);
        assert_eq!(f[(0, 3)], 0.0);
        assert_eq!(f.diagonal(), StateVec::repeat(1.0));
    }

    #[test]
    fn test_process_noise() {
        let q = process_noise(1.0, 9.0, 9.0);
        assert_relative_eq!(q[(0, 0)], 2.25);
        assert_relative_eq!(q[(0, 2)], 4.5);
        assert_relative_eq!(q[(2, 0)], 4.5);
        assert_relative_eq!(q[(2, 2)], 9.0);
        assert_eq!(q[(0, 1)], 0.0);
        assert_eq!(process_noise(0.0, 9.0, 9.0), StateMat::zeros());
    }

    #[test]
    fn test_predict_constant_velocity() {
        let mut kf = KalmanFilter::new(StateVec::new(0.0, 0.0, 1.0, 1.0), initial_covariance());
        let before = *kf.covariance();

        kf.predict(&transition_matrix(1.0), &process_noise(1.0, 9.0, 9.0));

        assert_relative_eq!(*kf.state(), StateVec::new(1.0, 1.0, 1.0, 1.0));
        for i in 0..4 {
            assert!(kf.covariance()[(i, i)] > before[(i, i)]);
        }
    }

    #[test]
    fn test_laser_update_moves_towards_measurement() {
        let mut kf = KalmanFilter::new(StateVec::new(1.0, 1.0, 0.0, 0.0), initial_covariance());
        let trace_before = kf.covariance().trace();

        let innovation = kf
            .update(&LaserVec::new(2.0, 1.0), &laser_observation_matrix(), &laser_noise())
            .unwrap();

        assert_eq!(innovation.observation_rows(), 2);
        assert_relative_eq!(innovation.residual, LaserVec::new(1.0, 0.0));
        assert!(kf.state()[0] > 1.9 && kf.state()[0] < 2.0);
        assert!(kf.covariance().trace() < trace_before);
        assert!(innovation.nis > 0.0);
    }

    #[test]
    fn test_laser_convergence() {
        let mut kf = KalmanFilter::new(StateVec::new(0.0, 0.0, 0.0, 0.0), initial_covariance());
        let h = laser_observation_matrix();
        let r = laser_noise();
        let mut last_diag = kf.covariance().diagonal();

        for _ in 0..20 {
            kf.update(&LaserVec::new(3.0, -2.0), &h, &r).unwrap();
            let diag = kf.covariance().diagonal();
            assert!(diag[0] < last_diag[0]);
            assert!(diag[1] < last_diag[1]);
            last_diag = diag;
        }

        assert!((kf.state()[0] - 3.0).abs() < 1e-2);
        assert!((kf.state()[1] + 2.0).abs() < 1e-2);
    }

    #[test]
    fn test_bearing_residual_wraps() {
        // Predicted bearing 3.1 rad at range 10
        let bearing: f64 = 3.1;
        let x = StateVec::new(10.0 * bearing.cos(), 10.0 * bearing.sin(), 0.0, 0.0);
        let mut kf = KalmanFilter::new(x, initial_covariance());

        let z = RadarVec::new(10.0, -3.0, 0.0);
        let innovation = kf.update_ekf(&z, &calculate_jacobian(&x), &radar_noise()).unwrap();

        assert_eq!(innovation.observation_rows(), 3);
        assert!((innovation.residual[1] - 0.1832).abs() < 1e-3);
    }

    #[test]
    fn test_radar_update_pulls_range() {
        let x = StateVec::new(5.0, 0.0, 0.0, 0.0);
        let mut kf = KalmanFilter::new(x, initial_covariance());

        kf.update_ekf(&RadarVec::new(6.0, 0.0, 1.0), &calculate_jacobian(&x), &radar_noise())
            .unwrap();

        assert!(kf.state()[0] > 5.0 && kf.state()[0] < 6.0);
        assert!(kf.state()[2] > 0.0);
        assert!(max_asymmetry(kf.covariance()) < 1e-9);
    }

    #[test]
    fn test_singular_innovation_leaves_state_untouched() {
        let x = StateVec::new(1.0, 2.0, 3.0, 4.0);
        let mut kf = KalmanFilter::new(x, StateMat::zeros());

        let err = kf
            .update(&LaserVec::new(0.0, 0.0), &laser_observation_matrix(), &LaserNoise::zeros())
            .unwrap_err();

        assert_eq!(err, FusionError::SingularInnovation { sensor: SensorKind::Laser });
        assert_eq!(*kf.state(), x);
        assert_eq!(*kf.covariance(), StateMat::zeros());
        assert_eq!(kf.get_state().laser_updates, 0);
    }
}
