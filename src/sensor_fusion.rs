// sensor_fusion.rs: measurement routing and filter lifecycle for the lidar/radar tracker
//
// Everything in this module is independent of file I/O and the CLI.
// It takes measurement packages in, produces state estimates and events out,
// so it can be unit-tested with synthetic tracks and driven by any front end.

use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::error::{FusionError, FusionResult};
use crate::filters::kalman::{
    process_noise, transition_matrix, KalmanFilter, LaserInnovation, RadarInnovation,
};
use crate::tools::{calculate_jacobian, floored_range, MIN_RANGE};
use crate::types::{
    laser_observation_matrix, LaserNoise, LaserObsMat, LaserVec, Measurement, MeasurementPackage,
    RadarNoise, RadarVec, SensorKind, StateMat, StateVec,
};

const MICROS_PER_SECOND: f64 = 1_000_000.0;

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    // ── Process noise (acceleration variance) [m²/s⁴] ──
    pub noise_ax: f64,
    pub noise_ay: f64,

    // ── Laser measurement noise [m²] ──
    pub laser_px_var: f64,
    pub laser_py_var: f64,

    // ── Radar measurement noise ──
    pub radar_range_var: f64,
    pub radar_bearing_var: f64,
    pub radar_range_rate_var: f64,

    // ── Initial covariance diagonal ──
    pub initial_position_var: f64,
    pub initial_velocity_var: f64,

    // ── Feature flags ──
    pub use_laser: bool,
    pub use_radar: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            noise_ax: 9.0,
            noise_ay: 9.0,
            laser_px_var: 0.0225,
            laser_py_var: 0.0225,
            radar_range_var: 0.09,
            radar_bearing_var: 0.0009,
            radar_range_rate_var: 0.09,
            initial_position_var: 1.0,
            initial_velocity_var: 1000.0,
            use_laser: true,
            use_radar: true,
        }
    }
}

impl FusionConfig {
    /// Load a config from JSON; missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FusionResult<()> {
        let non_negative = [("noise_ax", self.noise_ax), ("noise_ay", self.noise_ay)];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(FusionError::InvalidConfig(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }

        let positive = [
            ("laser_px_var", self.laser_px_var),
            ("laser_py_var", self.laser_py_var),
            ("radar_range_var", self.radar_range_var),
            ("radar_bearing_var", self.radar_bearing_var),
            ("radar_range_rate_var", self.radar_range_rate_var),
            ("initial_position_var", self.initial_position_var),
            ("initial_velocity_var", self.initial_velocity_var),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(FusionError::InvalidConfig(format!(
                    "{name} must be finite and positive, got {value}"
                )));
            }
        }

        if !self.use_laser && !self.use_radar {
            return Err(FusionError::InvalidConfig(
                "at least one sensor must be enabled".to_string(),
            ));
        }
        Ok(())
    }

    pub fn laser_noise(&self) -> LaserNoise {
        LaserNoise::new(self.laser_px_var, 0.0, 0.0, self.laser_py_var)
    }

    pub fn radar_noise(&self) -> RadarNoise {
        RadarNoise::from_diagonal(&RadarVec::new(
            self.radar_range_var,
            self.radar_bearing_var,
            self.radar_range_rate_var,
        ))
    }

    pub fn initial_covariance(&self) -> StateMat {
        StateMat::from_diagonal(&StateVec::new(
            self.initial_position_var,
            self.initial_position_var,
            self.initial_velocity_var,
            self.initial_velocity_var,
        ))
    }

    pub fn sensor_enabled(&self, sensor: SensorKind) -> bool {
        match sensor {
            SensorKind::Laser => self.use_laser,
            SensorKind::Radar => self.use_radar,
        }
    }
}

// ─── Events ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum FusionEvent {
    Initialized { sensor: SensorKind, timestamp: u64, position: (f64, f64) },
    Predicted { dt: f64 },
    LaserUpdated { innovation: LaserInnovation },
    RadarUpdated { innovation: RadarInnovation, range_floored: bool },
    SensorSkipped { sensor: SensorKind, timestamp: u64 },
}

impl FusionEvent {
    /// Observation model size for update events
    pub fn observation_rows(&self) -> Option<usize> {
        match self {
            FusionEvent::LaserUpdated { innovation } => Some(innovation.observation_rows()),
            FusionEvent::RadarUpdated { innovation, .. } => Some(innovation.observation_rows()),
            _ => None,
        }
    }
}

// ─── Fusion output snapshot ──────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FusionState {
    /// Timestamp of the last processed measurement [µs]
    pub timestamp: u64,

    /// Position (px, py) [m]
    pub position: (f64, f64),

    /// Velocity (vx, vy) [m/s]
    pub velocity: (f64, f64),

    /// Speed magnitude [m/s]
    pub speed: f64,

    /// Covariance trace for uncertainty
    pub covariance_trace: f64,

    /// Update counters
    pub predictions: u64,
    pub laser_updates: u64,
    pub radar_updates: u64,
    pub skipped: u64,
}

// ─── Elapsed time ────────────────────────────────────────────────────────────

/// Reference time of the last accepted measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepClock {
    previous_timestamp: u64,
}

impl StepClock {
    pub fn start(timestamp: u64) -> Self {
        Self {
            previous_timestamp: timestamp,
        }
    }

    pub fn previous_timestamp(&self) -> u64 {
        self.previous_timestamp
    }

    /// Clock moved to `timestamp`, plus the elapsed time in seconds.
    ///
    /// `self` is left untouched so a rejected measurement does not move time.
    pub fn advance(self, timestamp: u64) -> FusionResult<(StepClock, f64)> {
        if timestamp < self.previous_timestamp {
            return Err(FusionError::TimestampRegression {
                previous: self.previous_timestamp,
                current: timestamp,
            });
        }
        let dt = (timestamp - self.previous_timestamp) as f64 / MICROS_PER_SECOND;
        Ok((StepClock::start(timestamp), dt))
    }
}

// ─── The main fusion struct ──────────────────────────────────────────────────

/// Filter plus its time reference; exists only once the first fix arrived.
#[derive(Clone, Debug)]
struct Track {
    filter: KalmanFilter,
    clock: StepClock,
}

#[derive(Clone, Debug)]
pub struct FusionEkf {
    config: FusionConfig,

    // Fixed sensor models
    h_laser: LaserObsMat,
    r_laser: LaserNoise,
    r_radar: RadarNoise,

    track: Option<Track>,
    last_observation_rows: Option<usize>,
    skipped: u64,
}

impl FusionEkf {
    pub fn new(config: FusionConfig) -> FusionResult<Self> {
        config.validate()?;
        Ok(Self {
            h_laser: laser_observation_matrix(),
            r_laser: config.laser_noise(),
            r_radar: config.radar_noise(),
            config,
            track: None,
            last_observation_rows: None,
            skipped: 0,
        })
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.track.is_some()
    }

    pub fn state(&self) -> Option<&StateVec> {
        self.track.as_ref().map(|t| t.filter.state())
    }

    pub fn covariance(&self) -> Option<&StateMat> {
        self.track.as_ref().map(|t| t.filter.covariance())
    }

    pub fn clock(&self) -> Option<StepClock> {
        self.track.as_ref().map(|t| t.clock)
    }

    /// Row count of the observation model used by the most recent update
    pub fn last_observation_rows(&self) -> Option<usize> {
        self.last_observation_rows
    }

    /// Feed one measurement: initialise on the first, otherwise predict and update.
    ///
    /// On error the filter is left exactly as it was before the call.
    pub fn process_measurement(
        &mut self,
        package: &MeasurementPackage,
    ) -> FusionResult<Vec<FusionEvent>> {
        let started = Instant::now();
        let sensor = package.sensor();

        if !package.measurement.is_finite() {
            return Err(FusionError::NonFiniteMeasurement { sensor });
        }

        if !self.config.sensor_enabled(sensor) {
            debug!("Skipping {} measurement at t={}", sensor, package.timestamp);
            self.skipped += 1;
            return Ok(vec![FusionEvent::SensorSkipped {
                sensor,
                timestamp: package.timestamp,
            }]);
        }

        let events = match &self.track {
            None => {
                let (track, event) = self.initialize(package)?;
                self.track = Some(track);
                vec![event]
            }
            Some(track) => {
                let (next, events) = self.step(track, package)?;
                self.track = Some(next);
                events
            }
        };

        if let Some(rows) = events.iter().find_map(FusionEvent::observation_rows) {
            self.last_observation_rows = Some(rows);
        }
        if let Some(track) = &self.track {
            debug!("x_ = {}", track.filter.state().transpose());
            debug!("P_ = {}", track.filter.covariance());
        }
        trace!("Processed {} measurement in {:?}", sensor, started.elapsed());

        Ok(events)
    }

    fn initialize(&self, package: &MeasurementPackage) -> FusionResult<(Track, FusionEvent)> {
        let (px, py) = initial_position(&package.measurement);
        let state = StateVec::new(px, py, 0.0, 0.0);

        info!(
            "Filter initialized from {} at t={} position=({:.3}, {:.3})",
            package.sensor(),
            package.timestamp,
            px,
            py
        );

        let track = Track {
            filter: KalmanFilter::new(state, self.config.initial_covariance()),
            clock: StepClock::start(package.timestamp),
        };
        let event = FusionEvent::Initialized {
            sensor: package.sensor(),
            timestamp: package.timestamp,
            position: (px, py),
        };
        Ok((track, event))
    }

    /// Predict and update a copy of the track; the caller commits it on success.
    fn step(
        &self,
        track: &Track,
        package: &MeasurementPackage,
    ) -> FusionResult<(Track, Vec<FusionEvent>)> {
        let (clock, dt) = track.clock.advance(package.timestamp)?;
        let mut filter = track.filter.clone();

        let f = transition_matrix(dt);
        let q = process_noise(dt, self.config.noise_ax, self.config.noise_ay);
        filter.predict(&f, &q);

        let mut events = vec![FusionEvent::Predicted { dt }];

        match package.measurement {
            Measurement::Radar {
                range,
                bearing,
                range_rate,
            } => {
                let (_, range_floored) = floored_range(filter.state());
                if range_floored {
                    warn!(
                        "Predicted position within {} m of the radar at t={}, flooring range",
                        MIN_RANGE, package.timestamp
                    );
                }
                let hj = calculate_jacobian(filter.state());
                let z = RadarVec::new(range, bearing, range_rate);
                let innovation = filter.update_ekf(&z, &hj, &self.r_radar)?;
                events.push(FusionEvent::RadarUpdated {
                    innovation,
                    range_floored,
                });
            }
            Measurement::Laser { px, py } => {
                let z = LaserVec::new(px, py);
                let innovation = filter.update(&z, &self.h_laser, &self.r_laser)?;
                events.push(FusionEvent::LaserUpdated { innovation });
            }
        }

        Ok((Track { filter, clock }, events))
    }

    /// Get current state snapshot
    pub fn get_state(&self) -> Option<FusionState> {
        self.track.as_ref().map(|track| {
            let kf = track.filter.get_state();
            FusionState {
                timestamp: track.clock.previous_timestamp(),
                position: kf.position,
                velocity: kf.velocity,
                speed: kf.velocity.0.hypot(kf.velocity.1),
                covariance_trace: kf.covariance_trace,
                predictions: kf.predictions,
                laser_updates: kf.laser_updates,
                radar_updates: kf.radar_updates,
                skipped: self.skipped,
            }
        })
    }
}

/// Cartesian position for the first fix, kept at least [`MIN_RANGE`] from the origin.
fn initial_position(measurement: &Measurement) -> (f64, f64) {
    let (px, py) = measurement.to_cartesian();
    if px.hypot(py) >= MIN_RANGE {
        return (px, py);
    }
    let direction = match *measurement {
        Measurement::Radar { bearing, .. } => bearing,
        Measurement::Laser { .. } => py.atan2(px),
    };
    warn!("First fix within {} m of the sensor, flooring initial range", MIN_RANGE);
    (MIN_RANGE * direction.cos(), MIN_RANGE * direction.sin())
}
