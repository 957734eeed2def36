pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{FusionError, FusionResult};

/// Which physical sensor produced a measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Laser,
    Radar,
}

impl SensorKind {
    /// Number of raw values this sensor reports
    pub fn arity(self) -> usize {
        match self {
            SensorKind::Laser => MEASURE_DIM_LASER,
            SensorKind::Radar => MEASURE_DIM_RADAR,
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::Laser => write!(f, "laser"),
            SensorKind::Radar => write!(f, "radar"),
        }
    }
}

impl FromStr for SensorKind {
    type Err = FusionError;

    /// Accepts the single-letter log tags (`L`, `R`) as well as spelled-out names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l" | "laser" | "lidar" => Ok(SensorKind::Laser),
            "r" | "radar" => Ok(SensorKind::Radar),
            other => Err(FusionError::UnknownSensor(other.to_string())),
        }
    }
}

/// One raw observation, tagged by sensor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sensor", rename_all = "lowercase")]
pub enum Measurement {
    /// Cartesian position fix [m]
    Laser { px: f64, py: f64 },

    /// Polar return: range [m], bearing [rad], range rate [m/s]
    Radar {
        range: f64,
        bearing: f64,
        range_rate: f64,
    },
}

impl Measurement {
    pub fn sensor(&self) -> SensorKind {
        match self {
            Measurement::Laser { .. } => SensorKind::Laser,
            Measurement::Radar { .. } => SensorKind::Radar,
        }
    }

    /// True when every raw value is a finite number
    pub fn is_finite(&self) -> bool {
        match *self {
            Measurement::Laser { px, py } => px.is_finite() && py.is_finite(),
            Measurement::Radar {
                range,
                bearing,
                range_rate,
            } => range.is_finite() && bearing.is_finite() && range_rate.is_finite(),
        }
    }

    /// Position implied by the measurement in the Cartesian frame
    pub fn to_cartesian(&self) -> (f64, f64) {
        match *self {
            Measurement::Laser { px, py } => (px, py),
            Measurement::Radar { range, bearing, .. } => {
                (range * bearing.cos(), range * bearing.sin())
            }
        }
    }
}

/// A timestamped measurement as delivered to the fusion layer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasurementPackage {
    /// Microseconds since an arbitrary epoch
    pub timestamp: u64,
    pub measurement: Measurement,
}

impl MeasurementPackage {
    pub fn laser(timestamp: u64, px: f64, py: f64) -> Self {
        Self {
            timestamp,
            measurement: Measurement::Laser { px, py },
        }
    }

    pub fn radar(timestamp: u64, range: f64, bearing: f64, range_rate: f64) -> Self {
        Self {
            timestamp,
            measurement: Measurement::Radar {
                range,
                bearing,
                range_rate,
            },
        }
    }

    /// Build a package from an untyped value list, checking arity and finiteness.
    pub fn from_raw(sensor: SensorKind, raw: &[f64], timestamp: u64) -> FusionResult<Self> {
        if raw.len() != sensor.arity() {
            return Err(FusionError::DimensionMismatch {
                sensor,
                expected: sensor.arity(),
                actual: raw.len(),
            });
        }
        if raw.iter().any(|v| !v.is_finite()) {
            return Err(FusionError::NonFiniteMeasurement { sensor });
        }

        Ok(match sensor {
            SensorKind::Laser => Self::laser(timestamp, raw[0], raw[1]),
            SensorKind::Radar => Self::radar(timestamp, raw[0], raw[1], raw[2]),
        })
    }

    pub fn sensor(&self) -> SensorKind {
        self.measurement.sensor()
    }
}

/// Reference trajectory sample recorded alongside a measurement
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroundTruth {
    pub px: f64,
    pub py: f64,
    pub vx: f64,
    pub vy: f64,
}

impl GroundTruth {
    pub fn as_state(&self) -> StateVec {
        StateVec::new(self.px, self.py, self.vx, self.vy)
    }
}
