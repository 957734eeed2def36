// Lidar/radar fusion library
// Tracks one object's 2-D position and velocity with a Kalman filter for
// laser fixes and an extended Kalman filter for radar returns.

pub mod error;
pub mod filters;
pub mod input;
pub mod replay;
pub mod sensor_fusion;
pub mod tools;
pub mod types;

// Re-export public types
pub use error::{FusionError, FusionResult};
pub use filters::kalman::{KalmanFilter, KalmanFilterState};
pub use sensor_fusion::{FusionConfig, FusionEkf, FusionEvent, FusionState, StepClock};
pub use types::{GroundTruth, Measurement, MeasurementPackage, SensorKind};
