/// State estimators
///
/// `kalman` holds the constant-velocity filter shared by the laser (linear)
/// and radar (extended) update paths.
pub mod kalman;
