//! Geometry utilities: marker poses and coordinate conventions.

pub mod frames;
pub mod pose;

pub use frames::{CoordinateConverter, Handedness};
pub use pose::{EulerAngles, MotionThreshold, Pose, has_moved_significantly};
