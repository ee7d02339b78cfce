//! File formats: camera calibration and recorded detections.

pub mod calibration;
pub mod replay;

pub use calibration::load_camera_model;
pub use replay::{BlankVideo, Detection, ReplayLibrary};
