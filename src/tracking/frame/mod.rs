//! Frame-level inputs: video frames, pixel formats, camera model.

pub mod camera;
pub mod image;

pub use camera::CameraModel;
pub use image::{ColorFormat, Frame, OwnedFrame, VideoSource};
