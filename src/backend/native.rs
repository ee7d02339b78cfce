//! Capability sets of the native marker-detection libraries.
//!
//! Each vendor library is an opaque set of calls: configure a camera,
//! register targets, detect on a frame, read back poses. Backends talk to a
//! library only through these traits, so a real FFI binding and the
//! in-process replay library are interchangeable.
//!
//! Poses cross this boundary as 16 values in row-major order of the
//! row-vector layout described in [`Pose`](crate::geometry::Pose).

use std::path::Path;

use thiserror::Error;

use crate::config::{CalibrationSource, DetectorSlot};
use crate::tracking::frame::{CameraModel, ColorFormat};

/// Raw pose as returned by a native call.
pub type NativePose = [f64; 16];

/// Failure reported by a native call.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{call}: {message}")]
pub struct NativeError {
    pub call: &'static str,
    pub message: String,
}

impl NativeError {
    pub fn new(call: &'static str, message: impl Into<String>) -> Self {
        Self {
            call,
            message: message.into(),
        }
    }
}

/// Tightly packed image handed to a native detector.
#[derive(Debug, Clone, Copy)]
pub struct NativeImage<'a> {
    pub pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub format: ColorFormat,
}

/// Marker geometry for ALVAR's marker detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerGeometry {
    pub size: f64,
    pub resolution: u32,
    pub margin: f64,
}

/// Acceptance limits for ALVAR detections.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorThresholds {
    pub max_marker_error: f64,
    pub max_track_error: f64,
}

/// One feature-target detection.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureDetection {
    pub target: String,
    pub pose: NativePose,
    pub inlier_ratio: f64,
    pub mapped_points: usize,
}

/// Calls every native library provides.
pub trait NativeContext {
    /// Create the camera context at `width` x `height`.
    fn init_camera(
        &mut self,
        width: u32,
        height: u32,
        calibration: &CalibrationSource,
    ) -> Result<CameraModel, NativeError>;

    /// Destroy the native context. Only called for a live context.
    fn release(&mut self);
}

/// ARTag-style library: fixed ID set plus named marker arrays.
pub trait ArTagNative: NativeContext {
    fn load_array_file(&mut self, path: &Path) -> Result<(), NativeError>;

    fn has_array(&self, name: &str) -> bool;

    fn detect(&mut self, image: &NativeImage<'_>) -> Result<(), NativeError>;

    /// Pose of a single marker found in the last frame.
    fn marker_pose(&self, id: i32) -> Option<NativePose>;

    /// Pose of a marker array found in the last frame.
    fn array_pose(&self, name: &str) -> Option<NativePose>;
}

/// ALVAR marker library: single markers and multi-marker bundles.
pub trait AlvarNative: NativeContext {
    fn init_marker_detector(&mut self, geometry: MarkerGeometry) -> Result<(), NativeError>;

    fn set_marker_size(&mut self, id: i32, size: f64);

    fn set_detect_additional(&mut self, enable: bool);

    fn select_detector(&mut self, detector: DetectorSlot);

    /// Load a bundle definition; returns the bundle's index.
    fn add_multi_marker(&mut self, ids: &[i32], config_file: &Path) -> Result<usize, NativeError>;

    /// Detect markers; only `interested` IDs are reported back.
    /// Returns the total number of markers seen.
    fn detect(
        &mut self,
        image: &NativeImage<'_>,
        interested: &[i32],
        thresholds: ErrorThresholds,
    ) -> Result<usize, NativeError>;

    /// Poses of the interested markers found by the last `detect`.
    fn poses(&self) -> Vec<(i32, NativePose)>;

    /// Pose and error per bundle, in bundle index order. A negative error
    /// means the bundle was not resolved.
    fn multi_marker_poses(&mut self) -> Vec<(NativePose, f64)>;
}

/// ALVAR feature library: natural image targets.
pub trait FeatureNative: NativeContext {
    fn add_target(&mut self, name: &str) -> Result<(), NativeError>;

    fn detect(&mut self, image: &NativeImage<'_>) -> Result<Vec<FeatureDetection>, NativeError>;
}
