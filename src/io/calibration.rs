//! Camera calibration files.
//!
//! ```yaml
//! width: 640
//! height: 480
//! intrinsics: [fx, fy, cx, cy]
//! ```
//!
//! A calibration taken at one resolution is scaled to the resolution the
//! backend is configured with.

use std::fs::File;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, TrackingError};
use crate::tracking::frame::CameraModel;

#[derive(Debug, Deserialize)]
struct CalibrationYaml {
    width: u32,
    height: u32,
    /// [fx, fy, cx, cy] in pixels
    intrinsics: Vec<f64>,
}

/// Load a calibration file and express it at `width` x `height`.
pub fn load_camera_model(path: &Path, width: u32, height: u32) -> Result<CameraModel> {
    let file = File::open(path).map_err(|source| TrackingError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let yaml: CalibrationYaml = serde_yaml::from_reader(file).map_err(|e| {
        TrackingError::ConfigurationError(format!("malformed calibration {:?}: {}", path, e))
    })?;

    let camera = intrinsics_to_camera(&yaml)
        .map_err(|msg| TrackingError::ConfigurationError(format!("{:?}: {}", path, msg)))?;

    if (camera.width, camera.height) == (width, height) {
        return Ok(camera);
    }
    debug!(
        from_width = camera.width,
        from_height = camera.height,
        width,
        height,
        "rescaling calibration"
    );
    Ok(camera.rescaled(width, height))
}

fn intrinsics_to_camera(yaml: &CalibrationYaml) -> std::result::Result<CameraModel, String> {
    if yaml.width == 0 || yaml.height == 0 {
        return Err(format!("calibrated size {}x{} is empty", yaml.width, yaml.height));
    }
    let &[fx, fy, cx, cy] = yaml.intrinsics.as_slice() else {
        return Err(format!(
            "expected 4 intrinsics [fx, fy, cx, cy], got {}",
            yaml.intrinsics.len()
        ));
    };
    if !(fx > 0.0 && fy > 0.0) {
        return Err(format!("focal lengths must be positive, got fx={} fy={}", fx, fy));
    }
    Ok(CameraModel {
        width: yaml.width,
        height: yaml.height,
        fx,
        fy,
        cx,
        cy,
    })
}
