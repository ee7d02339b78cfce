//! Tracker backends: one per native marker-detection library.
//!
//! Every backend follows the same contract ([`TrackerBackend`]) and the same
//! lifecycle ([`state::Lifecycle`]); variants differ only in how they talk
//! to their native library and in the shape of their results:
//!
//! - [`ArTagBackend`]: single IDs and named marker arrays.
//! - [`AlvarBackend`]: single markers and multi-marker bundles with a
//!   per-bundle error.
//! - [`FeatureBackend`]: natural image targets gated by inlier ratio and
//!   mapped-point count.

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{BackendConfig, CalibrationSource};
use crate::error::{Result, TrackingError};
use crate::geometry::Handedness;
use crate::tracking::frame::{CameraModel, Frame};
use crate::tracking::TrackingResult;

pub mod alvar;
pub mod artag;
pub mod feature;
#[cfg(feature = "alvar-ffi")]
pub mod ffi;
pub mod native;
pub mod state;

pub use alvar::AlvarBackend;
pub use artag::ArTagBackend;
pub use feature::FeatureBackend;
pub use state::{BackendState, ConfigureAction, Lifecycle};

use native::{NativeContext, NativeImage};

/// Native library family behind a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    ArTag,
    Alvar,
    AlvarFeature,
}

/// What the caller wants tracked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerSpec {
    /// A single fiducial by ID.
    Id(i32),
    /// A named marker array defined in the backend's array file.
    Array(String),
    /// A multi-marker bundle loaded from a vendor configuration file.
    Bundle { ids: Vec<i32>, config_file: PathBuf },
    /// A natural-feature image target.
    Feature(String),
}

impl fmt::Display for MarkerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "marker #{}", id),
            Self::Array(name) => write!(f, "array '{}'", name),
            Self::Bundle { ids, config_file } => {
                write!(f, "bundle {:?} ({})", ids, config_file.display())
            }
            Self::Feature(name) => write!(f, "feature target '{}'", name),
        }
    }
}

/// Backend-specific identity of an associated target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HandleTarget {
    Id(i32),
    Name(String),
    Bundle(usize),
}

/// Opaque handle returned by [`TrackerBackend::associate_marker`].
///
/// Valid until the backend is re-initialized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarkerHandle {
    pub target: HandleTarget,
    pub generation: u64,
}

impl fmt::Display for MarkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            HandleTarget::Id(id) => write!(f, "id:{}@{}", id, self.generation),
            HandleTarget::Name(name) => write!(f, "name:{}@{}", name, self.generation),
            HandleTarget::Bundle(index) => write!(f, "bundle:{}@{}", index, self.generation),
        }
    }
}

/// Common contract of all tracker backends.
///
/// Backends are not re-entrant: one frame is processed and queried before
/// the next `process_frame` call.
pub trait TrackerBackend {
    fn kind(&self) -> BackendKind;

    fn state(&self) -> BackendState;

    /// Active configuration, once configured.
    fn config(&self) -> Option<&BackendConfig>;

    /// Camera reported by the native library, once configured.
    fn camera(&self) -> Option<&CameraModel>;

    /// Convention of the poses this backend returns.
    fn native_handedness(&self) -> Handedness {
        Handedness::RightHanded
    }

    /// Create (or re-create) the native context.
    ///
    /// An identical configuration is a no-op. Any change tears the old
    /// context down first and invalidates every handle.
    fn configure(&mut self, config: BackendConfig) -> Result<()>;

    fn associate_marker(&mut self, spec: &MarkerSpec) -> Result<MarkerHandle>;

    /// Run detection; queries reflect this frame until the next call.
    fn process_frame(&mut self, frame: &Frame<'_>) -> Result<()>;

    fn query(&self, handle: &MarkerHandle) -> Result<TrackingResult>;

    /// Release the native context. Safe to call any number of times.
    fn teardown(&mut self);
}

impl<T: TrackerBackend + ?Sized> TrackerBackend for Box<T> {
    fn kind(&self) -> BackendKind {
        (**self).kind()
    }

    fn state(&self) -> BackendState {
        (**self).state()
    }

    fn config(&self) -> Option<&BackendConfig> {
        (**self).config()
    }

    fn camera(&self) -> Option<&CameraModel> {
        (**self).camera()
    }

    fn native_handedness(&self) -> Handedness {
        (**self).native_handedness()
    }

    fn configure(&mut self, config: BackendConfig) -> Result<()> {
        (**self).configure(config)
    }

    fn associate_marker(&mut self, spec: &MarkerSpec) -> Result<MarkerHandle> {
        (**self).associate_marker(spec)
    }

    fn process_frame(&mut self, frame: &Frame<'_>) -> Result<()> {
        (**self).process_frame(frame)
    }

    fn query(&self, handle: &MarkerHandle) -> Result<TrackingResult> {
        (**self).query(handle)
    }

    fn teardown(&mut self) {
        (**self).teardown()
    }
}

// ============================================================================
// Shared backend plumbing
// ============================================================================

/// Check that a calibration source is usable before touching the native side.
fn validate_calibration(source: &CalibrationSource) -> Result<()> {
    match source {
        CalibrationSource::File(path) => {
            if !path.is_file() {
                warn!(path = %path.display(), "calibration file missing");
                return Err(TrackingError::ConfigurationError(format!(
                    "calibration file {:?} does not exist",
                    path
                )));
            }
        }
        CalibrationSource::FocalLength { fx, fy } => {
            if !(fx.is_finite() && fy.is_finite() && *fx > 0.0 && *fy > 0.0) {
                return Err(TrackingError::ConfigurationError(format!(
                    "focal lengths must be positive, got fx={} fy={}",
                    fx, fy
                )));
            }
        }
    }
    Ok(())
}

/// Apply `config` to a native context following the lifecycle rules.
///
/// `setup` runs after the camera context exists and configures the
/// backend-specific detector state. Returns true when the native context was
/// (re)created, in which case the caller must drop every per-target state.
fn configure_native<N, F>(
    lifecycle: &mut Lifecycle,
    native: &mut N,
    config: BackendConfig,
    setup: F,
) -> Result<bool>
where
    N: NativeContext,
    F: FnOnce(&mut N) -> Result<()>,
{
    let action = lifecycle.plan(&config);
    if action == ConfigureAction::Unchanged {
        debug!("configuration unchanged, keeping native context");
        return Ok(false);
    }

    let camera = config.camera();
    if camera.width == 0 || camera.height == 0 {
        return Err(TrackingError::ConfigurationError(format!(
            "image dimensions must be non-zero, got {}x{}",
            camera.width, camera.height
        )));
    }
    validate_calibration(&camera.calibration)?;

    if action == ConfigureAction::Reinitialize {
        info!("configuration changed, re-initializing native context");
        if lifecycle.mark_released() {
            native.release();
        }
    }

    let model = native
        .init_camera(camera.width, camera.height, &camera.calibration)
        .map_err(|e| TrackingError::ConfigurationError(e.to_string()))?;

    if let Err(e) = setup(native) {
        native.release();
        return Err(e);
    }

    lifecycle.mark_configured(config, model);
    Ok(true)
}

/// Ensure a frame matches the configured image size.
fn check_frame_dimensions(lifecycle: &Lifecycle, frame: &Frame<'_>) -> Result<()> {
    let Some(config) = lifecycle.config() else {
        return Err(TrackingError::not_initialized("process_frame requires configure"));
    };
    if config.dimensions() != frame.dimensions() {
        let (w, h) = config.dimensions();
        return Err(TrackingError::ConfigurationError(format!(
            "frame is {}x{} but the backend is configured for {}x{}",
            frame.width(),
            frame.height(),
            w,
            h
        )));
    }
    Ok(())
}

fn native_image<'a>(frame: &Frame<'_>, pixels: &'a [u8]) -> NativeImage<'a> {
    NativeImage {
        pixels,
        width: frame.width(),
        height: frame.height(),
        format: frame.format(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_display() {
        let handle = MarkerHandle {
            target: HandleTarget::Name("ground".into()),
            generation: 3,
        };
        assert_eq!(handle.to_string(), "name:ground@3");
    }

    #[test]
    fn test_validate_calibration() {
        assert!(validate_calibration(&CalibrationSource::FocalLength { fx: 500.0, fy: 500.0 }).is_ok());
        assert!(validate_calibration(&CalibrationSource::FocalLength { fx: 0.0, fy: 500.0 }).is_err());

        let missing = CalibrationSource::File(PathBuf::from("/nonexistent/camera.yaml"));
        assert!(matches!(
            validate_calibration(&missing),
            Err(TrackingError::ConfigurationError(_))
        ));
    }
}
