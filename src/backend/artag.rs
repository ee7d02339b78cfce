//! ARTag-style backend: fixed fiducial ID set plus named marker arrays.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::backend::native::ArTagNative;
use crate::backend::{
    BackendKind, BackendState, HandleTarget, Lifecycle, MarkerHandle, MarkerSpec, TrackerBackend,
    check_frame_dimensions, configure_native, native_image,
};
use crate::config::BackendConfig;
use crate::error::{Result, TrackingError};
use crate::geometry::Pose;
use crate::tracking::frame::{CameraModel, Frame};
use crate::tracking::{TrackingMetrics, TrackingResult};

/// Number of distinct ARTag fiducials (IDs `0..ARTAG_ID_COUNT`).
pub const ARTAG_ID_COUNT: i32 = 2002;

/// Tracker for ARTag-style single fiducials and named marker arrays.
pub struct ArTagBackend<N: ArTagNative> {
    native: N,
    lifecycle: Lifecycle,
    ids: HashSet<i32>,
    arrays: HashSet<String>,
}

impl<N: ArTagNative> ArTagBackend<N> {
    pub fn new(native: N) -> Self {
        Self {
            native,
            lifecycle: Lifecycle::new(),
            ids: HashSet::new(),
            arrays: HashSet::new(),
        }
    }

    pub fn native(&self) -> &N {
        &self.native
    }
}

impl<N: ArTagNative> TrackerBackend for ArTagBackend<N> {
    fn kind(&self) -> BackendKind {
        BackendKind::ArTag
    }

    fn state(&self) -> BackendState {
        self.lifecycle.state()
    }

    fn config(&self) -> Option<&BackendConfig> {
        self.lifecycle.config()
    }

    fn camera(&self) -> Option<&CameraModel> {
        self.lifecycle.camera()
    }

    fn configure(&mut self, config: BackendConfig) -> Result<()> {
        let BackendConfig::ArTag(artag) = &config else {
            return Err(TrackingError::ConfigurationError(format!(
                "ARTag backend cannot use a {:?} configuration",
                config.kind()
            )));
        };

        let array_file = artag.array_file.clone();
        if let Some(path) = &array_file {
            if !path.is_file() {
                return Err(TrackingError::ConfigurationError(format!(
                    "marker array file {:?} does not exist",
                    path
                )));
            }
        }

        let reinitialized = configure_native(&mut self.lifecycle, &mut self.native, config, |native| {
            if let Some(path) = &array_file {
                native
                    .load_array_file(path)
                    .map_err(|e| TrackingError::ConfigurationError(e.to_string()))?;
            }
            Ok(())
        })?;

        if reinitialized {
            self.ids.clear();
            self.arrays.clear();
        }
        Ok(())
    }

    fn associate_marker(&mut self, spec: &MarkerSpec) -> Result<MarkerHandle> {
        self.lifecycle.require_configured("associate_marker")?;

        let target = match spec {
            MarkerSpec::Id(id) if (0..ARTAG_ID_COUNT).contains(id) => {
                self.ids.insert(*id);
                HandleTarget::Id(*id)
            }
            MarkerSpec::Id(id) => {
                return Err(TrackingError::AssociationError(format!(
                    "ARTag ID {} is outside 0..{}",
                    id, ARTAG_ID_COUNT
                )));
            }
            MarkerSpec::Array(name) => {
                if !self.native.has_array(name) {
                    return Err(TrackingError::AssociationError(format!(
                        "no marker array named '{}' in the loaded array file",
                        name
                    )));
                }
                self.arrays.insert(name.clone());
                HandleTarget::Name(name.clone())
            }
            other => {
                return Err(TrackingError::AssociationError(format!(
                    "ARTag backend cannot track {}",
                    other
                )));
            }
        };

        self.lifecycle.mark_associated();
        let handle = self.lifecycle.handle(target);
        debug!(%handle, "associated ARTag target");
        Ok(handle)
    }

    fn process_frame(&mut self, frame: &Frame<'_>) -> Result<()> {
        self.lifecycle.require_ready("process_frame")?;
        check_frame_dimensions(&self.lifecycle, frame)?;

        // ARTag fixes the pixel format when the context is created.
        if let Some(config) = self.lifecycle.config() {
            let expected = config.camera().color_format;
            if frame.format() != expected {
                return Err(TrackingError::ConfigurationError(format!(
                    "frame format {:?} does not match configured {:?}",
                    frame.format(),
                    expected
                )));
            }
        }

        let pixels = frame.packed();
        self.native
            .detect(&native_image(frame, &pixels))
            .map_err(TrackingError::NativeFailure)
    }

    fn query(&self, handle: &MarkerHandle) -> Result<TrackingResult> {
        self.lifecycle.require_ready("query")?;
        self.lifecycle.check_handle(handle)?;

        let raw = match &handle.target {
            HandleTarget::Id(id) if self.ids.contains(id) => self.native.marker_pose(*id),
            HandleTarget::Name(name) if self.arrays.contains(name) => self.native.array_pose(name),
            _ => {
                return Err(TrackingError::AssociationError(format!(
                    "handle {} is not associated with this backend",
                    handle
                )));
            }
        };

        Ok(match raw {
            Some(values) => TrackingResult::found(Pose::from_array(&values), TrackingMetrics::None),
            None => TrackingResult::not_found(),
        })
    }

    fn teardown(&mut self) {
        if self.lifecycle.mark_released() {
            self.native.release();
            info!("ARTag context released");
        }
        self.ids.clear();
        self.arrays.clear();
    }
}

impl<N: ArTagNative> Drop for ArTagBackend<N> {
    fn drop(&mut self) {
        self.teardown();
    }
}
