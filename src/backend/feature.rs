//! ALVAR natural-feature backend.
//!
//! A target counts as found only when both quality gates pass: the inlier
//! ratio and the number of mapped feature points. A detection that fails a
//! gate is reported as not found, with its metrics kept for diagnostics.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info};

use crate::backend::native::FeatureNative;
use crate::backend::{
    BackendKind, BackendState, HandleTarget, Lifecycle, MarkerHandle, MarkerSpec, TrackerBackend,
    check_frame_dimensions, configure_native, native_image,
};
use crate::config::{BackendConfig, FeatureConfig};
use crate::error::{Result, TrackingError};
use crate::geometry::Pose;
use crate::tracking::frame::{CameraModel, Frame};
use crate::tracking::{TrackingMetrics, TrackingResult};

/// ALVAR tracker for natural image targets.
pub struct FeatureBackend<N: FeatureNative> {
    native: N,
    lifecycle: Lifecycle,
    min_inlier_ratio: f64,
    min_mapped_points: usize,
    targets: BTreeSet<String>,
    results: HashMap<String, TrackingResult>,
}

impl<N: FeatureNative> FeatureBackend<N> {
    pub fn new(native: N) -> Self {
        let defaults = FeatureConfig::default();
        Self {
            native,
            lifecycle: Lifecycle::new(),
            min_inlier_ratio: defaults.min_inlier_ratio,
            min_mapped_points: defaults.min_mapped_points,
            targets: BTreeSet::new(),
            results: HashMap::new(),
        }
    }

    pub fn native(&self) -> &N {
        &self.native
    }

    fn passes_gates(&self, inlier_ratio: f64, mapped_points: usize) -> bool {
        inlier_ratio >= self.min_inlier_ratio && mapped_points >= self.min_mapped_points
    }
}

impl<N: FeatureNative> TrackerBackend for FeatureBackend<N> {
    fn kind(&self) -> BackendKind {
        BackendKind::AlvarFeature
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
        let BackendConfig::AlvarFeature(feature) = &config else {
            return Err(TrackingError::ConfigurationError(format!(
                "feature backend cannot use a {:?} configuration",
                config.kind()
            )));
        };
        if !(0.0..=1.0).contains(&feature.min_inlier_ratio) {
            return Err(TrackingError::ConfigurationError(format!(
                "min_inlier_ratio must be within [0, 1], got {}",
                feature.min_inlier_ratio
            )));
        }

        let (ratio, points) = (feature.min_inlier_ratio, feature.min_mapped_points);
        let reinitialized =
            configure_native(&mut self.lifecycle, &mut self.native, config, |_| Ok(()))?;

        if reinitialized {
            self.min_inlier_ratio = ratio;
            self.min_mapped_points = points;
            self.targets.clear();
            self.results.clear();
        }
        Ok(())
    }

    fn associate_marker(&mut self, spec: &MarkerSpec) -> Result<MarkerHandle> {
        self.lifecycle.require_configured("associate_marker")?;

        let MarkerSpec::Feature(name) = spec else {
            return Err(TrackingError::AssociationError(format!(
                "feature backend cannot track {}",
                spec
            )));
        };

        if !self.targets.contains(name) {
            self.native
                .add_target(name)
                .map_err(|e| TrackingError::AssociationError(e.to_string()))?;
            self.targets.insert(name.clone());
        }

        self.lifecycle.mark_associated();
        let handle = self.lifecycle.handle(HandleTarget::Name(name.clone()));
        debug!(%handle, "associated feature target");
        Ok(handle)
    }

    fn process_frame(&mut self, frame: &Frame<'_>) -> Result<()> {
        self.lifecycle.require_ready("process_frame")?;
        check_frame_dimensions(&self.lifecycle, frame)?;
        self.results.clear();

        let pixels = frame.packed();
        let detections = self
            .native
            .detect(&native_image(frame, &pixels))
            .map_err(TrackingError::NativeFailure)?;

        for detection in detections {
            if !self.targets.contains(&detection.target) {
                continue;
            }
            let metrics = TrackingMetrics::Feature {
                inlier_ratio: detection.inlier_ratio,
                mapped_points: detection.mapped_points,
            };
            let result = if self.passes_gates(detection.inlier_ratio, detection.mapped_points) {
                TrackingResult::found(Pose::from_array(&detection.pose), metrics)
            } else {
                debug!(
                    feature = %detection.target,
                    inlier_ratio = detection.inlier_ratio,
                    mapped_points = detection.mapped_points,
                    "feature detection rejected"
                );
                TrackingResult::rejected(metrics)
            };
            self.results.insert(detection.target, result);
        }
        Ok(())
    }

    fn query(&self, handle: &MarkerHandle) -> Result<TrackingResult> {
        self.lifecycle.require_ready("query")?;
        self.lifecycle.check_handle(handle)?;

        match &handle.target {
            HandleTarget::Name(name) if self.targets.contains(name) => Ok(self
                .results
                .get(name)
                .cloned()
                .unwrap_or_else(TrackingResult::not_found)),
            _ => Err(TrackingError::AssociationError(format!(
                "handle {} is not associated with this backend",
                handle
            ))),
        }
    }

    fn teardown(&mut self) {
        if self.lifecycle.mark_released() {
            self.native.release();
            info!("feature context released");
        }
        self.targets.clear();
        self.results.clear();
    }
}

impl<N: FeatureNative> Drop for FeatureBackend<N> {
    fn drop(&mut self) {
        self.teardown();
    }
}
