//! ALVAR marker backend: single markers and multi-marker bundles.
//!
//! Single markers are reported by ID. Bundles are resolved by the native
//! library from all of their member detections and carry a per-bundle
//! error; a negative error means the bundle was not resolved this frame,
//! whatever its members did.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use tracing::{debug, info};

use crate::backend::native::{AlvarNative, ErrorThresholds, MarkerGeometry};
use crate::backend::{
    BackendKind, BackendState, HandleTarget, Lifecycle, MarkerHandle, MarkerSpec, TrackerBackend,
    check_frame_dimensions, configure_native, native_image,
};
use crate::config::BackendConfig;
use crate::error::{Result, TrackingError};
use crate::geometry::Pose;
use crate::tracking::frame::{CameraModel, Frame};
use crate::tracking::{TrackingMetrics, TrackingResult};

#[derive(Debug, Clone, PartialEq)]
struct Bundle {
    ids: Vec<i32>,
    config_file: PathBuf,
}

/// ALVAR tracker for single markers and multi-marker bundles.
pub struct AlvarBackend<N: AlvarNative> {
    native: N,
    lifecycle: Lifecycle,
    thresholds: ErrorThresholds,
    singles: BTreeSet<i32>,
    /// Indexed by the native bundle index.
    bundles: Vec<Bundle>,
    // Results of the most recent frame.
    marker_poses: HashMap<i32, Pose>,
    bundle_poses: Vec<Option<(Pose, f64)>>,
}

impl<N: AlvarNative> AlvarBackend<N> {
    pub fn new(native: N) -> Self {
        Self {
            native,
            lifecycle: Lifecycle::new(),
            thresholds: ErrorThresholds {
                max_marker_error: 0.08,
                max_track_error: 0.2,
            },
            singles: BTreeSet::new(),
            bundles: Vec::new(),
            marker_poses: HashMap::new(),
            bundle_poses: Vec::new(),
        }
    }

    pub fn native(&self) -> &N {
        &self.native
    }

    /// IDs the native detector should report: singles plus bundle members.
    fn interested_ids(&self) -> Vec<i32> {
        let mut ids: BTreeSet<i32> = self.singles.clone();
        for bundle in &self.bundles {
            ids.extend(bundle.ids.iter().copied());
        }
        ids.into_iter().collect()
    }

    fn clear_targets(&mut self) {
        self.singles.clear();
        self.bundles.clear();
        self.clear_results();
    }

    fn clear_results(&mut self) {
        self.marker_poses.clear();
        self.bundle_poses.clear();
    }
}

impl<N: AlvarNative> TrackerBackend for AlvarBackend<N> {
    fn kind(&self) -> BackendKind {
        BackendKind::Alvar
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
        let BackendConfig::Alvar(alvar) = &config else {
            return Err(TrackingError::ConfigurationError(format!(
                "ALVAR backend cannot use a {:?} configuration",
                config.kind()
            )));
        };
        if alvar.marker_size <= 0.0 || alvar.marker_resolution == 0 {
            return Err(TrackingError::ConfigurationError(format!(
                "invalid marker geometry: size {} resolution {}",
                alvar.marker_size, alvar.marker_resolution
            )));
        }

        let alvar = alvar.clone();
        let reinitialized = configure_native(&mut self.lifecycle, &mut self.native, config, |native| {
            native
                .init_marker_detector(MarkerGeometry {
                    size: alvar.marker_size,
                    resolution: alvar.marker_resolution,
                    margin: alvar.margin,
                })
                .map_err(|e| TrackingError::ConfigurationError(e.to_string()))?;
            for (&id, &size) in &alvar.marker_sizes {
                native.set_marker_size(id, size);
            }
            native.set_detect_additional(alvar.detect_additional);
            native.select_detector(alvar.detector);
            Ok(())
        })?;

        if reinitialized {
            self.thresholds = ErrorThresholds {
                max_marker_error: alvar.max_marker_error,
                max_track_error: alvar.max_track_error,
            };
            self.clear_targets();
        }
        Ok(())
    }

    fn associate_marker(&mut self, spec: &MarkerSpec) -> Result<MarkerHandle> {
        self.lifecycle.require_configured("associate_marker")?;

        let target = match spec {
            MarkerSpec::Id(id) if *id >= 0 => {
                self.singles.insert(*id);
                HandleTarget::Id(*id)
            }
            MarkerSpec::Bundle { ids, config_file } => {
                let bundle = Bundle {
                    ids: ids.clone(),
                    config_file: config_file.clone(),
                };
                match self.bundles.iter().position(|b| *b == bundle) {
                    Some(index) => HandleTarget::Bundle(index),
                    None => {
                        if ids.is_empty() {
                            return Err(TrackingError::AssociationError(
                                "a marker bundle needs at least one marker ID".into(),
                            ));
                        }
                        if !config_file.is_file() {
                            return Err(TrackingError::AssociationError(format!(
                                "bundle configuration {:?} does not exist",
                                config_file
                            )));
                        }
                        let index = self
                            .native
                            .add_multi_marker(ids, config_file)
                            .map_err(|e| TrackingError::AssociationError(e.to_string()))?;
                        if index != self.bundles.len() {
                            return Err(TrackingError::AssociationError(format!(
                                "native library assigned bundle index {}, expected {}",
                                index,
                                self.bundles.len()
                            )));
                        }
                        self.bundles.push(bundle);
                        HandleTarget::Bundle(index)
                    }
                }
            }
            other => {
                return Err(TrackingError::AssociationError(format!(
                    "ALVAR marker backend cannot track {}",
                    other
                )));
            }
        };

        self.lifecycle.mark_associated();
        let handle = self.lifecycle.handle(target);
        debug!(%handle, "associated ALVAR target");
        Ok(handle)
    }

    fn process_frame(&mut self, frame: &Frame<'_>) -> Result<()> {
        self.lifecycle.require_ready("process_frame")?;
        check_frame_dimensions(&self.lifecycle, frame)?;
        self.clear_results();

        let interested = self.interested_ids();
        let pixels = frame.packed();
        let seen = self
            .native
            .detect(&native_image(frame, &pixels), &interested, self.thresholds)
            .map_err(TrackingError::NativeFailure)?;

        for (id, values) in self.native.poses() {
            if self.singles.contains(&id) {
                self.marker_poses.insert(id, Pose::from_array(&values));
            }
        }

        if !self.bundles.is_empty() {
            let results = self.native.multi_marker_poses();
            self.bundle_poses = (0..self.bundles.len())
                .map(|i| match results.get(i) {
                    Some((values, error)) if *error >= 0.0 => {
                        Some((Pose::from_array(values), *error))
                    }
                    _ => None,
                })
                .collect();
        }

        debug!(
            seen,
            singles = self.marker_poses.len(),
            bundles = self.bundle_poses.iter().filter(|b| b.is_some()).count(),
            "ALVAR frame processed"
        );
        Ok(())
    }

    fn query(&self, handle: &MarkerHandle) -> Result<TrackingResult> {
        self.lifecycle.require_ready("query")?;
        self.lifecycle.check_handle(handle)?;

        match &handle.target {
            HandleTarget::Id(id) if self.singles.contains(id) => {
                Ok(match self.marker_poses.get(id) {
                    Some(pose) => TrackingResult::found(*pose, TrackingMetrics::None),
                    None => TrackingResult::not_found(),
                })
            }
            HandleTarget::Bundle(index) if *index < self.bundles.len() => {
                Ok(match self.bundle_poses.get(*index).copied().flatten() {
                    Some((pose, error)) => {
                        TrackingResult::found(pose, TrackingMetrics::Bundle { error })
                    }
                    None => TrackingResult::not_found(),
                })
            }
            _ => Err(TrackingError::AssociationError(format!(
                "handle {} is not associated with this backend",
                handle
            ))),
        }
    }

    fn teardown(&mut self) {
        if self.lifecycle.mark_released() {
            self.native.release();
            info!("ALVAR context released");
        }
        self.clear_targets();
    }
}

impl<N: AlvarNative> Drop for AlvarBackend<N> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::native::NativePose;
    use crate::config::AlvarConfig;
    use crate::io::replay::{Detection, ReplayLibrary, translation_pose};
    use crate::tracking::frame::{ColorFormat, OwnedFrame};
    use std::collections::BTreeMap;

    fn frame() -> OwnedFrame {
        OwnedFrame::blank(640, 480, ColorFormat::Bgr24)
    }

    fn bundle_file(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("ground.xml");
        std::fs::write(&path, "<multimarker markers=\"4\"/>").unwrap();
        path
    }

    fn bundle(index: usize, pose: NativePose, error: f64) -> Detection {
        Detection::Bundle { index, pose, error }
    }

    #[test]
    fn test_configure_applies_detector_settings() {
        let mut backend = AlvarBackend::new(ReplayLibrary::new());
        let config = AlvarConfig {
            marker_size: 42.0,
            detect_additional: true,
            detector: crate::config::DetectorSlot::Secondary,
            marker_sizes: BTreeMap::from([(3, 20.0)]),
            ..AlvarConfig::default()
        };
        backend.configure(BackendConfig::Alvar(config)).unwrap();

        let native = backend.native();
        assert_eq!(native.marker_geometry().unwrap().size, 42.0);
        assert_eq!(native.marker_size(3), Some(20.0));
        assert_eq!(native.marker_size(4), Some(42.0));
        assert!(native.detect_additional());
        assert_eq!(native.detector(), crate::config::DetectorSlot::Secondary);
        assert_eq!(backend.state(), BackendState::Configured);
    }

    #[test]
    fn test_rejects_other_backend_config() {
        let mut backend = AlvarBackend::new(ReplayLibrary::new());
        let err = backend
            .configure(BackendConfig::AlvarFeature(crate::config::FeatureConfig::default()))
            .unwrap_err();
        assert!(matches!(err, TrackingError::ConfigurationError(_)));
    }

    #[test]
    fn test_query_before_ready() {
        let mut backend = AlvarBackend::new(ReplayLibrary::new());
        backend.configure(BackendConfig::Alvar(AlvarConfig::default())).unwrap();
        let err = backend.process_frame(&frame().as_frame().unwrap()).unwrap_err();
        assert!(matches!(err, TrackingError::NotInitialized(_)));
    }

    #[test]
    fn test_interested_ids_cover_bundle_members() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = AlvarBackend::new(ReplayLibrary::new());
        backend.configure(BackendConfig::Alvar(AlvarConfig::default())).unwrap();
        backend.associate_marker(&MarkerSpec::Id(9)).unwrap();
        backend
            .associate_marker(&MarkerSpec::Bundle {
                ids: vec![0, 1, 2, 3],
                config_file: bundle_file(&dir),
            })
            .unwrap();

        backend.process_frame(&frame().as_frame().unwrap()).unwrap();
        assert_eq!(backend.native().interested(), &[0, 1, 2, 3, 9]);
    }

    #[test]
    fn test_negative_bundle_error_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let library = ReplayLibrary::new()
            .with_frame(vec![
                Detection::Marker { id: 0, pose: translation_pose(0.0, 0.0, -50.0) },
                bundle(0, translation_pose(0.0, 0.0, -50.0), -1.0),
            ])
            .with_frame(vec![bundle(0, translation_pose(0.0, 0.0, -50.0), 0.3)]);
        let mut backend = AlvarBackend::new(library);
        backend.configure(BackendConfig::Alvar(AlvarConfig::default())).unwrap();
        let handle = backend
            .associate_marker(&MarkerSpec::Bundle {
                ids: vec![0, 1],
                config_file: bundle_file(&dir),
            })
            .unwrap();

        backend.process_frame(&frame().as_frame().unwrap()).unwrap();
        assert!(!backend.query(&handle).unwrap().is_found());

        backend.process_frame(&frame().as_frame().unwrap()).unwrap();
        let result = backend.query(&handle).unwrap();
        assert!(result.is_found());
        assert_eq!(result.metrics, TrackingMetrics::Bundle { error: 0.3 });
    }

    #[test]
    fn test_same_bundle_twice_shares_index() {
        let dir = tempfile::tempdir().unwrap();
        let spec = MarkerSpec::Bundle {
            ids: vec![0, 1],
            config_file: bundle_file(&dir),
        };
        let mut backend = AlvarBackend::new(ReplayLibrary::new());
        backend.configure(BackendConfig::Alvar(AlvarConfig::default())).unwrap();
        let first = backend.associate_marker(&spec).unwrap();
        let second = backend.associate_marker(&spec).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_bundle_file_must_exist() {
        let mut backend = AlvarBackend::new(ReplayLibrary::new());
        backend.configure(BackendConfig::Alvar(AlvarConfig::default())).unwrap();
        let err = backend
            .associate_marker(&MarkerSpec::Bundle {
                ids: vec![0],
                config_file: "/nonexistent/bundle.xml".into(),
            })
            .unwrap_err();
        assert!(matches!(err, TrackingError::AssociationError(_)));
    }

    #[test]
    fn test_reconfigure_releases_old_context_first() {
        let mut backend = AlvarBackend::new(ReplayLibrary::new());
        let config = BackendConfig::Alvar(AlvarConfig::default());
        backend.configure(config.clone()).unwrap();
        let handle = backend.associate_marker(&MarkerSpec::Id(4)).unwrap();

        backend.configure(config.clone()).unwrap();
        assert_eq!(backend.native().init_count(), 1);
        assert_eq!(backend.state(), BackendState::Ready);

        backend.configure(config.with_dimensions(320, 240)).unwrap();
        assert_eq!(backend.native().init_count(), 2);
        assert_eq!(backend.native().release_count(), 1);
        assert_eq!(backend.state(), BackendState::Configured);

        backend.associate_marker(&MarkerSpec::Id(4)).unwrap();
        let err = backend.query(&handle).unwrap_err();
        assert!(matches!(err, TrackingError::NotInitialized(_)));
    }

    #[test]
    fn test_failed_reconfigure_leaves_uninitialized() {
        let mut backend = AlvarBackend::new(ReplayLibrary::new());
        let config = BackendConfig::Alvar(AlvarConfig::default());
        backend.configure(config.clone()).unwrap();

        let err = backend.configure(config.with_dimensions(0, 240)).unwrap_err();
        assert!(matches!(err, TrackingError::ConfigurationError(_)));
        // Invalid input is rejected before the live context is touched.
        assert_eq!(backend.state(), BackendState::Configured);

        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("camera.yaml");
        std::fs::write(&broken, "width: 640\nheight: 480\nintrinsics: [1.0]\n").unwrap();
        let mut bad = AlvarConfig::default();
        bad.camera.calibration = crate::config::CalibrationSource::File(broken);
        assert!(backend.configure(BackendConfig::Alvar(bad)).is_err());
        assert_eq!(backend.state(), BackendState::Uninitialized);
        assert_eq!(backend.native().release_count(), 1);
    }
}
