//! Backend and session configuration.
//!
//! Each backend kind has its own configuration struct; [`BackendConfig`] is
//! the tagged union a backend is configured with. A configuration is
//! immutable once applied: any change goes through a full re-initialization.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::Deserialize;

use crate::backend::{BackendKind, MarkerSpec};
use crate::tracking::frame::ColorFormat;
use crate::tracking::pipeline::PipelineConfig;

/// Where camera intrinsics come from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationSource {
    /// Vendor calibration file; must exist and load.
    File(PathBuf),
    /// Focal lengths in pixels, principal point at the image center.
    FocalLength { fx: f64, fy: f64 },
}

/// Camera settings common to every backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    pub calibration: CalibrationSource,
    #[serde(default)]
    pub color_format: ColorFormat,
}

impl CameraConfig {
    pub fn new(width: u32, height: u32, calibration: CalibrationSource) -> Self {
        Self {
            width,
            height,
            calibration,
            color_format: ColorFormat::default(),
        }
    }

    pub fn with_color_format(mut self, color_format: ColorFormat) -> Self {
        self.color_format = color_format;
        self
    }
}

/// ARTag-style tracker: single IDs and named marker arrays.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ArTagConfig {
    pub camera: CameraConfig,
    /// Marker array definitions; required for `MarkerSpec::Array`.
    #[serde(default)]
    pub array_file: Option<PathBuf>,
}

/// Which of the two ALVAR marker detectors runs detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorSlot {
    #[default]
    Primary,
    Secondary,
}

/// ALVAR marker tracker: single markers and multi-marker bundles.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AlvarConfig {
    pub camera: CameraConfig,
    /// Default marker edge length in scene units.
    pub marker_size: f64,
    /// Marker code resolution (cells per side).
    pub marker_resolution: u32,
    /// Marker margin in cells.
    pub margin: f64,
    pub max_marker_error: f64,
    pub max_track_error: f64,
    /// Re-detect bundle members from the bundle pose.
    pub detect_additional: bool,
    pub detector: DetectorSlot,
    /// Per-ID marker size overrides.
    pub marker_sizes: BTreeMap<i32, f64>,
}

impl Default for AlvarConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::new(
                640,
                480,
                CalibrationSource::FocalLength { fx: 600.0, fy: 600.0 },
            ),
            marker_size: 9.0,
            marker_resolution: 5,
            margin: 2.0,
            max_marker_error: 0.08,
            max_track_error: 0.2,
            detect_additional: false,
            detector: DetectorSlot::Primary,
            marker_sizes: BTreeMap::new(),
        }
    }
}

/// ALVAR feature (natural image) tracker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub camera: CameraConfig,
    /// Minimum fraction of feature correspondences consistent with the pose.
    pub min_inlier_ratio: f64,
    /// Minimum number of mapped feature points.
    pub min_mapped_points: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::new(
                640,
                480,
                CalibrationSource::FocalLength { fx: 600.0, fy: 600.0 },
            ),
            min_inlier_ratio: 0.15,
            min_mapped_points: 4,
        }
    }
}

/// Configuration of one backend instance.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum BackendConfig {
    ArTag(ArTagConfig),
    Alvar(AlvarConfig),
    AlvarFeature(FeatureConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::ArTag(_) => BackendKind::ArTag,
            Self::Alvar(_) => BackendKind::Alvar,
            Self::AlvarFeature(_) => BackendKind::AlvarFeature,
        }
    }

    pub fn camera(&self) -> &CameraConfig {
        match self {
            Self::ArTag(c) => &c.camera,
            Self::Alvar(c) => &c.camera,
            Self::AlvarFeature(c) => &c.camera,
        }
    }

    fn camera_mut(&mut self) -> &mut CameraConfig {
        match self {
            Self::ArTag(c) => &mut c.camera,
            Self::Alvar(c) => &mut c.camera,
            Self::AlvarFeature(c) => &mut c.camera,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        let camera = self.camera();
        (camera.width, camera.height)
    }

    /// Same configuration at another image size.
    pub fn with_dimensions(&self, width: u32, height: u32) -> Self {
        let mut config = self.clone();
        let camera = config.camera_mut();
        camera.width = width;
        camera.height = height;
        config
    }
}

/// One marker entry of a session file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MarkerEntry {
    /// Logical name the application refers to.
    pub name: String,
    pub spec: MarkerSpec,
    #[serde(default)]
    pub smooth: bool,
}

/// A complete tracking session: backend, pipeline and markers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionConfig {
    pub backend: BackendConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub markers: Vec<MarkerEntry>,
}

impl SessionConfig {
    /// Load a YAML session file.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let session: SessionConfig = serde_yaml::from_reader(file)
            .with_context(|| format!("Failed to parse session file {:?}", path))?;

        let mut seen = std::collections::HashSet::new();
        for marker in &session.markers {
            if !seen.insert(marker.name.as_str()) {
                bail!("marker '{}' appears twice in {:?}", marker.name, path);
            }
        }
        Ok(session)
    }
}
