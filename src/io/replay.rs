//! Recorded-detection replay library.
//!
//! `ReplayLibrary` implements every native capability set from a script of
//! per-frame detections instead of real image analysis. Each detection call
//! consumes the next scripted frame. It backs the replay CLI and lets the
//! backends and the pipeline run without vendor binaries.
//!
//! Recording format (CSV, no header, `#` comments), one row per detection:
//!
//! ```text
//! frame, kind, target, m11 .. m44 (16 values), [score, [mapped_points]]
//! 0, marker, 7, 1,0,0,0, 0,1,0,0, 0,0,1,0, 10,20,-300,1
//! 0, bundle, 0, ..., 0.4
//! 1, feature, poster, ..., 0.35, 40
//! ```
//!
//! `kind` is one of `marker`, `array`, `bundle`, `feature`. The score is the
//! bundle error for bundles and the inlier ratio for features.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, bail};
use csv::ReaderBuilder;
use tracing::debug;

use crate::backend::native::{
    AlvarNative, ArTagNative, ErrorThresholds, FeatureDetection, FeatureNative, MarkerGeometry,
    NativeContext, NativeError, NativeImage, NativePose,
};
use crate::config::{CalibrationSource, DetectorSlot};
use crate::geometry::Pose;
use crate::io::calibration::load_camera_model;
use crate::tracking::frame::{CameraModel, ColorFormat, OwnedFrame, VideoSource};

/// Error reported for a bundle that was not resolved.
const UNRESOLVED: f64 = -1.0;

/// Highest frame count a recording may span (about nine hours at 30 Hz).
pub const MAX_REPLAY_FRAMES: usize = 1_000_000;

/// One scripted detection.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    Marker { id: i32, pose: NativePose },
    Array { name: String, pose: NativePose },
    Bundle { index: usize, pose: NativePose, error: f64 },
    Feature(FeatureDetection),
}

#[derive(Debug, Default)]
pub struct ReplayLibrary {
    frames: Vec<Vec<Detection>>,
    failures: BTreeSet<usize>,
    known_targets: BTreeSet<String>,

    // Per-context state, dropped on release.
    live: bool,
    camera: Option<CameraModel>,
    geometry: Option<MarkerGeometry>,
    marker_sizes: HashMap<i32, f64>,
    detect_additional: bool,
    detector: DetectorSlot,
    arrays: BTreeSet<String>,
    bundles: Vec<Vec<i32>>,
    targets: BTreeSet<String>,
    interested: Vec<i32>,

    next_frame: usize,
    current: Vec<Detection>,
    init_count: usize,
    release_count: usize,
}

impl ReplayLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a scripted frame.
    pub fn with_frame(mut self, detections: Vec<Detection>) -> Self {
        for detection in &detections {
            if let Detection::Feature(feature) = detection {
                self.known_targets.insert(feature.target.clone());
            }
        }
        self.frames.push(detections);
        self
    }

    /// Make detection of frame `index` fail.
    pub fn with_failure_at(mut self, index: usize) -> Self {
        self.failures.insert(index);
        self
    }

    /// Make a feature target known even if it never appears in a frame.
    pub fn with_feature_target(mut self, name: impl Into<String>) -> Self {
        self.known_targets.insert(name.into());
        self
    }

    /// Load a recording from a CSV file.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        Self::from_reader(file).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_reader<R: Read>(reader: R) -> anyhow::Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(false)
            .comment(Some(b'#'))
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut frames: Vec<Vec<Detection>> = Vec::new();
        for (line, rec) in rdr.records().enumerate() {
            let rec = rec?;
            if rec.len() < 19 {
                bail!("row {}: expected at least 19 columns, got {}", line + 1, rec.len());
            }
            let frame: usize = rec[0].parse().with_context(|| format!("row {}: frame", line + 1))?;
            if frame >= MAX_REPLAY_FRAMES {
                bail!(
                    "row {}: frame index {} exceeds the replay limit of {} frames",
                    line + 1,
                    frame,
                    MAX_REPLAY_FRAMES
                );
            }
            let values = rec
                .iter()
                .skip(3)
                .take(16)
                .map(str::parse::<f64>)
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("row {}: pose", line + 1))?;
            let pose = Pose::from_floats(&values)?.to_floats();
            let score = rec.get(19).map(str::parse::<f64>).transpose()?;

            let target = &rec[2];
            let detection = match &rec[1] {
                "marker" => Detection::Marker {
                    id: target.parse().with_context(|| format!("row {}: marker id", line + 1))?,
                    pose,
                },
                "array" => Detection::Array {
                    name: target.to_string(),
                    pose,
                },
                "bundle" => Detection::Bundle {
                    index: target.parse().with_context(|| format!("row {}: bundle index", line + 1))?,
                    pose,
                    error: score.unwrap_or(0.0),
                },
                "feature" => Detection::Feature(FeatureDetection {
                    target: target.to_string(),
                    pose,
                    inlier_ratio: score.unwrap_or(1.0),
                    mapped_points: rec.get(20).map(str::parse::<usize>).transpose()?.unwrap_or(0),
                }),
                other => bail!("row {}: unknown detection kind '{}'", line + 1, other),
            };

            if frames.len() <= frame {
                frames.resize_with(frame + 1, Vec::new);
            }
            frames[frame].push(detection);
        }

        let mut library = Self::new();
        for detections in frames {
            library = library.with_frame(detections);
        }
        debug!(frames = library.frames.len(), "loaded detection recording");
        Ok(library)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Number of detection calls made so far.
    pub fn frames_processed(&self) -> usize {
        self.next_frame
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn init_count(&self) -> usize {
        self.init_count
    }

    pub fn release_count(&self) -> usize {
        self.release_count
    }

    /// Camera of the live context.
    pub fn camera(&self) -> Option<CameraModel> {
        self.camera
    }

    pub fn marker_geometry(&self) -> Option<MarkerGeometry> {
        self.geometry
    }

    pub fn marker_size(&self, id: i32) -> Option<f64> {
        self.marker_sizes
            .get(&id)
            .copied()
            .or(self.geometry.map(|g| g.size))
    }

    pub fn detect_additional(&self) -> bool {
        self.detect_additional
    }

    pub fn detector(&self) -> DetectorSlot {
        self.detector
    }

    /// IDs requested by the most recent ALVAR detection.
    pub fn interested(&self) -> &[i32] {
        &self.interested
    }

    fn require_live(&self, call: &'static str) -> Result<(), NativeError> {
        if !self.live {
            return Err(NativeError::new(call, "no camera context"));
        }
        Ok(())
    }

    /// Validate the image and move to the next scripted frame.
    fn advance(&mut self, call: &'static str, image: &NativeImage<'_>) -> Result<(), NativeError> {
        self.require_live(call)?;
        let expected = image.width as usize * image.height as usize * image.format.channels();
        if image.pixels.len() != expected {
            return Err(NativeError::new(
                call,
                format!("image buffer has {} bytes, expected {}", image.pixels.len(), expected),
            ));
        }

        let index = self.next_frame;
        self.next_frame += 1;
        if self.failures.contains(&index) {
            self.current.clear();
            return Err(NativeError::new(call, format!("scripted failure at frame {}", index)));
        }
        self.current = self.frames.get(index).cloned().unwrap_or_default();
        Ok(())
    }
}

impl NativeContext for ReplayLibrary {
    fn init_camera(
        &mut self,
        width: u32,
        height: u32,
        calibration: &CalibrationSource,
    ) -> Result<CameraModel, NativeError> {
        let camera = match calibration {
            CalibrationSource::File(path) => load_camera_model(path, width, height)
                .map_err(|e| NativeError::new("init_camera", e.to_string()))?,
            CalibrationSource::FocalLength { fx, fy } => {
                CameraModel::from_focal_length(width, height, *fx, *fy)
            }
        };
        self.live = true;
        self.camera = Some(camera);
        self.init_count += 1;
        Ok(camera)
    }

    fn release(&mut self) {
        self.live = false;
        self.camera = None;
        self.geometry = None;
        self.marker_sizes.clear();
        self.arrays.clear();
        self.bundles.clear();
        self.targets.clear();
        self.interested.clear();
        self.current.clear();
        self.release_count += 1;
    }
}

impl ArTagNative for ReplayLibrary {
    /// Array files list one array name per line; `#` starts a comment.
    fn load_array_file(&mut self, path: &Path) -> Result<(), NativeError> {
        self.require_live("load_array_file")?;
        let contents = fs::read_to_string(path)
            .map_err(|e| NativeError::new("load_array_file", format!("{}: {}", path.display(), e)))?;
        for line in contents.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if let Some(name) = line.split_whitespace().next() {
                self.arrays.insert(name.to_string());
            }
        }
        Ok(())
    }

    fn has_array(&self, name: &str) -> bool {
        self.arrays.contains(name)
    }

    fn detect(&mut self, image: &NativeImage<'_>) -> Result<(), NativeError> {
        self.advance("artag_detect", image)
    }

    fn marker_pose(&self, id: i32) -> Option<NativePose> {
        self.current.iter().find_map(|d| match d {
            Detection::Marker { id: found, pose } if *found == id => Some(*pose),
            _ => None,
        })
    }

    fn array_pose(&self, name: &str) -> Option<NativePose> {
        self.current.iter().find_map(|d| match d {
            Detection::Array { name: found, pose } if found == name => Some(*pose),
            _ => None,
        })
    }
}

impl AlvarNative for ReplayLibrary {
    fn init_marker_detector(&mut self, geometry: MarkerGeometry) -> Result<(), NativeError> {
        self.require_live("init_marker_detector")?;
        self.geometry = Some(geometry);
        Ok(())
    }

    fn set_marker_size(&mut self, id: i32, size: f64) {
        self.marker_sizes.insert(id, size);
    }

    fn set_detect_additional(&mut self, enable: bool) {
        self.detect_additional = enable;
    }

    fn select_detector(&mut self, detector: DetectorSlot) {
        self.detector = detector;
    }

    fn add_multi_marker(&mut self, ids: &[i32], config_file: &Path) -> Result<usize, NativeError> {
        self.require_live("add_multi_marker")?;
        if !config_file.is_file() {
            return Err(NativeError::new(
                "add_multi_marker",
                format!("cannot read {}", config_file.display()),
            ));
        }
        self.bundles.push(ids.to_vec());
        Ok(self.bundles.len() - 1)
    }

    fn detect(
        &mut self,
        image: &NativeImage<'_>,
        interested: &[i32],
        _thresholds: ErrorThresholds,
    ) -> Result<usize, NativeError> {
        self.advance("alvar_detect_marker", image)?;
        self.interested = interested.to_vec();
        Ok(self
            .current
            .iter()
            .filter(|d| matches!(d, Detection::Marker { .. }))
            .count())
    }

    fn poses(&self) -> Vec<(i32, NativePose)> {
        self.current
            .iter()
            .filter_map(|d| match d {
                Detection::Marker { id, pose } if self.interested.contains(id) => Some((*id, *pose)),
                _ => None,
            })
            .collect()
    }

    fn multi_marker_poses(&mut self) -> Vec<(NativePose, f64)> {
        (0..self.bundles.len())
            .map(|index| {
                self.current
                    .iter()
                    .find_map(|d| match d {
                        Detection::Bundle { index: found, pose, error } if *found == index => {
                            Some((*pose, *error))
                        }
                        _ => None,
                    })
                    .unwrap_or((Pose::identity().to_floats(), UNRESOLVED))
            })
            .collect()
    }
}

impl FeatureNative for ReplayLibrary {
    fn add_target(&mut self, name: &str) -> Result<(), NativeError> {
        self.require_live("add_target")?;
        if !self.known_targets.contains(name) {
            return Err(NativeError::new("add_target", format!("unknown image target '{}'", name)));
        }
        self.targets.insert(name.to_string());
        Ok(())
    }

    fn detect(&mut self, image: &NativeImage<'_>) -> Result<Vec<FeatureDetection>, NativeError> {
        self.advance("feature_detect", image)?;
        Ok(self
            .current
            .iter()
            .filter_map(|d| match d {
                Detection::Feature(feature) if self.targets.contains(&feature.target) => {
                    Some(feature.clone())
                }
                _ => None,
            })
            .collect())
    }
}

/// Frame interval of replayed video (30 Hz).
const REPLAY_FRAME_INTERVAL_NS: u64 = 33_333_333;

/// Blank frames paced like a 30 Hz camera, one per recorded frame.
#[derive(Debug, Clone)]
pub struct BlankVideo {
    width: u32,
    height: u32,
    format: ColorFormat,
    remaining: usize,
    next_timestamp_ns: u64,
}

impl BlankVideo {
    pub fn new(width: u32, height: u32, format: ColorFormat, frames: usize) -> Self {
        Self {
            width,
            height,
            format,
            remaining: frames,
            next_timestamp_ns: 0,
        }
    }
}

impl VideoSource for BlankVideo {
    fn next_frame(&mut self) -> Option<OwnedFrame> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let mut frame = OwnedFrame::blank(self.width, self.height, self.format);
        frame.timestamp_ns = self.next_timestamp_ns;
        self.next_timestamp_ns += REPLAY_FRAME_INTERVAL_NS;
        Some(frame)
    }
}

/// Pose with translation `(x, y, z)` and identity rotation, as native values.
pub fn translation_pose(x: f64, y: f64, z: f64) -> NativePose {
    let mut pose = Pose::identity().to_floats();
    pose[12] = x;
    pose[13] = y;
    pose[14] = z;
    pose
}
