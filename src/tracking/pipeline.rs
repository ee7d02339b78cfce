//! Frame processing pipeline: one tracking cycle per frame.
//!
//! ```text
//! frame -> backend.process_frame -> query each registered marker
//!       -> CoordinateConverter -> Smoother (per marker, optional) -> poses
//! ```
//!
//! The pipeline owns its backend and holds no locks. It must be driven from a
//! single thread; see [`crate::system`] for handing poses to another thread.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::backend::{BackendState, MarkerHandle, MarkerSpec, TrackerBackend};
use crate::config::BackendConfig;
use crate::error::Result;
use crate::geometry::pose::{DEFAULT_ROTATION_THRESHOLD_DEG, DEFAULT_TRANSLATION_THRESHOLD};
use crate::geometry::{CoordinateConverter, Handedness, MotionThreshold, Pose, has_moved_significantly};
use crate::tracking::frame::{Frame, VideoSource};
use crate::tracking::registry::MarkerRegistry;
use crate::tracking::smoother::{Smoother, SmootherConfig};

/// What a tick does when the native detection call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log, count the dropped tick and return no poses.
    #[default]
    SkipTick,
    /// Return the error to the caller.
    Propagate,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Convention of the published poses.
    pub handedness: Handedness,
    /// Orthonormalize after conversion; defaults per target handedness.
    pub orthonormalize: Option<bool>,
    pub smoothing: SmootherConfig,
    pub failure_policy: FailurePolicy,
    /// Publish a pose only when it moved against the last published one.
    pub publish_only_on_motion: bool,
    pub motion_translation: f64,
    pub motion_rotation_deg: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            handedness: Handedness::default(),
            orthonormalize: None,
            smoothing: SmootherConfig::default(),
            failure_policy: FailurePolicy::default(),
            publish_only_on_motion: false,
            motion_translation: DEFAULT_TRANSLATION_THRESHOLD,
            motion_rotation_deg: DEFAULT_ROTATION_THRESHOLD_DEG,
        }
    }
}

impl PipelineConfig {
    pub fn motion_threshold(&self) -> MotionThreshold {
        MotionThreshold {
            translation: self.motion_translation,
            rotation_deg: self.motion_rotation_deg,
        }
    }
}

/// Receives the poses of a tick (the scene graph side).
pub trait PoseSink {
    fn publish(&mut self, name: &str, pose: &Pose);
}

impl PoseSink for HashMap<String, Pose> {
    fn publish(&mut self, name: &str, pose: &Pose) {
        self.insert(name.to_string(), *pose);
    }
}

impl PoseSink for Vec<(String, Pose)> {
    fn publish(&mut self, name: &str, pose: &Pose) {
        self.push((name.to_string(), *pose));
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub ticks: u64,
    /// Ticks skipped because the native detection failed.
    pub dropped_ticks: u64,
    /// Backend re-initializations triggered by a frame-size change.
    pub reconfigurations: u64,
    pub published: u64,
}

pub struct FrameProcessingPipeline<B: TrackerBackend> {
    backend: B,
    registry: MarkerRegistry,
    smoothed: HashSet<String>,
    converter: CoordinateConverter,
    smoother: Smoother,
    config: PipelineConfig,
    last_published: HashMap<String, Pose>,
    stats: PipelineStats,
}

impl<B: TrackerBackend> FrameProcessingPipeline<B> {
    pub fn new(backend: B, config: PipelineConfig) -> Result<Self> {
        let smoother = Smoother::with_config(config.smoothing)?;
        let converter = build_converter(&backend, &config, None);
        Ok(Self {
            backend,
            registry: MarkerRegistry::new(),
            smoothed: HashSet::new(),
            converter,
            smoother,
            config,
            last_published: HashMap::new(),
            stats: PipelineStats::default(),
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn registry(&self) -> &MarkerRegistry {
        &self.registry
    }

    pub fn smoother(&self) -> &Smoother {
        &self.smoother
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Express poses relative to a moving camera; `None` for world poses.
    pub fn set_camera_rotation(&mut self, camera_rotation: Option<Pose>) {
        self.converter = build_converter(&self.backend, &self.config, camera_rotation);
    }

    /// Configure the backend and re-associate registered markers if the
    /// native context was re-created.
    pub fn configure(&mut self, config: BackendConfig) -> Result<()> {
        self.backend.configure(config)?;
        if !self.registry.is_empty() && self.backend.state() != BackendState::Ready {
            self.registry.reassociate(&mut self.backend)?;
        }
        Ok(())
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        spec: MarkerSpec,
        smooth: bool,
    ) -> Result<MarkerHandle> {
        let name = name.into();
        let handle = self.registry.register(&mut self.backend, name.clone(), spec)?;
        if smooth {
            self.smoothed.insert(name);
        }
        Ok(handle)
    }

    /// Run one tracking cycle.
    ///
    /// Markers not found this frame are absent from the result.
    pub fn tick(&mut self, frame: &Frame<'_>) -> Result<HashMap<String, Pose>> {
        self.stats.ticks += 1;
        let mut poses = HashMap::new();
        if self.registry.is_empty() {
            return Ok(poses);
        }

        self.follow_frame_size(frame)?;

        if let Err(e) = self.backend.process_frame(frame) {
            if e.is_recoverable() && self.config.failure_policy == FailurePolicy::SkipTick {
                self.stats.dropped_ticks += 1;
                warn!(error = %e, tick = self.stats.ticks, "detection failed, skipping tick");
                return Ok(poses);
            }
            return Err(e);
        }

        for entry in self.registry.iter() {
            let result = self.backend.query(&entry.handle)?;
            let Some(raw) = result.raw_pose else {
                continue;
            };
            let mut pose = self.converter.convert(&raw);
            if self.smoothed.contains(&entry.name) {
                pose = self.smoother.filter(&entry.name, &pose);
            }
            poses.insert(entry.name.clone(), pose);
        }

        debug!(
            found = poses.len(),
            registered = self.registry.len(),
            "tick complete"
        );
        Ok(poses)
    }

    /// Run one cycle and hand the poses to `sink`. Returns the number published.
    pub fn tick_into<S: PoseSink + ?Sized>(&mut self, frame: &Frame<'_>, sink: &mut S) -> Result<usize> {
        let poses = self.tick(frame)?;
        let threshold = self.config.motion_threshold();

        let mut published = 0;
        for (name, pose) in &poses {
            if self.config.publish_only_on_motion {
                let previous = self.last_published.get(name).copied().unwrap_or_else(Pose::identity);
                if !has_moved_significantly(&previous, pose, threshold) {
                    continue;
                }
            }
            sink.publish(name, pose);
            self.last_published.insert(name.clone(), *pose);
            published += 1;
        }
        self.stats.published += published as u64;
        Ok(published)
    }

    /// Tick on every frame of `source` until it runs dry.
    pub fn run<V, S>(&mut self, source: &mut V, sink: &mut S) -> Result<PipelineStats>
    where
        V: VideoSource + ?Sized,
        S: PoseSink + ?Sized,
    {
        while let Some(frame) = source.next_frame() {
            self.tick_into(&frame.as_frame()?, sink)?;
        }
        Ok(self.stats)
    }

    /// Release the backend and forget every marker.
    pub fn teardown(&mut self) {
        self.backend.teardown();
        self.registry.clear();
        self.smoothed.clear();
        self.last_published.clear();
    }

    /// Re-initialize the backend when the video size changes.
    fn follow_frame_size(&mut self, frame: &Frame<'_>) -> Result<()> {
        let Some(current) = self.backend.config() else {
            return Ok(());
        };
        if current.dimensions() == frame.dimensions() {
            return Ok(());
        }

        let (width, height) = frame.dimensions();
        info!(
            from = ?current.dimensions(),
            to = ?(width, height),
            "frame size changed, re-initializing backend"
        );
        let resized = current.with_dimensions(width, height);
        self.configure(resized)?;
        self.stats.reconfigurations += 1;
        Ok(())
    }
}

fn build_converter<B: TrackerBackend>(
    backend: &B,
    config: &PipelineConfig,
    camera_rotation: Option<Pose>,
) -> CoordinateConverter {
    let orthonormalize = config
        .orthonormalize
        .unwrap_or(config.handedness.orthonormalize_by_default());
    CoordinateConverter::new(backend.native_handedness(), config.handedness)
        .with_orthonormalize(orthonormalize)
        .with_camera_rotation(camera_rotation)
}
