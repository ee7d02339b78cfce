//! Backend lifecycle state machine.
//!
//! ```text
//! Uninitialized --configure--> Configured --associate--> Ready
//!                                   ^                       |
//!                                   +---- re-configure -----+
//! ```
//!
//! `process_frame` and `query` are only valid in `Ready`. Every successful
//! (re)initialization bumps the generation; handles from an older
//! generation are rejected until the marker is associated again.

use std::fmt;

use tracing::info;

use crate::backend::MarkerHandle;
use crate::config::BackendConfig;
use crate::error::{Result, TrackingError};
use crate::tracking::frame::CameraModel;

/// State of a tracker backend instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    /// No native context exists.
    Uninitialized,
    /// Native context initialized; no marker associated yet.
    Configured,
    /// At least one marker associated; frames can be processed.
    Ready,
}

impl Default for BackendState {
    fn default() -> Self {
        Self::Uninitialized
    }
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Configured => "configured",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// What `configure` has to do for a requested configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigureAction {
    /// First configuration: create the native context.
    Initialize,
    /// Configuration changed: tear the old context down, then initialize.
    Reinitialize,
    /// Identical configuration: keep context and handles.
    Unchanged,
}

/// Lifecycle bookkeeping shared by every backend variant.
#[derive(Debug, Default)]
pub struct Lifecycle {
    state: BackendState,
    generation: u64,
    config: Option<BackendConfig>,
    camera: Option<CameraModel>,
    native_live: bool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> BackendState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn config(&self) -> Option<&BackendConfig> {
        self.config.as_ref()
    }

    pub fn camera(&self) -> Option<&CameraModel> {
        self.camera.as_ref()
    }

    /// Decide how to apply `config`.
    pub fn plan(&self, config: &BackendConfig) -> ConfigureAction {
        match &self.config {
            _ if !self.native_live => ConfigureAction::Initialize,
            Some(current) if current == config => ConfigureAction::Unchanged,
            _ => ConfigureAction::Reinitialize,
        }
    }

    /// Record a successful native initialization.
    pub fn mark_configured(&mut self, config: BackendConfig, camera: CameraModel) {
        self.generation += 1;
        self.state = BackendState::Configured;
        self.config = Some(config);
        self.camera = Some(camera);
        self.native_live = true;
        info!(
            generation = self.generation,
            width = camera.width,
            height = camera.height,
            "backend configured"
        );
    }

    /// Record a successful association.
    pub fn mark_associated(&mut self) {
        if self.state == BackendState::Configured {
            self.state = BackendState::Ready;
        }
    }

    /// Mark the native context as gone.
    ///
    /// Returns true only the first time after an initialization, so callers
    /// release native resources exactly once.
    pub fn mark_released(&mut self) -> bool {
        self.state = BackendState::Uninitialized;
        self.config = None;
        self.camera = None;
        std::mem::replace(&mut self.native_live, false)
    }

    pub fn require_configured(&self, operation: &str) -> Result<()> {
        match self.state {
            BackendState::Uninitialized => Err(TrackingError::not_initialized(format!(
                "{} requires a configured backend (backend is {})",
                operation, self.state
            ))),
            _ => Ok(()),
        }
    }

    pub fn require_ready(&self, operation: &str) -> Result<()> {
        match self.state {
            BackendState::Ready => Ok(()),
            state => Err(TrackingError::not_initialized(format!(
                "{} requires at least one associated marker (backend is {})",
                operation, state
            ))),
        }
    }

    /// Reject handles issued before the latest (re)initialization.
    pub fn check_handle(&self, handle: &MarkerHandle) -> Result<()> {
        if handle.generation != self.generation {
            return Err(TrackingError::not_initialized(format!(
                "handle {} was issued before the backend was reconfigured; associate it again",
                handle
            )));
        }
        Ok(())
    }

    /// Handle for a target in the current generation.
    pub fn handle(&self, target: crate::backend::HandleTarget) -> MarkerHandle {
        MarkerHandle {
            target,
            generation: self.generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HandleTarget;
    use crate::config::{CalibrationSource, CameraConfig, FeatureConfig};

    fn config(width: u32) -> BackendConfig {
        BackendConfig::AlvarFeature(FeatureConfig {
            camera: CameraConfig::new(
                width,
                480,
                CalibrationSource::FocalLength { fx: 500.0, fy: 500.0 },
            ),
            ..FeatureConfig::default()
        })
    }

    fn camera() -> CameraModel {
        CameraModel::from_focal_length(640, 480, 500.0, 500.0)
    }

    #[test]
    fn test_initial_state() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), BackendState::Uninitialized);
        assert!(lifecycle.require_configured("associate").is_err());
        assert_eq!(lifecycle.plan(&config(640)), ConfigureAction::Initialize);
    }

    #[test]
    fn test_transitions() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.mark_configured(config(640), camera());
        assert_eq!(lifecycle.state(), BackendState::Configured);
        assert!(lifecycle.require_ready("query").is_err());

        lifecycle.mark_associated();
        assert_eq!(lifecycle.state(), BackendState::Ready);
        assert!(lifecycle.require_ready("query").is_ok());

        assert_eq!(lifecycle.plan(&config(640)), ConfigureAction::Unchanged);
        assert_eq!(lifecycle.plan(&config(320)), ConfigureAction::Reinitialize);
    }

    #[test]
    fn test_reconfigure_invalidates_handles() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.mark_configured(config(640), camera());
        let handle = lifecycle.handle(HandleTarget::Id(7));
        assert!(lifecycle.check_handle(&handle).is_ok());

        lifecycle.mark_configured(config(320), camera());
        let err = lifecycle.check_handle(&handle).unwrap_err();
        assert!(matches!(err, TrackingError::NotInitialized(_)));
    }

    #[test]
    fn test_release_is_reported_once() {
        let mut lifecycle = Lifecycle::new();
        assert!(!lifecycle.mark_released());

        lifecycle.mark_configured(config(640), camera());
        assert!(lifecycle.mark_released());
        assert!(!lifecycle.mark_released());
        assert_eq!(lifecycle.state(), BackendState::Uninitialized);
    }
}
