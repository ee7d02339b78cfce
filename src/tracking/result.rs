//! Per-marker tracking outcome for a single frame.
//!
//! A `TrackingResult` is created fresh by every backend query and never
//! outlives the frame it describes. "Not found" is a regular value here,
//! never an error.

use crate::geometry::Pose;

/// Backend-specific accuracy figures attached to a detection.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum TrackingMetrics {
    /// The backend reports no accuracy figure (single-marker detections).
    #[default]
    None,
    /// Multi-marker bundle: reprojection error of the bundle pose.
    Bundle { error: f64 },
    /// Feature-based target: inlier ratio and number of mapped points.
    Feature {
        inlier_ratio: f64,
        mapped_points: usize,
    },
}

/// Outcome of one marker handle for the most recent frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingResult {
    /// Raw native pose; `Some` only when the marker was found.
    pub raw_pose: Option<Pose>,
    pub metrics: TrackingMetrics,
}

impl TrackingResult {
    pub fn found(raw_pose: Pose, metrics: TrackingMetrics) -> Self {
        Self {
            raw_pose: Some(raw_pose),
            metrics,
        }
    }

    pub fn not_found() -> Self {
        Self {
            raw_pose: None,
            metrics: TrackingMetrics::None,
        }
    }

    /// Not found, but keep the metrics that caused the rejection.
    pub fn rejected(metrics: TrackingMetrics) -> Self {
        Self {
            raw_pose: None,
            metrics,
        }
    }

    pub fn is_found(&self) -> bool {
        self.raw_pose.is_some()
    }
}
