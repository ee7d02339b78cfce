//! Coordinate conventions for marker poses and conversion between them.
//!
//! # Overview
//!
//! Every native tracking library reports poses in its own convention. All
//! libraries currently wrapped are **right-handed**, camera at the origin:
//!
//! ```text
//! Right-handed (native)          Left-handed (scene placement)
//!
//!        +Y                              +Y
//!         |                               |
//!         |                               |
//!         +------ +X                      +------ +X
//!        /                                 \
//!       /                                   \
//!      +Z (towards viewer)                   +Z (into the screen)
//! ```
//!
//! Switching handedness mirrors the z axis. For a row-vector pose `M`
//! (see [`Pose`]) the mirrored pose is `S * M * S` with `S = diag(1, 1, -1, 1)`,
//! which negates exactly the elements with one z index:
//! `m13, m23, m31, m32` in the rotation block and `m43` in the translation row.
//! The mirror is its own inverse, so the same operation converts both ways.
//!
//! # Camera-attached poses
//!
//! With a moving camera, the marker pose is expressed relative to the camera
//! frame by left-multiplying with the camera rotation.
//!
//! # Orthonormalization policy
//!
//! Native output is near-orthonormal but drifts. By default the converter
//! re-orthonormalizes when converting to left-handed (the scene placement
//! path) and leaves right-handed output alone.

use serde::Deserialize;

use super::Pose;

/// Axis-orientation convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Handedness {
    RightHanded,
    LeftHanded,
}

impl Default for Handedness {
    fn default() -> Self {
        Self::LeftHanded
    }
}

impl Handedness {
    /// Default orthonormalization policy for conversions into this convention.
    pub fn orthonormalize_by_default(self) -> bool {
        matches!(self, Self::LeftHanded)
    }
}

// ============================================================================
// Pose conversions
// ============================================================================

/// Native right-handed pose to right-handed output (identity mapping).
pub fn to_right_handed(native: &Pose) -> Pose {
    *native
}

/// Mirror the z axis of a right-handed pose.
pub fn to_left_handed(native: &Pose) -> Pose {
    let mut m = native.matrix;
    for (row, col) in [(0, 2), (1, 2), (2, 0), (2, 1), (3, 2)] {
        m[(row, col)] = -m[(row, col)];
    }
    Pose::from_matrix(m)
}

/// Express `pose` relative to a moving camera frame.
pub fn to_camera_attached(pose: &Pose, camera_rotation: &Pose) -> Pose {
    Pose::from_matrix(camera_rotation.matrix * pose.matrix)
}

// ============================================================================
// Coordinate Converter
// ============================================================================

/// Converts native backend poses into the application's convention.
///
/// One converter is built per pipeline from the backend's reported
/// handedness and the pipeline's target handedness.
#[derive(Debug, Clone)]
pub struct CoordinateConverter {
    /// Convention of the poses the backend produces.
    pub source: Handedness,
    /// Convention the application wants.
    pub target: Handedness,
    /// Re-orthonormalize the rotation block after conversion.
    pub orthonormalize: bool,
    /// Camera rotation for camera-attached output, if any.
    pub camera_rotation: Option<Pose>,
}

impl CoordinateConverter {
    /// Converter with the default orthonormalization policy for `target`.
    pub fn new(source: Handedness, target: Handedness) -> Self {
        Self {
            source,
            target,
            orthonormalize: target.orthonormalize_by_default(),
            camera_rotation: None,
        }
    }

    pub fn with_orthonormalize(mut self, enabled: bool) -> Self {
        self.orthonormalize = enabled;
        self
    }

    pub fn with_camera_rotation(mut self, camera_rotation: Option<Pose>) -> Self {
        self.camera_rotation = camera_rotation;
        self
    }

    /// Convert one native pose.
    pub fn convert(&self, native: &Pose) -> Pose {
        let mut pose = if self.source == self.target {
            to_right_handed(native)
        } else {
            to_left_handed(native)
        };

        if let Some(camera_rotation) = &self.camera_rotation {
            pose = to_camera_attached(&pose, camera_rotation);
        }

        if self.orthonormalize {
            pose = pose.orthonormalize();
        }
        pose
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Rotation3, Unit, Vector3};

    fn native_pose() -> Pose {
        let r = Rotation3::from_axis_angle(&Unit::new_normalize(Vector3::new(1.0, 2.0, -0.5)), 0.9);
        Pose::from_parts(&r.into_inner(), &Vector3::new(3.0, -2.0, -80.0))
    }

    #[test]
    fn test_right_handed_is_passthrough() {
        let pose = native_pose();
        assert_eq!(to_right_handed(&pose), pose);
    }

    #[test]
    fn test_left_handed_negates_z_terms() {
        let pose = native_pose();
        let lh = to_left_handed(&pose);
        let (a, b) = (&pose.matrix, &lh.matrix);

        for (row, col) in [(0, 2), (1, 2), (2, 0), (2, 1), (3, 2)] {
            assert_eq!(b[(row, col)], -a[(row, col)]);
        }
        for (row, col) in [(0, 0), (0, 1), (1, 0), (1, 1), (2, 2), (3, 0), (3, 1)] {
            assert_eq!(b[(row, col)], a[(row, col)]);
        }
    }

    #[test]
    fn test_left_handed_keeps_proper_rotation() {
        let lh = to_left_handed(&native_pose());
        assert!(lh.is_orthonormal(1e-9));
        assert_relative_eq!(lh.rotation_block().determinant(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_mirror_is_involution() {
        let pose = native_pose();
        assert_eq!(to_left_handed(&to_left_handed(&pose)), pose);
    }

    #[test]
    fn test_camera_attached_left_multiplies() {
        let pose = native_pose();
        let cam = Pose::from_parts(
            &Rotation3::from_axis_angle(&Vector3::y_axis(), 0.25).into_inner(),
            &Vector3::zeros(),
        );
        let attached = to_camera_attached(&pose, &cam);
        assert_relative_eq!(attached.matrix, cam.matrix * pose.matrix, epsilon = 1e-12);

        let unchanged = to_camera_attached(&pose, &Pose::identity());
        assert_eq!(unchanged, pose);
    }

    #[test]
    fn test_default_policy_per_target() {
        let lh = CoordinateConverter::new(Handedness::RightHanded, Handedness::LeftHanded);
        assert!(lh.orthonormalize);

        let rh = CoordinateConverter::new(Handedness::RightHanded, Handedness::RightHanded);
        assert!(!rh.orthonormalize);
    }

    #[test]
    fn test_convert_orthonormalizes_drifted_pose() {
        let mut drifted = native_pose();
        drifted.matrix[(0, 0)] += 0.03;
        drifted.matrix[(1, 0)] -= 0.02;

        let converter = CoordinateConverter::new(Handedness::RightHanded, Handedness::LeftHanded);
        let out = converter.convert(&drifted);
        assert!(out.is_orthonormal(1e-9));
        assert_eq!(out.translation().z, -drifted.translation().z);

        let raw = converter.with_orthonormalize(false).convert(&drifted);
        assert!(!raw.is_orthonormal(1e-6));
        assert_ne!(raw.rotation_block(), Matrix3::identity());
    }
}
