//! 4x4 homogeneous marker poses and the numeric helpers that operate on them.
//!
//! # Layout
//!
//! Poses use the row-vector convention of the scene graph: a point `p` is
//! transformed as `p' = p * M`. Element `(i, j)` of the matrix is written
//! `m_(i+1)(j+1)`, so:
//!
//! ```text
//! | m11 m12 m13 0 |   rows 1-3: rotation basis (x, y, z axes)
//! | m21 m22 m23 0 |
//! | m31 m32 m33 0 |
//! | m41 m42 m43 1 |   row 4: translation
//! ```
//!
//! A column-major OpenGL array (what the native libraries return) read in
//! order as rows lands exactly in this layout, which is why
//! [`Pose::from_floats`] is a plain row-major copy.

use nalgebra::{Matrix3, Matrix4, RowVector3, Vector3};

use crate::error::{Result, TrackingError};

/// Norm below which a basis row is considered degenerate.
const DEGENERATE_NORM: f64 = 1e-9;

/// Translation change (scene units) that counts as movement.
pub const DEFAULT_TRANSLATION_THRESHOLD: f64 = 0.01;

/// Rotation change (degrees, per Euler angle) that counts as movement.
pub const DEFAULT_ROTATION_THRESHOLD_DEG: f64 = 0.1;

/// Rigid (or near-rigid) transform of a tracked marker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub matrix: Matrix4<f64>,
}

/// Euler-like angles extracted from a pose, in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EulerAngles {
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
}

/// Thresholds for [`has_moved_significantly`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionThreshold {
    pub translation: f64,
    pub rotation_deg: f64,
}

impl Default for MotionThreshold {
    fn default() -> Self {
        Self {
            translation: DEFAULT_TRANSLATION_THRESHOLD,
            rotation_deg: DEFAULT_ROTATION_THRESHOLD_DEG,
        }
    }
}

impl Pose {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    pub fn from_matrix(matrix: Matrix4<f64>) -> Self {
        Self { matrix }
    }

    /// Build a pose from 16 values in row-major order (m11, m12, ..., m44).
    ///
    /// Extra trailing values are ignored.
    pub fn from_floats(values: &[f64]) -> Result<Self> {
        if values.len() < 16 {
            return Err(TrackingError::invalid_argument(format!(
                "expected 16 values for a pose, got {}",
                values.len()
            )));
        }
        Ok(Self::from_matrix(Matrix4::from_row_slice(&values[..16])))
    }

    /// Build a pose from a fixed-size row-major array.
    pub fn from_array(values: &[f64; 16]) -> Self {
        Self::from_matrix(Matrix4::from_row_slice(values))
    }

    /// Build a pose from a rotation basis (rows are axes) and a translation.
    pub fn from_parts(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Self {
        let mut matrix = Matrix4::identity();
        matrix.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation);
        matrix
            .fixed_view_mut::<1, 3>(3, 0)
            .copy_from(&translation.transpose());
        Self { matrix }
    }

    /// Row-major copy of the 16 matrix elements.
    pub fn to_floats(&self) -> [f64; 16] {
        let mut out = [0.0; 16];
        for (i, row) in self.matrix.row_iter().enumerate() {
            for (j, v) in row.iter().enumerate() {
                out[i * 4 + j] = *v;
            }
        }
        out
    }

    /// Upper-left 3x3 block.
    pub fn rotation_block(&self) -> Matrix3<f64> {
        self.matrix.fixed_view::<3, 3>(0, 0).into_owned()
    }

    /// Translation row (m41, m42, m43).
    pub fn translation(&self) -> Vector3<f64> {
        Vector3::new(
            self.matrix[(3, 0)],
            self.matrix[(3, 1)],
            self.matrix[(3, 2)],
        )
    }

    /// Zero the translation row, keep the 3x3 block as-is (no normalization).
    pub fn rotation_only(&self) -> Self {
        let mut matrix = self.matrix;
        matrix[(3, 0)] = 0.0;
        matrix[(3, 1)] = 0.0;
        matrix[(3, 2)] = 0.0;
        Self { matrix }
    }

    /// Identity rotation with this pose's translation.
    pub fn translation_only(&self) -> Self {
        Self::from_parts(&Matrix3::identity(), &self.translation())
    }

    /// Gram-Schmidt the rotation rows into a right-handed orthonormal basis.
    ///
    /// Row 1 is normalized, row 2 is made orthogonal to it and normalized,
    /// row 3 is replaced by their cross product. Translation is untouched.
    /// A degenerate basis (zero-length row 1, or row 2 parallel to row 1) is
    /// returned unchanged.
    pub fn orthonormalize(&self) -> Self {
        let r0: RowVector3<f64> = self.matrix.fixed_view::<1, 3>(0, 0).into_owned();
        let r1: RowVector3<f64> = self.matrix.fixed_view::<1, 3>(1, 0).into_owned();

        let Some(x) = r0.try_normalize(DEGENERATE_NORM) else {
            return *self;
        };
        let Some(y) = (r1 - x * r1.dot(&x)).try_normalize(DEGENERATE_NORM) else {
            return *self;
        };
        let z = x.cross(&y);

        let mut matrix = self.matrix;
        matrix.fixed_view_mut::<1, 3>(0, 0).copy_from(&x);
        matrix.fixed_view_mut::<1, 3>(1, 0).copy_from(&y);
        matrix.fixed_view_mut::<1, 3>(2, 0).copy_from(&z);
        Self { matrix }
    }

    /// Extract pitch/yaw/roll.
    ///
    /// `roll = atan2(m12, m11)`, `pitch = atan2(m23, m33)`, `yaw = -asin(m13)`.
    ///
    /// Gimbal lock: when `|m13|` approaches 1, yaw saturates at ±90° and pitch
    /// and roll become coupled. No special-casing beyond clamping the `asin`
    /// argument is attempted.
    pub fn euler_angles(&self) -> EulerAngles {
        let m = &self.matrix;
        EulerAngles {
            roll: m[(0, 1)].atan2(m[(0, 0)]),
            pitch: m[(1, 2)].atan2(m[(2, 2)]),
            yaw: -m[(0, 2)].clamp(-1.0, 1.0).asin(),
        }
    }

    /// True if every element matches bit-for-bit.
    pub fn bit_eq(&self, other: &Pose) -> bool {
        self.matrix
            .iter()
            .zip(other.matrix.iter())
            .all(|(a, b)| a.to_bits() == b.to_bits())
    }

    pub fn is_identity(&self) -> bool {
        self.matrix == Matrix4::identity()
    }

    /// True if the rotation block is orthonormal and right-handed within `tol`.
    pub fn is_orthonormal(&self, tol: f64) -> bool {
        let r = self.rotation_block();
        let gram = r * r.transpose();
        (gram - Matrix3::identity()).abs().max() <= tol && (r.determinant() - 1.0).abs() <= tol
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

/// Decide whether `curr` differs enough from `prev` to be worth publishing.
///
/// An identity `prev` means "no prior sample" and always reports movement.
pub fn has_moved_significantly(prev: &Pose, curr: &Pose, threshold: MotionThreshold) -> bool {
    if prev.is_identity() {
        return true;
    }

    if (curr.translation() - prev.translation()).norm() > threshold.translation {
        return true;
    }

    let a = prev.euler_angles();
    let b = curr.euler_angles();
    let exceeds = |x: f64, y: f64| (x - y).abs().to_degrees() > threshold.rotation_deg;
    exceeds(a.pitch, b.pitch) || exceeds(a.yaw, b.yaw) || exceeds(a.roll, b.roll)
}
