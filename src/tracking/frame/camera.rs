//! Pinhole camera model reported by a configured backend.

use nalgebra::Matrix4;

/// Intrinsics of the tracking camera at the configured resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraModel {
    pub width: u32,
    pub height: u32,
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraModel {
    /// Camera with the principal point at the image center.
    pub fn from_focal_length(width: u32, height: u32, fx: f64, fy: f64) -> Self {
        Self {
            width,
            height,
            fx,
            fy,
            cx: width as f64 / 2.0,
            cy: height as f64 / 2.0,
        }
    }

    /// Horizontal field of view in radians.
    pub fn fov_x(&self) -> f64 {
        2.0 * (self.width as f64 / (2.0 * self.fx)).atan()
    }

    /// Vertical field of view in radians.
    pub fn fov_y(&self) -> f64 {
        2.0 * (self.height as f64 / (2.0 * self.fy)).atan()
    }

    /// OpenGL-style perspective projection matching the intrinsics.
    ///
    /// Column-vector convention, camera looking down -z, image y pointing down.
    #[rustfmt::skip]
    pub fn projection_matrix(&self, near: f64, far: f64) -> Matrix4<f64> {
        let w = self.width as f64;
        let h = self.height as f64;
        Matrix4::new(
            2.0 * self.fx / w, 0.0,               1.0 - 2.0 * self.cx / w,        0.0,
            0.0,               2.0 * self.fy / h, 2.0 * self.cy / h - 1.0,        0.0,
            0.0,               0.0,               -(far + near) / (far - near),   -2.0 * far * near / (far - near),
            0.0,               0.0,               -1.0,                           0.0,
        )
    }

    /// Same camera at a different resolution (intrinsics scaled).
    pub fn rescaled(&self, width: u32, height: u32) -> Self {
        let sx = width as f64 / self.width as f64;
        let sy = height as f64 / self.height as f64;
        Self {
            width,
            height,
            fx: self.fx * sx,
            fy: self.fy * sy,
            cx: self.cx * sx,
            cy: self.cy * sy,
        }
    }
}
