//! Binding to the ALVAR wrapper library (feature `alvar-ffi`).
//!
//! The wrapper keeps one detector in process-global state, so at most one
//! [`AlvarLibrary`] may exist at a time. Every `unsafe` block of the crate
//! lives in this module.

use std::ffi::CString;
use std::os::raw::{c_char, c_double, c_int, c_uchar};
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use crate::backend::native::{
    AlvarNative, ErrorThresholds, MarkerGeometry, NativeContext, NativeError, NativeImage,
    NativePose,
};
use crate::config::{CalibrationSource, DetectorSlot};
use crate::tracking::frame::CameraModel;

#[link(name = "ALVARWrapper")]
extern "C" {
    fn alvar_init_camera(calib_file: *mut c_char, width: c_int, height: c_int) -> c_int;
    fn alvar_get_camera_params(proj_mat: *mut c_double, fov_x: *mut c_double, fov_y: *mut c_double);
    fn alvar_init_marker_detector(marker_size: c_double, marker_res: c_int, margin: c_double);
    fn alvar_set_detect_additional(enable: bool);
    fn alvar_set_marker_size(id: c_int, marker_size: c_double);
    fn alvar_select_detector(detector_id: c_int);
    fn alvar_add_multi_marker(num_ids: c_int, ids: *mut c_int, filename: *mut c_char);
    fn alvar_detect_marker(
        n_channels: c_int,
        color_model: *mut c_char,
        channel_seq: *mut c_char,
        image_data: *mut c_char,
        interested_ids: *mut c_int,
        num_found: *mut c_int,
        num_interested: *mut c_int,
        max_marker_error: c_double,
        max_track_error: c_double,
    );
    fn alvar_get_poses(
        ids: *mut c_int,
        pose_mats: *mut c_double,
        return_hide_textures: bool,
        hide_textures: *mut c_uchar,
    );
    fn alvar_get_multi_marker_poses(
        ids: *mut c_int,
        pose_mats: *mut c_double,
        errors: *mut c_double,
        return_hide_textures: bool,
        hide_textures: *mut c_uchar,
    );
}

static CLAIMED: AtomicBool = AtomicBool::new(false);

/// Exclusive handle on the ALVAR wrapper.
#[derive(Debug)]
pub struct AlvarLibrary {
    width: u32,
    height: u32,
    /// Bundles ever loaded into the wrapper; it has no call to drop them.
    native_bundles: usize,
    /// `native_bundles` when the current context was created.
    bundle_offset: usize,
    poses: Vec<(i32, NativePose)>,
}

impl AlvarLibrary {
    /// Claim the wrapper. Fails while another `AlvarLibrary` is alive.
    pub fn acquire() -> Result<Self, NativeError> {
        if CLAIMED.swap(true, Ordering::AcqRel) {
            return Err(NativeError::new("acquire", "the ALVAR wrapper is already in use"));
        }
        Ok(Self {
            width: 0,
            height: 0,
            native_bundles: 0,
            bundle_offset: 0,
            poses: Vec::new(),
        })
    }
}

impl Drop for AlvarLibrary {
    fn drop(&mut self) {
        CLAIMED.store(false, Ordering::Release);
    }
}

fn path_to_cstring(call: &'static str, path: &Path) -> Result<CString, NativeError> {
    let text = path
        .to_str()
        .ok_or_else(|| NativeError::new(call, format!("{:?} is not valid UTF-8", path)))?;
    CString::new(text).map_err(|e| NativeError::new(call, e.to_string()))
}

impl NativeContext for AlvarLibrary {
    fn init_camera(
        &mut self,
        width: u32,
        height: u32,
        calibration: &CalibrationSource,
    ) -> Result<CameraModel, NativeError> {
        let (w, h) = (width as c_int, height as c_int);
        match calibration {
            CalibrationSource::File(path) => {
                let file = path_to_cstring("alvar_init_camera", path)?;
                // SAFETY: `file` is a NUL-terminated string that outlives the call.
                let status = unsafe { alvar_init_camera(file.as_ptr() as *mut c_char, w, h) };
                if status != 0 {
                    return Err(NativeError::new(
                        "alvar_init_camera",
                        format!("cannot load calibration {}", path.display()),
                    ));
                }
            }
            CalibrationSource::FocalLength { .. } => {
                warn!("ALVAR wrapper takes no focal lengths, using its default calibration");
                // SAFETY: a null calibration file selects the default camera.
                unsafe { alvar_init_camera(ptr::null_mut(), w, h) };
            }
        }

        let mut projection = [0.0f64; 16];
        let (mut fov_x, mut fov_y) = (0.0f64, 0.0f64);
        // SAFETY: the wrapper writes 16 doubles and two scalars.
        unsafe { alvar_get_camera_params(projection.as_mut_ptr(), &mut fov_x, &mut fov_y) };

        self.width = width;
        self.height = height;
        self.bundle_offset = self.native_bundles;
        self.poses.clear();

        let fx = width as f64 / (2.0 * (fov_x / 2.0).tan());
        let fy = height as f64 / (2.0 * (fov_y / 2.0).tan());
        Ok(CameraModel::from_focal_length(width, height, fx, fy))
    }

    fn release(&mut self) {
        self.bundle_offset = self.native_bundles;
        self.poses.clear();
    }
}

impl AlvarNative for AlvarLibrary {
    fn init_marker_detector(&mut self, geometry: MarkerGeometry) -> Result<(), NativeError> {
        // SAFETY: plain scalar arguments.
        unsafe {
            alvar_init_marker_detector(geometry.size, geometry.resolution as c_int, geometry.margin)
        };
        Ok(())
    }

    fn set_marker_size(&mut self, id: i32, size: f64) {
        // SAFETY: plain scalar arguments.
        unsafe { alvar_set_marker_size(id, size) };
    }

    fn set_detect_additional(&mut self, enable: bool) {
        // SAFETY: plain scalar argument.
        unsafe { alvar_set_detect_additional(enable) };
    }

    fn select_detector(&mut self, detector: DetectorSlot) {
        let id = match detector {
            DetectorSlot::Primary => 0,
            DetectorSlot::Secondary => 1,
        };
        // SAFETY: plain scalar argument.
        unsafe { alvar_select_detector(id) };
    }

    fn add_multi_marker(&mut self, ids: &[i32], config_file: &Path) -> Result<usize, NativeError> {
        let file = path_to_cstring("alvar_add_multi_marker", config_file)?;
        let mut ids = ids.to_vec();
        // SAFETY: `ids` holds `num_ids` values and `file` is NUL-terminated;
        // the wrapper copies both.
        unsafe {
            alvar_add_multi_marker(ids.len() as c_int, ids.as_mut_ptr(), file.as_ptr() as *mut c_char)
        };
        self.native_bundles += 1;
        Ok(self.native_bundles - 1 - self.bundle_offset)
    }

    fn detect(
        &mut self,
        image: &NativeImage<'_>,
        interested: &[i32],
        thresholds: ErrorThresholds,
    ) -> Result<usize, NativeError> {
        if (image.width, image.height) != (self.width, self.height) {
            return Err(NativeError::new(
                "alvar_detect_marker",
                format!(
                    "image is {}x{}, camera is {}x{}",
                    image.width, image.height, self.width, self.height
                ),
            ));
        }
        let channels = image.format.channels();
        let expected = image.width as usize * image.height as usize * channels;
        if image.pixels.len() != expected {
            return Err(NativeError::new(
                "alvar_detect_marker",
                format!("image buffer has {} bytes, expected {}", image.pixels.len(), expected),
            ));
        }

        let mut color_model = image.format.color_model();
        let mut channel_seq = image.format.channel_sequence();
        let mut interested = interested.to_vec();
        let mut num_found: c_int = 0;
        let mut num_interested = interested.len() as c_int;
        // SAFETY: the buffer holds exactly width*height*channels bytes, which
        // is what the wrapper reads; it does not write to the image.
        unsafe {
            alvar_detect_marker(
                channels as c_int,
                color_model.as_mut_ptr() as *mut c_char,
                channel_seq.as_mut_ptr() as *mut c_char,
                image.pixels.as_ptr() as *mut c_char,
                interested.as_mut_ptr(),
                &mut num_found,
                &mut num_interested,
                thresholds.max_marker_error,
                thresholds.max_track_error,
            )
        };

        let count = num_interested.max(0) as usize;
        let mut ids = vec![0 as c_int; count];
        let mut mats = vec![0.0f64; count * 16];
        if count > 0 {
            // SAFETY: the wrapper writes one ID and 16 doubles per found
            // interested marker, `count` of them.
            unsafe { alvar_get_poses(ids.as_mut_ptr(), mats.as_mut_ptr(), false, ptr::null_mut()) };
        }

        self.poses = ids
            .iter()
            .zip(mats.chunks_exact(16))
            .map(|(&id, chunk)| {
                let mut pose = [0.0; 16];
                pose.copy_from_slice(chunk);
                (id, pose)
            })
            .collect();
        Ok(num_found.max(0) as usize)
    }

    fn poses(&self) -> Vec<(i32, NativePose)> {
        self.poses.clone()
    }

    fn multi_marker_poses(&mut self) -> Vec<(NativePose, f64)> {
        let n = self.native_bundles;
        if n == 0 {
            return Vec::new();
        }
        let mut ids = vec![0 as c_int; n];
        let mut mats = vec![0.0f64; n * 16];
        // Untouched when no marker was seen: every bundle stays unresolved.
        let mut errors = vec![-1.0f64; n];
        // SAFETY: the wrapper writes at most one entry per loaded bundle.
        unsafe {
            alvar_get_multi_marker_poses(
                ids.as_mut_ptr(),
                mats.as_mut_ptr(),
                errors.as_mut_ptr(),
                false,
                ptr::null_mut(),
            )
        };

        mats.chunks_exact(16)
            .zip(errors)
            .skip(self.bundle_offset)
            .map(|(chunk, error)| {
                let mut pose = [0.0; 16];
                pose.copy_from_slice(chunk);
                (pose, error)
            })
            .collect()
    }
}
