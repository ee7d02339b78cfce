//! Video frames handed to the backends.
//!
//! # Byte layout
//!
//! - 8 bits per channel, rows top to bottom, pixels left to right.
//! - Channel order given by [`ColorFormat`].
//! - `stride` bytes between row starts, `stride >= width * channels`.
//!
//! Native libraries expect tightly packed rows; [`Frame::packed`] produces
//! that view, copying only when the stride carries padding.

use std::borrow::Cow;

use serde::Deserialize;

use crate::error::{Result, TrackingError};

/// Pixel format of a video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorFormat {
    Gray8,
    Rgb24,
    Bgr24,
    Rgba32,
    Bgra32,
    Argb32,
}

impl Default for ColorFormat {
    fn default() -> Self {
        Self::Bgr24
    }
}

impl ColorFormat {
    pub fn channels(self) -> usize {
        match self {
            Self::Gray8 => 1,
            Self::Rgb24 | Self::Bgr24 => 3,
            Self::Rgba32 | Self::Bgra32 | Self::Argb32 => 4,
        }
    }

    pub fn is_grayscale(self) -> bool {
        matches!(self, Self::Gray8)
    }

    /// Four-character color model tag used by the ALVAR image header.
    pub fn color_model(self) -> [u8; 4] {
        match self {
            Self::Gray8 => *b"GRAY",
            Self::Rgb24 | Self::Bgr24 => *b"RGB\0",
            Self::Rgba32 | Self::Bgra32 | Self::Argb32 => *b"RGBA",
        }
    }

    /// Four-character channel sequence tag used by the ALVAR image header.
    pub fn channel_sequence(self) -> [u8; 4] {
        match self {
            Self::Gray8 => *b"GRAY",
            Self::Rgb24 => *b"RGB\0",
            Self::Bgr24 => *b"BGR\0",
            Self::Rgba32 => *b"RGBA",
            Self::Bgra32 => *b"BGRA",
            Self::Argb32 => *b"ARGB",
        }
    }
}

/// Borrowed view of one video frame.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
    stride: usize,
    format: ColorFormat,
    pub timestamp_ns: u64,
}

impl<'a> Frame<'a> {
    /// Tightly packed frame.
    pub fn new(data: &'a [u8], width: u32, height: u32, format: ColorFormat) -> Result<Self> {
        let stride = width as usize * format.channels();
        Self::with_stride(data, width, height, stride, format)
    }

    pub fn with_stride(
        data: &'a [u8],
        width: u32,
        height: u32,
        stride: usize,
        format: ColorFormat,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(TrackingError::invalid_argument(format!(
                "frame dimensions must be non-zero, got {}x{}",
                width, height
            )));
        }
        let row_bytes = width as usize * format.channels();
        if stride < row_bytes {
            return Err(TrackingError::invalid_argument(format!(
                "stride {} is smaller than a {}-byte row",
                stride, row_bytes
            )));
        }
        let required = stride * (height as usize - 1) + row_bytes;
        if data.len() < required {
            return Err(TrackingError::invalid_argument(format!(
                "frame buffer holds {} bytes, {}x{} {:?} needs {}",
                data.len(),
                width,
                height,
                format,
                required
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            stride,
            format,
            timestamp_ns: 0,
        })
    }

    pub fn with_timestamp(mut self, timestamp_ns: u64) -> Self {
        self.timestamp_ns = timestamp_ns;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> ColorFormat {
        self.format
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.format.channels()
    }

    /// Iterate over rows without their padding.
    pub fn rows(&self) -> impl Iterator<Item = &'a [u8]> {
        let data = self.data;
        let stride = self.stride;
        let row_bytes = self.row_bytes();
        (0..self.height as usize).map(move |y| {
            let start = y * stride;
            &data[start..start + row_bytes]
        })
    }

    /// Tightly packed pixel bytes (`width * height * channels`).
    pub fn packed(&self) -> Cow<'a, [u8]> {
        let row_bytes = self.row_bytes();
        let len = row_bytes * self.height as usize;
        if self.stride == row_bytes {
            return Cow::Borrowed(&self.data[..len]);
        }
        let mut out = Vec::with_capacity(len);
        for row in self.rows() {
            out.extend_from_slice(row);
        }
        Cow::Owned(out)
    }
}

/// Owned frame, used where a frame must cross a thread boundary.
#[derive(Debug, Clone)]
pub struct OwnedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: ColorFormat,
    pub timestamp_ns: u64,
}

impl OwnedFrame {
    /// Zero-filled, tightly packed frame.
    pub fn blank(width: u32, height: u32, format: ColorFormat) -> Self {
        Self {
            data: vec![0; width as usize * height as usize * format.channels()],
            width,
            height,
            format,
            timestamp_ns: 0,
        }
    }

    pub fn as_frame(&self) -> Result<Frame<'_>> {
        Ok(Frame::new(&self.data, self.width, self.height, self.format)?
            .with_timestamp(self.timestamp_ns))
    }
}

/// Video capture collaborator. The pipeline only consumes frames.
pub trait VideoSource {
    /// Next captured frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Option<OwnedFrame>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_short_buffer() {
        let data = vec![0u8; 640 * 480 * 3 - 1];
        let err = Frame::new(&data, 640, 480, ColorFormat::Bgr24).unwrap_err();
        assert!(matches!(err, TrackingError::InvalidArgument(_)));
    }

    #[test]
    fn test_rejects_small_stride() {
        let data = vec![0u8; 64];
        assert!(Frame::with_stride(&data, 4, 4, 3, ColorFormat::Gray8).is_err());
    }

    #[test]
    fn test_packed_borrows_tight_frames() {
        let data = vec![7u8; 4 * 2 * 4];
        let frame = Frame::new(&data, 4, 2, ColorFormat::Bgra32).unwrap();
        assert!(matches!(frame.packed(), Cow::Borrowed(_)));
        assert_eq!(frame.packed().len(), 32);
    }

    #[test]
    fn test_packed_strips_row_padding() {
        // 2x2 gray with 2 bytes of padding per row; last row unpadded.
        let data = [1u8, 2, 0xAA, 0xAA, 3, 4];
        let frame = Frame::with_stride(&data, 2, 2, 4, ColorFormat::Gray8).unwrap();
        assert_eq!(frame.packed().as_ref(), &[1, 2, 3, 4]);
        assert_eq!(frame.rows().count(), 2);
    }

    #[test]
    fn test_channel_tags() {
        assert_eq!(&ColorFormat::Bgr24.channel_sequence(), b"BGR\0");
        assert_eq!(&ColorFormat::Gray8.color_model(), b"GRAY");
        assert_eq!(ColorFormat::Argb32.channels(), 4);
    }

    #[test]
    fn test_owned_frame_round_trips_dimensions() {
        let owned = OwnedFrame::blank(320, 240, ColorFormat::Rgb24);
        let frame = owned.as_frame().unwrap();
        assert_eq!(frame.dimensions(), (320, 240));
        assert_eq!(frame.format(), ColorFormat::Rgb24);
    }
}
