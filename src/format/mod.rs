use std::{fmt, mem};

use v4l2_sys::*;

pub mod fourcc;
pub use fourcc::FourCC;

/// Progressive frames, `V4L2_FIELD_NONE`
pub const FIELD_NONE: u32 = 1;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// Streaming format (single-planar)
pub struct Format {
    /// width in pixels
    pub width: u32,
    /// height in pixels
    pub height: u32,
    /// pixelformat code
    pub fourcc: FourCC,

    /// bytes per line
    pub stride: u32,
    /// maximum number of bytes required to store an image
    pub size: u32,
}

impl Format {
    /// Returns a format with driver-chosen stride and size
    ///
    /// # Example
    ///
    /// ```
    /// use rgbd_uvc::{Format, FourCC};
    /// let fmt = Format::new(640, 480, FourCC::YUYV);
    /// assert_eq!(fmt.frame_size(), 640 * 480 * 2);
    /// ```
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        Format {
            width,
            height,
            fourcc,
            stride: 0,
            size: 0,
        }
    }

    /// Byte size of one image
    ///
    /// Prefers the size reported by the driver and falls back to what the pixel format implies.
    pub fn frame_size(&self) -> usize {
        if self.size != 0 {
            self.size as usize
        } else {
            self.fourcc.frame_size(self.width, self.height)
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}x{} (stride {}, size {})",
            self.fourcc, self.width, self.height, self.stride, self.size
        )
    }
}

impl From<v4l2_pix_format> for Format {
    fn from(fmt: v4l2_pix_format) -> Self {
        Self {
            width: fmt.width,
            height: fmt.height,
            fourcc: FourCC::from(fmt.pixelformat),
            stride: fmt.bytesperline,
            size: fmt.sizeimage,
        }
    }
}

impl From<Format> for v4l2_pix_format {
    fn from(format: Format) -> Self {
        Self {
            width: format.width,
            height: format.height,
            pixelformat: format.fourcc.into(),
            field: FIELD_NONE,
            bytesperline: format.stride,
            sizeimage: format.size,
            ..unsafe { mem::zeroed() }
        }
    }
}
