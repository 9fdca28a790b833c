use std::{fmt, str};

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
/// Four character code representing a pixelformat
pub struct FourCC {
    pub repr: [u8; 4],
}

impl FourCC {
    /// Packed YUV 4:2:2, two bytes per pixel
    pub const YUYV: FourCC = FourCC::new(b"YUYV");
    /// 12-bit Bayer BGGR, two pixels packed into three bytes
    pub const SBGGR12P: FourCC = FourCC::new(b"pBCC");

    /// Returns a pixelformat as four character code
    ///
    /// # Arguments
    ///
    /// * `repr` - Four characters as raw bytes
    ///
    /// # Example
    ///
    /// ```
    /// use rgbd_uvc::format::FourCC;
    /// let fourcc = FourCC::new(b"YUYV");
    /// assert_eq!(fourcc, FourCC::YUYV);
    /// ```
    pub const fn new(repr: &[u8; 4]) -> FourCC {
        FourCC { repr: *repr }
    }

    /// Returns the string representation of a four character code
    pub fn str(&self) -> Result<&str, str::Utf8Error> {
        str::from_utf8(&self.repr)
    }

    /// Number of bytes a single `width` x `height` image occupies
    ///
    /// Unknown formats are assumed to use two bytes per pixel.
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match *self {
            FourCC::SBGGR12P => pixels * 3 / 2,
            _ => pixels * 2,
        }
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.str() {
            Ok(s) => write!(f, "{}", s),
            Err(_) => write!(f, "{:#010x}", u32::from(*self)),
        }
    }
}

impl From<u32> for FourCC {
    fn from(code: u32) -> Self {
        FourCC::new(&code.to_le_bytes())
    }
}

impl From<FourCC> for u32 {
    fn from(fourcc: FourCC) -> Self {
        Self::from_le_bytes(fourcc.repr)
    }
}
