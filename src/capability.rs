use bitflags::bitflags;
use std::{fmt, str};

use v4l2_sys::*;

bitflags! {
    /// Device capability flags
    #[allow(clippy::unreadable_literal)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u32 {
        const VIDEO_CAPTURE         = 0x00000001;
        const VIDEO_OUTPUT          = 0x00000002;
        const VIDEO_OVERLAY         = 0x00000004;
        const VIDEO_CAPTURE_MPLANE  = 0x00001000;
        const VIDEO_OUTPUT_MPLANE   = 0x00002000;
        const VIDEO_M2M_MPLANE      = 0x00004000;
        const VIDEO_M2M             = 0x00008000;
        const EXT_PIX_FORMAT        = 0x00200000;
        const META_CAPTURE          = 0x00800000;
        const READ_WRITE            = 0x01000000;
        const STREAMING             = 0x04000000;
        const DEVICE_CAPS           = 0x80000000;
    }
}

impl From<u32> for Flags {
    fn from(flags: u32) -> Self {
        Flags::from_bits_truncate(flags)
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Device capabilities
#[derive(Debug, Clone)]
pub struct Capabilities {
    /// Driver name, e.g. uvc for usb video class devices
    pub driver: String,
    /// Card name
    pub card: String,
    /// Bus name, e.g. USB or PCI
    pub bus: String,
    /// Version number MAJOR.MINOR.PATCH
    pub version: (u8, u8, u8),

    /// Capabilities of the whole physical device
    pub capabilities: Flags,
}

impl Capabilities {
    /// Whether the node can capture frames through streaming I/O
    pub fn can_capture(&self) -> bool {
        self.capabilities
            .intersects(Flags::VIDEO_CAPTURE | Flags::VIDEO_CAPTURE_MPLANE)
    }

    /// Whether the node accepts frames for output
    pub fn can_output(&self) -> bool {
        self.capabilities.contains(Flags::VIDEO_OUTPUT)
    }

    /// Whether streaming I/O (mmap, userptr, dmabuf) is supported
    pub fn can_stream(&self) -> bool {
        self.capabilities.contains(Flags::STREAMING)
    }
}

fn c_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

impl From<v4l2_capability> for Capabilities {
    fn from(cap: v4l2_capability) -> Self {
        Capabilities {
            driver: c_str(&cap.driver),
            card: c_str(&cap.card),
            bus: c_str(&cap.bus_info),
            version: (
                ((cap.version >> 16) & 0xff) as u8,
                ((cap.version >> 8) & 0xff) as u8,
                (cap.version & 0xff) as u8,
            ),
            capabilities: Flags::from(cap.capabilities),
        }
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Driver      : {}", self.driver)?;
        writeln!(f, "Card        : {}", self.card)?;
        writeln!(f, "Bus         : {}", self.bus)?;
        writeln!(
            f,
            "Version     : {}.{}.{}",
            self.version.0, self.version.1, self.version.2
        )?;
        writeln!(f, "Capabilites : {}", self.capabilities)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(flags: u32) -> Capabilities {
        Capabilities {
            driver: String::new(),
            card: String::new(),
            bus: String::new(),
            version: (0, 0, 0),
            capabilities: Flags::from(flags),
        }
    }

    #[test]
    fn capture_and_streaming() {
        let c = caps(0x0000_0001 | 0x0400_0000);
        assert!(c.can_capture());
        assert!(c.can_stream());
        assert!(!c.can_output());
    }

    #[test]
    fn output_only() {
        let c = caps(0x0000_0002);
        assert!(c.can_output());
        assert!(!c.can_capture());
    }

    #[test]
    fn c_strings_stop_at_nul() {
        assert_eq!(c_str(b"uvc\0\0garbage"), "uvc");
        assert_eq!(c_str(b"full"), "full");
    }
}
