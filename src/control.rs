use std::fmt;

use v4l2_sys::v4l2_control;

/// Control identifiers used by the sensors
#[allow(clippy::unreadable_literal)]
pub mod id {
    pub const BRIGHTNESS: u32 = 0x00980900;
    pub const CONTRAST: u32 = 0x00980901;
    pub const EXPOSURE: u32 = 0x00980911;
    pub const GAIN: u32 = 0x00980913;
    pub const EXPOSURE_AUTO: u32 = 0x009a0901;
}

/// Values of the `EXPOSURE_AUTO` menu control
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureMode {
    Auto = 0,
    Manual = 1,
    ShutterPriority = 2,
    AperturePriority = 3,
}

/// A single integer control assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Control {
    pub id: u32,
    pub value: i32,
}

impl Control {
    pub fn new(id: u32, value: i32) -> Self {
        Control { id, value }
    }

    pub fn brightness(value: i32) -> Self {
        Control::new(id::BRIGHTNESS, value)
    }

    pub fn contrast(value: i32) -> Self {
        Control::new(id::CONTRAST, value)
    }

    pub fn exposure_mode(mode: ExposureMode) -> Self {
        Control::new(id::EXPOSURE_AUTO, mode as i32)
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x} = {}", self.id, self.value)
    }
}

impl From<Control> for v4l2_control {
    fn from(ctrl: Control) -> Self {
        v4l2_control {
            id: ctrl.id,
            value: ctrl.value,
        }
    }
}
