//! Formats, frame sizes and frame intervals advertised to the host.
//!
//! The table mirrors the function's streaming descriptors: every format and frame index the
//! host sends is 1-based and refers into it.

use crate::config::{GadgetConfig, Transport};
use crate::format::FourCC;
use crate::uvc::streaming::StreamingControl;

/// A frame descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    /// Supported frame intervals in 100 ns units, ascending
    pub intervals: &'static [u32],
}

/// A format descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    pub fourcc: FourCC,
    pub frames: &'static [FrameInfo],
}

impl FormatInfo {
    /// Bytes of one uncompressed frame
    pub fn frame_size(&self, frame: &FrameInfo) -> u32 {
        self.fourcc.frame_size(frame.width, frame.height) as u32
    }
}

const INTERVALS_FULL: &[u32] = &[333_333, 500_000, 666_666, 1_000_000, 2_000_000, 10_000_000];

static FRAMES_YUYV: &[FrameInfo] = &[
    FrameInfo {
        width: 640,
        height: 550,
        intervals: INTERVALS_FULL,
    },
    FrameInfo {
        width: 640,
        height: 480,
        intervals: INTERVALS_FULL,
    },
    FrameInfo {
        width: 640,
        height: 360,
        intervals: &[666_666, 10_000_000, 50_000_000],
    },
    FrameInfo {
        width: 1280,
        height: 720,
        intervals: &[50_000_000],
    },
];

/// Every format the function advertises, in descriptor order
pub static FORMATS: &[FormatInfo] = &[FormatInfo {
    fourcc: FourCC::YUYV,
    frames: FRAMES_YUYV,
}];

/// Streaming endpoint characteristics that bound the payload size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub transport: Transport,
    pub max_packet: u32,
    pub mult: u32,
    pub burst: u32,
}

impl Endpoint {
    pub fn new(config: &GadgetConfig) -> Self {
        Endpoint {
            transport: config.transport,
            max_packet: config.max_packet(),
            mult: config.mult,
            burst: config.burst,
        }
    }

    /// dwMaxPayloadTransferSize for a frame of `frame_size` bytes
    ///
    /// A bulk pipe moves a whole frame per transfer, isochronous transfers are limited to what
    /// fits into one service interval.
    pub fn max_payload(&self, frame_size: u32) -> u32 {
        match self.transport {
            Transport::Bulk => frame_size,
            Transport::Isochronous => self.max_packet * (self.mult + 1) * (self.burst + 1),
        }
    }
}

/// Outcome of negotiating a host request against [`FORMATS`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// 1-based
    pub format_index: u8,
    /// 1-based
    pub frame_index: u8,
    pub fourcc: FourCC,
    pub width: u32,
    pub height: u32,
    pub interval: u32,
    pub frame_size: u32,
}

impl Selection {
    fn new(format_index: usize, frame_index: usize, interval: u32) -> Self {
        let format = &FORMATS[format_index];
        let frame = &format.frames[frame_index];

        Selection {
            format_index: (format_index + 1) as u8,
            frame_index: (frame_index + 1) as u8,
            fourcc: format.fourcc,
            width: frame.width,
            height: frame.height,
            interval,
            frame_size: format.frame_size(frame),
        }
    }

    /// Writes the negotiated values into a probe or commit control
    pub fn apply(&self, endpoint: &Endpoint, ctrl: &mut StreamingControl) {
        ctrl.format_index = self.format_index;
        ctrl.frame_index = self.frame_index;
        ctrl.frame_interval = self.interval;
        ctrl.max_video_frame_size = self.frame_size;
        ctrl.max_payload_transfer_size = endpoint.max_payload(self.frame_size);
    }
}

/// Which end of the table to synthesize a control from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    First,
    Last,
}

/// Builds the control reported for GET_MIN/GET_DEF (first format and frame) or GET_MAX
/// (last format and frame)
pub fn bound_control(endpoint: &Endpoint, bound: Bound) -> StreamingControl {
    let format_index = match bound {
        Bound::First => 0,
        Bound::Last => FORMATS.len() - 1,
    };
    let frames = FORMATS[format_index].frames;
    let frame_index = match bound {
        Bound::First => 0,
        Bound::Last => frames.len() - 1,
    };
    let selection = Selection::new(format_index, frame_index, frames[frame_index].intervals[0]);

    let mut ctrl = StreamingControl {
        hint: 1,
        framing_info: 3,
        preferred_version: 1,
        max_version: 1,
        ..Default::default()
    };
    selection.apply(endpoint, &mut ctrl);
    ctrl
}

/// Resolves a host request to a supported combination
///
/// Out of range indices are clamped to the nearest valid one. The interval is the first
/// supported one not shorter than requested, or the longest if all are shorter.
pub fn negotiate(requested: &StreamingControl) -> Selection {
    let format_index = (requested.format_index as usize).clamp(1, FORMATS.len()) - 1;
    let frames = FORMATS[format_index].frames;
    let frame_index = (requested.frame_index as usize).clamp(1, frames.len()) - 1;

    let intervals = frames[frame_index].intervals;
    let interval = intervals
        .iter()
        .copied()
        .find(|&interval| interval >= requested.frame_interval)
        .or_else(|| intervals.last().copied())
        .unwrap_or(requested.frame_interval);

    Selection::new(format_index, frame_index, interval)
}
