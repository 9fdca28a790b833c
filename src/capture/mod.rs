//! Capture device state machine for the two physical sensors.

use std::fmt;

use crate::format::FourCC;

pub mod device;
pub use device::{CaptureBuffer, CaptureDevice, CaptureStats};

/// Physical sensor behind a capture node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sensor {
    /// Color camera, streams YUYV
    Rgb,
    /// Time-of-flight sensor, streams packed 12-bit Bayer raw frames
    Depth,
}

impl Sensor {
    /// Pixel format the sensor is always configured with
    pub fn fourcc(self) -> FourCC {
        match self {
            Sensor::Rgb => FourCC::YUYV,
            Sensor::Depth => FourCC::SBGGR12P,
        }
    }
}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sensor::Rgb => write!(f, "rgb"),
            Sensor::Depth => write!(f, "depth"),
        }
    }
}

/// Lifecycle state of a [`CaptureDevice`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Opened,
    Configured,
    Streaming,
    Uninitialized,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Closed => "closed",
            State::Opened => "opened",
            State::Configured => "configured",
            State::Streaming => "streaming",
            State::Uninitialized => "uninitialized",
        };
        f.write_str(s)
    }
}

/// Operations that move a capture device through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Open,
    Configure,
    Start,
    Dequeue,
    Enqueue,
    Stop,
    Uninit,
    Close,
}

impl Op {
    pub fn name(self) -> &'static str {
        match self {
            Op::Open => "open",
            Op::Configure => "configure",
            Op::Start => "start",
            Op::Dequeue => "dequeue",
            Op::Enqueue => "enqueue",
            Op::Stop => "stop",
            Op::Uninit => "uninit",
            Op::Close => "close",
        }
    }
}

impl State {
    /// Returns the state reached by applying `op`, `None` if `op` is not allowed here
    ///
    /// ```
    /// use rgbd_uvc::capture::{Op, State};
    /// assert_eq!(State::Opened.next(Op::Configure), Some(State::Configured));
    /// assert_eq!(State::Configured.next(Op::Configure), None);
    /// ```
    pub fn next(self, op: Op) -> Option<State> {
        use State::*;

        match (self, op) {
            (Closed, Op::Open) => Some(Opened),
            (Opened, Op::Configure) | (Uninitialized, Op::Configure) => Some(Configured),
            (Configured, Op::Start) => Some(Streaming),
            (Streaming, Op::Dequeue) | (Streaming, Op::Enqueue) => Some(Streaming),
            // buffers dequeued before stop may still be handed back afterwards
            (Configured, Op::Enqueue) => Some(Configured),
            (Streaming, Op::Stop) => Some(Configured),
            (Configured, Op::Uninit) => Some(Uninitialized),
            (Opened, Op::Close) | (Uninitialized, Op::Close) => Some(Closed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_lifecycle() {
        let ops = [
            Op::Open,
            Op::Configure,
            Op::Start,
            Op::Dequeue,
            Op::Enqueue,
            Op::Stop,
            Op::Start,
            Op::Stop,
            Op::Uninit,
            Op::Close,
        ];

        let end = ops.iter().try_fold(State::Closed, |state, op| state.next(*op));
        assert_eq!(end, Some(State::Closed));
    }

    #[test]
    fn configure_twice_needs_uninit() {
        assert_eq!(State::Configured.next(Op::Configure), None);
        assert_eq!(State::Streaming.next(Op::Configure), None);
        assert_eq!(
            State::Uninitialized.next(Op::Configure),
            Some(State::Configured)
        );
    }

    #[test]
    fn out_of_order_ops_are_rejected() {
        assert_eq!(State::Closed.next(Op::Start), None);
        assert_eq!(State::Opened.next(Op::Dequeue), None);
        assert_eq!(State::Configured.next(Op::Dequeue), None);
        assert_eq!(State::Streaming.next(Op::Uninit), None);
        assert_eq!(State::Streaming.next(Op::Close), None);
        assert_eq!(State::Configured.next(Op::Close), None);
        assert_eq!(State::Closed.next(Op::Close), None);
    }

    #[test]
    fn sensor_formats() {
        assert_eq!(Sensor::Rgb.fourcc(), FourCC::YUYV);
        assert_eq!(Sensor::Depth.fourcc(), FourCC::SBGGR12P);
        assert_eq!(Sensor::Depth.to_string(), "depth");
    }
}
