//! Hand-off of frames between the capture threads and the gadget.
//!
//! The RGB thread keeps [`RgbHistory`] current, the depth thread pairs every depth frame with
//! the newest RGB frame and pushes the result into a [`FrameRing`] which the gadget drains.

pub mod history;
pub mod ring;

pub use history::{RgbHistory, HISTORY_SLOTS};
pub use ring::{Consumer, FrameRing, MergedFrame, Producer, RingStats};
