//! USB Video Class gadget engine.
//!
//! [`UvcGadget`] drives the video output node exposed by the kernel's UVC function driver. The
//! host negotiates a format through probe and commit control transfers ([`request`]), then
//! pulls frames which the gadget obtains from a [`FrameSource`].

pub mod dispatch;
pub mod event;
pub mod format;
pub mod gadget;
pub mod request;
pub mod streaming;
pub mod sys;

pub use dispatch::{Dispatcher, Step};
pub use event::Event;
pub use gadget::{ControlSink, FillMode, FrameSource, GadgetStats, Processed, UvcGadget};
pub use request::{DataOutcome, RequestHandler, Response};
pub use streaming::StreamingControl;
