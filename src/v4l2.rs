//! Raw kernel interface: syscall wrappers and ioctl request codes.

pub mod api;
pub use api::*;

pub mod vidioc;
