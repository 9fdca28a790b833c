//! Streaming I/O through memory-mapped buffers.

use std::io;

use crate::buffer;
use crate::device::Handle;
use crate::v4l2;

pub mod arena;
pub use arena::{Arena, Owner};

/// Start streaming on a device, takes exclusive ownership of its queue
pub fn stream_on(handle: &Handle, buf_type: buffer::Type) -> io::Result<()> {
    let mut typ = buf_type as u32;
    unsafe {
        v4l2::ioctl(
            handle.fd(),
            v4l2::vidioc::VIDIOC_STREAMON,
            &mut typ as *mut _ as *mut std::os::raw::c_void,
        )
    }
}

/// Stop streaming, the driver returns all queued buffers
pub fn stream_off(handle: &Handle, buf_type: buffer::Type) -> io::Result<()> {
    let mut typ = buf_type as u32;
    unsafe {
        v4l2::ioctl(
            handle.fd(),
            v4l2::vidioc::VIDIOC_STREAMOFF,
            &mut typ as *mut _ as *mut std::os::raw::c_void,
        )
    }
}
