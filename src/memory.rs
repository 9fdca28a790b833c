use std::{
    fmt,
    ops::{Deref, DerefMut},
    ptr::NonNull,
    slice,
};

use crate::v4l2;

/// Memory used for buffer exchange
///
/// Only memory-mapped exchange is used by the sensors and the gadget.
#[allow(clippy::unreadable_literal)]
#[rustfmt::skip]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Memory {
    Mmap        = 1,
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Memory::Mmap => write!(f, "memory-mapped"),
        }
    }
}

/// Memory-mapped region
///
/// The backing memory belongs to the driver and is mapped into the process so data can be
/// copied. Capture buffers are read, output buffers are written.
///
/// The destructor automatically unmaps the memory.
#[derive(Debug)]
pub struct Mmap {
    ptr: NonNull<u8>,
    len: usize,
}

// The mapping is plain shared memory; access is serialized through &/&mut like a Vec.
unsafe impl Send for Mmap {}
unsafe impl Sync for Mmap {}

impl Mmap {
    /// Maps `length` bytes of the buffer living at `offset` in the driver's address space
    pub fn new(fd: std::os::raw::c_int, length: usize, offset: libc::off_t) -> std::io::Result<Self> {
        let ptr = unsafe {
            v4l2::mmap(
                std::ptr::null_mut(),
                length,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                offset,
            )?
        };

        NonNull::new(ptr as *mut u8)
            .map(|ptr| Mmap { ptr, len: length })
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "mmap returned null"))
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        unsafe {
            // ignore errors
            let _ = v4l2::munmap(self.ptr.as_ptr() as *mut std::os::raw::c_void, self.len);
        }
    }
}

impl Deref for Mmap {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for Mmap {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}
