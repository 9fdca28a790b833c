use std::{io, mem, sync::Arc};

use tracing::{debug, trace};
use v4l2_sys::*;

use crate::buffer::{self, Metadata};
use crate::device::Handle;
use crate::memory::{Memory, Mmap};
use crate::v4l2;

/// Who may touch a buffer right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// Queued, the hardware may write (capture) or read (output) it
    Driver,
    /// Dequeued, safe to access from the process
    Application,
}

/// Manage mapped buffers
///
/// All buffers are unmapped and released in the Drop impl.
pub struct Arena {
    handle: Arc<Handle>,
    bufs: Vec<Mmap>,
    owners: Vec<Owner>,
    buf_type: buffer::Type,

    qbuf_count: u64,
    dqbuf_count: u64,
}

impl Arena {
    /// Returns a new, empty buffer pool for `buf_type` buffers of a device
    pub fn new(handle: Arc<Handle>, buf_type: buffer::Type) -> Self {
        Arena {
            handle,
            bufs: Vec::new(),
            owners: Vec::new(),
            buf_type,
            qbuf_count: 0,
            dqbuf_count: 0,
        }
    }

    /// Asks the driver for `count` buffers without mapping them
    ///
    /// Returns the number of buffers as reported by the driver, which may be less than
    /// requested. A count of zero frees the driver side allocation.
    pub fn request(&mut self, count: u32) -> io::Result<u32> {
        let mut v4l2_reqbufs = v4l2_requestbuffers {
            count,
            type_: self.buf_type as u32,
            memory: Memory::Mmap as u32,
            ..unsafe { mem::zeroed() }
        };
        unsafe {
            v4l2::ioctl(
                self.handle.fd(),
                v4l2::vidioc::VIDIOC_REQBUFS,
                &mut v4l2_reqbufs as *mut _ as *mut std::os::raw::c_void,
            )?;
        }

        Ok(v4l2_reqbufs.count)
    }

    /// Maps the next requested buffer into the process
    ///
    /// Buffers must be mapped in index order, starting at zero. Mapped buffers start out
    /// owned by the application.
    pub fn map_next(&mut self) -> io::Result<usize> {
        let index = self.bufs.len();
        let mut v4l2_buf = v4l2_buffer {
            index: index as u32,
            type_: self.buf_type as u32,
            memory: Memory::Mmap as u32,
            ..unsafe { mem::zeroed() }
        };
        let offset = unsafe {
            v4l2::ioctl(
                self.handle.fd(),
                v4l2::vidioc::VIDIOC_QUERYBUF,
                &mut v4l2_buf as *mut _ as *mut std::os::raw::c_void,
            )?;
            v4l2_buf.m.offset
        };

        let mapping = Mmap::new(
            self.handle.fd(),
            v4l2_buf.length as usize,
            offset as libc::off_t,
        )?;
        trace!(index, length = v4l2_buf.length, "mapped {} buffer", self.buf_type);

        self.bufs.push(mapping);
        self.owners.push(Owner::Application);
        Ok(index)
    }

    /// Requests `count` buffers from the driver and maps every granted one
    ///
    /// Returns the number of mapped buffers.
    pub fn allocate(&mut self, count: u32) -> io::Result<u32> {
        let count = self.request(count)?;
        for _ in 0..count {
            self.map_next()?;
        }

        debug!(count, "allocated {} buffers", self.buf_type);
        Ok(count)
    }

    /// Unmaps all buffers and hands their memory back to the driver
    pub fn release(&mut self) -> io::Result<()> {
        // unmap first, REQBUFS(0) fails while mappings exist
        self.bufs.clear();
        self.owners.clear();
        self.request(0)?;
        Ok(())
    }

    /// Number of mapped buffers
    pub fn len(&self) -> usize {
        self.bufs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bufs.is_empty()
    }

    /// Current owner of a buffer
    pub fn owner(&self, index: usize) -> Option<Owner> {
        self.owners.get(index).copied()
    }

    /// Read access to a dequeued buffer
    pub fn get(&self, index: usize) -> Option<&[u8]> {
        match self.owners.get(index) {
            Some(Owner::Application) => Some(&self.bufs[index]),
            _ => None,
        }
    }

    /// Write access to a dequeued buffer
    pub fn get_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        match self.owners.get(index) {
            Some(Owner::Application) => Some(&mut self.bufs[index]),
            _ => None,
        }
    }

    /// Insert a buffer into the drivers' incoming queue
    ///
    /// `bytesused` is the payload size for output buffers and ignored for capture buffers.
    pub fn queue(&mut self, index: usize, bytesused: u32) -> io::Result<()> {
        match self.owners.get(index) {
            Some(Owner::Application) => {}
            Some(Owner::Driver) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("buffer {} is already queued", index),
                ))
            }
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("no buffer at index {}", index),
                ))
            }
        }

        let mut v4l2_buf = v4l2_buffer {
            index: index as u32,
            type_: self.buf_type as u32,
            memory: Memory::Mmap as u32,
            bytesused,
            field: crate::format::FIELD_NONE,
            ..unsafe { mem::zeroed() }
        };
        unsafe {
            v4l2::ioctl(
                self.handle.fd(),
                v4l2::vidioc::VIDIOC_QBUF,
                &mut v4l2_buf as *mut _ as *mut std::os::raw::c_void,
            )?;
        }

        self.owners[index] = Owner::Driver;
        self.qbuf_count += 1;
        Ok(())
    }

    /// Queue every buffer the application currently owns
    pub fn queue_all(&mut self, bytesused: u32) -> io::Result<()> {
        for index in 0..self.bufs.len() {
            if self.owners[index] == Owner::Application {
                self.queue(index, bytesused)?;
            }
        }
        Ok(())
    }

    /// Remove a buffer from the drivers' outgoing queue
    ///
    /// Returns the buffer index together with the metadata filled in by the driver.
    pub fn dequeue(&mut self) -> io::Result<(usize, Metadata)> {
        let mut v4l2_buf = v4l2_buffer {
            type_: self.buf_type as u32,
            memory: Memory::Mmap as u32,
            ..unsafe { mem::zeroed() }
        };
        unsafe {
            v4l2::ioctl(
                self.handle.fd(),
                v4l2::vidioc::VIDIOC_DQBUF,
                &mut v4l2_buf as *mut _ as *mut std::os::raw::c_void,
            )?;
        }

        let index = v4l2_buf.index as usize;
        if index >= self.owners.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("driver returned unknown buffer {}", index),
            ));
        }

        self.owners[index] = Owner::Application;
        self.dqbuf_count += 1;

        Ok((
            index,
            Metadata {
                bytesused: v4l2_buf.bytesused,
                flags: v4l2_buf.flags.into(),
                timestamp: v4l2_buf.timestamp.into(),
                sequence: v4l2_buf.sequence,
            },
        ))
    }

    /// Marks every buffer as owned by the application
    ///
    /// STREAMOFF implicitly dequeues all buffers.
    pub fn reclaim_all(&mut self) {
        for owner in self.owners.iter_mut() {
            *owner = Owner::Application;
        }
    }

    /// Number of successful (queue, dequeue) calls
    pub fn counters(&self) -> (u64, u64) {
        (self.qbuf_count, self.dqbuf_count)
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        if !self.bufs.is_empty() {
            // the device may already be gone, nothing to recover here
            let _ = self.release();
        }
    }
}
