use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{io, mem, time::Duration};

use tracing::debug;
use v4l2_sys::*;

use crate::buffer;
use crate::control::Control;
use crate::format::{Format, FourCC};
use crate::v4l2;
use crate::Capabilities;

/// Owned file descriptor of a video4linux node
///
/// The descriptor is closed when the last reference goes away.
#[derive(Debug)]
pub struct Handle {
    fd: std::os::raw::c_int,
    path: PathBuf,
}

impl Handle {
    /// Opens a device node
    ///
    /// # Arguments
    ///
    /// * `path` - Node path, e.g. "/dev/video0"
    /// * `flags` - Open flags passed through to open(2)
    pub fn open<P: AsRef<Path>>(path: P, flags: i32) -> io::Result<Self> {
        let path = path.as_ref();
        let fd = v4l2::open(path, flags)?;
        debug!(path = %path.display(), fd, "opened device node");

        Ok(Handle {
            fd,
            path: PathBuf::from(path),
        })
    }

    /// Returns the raw fd of the device
    pub fn fd(&self) -> std::os::raw::c_int {
        self.fd
    }

    /// Returns the path this node was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Polls the descriptor for `events`
    ///
    /// Returns the reported events, zero when the timeout expired first.
    pub fn poll(
        &self,
        events: std::os::raw::c_short,
        timeout: Option<Duration>,
    ) -> io::Result<std::os::raw::c_short> {
        v4l2::poll(self.fd, events, timeout)
    }

    /// Query for device capabilities
    pub fn query_caps(&self) -> io::Result<Capabilities> {
        unsafe {
            let mut v4l2_caps: v4l2_capability = mem::zeroed();
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_QUERYCAP,
                &mut v4l2_caps as *mut _ as *mut std::os::raw::c_void,
            )?;

            Ok(Capabilities::from(v4l2_caps))
        }
    }

    /// Negotiates a single-planar format
    ///
    /// Returns the format as adjusted by the driver.
    pub fn set_format(&self, buf_type: buffer::Type, fmt: &Format) -> io::Result<Format> {
        unsafe {
            let mut v4l2_fmt = v4l2_format {
                type_: buf_type as u32,
                fmt: v4l2_format__bindgen_ty_1 { pix: (*fmt).into() },
            };
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_S_FMT,
                &mut v4l2_fmt as *mut _ as *mut std::os::raw::c_void,
            )?;

            Ok(Format::from(v4l2_fmt.fmt.pix))
        }
    }

    /// Returns the pixel formats offered for `buf_type` buffers
    pub fn enum_formats(&self, buf_type: buffer::Type) -> io::Result<Vec<FourCC>> {
        let mut formats = Vec::new();
        let mut v4l2_fmt = v4l2_fmtdesc {
            index: 0,
            type_: buf_type as u32,
            ..unsafe { mem::zeroed() }
        };

        loop {
            let ret = unsafe {
                v4l2::ioctl(
                    self.fd,
                    v4l2::vidioc::VIDIOC_ENUM_FMT,
                    &mut v4l2_fmt as *mut _ as *mut std::os::raw::c_void,
                )
            };

            match ret {
                Ok(()) => formats.push(FourCC::from(v4l2_fmt.pixelformat)),
                // EINVAL past the last index ends the enumeration
                Err(e) if v4l2_fmt.index == 0 => return Err(e),
                Err(_) => return Ok(formats),
            }

            v4l2_fmt.index += 1;
        }
    }

    /// Returns the discrete frame sizes offered for a pixel format
    ///
    /// Stepwise and continuous ranges are reported by their maximum size.
    pub fn enum_framesizes(&self, fourcc: FourCC) -> io::Result<Vec<(u32, u32)>> {
        let mut framesizes = Vec::new();
        let mut v4l2_struct = v4l2_frmsizeenum {
            index: 0,
            pixel_format: fourcc.into(),
            ..unsafe { mem::zeroed() }
        };

        loop {
            let ret = unsafe {
                v4l2::ioctl(
                    self.fd,
                    v4l2::vidioc::VIDIOC_ENUM_FRAMESIZES,
                    &mut v4l2_struct as *mut _ as *mut std::os::raw::c_void,
                )
            };

            if let Err(e) = ret {
                if v4l2_struct.index == 0 {
                    return Err(e);
                } else {
                    return Ok(framesizes);
                }
            }

            let size = unsafe {
                if v4l2_struct.type_ == v4l2_frmsizetypes_V4L2_FRMSIZE_TYPE_DISCRETE {
                    let discrete = v4l2_struct.__bindgen_anon_1.discrete;
                    (discrete.width, discrete.height)
                } else {
                    let stepwise = v4l2_struct.__bindgen_anon_1.stepwise;
                    (stepwise.max_width, stepwise.max_height)
                }
            };
            framesizes.push(size);

            v4l2_struct.index += 1;
        }
    }

    /// Sets a single integer control
    pub fn set_control(&self, control: Control) -> io::Result<()> {
        let mut v4l2_ctrl: v4l2_control = control.into();
        unsafe {
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_S_CTRL,
                &mut v4l2_ctrl as *mut _ as *mut std::os::raw::c_void,
            )
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        // nothing sensible to do about a failing close(2) here
        let _ = v4l2::close(self.fd);
    }
}

/// Control-set capability for a device owned elsewhere
///
/// S_CTRL is safe to issue while another thread streams from the same node, so the
/// capture thread can keep its device while the gadget forwards host-side controls.
#[derive(Debug, Clone)]
pub struct Controls {
    handle: Arc<Handle>,
}

impl Controls {
    pub fn new(handle: Arc<Handle>) -> Self {
        Controls { handle }
    }

    pub fn set(&self, control: Control) -> io::Result<()> {
        debug!(
            path = %self.handle.path().display(),
            id = control.id,
            value = control.value,
            "set control"
        );
        self.handle.set_control(control)
    }
}
