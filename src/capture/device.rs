use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use std::{io, mem};

use tracing::{debug, info, trace, warn};
use v4l2_sys::*;

use crate::buffer::{self, Metadata};
use crate::capture::{Op, Sensor, State};
use crate::control::{Control, ExposureMode};
use crate::device::{Controls, Handle};
use crate::error::{ConfigError, DeviceError};
use crate::format::Format;
use crate::fraction::Fraction;
use crate::io::{stream_off, stream_on, Arena};
use crate::v4l2;

/// A dequeued buffer, owned by the application until handed back through
/// [`CaptureDevice::enqueue`]
///
/// The token is deliberately not `Clone`: a buffer can only be queued once.
#[derive(Debug)]
pub struct CaptureBuffer {
    index: usize,
    meta: Metadata,
}

impl CaptureBuffer {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Metadata reported by the driver at dequeue time
    pub fn meta(&self) -> &Metadata {
        &self.meta
    }
}

/// Per device counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub queued: u64,
    pub dequeued: u64,
    pub timeouts: u64,
}

/// Linux capture device abstraction
///
/// Owns the node handle, the negotiated format and the pool of mapped buffers of one
/// sensor. Operations must follow the lifecycle described by [`State::next`], anything
/// else fails with [`DeviceError::InvalidState`].
pub struct CaptureDevice {
    sensor: Sensor,
    handle: Option<Arc<Handle>>,
    arena: Option<Arena>,
    format: Option<Format>,
    state: State,

    fps: u32,
    crop: bool,
    timeout: Duration,
    timeouts: u64,
}

impl CaptureDevice {
    /// Opens the capture node of a sensor
    ///
    /// # Arguments
    ///
    /// * `sensor` - Which sensor sits behind the node, selects the pixel format
    /// * `path` - Node path, e.g. "/dev/video0"
    pub fn open<P: AsRef<Path>>(sensor: Sensor, path: P) -> Result<Self, DeviceError> {
        let path = path.as_ref();
        let handle = Handle::open(path, libc::O_RDWR | libc::O_NONBLOCK).map_err(|source| {
            DeviceError::Open {
                path: path.to_path_buf(),
                source,
            }
        })?;
        info!(%sensor, path = %path.display(), "opened capture device");

        Ok(CaptureDevice {
            sensor,
            handle: Some(Arc::new(handle)),
            arena: None,
            format: None,
            state: State::Opened,
            fps: 30,
            crop: false,
            timeout: Duration::from_secs(2),
            timeouts: 0,
        })
    }

    /// Builder: frame rate requested at configure time
    pub fn fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    /// Builder: apply an explicit crop rectangle matching the configured size
    pub fn crop(mut self, crop: bool) -> Self {
        self.crop = crop;
        self
    }

    /// Builder: bound on a single [`dequeue`](Self::dequeue) wait
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn sensor(&self) -> Sensor {
        self.sensor
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Negotiated format, available once configured
    pub fn format(&self) -> Option<Format> {
        self.format
    }

    /// Byte size of one negotiated frame
    pub fn frame_size(&self) -> Option<usize> {
        self.format.map(|fmt| fmt.frame_size())
    }

    pub fn stats(&self) -> CaptureStats {
        let (queued, dequeued) = self
            .arena
            .as_ref()
            .map(|arena| arena.counters())
            .unwrap_or_default();

        CaptureStats {
            queued,
            dequeued,
            timeouts: self.timeouts,
        }
    }

    fn check(&self, op: Op) -> Result<State, DeviceError> {
        self.state.next(op).ok_or(DeviceError::InvalidState {
            op: op.name(),
            state: self.state,
        })
    }

    fn handle(&self) -> Result<&Arc<Handle>, DeviceError> {
        self.handle.as_ref().ok_or(DeviceError::InvalidState {
            op: "access",
            state: self.state,
        })
    }

    fn arena_mut(&mut self, op: Op) -> Result<&mut Arena, DeviceError> {
        let state = self.state;
        self.arena.as_mut().ok_or(DeviceError::InvalidState {
            op: op.name(),
            state,
        })
    }

    /// Negotiates crop and pixel format and maps `buffer_count` buffers
    ///
    /// Fewer than two granted buffers or a failed mapping leave the device in its previous
    /// state with no buffers allocated.
    pub fn configure(
        &mut self,
        width: u32,
        height: u32,
        buffer_count: u32,
    ) -> Result<(), DeviceError> {
        let next = self.check(Op::Configure)?;
        let handle = Arc::clone(self.handle()?);
        let path = handle.path().display().to_string();

        let caps = handle
            .query_caps()
            .map_err(|source| ConfigError::Ioctl {
                op: "VIDIOC_QUERYCAP",
                source,
            })?;
        info!(
            card = %caps.card,
            driver = %caps.driver,
            bus = %caps.bus,
            version = ?caps.version,
            "{} sensor capabilities",
            self.sensor
        );
        if !caps.can_capture() {
            return Err(ConfigError::NotCaptureDevice(path).into());
        }
        if !caps.can_stream() {
            return Err(ConfigError::NoStreaming(path).into());
        }

        reset_crop(&handle);
        self.log_formats(&handle);

        set_frame_rate(&handle, self.fps)?;
        select_input(&handle, 0)?;
        if self.crop {
            set_crop(&handle, width, height)?;
        }

        let requested = Format::new(width, height, self.sensor.fourcc());
        let format = handle
            .set_format(buffer::Type::VideoCapture, &requested)
            .map_err(|source| ConfigError::Ioctl {
                op: "VIDIOC_S_FMT",
                source,
            })?;
        if format.fourcc != requested.fourcc
            || format.width != requested.width
            || format.height != requested.height
        {
            warn!(%requested, negotiated = %format, "driver adjusted the {} format", self.sensor);
        }
        info!(%format, "{} format", self.sensor);

        let arena = allocate(&handle, buffer_count)?;
        self.arena = Some(arena);
        self.format = Some(format);
        self.state = next;
        Ok(())
    }

    fn log_formats(&self, handle: &Handle) {
        match handle.enum_formats(buffer::Type::VideoCapture) {
            Ok(formats) => {
                for fourcc in formats {
                    debug!(%fourcc, "{} sensor frame format", self.sensor);
                }
            }
            Err(e) => debug!("cannot enumerate formats: {}", e),
        }

        match handle.enum_framesizes(self.sensor.fourcc()) {
            Ok(sizes) => {
                for (width, height) in sizes {
                    debug!(width, height, "{} sensor frame size", self.sensor);
                }
            }
            Err(e) => debug!("cannot enumerate frame sizes: {}", e),
        }
    }

    /// Queues every buffer and turns streaming on
    pub fn start(&mut self) -> Result<(), DeviceError> {
        let next = self.check(Op::Start)?;
        let handle = Arc::clone(self.handle()?);

        self.arena_mut(Op::Start)?
            .queue_all(0)
            .map_err(|source| DeviceError::Io {
                op: "VIDIOC_QBUF",
                source,
            })?;
        stream_on(&handle, buffer::Type::VideoCapture).map_err(|source| DeviceError::Io {
            op: "VIDIOC_STREAMON",
            source,
        })?;

        info!("{} capture started", self.sensor);
        self.state = next;
        Ok(())
    }

    /// Turns streaming off, every buffer returns to the application
    pub fn stop(&mut self) -> Result<(), DeviceError> {
        let next = self.check(Op::Stop)?;
        let handle = Arc::clone(self.handle()?);

        stream_off(&handle, buffer::Type::VideoCapture).map_err(|source| DeviceError::Io {
            op: "VIDIOC_STREAMOFF",
            source,
        })?;
        self.arena_mut(Op::Stop)?.reclaim_all();

        info!("{} capture stopped", self.sensor);
        self.state = next;
        Ok(())
    }

    /// Waits for the next filled buffer
    ///
    /// A wait exceeding the configured timeout yields [`DeviceError::Timeout`], which callers
    /// treat as a reason to try again.
    pub fn dequeue(&mut self) -> Result<CaptureBuffer, DeviceError> {
        self.check(Op::Dequeue)?;
        let handle = Arc::clone(self.handle()?);

        let revents = handle
            .poll(libc::POLLIN, Some(self.timeout))
            .map_err(|source| DeviceError::Io { op: "poll", source })?;
        if revents == 0 {
            self.timeouts += 1;
            warn!(timeout = ?self.timeout, "{} capture wait timed out", self.sensor);
            return Err(DeviceError::Timeout(self.timeout));
        }

        let timeout = self.timeout;
        match self.arena_mut(Op::Dequeue)?.dequeue() {
            Ok((index, meta)) => {
                trace!(index, sequence = meta.sequence, bytes = meta.bytesused, "{} frame", self.sensor);
                Ok(CaptureBuffer { index, meta })
            }
            // spurious wakeup on a non-blocking node
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.timeouts += 1;
                Err(DeviceError::Timeout(timeout))
            }
            Err(source) => Err(DeviceError::Io {
                op: "VIDIOC_DQBUF",
                source,
            }),
        }
    }

    /// Payload of a dequeued buffer
    ///
    /// Limited to the bytes the driver reported as used. Empty if the pool has been released
    /// in the meantime.
    pub fn data(&self, buf: &CaptureBuffer) -> &[u8] {
        let data = self
            .arena
            .as_ref()
            .and_then(|arena| arena.get(buf.index))
            .unwrap_or(&[]);
        let used = match buf.meta.bytesused as usize {
            0 => data.len(),
            n => n.min(data.len()),
        };
        &data[..used]
    }

    /// Hands a dequeued buffer back to the driver
    pub fn enqueue(&mut self, buf: CaptureBuffer) -> Result<(), DeviceError> {
        self.check(Op::Enqueue)?;
        self.arena_mut(Op::Enqueue)?
            .queue(buf.index, 0)
            .map_err(|source| DeviceError::Io {
                op: "VIDIOC_QBUF",
                source,
            })
    }

    /// Unmaps and frees the buffer pool
    pub fn uninit(&mut self) -> Result<(), DeviceError> {
        let next = self.check(Op::Uninit)?;

        if let Some(mut arena) = self.arena.take() {
            arena.release().map_err(|source| DeviceError::Io {
                op: "VIDIOC_REQBUFS",
                source,
            })?;
        }
        self.format = None;

        debug!("{} buffers released", self.sensor);
        self.state = next;
        Ok(())
    }

    /// Releases the node handle
    ///
    /// The descriptor is closed once every [`Controls`] handed out is gone as well.
    pub fn close(&mut self) -> Result<(), DeviceError> {
        let next = self.check(Op::Close)?;
        self.handle = None;

        info!("{} capture device closed", self.sensor);
        self.state = next;
        Ok(())
    }

    /// Sets an integer control on the sensor
    pub fn set_control(&self, control: Control) -> Result<(), DeviceError> {
        debug!(%control, "{} control", self.sensor);
        self.handle()?
            .set_control(control)
            .map_err(|source| DeviceError::Io {
                op: "VIDIOC_S_CTRL",
                source,
            })
    }

    /// Switches the RGB sensor to manual exposure, the depth sensor has no such control
    pub fn set_manual_exposure(&self) -> Result<(), DeviceError> {
        match self.sensor {
            Sensor::Rgb => self.set_control(Control::exposure_mode(ExposureMode::Manual)),
            Sensor::Depth => Ok(()),
        }
    }

    /// Control-set capability usable from other threads while this device streams
    pub fn controls(&self) -> Result<Controls, DeviceError> {
        Ok(Controls::new(Arc::clone(self.handle()?)))
    }
}

impl Drop for CaptureDevice {
    fn drop(&mut self) {
        if self.state == State::Streaming {
            if let Err(e) = self.stop() {
                warn!("{} teardown: {}", self.sensor, e);
            }
        }
        // the arena unmaps and frees the remaining buffers on drop
    }
}

fn allocate(handle: &Arc<Handle>, count: u32) -> Result<Arena, ConfigError> {
    let mut arena = Arena::new(Arc::clone(handle), buffer::Type::VideoCapture);

    let granted = arena
        .request(count)
        .map_err(|source| ConfigError::Ioctl {
            op: "VIDIOC_REQBUFS",
            source,
        })?;
    if granted < 2 {
        // best effort, the pool is unusable either way
        let _ = arena.request(0);
        return Err(ConfigError::InsufficientBuffers { granted });
    }

    for index in 0..granted {
        arena
            .map_next()
            .map_err(|source| ConfigError::Map { index, source })?;
        if let Some(data) = arena.get_mut(index as usize) {
            data.fill(0xFF);
        }
    }

    debug!(granted, "capture buffers mapped");
    Ok(arena)
}

fn reset_crop(handle: &Handle) {
    let mut cropcap = v4l2_cropcap {
        type_: buffer::Type::VideoCapture as u32,
        ..unsafe { mem::zeroed() }
    };
    let ret = unsafe {
        v4l2::ioctl(
            handle.fd(),
            v4l2::vidioc::VIDIOC_CROPCAP,
            &mut cropcap as *mut _ as *mut std::os::raw::c_void,
        )
    };
    if let Err(e) = ret {
        debug!("VIDIOC_CROPCAP: {}", e);
        return;
    }

    let mut crop = v4l2_crop {
        type_: buffer::Type::VideoCapture as u32,
        c: cropcap.defrect,
    };
    // cropping is optional
    if let Err(e) = unsafe {
        v4l2::ioctl(
            handle.fd(),
            v4l2::vidioc::VIDIOC_S_CROP,
            &mut crop as *mut _ as *mut std::os::raw::c_void,
        )
    } {
        debug!("VIDIOC_S_CROP (default rect): {}", e);
    }
}

fn set_frame_rate(handle: &Handle, fps: u32) -> Result<(), ConfigError> {
    let mut v4l2_params = v4l2_streamparm {
        type_: buffer::Type::VideoCapture as u32,
        parm: v4l2_streamparm__bindgen_ty_1 {
            capture: v4l2_captureparm {
                timeperframe: Fraction::new(1, fps).into(),
                capturemode: 0,
                ..unsafe { mem::zeroed() }
            },
        },
    };
    unsafe {
        v4l2::ioctl(
            handle.fd(),
            v4l2::vidioc::VIDIOC_S_PARM,
            &mut v4l2_params as *mut _ as *mut std::os::raw::c_void,
        )
    }
    .map_err(|source| ConfigError::Ioctl {
        op: "VIDIOC_S_PARM",
        source,
    })
}

fn select_input(handle: &Handle, input: std::os::raw::c_int) -> Result<(), ConfigError> {
    let mut input = input;
    unsafe {
        v4l2::ioctl(
            handle.fd(),
            v4l2::vidioc::VIDIOC_S_INPUT,
            &mut input as *mut _ as *mut std::os::raw::c_void,
        )
    }
    .map_err(|source| ConfigError::Ioctl {
        op: "VIDIOC_S_INPUT",
        source,
    })
}

fn set_crop(handle: &Handle, width: u32, height: u32) -> Result<(), ConfigError> {
    let mut crop = v4l2_crop {
        type_: buffer::Type::VideoCapture as u32,
        ..unsafe { mem::zeroed() }
    };
    unsafe {
        v4l2::ioctl(
            handle.fd(),
            v4l2::vidioc::VIDIOC_G_CROP,
            &mut crop as *mut _ as *mut std::os::raw::c_void,
        )
    }
    .map_err(|source| ConfigError::Ioctl {
        op: "VIDIOC_G_CROP",
        source,
    })?;

    crop.c = v4l2_rect {
        left: 0,
        top: 0,
        width,
        height,
    };
    unsafe {
        v4l2::ioctl(
            handle.fd(),
            v4l2::vidioc::VIDIOC_S_CROP,
            &mut crop as *mut _ as *mut std::os::raw::c_void,
        )
    }
    .map_err(|source| ConfigError::Ioctl {
        op: "VIDIOC_S_CROP",
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_a_missing_node_fails() {
        let err = CaptureDevice::open(Sensor::Rgb, "/nonexistent/video0")
            .err()
            .unwrap();
        match err {
            DeviceError::Open { path, source } => {
                assert_eq!(path, Path::new("/nonexistent/video0"));
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
