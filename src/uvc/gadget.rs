use std::sync::Arc;
use std::{io, mem};

use tracing::{debug, error, info, trace, warn};
use v4l2_sys::*;

use crate::buffer;
use crate::config::GadgetConfig;
use crate::control::Control;
use crate::device::{Controls, Handle};
use crate::error::GadgetError;
use crate::format::Format;
use crate::io::{stream_off, stream_on, Arena};
use crate::uvc::dispatch::{Dispatcher, Step};
use crate::uvc::event::Event;
use crate::uvc::format::{Endpoint, Selection, FORMATS};
use crate::uvc::request::{RequestHandler, Response};
use crate::uvc::sys::*;
use crate::v4l2;

/// Which payload of a merged frame is streamed to the host
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    #[default]
    Rgb,
    Depth,
}

/// Supplies frame data for output buffers
pub trait FrameSource {
    /// Fills `dst` with the next frame
    ///
    /// Returns `false` if no new frame was available. `dst` is left untouched in that case,
    /// so the host receives the previous contents again.
    fn fill(&mut self, mode: FillMode, dst: &mut [u8]) -> bool;
}

/// Applies host-side control changes to the sensor
pub trait ControlSink {
    fn apply(&mut self, control: Control) -> io::Result<()>;
}

impl ControlSink for Controls {
    fn apply(&mut self, control: Control) -> io::Result<()> {
        self.set(control)
    }
}

/// Result of a single [`UvcGadget::process`] round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    /// Nothing happened within the configured wait
    Timeout,
    Ready {
        /// A control event was handled
        event: bool,
        /// An output buffer was refilled
        buffer: bool,
    },
}

/// Gadget counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GadgetStats {
    pub queued: u64,
    pub dequeued: u64,
    pub timeouts: u64,
    pub events: u64,
    pub stalls: u64,
    /// Buffers filled with a frame that had not been sent before
    pub fresh: u64,
    /// Buffers re-sent with their previous contents
    pub repeated: u64,
}

/// The UVC function's video output node
///
/// Answers the host's control requests and feeds the output queue from a [`FrameSource`].
pub struct UvcGadget {
    handle: Arc<Handle>,
    config: GadgetConfig,
    dispatcher: Dispatcher,
    arena: Option<Arena>,
    source: Option<Box<dyn FrameSource + Send>>,
    controls: Option<Box<dyn ControlSink + Send>>,

    format: Format,

    stats: GadgetStats,
}

impl UvcGadget {
    /// Opens the gadget node and checks that it accepts video output
    pub fn open(config: &GadgetConfig) -> Result<Self, GadgetError> {
        let handle = Handle::open(&config.path, libc::O_RDWR | libc::O_NONBLOCK).map_err(
            |source| GadgetError::Open {
                path: config.path.clone(),
                source,
            },
        )?;

        let caps = handle.query_caps().map_err(|source| GadgetError::Io {
            op: "VIDIOC_QUERYCAP",
            source,
        })?;
        if !caps.can_output() {
            return Err(GadgetError::NotOutputDevice(
                config.path.display().to_string(),
            ));
        }
        info!(card = %caps.card, bus = %caps.bus, "uvc device opened");

        Ok(UvcGadget {
            handle: Arc::new(handle),
            config: config.clone(),
            dispatcher: Dispatcher::new(Endpoint::new(config)),
            arena: None,
            source: None,
            controls: None,
            format: config.output_format(FORMATS[0].fourcc),
            stats: GadgetStats::default(),
        })
    }

    /// Subscribes to the UVC events and pushes the initial output format
    ///
    /// # Arguments
    ///
    /// * `source` - Frame supplier consulted for every output buffer
    /// * `controls` - Receives brightness and contrast changes made by the host
    pub fn init(
        &mut self,
        source: Box<dyn FrameSource + Send>,
        controls: Option<Box<dyn ControlSink + Send>>,
    ) -> Result<(), GadgetError> {
        for typ in [
            UVC_EVENT_CONNECT,
            UVC_EVENT_DISCONNECT,
            UVC_EVENT_SETUP,
            UVC_EVENT_DATA,
            UVC_EVENT_STREAMON,
            UVC_EVENT_STREAMOFF,
        ] {
            self.subscribe(typ, v4l2::vidioc::VIDIOC_SUBSCRIBE_EVENT)
                .map_err(|source| GadgetError::Io {
                    op: "VIDIOC_SUBSCRIBE_EVENT",
                    source,
                })?;
        }

        self.format = self
            .handle
            .set_format(buffer::Type::VideoOutput, &self.format)
            .map_err(|source| GadgetError::Io {
                op: "VIDIOC_S_FMT",
                source,
            })?;
        info!(format = %self.format, "uvc output format");

        self.source = Some(source);
        self.controls = controls;
        Ok(())
    }

    fn subscribe(&self, typ: u32, request: v4l2::vidioc::_IOC_TYPE) -> io::Result<()> {
        let mut sub = v4l2_event_subscription {
            type_: typ,
            ..unsafe { mem::zeroed() }
        };
        unsafe {
            v4l2::ioctl(
                self.handle.fd(),
                request,
                &mut sub as *mut _ as *mut std::os::raw::c_void,
            )
        }
    }

    /// Waits for and services gadget activity
    ///
    /// Control events are answered and, while streaming, a drained output buffer is refilled.
    /// The wait is bounded by the configured timeout; [`Processed::Timeout`] is not an error.
    pub fn process(&mut self) -> Result<Processed, GadgetError> {
        if self.source.is_none() {
            return Err(GadgetError::NotInitialized);
        }

        // an idle output queue reports POLLERR/POLLOUT right away, only ask once streaming
        let mut events = libc::POLLPRI;
        if self.dispatcher.is_streaming() {
            events |= libc::POLLOUT;
        }

        let revents = self
            .handle
            .poll(events, Some(self.config.timeout))
            .map_err(|source| GadgetError::Io { op: "poll", source })?;
        if revents == 0 {
            self.stats.timeouts += 1;
            warn!(timeout = ?self.config.timeout, "uvc wait timed out");
            return Ok(Processed::Timeout);
        }

        let event = if revents & libc::POLLPRI != 0 {
            self.handle_event()?
        } else {
            false
        };
        let buffer = if revents & libc::POLLOUT != 0 && self.dispatcher.is_streaming() {
            self.refill()?
        } else {
            false
        };

        Ok(Processed::Ready { event, buffer })
    }

    fn handle_event(&mut self) -> Result<bool, GadgetError> {
        let mut v4l2_event: v4l2_event = unsafe { mem::zeroed() };
        let ret = unsafe {
            v4l2::ioctl(
                self.handle.fd(),
                v4l2::vidioc::VIDIOC_DQEVENT,
                &mut v4l2_event as *mut _ as *mut std::os::raw::c_void,
            )
        };
        if let Err(e) = ret {
            warn!("VIDIOC_DQEVENT failed: {}", e);
            return Ok(false);
        }

        let payload = unsafe { v4l2_event.u.data };
        let event = Event::parse(v4l2_event.type_, &payload);
        self.stats.events += 1;
        trace!(%event, "uvc event");

        for step in self.dispatcher.handle(&event) {
            match step {
                Step::Respond(response) => self.send_response(&response),
                Step::Forward(control) => self.forward(control),
                Step::SetFormat(selection) => self.set_format(&selection),
                Step::StreamOn => self.start_streaming()?,
                Step::StreamOff => self.stop_streaming()?,
            }
        }

        Ok(true)
    }

    fn send_response(&mut self, response: &Response) {
        if response.is_stall() {
            self.stats.stalls += 1;
        }

        let mut resp = uvc_request_data::from(response);
        let ret = unsafe {
            v4l2::ioctl(
                self.handle.fd(),
                v4l2::vidioc::UVCIOC_SEND_RESPONSE,
                &mut resp as *mut _ as *mut std::os::raw::c_void,
            )
        };
        if let Err(e) = ret {
            warn!("UVCIOC_SEND_RESPONSE failed: {}", e);
        }
    }

    fn forward(&mut self, control: Control) {
        match self.controls.as_mut() {
            Some(sink) => {
                if let Err(e) = sink.apply(control) {
                    warn!(%control, "unable to apply control: {}", e);
                }
            }
            None => debug!(%control, "no control sink, dropping"),
        }
    }

    /// Follows a commit, keeping the configured output size
    ///
    /// Frames come from the RGB camera at a fixed resolution, whatever descriptor the host
    /// picked only changes the advertised interval and pixel format.
    fn set_format(&mut self, selection: &Selection) {
        let requested = self.config.output_format(selection.fourcc);
        if (selection.width, selection.height) != (requested.width, requested.height) {
            debug!(
                width = selection.width,
                height = selection.height,
                output = %requested,
                "committed frame differs from the output size"
            );
        }

        match self
            .handle
            .set_format(buffer::Type::VideoOutput, &requested)
        {
            Ok(format) => self.format = format,
            Err(e) => {
                error!(format = %requested, "unable to set output format: {}", e);
                self.format = requested;
            }
        }
        info!(format = %self.format, interval = selection.interval, "host committed");
    }

    /// Allocates, pre-fills and queues the output buffers, then starts the stream
    fn start_streaming(&mut self) -> Result<(), GadgetError> {
        if self.dispatcher.is_streaming() {
            self.stop_streaming()?;
        }

        let mut arena = Arena::new(Arc::clone(&self.handle), buffer::Type::VideoOutput);
        let granted = arena
            .allocate(self.config.buffers)
            .map_err(|source| GadgetError::Io {
                op: "VIDIOC_REQBUFS",
                source,
            })?;
        if granted < 2 {
            return Err(GadgetError::InsufficientBuffers { granted });
        }

        let imgsize = self.format.frame_size();
        for index in 0..arena.len() {
            if let Some(dst) = arena.get_mut(index) {
                let len = imgsize.min(dst.len());
                fill(&mut self.source, &mut self.stats, self.config.fill_mode, &mut dst[..len]);
            }
            let bytesused = arena.get(index).map_or(0, |buf| imgsize.min(buf.len()));
            arena
                .queue(index, bytesused as u32)
                .map_err(|source| GadgetError::Io {
                    op: "VIDIOC_QBUF",
                    source,
                })?;
            self.stats.queued += 1;
        }

        stream_on(&self.handle, buffer::Type::VideoOutput).map_err(|source| GadgetError::Io {
            op: "VIDIOC_STREAMON",
            source,
        })?;

        info!(buffers = granted, imgsize, "uvc stream started");
        self.arena = Some(arena);
        self.dispatcher.started();
        Ok(())
    }

    /// Stops the stream and releases the output buffers, a no-op when not streaming
    fn stop_streaming(&mut self) -> Result<(), GadgetError> {
        if !self.dispatcher.is_streaming() {
            return Ok(());
        }

        stream_off(&self.handle, buffer::Type::VideoOutput).map_err(|source| {
            GadgetError::Io {
                op: "VIDIOC_STREAMOFF",
                source,
            }
        })?;
        if let Some(mut arena) = self.arena.take() {
            arena.release().map_err(|source| GadgetError::Io {
                op: "VIDIOC_REQBUFS",
                source,
            })?;
        }

        info!("uvc stream stopped");
        self.dispatcher.stopped();
        Ok(())
    }

    fn refill(&mut self) -> Result<bool, GadgetError> {
        let arena = match self.arena.as_mut() {
            Some(arena) => arena,
            None => return Ok(false),
        };

        let index = match arena.dequeue() {
            Ok((index, _)) => index,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(source) => {
                return Err(GadgetError::Io {
                    op: "VIDIOC_DQBUF",
                    source,
                })
            }
        };
        self.stats.dequeued += 1;

        let imgsize = self.format.frame_size();
        let mut bytesused = 0;
        if let Some(dst) = arena.get_mut(index) {
            bytesused = imgsize.min(dst.len());
            fill(&mut self.source, &mut self.stats, self.config.fill_mode, &mut dst[..bytesused]);
        }

        arena
            .queue(index, bytesused as u32)
            .map_err(|source| GadgetError::Io {
                op: "VIDIOC_QBUF",
                source,
            })?;
        self.stats.queued += 1;
        trace!(index, bytesused, "output buffer requeued");

        Ok(true)
    }

    /// Tears down streaming and drops the event subscriptions
    pub fn close(mut self) -> Result<(), GadgetError> {
        self.stop_streaming()?;

        // V4L2_EVENT_ALL
        if let Err(e) = self.subscribe(0, v4l2::vidioc::VIDIOC_UNSUBSCRIBE_EVENT) {
            debug!("VIDIOC_UNSUBSCRIBE_EVENT: {}", e);
        }
        info!("uvc device closed");
        Ok(())
    }

    /// Whether the host signalled a disconnect since the stream was last started
    pub fn shutdown_requested(&self) -> bool {
        self.dispatcher.shutdown_requested()
    }

    pub fn is_streaming(&self) -> bool {
        self.dispatcher.is_streaming()
    }

    /// Active output format
    pub fn format(&self) -> Format {
        self.format
    }

    /// Negotiation state
    pub fn requests(&self) -> &RequestHandler {
        self.dispatcher.requests()
    }

    pub fn stats(&self) -> GadgetStats {
        self.stats
    }
}

impl Drop for UvcGadget {
    fn drop(&mut self) {
        if let Err(e) = self.stop_streaming() {
            warn!("uvc teardown: {}", e);
        }
    }
}

fn fill(
    source: &mut Option<Box<dyn FrameSource + Send>>,
    stats: &mut GadgetStats,
    mode: FillMode,
    dst: &mut [u8],
) {
    let fresh = source
        .as_mut()
        .map_or(false, |source| source.fill(mode, dst));
    if fresh {
        stats.fresh += 1;
    } else {
        stats.repeated += 1;
    }
}
