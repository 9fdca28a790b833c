//! Capture orchestration.
//!
//! A [`Session`] owns both sensors and the gadget. The RGB camera is drained by its own thread
//! into an [`RgbHistory`], the gadget runs its event loop on another one, and the thread
//! calling [`Session::run_once`] pairs every depth frame with the newest RGB frame and hands
//! the result to the gadget through a [`FrameRing`].

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, error, info, trace, warn};

use crate::buffer::Metadata;
use crate::capture::{CaptureBuffer, CaptureDevice, CaptureStats, Sensor, State};
use crate::config::{SensorConfig, SessionConfig};
use crate::device::Controls;
use crate::error::{DeviceError, Error, GadgetError};
use crate::pipeline::{Consumer, FrameRing, MergedFrame, Producer, RgbHistory, RingStats};
use crate::uvc::{FillMode, FrameSource, GadgetStats, UvcGadget};

/// Serves merged frames from the ring to the gadget
pub struct RingSource {
    consumer: Consumer,
}

impl RingSource {
    pub fn new(consumer: Consumer) -> Self {
        RingSource { consumer }
    }
}

impl FrameSource for RingSource {
    fn fill(&mut self, mode: FillMode, dst: &mut [u8]) -> bool {
        self.consumer.try_pop(|frame| {
            let src = frame.payload(mode);
            let len = src.len().min(dst.len());
            dst[..len].copy_from_slice(&src[..len]);
            dst[len..].fill(0);
        })
    }
}

/// Session counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub depth: CaptureStats,
    /// RGB frames captured so far
    pub rgb_frames: u64,
    /// Depth frames paired with an RGB frame
    pub merged: u64,
    /// Depth frames discarded because no RGB frame had arrived yet
    pub missing_rgb: u64,
    pub ring: RingStats,
    pub gadget: GadgetStats,
}

#[derive(Default)]
struct Shared {
    shutdown_requested: AtomicBool,
    gadget: Mutex<GadgetStats>,
    rgb_frames: AtomicU64,
}

impl Shared {
    fn gadget_stats(&self) -> GadgetStats {
        *self
            .gadget
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_gadget_stats(&self, stats: GadgetStats) {
        *self
            .gadget
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = stats;
    }
}

/// A background thread with a cooperative stop flag
///
/// Dropping the worker stops and joins it.
struct Worker {
    name: &'static str,
    done: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<(), Error>>>,
}

impl Worker {
    fn spawn<F>(name: &'static str, f: F) -> io::Result<Self>
    where
        F: FnOnce(Arc<AtomicBool>) -> Result<(), Error> + Send + 'static,
    {
        let done = Arc::new(AtomicBool::new(false));
        let thread = thread::Builder::new().name(format!("{}-worker", name)).spawn({
            let done = Arc::clone(&done);
            move || f(done)
        })?;

        Ok(Worker {
            name,
            done,
            thread: Some(thread),
        })
    }

    fn is_finished(&self) -> bool {
        self.thread
            .as_ref()
            .map_or(false, |thread| thread.is_finished())
    }

    /// Raises the stop flag and waits for the thread to exit
    fn join(&mut self) -> Result<(), Error> {
        self.done.store(true, Ordering::Release);
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| Error::ThreadPanicked(self.name))?,
            None => Ok(()),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Err(e) = self.join() {
            warn!("{} worker: {}", self.name, e);
        }
    }
}

/// Waits for a freshly spawned worker to report whether its device came up
fn await_ready<E>(worker: &mut Worker, ready: &Receiver<Result<(), E>>) -> Result<Result<(), E>, Error> {
    match ready.recv() {
        Ok(result) => Ok(result),
        // the thread went away without reporting
        Err(_) => {
            worker.join()?;
            Err(Error::ThreadPanicked(worker.name))
        }
    }
}

/// Pairs a depth frame with the newest RGB frame
///
/// Returns `false` if no RGB frame has been captured yet.
fn merge(history: &RgbHistory, depth: &[u8], meta: &Metadata, frame: &mut MergedFrame) -> bool {
    let found = history
        .latest(|rgb, timestamp| {
            frame.set_rgb(rgb);
            frame.rgb_timestamp = timestamp;
        })
        .is_some();
    if !found {
        return false;
    }

    frame.set_depth(depth);
    frame.depth_timestamp = meta.timestamp;
    frame.sequence = meta.sequence;
    true
}

type Callback = Box<dyn FnMut(&MergedFrame) + Send>;

/// What became of a depth frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pairing {
    /// Merged into the next ring slot
    Pushed,
    /// Merged, but the ring was full
    Dropped,
    /// No RGB frame to pair with yet
    MissingRgb,
}

/// Pairs a depth frame with the newest RGB frame, merging straight into the next ring slot
///
/// The callback sees every merged frame. `scratch` is only written when the ring is full and
/// a callback is registered.
fn pair(
    history: &RgbHistory,
    depth: &[u8],
    meta: &Metadata,
    producer: &mut Producer,
    scratch: &mut MergedFrame,
    callback: &mut Option<Callback>,
) -> Pairing {
    // the history never empties again once written
    if history.written() == 0 {
        return Pairing::MissingRgb;
    }

    let pushed = producer.try_push(|slot| {
        merge(history, depth, meta, slot);
        if let Some(callback) = callback.as_mut() {
            callback(slot);
        }
    });
    if pushed {
        return Pairing::Pushed;
    }

    if let Some(callback) = callback.as_mut() {
        if merge(history, depth, meta, scratch) {
            callback(scratch);
        }
    }
    Pairing::Dropped
}

/// Walks a capture device back to closed from whatever state it is in
fn shutdown(device: &mut CaptureDevice) {
    let sensor = device.sensor();
    if device.state() == State::Streaming {
        if let Err(e) = device.stop() {
            warn!(%sensor, "unable to stop: {}", e);
        }
    }
    if device.state() == State::Configured {
        if let Err(e) = device.uninit() {
            warn!(%sensor, "unable to release buffers: {}", e);
        }
    }
    if matches!(device.state(), State::Opened | State::Uninitialized) {
        if let Err(e) = device.close() {
            warn!(%sensor, "unable to close: {}", e);
        }
    }
}

fn rgb_worker(
    mut device: CaptureDevice,
    config: SensorConfig,
    history: Arc<RgbHistory>,
    shared: Arc<Shared>,
    done: Arc<AtomicBool>,
    ready: Sender<Result<(), DeviceError>>,
) -> Result<(), Error> {
    let setup = device
        .configure(config.width, config.height, config.buffers)
        .and_then(|_| device.start());
    let failed = setup.is_err();
    // the session only drops the receiver once it has stopped waiting
    let _ = ready.send(setup);
    if failed {
        shutdown(&mut device);
        return Ok(());
    }

    let result = loop {
        if done.load(Ordering::Acquire) {
            break Ok(());
        }

        let buf = match device.dequeue() {
            Ok(buf) => buf,
            Err(e) if e.is_timeout() => continue,
            Err(e) => break Err(e),
        };
        history.publish(device.data(&buf), buf.meta().timestamp);
        shared.rgb_frames.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = device.enqueue(buf) {
            break Err(e);
        }
    };

    if let Err(e) = &result {
        error!("rgb capture failed: {}", e);
    }
    debug!(stats = ?device.stats(), "rgb capture stopped");
    shutdown(&mut device);
    result.map_err(Error::Capture)
}

fn uvc_worker(
    mut gadget: UvcGadget,
    source: RingSource,
    controls: Controls,
    shared: Arc<Shared>,
    done: Arc<AtomicBool>,
    ready: Sender<Result<(), GadgetError>>,
) -> Result<(), Error> {
    let setup = gadget.init(Box::new(source), Some(Box::new(controls)));
    let failed = setup.is_err();
    let _ = ready.send(setup);
    if failed {
        return Ok(());
    }

    let result = loop {
        if done.load(Ordering::Acquire) {
            break Ok(());
        }

        if let Err(e) = gadget.process() {
            break Err(e);
        }
        shared
            .shutdown_requested
            .store(gadget.shutdown_requested(), Ordering::Release);
        shared.set_gadget_stats(gadget.stats());
    };

    if let Err(e) = &result {
        error!("uvc gadget failed: {}", e);
    }
    shared.set_gadget_stats(gadget.stats());
    if let Err(e) = gadget.close() {
        warn!("unable to close uvc gadget: {}", e);
    }
    result.map_err(Error::Gadget)
}

/// RGB-D capture session
///
/// Created with [`Session::init`], driven by [`Session::run_once`] or [`Session::run`] and
/// torn down by [`Session::uninit`] or on drop.
pub struct Session {
    depth: CaptureDevice,
    producer: Producer,
    history: Arc<RgbHistory>,
    scratch: MergedFrame,
    callback: Option<Callback>,

    rgb: Worker,
    uvc: Worker,
    shared: Arc<Shared>,

    merged: u64,
    missing_rgb: u64,
    closed: bool,
}

impl Session {
    /// Opens and configures all devices and starts the worker threads
    ///
    /// Every failure is fatal and reported with the stage it happened in, see
    /// [`Error::code`]. Anything brought up before the failure is torn down again.
    pub fn init(config: SessionConfig) -> Result<Self, Error> {
        config.validate().map_err(Error::Config)?;

        let rgb = CaptureDevice::open(Sensor::Rgb, &config.rgb.path)
            .map_err(Error::OpenRgb)?
            .fps(config.rgb.fps)
            .crop(config.rgb.crop)
            .timeout(config.capture_timeout);
        let mut depth = CaptureDevice::open(Sensor::Depth, &config.depth.path)
            .map_err(Error::OpenDepth)?
            .fps(config.depth.fps)
            .crop(config.depth.crop)
            .timeout(config.capture_timeout);
        let gadget = UvcGadget::open(&config.gadget).map_err(Error::OpenUvc)?;

        let rgb_size = config.rgb.frame_size(Sensor::Rgb);
        let depth_size = config.depth.frame_size(Sensor::Depth);
        let (producer, consumer) =
            FrameRing::with_capacity(config.ring_capacity, rgb_size, depth_size)
                .map_err(Error::Config)?;
        let history = Arc::new(RgbHistory::new(rgb_size));
        let shared = Arc::new(Shared::default());
        let controls = rgb.controls().map_err(Error::OpenRgb)?;

        let (ready_tx, ready_rx) = bounded(1);
        let mut rgb_thread = Worker::spawn("rgb", {
            let sensor = config.rgb.clone();
            let history = Arc::clone(&history);
            let shared = Arc::clone(&shared);
            move |done| rgb_worker(rgb, sensor, history, shared, done, ready_tx)
        })
        .map_err(Error::SpawnRgbThread)?;
        await_ready(&mut rgb_thread, &ready_rx)?.map_err(Error::InitRgb)?;

        depth
            .configure(config.depth.width, config.depth.height, config.depth.buffers)
            .map_err(Error::InitDepth)?;

        let (ready_tx, ready_rx) = bounded(1);
        let mut uvc_thread = Worker::spawn("uvc", {
            let shared = Arc::clone(&shared);
            let source = RingSource::new(consumer);
            move |done| uvc_worker(gadget, source, controls, shared, done, ready_tx)
        })
        .map_err(Error::SpawnUvcThread)?;
        await_ready(&mut uvc_thread, &ready_rx)?.map_err(Error::InitUvc)?;

        depth.start().map_err(Error::InitDepth)?;
        info!(
            ring = config.ring_capacity,
            gadget_buffers = config.gadget.buffers,
            "session started"
        );

        Ok(Session {
            depth,
            producer,
            history,
            scratch: MergedFrame::new(rgb_size, depth_size),
            callback: None,
            rgb: rgb_thread,
            uvc: uvc_thread,
            shared,
            merged: 0,
            missing_rgb: 0,
            closed: false,
        })
    }

    /// Registers a function called with every merged frame before it is queued for the host
    pub fn register_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&MergedFrame) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    /// Captures one depth frame and merges it with the newest RGB frame
    ///
    /// Returns whether a merged frame was produced. A capture wait that times out is not an
    /// error, neither is a full ring: the merged frame is dropped and counted.
    pub fn run_once(&mut self) -> Result<bool, Error> {
        self.check_workers()?;

        let buf: CaptureBuffer = match self.depth.dequeue() {
            Ok(buf) => buf,
            Err(e) if e.is_timeout() => return Ok(false),
            Err(e) => return Err(Error::Capture(e)),
        };

        let pairing = pair(
            &self.history,
            self.depth.data(&buf),
            buf.meta(),
            &mut self.producer,
            &mut self.scratch,
            &mut self.callback,
        );
        match pairing {
            Pairing::Pushed => self.merged += 1,
            Pairing::Dropped => {
                self.merged += 1;
                trace!(sequence = buf.meta().sequence, "ring full, dropping merged frame");
            }
            Pairing::MissingRgb => {
                self.missing_rgb += 1;
                trace!("no rgb frame yet, skipping depth frame");
            }
        }

        self.depth.enqueue(buf).map_err(Error::Capture)?;
        Ok(pairing != Pairing::MissingRgb)
    }

    /// Runs [`run_once`](Self::run_once) until `stop` is raised or a fatal error occurs
    pub fn run(&mut self, stop: &AtomicBool) -> Result<(), Error> {
        while !stop.load(Ordering::Acquire) {
            self.run_once()?;
        }
        Ok(())
    }

    /// Whether the host disconnected while the gadget was streaming
    pub fn shutdown_requested(&self) -> bool {
        self.shared.shutdown_requested.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            depth: self.depth.stats(),
            rgb_frames: self.shared.rgb_frames.load(Ordering::Relaxed),
            merged: self.merged,
            missing_rgb: self.missing_rgb,
            ring: self.producer.stats(),
            gadget: self.shared.gadget_stats(),
        }
    }

    /// Stops the worker threads and releases all devices
    ///
    /// Returns the first error a worker ended with. Calling it again is a no-op.
    pub fn uninit(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let uvc = self.uvc.join();
        let rgb = self.rgb.join();
        shutdown(&mut self.depth);

        info!(stats = ?self.stats(), "session stopped");
        rgb.and(uvc)
    }

    /// Surfaces the error of a worker that ended on its own
    fn check_workers(&mut self) -> Result<(), Error> {
        for worker in [&mut self.rgb, &mut self.uvc] {
            if worker.is_finished() {
                worker.join()?;
            }
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.uninit() {
            warn!("session teardown: {}", e);
        }
    }
}
