//! Session configuration.
//!
//! The defaults describe the reference board: an RGB camera on `/dev/video0`, a depth sensor
//! on `/dev/video1` and the UVC gadget function on `/dev/video2`.

use std::path::PathBuf;
use std::time::Duration;

use crate::capture::Sensor;
use crate::error::ConfigError;
use crate::format::{Format, FourCC};
use crate::uvc::FillMode;

/// Settings for one capture device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorConfig {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Number of driver buffers to request
    pub buffers: u32,
    /// Frames per second requested through S_PARM
    pub fps: u32,
    /// Apply an explicit crop rectangle of `width` x `height` at the origin
    pub crop: bool,
}

impl SensorConfig {
    /// Reference settings for a sensor
    pub fn for_sensor(sensor: Sensor) -> Self {
        match sensor {
            Sensor::Rgb => SensorConfig {
                path: PathBuf::from("/dev/video0"),
                width: 640,
                height: 480,
                buffers: 4,
                fps: 30,
                crop: true,
            },
            // nine 224x173 sub-frames stacked vertically
            Sensor::Depth => SensorConfig {
                path: PathBuf::from("/dev/video1"),
                width: 224,
                height: 173 * 9,
                buffers: 4,
                fps: 30,
                crop: true,
            },
        }
    }

    /// Upper bound for a single frame of this sensor
    pub fn frame_size(&self, sensor: Sensor) -> usize {
        sensor.fourcc().frame_size(self.width, self.height)
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "{} resolution {}x{} is empty",
                name, self.width, self.height
            )));
        }
        if self.buffers < 2 {
            return Err(ConfigError::Invalid(format!(
                "{} needs at least 2 buffers, got {}",
                name, self.buffers
            )));
        }
        if self.fps == 0 {
            return Err(ConfigError::Invalid(format!("{} frame rate is zero", name)));
        }
        Ok(())
    }
}

/// USB bus speed the gadget enumerated at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbSpeed {
    Full,
    High,
    Super,
}

/// Streaming endpoint type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Bulk,
    Isochronous,
}

impl UsbSpeed {
    /// Maximum packet size of the streaming endpoint
    pub fn max_packet(self, transport: Transport) -> u32 {
        match (self, transport) {
            (UsbSpeed::Full, Transport::Bulk) => 64,
            (UsbSpeed::Full, Transport::Isochronous) => 1023,
            (UsbSpeed::High, Transport::Bulk) => 512,
            (UsbSpeed::High, Transport::Isochronous) => 1024,
            (UsbSpeed::Super, _) => 1024,
        }
    }
}

/// Settings for the UVC gadget function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GadgetConfig {
    pub path: PathBuf,
    /// Output frame width, kept across commits
    pub width: u32,
    /// Output frame height, kept across commits
    pub height: u32,
    /// Number of output buffers handed to the USB side
    pub buffers: u32,
    pub transport: Transport,
    pub speed: UsbSpeed,
    /// Additional transactions per microframe (isochronous, 0..=2)
    pub mult: u32,
    /// Burst length (SuperSpeed, 0..=15)
    pub burst: u32,
    /// Bound on a single `process` wait
    pub timeout: Duration,
    /// Which payload of a merged frame is streamed
    pub fill_mode: FillMode,
}

impl Default for GadgetConfig {
    fn default() -> Self {
        GadgetConfig {
            path: PathBuf::from("/dev/video2"),
            width: 640,
            height: 480,
            buffers: 2,
            transport: Transport::Bulk,
            speed: UsbSpeed::Super,
            mult: 0,
            burst: 0,
            timeout: Duration::from_secs(2),
            fill_mode: FillMode::Rgb,
        }
    }
}

impl GadgetConfig {
    /// Maximum packet size for the configured speed and transport
    pub fn max_packet(&self) -> u32 {
        self.speed.max_packet(self.transport)
    }

    /// Output format for frames of pixel format `fourcc`
    pub fn output_format(&self, fourcc: FourCC) -> Format {
        Format::new(self.width, self.height, fourcc)
    }
}

/// Everything a [`Session`](crate::Session) needs to know up front
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub rgb: SensorConfig,
    pub depth: SensorConfig,
    pub gadget: GadgetConfig,
    /// Number of merged frames buffered between the depth thread and the gadget
    pub ring_capacity: usize,
    /// Bound on a single capture dequeue wait
    pub capture_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            rgb: SensorConfig::for_sensor(Sensor::Rgb),
            depth: SensorConfig::for_sensor(Sensor::Depth),
            gadget: GadgetConfig::default(),
            ring_capacity: 4,
            capture_timeout: Duration::from_secs(2),
        }
    }
}

impl SessionConfig {
    /// Checks the settings for consistency
    ///
    /// The ring has to hold at least one merged frame per gadget buffer, otherwise priming the
    /// USB queue on stream start already drains it and the host sees repeated frames.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rgb.validate("rgb")?;
        self.depth.validate("depth")?;

        if self.ring_capacity < 2 || !self.ring_capacity.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "ring capacity {} is not a power of two >= 2",
                self.ring_capacity
            )));
        }
        if self.gadget.buffers < 2 {
            return Err(ConfigError::Invalid(format!(
                "gadget needs at least 2 buffers, got {}",
                self.gadget.buffers
            )));
        }
        if self.ring_capacity < self.gadget.buffers as usize {
            return Err(ConfigError::Invalid(format!(
                "ring capacity {} is smaller than the {} gadget buffers",
                self.ring_capacity, self.gadget.buffers
            )));
        }
        self.validate_output()?;
        if self.gadget.mult > 2 {
            return Err(ConfigError::Invalid(format!(
                "mult {} out of range 0..=2",
                self.gadget.mult
            )));
        }
        if self.gadget.burst > 15 {
            return Err(ConfigError::Invalid(format!(
                "burst {} out of range 0..=15",
                self.gadget.burst
            )));
        }
        if self.capture_timeout.is_zero() || self.gadget.timeout.is_zero() {
            return Err(ConfigError::Invalid("zero wait timeout".to_string()));
        }

        Ok(())
    }

    /// The streamed payload has to fill the output frame exactly, a shorter one would leave
    /// the tail of every USB frame without image data
    fn validate_output(&self) -> Result<(), ConfigError> {
        let output = self.gadget.output_format(FourCC::YUYV).frame_size();
        let payload = match self.gadget.fill_mode {
            FillMode::Rgb => self.rgb.frame_size(Sensor::Rgb),
            FillMode::Depth => self.depth.frame_size(Sensor::Depth),
        };

        if self.gadget.fill_mode == FillMode::Rgb
            && (self.gadget.width, self.gadget.height) != (self.rgb.width, self.rgb.height)
        {
            return Err(ConfigError::Invalid(format!(
                "output {}x{} does not match the rgb capture {}x{}",
                self.gadget.width, self.gadget.height, self.rgb.width, self.rgb.height
            )));
        }
        if payload > output {
            return Err(ConfigError::Invalid(format!(
                "{} byte payload does not fit the {} byte output frame",
                payload, output
            )));
        }
        Ok(())
    }
}
