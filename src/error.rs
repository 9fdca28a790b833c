use std::{io, path::PathBuf, time::Duration};

use crate::capture::State;

/// Errors raised while negotiating a device into a streamable state.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not a video capture device")]
    NotCaptureDevice(String),
    #[error("{0} does not support streaming i/o")]
    NoStreaming(String),
    #[error("insufficient buffer memory: {granted} granted, at least 2 required")]
    InsufficientBuffers { granted: u32 },
    #[error("unable to map buffer {index}: {source}")]
    Map {
        index: u32,
        #[source]
        source: io::Error,
    },
    #[error("{op} failed: {source}")]
    Ioctl {
        op: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Capture device errors.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{op} is not allowed while the device is {state}")]
    InvalidState { op: &'static str, state: State },
    #[error("no frame within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

impl DeviceError {
    /// A bounded wait expired, the caller should simply try again
    pub fn is_timeout(&self) -> bool {
        matches!(self, DeviceError::Timeout(_))
    }
}

/// UVC gadget errors.
///
/// Host protocol errors never show up here, they are answered with a stall.
#[derive(Debug, thiserror::Error)]
pub enum GadgetError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0} is not a video output device")]
    NotOutputDevice(String),
    #[error("gadget has not been initialized")]
    NotInitialized,
    #[error("insufficient buffer memory: {granted} granted, at least 2 required")]
    InsufficientBuffers { granted: u32 },
    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Fatal session errors, one variant per failing setup stage.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(#[source] ConfigError),
    #[error("unable to open RGB camera: {0}")]
    OpenRgb(#[source] DeviceError),
    #[error("unable to open depth sensor: {0}")]
    OpenDepth(#[source] DeviceError),
    #[error("unable to open UVC gadget: {0}")]
    OpenUvc(#[source] GadgetError),
    #[error("unable to create RGB capture thread: {0}")]
    SpawnRgbThread(#[source] io::Error),
    #[error("unable to create UVC gadget thread: {0}")]
    SpawnUvcThread(#[source] io::Error),
    #[error("unable to initialize RGB camera: {0}")]
    InitRgb(#[source] DeviceError),
    #[error("unable to initialize depth sensor: {0}")]
    InitDepth(#[source] DeviceError),
    #[error("unable to initialize UVC gadget: {0}")]
    InitUvc(#[source] GadgetError),
    #[error("capture failed: {0}")]
    Capture(#[source] DeviceError),
    #[error("uvc gadget failed: {0}")]
    Gadget(#[source] GadgetError),
    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}

impl Error {
    /// Stable numeric code of the failing stage, used as the process exit status
    pub fn code(&self) -> i32 {
        match self {
            Error::OpenRgb(_) => -1000,
            Error::OpenDepth(_) => -1001,
            Error::OpenUvc(_) => -1002,
            Error::SpawnRgbThread(_) => -1005,
            Error::SpawnUvcThread(_) => -1007,
            Error::InitDepth(_) => -1008,
            Error::InitRgb(_) => -1009,
            Error::InitUvc(_) => -1010,
            Error::Config(_) => -1011,
            Error::Capture(_) => -1012,
            Error::ThreadPanicked(_) => -1013,
            Error::Gadget(_) => -1014,
        }
    }
}
