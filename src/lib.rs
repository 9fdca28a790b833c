//! RGB-D capture exposed as a USB webcam.
//!
//! An RGB camera and a depth sensor are captured through video4linux, paired frame by frame
//! and streamed to a USB host through the UVC gadget function of the kernel.
//!
//! ```no_run
//! use rgbd_uvc::{Session, SessionConfig};
//!
//! let mut session = Session::init(SessionConfig::default()).expect("session");
//! session.register_callback(|frame| println!("depth frame {}", frame.sequence));
//! loop {
//!     session.run_once().expect("capture");
//! }
//! ```

pub mod v4l2;

pub mod device;

mod capability;
pub use capability::Capabilities;

pub mod buffer;
pub mod memory;

mod timestamp;
pub use timestamp::Timestamp;

mod fraction;
pub use fraction::Fraction;

pub mod control;
pub use control::Control;

pub mod format;
pub use format::{Format, FourCC};

pub mod io;

pub mod capture;
pub use capture::{CaptureDevice, Sensor};

pub mod uvc;
pub use uvc::UvcGadget;

pub mod pipeline;

pub mod config;
pub use config::{GadgetConfig, SensorConfig, SessionConfig};

pub mod error;
pub use error::{ConfigError, DeviceError, Error, GadgetError};

pub mod session;
pub use session::{Session, SessionStats};
