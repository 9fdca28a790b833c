use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use tracing::{error, info, warn};

use rgbd_uvc::config::{Transport, UsbSpeed};
use rgbd_uvc::uvc::FillMode;
use rgbd_uvc::{Error, Session, SessionConfig};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TransportArg {
    Bulk,
    Isoc,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SpeedArg {
    Full,
    High,
    Super,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FillArg {
    Rgb,
    Depth,
}

#[derive(Parser)]
#[command(name = "rgbd-uvc")]
#[command(about = "Stream an RGB camera and a depth sensor as a USB webcam")]
#[command(version)]
struct Cli {
    /// RGB camera node
    #[arg(long, default_value = "/dev/video0")]
    rgb: PathBuf,

    /// Depth sensor node
    #[arg(long, default_value = "/dev/video1")]
    depth: PathBuf,

    /// UVC gadget video output node
    #[arg(long, default_value = "/dev/video2")]
    uvc: PathBuf,

    /// RGB capture width
    #[arg(long, default_value = "640")]
    width: u32,

    /// RGB capture height
    #[arg(long, default_value = "480")]
    height: u32,

    /// Capture frame rate of both sensors
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Driver buffers per capture device
    #[arg(long, default_value = "4")]
    capture_buffers: u32,

    /// Output buffers of the gadget
    #[arg(long, default_value = "2")]
    uvc_buffers: u32,

    /// Merged frames buffered between capture and gadget
    #[arg(long, default_value = "4")]
    ring: usize,

    /// USB transfer type of the streaming endpoint
    #[arg(long, value_enum, default_value = "bulk")]
    transport: TransportArg,

    /// USB connection speed
    #[arg(long, value_enum, default_value = "super")]
    speed: SpeedArg,

    /// Isochronous transactions per microframe minus one
    #[arg(long, default_value = "0")]
    mult: u32,

    /// SuperSpeed burst size minus one
    #[arg(long, default_value = "0")]
    burst: u32,

    /// Which payload is streamed to the host
    #[arg(long, value_enum, default_value = "rgb")]
    fill: FillArg,

    /// Wait bound for capture and gadget events, in seconds
    #[arg(long, default_value = "2")]
    timeout: u64,

    /// Stop when the USB host disconnects
    #[arg(long)]
    exit_on_disconnect: bool,

    /// Increase log verbosity, repeatable. RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn config(&self) -> SessionConfig {
        let mut config = SessionConfig::default();
        let timeout = Duration::from_secs(self.timeout);

        config.rgb.path = self.rgb.clone();
        config.rgb.width = self.width;
        config.rgb.height = self.height;
        config.rgb.fps = self.fps;
        config.rgb.buffers = self.capture_buffers;

        config.depth.path = self.depth.clone();
        config.depth.fps = self.fps;
        config.depth.buffers = self.capture_buffers;

        config.gadget.path = self.uvc.clone();
        config.gadget.width = self.width;
        config.gadget.height = self.height;
        config.gadget.buffers = self.uvc_buffers;
        config.gadget.transport = match self.transport {
            TransportArg::Bulk => Transport::Bulk,
            TransportArg::Isoc => Transport::Isochronous,
        };
        config.gadget.speed = match self.speed {
            SpeedArg::Full => UsbSpeed::Full,
            SpeedArg::High => UsbSpeed::High,
            SpeedArg::Super => UsbSpeed::Super,
        };
        config.gadget.mult = self.mult;
        config.gadget.burst = self.burst;
        config.gadget.fill_mode = match self.fill {
            FillArg::Rgb => FillMode::Rgb,
            FillArg::Depth => FillMode::Depth,
        };
        config.gadget.timeout = timeout;

        config.ring_capacity = self.ring;
        config.capture_timeout = timeout;
        config
    }
}

fn init_logging(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback)),
        )
        .with_target(true)
        .with_thread_names(true)
        .init();
}

fn run(cli: &Cli, running: &AtomicBool) -> Result<(), Error> {
    let mut session = Session::init(cli.config())?;

    while running.load(Ordering::Acquire) {
        session.run_once()?;

        if cli.exit_on_disconnect && session.shutdown_requested() {
            info!("host disconnected, stopping");
            break;
        }
    }

    session.uninit()
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || r.store(false, Ordering::Release)) {
        warn!("unable to install signal handler: {}", e);
    }

    if let Err(e) = run(&cli, &running) {
        error!(code = e.code(), "{}", e);
        process::exit(e.code());
    }
}
