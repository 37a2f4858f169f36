//! cedar-venc - hardware encoder hand-off exerciser
//!
//! Feeds synthetic or raw-file frames through an encoder session on the
//! loopback device and writes the sequence header followed by every
//! packet to an optional output file.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cedar_venc::config::Config;
use cedar_venc::device::loopback::{LoopbackOptions, LoopbackPlatform};
use cedar_venc::frame::{Frame, PixelFormat};
use cedar_venc::{EncodeOutcome, Session};

/// Command-line arguments for cedar-venc
#[derive(Parser, Debug)]
#[command(name = "cedar-venc")]
#[command(version, about = "Cedar hardware H.264 encoder hand-off exerciser", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, env = "CEDAR_VENC_CONFIG", default_value = "cedar-venc.toml")]
    pub config: String,

    /// Write header and packets to this file
    #[arg(short, long)]
    pub output: Option<String>,

    /// Number of frames to encode (overrides the config file)
    #[arg(short, long)]
    pub frames: Option<u32>,

    /// Loopback: failed polls before each slot acquisition
    #[arg(long, default_value = "0")]
    pub busy_polls: u32,

    /// Loopback: bitstream polls answered empty after open
    #[arg(long, default_value = "0")]
    pub warmup: u32,

    /// Loopback: fail every Nth encode command
    #[arg(long)]
    pub fail_every: Option<u64>,

    /// Loopback: output ring size in bytes
    #[arg(long, default_value = "65536")]
    pub ring_capacity: usize,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format (json|pretty|compact)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,

    /// Write logs to file (in addition to stdout)
    #[arg(long)]
    pub log_file: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("════════════════════════════════════════════════════════");
    info!("  cedar-venc v{}", env!("CARGO_PKG_VERSION"));
    info!("  Built: {} {}", env!("BUILD_DATE"), env!("BUILD_TIME"));
    info!("  Commit: {}", env!("GIT_HASH"));
    info!("  Profile: {}", if cfg!(debug_assertions) { "debug" } else { "release" });
    info!("════════════════════════════════════════════════════════");

    let mut config = Config::load(&args.config).unwrap_or_else(|e| {
        warn!("Failed to load config: {:#}, using defaults", e);
        Config::default_config()
    });
    if let Some(frames) = args.frames {
        config.source.frames = frames;
    }
    config.validate()?;
    debug!("Config: {:?}", config);

    let platform = LoopbackPlatform::new(LoopbackOptions {
        ring_capacity: args.ring_capacity,
        busy_polls: args.busy_polls,
        warmup_polls: args.warmup,
        fail_encode_every: args.fail_every,
        ..Default::default()
    });
    let monitor = platform.monitor();

    let mut session = Session::new(platform);
    session
        .configure(config.encoder.clone())
        .context("Failed to configure encoder session")?;

    let mut output = match &args.output {
        Some(path) => {
            let file = File::create(path).context(format!("Failed to create {}", path))?;
            let mut writer = BufWriter::new(file);
            writer.write_all(session.header())?;
            info!("Writing stream to {}", path);
            Some(writer)
        }
        None => None,
    };

    let encoder = &config.encoder;
    let mut source = FrameSource::open(&config)?;
    let mut dropped = 0u64;

    while let Some(frame) = source.next_frame(encoder.pixel_format, encoder.width, encoder.height)? {
        match session.encode(&frame)? {
            EncodeOutcome::Packet(packet) => {
                if let Some(writer) = output.as_mut() {
                    writer.write_all(&packet.data)?;
                }
            }
            EncodeOutcome::NoOutput => {}
            EncodeOutcome::EncodeFailed(reason) => {
                dropped += 1;
                warn!("Frame {} dropped: {}", source.produced - 1, reason);
            }
        }
    }

    for packet in session.drain()? {
        if let Some(writer) = output.as_mut() {
            writer.write_all(&packet.data)?;
        }
    }

    if let Some(mut writer) = output.take() {
        writer.flush().context("Failed to flush output")?;
    }

    session.close()?;

    let counters = monitor.counters();
    info!(
        "Done: {} frames, {} dropped, {} slots acquired / {} released, {} split units",
        source.produced,
        dropped,
        counters.slots_acquired,
        counters.slots_released,
        counters.split_units
    );

    Ok(())
}

/// Synthetic pattern or raw packed frames from a file
struct FrameSource {
    reader: Option<BufReader<File>>,
    limit: u32,
    produced: u32,
}

impl FrameSource {
    fn open(config: &Config) -> Result<Self> {
        let reader = match &config.source.raw_file {
            Some(path) => {
                let file = File::open(path)
                    .context(format!("Failed to open raw input {}", path.display()))?;
                info!("Reading raw frames from {}", path.display());
                Some(BufReader::new(file))
            }
            None => None,
        };

        Ok(Self {
            reader,
            limit: config.source.frames,
            produced: 0,
        })
    }

    fn next_frame(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<Option<Frame>> {
        if self.limit > 0 && self.produced >= self.limit {
            return Ok(None);
        }

        let frame = match self.reader.as_mut() {
            Some(reader) => {
                let mut buf = vec![0u8; Frame::packed_size(format, width, height)];
                match reader.read_exact(&mut buf) {
                    Ok(()) => Frame::from_packed(format, width, height, &buf)?,
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
                    Err(e) => return Err(e).context("Failed to read raw frame"),
                }
            }
            None => synthetic_frame(format, width, height, self.produced),
        };

        self.produced += 1;
        Ok(Some(frame))
    }
}

/// Diagonal gradient that shifts by one pixel per frame
fn synthetic_frame(format: PixelFormat, width: u32, height: u32, index: u32) -> Frame {
    let mut frame = Frame::filled(format, width, height, 0);
    for (plane_index, plane) in frame.planes.iter_mut().enumerate() {
        let stride = plane.stride.max(1);
        for (i, byte) in plane.data.iter_mut().enumerate() {
            let (x, y) = (i % stride, i / stride);
            *byte = (x + y + index as usize + plane_index * 64) as u8;
        }
    }
    frame
}

fn init_logging(args: &Args) -> Result<()> {
    let log_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("cedar_venc={},warn", log_level))
    });

    // Optional plain-text copy of everything written to stdout
    let file_layer = match &args.log_file {
        Some(path) => {
            let file = File::create(path).context(format!("Failed to create log file {}", path))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false),
            )
        }
        None => None,
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    match args.log_format.as_str() {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        "compact" => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .init(),
        _ => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .init(),
    }

    if let Some(path) = &args.log_file {
        info!("Logging to file: {}", path);
    }

    Ok(())
}
