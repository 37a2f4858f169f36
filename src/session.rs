//! Encoder session lifecycle
//!
//! A session owns the hardware for its whole lifetime and drives one
//! acquire → repack → submit → retrieve cycle per frame:
//!
//! ```text
//!  Uninitialized ──configure()──► Configured ──encode()──► Running
//!        │                            │                      │
//!        └────────────close()─────────┴──────────────────────┴──► Closed
//! ```
//!
//! `configure` brings the hardware up in order (init, create, base config,
//! input pool, open, sequence header). If any step fails, everything
//! already acquired is released before the error is returned and the
//! session stays `Uninitialized`. Once configured, the hardware is torn
//! down exactly once, by `close` or on drop.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::acquire::{acquire_slot, SleepWait, WaitStrategy};
use crate::bitstream::{retrieve, Packet, PacketCounter};
use crate::config::EncoderConfig;
use crate::device::{BaseConfig, VencDevice, VencPlatform};
use crate::error::{VencError, VencResult};
use crate::frame::Frame;
use crate::nal;
use crate::stats::{CycleTimer, EncoderStats};
use crate::submit::{SlotLease, Submission};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, hardware untouched
    Uninitialized,
    /// Hardware open, no frame submitted yet
    Configured,
    /// At least one frame submitted
    Running,
    /// Hardware released; terminal
    Closed,
}

impl SessionState {
    /// Lower-case name used in errors and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Closed => "closed",
        }
    }

    /// True while frames may be submitted
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Configured | Self::Running)
    }
}

/// What one submitted frame produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeOutcome {
    /// A compressed packet is ready
    Packet(Packet),
    /// The frame was accepted; the encoder has no output yet
    NoOutput,
    /// The hardware rejected the frame; it is dropped
    EncodeFailed(String),
}

impl EncodeOutcome {
    /// The packet, if this cycle produced one
    pub fn into_packet(self) -> Option<Packet> {
        match self {
            Self::Packet(packet) => Some(packet),
            _ => None,
        }
    }
}

/// Session shared across threads; the lock serializes whole cycles
pub type SharedSession<P> = Arc<Mutex<Session<P>>>;

/// One hardware encoder session
pub struct Session<P: VencPlatform> {
    platform: P,
    device: Option<P::Device>,
    state: SessionState,
    config: Option<EncoderConfig>,
    header: Bytes,
    counter: PacketCounter,
    wait: Box<dyn WaitStrategy>,
    wait_overridden: bool,
    max_polls: Option<u32>,
    stats: EncoderStats,
}

impl<P: VencPlatform> Session<P> {
    /// Create an unconfigured session on `platform`
    ///
    /// Slot polling sleeps the configured `poll_interval_ms` unless a
    /// strategy is supplied with [`Session::with_wait_strategy`].
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            device: None,
            state: SessionState::Uninitialized,
            config: None,
            header: Bytes::new(),
            counter: PacketCounter::new(),
            wait: Box::new(SleepWait::default()),
            wait_overridden: false,
            max_polls: None,
            stats: EncoderStats::default(),
        }
    }

    /// Replace the wait between polls of an exhausted slot pool
    pub fn with_wait_strategy(mut self, wait: impl WaitStrategy + 'static) -> Self {
        self.wait = Box::new(wait);
        self.wait_overridden = true;
        self
    }

    /// Wrap the session for use from several threads
    pub fn into_shared(self) -> SharedSession<P> {
        Arc::new(Mutex::new(self))
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Configuration applied by [`Session::configure`]
    pub fn config(&self) -> Option<&EncoderConfig> {
        self.config.as_ref()
    }

    /// One-time sequence header (SPS/PPS), empty before configuration
    ///
    /// The caller's container must carry it; packets do not repeat it.
    pub fn header(&self) -> &Bytes {
        &self.header
    }

    /// Session statistics
    pub fn stats(&self) -> &EncoderStats {
        &self.stats
    }

    /// Ordering value the next packet will receive
    pub fn next_pts(&self) -> i64 {
        self.counter.peek()
    }

    /// Validate `config` and bring the hardware up
    ///
    /// Configuration errors are reported before any hardware call. On a
    /// hardware failure partway through, everything acquired so far is
    /// released and the session stays `Uninitialized`.
    pub fn configure(&mut self, config: EncoderConfig) -> VencResult<()> {
        if self.state != SessionState::Uninitialized {
            return Err(VencError::InvalidState {
                operation: "configure",
                state: self.state.as_str(),
            });
        }

        config.validate()?;
        let base = config.base_config()?;

        info!(
            "Input stream: {}x{}@{} fps encode at {} bits/s ({})",
            base.input_width,
            base.input_height,
            base.frame_rate,
            base.target_bitrate,
            config.pixel_format
        );

        self.platform.hardware_init()?;
        debug!("Hardware subsystem initialized");

        let (device, header) = match Self::open_device(&mut self.platform, &config, &base) {
            Ok(opened) => opened,
            Err(e) => {
                warn!("Encoder bring-up failed, releasing hardware: {}", e);
                self.platform.hardware_exit();
                return Err(e);
            }
        };

        match nal::parameter_sets(&header) {
            Some(sets) => info!(
                "Sequence header: {} bytes, {} parameter set NAL units",
                header.len(),
                nal::nal_units(&sets).count()
            ),
            None => warn!("Sequence header ({} bytes) carries no SPS/PPS", header.len()),
        }

        if !self.wait_overridden {
            self.wait = Box::new(SleepWait::new(config.poll_interval()));
        }
        self.max_polls = config.acquire_poll_budget();
        self.stats = EncoderStats::new(config.bitrate / 1000);
        self.counter = PacketCounter::new();
        self.header = Bytes::from(header);
        self.device = Some(device);
        self.config = Some(config);
        self.state = SessionState::Configured;

        info!("Encoder session configured");
        Ok(())
    }

    fn open_device(
        platform: &mut P,
        config: &EncoderConfig,
        base: &BaseConfig,
    ) -> VencResult<(P::Device, Vec<u8>)> {
        let mut device = platform.create_encoder()?;
        device.base_config(base)?;
        device.allocate_input_buffers(config.input_buffers)?;
        device.open()?;

        match device.sequence_header() {
            Ok(header) => Ok((device, header)),
            Err(e) => {
                if let Err(close_err) = device.close() {
                    warn!("Close after failed header fetch also failed: {}", close_err);
                }
                Err(e)
            }
        }
    }

    /// Submit one frame and collect at most one packet
    ///
    /// Pool exhaustion only delays this call (unless a bounded acquisition
    /// was configured). A hardware rejection drops the frame and is
    /// reported as [`EncodeOutcome::EncodeFailed`].
    pub fn encode(&mut self, frame: &Frame) -> VencResult<EncodeOutcome> {
        let config = match (&self.config, self.state.is_open()) {
            (Some(config), true) => config,
            _ => {
                return Err(VencError::InvalidState {
                    operation: "encode",
                    state: self.state.as_str(),
                })
            }
        };
        let Some(device) = self.device.as_mut() else {
            return Err(VencError::InvalidState {
                operation: "encode",
                state: self.state.as_str(),
            });
        };

        if frame.width != config.width
            || frame.height != config.height
            || frame.format != config.pixel_format
        {
            return Err(VencError::FrameMismatch(format!(
                "got {}x{} {}, session expects {}x{} {}",
                frame.width,
                frame.height,
                frame.format,
                config.width,
                config.height,
                config.pixel_format
            )));
        }
        frame.validate()?;

        let timer = CycleTimer::start();
        let (slot, empty_polls) = acquire_slot(device, &mut *self.wait, self.max_polls)?;

        let mut lease = SlotLease::new(&mut *device, slot);
        lease.fill(frame, config.chroma_transfer)?;
        let submission = lease.submit();

        if self.state == SessionState::Configured {
            info!("First frame submitted, encoder running");
            self.state = SessionState::Running;
        }

        self.stats.record_cycle(timer.elapsed_ms(), empty_polls);

        match submission {
            Submission::Rejected(reason) => {
                self.stats.record_failure();
                Ok(EncodeOutcome::EncodeFailed(reason))
            }
            Submission::Accepted => match retrieve(device, &mut self.counter) {
                Some(packet) => {
                    self.stats.record_packet(packet.len(), packet.is_keyframe);
                    Ok(EncodeOutcome::Packet(packet))
                }
                None => {
                    debug!("Frame accepted, no output yet");
                    self.stats.record_no_output();
                    Ok(EncodeOutcome::NoOutput)
                }
            },
        }
    }

    /// Collect every unit the hardware has ready without submitting
    pub fn drain(&mut self) -> VencResult<Vec<Packet>> {
        let Some(device) = self.device.as_mut().filter(|_| self.state.is_open()) else {
            return Err(VencError::InvalidState {
                operation: "drain",
                state: self.state.as_str(),
            });
        };

        let mut packets = Vec::new();
        while let Some(packet) = retrieve(device, &mut self.counter) {
            self.stats.record_packet(packet.len(), packet.is_keyframe);
            packets.push(packet);
        }

        if !packets.is_empty() {
            debug!("Drained {} packets", packets.len());
        }
        Ok(packets)
    }

    /// Close the encoder and tear the hardware down
    ///
    /// Closing twice, or closing a session that never configured, is a
    /// no-op. A failed close command is returned after teardown finished.
    pub fn close(&mut self) -> VencResult<()> {
        if !self.state.is_open() {
            self.state = SessionState::Closed;
            return Ok(());
        }

        let result = match self.device.take() {
            Some(mut device) => device.close(),
            None => Ok(()),
        };
        if let Err(e) = &result {
            warn!("Encoder close failed: {}", e);
        }

        self.platform.hardware_exit();
        self.state = SessionState::Closed;

        info!("Encoder session closed: {}", self.stats.summary());
        result
    }
}

impl<P: VencPlatform> Drop for Session<P> {
    fn drop(&mut self) {
        if self.state.is_open() {
            if let Err(e) = self.close() {
                warn!("Error closing encoder session on drop: {}", e);
            }
        }
    }
}
