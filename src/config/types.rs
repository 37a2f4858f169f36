//! Configuration type definitions

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::acquire::poll_budget;
use crate::device::{BaseConfig, CodecKind, InputFormat};
use crate::error::{VencError, VencResult};
use crate::frame::PixelFormat;
use crate::repack::ChromaTransfer;

/// Row alignment the hardware imposes on the input width
pub const WIDTH_ALIGNMENT: u32 = 32;

/// Fraction used for the stream time base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    /// Numerator
    pub num: u32,
    /// Denominator
    pub den: u32,
}

impl Rational {
    /// Create a fraction
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::new(1, 25)
    }
}

/// Encoder session configuration
///
/// Fixed once the session is configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Codec to produce
    #[serde(default)]
    pub codec: CodecKind,

    /// Frame width in pixels; must be a multiple of 32
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Input pixel format ("yuv420p" or "rgba")
    #[serde(default = "default_pixel_format")]
    pub pixel_format: PixelFormat,

    /// Duration of one frame; the frame rate is its reciprocal
    #[serde(default)]
    pub time_base: Rational,

    /// Target bitrate in bits per second
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,

    /// Maximum distance between keyframes, in frames
    #[serde(default = "default_max_key_interval")]
    pub max_key_interval: u32,

    /// Input slots requested from the hardware
    #[serde(default = "default_input_buffers")]
    pub input_buffers: u32,

    /// Back-off between polls of an exhausted slot pool (ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Give up on slot acquisition after this long (ms); unset waits forever
    #[serde(default)]
    pub acquire_timeout_ms: Option<u64>,

    /// How chroma samples are written into input slots
    #[serde(default)]
    pub chroma_transfer: ChromaTransfer,
}

fn default_pixel_format() -> PixelFormat {
    PixelFormat::Yuv420p
}

fn default_bitrate() -> u32 {
    4_000_000
}

fn default_max_key_interval() -> u32 {
    25
}

fn default_input_buffers() -> u32 {
    4
}

fn default_poll_interval_ms() -> u64 {
    10
}

impl EncoderConfig {
    /// Configuration with defaults for everything but the geometry
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            codec: CodecKind::default(),
            width,
            height,
            pixel_format: default_pixel_format(),
            time_base: Rational::default(),
            bitrate: default_bitrate(),
            max_key_interval: default_max_key_interval(),
            input_buffers: default_input_buffers(),
            poll_interval_ms: default_poll_interval_ms(),
            acquire_timeout_ms: None,
            chroma_transfer: ChromaTransfer::default(),
        }
    }

    /// Run every check that must pass before hardware is touched
    pub fn validate(&self) -> VencResult<()> {
        self.input_format()?;

        if self.width == 0 || self.height == 0 {
            return Err(VencError::InvalidDimensions {
                width: self.width,
                height: self.height,
                reason: "width and height must be non-zero".to_string(),
            });
        }

        if self.width % WIDTH_ALIGNMENT != 0 {
            return Err(VencError::MisalignedWidth {
                width: self.width,
                alignment: WIDTH_ALIGNMENT,
            });
        }

        if self.time_base.num == 0 || self.time_base.den == 0 {
            return Err(VencError::InvalidConfig(format!(
                "time base {}/{} has a zero term",
                self.time_base.num, self.time_base.den
            )));
        }

        if self.frame_rate() == 0 {
            return Err(VencError::InvalidConfig(format!(
                "time base {}/{} is longer than one second",
                self.time_base.num, self.time_base.den
            )));
        }

        if self.max_key_interval == 0 {
            return Err(VencError::InvalidConfig(
                "max_key_interval must be at least 1".to_string(),
            ));
        }

        if self.input_buffers == 0 {
            return Err(VencError::InvalidConfig(
                "input_buffers must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Hardware input layout for the configured pixel format
    pub fn input_format(&self) -> VencResult<InputFormat> {
        match self.pixel_format {
            PixelFormat::Yuv420p => Ok(InputFormat::Yuv420),
            PixelFormat::Rgba => Ok(InputFormat::Rgba),
            other => Err(VencError::UnsupportedPixelFormat(other)),
        }
    }

    /// Frames per second, truncated to an integer
    pub fn frame_rate(&self) -> u32 {
        if self.time_base.num == 0 {
            return 0;
        }
        self.time_base.den / self.time_base.num
    }

    /// Back-off between acquisition polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Acquisition poll budget, `None` for unbounded
    pub fn acquire_poll_budget(&self) -> Option<u32> {
        self.acquire_timeout_ms
            .map(|ms| poll_budget(Duration::from_millis(ms), self.poll_interval()))
    }

    /// Record handed to the hardware's base-configuration command
    pub fn base_config(&self) -> VencResult<BaseConfig> {
        Ok(BaseConfig {
            codec: self.codec,
            frame_rate: self.frame_rate(),
            input_width: self.width,
            input_height: self.height,
            dst_width: self.width,
            dst_height: self.height,
            input_format: self.input_format()?,
            target_bitrate: self.bitrate,
            max_key_interval: self.max_key_interval,
        })
    }
}

/// Frame source for the command-line exerciser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Raw file of back-to-back packed frames; synthetic frames when unset
    #[serde(default)]
    pub raw_file: Option<PathBuf>,

    /// Number of frames to encode (0 = all frames of the raw file)
    #[serde(default = "default_frames")]
    pub frames: u32,
}

fn default_frames() -> u32 {
    50
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            raw_file: None,
            frames: default_frames(),
        }
    }
}
