//! Hardware encoder collaborator
//!
//! The encoder driver itself is external. This module describes what the
//! session needs from it, one method per hardware command, so each step can
//! be substituted independently:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  VencPlatform                             │
//! │  hardware_init() | create_encoder() | hardware_exit()     │
//! └──────────────────────────────────────────────────────────┘
//!                          │ creates
//!                          ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                   VencDevice                              │
//! │  base_config | allocate_input_buffers | open | close      │
//! │  sequence_header                                          │
//! │  acquire_input_buffer ─► flush ─► encode ─► release       │
//! │  bitstream ─► return_bitstream                            │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Input slots and bitstream units are leased by value: acquiring a slot
//! moves it out of the hardware pool, releasing it moves it back. A slot
//! that is never handed back stalls the pool for good.

pub mod loopback;

use std::fmt;

use crate::error::{VencError, VencResult};

/// Hardware input layout selected at configuration time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// Y plane plus interleaved UV plane, 4:2:0
    Yuv420,
    /// Packed 32-bit RGBA
    Rgba,
}

/// Codec produced by the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum CodecKind {
    /// H.264 / AVC in Annex B framing
    #[default]
    H264,
}

/// Base configuration record handed to the hardware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseConfig {
    /// Codec to produce
    pub codec: CodecKind,
    /// Frames per second, rounded to an integer as the hardware expects
    pub frame_rate: u32,
    /// Source width in pixels
    pub input_width: u32,
    /// Source height in pixels
    pub input_height: u32,
    /// Encoded width in pixels (equal to the source)
    pub dst_width: u32,
    /// Encoded height in pixels (equal to the source)
    pub dst_height: u32,
    /// Input layout
    pub input_format: InputFormat,
    /// Target bitrate in bits per second
    pub target_bitrate: u32,
    /// Maximum distance between keyframes, in frames
    pub max_key_interval: u32,
}

/// Command tags understood by the hardware command entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VencCommand {
    /// Open the configured encoder
    Open,
    /// Close the encoder
    Close,
    /// Apply the base configuration record
    BaseConfig,
    /// Allocate the fixed input-buffer pool
    AllocateInputBuffer,
    /// Take a free slot out of the pool
    GetAllocateInputBuffer,
    /// Flush CPU caches on an acquired slot
    FlushCacheAllocateInputBuffer,
    /// Give a slot back to the pool
    ReturnAllocateInputBuffer,
    /// Encode one picture
    Encode,
    /// Fetch one completed bitstream unit
    GetBitstream,
    /// Give a bitstream unit back to the hardware
    ReturnBitstream,
    /// Fetch the sequence header (SPS/PPS)
    HeaderData,
}

impl VencCommand {
    /// Driver-level name of the command
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "VENC_CMD_OPEN",
            Self::Close => "VENC_CMD_CLOSE",
            Self::BaseConfig => "VENC_CMD_BASE_CONFIG",
            Self::AllocateInputBuffer => "VENC_CMD_ALLOCATE_INPUT_BUFFER",
            Self::GetAllocateInputBuffer => "VENC_CMD_GET_ALLOCATE_INPUT_BUFFER",
            Self::FlushCacheAllocateInputBuffer => "VENC_CMD_FLUSHCACHE_ALLOCATE_INPUT_BUFFER",
            Self::ReturnAllocateInputBuffer => "VENC_CMD_RETURN_ALLOCATE_INPUT_BUFFER",
            Self::Encode => "VENC_CMD_ENCODE",
            Self::GetBitstream => "VENC_CMD_GET_BITSTREAM",
            Self::ReturnBitstream => "VENC_CMD_RETURN_BITSTREAM",
            Self::HeaderData => "VENC_CMD_HEADER_DATA",
        }
    }
}

impl fmt::Display for VencCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a raw command status (0 = success) to a result
pub fn check_status(command: VencCommand, status: i32) -> VencResult<()> {
    if status == 0 {
        Ok(())
    } else {
        Err(VencError::CommandFailed { command, status })
    }
}

/// CPU view of a leased hardware input slot
pub trait InputBuffer {
    /// Opaque slot id assigned by the hardware
    fn id(&self) -> u32;

    /// Mutable Y and C regions, in that order
    fn regions_mut(&mut self) -> (&mut [u8], &mut [u8]);
}

/// A completed bitstream unit, possibly split across two regions
pub trait OutputBitstream {
    /// First segment; always holds the start of the access unit
    fn primary(&self) -> &[u8];

    /// Continuation segment, empty when the unit did not wrap
    fn secondary(&self) -> &[u8];

    /// Total bytes in both segments
    fn len(&self) -> usize {
        self.primary().len() + self.secondary().len()
    }

    /// True when both segments are empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Capability interface of one hardware encoder instance
///
/// Implementations are single-client: the session drives one instance
/// from one thread at a time.
#[cfg_attr(
    test,
    mockall::automock(type Slot = HostSlot; type Bitstream = HostBitstream;)
)]
pub trait VencDevice {
    /// Leased input slot type
    type Slot: InputBuffer;
    /// Leased bitstream unit type
    type Bitstream: OutputBitstream;

    /// Apply the base configuration
    fn base_config(&mut self, config: &BaseConfig) -> VencResult<()>;

    /// Request a fixed pool of `count` input buffers
    fn allocate_input_buffers(&mut self, count: u32) -> VencResult<()>;

    /// Open the configured encoder
    fn open(&mut self) -> VencResult<()>;

    /// Close the encoder
    fn close(&mut self) -> VencResult<()>;

    /// Fetch the one-time sequence header (SPS/PPS)
    fn sequence_header(&mut self) -> VencResult<Vec<u8>>;

    /// Take a free slot out of the pool without blocking
    ///
    /// Returns `None` while every slot is leased.
    fn acquire_input_buffer(&mut self) -> Option<Self::Slot>;

    /// Make CPU writes to the slot visible to the hardware
    fn flush_input_buffer(&mut self, slot: &mut Self::Slot) -> VencResult<()>;

    /// Encode the picture held by the slot
    fn encode(&mut self, slot: &Self::Slot) -> VencResult<()>;

    /// Return a slot to the pool
    fn release_input_buffer(&mut self, slot: Self::Slot);

    /// Take one completed bitstream unit, if any is ready
    fn bitstream(&mut self) -> Option<Self::Bitstream>;

    /// Let the hardware reclaim a bitstream unit's segments
    fn return_bitstream(&mut self, bitstream: Self::Bitstream);
}

/// Process-wide hardware bring-up that brackets every device handle
///
/// The session calls `hardware_init` once before creating its encoder and
/// `hardware_exit` exactly once afterwards, on every exit path.
#[cfg_attr(test, mockall::automock(type Device = MockVencDevice;))]
pub trait VencPlatform {
    /// Encoder handle type
    type Device: VencDevice;

    /// Bring up the hardware subsystem
    fn hardware_init(&mut self) -> VencResult<()>;

    /// Create an encoder handle
    fn create_encoder(&mut self) -> VencResult<Self::Device>;

    /// Tear down the hardware subsystem
    fn hardware_exit(&mut self);
}

/// Physical addresses of a slot's two regions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotAddresses {
    /// Physical address of the Y region
    pub phys_y: u64,
    /// Physical address of the C region
    pub phys_c: u64,
}

/// Input slot backed by host memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSlot {
    id: u32,
    luma: Vec<u8>,
    chroma: Vec<u8>,
    addresses: SlotAddresses,
}

impl HostSlot {
    /// Create a zeroed slot with the given region sizes
    pub fn new(id: u32, luma_size: usize, chroma_size: usize) -> Self {
        Self {
            id,
            luma: vec![0; luma_size],
            chroma: vec![0; chroma_size],
            addresses: SlotAddresses::default(),
        }
    }

    /// Attach physical addresses
    pub fn with_addresses(mut self, addresses: SlotAddresses) -> Self {
        self.addresses = addresses;
        self
    }

    /// Physical addresses of the regions
    pub fn addresses(&self) -> SlotAddresses {
        self.addresses
    }

    /// Y region contents
    pub fn luma(&self) -> &[u8] {
        &self.luma
    }

    /// C region contents
    pub fn chroma(&self) -> &[u8] {
        &self.chroma
    }
}

impl InputBuffer for HostSlot {
    fn id(&self) -> u32 {
        self.id
    }

    fn regions_mut(&mut self) -> (&mut [u8], &mut [u8]) {
        (&mut self.luma, &mut self.chroma)
    }
}

/// Bitstream unit backed by host memory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostBitstream {
    /// Hardware-assigned unit id
    pub id: u32,
    /// First segment
    pub segment0: Vec<u8>,
    /// Second segment, empty when contiguous
    pub segment1: Vec<u8>,
}

impl HostBitstream {
    /// Unit held in a single contiguous segment
    pub fn contiguous(id: u32, data: Vec<u8>) -> Self {
        Self {
            id,
            segment0: data,
            segment1: Vec::new(),
        }
    }

    /// Unit split across two segments
    pub fn split(id: u32, segment0: Vec<u8>, segment1: Vec<u8>) -> Self {
        Self {
            id,
            segment0,
            segment1,
        }
    }
}

impl OutputBitstream for HostBitstream {
    fn primary(&self) -> &[u8] {
        &self.segment0
    }

    fn secondary(&self) -> &[u8] {
        &self.segment1
    }
}
