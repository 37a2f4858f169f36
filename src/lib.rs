//! # cedar-venc
//!
//! Hand-off between a software video pipeline and a fixed-capacity
//! hardware H.264 encoder.
//!
//! The crate acquires an input slot from the hardware pool, repacks a
//! planar frame into the hardware's interleaved-chroma layout, submits the
//! slot for encoding, and collects the compressed access unit, which the
//! hardware may hand back split across two regions.
//!
//! # Architecture
//!
//! ```text
//! Session
//!   ├─> acquire    poll the slot pool (injectable wait, optional budget)
//!   ├─> repack     plane 0 verbatim, chroma planes interleaved
//!   ├─> submit     encode, then release the slot exactly once
//!   └─> bitstream  join both segments, return them, stamp pts/dts
//! ```
//!
//! The hardware itself sits behind the [`device::VencDevice`] and
//! [`device::VencPlatform`] traits. [`device::loopback`] implements them in
//! host memory for tests and dry runs.
//!
//! # Example
//!
//! ```
//! use cedar_venc::acquire::NoWait;
//! use cedar_venc::config::EncoderConfig;
//! use cedar_venc::device::loopback::LoopbackPlatform;
//! use cedar_venc::frame::{Frame, PixelFormat};
//! use cedar_venc::session::{EncodeOutcome, Session};
//!
//! let mut session = Session::new(LoopbackPlatform::default()).with_wait_strategy(NoWait);
//! session.configure(EncoderConfig::new(64, 32)).unwrap();
//!
//! let frame = Frame::filled(PixelFormat::Yuv420p, 64, 32, 128);
//! match session.encode(&frame).unwrap() {
//!     EncodeOutcome::Packet(packet) => assert_eq!(packet.pts, 0),
//!     other => panic!("unexpected outcome: {:?}", other),
//! }
//! session.close().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// =============================================================================
// Hand-off pipeline
// =============================================================================

/// Input slot acquisition
pub mod acquire;

/// Bitstream retrieval and packet assembly
pub mod bitstream;

/// Planar to interleaved-chroma repacking
pub mod repack;

/// Encoder session lifecycle
pub mod session;

/// Encode submission over a leased slot
pub mod submit;

// =============================================================================
// Supporting modules
// =============================================================================

/// Encoder configuration
pub mod config;

/// Hardware encoder collaborator
pub mod device;

/// Error types
pub mod error;

/// Input frames and pixel formats
pub mod frame;

/// Annex B NAL unit scanning
pub mod nal;

/// Session statistics
pub mod stats;

pub use error::{VencError, VencResult};
pub use session::{EncodeOutcome, Session, SessionState, SharedSession};
