//! Error types for the hardware encoder hand-off
//!
//! Configuration-time errors abort session setup. Per-frame transient
//! conditions (pool exhaustion, no output yet, hardware encode failure)
//! are absorbed by the session and never surface here unless the caller
//! opted into a bounded acquisition.

use thiserror::Error;

use crate::device::VencCommand;
use crate::frame::PixelFormat;

/// Unified error type for encoder session operations
#[derive(Debug, Error)]
pub enum VencError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// The hardware accepts only planar 4:2:0 and packed RGBA input
    #[error("Unsupported pixel format: {0:?}")]
    UnsupportedPixelFormat(PixelFormat),

    /// Input width violates the hardware row alignment
    #[error("Input width {width} is not a multiple of {alignment}")]
    MisalignedWidth {
        /// Configured width in pixels
        width: u32,
        /// Required multiple
        alignment: u32,
    },

    /// Geometry rejected for a reason other than alignment
    #[error("Invalid dimensions: {width}x{height} - {reason}")]
    InvalidDimensions {
        /// Configured width in pixels
        width: u32,
        /// Configured height in pixels
        height: u32,
        /// What is wrong with them
        reason: String,
    },

    /// Any other rejected configuration field
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// Operation not permitted in the current session state
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        /// Rejected operation
        operation: &'static str,
        /// Session state at the time
        state: &'static str,
    },

    // =========================================================================
    // Per-frame Errors
    // =========================================================================
    /// Frame does not match the configured geometry or format
    #[error("Frame does not match session: {0}")]
    FrameMismatch(String),

    /// Frame planes are missing or shorter than their stride implies
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Hardware input slot cannot hold the repacked image
    #[error("Input slot {region} region too small (need {needed}, have {available})")]
    SlotTooSmall {
        /// `"Y"` or `"C"`
        region: &'static str,
        /// Bytes the repack writes
        needed: usize,
        /// Bytes the slot provides
        available: usize,
    },

    /// Bounded acquisition gave up waiting for a free slot
    #[error("No free input slot after {polls} polls")]
    AcquireTimeout {
        /// Polls made before giving up
        polls: u32,
    },

    // =========================================================================
    // Hardware Errors
    // =========================================================================
    /// Hardware subsystem or encoder handle could not be created
    #[error("Hardware initialization failed: {0}")]
    HardwareInit(String),

    /// A device command returned a non-zero status
    #[error("{command} failed with status {status}")]
    CommandFailed {
        /// Command that failed
        command: VencCommand,
        /// Raw non-zero status
        status: i32,
    },
}

impl VencError {
    /// Errors reported by configuration that must stop the caller
    /// from submitting frames
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            VencError::UnsupportedPixelFormat(_)
                | VencError::MisalignedWidth { .. }
                | VencError::InvalidDimensions { .. }
                | VencError::InvalidConfig(_)
                | VencError::HardwareInit(_)
        )
    }

    /// Check if this error might clear up on a later frame
    pub fn is_recoverable(&self) -> bool {
        matches!(self, VencError::AcquireTimeout { .. })
    }
}

/// Result type for encoder session operations
pub type VencResult<T> = Result<T, VencError>;
