//! Encode submission over a leased input slot
//!
//! A [`SlotLease`] holds the one slot the session owns between acquisition
//! and submission. The slot goes back to the hardware pool exactly once:
//! after the encode command in [`SlotLease::submit`], or on drop when the
//! cycle is abandoned early (repack error, panic, timeout upstream).

use tracing::{debug, error, warn};

use crate::device::{InputBuffer, VencDevice};
use crate::error::{VencError, VencResult};
use crate::frame::Frame;
use crate::repack::{fill_interleaved_chroma, ChromaTransfer, RepackSummary};

/// Result of handing one picture to the hardware
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// The hardware accepted the picture
    Accepted,
    /// The hardware rejected the picture; it is dropped
    Rejected(String),
}

/// Exclusive ownership of one acquired input slot
pub struct SlotLease<'a, D: VencDevice + ?Sized> {
    device: &'a mut D,
    slot: Option<D::Slot>,
}

impl<'a, D: VencDevice + ?Sized> SlotLease<'a, D> {
    /// Take ownership of `slot`, which must have come from `device`
    pub fn new(device: &'a mut D, slot: D::Slot) -> Self {
        Self {
            device,
            slot: Some(slot),
        }
    }

    /// Hardware id of the leased slot
    pub fn id(&self) -> Option<u32> {
        self.slot.as_ref().map(|slot| slot.id())
    }

    /// Repack `frame` into the slot and flush it for the hardware
    ///
    /// A failed cache flush is logged and the picture still submitted;
    /// the repack itself fails only on a frame the slot cannot hold.
    pub fn fill(&mut self, frame: &Frame, transfer: ChromaTransfer) -> VencResult<RepackSummary> {
        let slot = self.slot.as_mut().ok_or(VencError::InvalidState {
            operation: "fill",
            state: "released",
        })?;

        let summary = {
            let (dst_y, dst_c) = slot.regions_mut();
            fill_interleaved_chroma(frame, dst_y, dst_c, transfer)?
        };

        if let Err(e) = self.device.flush_input_buffer(slot) {
            warn!("Cache flush on input slot {} failed: {}", slot.id(), e);
        }

        Ok(summary)
    }

    /// Encode the slot's picture and give the slot back to the pool
    ///
    /// A hardware rejection is reported as [`Submission::Rejected`], not as
    /// an error; the slot is released either way.
    pub fn submit(mut self) -> Submission {
        let Some(slot) = self.slot.take() else {
            return Submission::Rejected("slot already released".to_string());
        };

        let id = slot.id();
        let result = self.device.encode(&slot);
        self.device.release_input_buffer(slot);

        match result {
            Ok(()) => {
                debug!("Input slot {} encoded and released", id);
                Submission::Accepted
            }
            Err(e) => {
                error!("Hardware encode of slot {} failed, frame dropped: {}", id, e);
                Submission::Rejected(e.to_string())
            }
        }
    }
}

impl<D: VencDevice + ?Sized> Drop for SlotLease<'_, D> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            debug!("Returning unsubmitted input slot {}", slot.id());
            self.device.release_input_buffer(slot);
        }
    }
}
