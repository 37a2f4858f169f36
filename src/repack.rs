//! Planar to interleaved-chroma repacking
//!
//! The encoder consumes two regions per input slot: a Y region holding a
//! verbatim copy of plane 0, and a C region where the samples of every
//! chroma plane are interleaved byte by byte.
//!
//! ```text
//!  plane 1:  U0 U1 U2 ...          C region:  U0 V0 U1 V1 U2 V2 ...
//!  plane 2:  V0 V1 V2 ...    ──►
//! ```
//!
//! Each destination byte `j × n + (p − 1)` receives byte `j` of chroma
//! plane `p`, where `n` is the number of chroma planes present. With a
//! single chroma plane (NV12-style) the interleave is a plain copy; with
//! none (packed RGBA) the C region is left untouched.
//!
//! Source planes are only read, each exactly once in increasing offset
//! order, and destination bytes are never read back.

use serde::{Deserialize, Serialize};

use crate::error::{VencError, VencResult};
use crate::frame::{Frame, MAX_PLANES};

/// How chroma samples are transferred into the C region
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChromaTransfer {
    /// Copy samples unchanged
    #[default]
    Verbatim,
    /// Write each sample plus one (wrapping), leaving the source untouched
    ///
    /// Matches what legacy firmware builds were fed; keep it selectable
    /// until the hardware input contract says otherwise.
    Incremented,
}

impl ChromaTransfer {
    #[inline]
    fn apply(self, sample: u8) -> u8 {
        match self {
            Self::Verbatim => sample,
            Self::Incremented => sample.wrapping_add(1),
        }
    }
}

/// Byte counts written by one repack
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepackSummary {
    /// Bytes copied into the Y region
    pub luma_bytes: usize,
    /// Bytes written into the C region
    pub chroma_bytes: usize,
    /// Number of chroma planes interleaved
    pub chroma_planes: usize,
}

/// Per-plane layout computed from a frame and its format descriptor
#[derive(Debug, Clone, Copy)]
struct PlaneLayout {
    sizes: [usize; MAX_PLANES],
    present: [bool; MAX_PLANES],
    chroma_planes: usize,
}

impl PlaneLayout {
    fn of(frame: &Frame) -> Self {
        let desc = frame.format.descriptor();
        let present = desc.planes_present();

        let mut sizes = [0usize; MAX_PLANES];
        for (plane, size) in sizes.iter_mut().enumerate() {
            if let Some(p) = frame.planes.get(plane) {
                *size = desc.plane_height(plane, frame.height) * p.stride;
            }
        }

        // Chroma planes are consumed in order and stop at the first gap
        let chroma_planes = present[1..].iter().take_while(|p| **p).count();

        Self {
            sizes,
            present,
            chroma_planes,
        }
    }

    fn luma_size(&self) -> usize {
        if self.present[0] {
            self.sizes[0]
        } else {
            0
        }
    }

    fn chroma_size(&self) -> usize {
        self.sizes[1..=self.chroma_planes].iter().sum()
    }

    /// Smallest C region that holds every interleaved byte
    fn chroma_extent(&self) -> usize {
        let n = self.chroma_planes;
        (1..=n)
            .filter(|plane| self.sizes[*plane] > 0)
            .map(|plane| (self.sizes[plane] - 1) * n + plane)
            .max()
            .unwrap_or(0)
    }
}

/// Y and C region sizes a slot must provide for this frame
pub fn required_region_sizes(frame: &Frame) -> (usize, usize) {
    let layout = PlaneLayout::of(frame);
    (layout.luma_size(), layout.chroma_extent())
}

/// Repack `frame` into the hardware Y and C regions
///
/// The frame must already have passed [`Frame::validate`]; the regions
/// are checked here and rejected with [`VencError::SlotTooSmall`] before
/// anything is written.
pub fn fill_interleaved_chroma(
    frame: &Frame,
    dst_y: &mut [u8],
    dst_c: &mut [u8],
    transfer: ChromaTransfer,
) -> VencResult<RepackSummary> {
    let layout = PlaneLayout::of(frame);

    let luma_bytes = layout.luma_size();
    if dst_y.len() < luma_bytes {
        return Err(VencError::SlotTooSmall {
            region: "Y",
            needed: luma_bytes,
            available: dst_y.len(),
        });
    }

    let extent = layout.chroma_extent();
    if dst_c.len() < extent {
        return Err(VencError::SlotTooSmall {
            region: "C",
            needed: extent,
            available: dst_c.len(),
        });
    }

    for plane in (0..=layout.chroma_planes).filter(|p| layout.present[*p]) {
        match frame.planes.get(plane) {
            Some(p) if p.data.len() >= layout.sizes[plane] => {}
            Some(p) => {
                return Err(VencError::InvalidFrame(format!(
                    "plane {} holds {} bytes, needs {}",
                    plane,
                    p.data.len(),
                    layout.sizes[plane]
                )))
            }
            None => {
                return Err(VencError::InvalidFrame(format!(
                    "{} frame is missing plane {}",
                    frame.format, plane
                )))
            }
        }
    }

    if luma_bytes > 0 {
        dst_y[..luma_bytes].copy_from_slice(&frame.planes[0].data[..luma_bytes]);
    }

    let n = layout.chroma_planes;
    for plane in 1..=n {
        let src = &frame.planes[plane].data[..layout.sizes[plane]];
        if src.is_empty() {
            continue;
        }

        if n == 1 && transfer == ChromaTransfer::Verbatim {
            dst_c[..src.len()].copy_from_slice(src);
            continue;
        }

        for (dst, &sample) in dst_c[plane - 1..].iter_mut().step_by(n).zip(src) {
            *dst = transfer.apply(sample);
        }
    }

    Ok(RepackSummary {
        luma_bytes,
        chroma_bytes: layout.chroma_size(),
        chroma_planes: n,
    })
}
