//! Bitstream retrieval and packet assembly
//!
//! A completed access unit may sit in the hardware's output ring as two
//! physically separate segments. Retrieval copies both into one buffer,
//! segment two immediately after segment one, hands the segments back to
//! the hardware and stamps the packet with the session's ordering counter.

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::device::{OutputBitstream, VencDevice};
use crate::nal;

/// One compressed access unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Annex B payload, passed through as the hardware produced it
    pub data: Bytes,
    /// Presentation order
    pub pts: i64,
    /// Decode order (equal to `pts`, no reordering)
    pub dts: i64,
    /// True if the payload carries an IDR slice
    pub is_keyframe: bool,
}

impl Packet {
    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for an empty payload
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Per-session ordering counter
///
/// Starts at 0 and advances by exactly one per emitted packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketCounter {
    next: i64,
}

impl PacketCounter {
    /// Counter starting at 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Value the next packet will receive
    pub fn peek(&self) -> i64 {
        self.next
    }

    fn advance(&mut self) -> i64 {
        let value = self.next;
        self.next += 1;
        value
    }
}

/// Concatenate both segments of a unit into one buffer
pub fn assemble<B: OutputBitstream + ?Sized>(bitstream: &B) -> Bytes {
    let primary = bitstream.primary();
    let secondary = bitstream.secondary();

    let mut buf = BytesMut::with_capacity(primary.len() + secondary.len());
    buf.extend_from_slice(primary);
    if !secondary.is_empty() {
        buf.extend_from_slice(secondary);
    }
    buf.freeze()
}

/// Pull one completed unit from the hardware, if any is ready
///
/// `None` is the normal outcome while the encoder is still buffering.
pub fn retrieve<D: VencDevice + ?Sized>(
    device: &mut D,
    counter: &mut PacketCounter,
) -> Option<Packet> {
    let bitstream = device.bitstream()?;

    let data = assemble(&bitstream);
    let split = !bitstream.secondary().is_empty();
    device.return_bitstream(bitstream);

    let order = counter.advance();
    let is_keyframe = nal::contains_idr(&data);
    debug!(
        "Packet {}: {} bytes{}{}",
        order,
        data.len(),
        if split { " (split)" } else { "" },
        if is_keyframe { " [IDR]" } else { "" }
    );

    Some(Packet {
        data,
        pts: order,
        dts: order,
        is_keyframe,
    })
}
