//! Types for the IEEE 802.15.4 link layer below the engine.

use crate::packet::PacketBuf;
use thiserror::Error as ThisError;

/// A 64-bit link-layer address (EUI-64).
pub type Mac = u64;

/// The maximum transmission unit of an IEEE 802.15.4 frame.
pub const LINK_MTU: usize = 127;

/// Link-layer addressing of one received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkMeta {
    /// The neighbor the frame came from.
    pub src: Mac,
    /// The local address the frame was sent to.
    pub dst: Mac,
}

/// The asynchronous completion status of a transmitted frame.
#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
#[error("the link layer failed to transmit the frame")]
pub struct LinkSendError;

/// The synchronous outcome of handing a frame to the link layer. A
/// rejected frame comes straight back so the caller keeps ownership.
#[derive(Debug)]
pub enum SendOutcome {
    /// The frame was queued; a send-done callback will follow.
    Accepted,
    /// The frame was refused and is returned to the caller.
    Rejected(PacketBuf),
}

/// The MAC driver interface the engine transmits through.
///
/// `send` is asynchronous: an accepted frame is eventually reported
/// through `Fragmentation::send_done` with the same buffer.
pub trait LinkLayer: Send + Sync {
    /// The number of octets of link-layer framing that will be added to a
    /// frame addressed to `dst`. Budgeted against [`LINK_MTU`] when
    /// planning fragment sizes.
    fn header_size(&self, dst: Mac) -> usize;

    /// Submits one frame for transmission to `dst`.
    fn send(&self, packet: PacketBuf, dst: Mac) -> SendOutcome;
}
