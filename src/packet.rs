//! Link-layer packet containers.
//!
//! This module implements the [`PacketBuf`] container. Every frame that
//! crosses the engine lives in one of these: a fixed-capacity byte buffer
//! with headroom in front of the payload so that protocol headers can be
//! prepended and stripped without copying the payload around.

use thiserror::Error as ThisError;

/// Identifies a packet buffer for the lifetime of the process.
///
/// Ids are handed out by the pool and never reused, so a buffer can be
/// traced back to its owner after it has passed through the link layer.
pub type PacketId = u64;

/// The component a buffer was allocated for. Send-done routing keys off
/// this tag: a forwarded fragment goes back to the forwarding layer, a
/// bridge-originated frame produces a serial notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// The fragmentation engine itself.
    Fragmentation,
    /// The header compression layer above the engine.
    Iphc,
    /// The mesh forwarding layer. Assigned when a received datagram is
    /// re-emitted under a new tag.
    Forwarding,
    /// The serial-connected host bridge.
    Bridge,
    /// An application or test harness.
    App,
}

/// A byte container for one link frame or one reassembled datagram.
///
/// The payload occupies `[start, end)` of the backing storage. Prepending
/// a header moves `start` down into the headroom; stripping one moves it
/// back up. Stripped bytes stay in the buffer, so a header that was
/// removed for inspection can be re-exposed later with
/// [`reserve_header`](Self::reserve_header).
#[derive(Debug)]
pub struct PacketBuf {
    id: PacketId,
    creator: Owner,
    data: Vec<u8>,
    start: usize,
    end: usize,
    big: bool,
}

impl PacketBuf {
    pub(crate) fn new(id: PacketId, creator: Owner, capacity: usize, headroom: usize) -> Self {
        Self {
            id,
            creator,
            data: vec![0; capacity],
            start: headroom,
            end: headroom,
            big: false,
        }
    }

    /// The pool-assigned identity of this buffer.
    pub fn id(&self) -> PacketId {
        self.id
    }

    /// The component this buffer was allocated for.
    pub fn creator(&self) -> Owner {
        self.creator
    }

    pub fn set_creator(&mut self, creator: Owner) {
        self.creator = creator;
    }

    /// Whether this buffer has been migrated to the large tier.
    pub fn is_big(&self) -> bool {
        self.big
    }

    /// The length of the payload.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the payload contains no bytes.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.start..self.end]
    }

    /// Moves the payload start down by `n` bytes, re-exposing whatever the
    /// headroom holds there. Used to restore a previously stripped header.
    pub fn reserve_header(&mut self, n: usize) -> Result<(), RoomError> {
        if n > self.start {
            return Err(RoomError::NoHeadroom);
        }
        self.start -= n;
        Ok(())
    }

    /// Removes `n` bytes from the front of the payload. The bytes stay in
    /// the backing storage until overwritten.
    pub fn toss_header(&mut self, n: usize) -> Result<(), RoomError> {
        if n > self.len() {
            return Err(RoomError::OutOfRange);
        }
        self.start += n;
        Ok(())
    }

    /// Prepends `header` to the payload.
    pub fn prepend(&mut self, header: &[u8]) -> Result<(), RoomError> {
        self.reserve_header(header.len())?;
        self.data[self.start..self.start + header.len()].copy_from_slice(header);
        Ok(())
    }

    /// Writes `bytes` at `pos` octets into the payload, extending the
    /// payload length if the write runs past its current end.
    pub fn write_at(&mut self, pos: usize, bytes: &[u8]) -> Result<(), RoomError> {
        let from = self.start + pos;
        let to = from + bytes.len();
        if to > self.data.len() {
            return Err(RoomError::OutOfRange);
        }
        self.data[from..to].copy_from_slice(bytes);
        self.end = self.end.max(to);
        Ok(())
    }

    /// Appends `bytes` to the payload.
    pub fn extend(&mut self, bytes: &[u8]) -> Result<(), RoomError> {
        self.write_at(self.len(), bytes)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.payload().to_vec()
    }

    /// Migrates the backing storage to `capacity` bytes, preserving the
    /// payload and its position. Called by the pool only.
    pub(crate) fn grow(&mut self, capacity: usize) {
        if capacity > self.data.len() {
            self.data.resize(capacity, 0);
        }
        self.big = true;
    }
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum RoomError {
    #[error("not enough headroom in the packet buffer")]
    NoHeadroom,
    #[error("write outside the packet buffer")]
    OutOfRange,
}
