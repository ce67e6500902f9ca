//! Per-datagram fragmentation state.
//!
//! A [`FragmentContext`] tracks one datagram in one direction: its
//! identifying tuple, the per-link-fragment [`FragmentSlot`] list, the
//! action the upper layer assigned, the reassembly timer, and the
//! transmission counters. Contexts live in the fixed-size queue array and
//! are recycled; a generation counter guards stale handles.

use super::planner::MAX_FRAGMENTS;
use crate::link::Mac;
use crate::packet::PacketBuf;
use crate::timer::TimerId;

/// Lifecycle of a context slot in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextState {
    /// Unallocated.
    #[default]
    Free,
    /// Allocated, not yet populated.
    Reserved,
    /// Receiving fragments from a neighbor.
    Rx,
    /// Transmitting a locally originated datagram.
    Tx,
    /// Re-emitting received fragments under a new tag.
    Fw,
    /// A transmission failed; draining in-flight fragments.
    Fail,
    /// A forward failed; draining in-flight fragments.
    FailFw,
}

impl ContextState {
    pub fn is_failed(self) -> bool {
        matches!(self, ContextState::Fail | ContextState::FailFw)
    }

    /// Whether inbound fragments may still match this context.
    pub fn is_receiving(self) -> bool {
        matches!(self, ContextState::Rx | ContextState::Fw)
    }
}

/// Lifecycle of one link fragment within a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    /// Unused entry.
    #[default]
    None,
    /// Planned for transmission, no packet buffer yet.
    Assigned,
    /// A packet buffer is being acquired outside the lock.
    Reserving,
    /// Packet buffer acquired, frame materialized.
    Reserved,
    /// Handed to the link layer, awaiting send-done.
    Sending,
    /// Received from a neighbor, buffered.
    Received,
    /// Consumed by the action dispatcher.
    Processed,
    /// Terminal.
    Finished,
}

/// One link fragment's state within a context.
#[derive(Debug, Default)]
pub struct FragmentSlot {
    pub state: SlotState,
    /// Octet count of this fragment's payload.
    pub fragment_size: u16,
    /// Octet offset into the datagram, divided by 8.
    pub fragment_offset: u8,
    /// The fragment's link-layer buffer, when one is held.
    pub packet: Option<PacketBuf>,
}

impl FragmentSlot {
    /// Whether this slot's payload range intersects `[offset, offset +
    /// size)` (both in wire units: offset/8, octets) other than exactly.
    pub fn overlaps(&self, offset: u8, size: u16) -> bool {
        if self.fragment_offset == offset && self.fragment_size == size {
            return false;
        }
        let a = self.fragment_offset as u32 * 8;
        let b = a + self.fragment_size as u32;
        let c = offset as u32 * 8;
        let d = c + size as u32;
        a < d && c < b
    }

    pub fn is_duplicate(&self, offset: u8, size: u16) -> bool {
        self.state != SlotState::None
            && self.fragment_offset == offset
            && self.fragment_size == size
    }
}

/// The action the upper layer assigned after inspecting FRAG1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    #[default]
    None,
    Cancel,
    Assemble,
    Forward,
    OpenBridge,
}

/// One entry of the fragment queue.
#[derive(Debug, Default)]
pub struct FragmentContext {
    pub state: ContextState,
    /// Generation counter; bumped on every allocation so stale handles
    /// cannot reach a recycled context.
    pub generation: u64,
    /// Sender of the datagram (the neighbor for RX, the local node for
    /// TX).
    pub src: Mac,
    /// Receiver of the datagram (the local node for RX, the next hop for
    /// TX).
    pub dst: Mac,
    /// Octet length of the full datagram as received or planned.
    pub datagram_size: u16,
    /// The datagram tag; unique per (src, dst) while the context lives.
    pub datagram_tag: u16,
    /// The datagram-level buffer: the outbound packet for TX, the FRAG1
    /// buffer promoted to the reassembled datagram for RX.
    pub msg: Option<PacketBuf>,
    pub slots: Vec<FragmentSlot>,
    pub action: Action,
    /// Link fragments currently in flight.
    pub sending: usize,
    /// Link fragments successfully transmitted.
    pub sent: usize,
    /// Link fragments consumed by the action dispatcher.
    pub processed: usize,
    /// For ASSEMBLE: octets the upper layer consumed from FRAG1 before
    /// reassembly, fixing the reassembly buffer's position in the
    /// datagram. Computed on the dispatcher's first run.
    pub assemble_offset: Option<u16>,
    /// For FORWARD: the rewritten datagram size for the downstream hop.
    pub new_size: u16,
    /// For FORWARD: the tag issued for the downstream hop.
    pub new_tag: u16,
    /// For FORWARD: the next hop fragments are re-emitted to.
    pub fw_dst: Mac,
    /// The reassembly-timeout timer, when armed.
    pub timer: Option<TimerId>,
}

impl FragmentContext {
    /// Recycles the entry. Buffers must have been drained by the caller;
    /// the generation survives so the slot can be reallocated.
    pub fn reset(&mut self) {
        debug_assert!(self.msg.is_none());
        debug_assert!(self.slots.iter().all(|s| s.packet.is_none()));
        let generation = self.generation;
        *self = FragmentContext {
            generation,
            slots: std::mem::take(&mut self.slots),
            ..Default::default()
        };
        self.slots.clear();
    }

    pub fn is_free(&self) -> bool {
        self.state == ContextState::Free
    }

    /// Whether this context tracks the inbound datagram identified by the
    /// lookup tuple.
    pub fn matches_inbound(&self, src: Mac, dst: Mac, tag: u16, size: u16) -> bool {
        self.state.is_receiving()
            && self.src == src
            && self.dst == dst
            && self.datagram_tag == tag
            && self.datagram_size == size
    }

    /// Octets received so far (slots that hold or held a payload).
    pub fn received_octets(&self) -> u32 {
        self.slots
            .iter()
            .filter(|s| {
                matches!(
                    s.state,
                    SlotState::Received
                        | SlotState::Processed
                        | SlotState::Finished
                        | SlotState::Reserved
                        | SlotState::Sending
                )
            })
            .map(|s| s.fragment_size as u32)
            .sum()
    }

    /// Octets whose slots reached the terminal state.
    pub fn finished_octets(&self) -> u32 {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Finished)
            .map(|s| s.fragment_size as u32)
            .sum()
    }

    /// Whether every octet of the datagram has arrived.
    pub fn reception_complete(&self) -> bool {
        self.received_octets() == self.datagram_size as u32
    }

    pub fn first_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.fragment_offset == 0)
    }

    pub fn has_room(&self) -> bool {
        self.slots.len() < MAX_FRAGMENTS
    }

    /// The tag a newly issued tag must not collide with while this
    /// context lives.
    pub fn holds_tag(&self, tag: u16) -> bool {
        if self.is_free() {
            return false;
        }
        self.datagram_tag == tag
            || (matches!(self.state, ContextState::Fw | ContextState::FailFw)
                && self.new_tag == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(offset: u8, size: u16) -> FragmentSlot {
        FragmentSlot {
            state: SlotState::Received,
            fragment_size: size,
            fragment_offset: offset,
            packet: None,
        }
    }

    #[test]
    fn exact_duplicate_is_not_an_overlap() {
        let s = slot(13, 104);
        assert!(s.is_duplicate(13, 104));
        assert!(!s.overlaps(13, 104));
    }

    #[test]
    fn intersecting_ranges_overlap() {
        let s = slot(0, 104);
        // Offset 8 octets into a 104-octet fragment.
        assert!(s.overlaps(1, 104));
        assert!(s.overlaps(12, 8));
        assert!(!s.overlaps(13, 104));
        assert!(!s.is_duplicate(1, 104));
    }

    #[test]
    fn adjacent_ranges_do_not_overlap() {
        let s = slot(13, 104);
        assert!(!s.overlaps(0, 104));
        assert!(!s.overlaps(26, 42));
    }

    #[test]
    fn completion_tracks_received_octets() {
        let mut ctx = FragmentContext {
            state: ContextState::Rx,
            datagram_size: 250,
            ..Default::default()
        };
        ctx.slots.push(slot(0, 104));
        ctx.slots.push(slot(26, 42));
        assert_eq!(ctx.received_octets(), 146);
        assert!(!ctx.reception_complete());
        ctx.slots.push(slot(13, 104));
        assert!(ctx.reception_complete());
        assert_eq!(ctx.first_slot(), Some(0));
    }

    #[test]
    fn reset_keeps_generation() {
        let mut ctx = FragmentContext {
            state: ContextState::Rx,
            generation: 7,
            datagram_tag: 99,
            ..Default::default()
        };
        ctx.slots.push(slot(0, 8));
        ctx.reset();
        assert!(ctx.is_free());
        assert_eq!(ctx.generation, 7);
        assert!(ctx.slots.is_empty());
        assert!(!ctx.holds_tag(99));
    }
}
