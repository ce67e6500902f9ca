//! Outbound fragment boundary planning.
//!
//! Given a datagram and the link overhead toward its next hop, decide
//! whether fragmentation is needed at all and, if so, where each link
//! fragment begins and ends. All fragments but the last carry a payload
//! that is a multiple of 8 octets so that offsets are representable in
//! the FRAGN header's 8-octet units.

use super::header::FRAGN_LEN;
use crate::link::LINK_MTU;
use thiserror::Error as ThisError;

/// Slots per context; bounds the largest datagram a context can track.
pub const MAX_FRAGMENTS: usize = 16;

/// Ceiling on outbound datagram length.
pub const FRAGMENT_MAX_SIZE: usize = 1280;

/// One planned link fragment: datagram offset in 8-octet units and the
/// payload length in octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedSlot {
    pub offset: u8,
    pub size: u16,
}

/// The result of planning a datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// The datagram fits one frame; send it without a fragment header.
    Bypass,
    /// The datagram must be split into these link fragments.
    Fragments(Vec<PlannedSlot>),
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum PlanError {
    #[error("the compressed header does not fit the first link fragment")]
    Unsupported,
    #[error("datagram of {0} octets exceeds the outbound ceiling")]
    TooLarge(usize),
    #[error("link overhead of {0} octets leaves no room for fragments")]
    NoRoom(usize),
}

/// Plans the link fragments for a datagram of `len` octets whose first
/// `header_len` octets are the compressed IPv6 header, over a link that
/// adds `l2_overhead` octets of framing. `big` forces fragmentation even
/// when the datagram would fit one frame.
pub fn plan(len: usize, l2_overhead: usize, header_len: usize, big: bool) -> Result<Plan, PlanError> {
    if len > FRAGMENT_MAX_SIZE {
        return Err(PlanError::TooLarge(len));
    }
    if len + l2_overhead <= LINK_MTU && !big {
        return Ok(Plan::Bypass);
    }

    // The per-fragment payload ceiling, 8-aligned. The FRAGN header is
    // budgeted for every fragment so that offsets stay aligned across the
    // whole datagram.
    let budget = LINK_MTU
        .checked_sub(l2_overhead + FRAGN_LEN)
        .ok_or(PlanError::NoRoom(l2_overhead))?;
    let max_fragment = budget / 8 * 8;
    if max_fragment == 0 {
        return Err(PlanError::NoRoom(l2_overhead));
    }
    // RFC 4944: the first link fragment must carry the entire compressed
    // header.
    if max_fragment < header_len {
        return Err(PlanError::Unsupported);
    }

    let mut slots = Vec::new();
    let mut emitted = 0;
    while emitted < len {
        let size = max_fragment.min(len - emitted);
        if slots.len() == MAX_FRAGMENTS {
            return Err(PlanError::TooLarge(len));
        }
        slots.push(PlannedSlot {
            offset: (emitted / 8) as u8,
            size: size as u16,
        });
        emitted += size;
    }
    Ok(Plan::Fragments(slots))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_datagram_bypasses() {
        // 80 octets with 11 octets of framing fit a 127-octet frame.
        assert_eq!(plan(80, 11, 4, false), Ok(Plan::Bypass));
    }

    #[test]
    fn big_flag_forces_fragmentation() {
        match plan(80, 11, 4, true) {
            Ok(Plan::Fragments(slots)) => assert_eq!(slots.len(), 1),
            other => panic!("expected fragments, got {other:?}"),
        }
    }

    #[test]
    fn three_fragment_plan() {
        // 250 octets, 11 octets of framing: ((127-11-5)/8)*8 = 104 per
        // fragment, so 104 + 104 + 42.
        let slots = match plan(250, 11, 4, false) {
            Ok(Plan::Fragments(slots)) => slots,
            other => panic!("expected fragments, got {other:?}"),
        };
        assert_eq!(
            slots,
            vec![
                PlannedSlot { offset: 0, size: 104 },
                PlannedSlot { offset: 13, size: 104 },
                PlannedSlot { offset: 26, size: 42 },
            ]
        );
    }

    #[test]
    fn all_but_last_are_8_aligned() {
        let slots = match plan(1000, 21, 4, false) {
            Ok(Plan::Fragments(slots)) => slots,
            other => panic!("expected fragments, got {other:?}"),
        };
        let total: usize = slots.iter().map(|s| s.size as usize).sum();
        assert_eq!(total, 1000);
        for window in slots.windows(2) {
            assert_eq!(window[0].size % 8, 0);
            assert_eq!(
                window[1].offset as usize,
                window[0].offset as usize + window[0].size as usize / 8
            );
        }
    }

    #[test]
    fn oversized_header_is_unsupported() {
        // Fragment capacity with 11 octets of framing is 104.
        assert_eq!(plan(250, 11, 105, false), Err(PlanError::Unsupported));
    }

    #[test]
    fn oversized_datagram_is_rejected() {
        assert_eq!(plan(1281, 11, 4, false), Err(PlanError::TooLarge(1281)));
    }

    #[test]
    fn overhead_eating_the_frame_is_rejected() {
        assert_eq!(plan(250, 125, 4, false), Err(PlanError::NoRoom(125)));
    }
}
