//! The bounded packet-buffer pool.
//!
//! Two tiers of buffers: small ones sized for a single IEEE 802.15.4
//! frame and big ones sized for a complete reassembled datagram. A small
//! buffer can be migrated to the big tier in place with
//! [`PacketPool::to_big`]; the buffer keeps its identity and payload.

use crate::packet::{Owner, PacketBuf};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex,
};

/// Headroom left in front of every payload for fragment headers and for
/// headers stripped during inspection.
const HEADROOM: usize = 32;

struct Tiers {
    small_free: usize,
    big_free: usize,
}

/// A bounded, two-tier packet-buffer allocator.
pub struct PacketPool {
    small_capacity: usize,
    big_capacity: usize,
    small_total: usize,
    big_total: usize,
    tiers: Mutex<Tiers>,
    next_id: AtomicU64,
}

impl PacketPool {
    /// Creates a pool with `small` frame-sized buffers of `small_payload`
    /// usable payload octets and `big` datagram-sized buffers of
    /// `big_payload` octets.
    pub fn new(small: usize, small_payload: usize, big: usize, big_payload: usize) -> Self {
        Self {
            small_capacity: small_payload + HEADROOM,
            big_capacity: big_payload + HEADROOM,
            small_total: small,
            big_total: big,
            tiers: Mutex::new(Tiers {
                small_free: small,
                big_free: big,
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Hands out a small-tier buffer, or `None` when the tier is empty.
    pub fn get_free(&self, owner: Owner) -> Option<PacketBuf> {
        {
            let mut tiers = self.tiers.lock().unwrap();
            if tiers.small_free == 0 {
                tracing::debug!("packet pool exhausted");
                return None;
            }
            tiers.small_free -= 1;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Some(PacketBuf::new(id, owner, self.small_capacity, HEADROOM))
    }

    /// Returns a buffer to its tier.
    pub fn free(&self, packet: PacketBuf) {
        let mut tiers = self.tiers.lock().unwrap();
        if packet.is_big() {
            tiers.big_free += 1;
        } else {
            tiers.small_free += 1;
        }
    }

    /// Migrates `packet` to the big tier so that it can hold `new_len`
    /// payload octets. Same identity, larger capacity, payload preserved.
    /// Returns false (leaving the buffer untouched) when the big tier is
    /// empty or `new_len` does not fit it.
    pub fn to_big(&self, packet: &mut PacketBuf, new_len: usize) -> bool {
        if packet.is_big() {
            return new_len + HEADROOM <= self.big_capacity;
        }
        if new_len + HEADROOM > self.big_capacity {
            return false;
        }
        {
            let mut tiers = self.tiers.lock().unwrap();
            if tiers.big_free == 0 {
                tracing::debug!("big packet pool exhausted");
                return false;
            }
            tiers.big_free -= 1;
            tiers.small_free += 1;
        }
        packet.grow(self.big_capacity);
        true
    }

    /// How many buffers are currently out of the pool. The conservation
    /// invariant: this equals the number of buffers referenced by live
    /// contexts and collaborators.
    pub fn in_use(&self) -> usize {
        let tiers = self.tiers.lock().unwrap();
        (self.small_total - tiers.small_free) + (self.big_total - tiers.big_free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_allocation() {
        let pool = PacketPool::new(2, 127, 1, 1280);
        let a = pool.get_free(Owner::App).unwrap();
        let b = pool.get_free(Owner::App).unwrap();
        assert!(pool.get_free(Owner::App).is_none());
        assert_eq!(pool.in_use(), 2);
        assert_ne!(a.id(), b.id());
        pool.free(a);
        pool.free(b);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn to_big_preserves_identity_and_payload() {
        let pool = PacketPool::new(2, 127, 1, 1280);
        let mut packet = pool.get_free(Owner::App).unwrap();
        packet.extend(b"datagram head").unwrap();
        let id = packet.id();
        assert!(pool.to_big(&mut packet, 1000));
        assert_eq!(packet.id(), id);
        assert_eq!(packet.to_vec(), b"datagram head");
        // The small credit came back, the big credit is out.
        assert!(pool.get_free(Owner::App).is_some());
        assert_eq!(pool.in_use(), 2);
    }

    #[test]
    fn to_big_fails_when_tier_is_empty() {
        let pool = PacketPool::new(2, 127, 0, 1280);
        let mut packet = pool.get_free(Owner::App).unwrap();
        assert!(!pool.to_big(&mut packet, 1000));
        assert!(!packet.is_big());
        pool.free(packet);
        assert_eq!(pool.in_use(), 0);
    }
}
