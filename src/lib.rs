//! A 6LoWPAN fragmentation and reassembly engine, as described by
//! [RFC 4944](https://www.rfc-editor.org/rfc/rfc4944).
//!
//! The engine sits between a network layer that produces and consumes
//! IPv6-sized datagrams and an IEEE 802.15.4 link layer whose frames top
//! out at 127 octets. It splits outbound datagrams into link fragments,
//! reassembles inbound fragments, forwards in-flight fragmented
//! datagrams across a multi-hop mesh without full reassembly, relays
//! fragments to a serial-connected host, and enforces the reassembly
//! timeout — all under a fixed budget of contexts and packet buffers.
//!
//! # Organization
//!
//! - [`packet`] and [`pool`] provide the bounded packet-buffer
//!   containers everything else moves around.
//! - [`link`], [`timer`], and [`bridge`] define the interfaces of the
//!   external collaborators: the MAC driver, the timer service, and the
//!   serial host.
//! - [`frag`] is the engine itself: the header codec, the fragment
//!   planner, and the fragment queue with its action dispatcher and
//!   transmission scheduler, fronted by [`Fragmentation`].
//!
//! The upper layer decides the fate of every inbound datagram: after the
//! engine hands it the first fragment, it answers with an
//! [`ActionRequest`](frag::ActionRequest) — assemble locally, forward to
//! the next hop, relay to the host bridge, or cancel.

pub mod bridge;
pub mod frag;
pub mod link;
pub mod packet;
pub mod pool;
pub mod timer;

pub use frag::{ActionRequest, FirstFragment, FragConfig, FragError, Fragmentation, SendError};
pub use link::{LinkMeta, Mac};
pub use packet::PacketBuf;
pub use pool::PacketPool;

use dashmap::DashMap;
use std::hash::BuildHasherDefault;
pub type FxDashMap<K, V> = DashMap<K, V, BuildHasherDefault<rustc_hash::FxHasher>>;
