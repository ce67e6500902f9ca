//! The 6LoWPAN fragmentation and reassembly engine (RFC 4944).
//!
//! [`Fragmentation`] sits between a network layer producing IPv6-sized
//! datagrams and an IEEE 802.15.4 link whose frames top out at 127
//! octets. Outbound datagrams are split into link fragments; inbound
//! fragments are collected per datagram and, once the upper layer has
//! inspected the first fragment, assembled locally, forwarded to the
//! next hop without full reassembly, or relayed to the serial host.
//!
//! All datagram state lives in the fragment queue behind one mutex. The
//! queue itself never calls out: it hands back effect lists that this
//! facade executes with the lock released, so pool allocation, radio
//! submission, and upper-layer callbacks can re-enter freely.

pub mod header;
pub mod planner;

mod context;
mod queue;

pub use queue::{
    ActionRequest, DatagramHandle, FirstFragment, FragError, SendError, BIG_PACKET_THRESHOLD,
    FRAGMENT_TX_MAX_PACKETS, FRAG_QUEUE_LEN,
};

use crate::bridge::{BridgeRecord, Openbridge};
use crate::link::{LinkLayer, LinkMeta, LinkSendError, Mac, SendOutcome};
use crate::packet::{Owner, PacketBuf, PacketId};
use crate::pool::PacketPool;
use crate::timer::TimerService;
use crate::FxDashMap;
use queue::{Effect, FragQueue};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Reassembly timeout, per RFC 4944's suggestion.
pub const FRAGMENT_TIMEOUT: Duration = Duration::from_secs(60);

/// The header compression layer above the engine.
pub trait IphcLayer: Send + Sync {
    /// A frame that carries no fragment header.
    fn receive(&self, packet: PacketBuf, meta: LinkMeta);

    /// The first fragment of a new inbound datagram. The implementor
    /// inspects (and may rewrite) the compressed header, then answers
    /// with [`Fragmentation::assign_action`]; until then the engine
    /// buffers the datagram's remaining fragments.
    fn receive_first_fragment(&self, frag1: FirstFragment);

    /// Terminal transmit status for a datagram this layer submitted.
    fn send_done(&self, packet: PacketBuf, result: Result<(), LinkSendError>);
}

/// The layer reassembled datagrams are delivered to.
pub trait UpperLayer: Send + Sync {
    fn receive_datagram(&self, datagram: PacketBuf, meta: LinkMeta);
}

/// Runtime configuration of the engine.
#[derive(Debug, Clone, Copy)]
pub struct FragConfig {
    /// The local EUI-64, used as the source of outbound contexts.
    pub local: Mac,
    /// Reassembly timeout.
    pub timeout: Duration,
    /// Per-context cap on in-flight link fragments.
    pub tx_max: usize,
    /// Fixed datagram-tag seed; drawn from the RNG when absent.
    pub tag_seed: Option<u16>,
}

impl FragConfig {
    pub fn new(local: Mac) -> Self {
        Self {
            local,
            timeout: FRAGMENT_TIMEOUT,
            tx_max: FRAGMENT_TX_MAX_PACKETS,
            tag_seed: None,
        }
    }

    pub fn with_tag_seed(mut self, seed: u16) -> Self {
        self.tag_seed = Some(seed);
        self
    }
}

/// A rejected outbound datagram, handed back with the reason.
#[derive(Debug)]
pub struct SendRejected {
    pub packet: PacketBuf,
    pub error: SendError,
}

/// Where a frame handed to the link layer came from.
enum Inflight {
    /// An unfragmented frame sent on behalf of the layer above.
    Direct,
    /// A link fragment owned by a queue context.
    Slot { handle: DatagramHandle, slot: usize },
}

/// The engine facade. Construct with [`Fragmentation::new`]; the link
/// layer reports completions through [`Fragmentation::send_done`].
pub struct Fragmentation {
    this: Weak<Fragmentation>,
    queue: Mutex<FragQueue>,
    pool: Arc<PacketPool>,
    link: Arc<dyn LinkLayer>,
    iphc: Arc<dyn IphcLayer>,
    upper: Arc<dyn UpperLayer>,
    bridge: Arc<dyn Openbridge>,
    timers: Arc<dyn TimerService>,
    timeout: Duration,
    inflight: FxDashMap<PacketId, Inflight>,
}

impl Fragmentation {
    pub fn new(
        config: FragConfig,
        pool: Arc<PacketPool>,
        link: Arc<dyn LinkLayer>,
        iphc: Arc<dyn IphcLayer>,
        upper: Arc<dyn UpperLayer>,
        bridge: Arc<dyn Openbridge>,
        timers: Arc<dyn TimerService>,
    ) -> Arc<Self> {
        let tag_seed = config.tag_seed.unwrap_or_else(rand::random);
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            queue: Mutex::new(FragQueue::new(config.local, tag_seed, config.tx_max)),
            pool,
            link,
            iphc,
            upper,
            bridge,
            timers,
            timeout: config.timeout,
            inflight: FxDashMap::default(),
        })
    }

    /// Submits an outbound datagram whose first `header_len` octets are
    /// the compressed IPv6 header. Small datagrams bypass fragmentation
    /// and go straight to the link.
    pub fn send(
        &self,
        datagram: PacketBuf,
        next_hop: Mac,
        header_len: usize,
    ) -> Result<(), SendRejected> {
        let overhead = self.link.header_size(next_hop);
        let result = self
            .queue
            .lock()
            .unwrap()
            .send(datagram, next_hop, header_len, overhead);
        match result {
            Ok(effects) => {
                self.run(effects);
                Ok(())
            }
            Err((packet, error)) => Err(SendRejected { packet, error }),
        }
    }

    /// Entry point for every frame the link layer delivers.
    /// Non-fragments pass through to the compression layer untouched.
    pub fn receive(&self, packet: PacketBuf, meta: LinkMeta) {
        let effects = self.queue.lock().unwrap().receive(packet, meta);
        self.run(effects);
    }

    /// The upper layer's verdict on a datagram it saw the first fragment
    /// of. Replaces any previously assigned action.
    pub fn assign_action(&self, handle: DatagramHandle, request: ActionRequest) {
        let effects = self.queue.lock().unwrap().assign_action(handle, request);
        self.run(effects);
    }

    /// The link layer finished transmitting `packet`. Every frame the
    /// engine submitted comes back through here exactly once.
    pub fn send_done(&self, packet: PacketBuf, result: Result<(), LinkSendError>) {
        match self.inflight.remove(&packet.id()) {
            Some((_, Inflight::Slot { handle, slot })) => {
                let effects = self
                    .queue
                    .lock()
                    .unwrap()
                    .send_done(handle, slot, packet, result);
                self.run(effects);
            }
            Some((_, Inflight::Direct)) => self.direct_done(packet, result),
            None => {
                self.queue.lock().unwrap().unexpected_send_done();
                self.pool.free(packet);
            }
        }
    }

    /// A neighbor left the network: discard every partially reassembled
    /// datagram from it and every untransmitted fragment to it.
    pub fn disassociated(&self, neighbor: Mac) {
        let effects = self.queue.lock().unwrap().disassociated(neighbor);
        self.run(effects);
    }

    /// Occurrences of `error` on the serial-error channel since boot.
    pub fn error_count(&self, error: FragError) -> u32 {
        self.queue.lock().unwrap().error_count(error)
    }

    /// Contexts currently unallocated.
    pub fn free_contexts(&self) -> usize {
        self.queue.lock().unwrap().free_count()
    }

    fn reassembly_timeout(&self, handle: DatagramHandle) {
        let effects = self.queue.lock().unwrap().on_timeout(handle);
        self.run(effects);
    }

    fn direct_done(&self, packet: PacketBuf, result: Result<(), LinkSendError>) {
        if packet.creator() == Owner::Bridge {
            let (bytes, len) = BridgeRecord::Outcome {
                sent: result.is_ok(),
                tag: 0,
            }
            .encode();
            self.bridge.notify(&bytes[..len]);
            self.pool.free(packet);
        } else {
            self.iphc.send_done(packet, result);
        }
    }

    /// Executes deferred queue work with the lock released. Steps that
    /// produce follow-up state transitions re-enter the queue and splice
    /// the new effects onto the worklist.
    fn run(&self, effects: Vec<Effect>) {
        let mut pending = VecDeque::from(effects);
        while let Some(effect) = pending.pop_front() {
            match effect {
                Effect::DeliverPlain { packet, meta } => self.iphc.receive(packet, meta),
                Effect::DeliverFirstFragment { frag1 } => {
                    self.iphc.receive_first_fragment(frag1)
                }
                Effect::DeliverDatagram { datagram, meta } => {
                    self.upper.receive_datagram(datagram, meta)
                }
                Effect::ReservePacket { handle, slot } => {
                    let packet = self.pool.get_free(Owner::Fragmentation);
                    let more = self
                        .queue
                        .lock()
                        .unwrap()
                        .packet_reserved(handle, slot, packet);
                    pending.extend(more);
                }
                Effect::GrowMsg {
                    handle,
                    mut msg,
                    new_len,
                } => {
                    let ok = self.pool.to_big(&mut msg, new_len as usize);
                    let more = self.queue.lock().unwrap().msg_grown(handle, msg, ok);
                    pending.extend(more);
                }
                Effect::LinkSend {
                    handle,
                    slot,
                    packet,
                    dst,
                } => {
                    let id = packet.id();
                    self.inflight.insert(id, Inflight::Slot { handle, slot });
                    if let SendOutcome::Rejected(packet) = self.link.send(packet, dst) {
                        self.inflight.remove(&id);
                        let more = self
                            .queue
                            .lock()
                            .unwrap()
                            .link_submit_failed(handle, slot, packet);
                        pending.extend(more);
                    }
                }
                Effect::LinkSendDirect { packet, dst } => {
                    let id = packet.id();
                    self.inflight.insert(id, Inflight::Direct);
                    if let SendOutcome::Rejected(packet) = self.link.send(packet, dst) {
                        self.inflight.remove(&id);
                        self.direct_done(packet, Err(LinkSendError));
                    }
                }
                Effect::SendDoneUpper { packet, result } => self.iphc.send_done(packet, result),
                Effect::BridgeFragment { packet } => self.bridge.receive_fragment(packet),
                Effect::BridgeNotify { record } => {
                    let (bytes, len) = record.encode();
                    self.bridge.notify(&bytes[..len]);
                }
                Effect::StartTimer { handle } => {
                    let weak = self.this.clone();
                    let id = self.timers.start(
                        self.timeout,
                        Box::new(move || {
                            if let Some(engine) = weak.upgrade() {
                                engine.reassembly_timeout(handle);
                            }
                        }),
                    );
                    let more = self.queue.lock().unwrap().timer_started(handle, id);
                    pending.extend(more);
                }
                Effect::StopTimer { id } => self.timers.stop(id),
                Effect::FreePacket { packet } => self.pool.free(packet),
            }
        }
    }
}
