//! Serial notifications for the host bridge.
//!
//! When fragments are delivered to (or originated by) the serial-connected
//! host, the engine reports their fate with fixed-size records so the host
//! can keep its view of in-flight datagrams consistent.

use crate::link::Mac;
use crate::packet::PacketBuf;

/// Record discriminator: the datagram completed.
pub const NOTIF_SENT: u8 = 0;
/// Record discriminator: the datagram was aborted.
pub const NOTIF_FAIL: u8 = 1;

/// Direction discriminator: traffic arriving from the mesh.
pub const DIR_FROM_MESH: u8 = 1;
/// Direction discriminator: traffic leaving toward the mesh.
pub const DIR_TO_MESH: u8 = 0;

/// A status record destined for the serial channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeRecord {
    /// A datagram that was being relayed from the mesh to the host was
    /// aborted. 14 octets on the wire:
    /// `{FAIL, FROMMESH, tag_be, size_be, src_be}`.
    MeshFail { tag: u16, size: u16, src: Mac },
    /// Outcome of a bridge-originated outbound datagram. 4 octets:
    /// `{outcome, TOMESH, tag_be}`.
    Outcome { sent: bool, tag: u16 },
}

impl BridgeRecord {
    /// Serializes the record. Returns the buffer and the record length.
    pub fn encode(&self) -> ([u8; 14], usize) {
        let mut out = [0; 14];
        match *self {
            BridgeRecord::MeshFail { tag, size, src } => {
                out[0] = NOTIF_FAIL;
                out[1] = DIR_FROM_MESH;
                out[2..4].copy_from_slice(&tag.to_be_bytes());
                out[4..6].copy_from_slice(&size.to_be_bytes());
                out[6..14].copy_from_slice(&src.to_be_bytes());
                (out, 14)
            }
            BridgeRecord::Outcome { sent, tag } => {
                out[0] = if sent { NOTIF_SENT } else { NOTIF_FAIL };
                out[1] = DIR_TO_MESH;
                out[2..4].copy_from_slice(&tag.to_be_bytes());
                (out, 4)
            }
        }
    }
}

/// The serial-connected host that observes the mesh.
pub trait Openbridge: Send + Sync {
    /// Delivers one link fragment, original fragment header included.
    fn receive_fragment(&self, fragment: PacketBuf);

    /// Delivers a status record (see [`BridgeRecord::encode`]).
    fn notify(&self, record: &[u8]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mesh_fail_record_layout() {
        let record = BridgeRecord::MeshFail {
            tag: 0xbeef,
            size: 0x0123,
            src: 0x1122_3344_5566_7788,
        };
        let (bytes, len) = record.encode();
        assert_eq!(len, 14);
        assert_eq!(
            &bytes[..len],
            &[
                NOTIF_FAIL,
                DIR_FROM_MESH,
                0xbe,
                0xef,
                0x01,
                0x23,
                0x11,
                0x22,
                0x33,
                0x44,
                0x55,
                0x66,
                0x77,
                0x88
            ]
        );
    }

    #[test]
    fn outcome_record_layout() {
        let (bytes, len) = BridgeRecord::Outcome {
            sent: true,
            tag: 0x00ff,
        }
        .encode();
        assert_eq!(len, 4);
        assert_eq!(&bytes[..len], &[NOTIF_SENT, DIR_TO_MESH, 0x00, 0xff]);
    }
}
