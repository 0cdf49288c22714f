//! Wire codec for the mesh packet format.
//!
//! Every frame starts with the 20-byte base header, followed by one
//! packet-type specific extension header and an optional payload. All
//! multi-byte fields are little-endian with no padding between fields.

use crate::error::RouterError;
use crate::types::{NodeId, PacketId, UserId};

/// Size of the base header on the wire.
pub const BASE_HEADER_LEN: usize = 20;

/// Offset of the flags byte inside an encoded base header.
pub const FLAGS_OFFSET: usize = 17;

/// Flag bits of the base header.
///
/// Bits 0-1 form the gateway subfield (see [`GatewayRole`]); the remaining
/// bits are independent and must only ever be tested with masks.
pub mod flags {
    /// Mask covering the gateway subfield.
    pub const GATEWAY_MASK: u8 = 0x03;
    /// Subfield value: relayed in from an Internet gateway.
    pub const FROM_GATEWAY: u8 = 0x01;
    /// Subfield value: destined for the closest Internet gateway.
    pub const TO_GATEWAY: u8 = 0x02;
    /// Subfield value: the origin announces itself as a gateway.
    pub const I_AM_GATEWAY: u8 = 0x03;
    /// Sender expects a per-hop acknowledgement.
    pub const REQ_ACK: u8 = 0x04;
    /// Payload is end-to-end encrypted between users.
    pub const ENC_MSG: u8 = 0x08;
    /// End-to-end encrypted payload that also expects an acknowledgement.
    pub const ENC_ACK: u8 = ENC_MSG | REQ_ACK;
    /// Frame body is wrapped in the link-level AEAD envelope.
    pub const ENCRYPTED: u8 = 0x80;
}

/// Decoded gateway subfield of the flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayRole {
    None,
    FromGateway,
    ToGateway,
    IAmGateway,
}

impl GatewayRole {
    pub fn from_flags(f: u8) -> Self {
        match f & flags::GATEWAY_MASK {
            flags::FROM_GATEWAY => Self::FromGateway,
            flags::TO_GATEWAY => Self::ToGateway,
            flags::I_AM_GATEWAY => Self::IAmGateway,
            _ => Self::None,
        }
    }
}

/// Packet type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    RouteRequest = 0x01,
    RouteReply = 0x02,
    RouteError = 0x03,
    Data = 0x04,
    BroadcastInfo = 0x06,
    Ack = 0x07,
    UserRequest = 0x0F,
    UserReply = 0x10,
    UserError = 0x11,
    UserMessage = 0x12,
    PubKeyRequest = 0x13,
    PubKeyResponse = 0x14,
    MoveUserRequest = 0x15,
}

impl PacketType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x01 => Self::RouteRequest,
            0x02 => Self::RouteReply,
            0x03 => Self::RouteError,
            0x04 => Self::Data,
            0x06 => Self::BroadcastInfo,
            0x07 => Self::Ack,
            0x0F => Self::UserRequest,
            0x10 => Self::UserReply,
            0x11 => Self::UserError,
            0x12 => Self::UserMessage,
            0x13 => Self::PubKeyRequest,
            0x14 => Self::PubKeyResponse,
            0x15 => Self::MoveUserRequest,
            _ => return None,
        })
    }
}

fn short(need: usize, have: usize) -> RouterError {
    RouterError::MalformedHeader { need, have }
}

fn get_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

fn get_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(buf[off..off + 2].try_into().unwrap())
}

/// The fixed header at the front of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseHeader {
    /// Next-hop node for unicast, [`crate::types::BROADCAST_ADDR`] for floods.
    pub dest_node: NodeId,
    /// The node that put this frame on the air last.
    pub prev_hop: NodeId,
    /// The node that created the packet; constant across hops.
    pub origin_node: NodeId,
    /// Random identifier chosen by the origin; constant across hops.
    pub packet_id: PacketId,
    /// Raw packet type byte; see [`PacketType::from_u8`].
    pub packet_type: u8,
    pub flags: u8,
    pub hop_count: u8,
    pub reserved: u8,
}

impl BaseHeader {
    pub fn encode(&self) -> [u8; BASE_HEADER_LEN] {
        let mut out = [0u8; BASE_HEADER_LEN];
        out[0..4].copy_from_slice(&self.dest_node.to_le_bytes());
        out[4..8].copy_from_slice(&self.prev_hop.to_le_bytes());
        out[8..12].copy_from_slice(&self.origin_node.to_le_bytes());
        out[12..16].copy_from_slice(&self.packet_id.to_le_bytes());
        out[16] = self.packet_type;
        out[17] = self.flags;
        out[18] = self.hop_count;
        out[19] = self.reserved;
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RouterError> {
        if buf.len() < BASE_HEADER_LEN {
            return Err(short(BASE_HEADER_LEN, buf.len()));
        }
        Ok(Self {
            dest_node: get_u32(buf, 0),
            prev_hop: get_u32(buf, 4),
            origin_node: get_u32(buf, 8),
            packet_id: get_u32(buf, 12),
            packet_type: buf[16],
            flags: buf[17],
            hop_count: buf[18],
            reserved: buf[19],
        })
    }
}

/// Extension header for `RouteRequest`: the node we need a route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteRequestHeader {
    pub target_node: NodeId,
}

impl RouteRequestHeader {
    pub const WIRE_LEN: usize = 4;

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        self.target_node.to_le_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RouterError> {
        if buf.len() < Self::WIRE_LEN {
            return Err(short(Self::WIRE_LEN, buf.len()));
        }
        Ok(Self {
            target_node: get_u32(buf, 0),
        })
    }
}

/// Extension header for `RouteReply`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteReplyHeader {
    /// Destination the advertised route leads to.
    pub target_node: NodeId,
    /// Route lifetime; unused on this network, always zero.
    pub lifetime: u16,
    /// Hop count of the advertised route at the replying node.
    pub num_hops: u8,
}

impl RouteReplyHeader {
    pub const WIRE_LEN: usize = 7;

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[0..4].copy_from_slice(&self.target_node.to_le_bytes());
        out[4..6].copy_from_slice(&self.lifetime.to_le_bytes());
        out[6] = self.num_hops;
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RouterError> {
        if buf.len() < Self::WIRE_LEN {
            return Err(short(Self::WIRE_LEN, buf.len()));
        }
        Ok(Self {
            target_node: get_u32(buf, 0),
            lifetime: get_u16(buf, 4),
            num_hops: buf[6],
        })
    }
}

/// Extension header for `RouteError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteErrorHeader {
    /// Node reporting the break.
    pub reporter_node: NodeId,
    /// Node the reporter could not reach.
    pub broken_node: NodeId,
    /// Final destination of the packet that failed.
    pub original_dest: NodeId,
    /// Packet id of the packet that failed.
    pub original_packet_id: PacketId,
    /// Origin of the packet that failed; the error travels back to it.
    pub origin_node: NodeId,
}

impl RouteErrorHeader {
    pub const WIRE_LEN: usize = 20;

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[0..4].copy_from_slice(&self.reporter_node.to_le_bytes());
        out[4..8].copy_from_slice(&self.broken_node.to_le_bytes());
        out[8..12].copy_from_slice(&self.original_dest.to_le_bytes());
        out[12..16].copy_from_slice(&self.original_packet_id.to_le_bytes());
        out[16..20].copy_from_slice(&self.origin_node.to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RouterError> {
        if buf.len() < Self::WIRE_LEN {
            return Err(short(Self::WIRE_LEN, buf.len()));
        }
        Ok(Self {
            reporter_node: get_u32(buf, 0),
            broken_node: get_u32(buf, 4),
            original_dest: get_u32(buf, 8),
            original_packet_id: get_u32(buf, 12),
            origin_node: get_u32(buf, 16),
        })
    }
}

/// Extension header for `Ack`: echoes the packet id being acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckHeader {
    pub original_packet_id: PacketId,
}

impl AckHeader {
    pub const WIRE_LEN: usize = 4;

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        self.original_packet_id.to_le_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RouterError> {
        if buf.len() < Self::WIRE_LEN {
            return Err(short(Self::WIRE_LEN, buf.len()));
        }
        Ok(Self {
            original_packet_id: get_u32(buf, 0),
        })
    }
}

/// Extension header for `Data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    /// Final destination node, as opposed to the per-hop base destination.
    pub final_dest: NodeId,
    /// Original sender, mirrored from the base header.
    pub origin_node: NodeId,
}

impl DataHeader {
    pub const WIRE_LEN: usize = 8;

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[0..4].copy_from_slice(&self.final_dest.to_le_bytes());
        out[4..8].copy_from_slice(&self.origin_node.to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RouterError> {
        if buf.len() < Self::WIRE_LEN {
            return Err(short(Self::WIRE_LEN, buf.len()));
        }
        Ok(Self {
            final_dest: get_u32(buf, 0),
            origin_node: get_u32(buf, 4),
        })
    }
}

/// Extension header and body for `BroadcastInfo`.
///
/// Carries only the *difference* of the local user set since the previous
/// broadcast: `added` then `removed` user ids follow the fixed part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffBroadcastHeader {
    /// Origin, mirrored from the base header.
    pub origin_node: NodeId,
    pub added: Vec<UserId>,
    pub removed: Vec<UserId>,
}

impl DiffBroadcastHeader {
    /// Size of the fixed part preceding the id lists.
    pub const FIXED_LEN: usize = 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::FIXED_LEN + 4 * (self.added.len() + self.removed.len()));
        out.extend_from_slice(&self.origin_node.to_le_bytes());
        out.extend_from_slice(&(self.added.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.removed.len() as u16).to_le_bytes());
        for uid in &self.added {
            out.extend_from_slice(&uid.to_le_bytes());
        }
        for uid in &self.removed {
            out.extend_from_slice(&uid.to_le_bytes());
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RouterError> {
        if buf.len() < Self::FIXED_LEN {
            return Err(short(Self::FIXED_LEN, buf.len()));
        }
        let origin_node = get_u32(buf, 0);
        let num_added = get_u16(buf, 4) as usize;
        let num_removed = get_u16(buf, 6) as usize;
        let need = Self::FIXED_LEN + 4 * (num_added + num_removed);
        if buf.len() < need {
            return Err(short(need, buf.len()));
        }
        let mut off = Self::FIXED_LEN;
        let mut added = Vec::with_capacity(num_added);
        for _ in 0..num_added {
            added.push(get_u32(buf, off));
            off += 4;
        }
        let mut removed = Vec::with_capacity(num_removed);
        for _ in 0..num_removed {
            removed.push(get_u32(buf, off));
            off += 4;
        }
        Ok(Self {
            origin_node,
            added,
            removed,
        })
    }
}

/// Extension header for `UserRequest`: who is looking for which user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserRequestHeader {
    pub origin_node: NodeId,
    pub user: UserId,
}

impl UserRequestHeader {
    pub const WIRE_LEN: usize = 8;

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[0..4].copy_from_slice(&self.origin_node.to_le_bytes());
        out[4..8].copy_from_slice(&self.user.to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RouterError> {
        if buf.len() < Self::WIRE_LEN {
            return Err(short(Self::WIRE_LEN, buf.len()));
        }
        Ok(Self {
            origin_node: get_u32(buf, 0),
            user: get_u32(buf, 4),
        })
    }
}

/// Extension header for `UserReply`: where a user lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserReplyHeader {
    pub origin_node: NodeId,
    /// The user's current home node.
    pub home_node: NodeId,
    pub user: UserId,
    /// Unused on this network, always zero.
    pub lifetime: u16,
    pub num_hops: u8,
}

impl UserReplyHeader {
    pub const WIRE_LEN: usize = 15;

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[0..4].copy_from_slice(&self.origin_node.to_le_bytes());
        out[4..8].copy_from_slice(&self.home_node.to_le_bytes());
        out[8..12].copy_from_slice(&self.user.to_le_bytes());
        out[12..14].copy_from_slice(&self.lifetime.to_le_bytes());
        out[14] = self.num_hops;
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RouterError> {
        if buf.len() < Self::WIRE_LEN {
            return Err(short(Self::WIRE_LEN, buf.len()));
        }
        Ok(Self {
            origin_node: get_u32(buf, 0),
            home_node: get_u32(buf, 4),
            user: get_u32(buf, 8),
            lifetime: get_u16(buf, 12),
            num_hops: buf[14],
        })
    }
}

/// Extension header for `UserError`: a user was not where we thought.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserErrorHeader {
    pub user: UserId,
    /// The node that claims (and denies) hosting the user.
    pub home_node: NodeId,
    /// Origin of the failed user message.
    pub origin_node: NodeId,
    pub original_packet_id: PacketId,
}

impl UserErrorHeader {
    pub const WIRE_LEN: usize = 16;

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[0..4].copy_from_slice(&self.user.to_le_bytes());
        out[4..8].copy_from_slice(&self.home_node.to_le_bytes());
        out[8..12].copy_from_slice(&self.origin_node.to_le_bytes());
        out[12..16].copy_from_slice(&self.original_packet_id.to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RouterError> {
        if buf.len() < Self::WIRE_LEN {
            return Err(short(Self::WIRE_LEN, buf.len()));
        }
        Ok(Self {
            user: get_u32(buf, 0),
            home_node: get_u32(buf, 4),
            origin_node: get_u32(buf, 8),
            original_packet_id: get_u32(buf, 12),
        })
    }
}

/// Extension header for `UserMessage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserMessageHeader {
    pub from_user: UserId,
    pub to_user: UserId,
    /// Home node of `to_user` as resolved by the sender.
    pub to_node: NodeId,
    /// Original sender node, mirrored from the base header.
    pub origin_node: NodeId,
}

impl UserMessageHeader {
    pub const WIRE_LEN: usize = 16;

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[0..4].copy_from_slice(&self.from_user.to_le_bytes());
        out[4..8].copy_from_slice(&self.to_user.to_le_bytes());
        out[8..12].copy_from_slice(&self.to_node.to_le_bytes());
        out[12..16].copy_from_slice(&self.origin_node.to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RouterError> {
        if buf.len() < Self::WIRE_LEN {
            return Err(short(Self::WIRE_LEN, buf.len()));
        }
        Ok(Self {
            from_user: get_u32(buf, 0),
            to_user: get_u32(buf, 4),
            to_node: get_u32(buf, 8),
            origin_node: get_u32(buf, 12),
        })
    }
}

/// Extension header for `PubKeyRequest`. Carries the sender's own public
/// key so the responder can cache it opportunistically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubKeyRequestHeader {
    pub sender_user: UserId,
    pub target_user: UserId,
    pub public_key: [u8; 32],
}

impl PubKeyRequestHeader {
    pub const WIRE_LEN: usize = 40;

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[0..4].copy_from_slice(&self.sender_user.to_le_bytes());
        out[4..8].copy_from_slice(&self.target_user.to_le_bytes());
        out[8..40].copy_from_slice(&self.public_key);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RouterError> {
        if buf.len() < Self::WIRE_LEN {
            return Err(short(Self::WIRE_LEN, buf.len()));
        }
        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&buf[8..40]);
        Ok(Self {
            sender_user: get_u32(buf, 0),
            target_user: get_u32(buf, 4),
            public_key,
        })
    }
}

/// Extension header for `PubKeyResponse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubKeyResponseHeader {
    pub user: UserId,
    pub public_key: [u8; 32],
}

impl PubKeyResponseHeader {
    pub const WIRE_LEN: usize = 36;

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[0..4].copy_from_slice(&self.user.to_le_bytes());
        out[4..36].copy_from_slice(&self.public_key);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RouterError> {
        if buf.len() < Self::WIRE_LEN {
            return Err(short(Self::WIRE_LEN, buf.len()));
        }
        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&buf[4..36]);
        Ok(Self {
            user: get_u32(buf, 0),
            public_key,
        })
    }
}

/// Extension header for `MoveUserRequest`: `user` now lives at the origin
/// node; `old_home` must hand over the buffered inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveUserRequestHeader {
    pub user: UserId,
    pub old_home: NodeId,
}

impl MoveUserRequestHeader {
    pub const WIRE_LEN: usize = 8;

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[0..4].copy_from_slice(&self.user.to_le_bytes());
        out[4..8].copy_from_slice(&self.old_home.to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RouterError> {
        if buf.len() < Self::WIRE_LEN {
            return Err(short(Self::WIRE_LEN, buf.len()));
        }
        Ok(Self {
            user: get_u32(buf, 0),
            old_home: get_u32(buf, 4),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BROADCAST_ADDR;

    fn base() -> BaseHeader {
        BaseHeader {
            dest_node: 0x11223344,
            prev_hop: 0x55667788,
            origin_node: 0x99AABBCC,
            packet_id: 0xDEADBEEF,
            packet_type: PacketType::Data as u8,
            flags: flags::REQ_ACK,
            hop_count: 3,
            reserved: 0,
        }
    }

    #[test]
    fn base_header_layout_is_little_endian() {
        let bytes = base().encode();
        assert_eq!(bytes.len(), BASE_HEADER_LEN);
        assert_eq!(&bytes[0..4], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(&bytes[12..16], &[0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(bytes[16], 0x04);
        assert_eq!(bytes[FLAGS_OFFSET], flags::REQ_ACK);
        assert_eq!(bytes[18], 3);
        assert_eq!(BaseHeader::decode(&bytes).unwrap(), base());
    }

    #[test]
    fn base_header_too_short() {
        let bytes = base().encode();
        assert!(matches!(
            BaseHeader::decode(&bytes[..BASE_HEADER_LEN - 1]),
            Err(RouterError::MalformedHeader { .. })
        ));
    }

    #[test]
    fn extension_headers_symmetric() {
        let rreq = RouteRequestHeader { target_node: 200 };
        assert_eq!(RouteRequestHeader::decode(&rreq.encode()).unwrap(), rreq);

        let rrep = RouteReplyHeader {
            target_node: 5656,
            lifetime: 0,
            num_hops: 7,
        };
        assert_eq!(RouteReplyHeader::decode(&rrep.encode()).unwrap(), rrep);

        let rerr = RouteErrorHeader {
            reporter_node: 400,
            broken_node: 300,
            original_dest: 300,
            original_packet_id: 555_555,
            origin_node: 100,
        };
        assert_eq!(RouteErrorHeader::decode(&rerr.encode()).unwrap(), rerr);

        let umsg = UserMessageHeader {
            from_user: 1,
            to_user: 2,
            to_node: 200,
            origin_node: 100,
        };
        assert_eq!(UserMessageHeader::decode(&umsg.encode()).unwrap(), umsg);

        let urep = UserReplyHeader {
            origin_node: 100,
            home_node: 200,
            user: 2,
            lifetime: 0,
            num_hops: 1,
        };
        assert_eq!(UserReplyHeader::decode(&urep.encode()).unwrap(), urep);

        let pk = PubKeyRequestHeader {
            sender_user: 1,
            target_user: 2,
            public_key: [0xAB; 32],
        };
        assert_eq!(PubKeyRequestHeader::decode(&pk.encode()).unwrap(), pk);
    }

    #[test]
    fn diff_broadcast_counts_must_fit() {
        let diff = DiffBroadcastHeader {
            origin_node: 42,
            added: vec![10, 11, 12],
            removed: vec![20],
        };
        let bytes = diff.encode();
        assert_eq!(bytes.len(), DiffBroadcastHeader::FIXED_LEN + 16);
        assert_eq!(DiffBroadcastHeader::decode(&bytes).unwrap(), diff);

        // Declared counts larger than the buffer are rejected.
        let truncated = &bytes[..bytes.len() - 4];
        assert!(matches!(
            DiffBroadcastHeader::decode(truncated),
            Err(RouterError::MalformedHeader { .. })
        ));
    }

    #[test]
    fn gateway_subfield_ignores_other_bits() {
        let f = flags::I_AM_GATEWAY | flags::REQ_ACK | flags::ENCRYPTED;
        assert_eq!(GatewayRole::from_flags(f), GatewayRole::IAmGateway);
        assert_eq!(
            GatewayRole::from_flags(flags::REQ_ACK | flags::ENC_MSG),
            GatewayRole::None
        );
        let broadcast = BaseHeader {
            dest_node: BROADCAST_ADDR,
            flags: flags::ENC_ACK,
            ..base()
        };
        assert_ne!(broadcast.flags & flags::REQ_ACK, 0);
        assert_ne!(broadcast.flags & flags::ENC_MSG, 0);
    }
}
