//! Shared type definitions for the routing core.
//!
//! Contains the identifier newtype aliases, the fixed-size radio frame
//! buffer, the bounded channels that connect the collaborator tasks to the
//! router task, and the event types crossing those channels.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::error::RouterError;

/// Node identifier carried in every base header.
pub type NodeId = u32;
/// Application-level user identifier.
pub type UserId = u32;
/// Per-packet random identifier, constant across the packet's journey.
pub type PacketId = u32;

/// Reserved destination meaning "every node in range".
pub const BROADCAST_ADDR: NodeId = 0xFFFF_FFFF;

/// Maximum on-air frame size in bytes, including headers and the AEAD tag.
pub const MAX_FRAME_LEN: usize = 255;

/// A raw frame as handed to or received from the radio driver.
///
/// Fixed-capacity so frames can cross channels without allocation; `len`
/// tracks the valid prefix of `data`.
#[derive(Clone)]
pub struct RadioFrame {
    data: [u8; MAX_FRAME_LEN],
    len: usize,
}

impl RadioFrame {
    /// Wrap raw bytes, rejecting anything over the on-air limit.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, RouterError> {
        if bytes.len() > MAX_FRAME_LEN {
            return Err(RouterError::FrameTooLarge {
                len: bytes.len(),
                max: MAX_FRAME_LEN,
            });
        }
        let mut data = [0u8; MAX_FRAME_LEN];
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            data,
            len: bytes.len(),
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Shorten the frame, e.g. after stripping the AEAD tag.
    pub fn truncate(&mut self, len: usize) {
        if len < self.len {
            self.len = len;
        }
    }

    /// Append bytes, e.g. the AEAD tag, respecting the on-air limit.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> Result<(), RouterError> {
        let new_len = self.len + bytes.len();
        if new_len > MAX_FRAME_LEN {
            return Err(RouterError::FrameTooLarge {
                len: new_len,
                max: MAX_FRAME_LEN,
            });
        }
        self.data[self.len..new_len].copy_from_slice(bytes);
        self.len = new_len;
        Ok(())
    }
}

impl core::fmt::Debug for RadioFrame {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "RadioFrame({} bytes)", self.len)
    }
}

/// Depth of the inbound frame channel (radio IRQ → router task).
pub const RX_FRAME_QUEUE_SIZE: usize = 16;
/// Bounded channel carrying raw received frames into the router task.
pub type RxFrameQueue =
    embassy_sync::channel::Channel<CriticalSectionRawMutex, RadioFrame, RX_FRAME_QUEUE_SIZE>;
/// Receiver side of the inbound frame channel.
pub type RxFrameQueueReceiver =
    embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, RadioFrame, RX_FRAME_QUEUE_SIZE>;
/// Sender side of the inbound frame channel.
pub type RxFrameQueueSender =
    embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, RadioFrame, RX_FRAME_QUEUE_SIZE>;

/// Depth of the outbound frame channel (router task → radio driver).
pub const TX_FRAME_QUEUE_SIZE: usize = 16;
/// Bounded channel carrying encrypted frames to the radio drive loop.
pub type TxFrameQueue =
    embassy_sync::channel::Channel<CriticalSectionRawMutex, RadioFrame, TX_FRAME_QUEUE_SIZE>;
/// Receiver side of the outbound frame channel.
pub type TxFrameQueueReceiver =
    embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, RadioFrame, TX_FRAME_QUEUE_SIZE>;
/// Sender side of the outbound frame channel.
pub type TxFrameQueueSender =
    embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, RadioFrame, TX_FRAME_QUEUE_SIZE>;

/// Depth of the send-request channel (client bridge → router task).
pub const SEND_REQUEST_QUEUE_SIZE: usize = 16;
/// Bounded channel carrying outbound intents from the client bridge.
pub type SendRequestQueue =
    embassy_sync::channel::Channel<CriticalSectionRawMutex, SendRequest, SEND_REQUEST_QUEUE_SIZE>;
/// Receiver side of the send-request channel.
pub type SendRequestQueueReceiver = embassy_sync::channel::Receiver<
    'static,
    CriticalSectionRawMutex,
    SendRequest,
    SEND_REQUEST_QUEUE_SIZE,
>;
/// Sender side of the send-request channel.
pub type SendRequestQueueSender = embassy_sync::channel::Sender<
    'static,
    CriticalSectionRawMutex,
    SendRequest,
    SEND_REQUEST_QUEUE_SIZE,
>;

/// Outbound intents enqueued by the client bridge.
#[derive(Debug, Clone)]
pub enum SendRequest {
    /// Raw node-to-node payload.
    Data {
        dest: NodeId,
        data: Vec<u8>,
        flags: u8,
    },
    /// User-to-user message, resolved through the user directory.
    UserMessage {
        from_user: UserId,
        to_user: UserId,
        data: Vec<u8>,
        flags: u8,
    },
    /// Ask the mesh for another user's public key, offering ours.
    PubKeyRequest {
        target_user: UserId,
        sender_user: UserId,
    },
    /// Announce that `user` now lives here and pull their inbox from the
    /// previous home node.
    MoveUser { user: UserId, old_home: NodeId },
}

/// How a delivered user message should be presented to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryKind {
    /// Plaintext user payload.
    Plain,
    /// End-to-end encrypted payload (opaque to the router).
    Encrypted,
    /// Relayed in from the Internet uplink.
    Gateway,
}

/// Events pushed to the client bridge.
#[derive(Debug, Clone)]
pub enum Notification {
    /// Node-addressed data arrived for this node.
    NodeData {
        from_node: NodeId,
        data: Vec<u8>,
        packet_id: PacketId,
    },
    /// Broadcast data arrived.
    BroadcastData {
        from_node: NodeId,
        data: Vec<u8>,
        packet_id: PacketId,
    },
    /// A user message arrived for a locally connected user.
    UserData {
        kind: DeliveryKind,
        to_user: UserId,
        from_user: UserId,
        data: Vec<u8>,
        packet_id: PacketId,
    },
    /// A frame this node originated was acknowledged by the next hop.
    Delivered {
        user: Option<UserId>,
        packet_id: PacketId,
    },
    /// Retries for an originated frame were exhausted.
    AckFailed {
        user: Option<UserId>,
        packet_id: PacketId,
    },
    /// A public key arrived (or was already cached) for `user`.
    PublicKey { user: UserId, key: [u8; 32] },
    /// A buffered payload aged out before discovery completed.
    SendExpired {
        user: Option<UserId>,
        packet_id: PacketId,
    },
    /// An outbound request was dropped before transmission.
    SendFailed {
        user: Option<UserId>,
        reason: &'static str,
    },
}

/// A user message parked in the offline inbox while its recipient's phone
/// is away. The original delivery kind is kept so a replay after user
/// migration carries the same flags.
#[derive(Debug, Clone)]
pub struct OfflineMessage {
    pub kind: DeliveryKind,
    pub packet_id: PacketId,
    pub to_user: UserId,
    pub from_user: UserId,
    pub data: Vec<u8>,
}
