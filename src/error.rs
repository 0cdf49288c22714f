//! Error kinds surfaced by the routing core.

use crate::types::{NodeId, UserId};

/// Everything that can go wrong between the send API and the radio.
///
/// Decode, decrypt and dedup failures are absorbed at the dispatcher (the
/// frame is dropped); the remaining kinds travel up to the sender logic.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RouterError {
    /// Buffer shorter than the declared header layout.
    #[error("malformed header: need {need} bytes, have {have}")]
    MalformedHeader { need: usize, have: usize },

    /// Assembled frame would exceed the on-air limit.
    #[error("frame too large: {len} bytes exceeds {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// AEAD tag verification failed.
    #[error("authentication failed")]
    AuthFailed,

    /// The radio's outbound queue is full.
    #[error("radio busy")]
    RadioBusy,

    /// No routing entry for the destination node.
    #[error("no route to node {0}")]
    NoRoute(NodeId),

    /// Gateway-bound traffic with no known gateway.
    #[error("no gateway known")]
    NoGateway,

    /// The destination user is not connected to the addressed node.
    #[error("unknown user {0}")]
    UnknownUser(UserId),

    /// Offline inbox at capacity; the oldest message was discarded.
    #[error("offline inbox full for user {0}")]
    InboxFull(UserId),

    /// An acknowledged unicast ran out of retransmission attempts.
    #[error("retries exhausted for packet {0}")]
    RetryExhausted(u32),
}
