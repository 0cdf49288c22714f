//! Ports to the router's collaborators.
//!
//! The routing core never talks to hardware or clients directly: the radio
//! is reached through bounded frame channels, the short-range client bridge
//! and the Internet uplink through the traits below. The demo binary and
//! the test mocks are the in-repo implementations.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::error::RouterError;
use crate::types::{
    NodeId, Notification, OfflineMessage, RadioFrame, TxFrameQueueSender, UserId,
};

/// Outbound side of the radio driver.
///
/// Wraps the transmit channel so the router task can enqueue without ever
/// blocking: a full queue surfaces as [`RouterError::RadioBusy`] and the
/// caller falls back on the retry sweep.
#[derive(Clone, Copy)]
pub struct RadioPort {
    tx: TxFrameQueueSender,
}

impl RadioPort {
    pub fn new(tx: TxFrameQueueSender) -> Self {
        Self { tx }
    }

    pub fn enqueue_tx(&self, frame: RadioFrame) -> Result<(), RouterError> {
        self.tx.try_send(frame).map_err(|_| RouterError::RadioBusy)
    }
}

/// Port to the local short-range client bridge.
///
/// Implementations own the per-user sessions, the offline inboxes (bounded
/// to the configured capacity, newest kept) and the diff of local users
/// since the last periodic broadcast. All methods are called from the
/// router task and must not block.
pub trait ClientBridge: Send + Sync {
    /// Push an event to the connected client(s).
    fn notify(&self, event: Notification);

    /// Tell clients whether any Internet gateway is currently reachable.
    fn set_gateway_state(&self, online: bool);

    /// Whether this node has ever registered `user` locally.
    fn knows_user(&self, user: UserId) -> bool;

    /// Whether `user`'s client is connected right now.
    fn is_online(&self, user: UserId) -> bool;

    /// Park a message for an absent user.
    fn queue_offline(&self, user: UserId, msg: OfflineMessage);

    /// Drain a user's offline inbox, oldest first.
    fn pop_inbox(&self, user: UserId) -> Vec<OfflineMessage>;

    /// Drop the local record of a user who migrated away.
    fn forget_user(&self, user: UserId);

    /// Users added and removed locally since the previous call; feeds the
    /// periodic differential broadcast.
    fn take_user_diff(&self) -> (Vec<UserId>, Vec<UserId>);
}

/// Port to the optional Internet uplink worker.
pub trait UplinkWorker: Send + Sync {
    /// Hand a gateway-bound user message to the uplink.
    fn uplink(&self, from_user: UserId, to_user: UserId, data: &[u8]);

    /// Whether the uplink currently has connectivity; reflected as the
    /// `I_AM_GATEWAY` announcement in periodic broadcasts.
    fn is_online(&self) -> bool;
}

/// Observer for routing-table changes, e.g. a telemetry bridge.
pub trait RouteObserver: Send + Sync {
    fn route_updated(&self, dest: NodeId, next_hop: NodeId, hop_count: u8);
    fn route_invalidated(&self, dest: NodeId);
}

/// Bounded per-user message store for [`ClientBridge`] implementations.
///
/// Keeps the newest `capacity` messages per user (the `offline-inbox-cap`
/// tunable); queueing onto a full inbox evicts the oldest entry and
/// reports [`RouterError::InboxFull`] so the bridge can log the loss.
pub struct OfflineInbox {
    capacity: usize,
    queues: Mutex<HashMap<UserId, VecDeque<OfflineMessage>>>,
}

impl OfflineInbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Park a message, dropping the oldest one when the user's inbox is
    /// already at capacity.
    pub fn push(&self, user: UserId, msg: OfflineMessage) -> Result<(), RouterError> {
        let mut queues = self.queues.lock().unwrap();
        let queue = queues.entry(user).or_default();
        queue.push_back(msg);
        if queue.len() > self.capacity {
            queue.pop_front();
            return Err(RouterError::InboxFull(user));
        }
        Ok(())
    }

    /// Drain a user's inbox, oldest first.
    pub fn pop_all(&self, user: UserId) -> Vec<OfflineMessage> {
        self.queues
            .lock()
            .unwrap()
            .remove(&user)
            .map(Vec::from)
            .unwrap_or_default()
    }

    pub fn len(&self, user: UserId) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(&user)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, user: UserId) -> bool {
        self.len(user) == 0
    }
}
