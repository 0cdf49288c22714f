//! Buffers for traffic that cannot be transmitted yet.
//!
//! Payloads wait here for route discovery (`data`/`user_route`/`moves`),
//! for a user-directory lookup (`user_dir`), or for a per-hop
//! acknowledgement (`RetryBuffer`). Everything is timestamped so the sweep
//! pass can expire entries whose discovery never completed.

use std::collections::HashMap;
use std::collections::VecDeque;

use embassy_time::{Duration, Instant};

use crate::types::{NodeId, PacketId, RadioFrame, UserId};

/// Raw payload awaiting a route to its destination node.
#[derive(Debug, Clone)]
pub struct PendingData {
    pub packet_id: PacketId,
    pub data: Vec<u8>,
    pub flags: u8,
    pub queued_at: Instant,
}

/// User message whose home node is known but unreachable.
#[derive(Debug, Clone)]
pub struct PendingUserRoute {
    pub packet_id: PacketId,
    pub from_user: UserId,
    pub to_user: UserId,
    pub data: Vec<u8>,
    pub flags: u8,
    pub queued_at: Instant,
}

/// User message whose home node is still unknown.
#[derive(Debug, Clone)]
pub struct PendingUserDir {
    pub packet_id: PacketId,
    pub from_user: UserId,
    pub data: Vec<u8>,
    pub flags: u8,
    pub queued_at: Instant,
}

/// Migration hand-off awaiting a route to the old home node.
#[derive(Debug, Clone)]
pub struct PendingMove {
    pub user: UserId,
    pub old_home: NodeId,
    pub queued_at: Instant,
}

/// A payload dropped by the TTL sweep, reported back to the bridge.
#[derive(Debug, Clone, Copy)]
pub struct ExpiredPayload {
    pub packet_id: PacketId,
    pub user: Option<UserId>,
}

/// The discovery-side buffers, keyed the way their flush events arrive.
#[derive(Default)]
pub struct PendingBuffers {
    data: HashMap<NodeId, Vec<PendingData>>,
    user_route: HashMap<NodeId, Vec<PendingUserRoute>>,
    user_dir: HashMap<UserId, Vec<PendingUserDir>>,
    moves: HashMap<NodeId, Vec<PendingMove>>,
}

impl PendingBuffers {
    pub fn push_data(&mut self, dest: NodeId, entry: PendingData) {
        self.data.entry(dest).or_default().push(entry);
    }

    pub fn pop_data(&mut self, dest: NodeId) -> Vec<PendingData> {
        self.data.remove(&dest).unwrap_or_default()
    }

    pub fn data_for(&self, dest: NodeId) -> &[PendingData] {
        self.data.get(&dest).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn push_user_route(&mut self, home: NodeId, entry: PendingUserRoute) {
        self.user_route.entry(home).or_default().push(entry);
    }

    pub fn pop_user_route(&mut self, home: NodeId) -> Vec<PendingUserRoute> {
        self.user_route.remove(&home).unwrap_or_default()
    }

    pub fn push_user_dir(&mut self, to_user: UserId, entry: PendingUserDir) {
        self.user_dir.entry(to_user).or_default().push(entry);
    }

    pub fn pop_user_dir(&mut self, to_user: UserId) -> Vec<PendingUserDir> {
        self.user_dir.remove(&to_user).unwrap_or_default()
    }

    pub fn push_move(&mut self, old_home: NodeId, entry: PendingMove) {
        self.moves.entry(old_home).or_default().push(entry);
    }

    pub fn pop_moves(&mut self, old_home: NodeId) -> Vec<PendingMove> {
        self.moves.remove(&old_home).unwrap_or_default()
    }

    /// Drop every payload older than `ttl`, returning what was dropped so
    /// the senders can be notified. Move requests expire silently.
    pub fn expire(&mut self, now: Instant, ttl: Duration) -> Vec<ExpiredPayload> {
        let mut expired = Vec::new();
        let stale = |queued_at: Instant| queued_at + ttl <= now;

        for queue in self.data.values_mut() {
            queue.retain(|entry| {
                if stale(entry.queued_at) {
                    expired.push(ExpiredPayload {
                        packet_id: entry.packet_id,
                        user: None,
                    });
                    false
                } else {
                    true
                }
            });
        }
        for queue in self.user_route.values_mut() {
            queue.retain(|entry| {
                if stale(entry.queued_at) {
                    expired.push(ExpiredPayload {
                        packet_id: entry.packet_id,
                        user: Some(entry.from_user),
                    });
                    false
                } else {
                    true
                }
            });
        }
        for queue in self.user_dir.values_mut() {
            queue.retain(|entry| {
                if stale(entry.queued_at) {
                    expired.push(ExpiredPayload {
                        packet_id: entry.packet_id,
                        user: Some(entry.from_user),
                    });
                    false
                } else {
                    true
                }
            });
        }
        for queue in self.moves.values_mut() {
            queue.retain(|entry| !stale(entry.queued_at));
        }
        self.data.retain(|_, queue| !queue.is_empty());
        self.user_route.retain(|_, queue| !queue.is_empty());
        self.user_dir.retain(|_, queue| !queue.is_empty());
        self.moves.retain(|_, queue| !queue.is_empty());
        expired
    }
}

/// Context captured at transmit time for a frame awaiting acknowledgement.
/// The buffered frame itself is already sealed, so anything needed for the
/// route error and the failure notification is kept in the clear here.
#[derive(Debug, Clone, Copy)]
pub struct RetryMeta {
    /// Origin of the buffered frame.
    pub origin: NodeId,
    /// Destination to name in the route error on exhaustion.
    pub report_dest: NodeId,
    /// Originating user for user messages.
    pub from_user: Option<UserId>,
}

/// One unacknowledged unicast.
pub struct RetryEntry {
    pub frame: RadioFrame,
    pub expected_next_hop: NodeId,
    pub sent_at: Instant,
    pub attempts: u8,
    pub meta: RetryMeta,
}

/// Frames awaiting an explicit or implicit acknowledgement, keyed by
/// packet id.
#[derive(Default)]
pub struct RetryBuffer {
    entries: HashMap<PacketId, RetryEntry>,
}

impl RetryBuffer {
    pub fn insert(&mut self, packet_id: PacketId, entry: RetryEntry) {
        self.entries.insert(packet_id, entry);
    }

    pub fn remove(&mut self, packet_id: PacketId) -> Option<RetryEntry> {
        self.entries.remove(&packet_id)
    }

    pub fn contains(&self, packet_id: PacketId) -> bool {
        self.entries.contains_key(&packet_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Split out the entries whose timeout has elapsed into those with
    /// attempts left (returned by reference for retransmission) and those
    /// that are exhausted (removed and returned by value).
    pub fn split_due(
        &mut self,
        now: Instant,
        timeout: Duration,
        max_attempts: u8,
    ) -> (Vec<&mut RetryEntry>, Vec<(PacketId, RetryEntry)>) {
        let exhausted_ids: Vec<PacketId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.sent_at + timeout <= now && entry.attempts >= max_attempts)
            .map(|(id, _)| *id)
            .collect();

        let exhausted = exhausted_ids
            .into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|entry| (id, entry)))
            .collect();

        let due = self
            .entries
            .values_mut()
            .filter(|entry| entry.sent_at + timeout <= now)
            .collect();

        (due, exhausted)
    }
}

/// Gap between replayed inbox messages during a user migration, to avoid
/// flooding our own channel.
pub const SPOOL_GAP: Duration = Duration::from_secs(1);

/// One deferred user-message send.
#[derive(Debug, Clone)]
pub struct SpoolEntry {
    pub from_user: UserId,
    pub to_user: UserId,
    pub data: Vec<u8>,
    pub packet_id: PacketId,
    pub flags: u8,
}

/// Deferred sends drained by the router task timer, one per gap interval.
/// Handlers enqueue here instead of sleeping so they never yield.
#[derive(Default)]
pub struct ForwardSpool {
    queue: VecDeque<SpoolEntry>,
    next_due: Option<Instant>,
}

impl ForwardSpool {
    pub fn push(&mut self, entry: SpoolEntry, now: Instant) {
        if self.queue.is_empty() && self.next_due.is_none() {
            self.next_due = Some(now);
        }
        self.queue.push_back(entry);
    }

    /// The deadline the router task should wake at, if anything is queued.
    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    /// Take at most one entry if its time has come, re-arming the deadline
    /// for the next one.
    pub fn pop_due(&mut self, now: Instant) -> Option<SpoolEntry> {
        match self.next_due {
            Some(due) if now >= due => {
                let entry = self.queue.pop_front();
                self.next_due = if self.queue.is_empty() {
                    None
                } else {
                    Some(now + SPOOL_GAP)
                };
                entry
            }
            _ => None,
        }
    }
}
