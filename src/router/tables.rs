//! Pure routing state: route table, global user table, seen-packet set,
//! gateway set and public-key cache.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use embassy_time::Instant;
use log::debug;

use crate::ports::RouteObserver;
use crate::types::{NodeId, PacketId, UserId};

/// One hop-count-metric routing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    pub next_hop: NodeId,
    pub hop_count: u8,
}

/// Destination → next-hop table with strictly-improving updates.
#[derive(Default)]
pub struct RouteTable {
    entries: HashMap<NodeId, RouteEntry>,
    observer: Option<Arc<dyn RouteObserver>>,
}

impl RouteTable {
    pub fn with_observer(observer: Option<Arc<dyn RouteObserver>>) -> Self {
        Self {
            entries: HashMap::new(),
            observer,
        }
    }

    /// Insert a route, or replace the existing one only when strictly
    /// shorter. Returns whether the table changed.
    pub fn update(&mut self, dest: NodeId, next_hop: NodeId, hop_count: u8) -> bool {
        match self.entries.get_mut(&dest) {
            None => {
                self.entries.insert(dest, RouteEntry { next_hop, hop_count });
                debug!("route added: {dest} via {next_hop} ({hop_count} hops)");
            }
            Some(entry) if hop_count < entry.hop_count => {
                *entry = RouteEntry { next_hop, hop_count };
                debug!("route improved: {dest} via {next_hop} ({hop_count} hops)");
            }
            Some(_) => return false,
        }
        if let Some(observer) = &self.observer {
            observer.route_updated(dest, next_hop, hop_count);
        }
        true
    }

    pub fn get(&self, dest: NodeId) -> Option<RouteEntry> {
        self.entries.get(&dest).copied()
    }

    pub fn contains(&self, dest: NodeId) -> bool {
        self.entries.contains_key(&dest)
    }

    /// Drop a single destination.
    pub fn remove(&mut self, dest: NodeId) {
        if self.entries.remove(&dest).is_some() {
            if let Some(observer) = &self.observer {
                observer.route_invalidated(dest);
            }
        }
    }

    /// Drop `broken`, `original_dest` and every entry routed through
    /// `broken`. Returns all destinations that were removed.
    pub fn invalidate(&mut self, broken: NodeId, original_dest: NodeId) -> Vec<NodeId> {
        let mut removed = Vec::new();
        for dest in [broken, original_dest] {
            if self.entries.remove(&dest).is_some() {
                removed.push(dest);
            }
        }
        self.entries.retain(|dest, entry| {
            if entry.next_hop == broken {
                removed.push(*dest);
                false
            } else {
                true
            }
        });
        if let Some(observer) = &self.observer {
            for dest in &removed {
                observer.route_invalidated(*dest);
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Global user table entry: where a user lives as far as we know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GutEntry {
    pub home_node: NodeId,
    pub seq: u8,
    pub last_seen: Instant,
}

/// User → home-node directory fed by replies, diffs and migrations.
#[derive(Default)]
pub struct UserTable {
    entries: HashMap<UserId, GutEntry>,
}

impl UserTable {
    pub fn upsert(&mut self, user: UserId, home_node: NodeId) {
        self.entries.insert(
            user,
            GutEntry {
                home_node,
                seq: 0,
                last_seen: Instant::now(),
            },
        );
    }

    pub fn lookup(&self, user: UserId) -> Option<GutEntry> {
        self.entries.get(&user).copied()
    }

    pub fn remove(&mut self, user: UserId) {
        self.entries.remove(&user);
    }

    /// Remove only when the cached home matches the reporter's claim, so a
    /// stale error cannot erase a newer binding.
    pub fn remove_if_home(&mut self, user: UserId, home_node: NodeId) -> bool {
        match self.entries.get(&user) {
            Some(entry) if entry.home_node == home_node => {
                self.entries.remove(&user);
                true
            }
            _ => false,
        }
    }

    pub fn users(&self) -> Vec<UserId> {
        self.entries.keys().copied().collect()
    }
}

/// How many recently seen packet ids are remembered for deduplication.
pub const SEEN_SET_CAPACITY: usize = 4096;

/// Bounded membership set of observed packet ids.
///
/// FIFO eviction: once full, remembering a new id forgets the oldest one.
/// Within the window the set never reports a false negative.
pub struct SeenSet {
    ids: HashSet<PacketId>,
    order: VecDeque<PacketId>,
    capacity: usize,
}

impl Default for SeenSet {
    fn default() -> Self {
        Self::with_capacity(SEEN_SET_CAPACITY)
    }
}

impl SeenSet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn contains(&self, id: PacketId) -> bool {
        self.ids.contains(&id)
    }

    /// Remember an id; returns false if it was already present.
    pub fn insert(&mut self, id: PacketId) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Nodes that announced `I_AM_GATEWAY`, with a cached closest pick.
#[derive(Default)]
pub struct GatewaySet {
    gateways: HashSet<NodeId>,
    closest: Option<(NodeId, u8)>,
}

impl GatewaySet {
    /// Returns true when the node was newly added.
    pub fn add(&mut self, node: NodeId, routes: &RouteTable) -> bool {
        let added = self.gateways.insert(node);
        if added {
            self.recompute(routes);
        }
        added
    }

    pub fn remove(&mut self, node: NodeId, routes: &RouteTable) {
        if self.gateways.remove(&node) && self.closest.map(|(gw, _)| gw) == Some(node) {
            self.recompute(routes);
        }
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.gateways.contains(&node)
    }

    pub fn any_known(&self) -> bool {
        !self.gateways.is_empty()
    }

    /// Closest gateway by route cost, falling back to any known gateway
    /// while no route exists yet.
    pub fn closest(&self) -> Option<NodeId> {
        self.closest
            .map(|(gw, _)| gw)
            .or_else(|| self.gateways.iter().next().copied())
    }

    /// Re-derive the closest gateway across all gateways with a live route.
    pub fn recompute(&mut self, routes: &RouteTable) {
        self.closest = self
            .gateways
            .iter()
            .filter_map(|gw| routes.get(*gw).map(|entry| (*gw, entry.hop_count)))
            .min_by_key(|(_, hops)| *hops);
    }
}

/// Opportunistic cache of user public keys.
#[derive(Default)]
pub struct KeyCache {
    keys: HashMap<UserId, [u8; 32]>,
}

impl KeyCache {
    pub fn insert(&mut self, user: UserId, key: [u8; 32]) {
        self.keys.insert(user, key);
    }

    pub fn get(&self, user: UserId) -> Option<[u8; 32]> {
        self.keys.get(&user).copied()
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.keys.contains_key(&user)
    }
}
