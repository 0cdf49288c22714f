//! The reactive routing core.
//!
//! One [`RouterState`] per node owns every mutable table; [`router_task`]
//! is the single task allowed to touch it. External producers (the radio
//! IRQ path, the client bridge, timers) only ever enqueue onto the bounded
//! channels, so all protocol logic is serialized without locks. Handlers
//! are synchronous: the task suspends only at its `select3` and transmit
//! is a non-blocking enqueue that can report [`RouterError::RadioBusy`].

pub mod handlers;
pub mod pending;
pub mod send;
pub mod tables;

use std::collections::HashSet;
use std::sync::Arc;

use embassy_futures::select::{Either3, select3};
use embassy_time::{Instant, Timer};
use log::{debug, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::RouterConfig;
use crate::crypto::{Envelope, TAG_LEN};
use crate::error::RouterError;
use crate::packet::{BASE_HEADER_LEN, BaseHeader, PacketType, flags};
use crate::ports::{ClientBridge, RadioPort, RouteObserver, UplinkWorker};
use crate::types::{
    BROADCAST_ADDR, NodeId, Notification, PacketId, RadioFrame, RxFrameQueueReceiver,
    SendRequest, SendRequestQueueReceiver, UserId,
};

use pending::{ForwardSpool, PendingBuffers, RetryBuffer};
use tables::{GatewaySet, KeyCache, RouteTable, SeenSet, UserTable};

/// Upper bound on router tasks in one process (the simulator-style demo
/// runs several nodes side by side).
pub const MAX_ROUTER_INSTANCES: usize = 8;

/// All mutable routing state of one node.
pub struct RouterState {
    node_id: NodeId,
    config: RouterConfig,
    envelope: Envelope,
    rng: StdRng,

    routes: RouteTable,
    gut: UserTable,
    seen: SeenSet,
    known_nodes: HashSet<NodeId>,
    gateways: GatewaySet,
    keys: KeyCache,
    pending: PendingBuffers,
    retries: RetryBuffer,
    spool: ForwardSpool,

    radio: RadioPort,
    bridge: Arc<dyn ClientBridge>,
    uplink: Option<Arc<dyn UplinkWorker>>,
}

impl RouterState {
    pub fn new(
        node_id: NodeId,
        config: RouterConfig,
        network_key: [u8; 16],
        radio: RadioPort,
        bridge: Arc<dyn ClientBridge>,
        uplink: Option<Arc<dyn UplinkWorker>>,
        observer: Option<Arc<dyn RouteObserver>>,
    ) -> Self {
        Self {
            node_id,
            config,
            envelope: Envelope::new(network_key),
            rng: StdRng::from_entropy(),
            routes: RouteTable::with_observer(observer),
            gut: UserTable::default(),
            seen: SeenSet::default(),
            known_nodes: HashSet::new(),
            gateways: GatewaySet::default(),
            keys: KeyCache::default(),
            pending: PendingBuffers::default(),
            retries: RetryBuffer::default(),
            spool: ForwardSpool::default(),
            radio,
            bridge,
            uplink,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn gut(&self) -> &UserTable {
        &self.gut
    }

    pub fn gateways(&self) -> &GatewaySet {
        &self.gateways
    }

    pub fn retries(&self) -> &RetryBuffer {
        &self.retries
    }

    pub fn pending(&self) -> &PendingBuffers {
        &self.pending
    }

    pub fn known_nodes(&self) -> &HashSet<NodeId> {
        &self.known_nodes
    }

    pub fn known_users(&self) -> Vec<UserId> {
        self.gut.users()
    }

    pub fn public_key(&self, user: UserId) -> Option<[u8; 32]> {
        self.keys.get(user)
    }

    /// Install a route, keeping the closest-gateway cache coherent. Routes
    /// are normally learned from traffic; this is also the hook for static
    /// seeding.
    pub fn learn_route(&mut self, dest: NodeId, next_hop: NodeId, hop_count: u8) {
        if self.routes.update(dest, next_hop, hop_count) && self.gateways.contains(dest) {
            self.gateways.recompute(&self.routes);
        }
    }

    /// Invalidate per the route-error rules and keep the gateway cache
    /// coherent.
    fn invalidate_routes(&mut self, broken: NodeId, original_dest: NodeId) {
        let removed = self.routes.invalidate(broken, original_dest);
        if removed.iter().any(|id| self.gateways.contains(*id)) {
            self.gateways.recompute(&self.routes);
        }
    }

    /// Process one inbound frame through the full dispatch pipeline.
    pub fn handle_frame(&mut self, mut frame: RadioFrame) {
        if frame.len() < BASE_HEADER_LEN {
            debug!("frame shorter than base header ({} bytes), dropped", frame.len());
            return;
        }

        let encrypted = frame.as_slice()[crate::packet::FLAGS_OFFSET] & flags::ENCRYPTED != 0;
        if encrypted {
            if let Err(err) = self.envelope.open(&mut frame) {
                debug!("inbound frame rejected: {err}");
                return;
            }
        }

        let header = match BaseHeader::decode(frame.as_slice()) {
            Ok(header) => header,
            Err(err) => {
                debug!("inbound frame rejected: {err}");
                return;
            }
        };

        // Seeing a packet id we still hold in the retry buffer means the
        // next hop forwarded our unicast: that is the implicit ACK.
        if self.retries.contains(header.packet_id) {
            debug!("implicit ack for packet {}", header.packet_id);
            self.retry_remove(header.packet_id);
            return;
        }

        if self.seen.contains(header.packet_id) {
            debug!("duplicate packet {}, dropped", header.packet_id);
            return;
        }
        self.seen.insert(header.packet_id);

        if header.prev_hop == self.node_id {
            debug!("own frame echoed back, dropped");
            return;
        }

        if header.dest_node != BROADCAST_ADDR && header.dest_node != self.node_id {
            debug!(
                "frame for node {} overheard at {}, dropped",
                header.dest_node, self.node_id
            );
            return;
        }

        let payload = &frame.as_slice()[BASE_HEADER_LEN..];
        let result = match PacketType::from_u8(header.packet_type) {
            Some(PacketType::RouteRequest) => self.handle_route_request(&header, payload),
            Some(PacketType::RouteReply) => self.handle_route_reply(&header, payload),
            Some(PacketType::RouteError) => self.handle_route_error(&header, payload),
            Some(PacketType::Data) => self.handle_data(&header, payload),
            Some(PacketType::BroadcastInfo) => self.handle_broadcast_info(&header, payload),
            Some(PacketType::Ack) => self.handle_ack(&header, payload),
            Some(PacketType::UserRequest) => self.handle_user_request(&header, payload),
            Some(PacketType::UserReply) => self.handle_user_reply(&header, payload),
            Some(PacketType::UserError) => self.handle_user_error(&header, payload),
            Some(PacketType::UserMessage) => self.handle_user_message(&header, payload),
            Some(PacketType::PubKeyRequest) => self.handle_pubkey_request(&header, payload),
            Some(PacketType::PubKeyResponse) => self.handle_pubkey_response(&header, payload),
            Some(PacketType::MoveUserRequest) => self.handle_move_user_request(&header, payload),
            None => {
                debug!("unknown packet type 0x{:02X}, dropped", header.packet_type);
                Ok(())
            }
        };
        if let Err(err) = result {
            debug!(
                "packet {} (type 0x{:02X}) dropped: {err}",
                header.packet_id, header.packet_type
            );
        }
    }

    /// Dispatch an outbound intent from the client bridge.
    pub fn handle_send_request(&mut self, request: SendRequest) {
        match request {
            SendRequest::Data { dest, data, flags } => self.send_data(dest, &data, 0, flags),
            SendRequest::UserMessage {
                from_user,
                to_user,
                data,
                flags,
            } => self.send_user_message(from_user, to_user, &data, 0, flags),
            SendRequest::PubKeyRequest {
                target_user,
                sender_user,
            } => self.send_pubkey_request(target_user, sender_user),
            SendRequest::MoveUser { user, old_home } => {
                self.send_move_user_request(user, old_home)
            }
        }
    }

    /// Drop a retry entry for an acknowledged packet, telling the bridge
    /// when the acknowledged frame was ours.
    pub(crate) fn retry_remove(&mut self, packet_id: PacketId) {
        if let Some(entry) = self.retries.remove(packet_id) {
            if entry.meta.origin == self.node_id {
                self.bridge.notify(Notification::Delivered {
                    user: entry.meta.from_user,
                    packet_id,
                });
            }
        }
    }

    /// Retry-buffer and pending-buffer sweep.
    ///
    /// Entries past the ACK timeout are retransmitted while attempts
    /// remain; exhausted entries turn into a route error toward the origin
    /// plus a failure notification. Buffered payloads whose discovery never
    /// completed are expired.
    pub fn sweep(&mut self, now: Instant) {
        let timeout = self.config.ack_timeout();
        let max_retries = self.config.max_retries;
        let radio = self.radio;

        let (due, exhausted) = self.retries.split_due(now, timeout, max_retries);
        for entry in due {
            if radio.enqueue_tx(entry.frame.clone()).is_ok() {
                entry.sent_at = now;
                entry.attempts += 1;
                debug!(
                    "retransmit via {} (attempt {})",
                    entry.expected_next_hop, entry.attempts
                );
            }
        }
        for (packet_id, entry) in exhausted {
            warn!("retries exhausted for packet {packet_id}, reporting route error");
            self.send_route_error(
                entry.expected_next_hop,
                entry.meta.origin,
                entry.meta.report_dest,
                packet_id,
            );
            self.bridge.notify(Notification::AckFailed {
                user: entry.meta.from_user,
                packet_id,
            });
        }

        for expired in self.pending.expire(now, self.config.pending_ttl()) {
            debug!("pending payload {} expired before discovery", expired.packet_id);
            self.bridge.notify(Notification::SendExpired {
                user: expired.user,
                packet_id: expired.packet_id,
            });
        }
    }

    /// Deadline at which deferred forwards need service, if any.
    pub fn spool_due(&self) -> Option<Instant> {
        self.spool.next_due()
    }

    /// Release deferred inbox forwards whose inter-frame gap has elapsed.
    pub fn drain_spool(&mut self, now: Instant) {
        while let Some(entry) = self.spool.pop_due(now) {
            self.send_user_message(
                entry.from_user,
                entry.to_user,
                &entry.data,
                entry.packet_id,
                entry.flags,
            );
        }
    }
}

/// Absorbed error helper for paths that log instead of propagating.
pub(crate) fn log_transmit(result: Result<(), RouterError>, what: &str) {
    if let Err(err) = result {
        warn!("could not transmit {what}: {err}");
    }
}

/// The dedicated router task: the only owner of [`RouterState`].
///
/// Announces itself once, then loops on the three event sources. The timer
/// arm is the earliest of the broadcast deadline, the sweep deadline and
/// the deferred-forward spool.
#[embassy_executor::task(pool_size = MAX_ROUTER_INSTANCES)]
pub async fn router_task(
    mut state: RouterState,
    rx_frames: RxFrameQueueReceiver,
    send_requests: SendRequestQueueReceiver,
) {
    state.broadcast_info();

    let mut next_broadcast = Instant::now() + state.config().broadcast_interval();
    let mut next_sweep = Instant::now() + state.config().sweep_interval();

    loop {
        let mut deadline = next_broadcast.min(next_sweep);
        if let Some(due) = state.spool_due() {
            deadline = deadline.min(due);
        }

        match select3(
            rx_frames.receive(),
            send_requests.receive(),
            Timer::at(deadline),
        )
        .await
        {
            Either3::First(frame) => state.handle_frame(frame),
            Either3::Second(request) => state.handle_send_request(request),
            Either3::Third(()) => {
                let now = Instant::now();
                if now >= next_broadcast {
                    state.broadcast_info();
                    next_broadcast = now + state.config().broadcast_interval();
                }
                if now >= next_sweep {
                    state.sweep(now);
                    next_sweep = now + state.config().sweep_interval();
                }
                state.drain_spool(now);
            }
        }
    }
}

/// Payload capacity of a sealed frame after the fixed overheads.
pub(crate) const fn sealed_capacity(ext_len: usize) -> usize {
    crate::types::MAX_FRAME_LEN - BASE_HEADER_LEN - ext_len - TAG_LEN
}
