//! Frame assembly and the transmit path.
//!
//! Everything leaving this node funnels through [`RouterState::transmit`]:
//! marshal, seal, enqueue to the radio, and register acknowledged unicasts
//! with the retry buffer. The `send_*` helpers build each packet type the
//! protocol can originate.

use embassy_time::Instant;
use log::{debug, warn};
use rand::RngCore;

use crate::error::RouterError;
use crate::packet::{
    AckHeader, BASE_HEADER_LEN, BaseHeader, DataHeader, DiffBroadcastHeader, GatewayRole,
    MoveUserRequestHeader, PacketType, PubKeyRequestHeader, PubKeyResponseHeader,
    RouteErrorHeader, RouteReplyHeader, RouteRequestHeader, UserErrorHeader, UserMessageHeader,
    UserReplyHeader, UserRequestHeader, flags,
};
use crate::types::{
    BROADCAST_ADDR, MAX_FRAME_LEN, NodeId, Notification, PacketId, RadioFrame, UserId,
};

use super::pending::{
    PendingData, PendingMove, PendingUserDir, PendingUserRoute, RetryEntry, RetryMeta,
};
use super::{RouterState, log_transmit, sealed_capacity};

impl RouterState {
    /// Draw a fresh packet id from the CSPRNG. Zero is reserved for
    /// "choose for me" and an id still inside the dedup window would be a
    /// nonce reuse, so both are redrawn.
    pub(crate) fn next_packet_id(&mut self) -> PacketId {
        loop {
            let id = self.rng.next_u32();
            if id == 0 {
                continue;
            }
            if self.seen.contains(id) {
                warn!("packet id collision inside dedup window, redrawing");
                continue;
            }
            return id;
        }
    }

    /// Marshal, seal and hand one frame to the radio.
    ///
    /// Acknowledged unicasts with a live route are copied into the retry
    /// buffer together with the metadata the sweep needs, captured here
    /// while the extension header is still plaintext. Nothing is buffered
    /// when the radio reports back-pressure.
    pub(crate) fn transmit(
        &mut self,
        header: &BaseHeader,
        ext: &[u8],
        payload: &[u8],
    ) -> Result<(), RouterError> {
        let total = BASE_HEADER_LEN + ext.len() + payload.len();
        if total + crate::crypto::TAG_LEN > MAX_FRAME_LEN {
            return Err(RouterError::FrameTooLarge {
                len: total + crate::crypto::TAG_LEN,
                max: MAX_FRAME_LEN,
            });
        }

        let mut bytes = Vec::with_capacity(total);
        bytes.extend_from_slice(&header.encode());
        bytes.extend_from_slice(ext);
        bytes.extend_from_slice(payload);
        let mut frame = RadioFrame::from_slice(&bytes)?;
        self.envelope.seal(&mut frame)?;

        if header.dest_node == BROADCAST_ADDR {
            // Our flood comes back via neighbour rebroadcasts under the
            // same id; remembering it now suppresses the echo.
            self.seen.insert(header.packet_id);
        }

        let wants_ack = header.dest_node != BROADCAST_ADDR && header.flags & flags::REQ_ACK != 0;
        let retry_entry = if wants_ack {
            self.routes.get(header.dest_node).map(|route| RetryEntry {
                frame: frame.clone(),
                expected_next_hop: route.next_hop,
                sent_at: Instant::now(),
                attempts: 0,
                meta: retry_meta(header, ext),
            })
        } else {
            None
        };

        self.radio.enqueue_tx(frame)?;

        if let Some(entry) = retry_entry {
            self.retries.insert(header.packet_id, entry);
        }
        Ok(())
    }

    fn header_to(&self, dest_node: NodeId, packet_type: PacketType, packet_id: PacketId) -> BaseHeader {
        BaseHeader {
            dest_node,
            prev_hop: self.node_id,
            origin_node: self.node_id,
            packet_id,
            packet_type: packet_type as u8,
            flags: 0,
            hop_count: 0,
            reserved: 0,
        }
    }

    /// Send raw bytes to a node, discovering a route first if necessary.
    /// A `packet_id` of zero lets the router choose one.
    pub fn send_data(&mut self, dest: NodeId, data: &[u8], packet_id: PacketId, msg_flags: u8) {
        let packet_id = if packet_id == 0 {
            self.next_packet_id()
        } else {
            packet_id
        };

        let next_hop = if dest == BROADCAST_ADDR {
            BROADCAST_ADDR
        } else {
            match self.routes.get(dest) {
                Some(route) => route.next_hop,
                None => {
                    debug!("no route to {dest}, buffering data and discovering");
                    self.pending.push_data(
                        dest,
                        PendingData {
                            packet_id,
                            data: data.to_vec(),
                            flags: msg_flags,
                            queued_at: Instant::now(),
                        },
                    );
                    self.send_route_request(dest);
                    return;
                }
            }
        };

        let mut header = self.header_to(next_hop, PacketType::Data, packet_id);
        header.flags = msg_flags;
        let ext = DataHeader {
            final_dest: dest,
            origin_node: self.node_id,
        }
        .encode();
        log_transmit(self.transmit(&header, &ext, data), "data");
    }

    /// Send a message from one user to another, resolving the recipient's
    /// home node through the directory, or to the closest gateway when the
    /// `TO_GATEWAY` subfield is set.
    pub fn send_user_message(
        &mut self,
        from_user: UserId,
        to_user: UserId,
        data: &[u8],
        packet_id: PacketId,
        msg_flags: u8,
    ) {
        let packet_id = if packet_id == 0 {
            self.next_packet_id()
        } else {
            packet_id
        };
        let queued_at = Instant::now();

        let (to_node, next_hop) = if GatewayRole::from_flags(msg_flags) == GatewayRole::ToGateway {
            let Some(gateway) = self.gateways.closest() else {
                warn!("gateway-bound message from user {from_user} with no gateway known, dropped");
                self.bridge.notify(Notification::SendFailed {
                    user: Some(from_user),
                    reason: "no gateway known",
                });
                return;
            };
            match self.routes.get(gateway) {
                Some(route) => (gateway, route.next_hop),
                None => {
                    debug!("no route to gateway {gateway}, buffering and discovering");
                    self.pending.push_user_route(
                        gateway,
                        PendingUserRoute {
                            packet_id,
                            from_user,
                            to_user,
                            data: data.to_vec(),
                            flags: msg_flags,
                            queued_at,
                        },
                    );
                    self.send_route_request(gateway);
                    return;
                }
            }
        } else {
            let Some(gut_entry) = self.gut.lookup(to_user) else {
                debug!("no directory entry for user {to_user}, buffering and asking");
                self.pending.push_user_dir(
                    to_user,
                    PendingUserDir {
                        packet_id,
                        from_user,
                        data: data.to_vec(),
                        flags: msg_flags,
                        queued_at,
                    },
                );
                self.send_user_request(to_user);
                return;
            };
            match self.routes.get(gut_entry.home_node) {
                Some(route) => (gut_entry.home_node, route.next_hop),
                None => {
                    debug!(
                        "no route to home node {} of user {to_user}, buffering and discovering",
                        gut_entry.home_node
                    );
                    self.pending.push_user_route(
                        gut_entry.home_node,
                        PendingUserRoute {
                            packet_id,
                            from_user,
                            to_user,
                            data: data.to_vec(),
                            flags: msg_flags,
                            queued_at,
                        },
                    );
                    self.send_route_request(gut_entry.home_node);
                    return;
                }
            }
        };

        let mut header = self.header_to(next_hop, PacketType::UserMessage, packet_id);
        header.flags = msg_flags;
        let ext = UserMessageHeader {
            from_user,
            to_user,
            to_node,
            origin_node: self.node_id,
        }
        .encode();
        log_transmit(self.transmit(&header, &ext, data), "user message");
    }

    /// Ask the mesh for `target_user`'s public key. Answered locally when
    /// the cache already has it; otherwise flooded with our own key
    /// attached so the far side can cache it.
    pub fn send_pubkey_request(&mut self, target_user: UserId, sender_user: UserId) {
        if let Some(key) = self.keys.get(target_user) {
            self.bridge.notify(Notification::PublicKey {
                user: target_user,
                key,
            });
            return;
        }

        let Some(our_key) = self.keys.get(sender_user) else {
            warn!("no local public key for user {sender_user}, request dropped");
            return;
        };

        let packet_id = self.next_packet_id();
        let header = self.header_to(BROADCAST_ADDR, PacketType::PubKeyRequest, packet_id);
        let ext = PubKeyRequestHeader {
            sender_user,
            target_user,
            public_key: our_key,
        }
        .encode();
        log_transmit(self.transmit(&header, &ext, &[]), "public key request");
    }

    /// Tell `old_home` that `user` now lives here, buffering behind route
    /// discovery when the old home is not yet reachable.
    pub fn send_move_user_request(&mut self, user: UserId, old_home: NodeId) {
        let Some(route) = self.routes.get(old_home) else {
            self.pending.push_move(
                old_home,
                PendingMove {
                    user,
                    old_home,
                    queued_at: Instant::now(),
                },
            );
            self.send_route_request(old_home);
            return;
        };

        let packet_id = self.next_packet_id();
        let header = self.header_to(route.next_hop, PacketType::MoveUserRequest, packet_id);
        let ext = MoveUserRequestHeader { user, old_home }.encode();
        log_transmit(self.transmit(&header, &ext, &[]), "move user request");
    }

    pub(crate) fn send_route_request(&mut self, target_node: NodeId) {
        let packet_id = self.next_packet_id();
        let header = self.header_to(BROADCAST_ADDR, PacketType::RouteRequest, packet_id);
        let ext = RouteRequestHeader { target_node }.encode();
        log_transmit(self.transmit(&header, &ext, &[]), "route request");
    }

    pub(crate) fn send_route_reply(
        &mut self,
        origin_node: NodeId,
        target_node: NodeId,
        next_hop: NodeId,
        num_hops: u8,
    ) {
        let packet_id = self.next_packet_id();
        let mut header = self.header_to(next_hop, PacketType::RouteReply, packet_id);
        header.origin_node = origin_node;
        let ext = RouteReplyHeader {
            target_node,
            lifetime: 0,
            num_hops,
        }
        .encode();
        log_transmit(self.transmit(&header, &ext, &[]), "route reply");
    }

    /// Report a broken path back toward the origin of the failed packet.
    /// Each hop re-resolves its own route to the origin; when we *are* the
    /// origin the frame is addressed to ourselves and absorbed by the
    /// neighbourhood.
    pub(crate) fn send_route_error(
        &mut self,
        broken_node: NodeId,
        origin_node: NodeId,
        original_dest: NodeId,
        original_packet_id: PacketId,
    ) {
        let dest = if origin_node == self.node_id {
            self.node_id
        } else {
            match self.routes.get(origin_node) {
                Some(route) => route.next_hop,
                None => origin_node,
            }
        };

        let packet_id = self.next_packet_id();
        let mut header = self.header_to(dest, PacketType::RouteError, packet_id);
        header.origin_node = origin_node;
        let ext = RouteErrorHeader {
            reporter_node: self.node_id,
            broken_node,
            original_dest,
            original_packet_id,
            origin_node,
        }
        .encode();
        log_transmit(self.transmit(&header, &ext, &[]), "route error");
    }

    pub(crate) fn send_user_request(&mut self, user: UserId) {
        let packet_id = self.next_packet_id();
        let header = self.header_to(BROADCAST_ADDR, PacketType::UserRequest, packet_id);
        let ext = UserRequestHeader {
            origin_node: self.node_id,
            user,
        }
        .encode();
        log_transmit(self.transmit(&header, &ext, &[]), "user request");
    }

    pub(crate) fn send_user_reply(
        &mut self,
        origin_node: NodeId,
        home_node: NodeId,
        user: UserId,
        next_hop: NodeId,
        lifetime: u16,
        num_hops: u8,
    ) {
        let packet_id = self.next_packet_id();
        let mut header = self.header_to(next_hop, PacketType::UserReply, packet_id);
        header.origin_node = origin_node;
        let ext = UserReplyHeader {
            origin_node,
            home_node,
            user,
            lifetime,
            num_hops,
        }
        .encode();
        log_transmit(self.transmit(&header, &ext, &[]), "user reply");
    }

    pub(crate) fn send_user_error(
        &mut self,
        user: UserId,
        home_node: NodeId,
        origin_node: NodeId,
        original_packet_id: PacketId,
        next_hop: NodeId,
    ) {
        let packet_id = self.next_packet_id();
        let mut header = self.header_to(next_hop, PacketType::UserError, packet_id);
        header.origin_node = origin_node;
        let ext = UserErrorHeader {
            user,
            home_node,
            origin_node,
            original_packet_id,
        }
        .encode();
        log_transmit(self.transmit(&header, &ext, &[]), "user error");
    }

    pub(crate) fn send_ack(&mut self, dest_node: NodeId, original_packet_id: PacketId) {
        let packet_id = self.next_packet_id();
        let header = self.header_to(dest_node, PacketType::Ack, packet_id);
        let ext = AckHeader { original_packet_id }.encode();
        log_transmit(self.transmit(&header, &ext, &[]), "ack");
    }

    pub(crate) fn send_pubkey_response(
        &mut self,
        dest_node: NodeId,
        user: UserId,
        origin_node: NodeId,
        public_key: [u8; 32],
    ) {
        let packet_id = self.next_packet_id();
        let mut header = self.header_to(dest_node, PacketType::PubKeyResponse, packet_id);
        header.origin_node = origin_node;
        let ext = PubKeyResponseHeader { user, public_key }.encode();
        log_transmit(self.transmit(&header, &ext, &[]), "public key response");
    }

    /// Emit the periodic differential broadcast: the local user diff split
    /// into as many frames as the payload budget requires, plus the
    /// gateway announcement. An empty diff still emits one keep-alive.
    pub fn broadcast_info(&mut self) {
        let (added, removed) = self.bridge.take_user_diff();

        let mut announce_flags = 0u8;
        if self.uplink.as_ref().is_some_and(|uplink| uplink.is_online()) {
            announce_flags |= flags::I_AM_GATEWAY;
        }

        const IDS_PER_FRAME: usize = sealed_capacity(DiffBroadcastHeader::FIXED_LEN) / 4;

        if added.is_empty() && removed.is_empty() {
            self.emit_diff_frame(&[], &[], announce_flags);
            return;
        }

        let mut idx_added = 0;
        let mut idx_removed = 0;
        while idx_added < added.len() || idx_removed < removed.len() {
            let num_added = IDS_PER_FRAME.min(added.len() - idx_added);
            let num_removed = (IDS_PER_FRAME - num_added).min(removed.len() - idx_removed);
            self.emit_diff_frame(
                &added[idx_added..idx_added + num_added],
                &removed[idx_removed..idx_removed + num_removed],
                announce_flags,
            );
            idx_added += num_added;
            idx_removed += num_removed;
        }
    }

    fn emit_diff_frame(&mut self, added: &[UserId], removed: &[UserId], announce_flags: u8) {
        let packet_id = self.next_packet_id();
        let mut header = self.header_to(BROADCAST_ADDR, PacketType::BroadcastInfo, packet_id);
        header.flags = announce_flags;
        let ext = DiffBroadcastHeader {
            origin_node: self.node_id,
            added: added.to_vec(),
            removed: removed.to_vec(),
        }
        .encode();
        log_transmit(self.transmit(&header, &ext, &[]), "broadcast info");
    }

    /// Re-drive data packets that were waiting for a route to `dest`.
    /// Entries whose route disappeared again are re-buffered, keeping
    /// their original packet ids.
    pub(crate) fn flush_data_queue(&mut self, dest: NodeId) {
        for entry in self.pending.pop_data(dest) {
            match self.routes.get(dest) {
                Some(route) => {
                    let mut header = self.header_to(route.next_hop, PacketType::Data, entry.packet_id);
                    header.flags = entry.flags;
                    let ext = DataHeader {
                        final_dest: dest,
                        origin_node: self.node_id,
                    }
                    .encode();
                    log_transmit(self.transmit(&header, &ext, &entry.data), "data");
                }
                None => self.pending.push_data(dest, entry),
            }
        }
    }

    /// Re-drive user messages that were waiting for a route to `node`.
    pub(crate) fn flush_user_route_queue(&mut self, node: NodeId) {
        for entry in self.pending.pop_user_route(node) {
            self.send_user_message(
                entry.from_user,
                entry.to_user,
                &entry.data,
                entry.packet_id,
                entry.flags,
            );
        }
    }

    /// Re-drive migration hand-offs that were waiting for a route.
    pub(crate) fn flush_move_queue(&mut self, node: NodeId) {
        for entry in self.pending.pop_moves(node) {
            self.send_move_user_request(entry.user, entry.old_home);
        }
    }
}

/// Context the retry sweep needs, pulled from the plaintext extension
/// header before sealing hides it.
fn retry_meta(header: &BaseHeader, ext: &[u8]) -> RetryMeta {
    let fallback = RetryMeta {
        origin: header.origin_node,
        report_dest: header.dest_node,
        from_user: None,
    };
    match PacketType::from_u8(header.packet_type) {
        Some(PacketType::Data) => DataHeader::decode(ext)
            .map(|dh| RetryMeta {
                origin: header.origin_node,
                report_dest: dh.final_dest,
                from_user: None,
            })
            .unwrap_or(fallback),
        Some(PacketType::UserMessage) => UserMessageHeader::decode(ext)
            .map(|umh| RetryMeta {
                origin: header.origin_node,
                report_dest: umh.to_node,
                from_user: Some(umh.from_user),
            })
            .unwrap_or(fallback),
        _ => fallback,
    }
}
