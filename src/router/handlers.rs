//! Per-packet-type receive logic.
//!
//! Every handler runs on the router task after the dispatcher has
//! decrypted, deduplicated and address-checked the frame. A handler either
//! consumes the packet, replies, or forwards it with `prev_hop` rewritten
//! to this node; decode failures bubble up and the dispatcher drops the
//! frame.

use embassy_time::Instant;
use log::{debug, warn};

use crate::error::RouterError;
use crate::packet::{
    AckHeader, BaseHeader, DataHeader, DiffBroadcastHeader, GatewayRole, MoveUserRequestHeader,
    PubKeyRequestHeader, PubKeyResponseHeader, RouteErrorHeader, RouteReplyHeader,
    RouteRequestHeader, UserErrorHeader, UserMessageHeader, UserReplyHeader, UserRequestHeader,
    flags,
};
use crate::types::{BROADCAST_ADDR, DeliveryKind, Notification, OfflineMessage};

use super::RouterState;
use super::pending::{PendingMove, SpoolEntry};

impl RouterState {
    /// Route discovery flood: learn the reverse path, answer if we are the
    /// target (or know a good enough route to it), otherwise rebroadcast.
    pub(crate) fn handle_route_request(
        &mut self,
        header: &BaseHeader,
        payload: &[u8],
    ) -> Result<(), RouterError> {
        let rreq = RouteRequestHeader::decode(payload)?;

        self.learn_route(
            header.origin_node,
            header.prev_hop,
            header.hop_count.saturating_add(1),
        );
        self.learn_route(header.prev_hop, header.prev_hop, 1);

        if rreq.target_node == self.node_id {
            debug!("route request for me from {}", header.origin_node);
            // The reply hop count restarts at zero: the reply may travel a
            // different path than the request did.
            self.send_route_reply(header.origin_node, self.node_id, header.prev_hop, 0);
            return Ok(());
        }

        if let Some(entry) = self.routes.get(rreq.target_node) {
            if entry.hop_count >= self.config.route_reply_threshold {
                debug!(
                    "answering route request for {} on its behalf",
                    rreq.target_node
                );
                self.send_route_reply(
                    header.origin_node,
                    rreq.target_node,
                    header.prev_hop,
                    entry.hop_count,
                );
                return Ok(());
            }
        }

        let mut fwd = *header;
        fwd.dest_node = BROADCAST_ADDR;
        fwd.prev_hop = self.node_id;
        fwd.hop_count = fwd.hop_count.saturating_add(1);
        self.transmit(&fwd, &rreq.encode(), &[])
    }

    /// Route reply travelling back to the requester: learn the forward
    /// path, flush anything that was waiting on it, forward if we are not
    /// the requester.
    pub(crate) fn handle_route_reply(
        &mut self,
        header: &BaseHeader,
        payload: &[u8],
    ) -> Result<(), RouterError> {
        let rrep = RouteReplyHeader::decode(payload)?;

        self.learn_route(
            rrep.target_node,
            header.prev_hop,
            rrep.num_hops.saturating_add(1),
        );
        self.learn_route(header.prev_hop, header.prev_hop, 1);

        if self.routes.contains(rrep.target_node) {
            self.flush_data_queue(rrep.target_node);
            self.flush_move_queue(rrep.target_node);
            self.flush_user_route_queue(rrep.target_node);
        }

        if header.origin_node == self.node_id {
            debug!("route reply for my request: {} reachable", rrep.target_node);
            return Ok(());
        }

        let Some(entry) = self.routes.get(header.origin_node) else {
            debug!(
                "route reply with no path back to requester {}",
                header.origin_node
            );
            return Ok(());
        };

        let mut fwd = *header;
        fwd.dest_node = entry.next_hop;
        fwd.prev_hop = self.node_id;
        fwd.hop_count = fwd.hop_count.saturating_add(1);
        let mut ext = rrep;
        ext.num_hops = ext.num_hops.saturating_add(1);
        self.transmit(&fwd, &ext.encode(), &[])
    }

    /// Route error travelling back to the origin of the failed packet.
    pub(crate) fn handle_route_error(
        &mut self,
        header: &BaseHeader,
        payload: &[u8],
    ) -> Result<(), RouterError> {
        let rerr = RouteErrorHeader::decode(payload)?;

        if rerr.broken_node != rerr.reporter_node {
            self.invalidate_routes(rerr.broken_node, rerr.original_dest);
        } else {
            // The reporter names itself: only the final destination is
            // known-bad, the link to the reporter still works.
            self.routes.remove(rerr.original_dest);
            if self.gateways.contains(rerr.original_dest) {
                self.gateways.recompute(&self.routes);
            }
        }

        if header.origin_node == self.node_id {
            debug!("packet {} failed en route", rerr.original_packet_id);
            return Ok(());
        }

        let Some(entry) = self.routes.get(header.origin_node) else {
            debug!("cannot deliver route error to {}", header.origin_node);
            return Ok(());
        };

        let mut fwd = *header;
        fwd.dest_node = entry.next_hop;
        fwd.prev_hop = self.node_id;
        fwd.hop_count = fwd.hop_count.saturating_add(1);
        self.transmit(&fwd, &rerr.encode(), &[])
    }

    /// Node-addressed payload: acknowledge per hop, deliver or forward.
    pub(crate) fn handle_data(
        &mut self,
        header: &BaseHeader,
        payload: &[u8],
    ) -> Result<(), RouterError> {
        let dh = DataHeader::decode(payload)?;
        let data = &payload[DataHeader::WIRE_LEN..];

        if header.flags & flags::REQ_ACK != 0 {
            self.send_ack(header.prev_hop, header.packet_id);
        }

        if dh.final_dest == self.node_id {
            self.bridge.notify(Notification::NodeData {
                from_node: header.origin_node,
                data: data.to_vec(),
                packet_id: header.packet_id,
            });
            return Ok(());
        }

        let mut fwd = *header;
        fwd.prev_hop = self.node_id;

        if dh.final_dest == BROADCAST_ADDR {
            // Deliver locally and keep the flood going; dedup and the
            // seen-set bound terminate it.
            self.bridge.notify(Notification::BroadcastData {
                from_node: header.origin_node,
                data: data.to_vec(),
                packet_id: header.packet_id,
            });
            fwd.dest_node = BROADCAST_ADDR;
        } else {
            let Some(entry) = self.routes.get(dh.final_dest) else {
                debug!("no route to forward data to {}", dh.final_dest);
                self.send_route_error(
                    self.node_id,
                    header.origin_node,
                    dh.final_dest,
                    header.packet_id,
                );
                return Ok(());
            };
            fwd.dest_node = entry.next_hop;
        }

        fwd.hop_count = fwd.hop_count.saturating_add(1);
        self.transmit(&fwd, &dh.encode(), data)
    }

    /// Periodic differential broadcast from another node: refresh the
    /// known-node set, the gateway set, routes and the user directory,
    /// then forward within the hop cap.
    pub(crate) fn handle_broadcast_info(
        &mut self,
        header: &BaseHeader,
        payload: &[u8],
    ) -> Result<(), RouterError> {
        let diff = DiffBroadcastHeader::decode(payload)?;

        self.known_nodes.insert(header.prev_hop);
        self.known_nodes.insert(header.origin_node);

        self.learn_route(header.prev_hop, header.prev_hop, 1);
        if header.origin_node != self.node_id {
            self.learn_route(
                header.origin_node,
                header.prev_hop,
                header.hop_count.saturating_add(1),
            );
        }

        if GatewayRole::from_flags(header.flags) == GatewayRole::IAmGateway {
            if self.gateways.add(header.origin_node, &self.routes) {
                debug!("gateway discovered: {}", header.origin_node);
            }
        } else {
            self.gateways.remove(header.origin_node, &self.routes);
        }
        self.bridge.set_gateway_state(self.gateways.any_known());

        for user in &diff.added {
            self.gut.upsert(*user, header.origin_node);
        }
        for user in &diff.removed {
            self.gut.remove(*user);
        }

        let mut fwd = *header;
        fwd.prev_hop = self.node_id;
        fwd.hop_count = fwd.hop_count.saturating_add(1);
        if fwd.hop_count >= self.config.max_hops {
            debug!("broadcast info reached hop cap, not forwarded");
            return Ok(());
        }
        self.transmit(&fwd, &diff.encode(), &[])
    }

    /// Explicit per-hop acknowledgement.
    pub(crate) fn handle_ack(
        &mut self,
        _header: &BaseHeader,
        payload: &[u8],
    ) -> Result<(), RouterError> {
        let ack = AckHeader::decode(payload)?;
        self.retry_remove(ack.original_packet_id);
        Ok(())
    }

    /// User lookup flood, the directory analogue of a route request.
    pub(crate) fn handle_user_request(
        &mut self,
        header: &BaseHeader,
        payload: &[u8],
    ) -> Result<(), RouterError> {
        let ureq = UserRequestHeader::decode(payload)?;

        self.learn_route(header.prev_hop, header.prev_hop, 1);
        self.learn_route(
            header.origin_node,
            header.prev_hop,
            header.hop_count.saturating_add(1),
        );

        if self.bridge.knows_user(ureq.user) {
            self.send_user_reply(header.origin_node, self.node_id, ureq.user, header.prev_hop, 0, 0);
            return Ok(());
        }

        if let Some(gut_entry) = self.gut.lookup(ureq.user) {
            if let Some(route) = self.routes.get(gut_entry.home_node) {
                if route.hop_count >= self.config.user_reply_threshold {
                    self.send_user_reply(
                        header.origin_node,
                        gut_entry.home_node,
                        ureq.user,
                        header.prev_hop,
                        0,
                        header
                            .hop_count
                            .saturating_add(1)
                            .saturating_add(route.hop_count),
                    );
                    return Ok(());
                }
            }
        }

        let mut fwd = *header;
        fwd.prev_hop = self.node_id;
        fwd.hop_count = fwd.hop_count.saturating_add(1);
        self.transmit(&fwd, &ureq.encode(), &[])
    }

    /// Directory answer travelling back to the asking node.
    pub(crate) fn handle_user_reply(
        &mut self,
        header: &BaseHeader,
        payload: &[u8],
    ) -> Result<(), RouterError> {
        let urep = UserReplyHeader::decode(payload)?;

        self.learn_route(header.prev_hop, header.prev_hop, 1);
        self.learn_route(
            urep.home_node,
            header.prev_hop,
            header.hop_count.saturating_add(1),
        );
        self.gut.upsert(urep.user, urep.home_node);

        if header.origin_node == self.node_id {
            // Our lookup completed: re-drive every message that was parked
            // on the directory, keeping the original packet ids.
            for entry in self.pending.pop_user_dir(urep.user) {
                self.send_user_message(
                    entry.from_user,
                    urep.user,
                    &entry.data,
                    entry.packet_id,
                    entry.flags,
                );
            }
            return Ok(());
        }

        let Some(route) = self.routes.get(header.origin_node) else {
            debug!("user reply with no path back to {}", header.origin_node);
            return Ok(());
        };

        let mut fwd = *header;
        fwd.dest_node = route.next_hop;
        fwd.prev_hop = self.node_id;
        fwd.hop_count = fwd.hop_count.saturating_add(1);
        self.transmit(&fwd, &urep.encode(), &[])
    }

    /// A user was not where the directory said; drop the stale binding
    /// only if it still points at the reporting node.
    pub(crate) fn handle_user_error(
        &mut self,
        header: &BaseHeader,
        payload: &[u8],
    ) -> Result<(), RouterError> {
        let uerr = UserErrorHeader::decode(payload)?;

        self.learn_route(header.prev_hop, header.prev_hop, 1);
        if self.gut.remove_if_home(uerr.user, uerr.home_node) {
            debug!("dropped stale directory entry for user {}", uerr.user);
        }

        if header.origin_node == self.node_id {
            return Ok(());
        }

        let Some(route) = self.routes.get(header.origin_node) else {
            debug!("cannot deliver user error to {}", header.origin_node);
            return Ok(());
        };

        let mut fwd = *header;
        fwd.dest_node = route.next_hop;
        fwd.prev_hop = self.node_id;
        fwd.hop_count = fwd.hop_count.saturating_add(1);
        self.transmit(&fwd, &uerr.encode(), &[])
    }

    /// User-addressed payload: acknowledge per hop, then deliver to the
    /// local bridge, hand to the uplink, spool offline, or forward.
    pub(crate) fn handle_user_message(
        &mut self,
        header: &BaseHeader,
        payload: &[u8],
    ) -> Result<(), RouterError> {
        let umh = UserMessageHeader::decode(payload)?;
        let data = &payload[UserMessageHeader::WIRE_LEN..];

        if header.flags & flags::REQ_ACK != 0 {
            self.send_ack(header.prev_hop, header.packet_id);
        }

        let role = GatewayRole::from_flags(header.flags);

        if umh.to_node == self.node_id && role == GatewayRole::ToGateway {
            match &self.uplink {
                Some(uplink) if uplink.is_online() => {
                    uplink.uplink(umh.from_user, umh.to_user, data);
                }
                _ => warn!("gateway-bound message arrived but the uplink is offline"),
            }
            return Ok(());
        }

        if umh.to_node == self.node_id {
            if !self.bridge.knows_user(umh.to_user) {
                debug!("user {} is not here, raising user error", umh.to_user);
                self.send_user_error(
                    umh.to_user,
                    self.node_id,
                    header.origin_node,
                    header.packet_id,
                    header.prev_hop,
                );
                return Ok(());
            }

            let kind = if role == GatewayRole::FromGateway {
                DeliveryKind::Gateway
            } else if header.flags & flags::ENC_MSG != 0 {
                DeliveryKind::Encrypted
            } else {
                DeliveryKind::Plain
            };

            if !self.bridge.is_online(umh.to_user) {
                debug!("user {} offline, spooling message", umh.to_user);
                self.bridge.queue_offline(
                    umh.to_user,
                    OfflineMessage {
                        kind,
                        packet_id: header.packet_id,
                        to_user: umh.to_user,
                        from_user: umh.from_user,
                        data: data.to_vec(),
                    },
                );
                return Ok(());
            }

            self.bridge.notify(Notification::UserData {
                kind,
                to_user: umh.to_user,
                from_user: umh.from_user,
                data: data.to_vec(),
                packet_id: header.packet_id,
            });
            return Ok(());
        }

        let Some(route) = self.routes.get(umh.to_node) else {
            debug!("no route to forward user message to {}", umh.to_node);
            self.send_route_error(self.node_id, header.origin_node, umh.to_node, header.packet_id);
            return Ok(());
        };

        let mut fwd = *header;
        fwd.dest_node = route.next_hop;
        fwd.prev_hop = self.node_id;
        fwd.hop_count = fwd.hop_count.saturating_add(1);
        self.transmit(&fwd, &umh.encode(), data)
    }

    /// Public-key lookup: cache the offered key, answer from our cache or
    /// keep flooding within the hop cap.
    pub(crate) fn handle_pubkey_request(
        &mut self,
        header: &BaseHeader,
        payload: &[u8],
    ) -> Result<(), RouterError> {
        let request = PubKeyRequestHeader::decode(payload)?;

        self.keys.insert(request.sender_user, request.public_key);

        if let Some(target_key) = self.keys.get(request.target_user) {
            // Local clients may be about to receive encrypted traffic from
            // the requester; push their key down right away.
            self.bridge.notify(Notification::PublicKey {
                user: request.sender_user,
                key: request.public_key,
            });
            self.send_pubkey_response(
                header.prev_hop,
                request.target_user,
                header.origin_node,
                target_key,
            );
            return Ok(());
        }

        let mut fwd = *header;
        fwd.prev_hop = self.node_id;
        fwd.hop_count = fwd.hop_count.saturating_add(1);
        if fwd.hop_count >= self.config.max_hops {
            return Ok(());
        }
        self.transmit(&fwd, &request.encode(), &[])
    }

    /// Public key travelling back to whoever asked.
    pub(crate) fn handle_pubkey_response(
        &mut self,
        header: &BaseHeader,
        payload: &[u8],
    ) -> Result<(), RouterError> {
        let response = PubKeyResponseHeader::decode(payload)?;

        self.keys.insert(response.user, response.public_key);

        if header.origin_node == self.node_id {
            self.bridge.notify(Notification::PublicKey {
                user: response.user,
                key: response.public_key,
            });
            return Ok(());
        }

        let Some(route) = self.routes.get(header.origin_node) else {
            return Ok(());
        };

        let mut fwd = *header;
        fwd.dest_node = route.next_hop;
        fwd.prev_hop = self.node_id;
        fwd.hop_count = fwd.hop_count.saturating_add(1);
        self.transmit(&fwd, &response.encode(), &[])
    }

    /// A user re-homed: everyone updates the directory; the old home node
    /// replays the offline inbox toward the new home, paced by the spool,
    /// then forgets the user.
    pub(crate) fn handle_move_user_request(
        &mut self,
        header: &BaseHeader,
        payload: &[u8],
    ) -> Result<(), RouterError> {
        let request = MoveUserRequestHeader::decode(payload)?;

        self.learn_route(header.prev_hop, header.prev_hop, 1);
        self.gut.upsert(request.user, header.origin_node);

        if request.old_home != self.node_id {
            match self.routes.get(request.old_home) {
                Some(route) => {
                    let mut fwd = *header;
                    fwd.dest_node = route.next_hop;
                    fwd.prev_hop = self.node_id;
                    fwd.hop_count = fwd.hop_count.saturating_add(1);
                    return self.transmit(&fwd, &request.encode(), &[]);
                }
                None => {
                    self.pending.push_move(
                        request.old_home,
                        PendingMove {
                            user: request.user,
                            old_home: request.old_home,
                            queued_at: Instant::now(),
                        },
                    );
                    self.send_route_request(request.old_home);
                    return Ok(());
                }
            }
        }

        let now = Instant::now();
        let inbox = self.bridge.pop_inbox(request.user);
        if !inbox.is_empty() {
            debug!(
                "handing {} buffered messages for user {} to node {}",
                inbox.len(),
                request.user,
                header.origin_node
            );
        }
        for message in inbox {
            // Replays must arrive with the kind they were delivered with.
            let msg_flags = match message.kind {
                DeliveryKind::Encrypted => flags::ENC_MSG,
                DeliveryKind::Gateway => flags::FROM_GATEWAY,
                DeliveryKind::Plain => 0,
            };
            self.spool.push(
                SpoolEntry {
                    from_user: message.from_user,
                    to_user: message.to_user,
                    data: message.data,
                    packet_id: message.packet_id,
                    flags: msg_flags,
                },
                now,
            );
        }
        self.bridge.forget_user(request.user);
        Ok(())
    }
}
