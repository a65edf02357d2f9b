//! Local repair: when the main route to a destination breaks, neighbours are asked for any alive
//! route they know of. Answers populate the alternate table and are used until the regular update
//! protocol catches up.

use std::time::Duration;

use log::{debug, trace};
use serde_json::json;

use crate::concepts::packet::{Message, OutboundPacket, Packet, RouteAck, RouteRequest};
use crate::concepts::route::{RouteEntry, RouteFlag};
use crate::framework::RoutingSystem;
use crate::router::Router;
use crate::timer::TimerEvent;
use crate::util::jitter;

impl<T: RoutingSystem> Router<T> {
    /// Broadcasts a request for `destination` unless one is already in flight
    pub fn send_route_request(&mut self, destination: &T::NodeAddress, now: Duration) {
        if self.is_own_address(destination) {
            return;
        }
        if self.periodic_update_due(now) {
            trace!("{} holds back a request, periodic update is due", json!(self.address));
            return;
        }
        if self
            .alternates
            .request_in_flight(destination, now, self.params.request_validity)
        {
            trace!("{} already searches for {}", json!(self.address), json!(destination));
            return;
        }
        let link = match self.routes.lookup_route(destination) {
            Some(route) => route.link.clone(),
            None => match self.interfaces.keys().next() {
                Some(link) => link.clone(),
                None => return,
            },
        };
        self.alternates
            .begin_search(destination, &self.address, link, now);

        let packet = Packet {
            messages: vec![Message::Request(RouteRequest {
                destination: destination.clone(),
            })],
        };
        let targets: Vec<(T::Link, T::NodeAddress)> = self
            .interfaces
            .values()
            .map(|itf| (itf.link.clone(), itf.broadcast.clone()))
            .collect();
        for (link, broadcast) in targets {
            let at = now + jitter(&mut self.rng, Duration::from_millis(1), 50);
            self.timers.schedule(
                at,
                TimerEvent::Transmit(OutboundPacket {
                    link,
                    dest: broadcast,
                    packet: packet.clone(),
                }),
            );
        }
        debug!("{} requests a route to {}", json!(self.address), json!(destination));
    }

    pub(crate) fn handle_request(&mut self, req: &RouteRequest<T>, link: &T::Link, sender: &T::NodeAddress, now: Duration) {
        if self.periodic_update_due(now) {
            trace!("{} ignores a request, periodic update is due", json!(self.address));
            return;
        }
        self.purge(now);

        if self.is_own_address(&req.destination) {
            self.send_ack(&req.destination, 1, Duration::ZERO, link, sender);
            return;
        }

        let strict = self.params.periodic_update_interval;
        if let Some(route) = self.routes.lookup_route(&req.destination).cloned() {
            if route.next_hop == *sender {
                trace!(
                    "{} will not answer {} with a route through itself",
                    json!(self.address),
                    json!(sender)
                );
                return;
            }
            if route.flag == RouteFlag::Valid
                && route.is_alive(now, strict)
                && (route.is_neighbour() || self.main_next_hop_alive(&route, now, strict))
            {
                self.send_ack(
                    &req.destination,
                    route.hops.saturating_add(1),
                    route.lifetime(now),
                    link,
                    sender,
                );
                return;
            }
        }

        let Some(alt) = self.alternates.lookup(&req.destination).cloned() else {
            trace!("{} has nothing to offer for {}", json!(self.address), json!(req.destination));
            return;
        };
        if alt.next_hop == *sender {
            debug!(
                "{} drops its detour to {}, {} lost it",
                json!(self.address),
                json!(req.destination),
                json!(sender)
            );
            self.alternates.delete(&req.destination);
            return;
        }
        if self
            .alternates
            .ackable(&req.destination, now, self.params.alternate_ack_window)
            .is_none()
        {
            return;
        }
        let threshold = self.params.alive_threshold();
        let next_hop_alive = self.main_next_hop_alive(&alt, now, threshold)
            || self
                .alternates
                .lookup(&alt.next_hop)
                .is_some_and(|nh| nh.flag == RouteFlag::Valid && nh.is_alive(now, threshold));
        if alt.is_neighbour() || next_hop_alive {
            self.send_ack(
                &req.destination,
                alt.hops.saturating_add(1),
                alt.lifetime(now),
                link,
                sender,
            );
        }
    }

    fn main_next_hop_alive(&self, route: &RouteEntry<T>, now: Duration, threshold: Duration) -> bool {
        self.routes
            .lookup_route(&route.next_hop)
            .is_some_and(|nh| nh.is_alive(now, threshold))
    }

    /// Unicasts an acknowledgement back to the requester on the link the request came in on
    fn send_ack(
        &mut self,
        destination: &T::NodeAddress,
        hops: u16,
        elapsed: Duration,
        link: &T::Link,
        requester: &T::NodeAddress,
    ) {
        debug!(
            "{} acknowledges a route to {} for {} ({} hops)",
            json!(self.address),
            json!(destination),
            json!(requester),
            hops
        );
        self.outbound_packets.push(OutboundPacket {
            link: link.clone(),
            dest: requester.clone(),
            packet: Packet {
                messages: vec![Message::Ack(RouteAck {
                    destination: destination.clone(),
                    hops,
                    elapsed,
                })],
            },
        });
    }

    pub(crate) fn handle_ack(&mut self, ack: &RouteAck<T>, link: &T::Link, sender: &T::NodeAddress, now: Duration) {
        if self.is_own_address(&ack.destination) {
            return;
        }
        if let Some(route) = self.routes.lookup_route(&ack.destination) {
            if route.next_hop == *sender && route.flag == RouteFlag::Valid && route.lifetime(now) <= ack.elapsed {
                trace!(
                    "{} already has newer information on {} from {}",
                    json!(self.address),
                    json!(ack.destination),
                    json!(sender)
                );
                return;
            }
        }
        let changed = self.alternates.accept_ack(
            ack,
            sender,
            link.clone(),
            self.params.settling_time,
            now,
        );
        if changed {
            self.release_queued(&ack.destination, now);
        }
    }
}
