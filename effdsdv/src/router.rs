use std::collections::HashMap;
use std::time::Duration;

use educe::Educe;
use log::{debug, error, trace, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_with::serde_as;

use crate::alternate::AlternateTable;
use crate::concepts::interface::Interface;
use crate::concepts::packet::{DistanceVector, ForwardedPacket, Message, OutboundPacket, Packet};
use crate::concepts::route::{RouteEntry, RouteFlag};
use crate::concepts::table::{Purged, RouteTable};
use crate::feedback::{CodecError, RoutingError};
use crate::framework::{ProtocolParams, RoutingSystem};
use crate::queue::PacketQueue;
use crate::resolve::{resolve, Resolution};
use crate::scheduler::AdvertisementScheduler;
use crate::timer::{TimerEvent, TimerQueue};
use crate::util::{is_fresher, is_poisoned, jitter, poison};
use crate::wire;

#[serde_as]
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Router<T: RoutingSystem + ?Sized> {
    pub address: T::NodeAddress,
    #[serde_as(as = "Vec<(_, _)>")]
    pub interfaces: HashMap<T::Link, Interface<T>>,
    /// our own sequence number, always even
    pub seqno: u32,
    pub params: ProtocolParams,
    /// routes used for forwarding
    pub routes: RouteTable<T>,
    /// changes not yet advertised
    pub advertisements: AdvertisementScheduler<T>,
    /// local repair state
    pub alternates: AlternateTable<T>,
    pub timers: TimerQueue<T>,
    pub queue: PacketQueue<T>,
    /// control packets the driver must send
    pub outbound_packets: Vec<OutboundPacket<T>>,
    /// data packets released from the queue, ready for the forwarding layer
    pub forwarded_packets: Vec<ForwardedPacket<T>>,
    periodic_deadline: Option<Duration>,
    #[serde(skip, default = "fresh_rng")]
    pub(crate) rng: StdRng,
}

fn fresh_rng() -> StdRng {
    StdRng::from_entropy()
}

/// Where a data packet leaves this node
#[derive(Educe)]
#[educe(Clone(bound()), Debug(bound()), PartialEq(bound()))]
pub struct Hop<T: RoutingSystem + ?Sized> {
    pub next_hop: T::NodeAddress,
    pub link: T::Link,
    /// distance to the destination
    pub hops: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    Forwarded,
    /// held until a route is found
    Queued,
}

impl<T: RoutingSystem> Router<T> {
    pub fn new(address: T::NodeAddress) -> Self {
        let params = T::config();
        if let Err(err) = params.validate() {
            error!("{} runs with invalid protocol parameters: {}", json!(address), err);
        }
        Self {
            address,
            interfaces: HashMap::new(),
            seqno: 0,
            queue: PacketQueue::from_params(&params),
            params,
            routes: RouteTable::new(),
            advertisements: AdvertisementScheduler::new(),
            alternates: AlternateTable::new(),
            timers: TimerQueue::new(),
            outbound_packets: Vec::new(),
            forwarded_packets: Vec::new(),
            periodic_deadline: None,
            rng: fresh_rng(),
        }
    }

    /// Reseeds the jitter source, for reproducible simulations
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    // region Lifecycle

    /// Arms the first periodic update
    pub fn start(&mut self, now: Duration) {
        let at = now + jitter(&mut self.rng, Duration::from_micros(1), 1000);
        self.timers.schedule(at, TimerEvent::PeriodicUpdate);
        self.periodic_deadline = Some(at);
    }

    /// Cancels every outstanding timer and drops pending advertisements, detours and queued packets
    pub fn shutdown(&mut self) {
        self.timers.clear();
        self.advertisements.clear();
        self.alternates.clear();
        self.queue.clear();
        self.periodic_deadline = None;
        debug!("{} shut down", json!(self.address));
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.next_deadline()
    }

    /// Runs every timer due at `now`
    pub fn poll(&mut self, now: Duration) {
        while let Some((at, event)) = self.timers.pop_due(now) {
            match event {
                TimerEvent::PeriodicUpdate => {
                    self.schedule_periodic_update(at);
                    self.send_periodic_update(now);
                }
                TimerEvent::TriggeredUpdate => self.send_triggered_update(now),
                TimerEvent::SettlingExpired {
                    destination,
                    generation,
                } => {
                    if self.advertisements.on_fired(&destination, generation) {
                        self.schedule_triggered_update(now, true);
                    }
                }
                TimerEvent::Transmit(packet) => self.outbound_packets.push(packet),
            }
        }
    }

    /// Whether the next periodic update is close enough to make a route request pointless
    pub(crate) fn periodic_update_due(&self, now: Duration) -> bool {
        self.periodic_deadline
            .is_some_and(|at| at.saturating_sub(now) < self.params.periodic_suppression_window)
    }
    // endregion

    // region Interface

    /// Registers an interface and its pinned broadcast route
    pub fn add_interface(&mut self, link: T::Link, address: T::NodeAddress, broadcast: T::NodeAddress) {
        let mut placeholder = RouteEntry::new(
            broadcast.clone(),
            broadcast.clone(),
            link.clone(),
            0,
            0,
            Duration::ZERO,
        );
        placeholder.pinned = true;
        self.routes.delete_route(&broadcast);
        let _ = self.routes.add_route(placeholder);
        self.interfaces
            .insert(link.clone(), Interface::new(link, address, broadcast));
    }

    /// Forgets an interface and every route bound to it
    pub fn remove_interface(&mut self, link: &T::Link) -> Result<(), RoutingError<T>> {
        if self.interfaces.remove(link).is_none() {
            return Err(RoutingError::NoInterface { link: link.clone() });
        }
        if self.interfaces.is_empty() {
            debug!("{} has no interfaces left", json!(self.address));
            self.routes.clear_all();
            return Ok(());
        }
        self.routes.delete_all_routes_on_link(link);
        self.advertisements.table.delete_all_routes_on_link(link);
        Ok(())
    }

    pub fn is_own_address(&self, addr: &T::NodeAddress) -> bool {
        *addr == self.address || self.interfaces.values().any(|itf| itf.address == *addr)
    }

    /// Queues `packet` for every interface, addressed to its broadcast address
    pub(crate) fn write_broadcast_packet(&mut self, packet: &Packet<T>) {
        for itf in self.interfaces.values() {
            self.outbound_packets.push(OutboundPacket {
                link: itf.link.clone(),
                dest: itf.broadcast.clone(),
                packet: packet.clone(),
            });
        }
    }
    // endregion

    // region Route Selection

    /// Sweeps the main table, removed routes are poisoned and announced with a triggered update
    pub fn purge(&mut self, now: Duration) {
        let purged = self.purge_routes(now);
        if purged.removed.is_empty() {
            return;
        }
        for mut entry in purged.removed {
            entry.seqno = poison(entry.seqno);
            entry.changed = true;
            self.advertisements.cancel(&entry.destination);
            self.advertisements.stage(entry);
        }
        self.schedule_triggered_update(now, false);
    }

    fn purge_routes(&mut self, now: Duration) -> Purged<T> {
        let purged = self.routes.purge(now, self.params.hold_down());
        for r in &purged.removed {
            debug!("{} purged route to {}", json!(self.address), json!(r.destination));
        }
        for r in &purged.invalidated {
            debug!("{} invalidated route to {}", json!(self.address), json!(r.destination));
        }
        purged
    }

    /// Resolves `destination`, asking neighbours for a detour when there is no usable route
    pub fn lookup_route(&mut self, destination: &T::NodeAddress, now: Duration) -> Resolution<T> {
        self.lookup(destination, now, false)
    }

    /// Like [`Router::lookup_route`] but never sends a route request
    pub fn lookup_route_for_broadcast(&mut self, destination: &T::NodeAddress, now: Duration) -> Resolution<T> {
        self.lookup(destination, now, true)
    }

    fn lookup(&mut self, destination: &T::NodeAddress, now: Duration, for_broadcast: bool) -> Resolution<T> {
        let lookup = resolve(
            &self.routes,
            &self.alternates,
            destination,
            now,
            &self.params,
            for_broadcast,
        );
        if lookup.actions.delete_alternate {
            debug!("{} dropped the stale detour to {}", json!(self.address), json!(destination));
            self.alternates.delete(destination);
        }
        if lookup.actions.request {
            self.send_route_request(destination, now);
        }
        lookup.resolution
    }

    /// The main table with acknowledged detours standing in for invalid routes
    pub fn visible_routes(&self) -> Vec<RouteEntry<T>> {
        self.routes
            .list_all_routes()
            .map(|r| {
                if r.flag == RouteFlag::Invalid {
                    if let Some(alt) = self.alternates.lookup(&r.destination) {
                        if alt.flag == RouteFlag::Valid {
                            return alt.clone();
                        }
                    }
                }
                r.clone()
            })
            .collect()
    }

    /// Resolves `destination` down to the neighbour and link a packet leaves through
    fn resolve_hop(&mut self, destination: &T::NodeAddress, now: Duration, for_broadcast: bool) -> Option<Hop<T>> {
        let route = self.lookup(destination, now, for_broadcast).found()?;
        if route.hops <= 1 || for_broadcast {
            return Some(Hop {
                next_hop: route.next_hop,
                link: route.link,
                hops: route.hops,
            });
        }
        let neigh = self.lookup(&route.next_hop, now, false).found()?;
        Some(Hop {
            next_hop: route.next_hop,
            link: neigh.link,
            hops: route.hops,
        })
    }

    /// Chooses the next hop for a locally originated packet
    pub fn route_output(&mut self, destination: &T::NodeAddress, now: Duration) -> Result<Hop<T>, RoutingError<T>> {
        if self.interfaces.is_empty() {
            return Err(RoutingError::NoRoute {
                destination: destination.clone(),
            });
        }
        self.purge(now);
        match self.resolve_hop(destination, now, false) {
            Some(hop) => {
                if self.params.enable_buffering {
                    self.look_for_queued_packets(now);
                }
                Ok(hop)
            }
            None => {
                trace!("{} has no route to {}", json!(self.address), json!(destination));
                Err(RoutingError::NoRoute {
                    destination: destination.clone(),
                })
            }
        }
    }

    /// Sends a locally originated packet, holding it back while a route is being resolved
    pub fn send(&mut self, destination: T::NodeAddress, payload: T::Payload, now: Duration) -> Result<Dispatch, RoutingError<T>> {
        match self.route_output(&destination, now) {
            Ok(hop) => {
                self.forwarded_packets.push(ForwardedPacket {
                    destination,
                    next_hop: hop.next_hop,
                    link: hop.link,
                    payload,
                });
                Ok(Dispatch::Forwarded)
            }
            Err(RoutingError::NoRoute { .. }) if self.params.enable_buffering && !self.interfaces.is_empty() => {
                self.queue.enqueue(destination.clone(), payload, now)?;
                debug!("{} queued a packet for {}", json!(self.address), json!(destination));
                Ok(Dispatch::Queued)
            }
            Err(err) => {
                warn!("{} dropped a packet: {}", json!(self.address), err);
                Err(err)
            }
        }
    }

    /// Relays a packet that arrived from a neighbour
    pub fn forward(&mut self, destination: T::NodeAddress, payload: T::Payload, now: Duration) -> Result<Hop<T>, RoutingError<T>> {
        let Some(hop) = self.resolve_hop(&destination, now, false) else {
            warn!("{} has no route to forward a packet to {}", json!(self.address), json!(destination));
            return Err(RoutingError::NoRoute { destination });
        };
        self.forwarded_packets.push(ForwardedPacket {
            destination,
            next_hop: hop.next_hop.clone(),
            link: hop.link.clone(),
            payload,
        });
        Ok(hop)
    }

    /// Relays a broadcast packet, never triggers a route request
    pub fn forward_broadcast(&mut self, destination: T::NodeAddress, payload: T::Payload, now: Duration) -> Result<Hop<T>, RoutingError<T>> {
        let Some(hop) = self.resolve_hop(&destination, now, true) else {
            warn!("{} has no route to forward a broadcast to {}", json!(self.address), json!(destination));
            return Err(RoutingError::NoRoute { destination });
        };
        self.forwarded_packets.push(ForwardedPacket {
            destination,
            next_hop: hop.next_hop.clone(),
            link: hop.link.clone(),
            payload,
        });
        Ok(hop)
    }

    /// Releases queued packets for every destination that can be reached now
    pub fn look_for_queued_packets(&mut self, now: Duration) {
        for destination in self.queue.destinations(now) {
            self.release_queued(&destination, now);
        }
    }

    /// Releases the queued packets of `destination` if it can be reached
    pub(crate) fn release_queued(&mut self, destination: &T::NodeAddress, now: Duration) {
        if !self.queue.find_pending(destination, now) {
            return;
        }
        let Some(hop) = self.resolve_hop(destination, now, false) else {
            return;
        };
        while let Some(payload) = self.queue.dequeue(destination, now) {
            debug!(
                "{} releases a queued packet for {} via {}",
                json!(self.address),
                json!(destination),
                json!(hop.next_hop)
            );
            self.forwarded_packets.push(ForwardedPacket {
                destination: destination.clone(),
                next_hop: hop.next_hop.clone(),
                link: hop.link.clone(),
                payload,
            });
        }
    }
    // endregion

    // region Update Protocol

    /// Arms the next periodic update one interval after `from`
    fn schedule_periodic_update(&mut self, from: Duration) {
        let next = from
            + self.params.periodic_update_interval
            + jitter(&mut self.rng, Duration::from_micros(25), 1000);
        self.timers.schedule(next, TimerEvent::PeriodicUpdate);
        self.periodic_deadline = Some(next);
    }

    /// Broadcasts the whole table
    pub fn send_periodic_update(&mut self, now: Duration) {
        let purged = self.purge_routes(now);
        self.advertisements.merge_into(&mut self.routes);
        if self.interfaces.is_empty() {
            return;
        }

        self.seqno = self.seqno.wrapping_add(2);
        let mut packet = Packet::default();
        for route in self.visible_routes() {
            // interface broadcast placeholders
            if route.hops == 0 {
                continue;
            }
            packet.push(Message::Update(DistanceVector {
                destination: route.destination,
                hops: route.hops.saturating_add(1),
                seqno: route.seqno,
            }));
        }
        for removed in purged.removed {
            packet.push(Message::Update(DistanceVector {
                destination: removed.destination,
                hops: removed.hops.saturating_add(1),
                seqno: poison(removed.seqno),
            }));
        }
        packet.push(self.own_update());
        debug!(
            "{} sends a periodic update with {} entries",
            json!(self.address),
            packet.messages.len()
        );
        self.write_broadcast_packet(&packet);
    }

    /// Broadcasts the changes that are ready to go
    pub fn send_triggered_update(&mut self, _now: Duration) {
        let ready = self.advertisements.take_ready();
        if ready.is_empty() {
            trace!("{} has nothing to trigger", json!(self.address));
            return;
        }
        let mut packet = Packet::default();
        for entry in ready {
            packet.push(Message::Update(DistanceVector {
                destination: entry.destination.clone(),
                hops: entry.hops.saturating_add(1),
                seqno: entry.seqno,
            }));
            if !is_poisoned(entry.seqno) {
                let dst = entry.destination.clone();
                if self.routes.update(entry).is_err() {
                    trace!("{} advertised {} which left the main table", json!(self.address), json!(dst));
                }
            }
        }
        packet.push(self.own_update());
        debug!(
            "{} sends a triggered update with {} entries",
            json!(self.address),
            packet.messages.len()
        );
        self.write_broadcast_packet(&packet);
    }

    fn own_update(&self) -> Message<T> {
        Message::Update(DistanceVector {
            destination: self.address.clone(),
            hops: 1,
            seqno: self.seqno,
        })
    }

    /// Schedules a triggered update unless one is already on its way
    pub(crate) fn schedule_triggered_update(&mut self, now: Duration, after_reception: bool) {
        if self.timers.any(|ev| matches!(ev, TimerEvent::TriggeredUpdate)) {
            return;
        }
        let delay = if after_reception
            && self.params.enable_route_aggregation
            && !self.advertisements.table.is_empty()
        {
            self.params.route_aggregation_time
        } else {
            jitter(&mut self.rng, Duration::from_micros(1), 1000)
        };
        self.timers.schedule(now + delay, TimerEvent::TriggeredUpdate);
    }

    /// Decodes and handles a datagram received on `link` from the neighbour `sender`
    pub fn handle_datagram(
        &mut self,
        raw: &[u8],
        link: &T::Link,
        sender: &T::NodeAddress,
        now: Duration,
    ) -> Result<(), CodecError> {
        let packet = match wire::decode::<T>(raw) {
            Ok(packet) => packet,
            Err(err) => {
                warn!("{} dropped a malformed packet from {}: {}", json!(self.address), json!(sender), err);
                return Err(err);
            }
        };
        self.handle_packet(&packet, link, sender, now);
        Ok(())
    }

    /// handle a single packet
    pub fn handle_packet(&mut self, packet: &Packet<T>, link: &T::Link, sender: &T::NodeAddress, now: Duration) {
        if !self.interfaces.contains_key(link) {
            warn!("{} received a packet on an unknown link {:?}", json!(self.address), link);
            return;
        }
        if self.is_own_address(sender) {
            trace!("{} ignores its own packet", json!(self.address));
            return;
        }
        let mut contained_update = false;
        for msg in &packet.messages {
            match msg {
                Message::Update(dv) => {
                    contained_update = true;
                    self.handle_update(dv, link, sender, now);
                }
                Message::Request(req) => self.handle_request(req, link, sender, now),
                Message::Ack(ack) => self.handle_ack(ack, link, sender, now),
            }
        }
        if contained_update {
            self.schedule_triggered_update(now, true);
        }
    }

    /// Merges one distance vector received from `sender`
    fn handle_update(&mut self, dv: &DistanceVector<T>, link: &T::Link, sender: &T::NodeAddress, now: Duration) {
        if self.is_own_address(&dv.destination) {
            trace!("{} discards an update for itself from {}", json!(self.address), json!(sender));
            return;
        }
        let Some(main) = self.routes.lookup_route(&dv.destination).cloned() else {
            self.handle_unknown_destination(dv, link, sender, now);
            return;
        };
        if is_poisoned(dv.seqno) {
            self.handle_poison(dv, main, sender);
            return;
        }

        let current = self
            .advertisements
            .table
            .lookup_route(&dv.destination)
            .cloned()
            .unwrap_or_else(|| main.clone());
        if !is_fresher(dv.seqno, dv.hops, current.seqno, current.hops) {
            if dv.seqno == main.seqno && main.next_hop == *sender {
                if let Some(entry) = self.routes.lookup_route_mut(&dv.destination) {
                    entry.refreshed_at = now;
                }
            }
            self.advertisements.discard_unless_fresher(&dv.destination, &main);
            trace!(
                "{} discards a stale update for {} from {}",
                json!(self.address),
                json!(dv.destination),
                json!(sender)
            );
            return;
        }

        self.advertisements.cancel(&dv.destination);
        let metric_changed = dv.hops != current.hops || *sender != current.next_hop;
        let mut staged = current;
        staged.seqno = dv.seqno;
        staged.hops = dv.hops;
        staged.next_hop = sender.clone();
        staged.link = link.clone();
        staged.refreshed_at = now;
        staged.flag = RouteFlag::Valid;
        staged.changed = true;
        if metric_changed {
            let delay = AdvertisementScheduler::settling_time_for(&main, &self.params, now);
            staged.settling_time = delay;
            self.advertisements.stage(staged);
            self.advertisements
                .schedule(&dv.destination, now + delay, &mut self.timers);
            debug!(
                "{} staged a changed route to {} via {} ({} hops)",
                json!(self.address),
                json!(dv.destination),
                json!(sender),
                dv.hops
            );
        } else {
            self.advertisements.stage(staged);
        }
        self.alternates.delete(&dv.destination);
    }

    fn handle_unknown_destination(&mut self, dv: &DistanceVector<T>, link: &T::Link, sender: &T::NodeAddress, now: Duration) {
        if is_poisoned(dv.seqno) {
            trace!("{} ignores poison for unknown {}", json!(self.address), json!(dv.destination));
            self.alternates.delete(&dv.destination);
            return;
        }
        let mut entry = RouteEntry::new(
            dv.destination.clone(),
            sender.clone(),
            link.clone(),
            dv.seqno,
            dv.hops,
            now,
        );
        if let Some(staged) = self.advertisements.table.lookup_route(&dv.destination) {
            // a poison waiting to go out is only replaced by something fresher
            if !is_fresher(dv.seqno, dv.hops, staged.seqno, staged.hops) {
                trace!(
                    "{} discards a stale update for {} from {}",
                    json!(self.address),
                    json!(dv.destination),
                    json!(sender)
                );
                return;
            }
        }
        entry.settling_time = self.params.settling_time;
        entry.changed = true;
        debug!(
            "{} learned a new route to {} via {} ({} hops)",
            json!(self.address),
            json!(dv.destination),
            json!(sender),
            dv.hops
        );
        if let Err(err) = self.routes.add_route(entry.clone()) {
            error!("Unexpected state: {}", err);
        }
        self.advertisements.cancel(&dv.destination);
        self.advertisements.stage(entry);
    }

    /// Poison from the next hop tears down the route and everything behind it
    fn handle_poison(&mut self, dv: &DistanceVector<T>, main: RouteEntry<T>, sender: &T::NodeAddress) {
        if main.next_hop != *sender || dv.seqno <= main.seqno {
            self.advertisements.discard_unless_fresher(&dv.destination, &main);
            trace!(
                "{} ignores poison for {} from {}, it is not the next hop",
                json!(self.address),
                json!(dv.destination),
                json!(sender)
            );
            return;
        }
        debug!("{} lost its route to {}", json!(self.address), json!(dv.destination));
        let dependents = self.routes.list_destinations_with_next_hop(&dv.destination);
        let alt_dependents = self.alternates.with_next_hop(&dv.destination);

        self.routes.delete_route(&dv.destination);
        self.alternates.delete(&dv.destination);
        let mut poisoned = main;
        poisoned.seqno = dv.seqno;
        poisoned.changed = true;
        self.advertisements.cancel(&dv.destination);
        self.advertisements.stage(poisoned);

        for mut dep in dependents {
            debug!(
                "{} lost its route to {} through {}",
                json!(self.address),
                json!(dep.destination),
                json!(dv.destination)
            );
            self.routes.delete_route(&dep.destination);
            dep.seqno = poison(dep.seqno);
            dep.changed = true;
            self.advertisements.cancel(&dep.destination);
            self.advertisements.stage(dep);
        }
        for dst in alt_dependents {
            self.alternates.delete(&dst);
        }
    }
    // endregion

    /// Main and alternate tables for diagnostics
    pub fn routing_table_json(&self) -> serde_json::Value {
        let mut routes: Vec<&RouteEntry<T>> = self.routes.list_all_routes().collect();
        routes.sort_by(|a, b| a.destination.cmp(&b.destination));
        let mut alternates: Vec<&RouteEntry<T>> = self.alternates.table.list_all_routes().collect();
        alternates.sort_by(|a, b| a.destination.cmp(&b.destination));
        json!({
            "node": self.address,
            "seqno": self.seqno,
            "routes": routes,
            "alternates": alternates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concepts::packet::RouteRequest;
    use crate::test_system::TestSystem;
    use std::net::Ipv4Addr;

    const LINK: u32 = 0;

    fn addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 1, 1, last)
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn router() -> Router<TestSystem> {
        let mut router = Router::new(addr(1)).with_seed(1);
        router.add_interface(LINK, addr(1), addr(255));
        router
    }

    fn update(dst: u8, seqno: u32, hops: u16) -> Packet<TestSystem> {
        Packet {
            messages: vec![Message::Update(DistanceVector {
                destination: addr(dst),
                hops,
                seqno,
            })],
        }
    }

    fn updates_in(packets: &[OutboundPacket<TestSystem>]) -> Vec<DistanceVector<TestSystem>> {
        packets
            .iter()
            .flat_map(|p| p.packet.messages.iter())
            .filter_map(|m| match m {
                Message::Update(dv) => Some(dv.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn learns_new_route() {
        let mut router = router();
        router.handle_packet(&update(4, 4, 1), &LINK, &addr(2), secs(1));
        let entry = router.routes.lookup_route(&addr(4)).unwrap();
        assert_eq!((entry.next_hop, entry.hops, entry.seqno), (addr(2), 1, 4));
        assert_eq!(entry.flag, RouteFlag::Valid);
        assert!(router.advertisements.table.contains(&addr(4)));
    }

    #[test]
    fn changed_metric_waits_for_settling_time() {
        let mut router = router();
        router.handle_packet(&update(4, 4, 1), &LINK, &addr(2), secs(1));
        router.handle_packet(&update(4, 6, 3), &LINK, &addr(2), secs(2));

        let main = router.routes.lookup_route(&addr(4)).unwrap();
        assert_eq!((main.seqno, main.hops), (4, 1));
        let staged = router.advertisements.table.lookup_route(&addr(4)).unwrap();
        assert_eq!((staged.seqno, staged.hops), (6, 3));
        assert!(router.advertisements.is_pending(&addr(4)));
        // 0.875 * 5s + 0.125 * 1s
        assert_eq!(staged.settling_time, Duration::from_millis(4500));

        router.poll(Duration::from_millis(6400));
        assert!(updates_in(&router.outbound_packets).is_empty());
        assert_eq!(router.routes.lookup_route(&addr(4)).unwrap().hops, 1);

        // the expired timer schedules a triggered update
        router.poll(Duration::from_millis(6500));
        router.poll(Duration::from_millis(6501));
        let sent = updates_in(&router.outbound_packets);
        assert!(sent.iter().any(|dv| dv.destination == addr(4) && dv.seqno == 6 && dv.hops == 4));
        assert!(sent.iter().any(|dv| dv.destination == addr(1) && dv.hops == 1));
        let main = router.routes.lookup_route(&addr(4)).unwrap();
        assert_eq!((main.seqno, main.hops), (6, 3));
        assert!(router.advertisements.table.is_empty());
    }

    #[test]
    fn same_metric_goes_out_with_next_triggered_update() {
        let mut router = router();
        router.handle_packet(&update(4, 4, 2), &LINK, &addr(2), secs(1));
        router.poll(secs(2));
        router.outbound_packets.clear();

        router.handle_packet(&update(4, 6, 2), &LINK, &addr(2), secs(3));
        assert!(!router.advertisements.is_pending(&addr(4)));
        assert_eq!(router.routes.lookup_route(&addr(4)).unwrap().seqno, 4);
        router.poll(Duration::from_millis(3001));
        let sent = updates_in(&router.outbound_packets);
        assert!(sent.iter().any(|dv| dv.destination == addr(4) && dv.seqno == 6));
        let main = router.routes.lookup_route(&addr(4)).unwrap();
        assert_eq!(main.seqno, 6);
        assert_eq!(main.refreshed_at, secs(3));
    }

    #[test]
    fn aggregation_window_delays_triggered_update() {
        let mut router = router();
        router.params.enable_route_aggregation = true;
        router.handle_packet(&update(4, 4, 1), &LINK, &addr(2), secs(1));
        router.handle_packet(&update(5, 4, 1), &LINK, &addr(5), Duration::from_millis(1200));
        router.poll(Duration::from_millis(1900));
        assert!(router.outbound_packets.is_empty());

        router.poll(secs(2));
        assert_eq!(router.outbound_packets.len(), 1);
        let sent = updates_in(&router.outbound_packets);
        assert!(sent.iter().any(|dv| dv.destination == addr(4)));
        assert!(sent.iter().any(|dv| dv.destination == addr(5)));
    }

    #[test]
    fn settled_routes_wait_for_aggregation_window() {
        let mut router = router();
        router.params.enable_route_aggregation = true;
        router.handle_packet(&update(4, 4, 1), &LINK, &addr(2), secs(1));
        router.poll(secs(2));
        router.outbound_packets.clear();

        // 0.875 * 5s + 0.125 * 2s, the timer expires at 7.625s
        router.handle_packet(&update(4, 6, 3), &LINK, &addr(2), secs(3));
        router.poll(Duration::from_millis(8500));
        assert!(updates_in(&router.outbound_packets).is_empty());
        assert!(!router.advertisements.is_pending(&addr(4)));

        router.poll(Duration::from_millis(8700));
        let sent = updates_in(&router.outbound_packets);
        assert!(sent.iter().any(|dv| dv.destination == addr(4) && dv.seqno == 6 && dv.hops == 4));
        assert_eq!(router.routes.lookup_route(&addr(4)).unwrap().hops, 3);
    }

    #[test]
    fn older_updates_leave_settling_entry_alone() {
        let mut router = router();
        router.handle_packet(&update(4, 4, 1), &LINK, &addr(2), secs(1));
        router.poll(secs(2));
        router.handle_packet(&update(4, 6, 3), &LINK, &addr(2), secs(3));
        assert!(router.advertisements.is_pending(&addr(4)));

        router.handle_packet(&update(4, 4, 2), &LINK, &addr(3), secs(4));
        router.handle_packet(&update(4, 2, 1), &LINK, &addr(2), secs(4));

        let staged = router.advertisements.table.lookup_route(&addr(4)).unwrap();
        assert_eq!((staged.next_hop, staged.seqno, staged.hops), (addr(2), 6, 3));
        assert!(router.advertisements.is_pending(&addr(4)));
        assert_eq!(router.advertisements.pending_timers(), 1);
        assert!(router
            .timers
            .any(|ev| matches!(ev, TimerEvent::SettlingExpired { destination, .. } if *destination == addr(4))));
        let main = router.routes.lookup_route(&addr(4)).unwrap();
        assert_eq!((main.next_hop, main.seqno, main.hops), (addr(2), 4, 1));

        // the original timer still fires
        router.poll(secs(8));
        let main = router.routes.lookup_route(&addr(4)).unwrap();
        assert_eq!((main.seqno, main.hops), (6, 3));
    }

    #[test]
    fn stale_updates_are_discarded() {
        let mut router = router();
        router.handle_packet(&update(4, 6, 2), &LINK, &addr(2), secs(1));
        router.poll(secs(2));
        router.handle_packet(&update(4, 4, 1), &LINK, &addr(3), secs(3));
        router.handle_packet(&update(4, 6, 3), &LINK, &addr(3), secs(3));
        let main = router.routes.lookup_route(&addr(4)).unwrap();
        assert_eq!((main.next_hop, main.seqno, main.hops), (addr(2), 6, 2));
        assert!(router.advertisements.table.is_empty());

        // an equal update from the next hop keeps the route alive
        router.handle_packet(&update(4, 6, 2), &LINK, &addr(2), secs(9));
        assert_eq!(router.routes.lookup_route(&addr(4)).unwrap().refreshed_at, secs(9));
    }

    #[test]
    fn poison_from_next_hop_cascades() {
        let mut router = router();
        router.handle_packet(&update(2, 4, 1), &LINK, &addr(2), secs(1));
        router.handle_packet(&update(5, 8, 2), &LINK, &addr(2), secs(1));
        // 6 is only reachable through 5
        router.handle_packet(&update(6, 2, 1), &LINK, &addr(5), secs(1));
        router.poll(secs(2));
        assert!(router.advertisements.table.is_empty());

        // poison from a node that is not the next hop is ignored
        router.handle_packet(&update(5, 9, 3), &LINK, &addr(3), secs(3));
        assert!(router.routes.contains(&addr(5)));

        router.handle_packet(&update(5, 9, 3), &LINK, &addr(2), secs(3));
        assert!(!router.routes.contains(&addr(5)));
        assert!(!router.routes.contains(&addr(6)));
        assert!(router.routes.contains(&addr(2)));
        assert_eq!(router.advertisements.table.lookup_route(&addr(5)).unwrap().seqno, 9);
        assert_eq!(router.advertisements.table.lookup_route(&addr(6)).unwrap().seqno, 3);

        router.poll(Duration::from_millis(3001));
        let sent = updates_in(&router.outbound_packets);
        assert!(sent.iter().any(|dv| dv.destination == addr(5) && dv.seqno == 9));
        assert!(sent.iter().any(|dv| dv.destination == addr(6) && dv.seqno == 3));
        assert!(!router.routes.contains(&addr(5)));
    }

    #[test]
    fn pending_poison_survives_older_updates() {
        let mut router = router();
        router.handle_packet(&update(2, 4, 1), &LINK, &addr(2), secs(1));
        router.handle_packet(&update(5, 8, 2), &LINK, &addr(2), secs(1));
        router.poll(secs(2));
        router.outbound_packets.clear();

        router.params.enable_route_aggregation = true;
        router.handle_packet(&update(5, 9, 3), &LINK, &addr(2), secs(3));
        // another neighbour still has the old route
        router.handle_packet(&update(5, 8, 3), &LINK, &addr(3), Duration::from_millis(3100));
        assert_eq!(router.advertisements.table.lookup_route(&addr(5)).unwrap().seqno, 9);
        assert!(!router.routes.contains(&addr(5)));

        router.poll(secs(4));
        let seqnos: Vec<u32> = updates_in(&router.outbound_packets)
            .iter()
            .filter(|dv| dv.destination == addr(5))
            .map(|dv| dv.seqno)
            .collect();
        assert_eq!(seqnos, vec![9]);
        assert!(!router.routes.contains(&addr(5)));

        // a fresh route after the poison is learned again
        router.handle_packet(&update(5, 10, 3), &LINK, &addr(3), secs(5));
        let main = router.routes.lookup_route(&addr(5)).unwrap();
        assert_eq!((main.next_hop, main.seqno), (addr(3), 10));
    }

    #[test]
    fn poison_for_unknown_destination_is_ignored() {
        let mut router = router();
        router.handle_packet(&update(7, 3, 2), &LINK, &addr(2), secs(1));
        assert!(!router.routes.contains(&addr(7)));
        assert!(router.advertisements.table.is_empty());
    }

    #[test]
    fn periodic_update_advertises_the_table() {
        let mut router = router();
        router.start(Duration::ZERO);
        router.handle_packet(&update(4, 4, 2), &LINK, &addr(2), Duration::ZERO);
        router.poll(secs(1));
        router.outbound_packets.clear();

        let next = router.next_deadline().unwrap();
        assert!(next > secs(15) && next <= secs(15) + Duration::from_millis(27));
        router.poll(next);
        assert_eq!(router.outbound_packets.len(), 1);
        assert_eq!(router.outbound_packets[0].dest, addr(255));
        let sent = updates_in(&router.outbound_packets);
        assert!(sent.iter().any(|dv| dv.destination == addr(4) && dv.hops == 3));
        // own entry, incremented twice
        assert!(sent.iter().any(|dv| dv.destination == addr(1) && dv.seqno == 4 && dv.hops == 1));
        // the broadcast placeholder is never advertised
        assert!(sent.iter().all(|dv| dv.destination != addr(255)));
        assert_eq!(router.seqno, 4);
    }

    #[test]
    fn periodic_update_poisons_purged_neighbours() {
        let mut router = router();
        router.start(Duration::ZERO);
        router.handle_packet(&update(2, 4, 1), &LINK, &addr(2), Duration::ZERO);
        router.handle_packet(&update(5, 6, 2), &LINK, &addr(2), Duration::ZERO);
        router.poll(secs(44));
        router.outbound_packets.clear();
        router.poll(secs(61));

        let sent = updates_in(&router.outbound_packets);
        assert!(sent.iter().any(|dv| dv.destination == addr(2) && dv.seqno == 5));
        assert!(sent.iter().any(|dv| dv.destination == addr(5) && dv.seqno == 7));
        assert!(!router.routes.contains(&addr(2)));
        assert!(!router.routes.contains(&addr(5)));
    }

    #[test]
    fn queued_packets_are_released() {
        let mut router = router();
        assert_eq!(
            router.send(addr(4), "hello".into(), secs(1)).unwrap(),
            Dispatch::Queued
        );
        assert!(router.forwarded_packets.is_empty());
        router.handle_packet(&update(4, 4, 1), &LINK, &addr(4), secs(2));

        assert_eq!(
            router.send(addr(4), "world".into(), secs(2)).unwrap(),
            Dispatch::Forwarded
        );
        let payloads: Vec<&str> = router.forwarded_packets.iter().map(|p| p.payload.as_str()).collect();
        assert_eq!(payloads, vec!["hello", "world"]);
        assert!(router.forwarded_packets.iter().all(|p| p.next_hop == addr(4)));
    }

    #[test]
    fn multi_hop_route_output() {
        let mut router = router();
        router.handle_packet(&update(2, 4, 1), &LINK, &addr(2), secs(1));
        router.handle_packet(&update(5, 6, 2), &LINK, &addr(2), secs(1));
        let hop = router.route_output(&addr(5), secs(2)).unwrap();
        assert_eq!((hop.next_hop, hop.link, hop.hops), (addr(2), LINK, 2));

        let hop = router.forward_broadcast(addr(255), "all".into(), secs(2)).unwrap();
        assert_eq!(hop.next_hop, addr(255));
    }

    #[test]
    fn buffering_can_be_disabled() {
        let mut router = router();
        router.params.enable_buffering = false;
        assert!(matches!(
            router.send(addr(4), "lost".into(), secs(1)),
            Err(RoutingError::NoRoute { .. })
        ));
        assert!(router.queue.is_empty());
    }

    #[test]
    fn interfaces_bind_routes() {
        let mut router = router();
        router.add_interface(7, addr(101), addr(199));
        router.handle_packet(&update(4, 4, 1), &7, &addr(4), secs(1));
        router.handle_packet(&update(5, 4, 1), &LINK, &addr(5), secs(1));
        assert!(router.routes.contains(&addr(199)));

        router.remove_interface(&7).unwrap();
        assert!(!router.routes.contains(&addr(4)));
        assert!(!router.routes.contains(&addr(199)));
        assert!(router.routes.contains(&addr(5)));
        assert!(matches!(
            router.remove_interface(&7),
            Err(RoutingError::NoInterface { link: 7 })
        ));

        router.remove_interface(&LINK).unwrap();
        assert!(router.routes.is_empty());
    }

    #[test]
    fn malformed_datagrams_have_no_effect() {
        let mut router = router();
        let mut raw = wire::encode(&update(4, 4, 1));
        raw.extend_from_slice(&[0, 9]);
        assert!(router.handle_datagram(&raw, &LINK, &addr(2), secs(1)).is_err());
        assert!(!router.routes.contains(&addr(4)));

        let raw = wire::encode(&update(4, 4, 1));
        router.handle_datagram(&raw, &LINK, &addr(2), secs(1)).unwrap();
        assert!(router.routes.contains(&addr(4)));
    }

    #[test]
    fn shutdown_cancels_timers() {
        let mut router = router();
        router.start(Duration::ZERO);
        // the next periodic update is far enough away for route requests
        router.poll(Duration::from_millis(500));
        router.handle_packet(&update(4, 4, 1), &LINK, &addr(2), secs(1));
        router.handle_packet(&update(4, 6, 3), &LINK, &addr(2), secs(2));
        router.handle_packet(
            &Packet {
                messages: vec![Message::Request(RouteRequest { destination: addr(9) })],
            },
            &LINK,
            &addr(2),
            secs(2),
        );
        router.send(addr(9), "held".into(), secs(2)).unwrap();
        assert!(!router.alternates.table.is_empty());
        assert!(!router.queue.is_empty());

        router.shutdown();
        assert_eq!(router.next_deadline(), None);
        assert_eq!(router.advertisements.pending_timers(), 0);
        assert!(router.advertisements.table.is_empty());
        assert!(router.alternates.table.is_empty());
        assert!(router.queue.is_empty());
    }

    #[test]
    fn out_of_range_weight_does_not_panic() {
        let mut router = router();
        router.params.weighted_factor = 1.5;
        router.handle_packet(&update(4, 4, 1), &LINK, &addr(2), secs(1));
        router.handle_packet(&update(4, 6, 3), &LINK, &addr(2), secs(2));
        let staged = router.advertisements.table.lookup_route(&addr(4)).unwrap();
        assert_eq!(staged.settling_time, secs(5));
    }

    #[test]
    fn routing_table_json_lists_tables() {
        let mut router = router();
        router.handle_packet(&update(4, 4, 1), &LINK, &addr(2), secs(1));
        let dump = router.routing_table_json();
        assert_eq!(dump["node"], json!("10.1.1.1"));
        assert_eq!(dump["routes"].as_array().unwrap().len(), 2);
        assert!(dump["alternates"].as_array().unwrap().is_empty());
    }
}
