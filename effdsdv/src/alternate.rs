use std::time::Duration;

use educe::Educe;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::concepts::packet::RouteAck;
use crate::concepts::route::{RouteEntry, RouteFlag};
use crate::concepts::table::RouteTable;
use crate::framework::RoutingSystem;

/// Local repair state: placeholders of requests in flight and acknowledged detours
#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()), Default(bound()))]
#[serde(bound = "")]
pub struct AlternateTable<T: RoutingSystem + ?Sized> {
    pub table: RouteTable<T>,
}

impl<T: RoutingSystem + ?Sized> AlternateTable<T> {
    pub fn new() -> Self {
        Self {
            table: RouteTable::new(),
        }
    }

    pub fn lookup(&self, destination: &T::NodeAddress) -> Option<&RouteEntry<T>> {
        self.table.lookup_route(destination)
    }

    pub fn delete(&mut self, destination: &T::NodeAddress) -> Option<RouteEntry<T>> {
        self.table.delete_route(destination)
    }

    pub fn with_next_hop(&self, next_hop: &T::NodeAddress) -> Vec<T::NodeAddress> {
        self.table
            .list_destinations_with_next_hop(next_hop)
            .into_iter()
            .map(|r| r.destination)
            .collect()
    }

    /// A request for `destination` went out less than `validity` ago and is unanswered
    pub fn request_in_flight(&self, destination: &T::NodeAddress, now: Duration, validity: Duration) -> bool {
        matches!(
            self.table.lookup_route(destination),
            Some(r) if r.flag == RouteFlag::InSearch && r.lifetime(now) <= validity
        )
    }

    /// Installs the placeholder for a new request, expired placeholders are replaced and an
    /// acknowledged route is left alone until the answer arrives.
    pub fn begin_search(
        &mut self,
        destination: &T::NodeAddress,
        local: &T::NodeAddress,
        link: T::Link,
        now: Duration,
    ) {
        if matches!(self.table.lookup_route(destination), Some(r) if r.flag == RouteFlag::InSearch) {
            self.table.delete_route(destination);
        }
        if self.table.contains(destination) {
            return;
        }
        let mut placeholder = RouteEntry::new(destination.clone(), local.clone(), link, 0, 0, now);
        placeholder.flag = RouteFlag::InSearch;
        placeholder.changed = true;
        // cannot collide, the slot is free
        let _ = self.table.add_route(placeholder);
        debug!("Searching for a route to {}", json!(destination));
    }

    /// Acknowledged detour that may still be offered to a requester
    pub fn ackable(&self, destination: &T::NodeAddress, now: Duration, window: Duration) -> Option<&RouteEntry<T>> {
        self.table
            .lookup_route(destination)
            .filter(|r| r.flag == RouteFlag::Valid && r.install_age(now) <= window)
    }

    /// Records an acknowledgement from `sender`. Returns true if the table changed.
    ///
    /// A placeholder (or no entry) is replaced outright, an acknowledged detour only by a shorter
    /// one or an equally long one that is more recent.
    pub fn accept_ack(
        &mut self,
        ack: &RouteAck<T>,
        sender: &T::NodeAddress,
        link: T::Link,
        settling_time: Duration,
        now: Duration,
    ) -> bool {
        if let Some(current) = self.table.lookup_route(&ack.destination) {
            if current.flag == RouteFlag::Valid {
                let shorter = ack.hops < current.hops;
                let more_recent = ack.hops == current.hops && ack.elapsed < current.lifetime(now);
                if !shorter && !more_recent {
                    trace!(
                        "Acknowledgement for {} from {} is no better than the known detour",
                        json!(ack.destination),
                        json!(sender)
                    );
                    return false;
                }
            }
        }
        let mut entry = RouteEntry::new(
            ack.destination.clone(),
            sender.clone(),
            link,
            0,
            ack.hops,
            now.saturating_sub(ack.elapsed),
        );
        entry.installed_at = now;
        entry.settling_time = settling_time;
        entry.changed = true;
        self.table.delete_route(&ack.destination);
        let _ = self.table.add_route(entry);
        debug!(
            "Detour to {} via {} ({} hops) installed",
            json!(ack.destination),
            json!(sender),
            ack.hops
        );
        true
    }

    pub fn clear(&mut self) {
        self.table.clear_all();
    }
}
