use std::collections::HashMap;
use std::time::Duration;

use educe::Educe;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::concepts::route::{RouteEntry, RouteFlag};
use crate::feedback::RoutingError;
use crate::framework::RoutingSystem;

/// Destination keyed route table, used for the main, advertisement and alternate tables
#[serde_as]
#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()), Default(bound()))]
#[serde(bound = "")]
pub struct RouteTable<T: RoutingSystem + ?Sized> {
    #[serde_as(as = "Vec<(_, _)>")]
    entries: HashMap<T::NodeAddress, RouteEntry<T>>,
}

/// Result of a purge sweep
#[derive(Educe)]
#[educe(Debug(bound()), Default(bound()))]
pub struct Purged<T: RoutingSystem + ?Sized> {
    /// neighbours whose link is gone, and every route that went through them
    pub removed: Vec<RouteEntry<T>>,
    /// over-age routes that were kept but marked invalid
    pub invalidated: Vec<RouteEntry<T>>,
}

impl<T: RoutingSystem + ?Sized> RouteTable<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn add_route(&mut self, entry: RouteEntry<T>) -> Result<(), RoutingError<T>> {
        if self.entries.contains_key(&entry.destination) {
            return Err(RoutingError::RouteExists {
                destination: entry.destination,
            });
        }
        self.entries.insert(entry.destination.clone(), entry);
        Ok(())
    }

    pub fn update(&mut self, entry: RouteEntry<T>) -> Result<(), RoutingError<T>> {
        match self.entries.get_mut(&entry.destination) {
            Some(existing) => {
                *existing = entry;
                Ok(())
            }
            None => Err(RoutingError::RouteMissing {
                destination: entry.destination,
            }),
        }
    }

    pub fn delete_route(&mut self, destination: &T::NodeAddress) -> Option<RouteEntry<T>> {
        self.entries.remove(destination)
    }

    pub fn lookup_route(&self, destination: &T::NodeAddress) -> Option<&RouteEntry<T>> {
        self.entries.get(destination)
    }

    pub fn lookup_route_mut(&mut self, destination: &T::NodeAddress) -> Option<&mut RouteEntry<T>> {
        self.entries.get_mut(destination)
    }

    pub fn contains(&self, destination: &T::NodeAddress) -> bool {
        self.entries.contains_key(destination)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn list_all_routes(&self) -> impl Iterator<Item = &RouteEntry<T>> {
        self.entries.values()
    }

    pub fn list_valid_routes(&self) -> impl Iterator<Item = &RouteEntry<T>> {
        self.entries.values().filter(|r| r.flag == RouteFlag::Valid)
    }

    /// Every entry routed through `next_hop`, excluding the route to `next_hop` itself
    pub fn list_destinations_with_next_hop(&self, next_hop: &T::NodeAddress) -> Vec<RouteEntry<T>> {
        self.entries
            .values()
            .filter(|r| r.next_hop == *next_hop && r.destination != *next_hop)
            .cloned()
            .collect()
    }

    pub fn delete_all_routes_on_link(&mut self, link: &T::Link) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, r| r.link != *link);
        before - self.entries.len()
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    /// Sweeps every entry older than `hold_down`.
    ///
    /// Over-age neighbours are removed along with every route through them. Other over-age
    /// entries are invalidated and kept so the poison can be advertised, an entry that is still
    /// invalid after twice the hold-down is removed.
    pub fn purge(&mut self, now: Duration, hold_down: Duration) -> Purged<T> {
        let mut purged = Purged::default();
        let expired_neighbours: Vec<T::NodeAddress> = self
            .entries
            .values()
            .filter(|r| r.hops == 1 && r.is_neighbour() && r.lifetime(now) > hold_down)
            .map(|r| r.destination.clone())
            .collect();
        for neigh in expired_neighbours {
            if let Some(entry) = self.entries.remove(&neigh) {
                purged.removed.push(entry);
            }
            let dependents: Vec<T::NodeAddress> = self
                .entries
                .values()
                .filter(|r| r.next_hop == neigh)
                .map(|r| r.destination.clone())
                .collect();
            for dst in dependents {
                if let Some(entry) = self.entries.remove(&dst) {
                    purged.removed.push(entry);
                }
            }
        }

        let mut stale = Vec::new();
        for entry in self.entries.values_mut() {
            let age = entry.lifetime(now);
            if age <= hold_down {
                continue;
            }
            if entry.flag == RouteFlag::Valid {
                entry.invalidate();
                purged.invalidated.push(entry.clone());
            } else if age > hold_down * 2 {
                stale.push(entry.destination.clone());
            }
        }
        for dst in stale {
            if let Some(entry) = self.entries.remove(&dst) {
                purged.removed.push(entry);
            }
        }
        purged
    }
}
