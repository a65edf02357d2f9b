use std::collections::HashMap;
use std::time::Duration;

use educe::Educe;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_with::serde_as;

use crate::concepts::route::{RouteEntry, RouteFlag};
use crate::concepts::table::RouteTable;
use crate::framework::{ProtocolParams, RoutingSystem};
use crate::timer::{TimerEvent, TimerQueue};
use crate::util::{is_fresher, is_poisoned, weighted_settling_time};

/// Entries waiting to be advertised, each with at most one settling timer.
///
/// A settling timer is a generation number per destination. Re-scheduling or cancelling only
/// touches the map, a fired timer whose generation is no longer current is ignored.
#[serde_as]
#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()), Default(bound()))]
#[serde(bound = "")]
pub struct AdvertisementScheduler<T: RoutingSystem + ?Sized> {
    pub table: RouteTable<T>,
    #[serde_as(as = "Vec<(_, _)>")]
    settling: HashMap<T::NodeAddress, u64>,
    generation: u64,
}

impl<T: RoutingSystem + ?Sized> AdvertisementScheduler<T> {
    pub fn new() -> Self {
        Self {
            table: RouteTable::new(),
            settling: HashMap::new(),
            generation: 0,
        }
    }

    /// Delay before a changed metric for `main` may be advertised
    pub fn settling_time_for(main: &RouteEntry<T>, params: &ProtocolParams, now: Duration) -> Duration {
        if params.enable_wst {
            weighted_settling_time(params.weighted_factor, main.settling_time, main.lifetime(now))
        } else {
            main.settling_time
        }
    }

    /// Stages `entry`, replacing whatever was pending for its destination
    pub fn stage(&mut self, entry: RouteEntry<T>) {
        self.table.delete_route(&entry.destination);
        // the slot was just freed
        let _ = self.table.add_route(entry);
    }

    /// Arms the settling timer of `destination`, any earlier timer is superseded
    pub fn schedule(&mut self, destination: &T::NodeAddress, at: Duration, timers: &mut TimerQueue<T>) {
        self.generation += 1;
        self.settling.insert(destination.clone(), self.generation);
        timers.schedule(
            at,
            TimerEvent::SettlingExpired {
                destination: destination.clone(),
                generation: self.generation,
            },
        );
        debug!("Settling timer for {} armed until {:?}", json!(destination), at);
    }

    /// Returns true if a timer was running
    pub fn cancel(&mut self, destination: &T::NodeAddress) -> bool {
        self.settling.remove(destination).is_some()
    }

    pub fn is_pending(&self, destination: &T::NodeAddress) -> bool {
        self.settling.contains_key(destination)
    }

    pub fn pending_timers(&self) -> usize {
        self.settling.len()
    }

    /// Called when a settling timer fires, true if it is the current one for `destination`
    pub fn on_fired(&mut self, destination: &T::NodeAddress, generation: u64) -> bool {
        match self.settling.get(destination) {
            Some(current) if *current == generation => {
                self.settling.remove(destination);
                true
            }
            _ => {
                trace!("Ignoring superseded settling timer for {}", json!(destination));
                false
            }
        }
    }

    /// Drops the staged entry of `destination` unless it carries something newer than `main`.
    /// Entries under a running settling timer are kept.
    pub fn discard_unless_fresher(&mut self, destination: &T::NodeAddress, main: &RouteEntry<T>) {
        if self.is_pending(destination) {
            return;
        }
        let stale = match self.table.lookup_route(destination) {
            Some(staged) => !is_fresher(staged.seqno, staged.hops, main.seqno, main.hops),
            None => false,
        };
        if stale {
            self.table.delete_route(destination);
        }
    }

    /// Removes every changed entry without a running timer, ready to be sent.
    ///
    /// The returned entries are marked valid and unchanged; reachable ones should be written back
    /// to the main table by the caller.
    pub fn take_ready(&mut self) -> Vec<RouteEntry<T>> {
        let ready: Vec<T::NodeAddress> = self
            .table
            .list_all_routes()
            .filter(|r| r.changed && !self.settling.contains_key(&r.destination))
            .map(|r| r.destination.clone())
            .collect();
        let mut out = Vec::with_capacity(ready.len());
        for dst in ready {
            if let Some(mut entry) = self.table.delete_route(&dst) {
                entry.flag = RouteFlag::Valid;
                entry.changed = false;
                out.push(entry);
            }
        }
        out
    }

    /// Folds every ready entry into `main`, poisoned ones are only dropped
    pub fn merge_into(&mut self, main: &mut RouteTable<T>) {
        for entry in self.take_ready() {
            if is_poisoned(entry.seqno) {
                continue;
            }
            let dst = entry.destination.clone();
            if main.update(entry).is_err() {
                trace!("Staged route to {} is gone from the main table", json!(dst));
            } else {
                debug!("Merged staged route to {} into the main table", json!(dst));
            }
        }
    }

    /// Drops every staged entry and its timer
    pub fn clear(&mut self) {
        self.table.clear_all();
        self.settling.clear();
    }
}
