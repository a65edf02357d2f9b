use std::time::Duration;

use educe::Educe;
use serde::{Deserialize, Serialize};

use crate::framework::RoutingSystem;
use crate::util::poison;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteFlag {
    Valid,
    Invalid,
    /// a route request for this destination is in flight, alternate table only
    InSearch,
}

#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()), PartialEq(bound()))]
#[serde(bound = "")]
pub struct RouteEntry<T: RoutingSystem + ?Sized> {
    pub destination: T::NodeAddress,
    /// the neighbour packets are handed to, equals destination for neighbours
    pub next_hop: T::NodeAddress,
    /// the interface the next hop is reachable on
    pub link: T::Link,
    pub seqno: u32,
    pub hops: u16,
    /// when the entry was last refreshed, see [`RouteEntry::lifetime`]
    pub refreshed_at: Duration,
    /// when the entry was installed, only meaningful in the alternate table
    pub installed_at: Duration,
    pub settling_time: Duration,
    pub flag: RouteFlag,
    /// differs from what was last advertised
    pub changed: bool,
    /// administrative entries (interface broadcast) never age
    pub pinned: bool,
}

impl<T: RoutingSystem + ?Sized> RouteEntry<T> {
    pub fn new(
        destination: T::NodeAddress,
        next_hop: T::NodeAddress,
        link: T::Link,
        seqno: u32,
        hops: u16,
        now: Duration,
    ) -> Self {
        Self {
            destination,
            next_hop,
            link,
            seqno,
            hops,
            refreshed_at: now,
            installed_at: now,
            settling_time: Duration::ZERO,
            flag: RouteFlag::Valid,
            changed: false,
            pinned: false,
        }
    }

    /// Time since the entry was last refreshed
    pub fn lifetime(&self, now: Duration) -> Duration {
        if self.pinned {
            return Duration::ZERO;
        }
        now.saturating_sub(self.refreshed_at)
    }

    /// Time since the entry was installed
    pub fn install_age(&self, now: Duration) -> Duration {
        now.saturating_sub(self.installed_at)
    }

    pub fn is_neighbour(&self) -> bool {
        self.next_hop == self.destination
    }

    /// Valid and refreshed within `threshold`
    pub fn is_alive(&self, now: Duration, threshold: Duration) -> bool {
        self.flag == RouteFlag::Valid && self.lifetime(now) <= threshold
    }

    /// Marks the entry unreachable with a poisoned sequence number
    pub fn invalidate(&mut self) {
        self.flag = RouteFlag::Invalid;
        self.seqno = poison(self.seqno);
        self.changed = true;
    }
}
