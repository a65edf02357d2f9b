//! Route resolution across the main and alternate tables.
//!
//! [`resolve`] is a pure function: it never touches the tables, the repair actions it decides on
//! are returned to the router which applies them.

use std::time::Duration;

use educe::Educe;

use crate::alternate::AlternateTable;
use crate::concepts::route::{RouteEntry, RouteFlag};
use crate::concepts::table::RouteTable;
use crate::framework::{ProtocolParams, RoutingSystem};

#[derive(Educe)]
#[educe(Clone(bound()), Debug(bound()), PartialEq(bound()))]
pub enum Resolution<T: RoutingSystem + ?Sized> {
    /// a usable route, possibly with an acknowledged detour spliced in
    Found(RouteEntry<T>),
    /// a route request is in flight
    Pending,
    NotFound,
}

impl<T: RoutingSystem + ?Sized> Resolution<T> {
    pub fn found(self) -> Option<RouteEntry<T>> {
        match self {
            Resolution::Found(entry) => Some(entry),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RepairActions {
    /// broadcast a route request for the destination
    pub request: bool,
    /// the acknowledged detour is too old and must go
    pub delete_alternate: bool,
}

#[derive(Educe)]
#[educe(Clone(bound()), Debug(bound()))]
pub struct Lookup<T: RoutingSystem + ?Sized> {
    pub resolution: Resolution<T>,
    pub actions: RepairActions,
}

impl<T: RoutingSystem + ?Sized> Lookup<T> {
    fn new(resolution: Resolution<T>, request: bool) -> Self {
        Self {
            resolution,
            actions: RepairActions {
                request,
                delete_alternate: false,
            },
        }
    }
}

/// Reconciles the tables for `destination`.
///
/// A main route is usable while it is alive and so is the route to its next hop, or while the
/// next hop is alive even if the route itself went quiet (the break is further down the path).
/// Otherwise the alternate table decides. With `for_broadcast` no request is ever asked for.
pub fn resolve<T: RoutingSystem + ?Sized>(
    main: &RouteTable<T>,
    alternates: &AlternateTable<T>,
    destination: &T::NodeAddress,
    now: Duration,
    params: &ProtocolParams,
    for_broadcast: bool,
) -> Lookup<T> {
    let may_request = !for_broadcast;
    let Some(route) = main.lookup_route(destination) else {
        return Lookup::new(Resolution::NotFound, may_request);
    };

    let threshold = params.alive_threshold();
    let next_hop_alive = main
        .lookup_route(&route.next_hop)
        .is_some_and(|nh| nh.is_alive(now, threshold));
    if route.is_alive(now, threshold) && (route.is_neighbour() || next_hop_alive) {
        return Lookup::new(Resolution::Found(route.clone()), false);
    }
    if !route.is_neighbour() && next_hop_alive {
        return Lookup::new(Resolution::Found(route.clone()), false);
    }

    match alternates.lookup(destination) {
        Some(alt) if alt.flag == RouteFlag::InSearch => Lookup::new(Resolution::Pending, may_request),
        Some(alt) if alt.flag == RouteFlag::Valid => {
            let age = alt.install_age(now);
            if age > params.alternate_max_age() {
                return Lookup {
                    resolution: Resolution::NotFound,
                    actions: RepairActions {
                        request: may_request,
                        delete_alternate: true,
                    },
                };
            }
            Lookup::new(
                Resolution::Found(splice(route, alt)),
                may_request && age > params.alternate_refresh_age(),
            )
        }
        _ => Lookup::new(Resolution::NotFound, may_request),
    }
}

/// The main entry with the forwarding state of the detour
fn splice<T: RoutingSystem + ?Sized>(main: &RouteEntry<T>, alt: &RouteEntry<T>) -> RouteEntry<T> {
    let mut entry = main.clone();
    entry.settling_time = alt.settling_time;
    entry.flag = alt.flag;
    entry.hops = alt.hops;
    entry.next_hop = alt.next_hop.clone();
    entry.seqno = alt.seqno;
    entry.refreshed_at = alt.refreshed_at;
    entry.link = alt.link.clone();
    entry
}
