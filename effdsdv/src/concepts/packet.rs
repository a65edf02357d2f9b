use std::time::Duration;

use educe::Educe;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::framework::RoutingSystem;

/// One destination of a distance vector update
#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()), PartialEq(bound()))]
#[serde(bound = "")]
pub struct DistanceVector<T: RoutingSystem + ?Sized> {
    pub destination: T::NodeAddress,
    pub hops: u16,
    /// odd values advertise the destination as unreachable
    pub seqno: u32,
}

/// Asks neighbours for any alive route to `destination`
#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()), PartialEq(bound()))]
#[serde(bound = "")]
pub struct RouteRequest<T: RoutingSystem + ?Sized> {
    pub destination: T::NodeAddress,
}

/// Answer to a [`RouteRequest`], unicast to the requester
#[serde_as]
#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()), PartialEq(bound()))]
#[serde(bound = "")]
pub struct RouteAck<T: RoutingSystem + ?Sized> {
    pub destination: T::NodeAddress,
    /// hop count from the requester, the acknowledging node's hops + 1
    pub hops: u16,
    /// how long the acknowledging node has known its route
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub elapsed: Duration,
}

#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()), PartialEq(bound()))]
#[serde(bound = "")]
pub enum Message<T: RoutingSystem + ?Sized> {
    Update(DistanceVector<T>),
    Request(RouteRequest<T>),
    Ack(RouteAck<T>),
}

/// A transport datagram, a concatenation of messages
#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()), PartialEq(bound()), Default(bound()))]
#[serde(bound = "")]
pub struct Packet<T: RoutingSystem + ?Sized> {
    pub messages: Vec<Message<T>>,
}

impl<T: RoutingSystem + ?Sized> Packet<T> {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: Message<T>) {
        self.messages.push(message);
    }
}

/// A control packet the driver must put on the wire
#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()))]
#[serde(bound = "")]
pub struct OutboundPacket<T: RoutingSystem + ?Sized> {
    /// send via this interface
    pub link: T::Link,
    /// to this address, the interface broadcast address or a neighbour
    pub dest: T::NodeAddress,
    pub packet: Packet<T>,
}

/// A data packet released to the forwarding layer together with its resolved next hop
#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()))]
#[serde(bound = "")]
pub struct ForwardedPacket<T: RoutingSystem + ?Sized> {
    pub destination: T::NodeAddress,
    pub next_hop: T::NodeAddress,
    pub link: T::Link,
    pub payload: T::Payload,
}
