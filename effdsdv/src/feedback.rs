use educe::Educe;
use thiserror::Error;

use crate::framework::RoutingSystem;

/// Failures surfaced to the forwarding layer. None of these stop the router, the worst case is "no route yet".
#[derive(Error)]
#[derive(Educe)]
#[educe(Debug(bound()))]
pub enum RoutingError<T: RoutingSystem + ?Sized> {
    #[error("A route to {destination:?} already exists")]
    RouteExists { destination: T::NodeAddress },
    #[error("There is no route to {destination:?} to update")]
    RouteMissing { destination: T::NodeAddress },
    /// The lookup failed, a route request may have been issued
    #[error("No usable route to {destination:?}")]
    NoRoute { destination: T::NodeAddress },
    #[error("No interface is bound to link {link:?}")]
    NoInterface { link: T::Link },
    #[error("Packet could not be queued")]
    Queue(#[from] QueueError),
}

/// Wire decoding failures, the whole datagram is dropped when any message fails
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Truncated message: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },
    #[error("Unknown message type {0}")]
    UnknownType(u16),
    #[error("Reserved field of route request is {0}, expected 0")]
    ReservedNotZero(u16),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue is full ({0} packets)")]
    Full(usize),
    #[error("Queue holds the maximum of {0} packets for this destination")]
    DestinationFull(usize),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("periodic update interval must not be zero")]
    ZeroPeriodicInterval,
    #[error("hold times must be at least 1")]
    ZeroHoldTimes,
    #[error("weighted factor {0} is outside of [0, 1]")]
    WeightOutOfRange(f64),
    #[error("per destination queue bound {per_dst} exceeds the total bound {total}")]
    QueueBounds { per_dst: usize, total: usize },
}
