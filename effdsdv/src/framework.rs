use std::fmt::Debug;
use std::hash::Hash;
use std::net::Ipv4Addr;
use std::time::Duration;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::feedback::ConfigError;

/// UDP port the routing control traffic is exchanged on
pub const DSDV_PORT: u16 = 269;

pub trait RoutingSystem {
    /// Address of the node on the routing network, MUST be globally unique
    type NodeAddress: Ord + PartialOrd + Debug + NodeData + NodeKey + WireAddress;
    /// Opaque binding to the interface a route leaves through, handed back to the transport layer
    type Link: NodeKey + NodeData + Debug;
    /// Data packets held while a route is being resolved
    type Payload: NodeData + Debug;
    fn config() -> ProtocolParams {
        Default::default()
    }
}

pub trait NodeData: Clone + Serialize + DeserializeOwned + Sized {}
pub trait NodeKey: Eq + PartialEq + Hash {}
impl<T: Eq + PartialEq + Hash> NodeKey for T {}
impl<T: Clone + Serialize + DeserializeOwned + Sized> NodeData for T {}

/// An address that fits in the 4 byte destination field of the wire format
pub trait WireAddress: Sized {
    fn to_wire(&self) -> [u8; 4];
    fn from_wire(bytes: [u8; 4]) -> Self;
}

impl WireAddress for Ipv4Addr {
    fn to_wire(&self) -> [u8; 4] {
        self.octets()
    }

    fn from_wire(bytes: [u8; 4]) -> Self {
        Ipv4Addr::from(bytes)
    }
}

/// Protocol parameters, all durations are (de)serialized as milliseconds
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolParams {
    /// interval between two full table broadcasts
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub periodic_update_interval: Duration,
    /// minimum time a changed metric waits in the advertisement table
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub settling_time: Duration,
    /// multiple of the periodic interval after which a route is purged
    pub hold_times: u32,
    /// weight of the previous settling time when weighted settling time is enabled
    pub weighted_factor: f64,
    pub enable_wst: bool,
    pub enable_route_aggregation: bool,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub route_aggregation_time: Duration,
    /// hold data packets while a route is resolved instead of dropping them
    pub enable_buffering: bool,
    pub max_queue_len: usize,
    pub max_queued_packets_per_dst: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_queue_time: Duration,
    /// how long an unanswered route request stays in flight
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub request_validity: Duration,
    /// slack on top of the periodic interval before a route stops being alive
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub liveness_grace: Duration,
    /// maximum age of an alternate route that may be offered to a requester
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub alternate_ack_window: Duration,
    /// requests are not sent or answered when the periodic update is closer than this
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub periodic_suppression_window: Duration,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            periodic_update_interval: Duration::from_secs(15),
            settling_time: Duration::from_secs(5),
            hold_times: 3,
            weighted_factor: 0.875,
            enable_wst: true,
            enable_route_aggregation: false,
            route_aggregation_time: Duration::from_secs(1),
            enable_buffering: true,
            max_queue_len: 500,
            max_queued_packets_per_dst: 5,
            max_queue_time: Duration::from_secs(30),
            request_validity: Duration::from_secs(4),
            liveness_grace: Duration::from_secs(2),
            alternate_ack_window: Duration::from_secs(5),
            periodic_suppression_window: Duration::from_secs(1),
        }
    }
}

impl ProtocolParams {
    /// Reads parameters from a JSON document, missing keys keep their default value
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let params: ProtocolParams =
            serde_json::from_str(json).context("Failed to parse protocol parameters")?;
        params.validate().context("Invalid protocol parameters")?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.periodic_update_interval.is_zero() {
            return Err(ConfigError::ZeroPeriodicInterval);
        }
        if self.hold_times == 0 {
            return Err(ConfigError::ZeroHoldTimes);
        }
        if !(0.0..=1.0).contains(&self.weighted_factor) {
            return Err(ConfigError::WeightOutOfRange(self.weighted_factor));
        }
        if self.max_queued_packets_per_dst > self.max_queue_len {
            return Err(ConfigError::QueueBounds {
                per_dst: self.max_queued_packets_per_dst,
                total: self.max_queue_len,
            });
        }
        Ok(())
    }

    /// Age after which the purge sweep acts on a route
    pub fn hold_down(&self) -> Duration {
        self.periodic_update_interval * self.hold_times
    }

    /// Age up to which a route counts as alive during lookups
    pub fn alive_threshold(&self) -> Duration {
        self.periodic_update_interval + self.liveness_grace
    }

    /// Age after which a substituted alternate route asks for fresher information
    pub fn alternate_refresh_age(&self) -> Duration {
        self.periodic_update_interval / 3
    }

    /// Age after which an alternate route is dropped
    pub fn alternate_max_age(&self) -> Duration {
        self.alternate_refresh_age() + self.liveness_grace
    }
}
