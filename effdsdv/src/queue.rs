use std::collections::VecDeque;
use std::time::Duration;

use educe::Educe;
use log::trace;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::feedback::QueueError;
use crate::framework::{ProtocolParams, RoutingSystem};

#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()))]
#[serde(bound = "")]
pub struct QueueEntry<T: RoutingSystem + ?Sized> {
    pub destination: T::NodeAddress,
    pub payload: T::Payload,
    pub enqueued_at: Duration,
}

/// Data packets held back until a route to their destination shows up
#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()))]
#[serde(bound = "")]
pub struct PacketQueue<T: RoutingSystem + ?Sized> {
    entries: VecDeque<QueueEntry<T>>,
    max_len: usize,
    max_per_destination: usize,
    timeout: Duration,
}

impl<T: RoutingSystem + ?Sized> Default for PacketQueue<T> {
    fn default() -> Self {
        Self::from_params(&ProtocolParams::default())
    }
}

impl<T: RoutingSystem + ?Sized> PacketQueue<T> {
    pub fn new(max_len: usize, max_per_destination: usize, timeout: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            max_len,
            max_per_destination,
            timeout,
        }
    }

    pub fn from_params(params: &ProtocolParams) -> Self {
        Self::new(
            params.max_queue_len,
            params.max_queued_packets_per_dst,
            params.max_queue_time,
        )
    }

    pub fn enqueue(&mut self, destination: T::NodeAddress, payload: T::Payload, now: Duration) -> Result<(), QueueError> {
        self.drop_expired(now);
        if self.entries.len() >= self.max_len {
            return Err(QueueError::Full(self.max_len));
        }
        if self.count_for(&destination) >= self.max_per_destination {
            return Err(QueueError::DestinationFull(self.max_per_destination));
        }
        self.entries.push_back(QueueEntry {
            destination,
            payload,
            enqueued_at: now,
        });
        Ok(())
    }

    /// Oldest packet for `destination`
    pub fn dequeue(&mut self, destination: &T::NodeAddress, now: Duration) -> Option<T::Payload> {
        self.drop_expired(now);
        let idx = self.entries.iter().position(|e| e.destination == *destination)?;
        self.entries.remove(idx).map(|e| e.payload)
    }

    pub fn find_pending(&mut self, destination: &T::NodeAddress, now: Duration) -> bool {
        self.drop_expired(now);
        self.entries.iter().any(|e| e.destination == *destination)
    }

    /// Destinations with at least one packet waiting, oldest first
    pub fn destinations(&mut self, now: Duration) -> Vec<T::NodeAddress> {
        self.drop_expired(now);
        let mut out: Vec<T::NodeAddress> = Vec::new();
        for e in &self.entries {
            if !out.contains(&e.destination) {
                out.push(e.destination.clone());
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn count_for(&self, destination: &T::NodeAddress) -> usize {
        self.entries.iter().filter(|e| e.destination == *destination).count()
    }

    fn drop_expired(&mut self, now: Duration) {
        let timeout = self.timeout;
        self.entries.retain(|e| {
            let alive = now.saturating_sub(e.enqueued_at) <= timeout;
            if !alive {
                trace!("Dropping queued packet for {}, waited too long", json!(e.destination));
            }
            alive
        });
    }
}
