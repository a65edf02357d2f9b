use std::collections::BTreeMap;
use std::time::Duration;

use educe::Educe;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::concepts::packet::OutboundPacket;
use crate::framework::RoutingSystem;

#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()))]
#[serde(bound = "")]
pub enum TimerEvent<T: RoutingSystem + ?Sized> {
    PeriodicUpdate,
    TriggeredUpdate,
    /// the settling time of a pending advertisement ran out, ignored unless `generation` is current
    SettlingExpired {
        destination: T::NodeAddress,
        generation: u64,
    },
    /// a jittered control packet is ready to go out
    Transmit(OutboundPacket<T>),
}

/// Deadlines the driver polls, ordered by time then by insertion
#[serde_as]
#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()), Default(bound()))]
#[serde(bound = "")]
pub struct TimerQueue<T: RoutingSystem + ?Sized> {
    #[serde_as(as = "Vec<(_, _)>")]
    events: BTreeMap<(Duration, u64), TimerEvent<T>>,
    next_id: u64,
}

impl<T: RoutingSystem + ?Sized> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            events: BTreeMap::new(),
            next_id: 0,
        }
    }

    pub fn schedule(&mut self, at: Duration, event: TimerEvent<T>) {
        self.events.insert((at, self.next_id), event);
        self.next_id += 1;
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.events.keys().next().map(|(at, _)| *at)
    }

    /// Removes and returns the earliest event due at `now`
    pub fn pop_due(&mut self, now: Duration) -> Option<(Duration, TimerEvent<T>)> {
        let key = *self.events.keys().next()?;
        if key.0 > now {
            return None;
        }
        self.events.remove(&key).map(|ev| (key.0, ev))
    }

    /// Whether an event matching `pred` is scheduled
    pub fn any(&self, pred: impl Fn(&TimerEvent<T>) -> bool) -> bool {
        self.events.values().any(pred)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
