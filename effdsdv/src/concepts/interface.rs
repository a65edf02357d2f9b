use educe::Educe;
use serde::{Deserialize, Serialize};

use crate::framework::RoutingSystem;

/// A network interface the router advertises on
#[derive(Educe, Serialize, Deserialize)]
#[educe(Clone(bound()), Debug(bound()))]
#[serde(bound = "")]
pub struct Interface<T: RoutingSystem + ?Sized> {
    pub link: T::Link,
    /// the local address bound to the interface
    pub address: T::NodeAddress,
    /// updates and requests sent through this interface go here
    pub broadcast: T::NodeAddress,
}

impl<T: RoutingSystem + ?Sized> Interface<T> {
    pub fn new(link: T::Link, address: T::NodeAddress, broadcast: T::NodeAddress) -> Self {
        Interface {
            link,
            address,
            broadcast,
        }
    }
}
