use std::net::Ipv4Addr;
use std::time::Duration;

use effdsdv::concepts::packet::{Message, Packet};
use effdsdv::concepts::route::RouteEntry;
use effdsdv::framework::RoutingSystem;
use effdsdv::router::Router;
use effdsdv::wire;
use serde::{Deserialize, Serialize};

/// Every node has a single radio interface
pub const LINK: u32 = 0;
pub const BROADCAST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 255);

pub fn addr(id: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, id)
}

/// A packet put on the air, kept for assertions
#[derive(Clone, Debug)]
pub struct Transmission {
    pub at: Duration,
    pub from: Ipv4Addr,
    pub to: Ipv4Addr,
    pub packet: Packet<VirtualSystem>,
}

/// Zero latency radio network driven by the routers' own timers
#[derive(Serialize, Deserialize)]
pub struct VirtualSystem {
    pub routers: Vec<Router<VirtualSystem>>,
    /// (edge id, a, b, up)
    pub edges: Vec<(i32, u8, u8, bool)>,
    pub now: Duration,
    #[serde(skip)]
    pub transmissions: Vec<Transmission>,
}

impl VirtualSystem {
    pub fn create(nodes: &[u8], edges: &[(i32, u8, u8)]) -> VirtualSystem {
        let routers = nodes
            .iter()
            .map(|id| {
                let mut router = Router::new(addr(*id)).with_seed(*id as u64);
                router.add_interface(LINK, addr(*id), BROADCAST);
                router.start(Duration::ZERO);
                router
            })
            .collect();
        VirtualSystem {
            routers,
            edges: edges.iter().map(|(eid, a, b)| (*eid, *a, *b, true)).collect(),
            now: Duration::ZERO,
            transmissions: Vec::new(),
        }
    }

    pub fn set_edge(&mut self, edge_id: i32, up: bool) {
        for edge in &mut self.edges {
            if edge.0 == edge_id {
                edge.3 = up;
            }
        }
    }

    pub fn get_node(&mut self, node: u8) -> &mut Router<Self> {
        self.routers
            .iter_mut()
            .find(|r| r.address == addr(node))
            .unwrap_or_else(|| panic!("No node {node} found"))
    }

    pub fn get_route(&self, cur: u8, dst: u8) -> Option<RouteEntry<Self>> {
        let router = self
            .routers
            .iter()
            .find(|r| r.address == addr(cur))
            .unwrap_or_else(|| panic!("No node {cur} found"));
        router.routes.lookup_route(&addr(dst)).cloned()
    }

    pub fn get_next_hop(&self, cur: u8, dst: u8) -> Ipv4Addr {
        self.get_route(cur, dst)
            .unwrap_or_else(|| panic!("No route found to {dst}"))
            .next_hop
    }

    pub fn get_hops_to(&self, cur: u8, dst: u8) -> u16 {
        self.get_route(cur, dst)
            .unwrap_or_else(|| panic!("No route found to {dst}"))
            .hops
    }

    pub fn get_seqno_to(&self, cur: u8, dst: u8) -> u32 {
        self.get_route(cur, dst)
            .unwrap_or_else(|| panic!("No route found to {dst}"))
            .seqno
    }

    fn neighbours(&self, of: Ipv4Addr) -> Vec<Ipv4Addr> {
        self.edges
            .iter()
            .filter(|e| e.3)
            .filter_map(|(_, a, b, _)| {
                if addr(*a) == of {
                    Some(addr(*b))
                } else if addr(*b) == of {
                    Some(addr(*a))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Hands every outbound packet to the nodes in range, until nobody has anything left to say
    pub fn flush_packets(&mut self) {
        loop {
            let mut pending = Vec::new();
            for router in &mut self.routers {
                let from = router.address;
                for packet in router.outbound_packets.drain(..) {
                    pending.push((from, packet));
                }
            }
            if pending.is_empty() {
                return;
            }
            for (from, packet) in pending {
                let raw = wire::encode(&packet.packet);
                let in_range = self.neighbours(from);
                let receivers: Vec<Ipv4Addr> = if packet.dest == BROADCAST {
                    in_range
                } else {
                    in_range.into_iter().filter(|n| *n == packet.dest).collect()
                };
                self.transmissions.push(Transmission {
                    at: self.now,
                    from,
                    to: packet.dest,
                    packet: packet.packet,
                });
                let now = self.now;
                for to in receivers {
                    if let Some(router) = self.routers.iter_mut().find(|r| r.address == to) {
                        router
                            .handle_datagram(&raw, &LINK, &from, now)
                            .expect("routers only emit well formed packets");
                    }
                }
            }
        }
    }

    /// Advances the clock to `until`, firing every timer on the way
    pub fn run_until(&mut self, until: Duration) {
        loop {
            self.flush_packets();
            let next = self.routers.iter().filter_map(|r| r.next_deadline()).min();
            match next {
                Some(at) if at <= until => {
                    self.now = self.now.max(at);
                    let now = self.now;
                    for router in &mut self.routers {
                        router.poll(now);
                    }
                }
                _ => break,
            }
        }
        self.now = until;
    }

    /// Messages matching `pred` that went on the air within `[from, to]`
    pub fn count_sent(&self, from: Duration, to: Duration, pred: impl Fn(&Message<Self>) -> bool) -> usize {
        self.transmissions
            .iter()
            .filter(|t| t.at >= from && t.at <= to)
            .flat_map(|t| t.packet.messages.iter())
            .filter(|m| pred(m))
            .count()
    }

    pub fn freeze(&mut self) -> String {
        serde_json::to_string(&self).unwrap()
    }

    pub fn restore(state: String) -> VirtualSystem {
        serde_json::from_str(&state).unwrap()
    }
}

impl RoutingSystem for VirtualSystem {
    type NodeAddress = Ipv4Addr;
    type Link = u32;
    type Payload = String;
}
