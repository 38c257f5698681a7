//! Routing table: destination to next hop
//!
//! A neighbor is an entry whose next hop is the destination itself. Every
//! table routes its own address to itself.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use rand::seq::SliceRandom;

use partage_core::NodeAddr;

/// Concurrent routing table of one peer
#[derive(Debug)]
pub struct RoutingTable {
    me: NodeAddr,
    entries: RwLock<BTreeMap<NodeAddr, NodeAddr>>,
}

impl RoutingTable {
    pub fn new(me: NodeAddr) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(me.clone(), me.clone());
        RoutingTable {
            me,
            entries: RwLock::new(entries),
        }
    }

    /// Add direct neighbors
    pub fn add_peers(&self, peers: &[NodeAddr]) {
        let mut entries = self.entries.write();
        for peer in peers {
            if *peer != self.me {
                entries.insert(peer.clone(), peer.clone());
            }
        }
    }

    /// Set or clear the next hop for `origin`; an empty relay deletes the entry
    pub fn set_routing_entry(&self, origin: NodeAddr, relay: NodeAddr) {
        if origin == self.me {
            return;
        }
        let mut entries = self.entries.write();
        if relay.is_empty() {
            entries.remove(&origin);
        } else {
            entries.insert(origin, relay);
        }
    }

    /// Learn that `origin` is reachable through `relay`, keeping direct links
    pub fn learn_route(&self, origin: &NodeAddr, relay: &NodeAddr) {
        if *origin == self.me || relay.is_empty() || *relay == self.me {
            return;
        }
        let mut entries = self.entries.write();
        if entries.get(origin) == Some(origin) {
            return;
        }
        entries.insert(origin.clone(), relay.clone());
    }

    /// Next hop towards `dest`
    pub fn next_hop(&self, dest: &NodeAddr) -> Option<NodeAddr> {
        self.entries.read().get(dest).cloned()
    }

    /// Direct neighbors, excluding this peer
    pub fn neighbors(&self) -> Vec<NodeAddr> {
        self.entries
            .read()
            .iter()
            .filter(|(dest, hop)| dest == hop && **dest != self.me)
            .map(|(dest, _)| dest.clone())
            .collect()
    }

    /// A uniformly random neighbor not in `exclude`
    pub fn choose_random_neighbor(&self, exclude: &[NodeAddr]) -> Option<NodeAddr> {
        let candidates: Vec<NodeAddr> = self
            .neighbors()
            .into_iter()
            .filter(|n| !exclude.contains(n))
            .collect();
        candidates.choose(&mut rand::thread_rng()).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<NodeAddr, NodeAddr> {
        self.entries.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> NodeAddr {
        NodeAddr::from(s)
    }

    #[test]
    fn test_self_entry() {
        let table = RoutingTable::new(addr("a"));
        assert_eq!(table.next_hop(&addr("a")), Some(addr("a")));
        assert!(table.neighbors().is_empty());
        assert!(table.choose_random_neighbor(&[]).is_none());
    }

    #[test]
    fn test_neighbors_exclude_relayed_entries() {
        let table = RoutingTable::new(addr("a"));
        table.add_peers(&[addr("b"), addr("c")]);
        table.set_routing_entry(addr("d"), addr("b"));
        assert_eq!(table.neighbors(), vec![addr("b"), addr("c")]);
        assert_eq!(table.next_hop(&addr("d")), Some(addr("b")));

        table.set_routing_entry(addr("d"), NodeAddr::default());
        assert_eq!(table.next_hop(&addr("d")), None);
    }

    #[test]
    fn test_learn_route_keeps_direct_links() {
        let table = RoutingTable::new(addr("a"));
        table.add_peers(&[addr("b"), addr("c")]);
        table.learn_route(&addr("b"), &addr("c"));
        assert_eq!(table.next_hop(&addr("b")), Some(addr("b")));
        table.learn_route(&addr("z"), &addr("c"));
        assert_eq!(table.next_hop(&addr("z")), Some(addr("c")));
        table.learn_route(&addr("a"), &addr("c"));
        assert_eq!(table.next_hop(&addr("a")), Some(addr("a")));
    }

    #[test]
    fn test_choose_random_neighbor_honors_exclusion() {
        let table = RoutingTable::new(addr("a"));
        table.add_peers(&[addr("b"), addr("c")]);
        for _ in 0..20 {
            assert_eq!(table.choose_random_neighbor(&[addr("b")]), Some(addr("c")));
        }
        assert!(table
            .choose_random_neighbor(&[addr("b"), addr("c")])
            .is_none());
    }

    proptest::proptest! {
        #[test]
        fn test_learned_routes_never_shadow_neighbors(
            learned in proptest::collection::vec((0u8..6, 0u8..6), 0..30),
        ) {
            let table = RoutingTable::new(addr("n0"));
            table.add_peers(&[addr("n1"), addr("n2")]);
            for (origin, relay) in &learned {
                table.learn_route(&addr(&format!("n{}", origin)), &addr(&format!("n{}", relay)));
            }
            proptest::prop_assert_eq!(table.next_hop(&addr("n0")), Some(addr("n0")));
            proptest::prop_assert_eq!(table.next_hop(&addr("n1")), Some(addr("n1")));
            proptest::prop_assert_eq!(table.next_hop(&addr("n2")), Some(addr("n2")));
            proptest::prop_assert!(!table.neighbors().contains(&addr("n0")));
        }
    }
}
