//! Per-VLAN cache of the subnets that can host queue-per-host traffic.
//!
//! A VLAN has cached subnets only while at least one of its member ports
//! has lookup-class differentiation enabled and its routed interface
//! carries addresses. The cache is a filter: a next hop outside every
//! cached subnet of its VLAN can never make a route inherit a class, so
//! the dependency index never has to learn about it.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use qph_types::{IpPrefix, VlanId};

#[derive(Debug, Default)]
pub struct SubnetCache {
    vlans: HashMap<VlanId, HashSet<IpPrefix>>,
}

impl SubnetCache {
    /// Returns true if the address falls within any subnet cached for the
    /// VLAN.
    pub fn belongs_to(&self, vlan: VlanId, addr: IpAddr) -> bool {
        self.vlans
            .get(&vlan)
            .is_some_and(|subnets| subnets.iter().any(|subnet| subnet.contains(addr)))
    }

    /// Caches a subnet for the VLAN. Returns true if it was not already
    /// cached.
    pub fn insert(&mut self, vlan: VlanId, subnet: IpPrefix) -> bool {
        self.vlans.entry(vlan).or_default().insert(subnet)
    }

    /// Drops a cached subnet. Returns true if it was present. The VLAN key
    /// itself is retained; emptiness checks look at the subnets.
    pub fn remove(&mut self, vlan: VlanId, subnet: &IpPrefix) -> bool {
        self.vlans
            .get_mut(&vlan)
            .is_some_and(|subnets| subnets.remove(subnet))
    }

    /// Returns true if the VLAN currently has any cached subnet.
    pub fn has_subnets(&self, vlan: VlanId) -> bool {
        self.vlans
            .get(&vlan)
            .is_some_and(|subnets| !subnets.is_empty())
    }

    /// Returns true if no VLAN has any cached subnet. This is the fast
    /// path for switches with no differentiating port at all.
    pub fn is_empty(&self) -> bool {
        self.vlans.values().all(HashSet::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix(s: &str) -> IpPrefix {
        s.parse().unwrap()
    }

    #[test]
    fn membership_is_per_vlan() {
        let mut cache = SubnetCache::default();
        cache.insert(VlanId(100), prefix("10.0.0.0/24"));

        assert!(cache.belongs_to(VlanId(100), "10.0.0.5".parse().unwrap()));
        assert!(!cache.belongs_to(VlanId(200), "10.0.0.5".parse().unwrap()));
        assert!(!cache.belongs_to(VlanId(100), "10.0.1.5".parse().unwrap()));
    }

    #[test]
    fn empty_check_ignores_drained_vlan_keys() {
        let mut cache = SubnetCache::default();
        let subnet = prefix("10.0.0.0/24");
        cache.insert(VlanId(100), subnet);
        assert!(!cache.is_empty());

        assert!(cache.remove(VlanId(100), &subnet));
        assert!(cache.is_empty());
        assert!(!cache.has_subnets(VlanId(100)));
    }

    #[test]
    fn insert_reports_novelty() {
        let mut cache = SubnetCache::default();
        let subnet = prefix("10.0.0.0/24");
        assert!(cache.insert(VlanId(100), subnet));
        assert!(!cache.insert(VlanId(100), subnet));
    }

    #[test]
    fn remove_of_unknown_subnet_is_false() {
        let mut cache = SubnetCache::default();
        assert!(!cache.remove(VlanId(100), &prefix("10.0.0.0/24")));
    }
}
