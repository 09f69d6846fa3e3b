//! Switch-state snapshot model.
//!
//! A [`SwitchState`] is an immutable snapshot of the logical switch: ports,
//! VLANs, routed interfaces, neighbor tables and per-VRF routing tables.
//! The surrounding state-management system produces one snapshot per
//! transition; the engine only ever reads them through the indexed accessors
//! here, so a missing object is an explicit `Option`, never a dangling
//! reference.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use qph_types::{
    AddressFamily, AggregatePortId, ClassId, InterfaceId, IpPrefix, MacAddress, PortId, RouterId,
    VlanId,
};
use serde::{Deserialize, Serialize};

/// A physical switch port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub id: PortId,
    pub name: String,
    /// Lookup classes traffic on this port is distributed over. Non-empty
    /// exactly when queue-per-host differentiation is enabled on the port.
    #[serde(default)]
    pub lookup_classes: BTreeSet<ClassId>,
    /// VLANs this port is a member of.
    #[serde(default)]
    pub vlans: BTreeSet<VlanId>,
}

impl Port {
    pub fn new(id: PortId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            lookup_classes: BTreeSet::new(),
            vlans: BTreeSet::new(),
        }
    }

    /// Returns true if queue-per-host differentiation is enabled.
    pub fn has_differentiation(&self) -> bool {
        !self.lookup_classes.is_empty()
    }
}

/// Where a neighbor entry was learned. Only physical-port-resident
/// neighbors participate in class inheritance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NeighborPort {
    Physical(PortId),
    Aggregate(AggregatePortId),
}

impl NeighborPort {
    pub fn is_physical(&self) -> bool {
        matches!(self, NeighborPort::Physical(_))
    }
}

/// An ARP/NDP neighbor entry, keyed by IP address within its VLAN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborEntry {
    pub mac: MacAddress,
    pub port: NeighborPort,
    /// Lookup class assigned to this host, if any. The assignment policy
    /// lives outside this engine.
    #[serde(default)]
    pub class_id: Option<ClassId>,
}

/// A VLAN with its routed interface and per-family neighbor tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vlan {
    pub id: VlanId,
    #[serde(default)]
    pub interface: Option<InterfaceId>,
    #[serde(default)]
    pub v4_neighbors: BTreeMap<IpAddr, NeighborEntry>,
    #[serde(default)]
    pub v6_neighbors: BTreeMap<IpAddr, NeighborEntry>,
}

impl Vlan {
    pub fn new(id: VlanId) -> Self {
        Self {
            id,
            interface: None,
            v4_neighbors: BTreeMap::new(),
            v6_neighbors: BTreeMap::new(),
        }
    }

    /// Returns the neighbor table for one address family.
    pub fn neighbors(&self, family: AddressFamily) -> &BTreeMap<IpAddr, NeighborEntry> {
        match family {
            AddressFamily::Ipv4 => &self.v4_neighbors,
            AddressFamily::Ipv6 => &self.v6_neighbors,
        }
    }

    /// Looks up a neighbor by address, selecting the table by family.
    pub fn neighbor(&self, addr: &IpAddr) -> Option<&NeighborEntry> {
        self.neighbors(AddressFamily::of(addr)).get(addr)
    }

    /// Inserts a neighbor into the table matching the address family.
    pub fn add_neighbor(&mut self, addr: IpAddr, entry: NeighborEntry) {
        match AddressFamily::of(&addr) {
            AddressFamily::Ipv4 => self.v4_neighbors.insert(addr, entry),
            AddressFamily::Ipv6 => self.v6_neighbors.insert(addr, entry),
        };
    }

    /// Removes a neighbor, returning the removed entry if present.
    pub fn remove_neighbor(&mut self, addr: &IpAddr) -> Option<NeighborEntry> {
        match AddressFamily::of(addr) {
            AddressFamily::Ipv4 => self.v4_neighbors.remove(addr),
            AddressFamily::Ipv6 => self.v6_neighbors.remove(addr),
        }
    }
}

/// A routed interface attached to a VLAN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub id: InterfaceId,
    pub vlan: VlanId,
    /// Configured addresses; each one defines a connected subnet.
    #[serde(default)]
    pub addresses: Vec<IpPrefix>,
}

/// A resolved next hop: address plus egress interface. Ordering is by
/// address first, which fixes the donor iteration order for a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResolvedNextHop {
    pub addr: IpAddr,
    pub interface: InterfaceId,
}

/// The forwarding decision attached to a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForwardAction {
    /// Resolution pending; not programmed in hardware.
    Unresolved,
    /// Delivered to the control plane; has no next hops.
    ToCpu,
    /// Forwarded through a concrete, non-empty next-hop set.
    Resolved(BTreeSet<ResolvedNextHop>),
}

/// A route within one VRF's table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub prefix: IpPrefix,
    pub forward: ForwardAction,
}

impl Route {
    /// Returns the next-hop set if this route is resolved and not destined
    /// to the control plane; such routes are the only ones that can inherit
    /// a lookup class.
    pub fn resolved_next_hops(&self) -> Option<&BTreeSet<ResolvedNextHop>> {
        match &self.forward {
            ForwardAction::Resolved(next_hops) => Some(next_hops),
            ForwardAction::Unresolved | ForwardAction::ToCpu => None,
        }
    }
}

/// Per-VRF routing table, split by address family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    #[serde(default)]
    pub v4: BTreeMap<IpPrefix, Route>,
    #[serde(default)]
    pub v6: BTreeMap<IpPrefix, Route>,
}

impl RouteTable {
    /// Returns the routes of one address family.
    pub fn routes(&self, family: AddressFamily) -> &BTreeMap<IpPrefix, Route> {
        match family {
            AddressFamily::Ipv4 => &self.v4,
            AddressFamily::Ipv6 => &self.v6,
        }
    }

    /// Inserts a route into the table matching its prefix's family.
    pub fn add_route(&mut self, route: Route) {
        match route.prefix.address_family() {
            AddressFamily::Ipv4 => self.v4.insert(route.prefix, route),
            AddressFamily::Ipv6 => self.v6.insert(route.prefix, route),
        };
    }

    /// Removes a route by prefix, returning it if present.
    pub fn remove_route(&mut self, prefix: &IpPrefix) -> Option<Route> {
        match prefix.address_family() {
            AddressFamily::Ipv4 => self.v4.remove(prefix),
            AddressFamily::Ipv6 => self.v6.remove(prefix),
        }
    }
}

/// One immutable snapshot of switch state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchState {
    #[serde(default)]
    ports: BTreeMap<PortId, Port>,
    #[serde(default)]
    vlans: BTreeMap<VlanId, Vlan>,
    #[serde(default)]
    interfaces: BTreeMap<InterfaceId, Interface>,
    #[serde(default)]
    routes: BTreeMap<RouterId, RouteTable>,
}

impl SwitchState {
    pub fn ports(&self) -> &BTreeMap<PortId, Port> {
        &self.ports
    }

    pub fn vlans(&self) -> &BTreeMap<VlanId, Vlan> {
        &self.vlans
    }

    pub fn interfaces(&self) -> &BTreeMap<InterfaceId, Interface> {
        &self.interfaces
    }

    pub fn route_tables(&self) -> &BTreeMap<RouterId, RouteTable> {
        &self.routes
    }

    pub fn port(&self, id: PortId) -> Option<&Port> {
        self.ports.get(&id)
    }

    pub fn vlan(&self, id: VlanId) -> Option<&Vlan> {
        self.vlans.get(&id)
    }

    pub fn interface(&self, id: InterfaceId) -> Option<&Interface> {
        self.interfaces.get(&id)
    }

    /// Looks up a route by VRF and prefix.
    pub fn route(&self, rid: RouterId, prefix: &IpPrefix) -> Option<&Route> {
        self.routes
            .get(&rid)
            .and_then(|table| table.routes(prefix.address_family()).get(prefix))
    }

    pub fn add_port(&mut self, port: Port) {
        self.ports.insert(port.id, port);
    }

    pub fn remove_port(&mut self, id: PortId) -> Option<Port> {
        self.ports.remove(&id)
    }

    pub fn add_vlan(&mut self, vlan: Vlan) {
        self.vlans.insert(vlan.id, vlan);
    }

    pub fn remove_vlan(&mut self, id: VlanId) -> Option<Vlan> {
        self.vlans.remove(&id)
    }

    pub fn vlan_mut(&mut self, id: VlanId) -> Option<&mut Vlan> {
        self.vlans.get_mut(&id)
    }

    pub fn port_mut(&mut self, id: PortId) -> Option<&mut Port> {
        self.ports.get_mut(&id)
    }

    pub fn add_interface(&mut self, interface: Interface) {
        self.interfaces.insert(interface.id, interface);
    }

    pub fn remove_interface(&mut self, id: InterfaceId) -> Option<Interface> {
        self.interfaces.remove(&id)
    }

    pub fn add_route(&mut self, rid: RouterId, route: Route) {
        self.routes.entry(rid).or_default().add_route(route);
    }

    pub fn remove_route(&mut self, rid: RouterId, prefix: &IpPrefix) -> Option<Route> {
        self.routes
            .get_mut(&rid)
            .and_then(|table| table.remove_route(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix(s: &str) -> IpPrefix {
        s.parse().unwrap()
    }

    #[test]
    fn route_lookup_selects_family_table() {
        let mut state = SwitchState::default();
        state.add_route(
            RouterId(0),
            Route {
                prefix: prefix("192.168.1.0/24"),
                forward: ForwardAction::Unresolved,
            },
        );
        state.add_route(
            RouterId(0),
            Route {
                prefix: prefix("2401:db00::/64"),
                forward: ForwardAction::ToCpu,
            },
        );

        assert!(state.route(RouterId(0), &prefix("192.168.1.0/24")).is_some());
        assert!(state.route(RouterId(0), &prefix("2401:db00::/64")).is_some());
        assert!(state.route(RouterId(1), &prefix("192.168.1.0/24")).is_none());
    }

    #[test]
    fn neighbor_tables_are_family_scoped() {
        let mut vlan = Vlan::new(VlanId(100));
        vlan.add_neighbor(
            "10.0.0.5".parse().unwrap(),
            NeighborEntry {
                mac: MacAddress::ZERO,
                port: NeighborPort::Physical(PortId(1)),
                class_id: None,
            },
        );

        assert_eq!(vlan.v4_neighbors.len(), 1);
        assert!(vlan.v6_neighbors.is_empty());
        assert!(vlan.neighbor(&"10.0.0.5".parse().unwrap()).is_some());
        assert!(vlan.neighbor(&"2401:db00::5".parse().unwrap()).is_none());
    }

    #[test]
    fn resolved_next_hops_only_for_forwarding_routes() {
        let to_cpu = Route {
            prefix: prefix("10.1.0.0/16"),
            forward: ForwardAction::ToCpu,
        };
        assert!(to_cpu.resolved_next_hops().is_none());

        let mut next_hops = BTreeSet::new();
        next_hops.insert(ResolvedNextHop {
            addr: "10.0.0.5".parse().unwrap(),
            interface: InterfaceId(1),
        });
        let resolved = Route {
            prefix: prefix("10.1.0.0/16"),
            forward: ForwardAction::Resolved(next_hops),
        };
        assert_eq!(resolved.resolved_next_hops().unwrap().len(), 1);
    }
}
