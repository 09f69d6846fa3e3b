//! Bookkeeping types for lookup-class inheritance.

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

use qph_types::{ClassId, IpPrefix, RouterId, VlanId};
use serde::{Deserialize, Serialize};

/// Identifies a route across VRFs, independent of address family.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RouteKey {
    pub rid: RouterId,
    pub prefix: IpPrefix,
}

impl RouteKey {
    pub fn new(rid: RouterId, prefix: IpPrefix) -> Self {
        Self { rid, prefix }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rid.is_default() {
            write!(f, "{}", self.prefix)
        } else {
            write!(f, "{}:{}", self.rid, self.prefix)
        }
    }
}

/// A route's resolved next hop, scoped to the broadcast domain the address
/// is looked up in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NextHopKey {
    pub addr: IpAddr,
    pub vlan: VlanId,
}

impl NextHopKey {
    pub fn new(addr: IpAddr, vlan: VlanId) -> Self {
        Self { addr, vlan }
    }
}

impl fmt::Display for NextHopKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.addr, self.vlan)
    }
}

/// Routes depending on one next hop, split by whether they inherit their
/// class through it. A route appears in at most one of the two sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyEntry {
    with_class: BTreeSet<RouteKey>,
    without_class: BTreeSet<RouteKey>,
}

impl DependencyEntry {
    /// Records the route as inheriting its class through this next hop,
    /// migrating it out of the non-donor set if it was there.
    pub fn track_with_class(&mut self, route: &RouteKey) {
        self.without_class.remove(route);
        self.with_class.insert(route.clone());
    }

    /// Records the route as referencing this next hop without inheriting
    /// through it, migrating it out of the donor set if it was there.
    pub fn track_without_class(&mut self, route: &RouteKey) {
        self.with_class.remove(route);
        self.without_class.insert(route.clone());
    }

    /// Removes the route from both sets. Returns whether it was in the
    /// donor set and how many sets it was found in.
    pub fn untrack(&mut self, route: &RouteKey) -> (bool, usize) {
        let was_donor = self.with_class.remove(route);
        let was_plain = self.without_class.remove(route);
        (was_donor, usize::from(was_donor) + usize::from(was_plain))
    }

    /// Empties both sets, returning every previously tracked route.
    pub fn drain_all(&mut self) -> Vec<RouteKey> {
        let mut routes: Vec<RouteKey> = std::mem::take(&mut self.with_class).into_iter().collect();
        routes.extend(std::mem::take(&mut self.without_class));
        routes
    }

    /// All tracked routes, donors first.
    pub fn tracked(&self) -> impl Iterator<Item = &RouteKey> {
        self.with_class.iter().chain(self.without_class.iter())
    }

    pub fn inheriting_routes(&self) -> &BTreeSet<RouteKey> {
        &self.with_class
    }

    pub fn referencing_routes(&self) -> &BTreeSet<RouteKey> {
        &self.without_class
    }

    pub fn is_empty(&self) -> bool {
        self.with_class.is_empty() && self.without_class.is_empty()
    }
}

/// One computed assignment, pushed to the update sink. A `None` class
/// clears a previously programmed assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteClassUpdate {
    pub route: RouteKey,
    pub class_id: Option<ClassId>,
}
