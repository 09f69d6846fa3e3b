//! Foundational types shared across the queue-per-host agent.
//!
//! These are the identifier newtypes and addressing primitives the rest of
//! the workspace builds on. They carry no behavior beyond parsing, display
//! and ordering, so every crate can use them in keys and wire formats.

use std::cmp::Ordering;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

/// A VLAN / broadcast-domain identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VlanId(pub u16);

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vlan{}", self.0)
    }
}

/// A physical port identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortId(pub u32);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port{}", self.0)
    }
}

/// A link-aggregation (LAG) port identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregatePortId(pub u32);

impl fmt::Display for AggregatePortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agg{}", self.0)
    }
}

/// A routed-interface identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterfaceId(pub u32);

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "intf{}", self.0)
    }
}

/// A router (VRF) identifier. VRF 0 is the default router.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouterId(pub u32);

impl RouterId {
    /// Returns true if this is the default VRF.
    pub fn is_default(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vrf{}", self.0)
    }
}

/// A hardware lookup class: selects the traffic-scheduling queue a host's
/// packets are steered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassId(pub u8);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class{}", self.0)
    }
}

/// Address family of an IP address or prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// Returns the family of the given address.
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "IPv4"),
            AddressFamily::Ipv6 => write!(f, "IPv6"),
        }
    }
}

/// An IP prefix: network address plus prefix length.
///
/// The address is stored as given (interface addresses keep their host
/// bits); [`IpPrefix::contains`] masks both sides before comparing, so
/// `10.0.0.1/24` contains `10.0.0.5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IpPrefix(IpNetwork);

impl IpPrefix {
    /// Returns the stored address.
    pub fn addr(&self) -> IpAddr {
        self.0.ip()
    }

    /// Returns the prefix length.
    pub fn prefix_len(&self) -> u8 {
        self.0.prefix()
    }

    /// Returns the prefix's address family.
    pub fn address_family(&self) -> AddressFamily {
        match self.0 {
            IpNetwork::V4(_) => AddressFamily::Ipv4,
            IpNetwork::V6(_) => AddressFamily::Ipv6,
        }
    }

    /// Masked membership test. Always false across address families.
    pub fn contains(&self, addr: IpAddr) -> bool {
        self.0.contains(addr)
    }

    /// Returns true if this is 0.0.0.0/0 or ::/0.
    pub fn is_default_route(&self) -> bool {
        self.0.prefix() == 0
    }

    fn sort_key(&self) -> (u8, u128, u8) {
        match self.0 {
            IpNetwork::V4(n) => (4, u128::from(u32::from(n.ip())), n.prefix()),
            IpNetwork::V6(n) => (6, u128::from(n.ip()), n.prefix()),
        }
    }
}

impl From<IpNetwork> for IpPrefix {
    fn from(network: IpNetwork) -> Self {
        Self(network)
    }
}

impl PartialOrd for IpPrefix {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IpPrefix {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl FromStr for IpPrefix {
    type Err = ipnetwork::IpNetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IpNetwork::from_str(s).map(Self)
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error parsing a MAC address from its string form.
#[derive(Debug, thiserror::Error)]
#[error("invalid MAC address: {0}")]
pub struct MacParseError(String);

/// A 48-bit MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const ZERO: Self = Self([0; 6]);

    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl FromStr for MacAddress {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in &mut bytes {
            let part = parts.next().ok_or_else(|| MacParseError(s.to_string()))?;
            *byte = u8::from_str_radix(part, 16).map_err(|_| MacParseError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(MacParseError(s.to_string()));
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn prefix_contains_masks_host_bits() {
        let prefix: IpPrefix = "10.0.0.1/24".parse().unwrap();
        assert!(prefix.contains("10.0.0.5".parse().unwrap()));
        assert!(!prefix.contains("10.0.1.5".parse().unwrap()));
    }

    #[test]
    fn prefix_contains_is_family_scoped() {
        let prefix: IpPrefix = "10.0.0.0/24".parse().unwrap();
        assert!(!prefix.contains("2401:db00::1".parse().unwrap()));
    }

    #[test]
    fn prefix_ordering_groups_by_family() {
        let v4: IpPrefix = "192.168.1.0/24".parse().unwrap();
        let v6: IpPrefix = "2401:db00::/64".parse().unwrap();
        assert!(v4 < v6);
    }

    #[test]
    fn prefix_display_round_trips() {
        let prefix: IpPrefix = "2401:db00::/64".parse().unwrap();
        assert_eq!(prefix.to_string().parse::<IpPrefix>().unwrap(), prefix);
    }

    #[test]
    fn mac_parse_and_display() {
        let mac: MacAddress = "02:aa:bb:cc:dd:ee".parse().unwrap();
        assert_eq!(mac.to_string(), "02:aa:bb:cc:dd:ee");
        assert!("02:aa:bb:cc:dd".parse::<MacAddress>().is_err());
        assert!("02:aa:bb:cc:dd:ee:ff".parse::<MacAddress>().is_err());
    }

    #[test]
    fn family_of_address() {
        assert_eq!(
            AddressFamily::of(&"10.0.0.1".parse().unwrap()),
            AddressFamily::Ipv4
        );
        assert_eq!(
            AddressFamily::of(&"2401:db00::1".parse().unwrap()),
            AddressFamily::Ipv6
        );
    }
}
