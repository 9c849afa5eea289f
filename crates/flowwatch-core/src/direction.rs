//! Direction Classification
//!
//! The set of addresses owned by this host, built once at startup and
//! shared read-only with the flow table.

use crate::flow::Direction;
use crate::FlowError;
use ipnetwork::IpNetwork;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Addresses considered local to this host
#[derive(Debug, Clone)]
pub struct LocalAddrs {
    addrs: HashSet<IpAddr>,
    networks: Vec<IpNetwork>,
}

impl LocalAddrs {
    /// Loopback addresses only
    pub fn new() -> Self {
        let mut addrs = HashSet::new();
        addrs.insert(IpAddr::V4(Ipv4Addr::LOCALHOST));
        addrs.insert(IpAddr::V6(Ipv6Addr::LOCALHOST));
        Self {
            addrs,
            networks: Vec::new(),
        }
    }

    /// Loopback plus the given host addresses
    pub fn from_addrs(addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        let mut local = Self::new();
        local.addrs.extend(addrs);
        local
    }

    /// Also treat every address inside `networks` as local
    pub fn with_networks(mut self, networks: Vec<IpNetwork>) -> Self {
        self.networks.extend(networks);
        self
    }

    /// Parse CIDR strings (`10.0.0.0/8`, `fd00::/8`, or a bare address)
    pub fn parse_networks<S: AsRef<str>>(cidrs: &[S]) -> Result<Vec<IpNetwork>, FlowError> {
        cidrs
            .iter()
            .map(|cidr| {
                let cidr = cidr.as_ref().trim();
                cidr.parse::<IpNetwork>()
                    .map_err(|e| FlowError::Config(format!("invalid local network '{}': {}", cidr, e)))
            })
            .collect()
    }

    /// Membership test
    #[inline]
    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.addrs.contains(ip) || self.networks.iter().any(|net| net.contains(*ip))
    }

    /// Classify a source/destination pair
    #[inline]
    pub fn classify(&self, src: &IpAddr, dst: &IpAddr) -> Direction {
        Direction::from_locality(self.contains(src), self.contains(dst))
    }

    /// Individual addresses, for logging
    pub fn addrs(&self) -> impl Iterator<Item = &IpAddr> {
        self.addrs.iter()
    }

    /// Configured networks, for logging
    pub fn networks(&self) -> &[IpNetwork] {
        &self.networks
    }

    /// Number of individual addresses
    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    /// Always false: loopback is always present
    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}

impl Default for LocalAddrs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_classification() {
        let local = LocalAddrs::from_addrs([ip("10.0.0.5")]);

        assert_eq!(local.classify(&ip("10.0.0.5"), &ip("8.8.8.8")), Direction::Outbound);
        assert_eq!(local.classify(&ip("8.8.8.8"), &ip("10.0.0.5")), Direction::Inbound);
        assert_eq!(local.classify(&ip("10.0.0.5"), &ip("10.0.0.5")), Direction::Local);
        assert_eq!(local.classify(&ip("1.2.3.4"), &ip("8.8.8.8")), Direction::Unknown);
    }

    #[test]
    fn test_loopback_always_local() {
        let local = LocalAddrs::new();
        assert!(local.contains(&ip("127.0.0.1")));
        assert!(local.contains(&ip("::1")));
        assert!(!local.contains(&ip("127.0.0.2")));
        assert_eq!(local.len(), 2);
    }

    #[test]
    fn test_networks() {
        let networks = LocalAddrs::parse_networks(&["192.168.0.0/16", "fd00::/8", "203.0.113.7"]).unwrap();
        let local = LocalAddrs::new().with_networks(networks);

        assert!(local.contains(&ip("192.168.44.2")));
        assert!(local.contains(&ip("fd12::1")));
        assert!(local.contains(&ip("203.0.113.7")));
        assert!(!local.contains(&ip("203.0.113.8")));
        assert_eq!(local.networks().len(), 3);
    }

    #[test]
    fn test_invalid_network() {
        let err = LocalAddrs::parse_networks(&["10.0.0.0/33"]).unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
    }
}
