//! Host Identity
//!
//! Hostname and local-address discovery, done once at startup.

use flowwatch_core::LocalAddrs;
use ipnetwork::IpNetwork;

/// System hostname, or `"unknown"`
pub fn hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read hostname, using 'unknown'");
            "unknown".to_string()
        }
    }
}

/// Addresses of every host interface plus loopback and `networks`
pub fn discover_local_addrs(networks: Vec<IpNetwork>) -> LocalAddrs {
    let addrs = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces
            .into_iter()
            .map(|iface| {
                tracing::debug!(interface = %iface.name, addr = %iface.ip(), "local address");
                iface.ip()
            })
            .collect::<Vec<_>>(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to enumerate interfaces, only loopback is local");
            Vec::new()
        }
    };

    let local = LocalAddrs::from_addrs(addrs).with_networks(networks);
    tracing::info!(
        addrs = ?local.addrs().collect::<Vec<_>>(),
        networks = ?local.networks(),
        "Local address set"
    );
    local
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    #[test]
    fn test_hostname_not_empty() {
        assert!(!hostname().is_empty());
    }

    #[test]
    fn test_discovery_includes_loopback_and_networks() {
        let networks = LocalAddrs::parse_networks(&["198.51.100.0/24"]).unwrap();
        let local = discover_local_addrs(networks);

        assert!(local.contains(&"127.0.0.1".parse::<IpAddr>().unwrap()));
        assert!(local.contains(&"::1".parse::<IpAddr>().unwrap()));
        assert!(local.contains(&"198.51.100.77".parse::<IpAddr>().unwrap()));
    }
}
