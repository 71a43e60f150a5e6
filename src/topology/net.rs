use crate::error::{Error, Result};
use ipnetwork::IpNetwork;
use std::net::IpAddr;

pub fn parse_prefix(prefix: &str) -> Result<IpNetwork> {
    prefix
        .parse::<IpNetwork>()
        .map_err(|err| Error::parse(format!("invalid address prefix `{prefix}`: {err}")))
}

/// CIDR membership test. A malformed prefix or a malformed/empty address
/// never matches.
pub fn prefix_contains(prefix: &str, ip: &str) -> bool {
    if ip.is_empty() {
        return false;
    }
    let Ok(network) = prefix.parse::<IpNetwork>() else {
        return false;
    };
    let Ok(address) = ip.parse::<IpAddr>() else {
        return false;
    };
    network.contains(address)
}

/// True when any of the addresses falls inside the prefix.
pub fn any_ip_in_prefix(prefix: &str, ips: &[String]) -> bool {
    ips.iter().any(|ip| prefix_contains(prefix, ip))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containment_follows_numeric_range() {
        assert!(prefix_contains("10.0.0.0/24", "10.0.0.4"));
        assert!(prefix_contains("10.0.0.0/24", "10.0.0.255"));
        assert!(!prefix_contains("10.0.0.0/24", "10.0.1.0"));
        assert!(prefix_contains("172.20.4.0/22", "172.20.5.10"));
        assert!(!prefix_contains("172.20.4.0/22", "172.20.8.1"));
        assert!(prefix_contains("0.0.0.0/0", "203.0.113.7"));
    }

    #[test]
    fn malformed_or_empty_addresses_never_match() {
        assert!(!prefix_contains("10.0.0.0/8", ""));
        assert!(!prefix_contains("10.0.0.0/8", "not-an-ip"));
        assert!(!prefix_contains("10.0.0.0/8", "10.0.0"));
        assert!(!prefix_contains("bad-prefix", "10.0.0.4"));
    }

    #[test]
    fn ipv6_prefixes_are_supported() {
        assert!(prefix_contains("fd00::/8", "fd12:3456::1"));
        assert!(!prefix_contains("fd00::/8", "10.0.0.4"));
    }
}
