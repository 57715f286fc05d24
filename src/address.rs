//! Tunnel address allocation
//!
//! Addresses are a pure function of the pool and a member index: the server
//! takes index 1 and peers take 2..=N+1 in declaration order, so the same
//! mesh description always yields the same addresses.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Pool used when the mesh description names none
pub const DEFAULT_POOL: &str = "10.200.200.0/24";

/// Index reserved for the server
pub const SERVER_INDEX: u32 = 1;

/// An IPv4 network that tunnel addresses are carved from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressPool {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl AddressPool {
    /// Create a pool, masking off any host bits in `base`
    pub fn new(base: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if prefix_len > 32 {
            return Err(Error::Serialization(format!(
                "prefix length {} is out of range for IPv4",
                prefix_len
            )));
        }
        let mask = if prefix_len == 0 { 0 } else { u32::MAX << (32 - prefix_len) };
        Ok(Self {
            network: Ipv4Addr::from(u32::from(base) & mask),
            prefix_len,
        })
    }

    /// Parse a pool from CIDR notation (e.g. "10.200.200.0/24")
    pub fn parse(cidr: &str) -> Result<Self> {
        let (ip, prefix) = cidr.trim().split_once('/').ok_or_else(|| {
            Error::Serialization(format!("address pool '{}' is missing a /prefix", cidr))
        })?;
        let ip: IpAddr = ip
            .parse()
            .map_err(|e| Error::Serialization(format!("address pool '{}': {}", cidr, e)))?;
        let ip = match ip {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(_) => {
                return Err(Error::Validation(format!(
                    "address pool '{}' is IPv6; only IPv4 pools are supported",
                    cidr
                )))
            }
        };
        let prefix_len: u8 = prefix.parse().map_err(|_| {
            Error::Serialization(format!("address pool '{}' has a non-numeric prefix", cidr))
        })?;
        Self::new(ip, prefix_len)
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Number of assignable host indexes (network and broadcast excluded)
    pub fn capacity(&self) -> u32 {
        let total = 1u64 << (32 - u32::from(self.prefix_len));
        total.saturating_sub(2).min(u64::from(u32::MAX)) as u32
    }

    /// Address for `index`, rendered as `{host}/{prefix}`
    pub fn allocate(&self, index: u32) -> Result<String> {
        let capacity = self.capacity();
        if index == 0 || index > capacity {
            return Err(Error::AddressPoolExhausted { index, capacity });
        }
        let host = Ipv4Addr::from(u32::from(self.network) + index);
        Ok(format!("{}/{}", host, self.prefix_len))
    }
}

impl Default for AddressPool {
    fn default() -> Self {
        Self {
            network: Ipv4Addr::new(10, 200, 200, 0),
            prefix_len: 24,
        }
    }
}

impl FromStr for AddressPool {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for AddressPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// Split "ip" or "ip/prefix", checking both halves
fn split_cidr(value: &str) -> Result<(IpAddr, Option<u8>)> {
    let value = value.trim();
    let (ip, prefix) = match value.split_once('/') {
        Some((ip, prefix)) => (ip, Some(prefix)),
        None => (value, None),
    };
    let ip: IpAddr = ip
        .parse()
        .map_err(|_| Error::Serialization(format!("'{}' is not an IP address", value)))?;
    let prefix = match prefix {
        Some(p) => {
            let p: u8 = p
                .parse()
                .map_err(|_| Error::Serialization(format!("'{}' has a non-numeric prefix", value)))?;
            let max = if ip.is_ipv4() { 32 } else { 128 };
            if p > max {
                return Err(Error::Serialization(format!("'{}' has prefix beyond /{}", value, max)));
            }
            Some(p)
        }
        None => None,
    };
    Ok((ip, prefix))
}

/// Check that `value` is "ip" or "ip/prefix"
pub fn check_cidr(value: &str) -> Result<()> {
    split_cidr(value).map(|_| ())
}

/// Host part of an interface address ("10.0.0.2/24" -> 10.0.0.2)
pub fn host_ip(address: &str) -> Result<IpAddr> {
    split_cidr(address).map(|(ip, _)| ip)
}

/// The single-host route for an interface address ("10.0.0.2/24" -> "10.0.0.2/32")
pub fn host_route(address: &str) -> Result<String> {
    Ok(match host_ip(address)? {
        IpAddr::V4(v4) => format!("{}/32", v4),
        IpAddr::V6(v6) => format!("{}/128", v6),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pool() {
        let pool = AddressPool::parse(DEFAULT_POOL).unwrap();
        assert_eq!(pool, AddressPool::default());
        assert_eq!(pool.capacity(), 254);
        assert_eq!(pool.allocate(SERVER_INDEX).unwrap(), "10.200.200.1/24");
        assert_eq!(pool.allocate(2).unwrap(), "10.200.200.2/24");
        assert_eq!(pool.allocate(254).unwrap(), "10.200.200.254/24");
    }

    #[test]
    fn test_exhaustion() {
        let pool = AddressPool::parse("192.168.7.0/29").unwrap();
        assert_eq!(pool.capacity(), 6);
        assert!(pool.allocate(6).is_ok());
        match pool.allocate(7) {
            Err(Error::AddressPoolExhausted { index, capacity }) => {
                assert_eq!(index, 7);
                assert_eq!(capacity, 6);
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert!(matches!(pool.allocate(0), Err(Error::AddressPoolExhausted { .. })));
    }

    #[test]
    fn test_host_bits_are_masked() {
        let pool = AddressPool::parse("10.1.2.77/16").unwrap();
        assert_eq!(pool.to_string(), "10.1.0.0/16");
        assert_eq!(pool.allocate(300).unwrap(), "10.1.1.44/16");
    }

    #[test]
    fn test_tiny_pools_have_no_room() {
        assert_eq!(AddressPool::parse("10.0.0.0/31").unwrap().capacity(), 0);
        assert_eq!(AddressPool::parse("10.0.0.0/32").unwrap().capacity(), 0);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(AddressPool::parse("10.0.0.0"), Err(Error::Serialization(_))));
        assert!(matches!(AddressPool::parse("10.0.0.0/abc"), Err(Error::Serialization(_))));
        assert!(matches!(AddressPool::parse("10.0.0.0/40"), Err(Error::Serialization(_))));
        assert!(matches!(AddressPool::parse("fd00::/64"), Err(Error::Validation(_))));
    }

    #[test]
    fn test_host_route() {
        assert_eq!(host_route("10.200.200.2/24").unwrap(), "10.200.200.2/32");
        assert_eq!(host_route("10.9.0.4").unwrap(), "10.9.0.4/32");
        assert_eq!(host_route("fd00::5/64").unwrap(), "fd00::5/128");
        assert!(host_route("not-an-ip").is_err());
    }
}
