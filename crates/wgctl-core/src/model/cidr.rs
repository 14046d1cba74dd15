// ── CIDR values ──
//
// An address plus prefix length. The host part is kept (so interface
// addresses like `10.0.0.1/24` survive a round trip) and every ordering
// compares the 16-byte big-endian form, with IPv4 mapped into
// `::ffff:0:0/96`, so mixed-family lists sort consistently.

use ipnet::IpNet;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr {
    addr: IpAddr,
    prefix_len: u8,
}

impl Cidr {
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self, CoreError> {
        if prefix_len > max_prefix_len(&addr) {
            return Err(CoreError::Validation {
                field: "cidr".into(),
                reason: format!("prefix length {prefix_len} is too long for {addr}"),
            });
        }
        Ok(Self { addr, prefix_len })
    }

    /// Single-host CIDR (`/32` or `/128`).
    pub fn host(addr: IpAddr) -> Self {
        Self {
            prefix_len: max_prefix_len(&addr),
            addr,
        }
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn is_v4(&self) -> bool {
        self.addr.is_ipv4()
    }

    pub fn max_prefix_len(&self) -> u8 {
        max_prefix_len(&self.addr)
    }

    /// First address of the range.
    pub fn network_addr(&self) -> IpAddr {
        match self.addr {
            IpAddr::V4(v4) => IpAddr::V4(Ipv4Addr::from(u32::from(v4) & mask_v4(self.prefix_len))),
            IpAddr::V6(v6) => {
                IpAddr::V6(Ipv6Addr::from(u128::from(v6) & mask_v6(self.prefix_len)))
            }
        }
    }

    /// Last address of the range (the broadcast address for IPv4).
    pub fn broadcast_addr(&self) -> IpAddr {
        match self.addr {
            IpAddr::V4(v4) => {
                IpAddr::V4(Ipv4Addr::from(u32::from(v4) | !mask_v4(self.prefix_len)))
            }
            IpAddr::V6(v6) => {
                IpAddr::V6(Ipv6Addr::from(u128::from(v6) | !mask_v6(self.prefix_len)))
            }
        }
    }

    /// The network this address lives in, e.g. `10.0.0.7/24` -> `10.0.0.0/24`.
    pub fn network(&self) -> Self {
        Self {
            addr: self.network_addr(),
            prefix_len: self.prefix_len,
        }
    }

    pub fn host_cidr(&self) -> Self {
        Self::host(self.addr)
    }

    /// Whether `ip` falls inside this range. Different families never match.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = mask_v4(self.prefix_len);
                u32::from(net) & mask == u32::from(*ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = mask_v6(self.prefix_len);
                u128::from(net) & mask == u128::from(*ip) & mask
            }
            _ => false,
        }
    }

    /// Same network and prefix, ignoring host bits.
    pub fn same_prefix(&self, other: &Self) -> bool {
        self.prefix_len == other.prefix_len && self.network_addr() == other.network_addr()
    }

    pub fn is_default_route(&self) -> bool {
        self.prefix_len == 0
    }

    /// Normalized 16-byte big-endian form of the address.
    pub fn bytes16(&self) -> [u8; 16] {
        addr_bytes16(&self.addr)
    }

    pub fn to_ipnet(&self) -> IpNet {
        match self.addr {
            IpAddr::V4(v4) => IpNet::V4(
                ipnet::Ipv4Net::new(v4, self.prefix_len).unwrap_or_else(|_| ipnet::Ipv4Net::from(v4)),
            ),
            IpAddr::V6(v6) => IpNet::V6(
                ipnet::Ipv6Net::new(v6, self.prefix_len).unwrap_or_else(|_| ipnet::Ipv6Net::from(v6)),
            ),
        }
    }

    /// Parse a comma-separated list, skipping empty entries.
    pub fn parse_list(s: &str) -> Result<Vec<Self>, CoreError> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse)
            .collect()
    }

    pub fn list_to_string(list: &[Self]) -> String {
        list.iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Split a list into (IPv4, IPv6).
    pub fn per_family(list: &[Self]) -> (Vec<Self>, Vec<Self>) {
        list.iter().copied().partition(Self::is_v4)
    }

    pub fn contains_default_route(list: &[Self]) -> bool {
        list.iter().any(Self::is_default_route)
    }
}

impl From<IpNet> for Cidr {
    fn from(net: IpNet) -> Self {
        Self {
            addr: net.addr(),
            prefix_len: net.prefix_len(),
        }
    }
}

impl From<Cidr> for IpNet {
    fn from(cidr: Cidr) -> Self {
        cidr.to_ipnet()
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

impl FromStr for Cidr {
    type Err = CoreError;

    /// Accepts `addr/len`, or a bare address meaning a single host.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |reason: String| CoreError::Validation {
            field: "cidr".into(),
            reason,
        };

        match s.split_once('/') {
            Some((addr, len)) => {
                let addr: IpAddr = addr
                    .parse()
                    .map_err(|e| invalid(format!("'{s}': {e}")))?;
                let len: u8 = len
                    .parse()
                    .map_err(|e| invalid(format!("'{s}': bad prefix length: {e}")))?;
                Self::new(addr, len)
            }
            None => s
                .parse::<IpAddr>()
                .map(Self::host)
                .map_err(|e| invalid(format!("'{s}': {e}"))),
        }
    }
}

impl Ord for Cidr {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes16()
            .cmp(&other.bytes16())
            .then(self.prefix_len.cmp(&other.prefix_len))
    }
}

impl PartialOrd for Cidr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Cidr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cidr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ── Byte helpers ────────────────────────────────────────────────────

pub(crate) fn addr_bytes16(ip: &IpAddr) -> [u8; 16] {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

/// Inverse of [`addr_bytes16`] for a known family.
pub(crate) fn addr_from_bytes16(bytes: [u8; 16], v4: bool) -> IpAddr {
    let v6 = Ipv6Addr::from(bytes);
    if v4 {
        if let Some(mapped) = v6.to_ipv4_mapped() {
            return IpAddr::V4(mapped);
        }
    }
    IpAddr::V6(v6)
}

fn max_prefix_len(addr: &IpAddr) -> u8 {
    if addr.is_ipv4() { 32 } else { 128 }
}

fn mask_v4(prefix_len: u8) -> u32 {
    u32::MAX.checked_shl(32 - u32::from(prefix_len)).unwrap_or(0)
}

fn mask_v6(prefix_len: u8) -> u128 {
    u128::MAX.checked_shl(128 - u32::from(prefix_len)).unwrap_or(0)
}
