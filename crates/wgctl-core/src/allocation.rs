// ── Address allocation ──
//
// Pure functions over a set of peer records. The orchestrator wraps them
// with interface lookup; nothing here touches a backend.
//
// Scans are linear in the number of addresses tried and the number of
// used addresses, which is fine for a few hundred peers per interface.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::CoreError;
use crate::model::{Cidr, PeerConfig};

/// Every address assigned to `peers`, sorted by normalized byte value.
pub fn used_ips<'a>(peers: impl IntoIterator<Item = &'a PeerConfig>) -> Result<Vec<Cidr>, CoreError> {
    let mut used = Vec::new();
    for peer in peers {
        used.extend(peer.peer_interface.addresses()?);
    }
    used.sort();
    Ok(used)
}

/// Addresses from `used` that fall inside `subnet`, keeping order.
pub fn used_ips_in(used: &[Cidr], subnet: &Cidr) -> Vec<Cidr> {
    used.iter()
        .copied()
        .filter(|cidr| subnet.contains(&cidr.addr()))
        .collect()
}

/// First free address in `subnet` given the addresses already in use.
///
/// The network address is never handed out, and neither is the IPv4
/// broadcast address. With `increment`, the scan starts after the highest
/// used address instead of at the start of the subnet. The result carries
/// the subnet's prefix length.
pub fn fresh_ip(subnet: &Cidr, used: &[Cidr], increment: bool) -> Result<Cidr, CoreError> {
    let in_subnet = used_ips_in(used, subnet);
    let taken: HashSet<IpAddr> = in_subnet.iter().map(Cidr::addr).collect();

    let network = subnet.network_addr();
    let broadcast = subnet.is_v4().then(|| subnet.broadcast_addr());

    let mut candidate = match in_subnet.iter().max() {
        Some(highest) if increment => highest.addr(),
        _ => network,
    };

    loop {
        candidate = next_addr(candidate).ok_or_else(|| exhausted(subnet))?;
        if !subnet.contains(&candidate) {
            return Err(exhausted(subnet));
        }
        if candidate == network || Some(candidate) == broadcast || taken.contains(&candidate) {
            continue;
        }
        return Cidr::new(candidate, subnet.prefix_len());
    }
}

fn exhausted(subnet: &Cidr) -> CoreError {
    CoreError::AddressSpaceExhausted {
        subnet: subnet.network().to_string(),
    }
}

/// Big-endian increment: bump the last byte and carry towards the first.
/// `None` once the address space wraps.
fn next_addr(addr: IpAddr) -> Option<IpAddr> {
    match addr {
        IpAddr::V4(v4) => {
            let mut octets = v4.octets();
            increment_bytes(&mut octets).then(|| IpAddr::V4(Ipv4Addr::from(octets)))
        }
        IpAddr::V6(v6) => {
            let mut octets = v6.octets();
            increment_bytes(&mut octets).then(|| IpAddr::V6(Ipv6Addr::from(octets)))
        }
    }
}

fn increment_bytes(bytes: &mut [u8]) -> bool {
    for byte in bytes.iter_mut().rev() {
        let (next, overflow) = byte.overflowing_add(1);
        *byte = next;
        if !overflow {
            return true;
        }
    }
    false
}
