//! WireGuard device-control client abstraction.
//!
//! [`WireGuardClient`] mirrors the classic device API: list devices, read
//! one device with its peers, apply a partial configuration. Production
//! code uses [`KernelWireGuard`], which speaks the kernel's generic
//! netlink interface through `wireguard-control`. Those calls block, so
//! each one runs on the blocking pool.

use std::collections::HashSet;
use std::net::{SocketAddr, ToSocketAddrs};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use tracing::debug;
use wireguard_control::{
    Backend, Device as WgDevice, DeviceUpdate, InterfaceName, Key, PeerConfigBuilder, PeerInfo,
};

use crate::error::Error;

// ── Domain types ────────────────────────────────────────────────────

/// A WireGuard device and its peers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Device {
    pub name: String,
    pub private_key: Option<String>,
    pub public_key: Option<String>,
    pub listen_port: u16,
    pub firewall_mark: u32,
    pub peers: Vec<Peer>,
}

/// A peer as reported by the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Peer {
    pub public_key: String,
    pub preshared_key: Option<String>,
    pub endpoint: Option<String>,
    pub allowed_ips: Vec<IpNet>,
    pub last_handshake: Option<DateTime<Utc>>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    /// Seconds, 0 when disabled.
    pub persistent_keepalive: u16,
    pub protocol_version: u32,
}

/// Partial device configuration. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceConfig {
    pub private_key: Option<String>,
    pub listen_port: Option<u16>,
    /// `Some(0)` clears the mark.
    pub firewall_mark: Option<u32>,
    pub peers: Vec<PeerConfig>,
}

/// Per-peer change inside a [`DeviceConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerConfig {
    pub public_key: String,
    pub remove: bool,
    /// Skip the peer instead of creating it when it does not exist yet.
    pub update_only: bool,
    /// `Some("")` clears the preshared key.
    pub preshared_key: Option<String>,
    pub endpoint: Option<String>,
    /// `Some(0)` disables keepalive.
    pub persistent_keepalive: Option<u16>,
    /// `Some` replaces the allowed IPs with exactly this list.
    pub allowed_ips: Option<Vec<IpNet>>,
}

// ── Trait ───────────────────────────────────────────────────────────

#[async_trait]
pub trait WireGuardClient: Send + Sync {
    async fn devices(&self) -> Result<Vec<Device>, Error>;

    /// Fails with [`Error::DeviceNotFound`] if no such device exists.
    async fn device(&self, name: &str) -> Result<Device, Error>;

    async fn configure_device(&self, name: &str, config: &DeviceConfig) -> Result<(), Error>;

    /// Release any resources held by the client.
    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

// ── Kernel implementation ───────────────────────────────────────────

/// Production [`WireGuardClient`] for in-kernel devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelWireGuard;

impl KernelWireGuard {
    pub fn new() -> Self {
        Self
    }
}

/// Run a blocking device call off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, Error>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, Error> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}

fn list_names() -> Result<Vec<InterfaceName>, Error> {
    Ok(WgDevice::list(Backend::Kernel)?)
}

fn interface_name(name: &str) -> Result<InterfaceName, Error> {
    name.parse().map_err(|e| Error::Parse {
        what: "interface name",
        reason: format!("{name}: {e}"),
    })
}

/// Read one device, or [`Error::DeviceNotFound`] when it is not listed.
fn read_device(name: &str) -> Result<WgDevice, Error> {
    let iface = interface_name(name)?;
    if !list_names()?.contains(&iface) {
        return Err(Error::DeviceNotFound {
            name: name.to_owned(),
        });
    }
    Ok(WgDevice::get(&iface, Backend::Kernel)?)
}

#[async_trait]
impl WireGuardClient for KernelWireGuard {
    async fn devices(&self) -> Result<Vec<Device>, Error> {
        blocking(|| {
            list_names()?
                .iter()
                .map(|iface| -> Result<Device, Error> {
                    Ok(convert_device(&WgDevice::get(iface, Backend::Kernel)?))
                })
                .collect::<Result<Vec<_>, Error>>()
        })
        .await
    }

    async fn device(&self, name: &str) -> Result<Device, Error> {
        let name = name.to_owned();
        blocking(move || read_device(&name).map(|d| convert_device(&d))).await
    }

    async fn configure_device(&self, name: &str, config: &DeviceConfig) -> Result<(), Error> {
        let name = name.to_owned();
        let config = config.clone();
        blocking(move || {
            let existing: HashSet<String> = if config.peers.iter().any(|p| p.update_only) {
                read_device(&name)?
                    .peers
                    .iter()
                    .map(|p| p.config.public_key.to_base64())
                    .collect()
            } else {
                HashSet::new()
            };
            let update = build_update(&name, &config, &existing)?;
            let iface = interface_name(&name)?;
            if !list_names()?.contains(&iface) {
                return Err(Error::DeviceNotFound { name });
            }
            Ok(update.apply(&iface, Backend::Kernel)?)
        })
        .await
    }
}

// ── Conversion ──────────────────────────────────────────────────────

fn parse_key(raw: &str) -> Result<Key, Error> {
    Key::from_base64(raw).map_err(|e| Error::Parse {
        what: "wireguard key",
        reason: e.to_string(),
    })
}

/// Host names are resolved here; callers are on the blocking pool.
fn parse_endpoint(raw: &str) -> Result<SocketAddr, Error> {
    if let Ok(addr) = raw.parse() {
        return Ok(addr);
    }
    let invalid = |reason: String| Error::Parse {
        what: "peer endpoint",
        reason: format!("{raw}: {reason}"),
    };
    raw.to_socket_addrs()
        .map_err(|e| invalid(e.to_string()))?
        .next()
        .ok_or_else(|| invalid("no address".to_owned()))
}

/// Translate a partial configuration into one device update. Peers listed
/// as `update_only` but absent from `existing` are skipped.
fn build_update(
    name: &str,
    config: &DeviceConfig,
    existing: &HashSet<String>,
) -> Result<DeviceUpdate, Error> {
    let mut update = DeviceUpdate::new();
    if let Some(key) = &config.private_key {
        update = update.set_private_key(parse_key(key)?);
    }
    if let Some(port) = config.listen_port {
        update = update.set_listen_port(port);
    }
    match config.firewall_mark {
        Some(0) => update = update.unset_fwmark(),
        Some(mark) => update = update.set_fwmark(mark),
        None => {}
    }

    for peer in &config.peers {
        let key = parse_key(&peer.public_key)?;
        if peer.remove {
            update = update.remove_peer_by_key(&key);
            continue;
        }
        if peer.update_only && !existing.contains(&peer.public_key) {
            debug!(device = name, peer = %peer.public_key, "skipping update of absent peer");
            continue;
        }
        update = update.add_peer(peer_builder(&key, peer)?);
    }
    Ok(update)
}

fn peer_builder(key: &Key, peer: &PeerConfig) -> Result<PeerConfigBuilder, Error> {
    let mut builder = PeerConfigBuilder::new(key);
    match peer.preshared_key.as_deref() {
        Some("") => builder = builder.unset_preshared_key(),
        Some(psk) => builder = builder.set_preshared_key(parse_key(psk)?),
        None => {}
    }
    if let Some(endpoint) = peer.endpoint.as_deref().filter(|e| !e.is_empty()) {
        builder = builder.set_endpoint(parse_endpoint(endpoint)?);
    }
    match peer.persistent_keepalive {
        Some(0) => builder = builder.unset_persistent_keepalive(),
        Some(secs) => builder = builder.set_persistent_keepalive_interval(secs),
        None => {}
    }
    if let Some(ips) = &peer.allowed_ips {
        builder = builder.replace_allowed_ips();
        for ip in ips {
            builder = builder.add_allowed_ip(ip.addr(), ip.prefix_len());
        }
    }
    Ok(builder)
}

fn convert_device(device: &WgDevice) -> Device {
    Device {
        name: device.name.to_string(),
        private_key: device.private_key.as_ref().map(Key::to_base64),
        public_key: device.public_key.as_ref().map(Key::to_base64),
        listen_port: device.listen_port.unwrap_or(0),
        firewall_mark: device.fwmark.unwrap_or(0),
        peers: device.peers.iter().map(convert_peer).collect(),
    }
}

fn convert_peer(info: &PeerInfo) -> Peer {
    let config = &info.config;
    Peer {
        public_key: config.public_key.to_base64(),
        preshared_key: config.preshared_key.as_ref().map(Key::to_base64),
        endpoint: config.endpoint.as_ref().map(ToString::to_string),
        allowed_ips: config
            .allowed_ips
            .iter()
            .filter_map(|ip| IpNet::new(ip.address, ip.cidr).ok())
            .collect(),
        last_handshake: info.stats.last_handshake_time.map(DateTime::<Utc>::from),
        rx_bytes: info.stats.rx_bytes,
        tx_bytes: info.stats.tx_bytes,
        persistent_keepalive: config.persistent_keepalive_interval.unwrap_or(0),
        protocol_version: 1,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const PEER: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";

    #[test]
    fn invalid_keys_are_rejected_before_touching_the_device() {
        let config = DeviceConfig {
            private_key: Some("not-a-key".into()),
            ..DeviceConfig::default()
        };
        let err = build_update("wg0", &config, &HashSet::new()).unwrap_err();
        assert!(matches!(err, Error::Parse { what: "wireguard key", .. }));
    }

    #[test]
    fn endpoints_without_port_are_rejected() {
        let peer = PeerConfig {
            public_key: PEER.into(),
            endpoint: Some("203.0.113.7".into()),
            ..PeerConfig::default()
        };
        let err = peer_builder(&parse_key(PEER).unwrap(), &peer).unwrap_err();
        assert!(matches!(err, Error::Parse { what: "peer endpoint", .. }));

        let ok = PeerConfig {
            endpoint: Some("[fd00::7]:51820".into()),
            ..peer
        };
        peer_builder(&parse_key(PEER).unwrap(), &ok).unwrap();
    }

    #[test]
    fn update_only_peers_need_an_existing_entry() {
        let config = DeviceConfig {
            peers: vec![PeerConfig {
                public_key: PEER.into(),
                update_only: true,
                preshared_key: Some("garbage".into()),
                ..PeerConfig::default()
            }],
            ..DeviceConfig::default()
        };
        // skipped, so the bad preshared key is never parsed
        build_update("wg0", &config, &HashSet::new()).unwrap();

        let existing = HashSet::from([PEER.to_owned()]);
        assert!(build_update("wg0", &config, &existing).is_err());
    }

    #[test]
    fn overlong_interface_names_are_rejected() {
        let err = interface_name("wg-name-longer-than-ifnamsiz").unwrap_err();
        assert!(matches!(err, Error::Parse { what: "interface name", .. }));
    }

    // Run with: sudo cargo test -p wgctl-api -- --ignored
    #[tokio::test]
    #[ignore = "requires root and the WireGuard kernel module"]
    async fn missing_device_is_reported() {
        let err = KernelWireGuard::new().device("wgctl-absent").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
