// ── Peer configuration ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cidr::Cidr;
use super::extras::PeerExtras;
use super::identifiers::{InterfaceIdentifier, PeerIdentifier};
use super::interface::{ConfigOption, InterfaceConfig, InterfaceType};
use super::keys::{KeyPair, PresharedKey};
use super::physical::PhysicalPeer;
use crate::error::CoreError;

/// The peer's side of the tunnel: what its own interface looks like.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerInterfaceConfig {
    pub key_pair: KeyPair,
    pub interface_type: InterfaceType,
    /// Comma-separated CIDRs assigned to the peer.
    pub address_str: String,
    pub check_alive_address: String,
    pub dns_str: ConfigOption<String>,
    pub dns_search_str: ConfigOption<String>,
    pub mtu: ConfigOption<u32>,
    pub firewall_mark: ConfigOption<u32>,
    pub routing_table: ConfigOption<String>,
    pub pre_up: ConfigOption<String>,
    pub post_up: ConfigOption<String>,
    pub pre_down: ConfigOption<String>,
    pub post_down: ConfigOption<String>,
}

impl PeerInterfaceConfig {
    pub fn addresses(&self) -> Result<Vec<Cidr>, CoreError> {
        Cidr::parse_list(&self.address_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    pub identifier: PeerIdentifier,
    pub interface_identifier: InterfaceIdentifier,
    pub display_name: String,
    pub notes: String,
    pub endpoint: ConfigOption<String>,
    pub endpoint_public_key: ConfigOption<String>,
    /// What the peer routes through the tunnel, comma-separated.
    pub allowed_ips_str: ConfigOption<String>,
    /// Additional networks routed to the peer on our side.
    pub extra_allowed_ips_str: String,
    pub preshared_key: Option<PresharedKey>,
    /// Seconds, 0 = off.
    pub persistent_keepalive: ConfigOption<u32>,
    pub peer_interface: PeerInterfaceConfig,
    pub disabled: Option<DateTime<Utc>>,
    pub disabled_reason: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub backend_extras: Option<PeerExtras>,
}

impl PeerConfig {
    /// Fresh peer on `iface`, seeded from the interface's peer defaults.
    pub fn from_defaults(iface: &InterfaceConfig, key_pair: KeyPair) -> Self {
        let identifier = PeerIdentifier::new(key_pair.public_key.clone());
        let defaults = &iface.peer_defaults;
        let peer_type = match iface.interface_type {
            InterfaceType::Client => InterfaceType::Server,
            InterfaceType::Server => InterfaceType::Client,
            InterfaceType::Any => InterfaceType::Any,
        };
        Self {
            display_name: format!("Peer {}", identifier.short()),
            interface_identifier: iface.identifier.clone(),
            endpoint: ConfigOption::new(defaults.endpoint.clone(), true),
            endpoint_public_key: ConfigOption::new(iface.key_pair.public_key.clone(), true),
            allowed_ips_str: ConfigOption::new(defaults.allowed_ips_str.clone(), true),
            persistent_keepalive: ConfigOption::new(defaults.persistent_keepalive, true),
            peer_interface: PeerInterfaceConfig {
                key_pair,
                interface_type: peer_type,
                dns_str: ConfigOption::new(defaults.dns_str.clone(), true),
                dns_search_str: ConfigOption::new(defaults.dns_search_str.clone(), true),
                mtu: ConfigOption::new(defaults.mtu, true),
                firewall_mark: ConfigOption::new(defaults.firewall_mark, true),
                routing_table: ConfigOption::new(defaults.routing_table.clone(), true),
                pre_up: ConfigOption::new(defaults.pre_up.clone(), true),
                post_up: ConfigOption::new(defaults.post_up.clone(), true),
                pre_down: ConfigOption::new(defaults.pre_down.clone(), true),
                post_down: ConfigOption::new(defaults.post_down.clone(), true),
                ..PeerInterfaceConfig::default()
            },
            identifier,
            ..Self::default()
        }
    }

    /// Build a record from a live peer. Host routes become the peer's
    /// addresses, anything wider is kept as extra allowed IPs.
    pub fn from_physical(pp: &PhysicalPeer, iface: &InterfaceConfig) -> Self {
        let mut peer = Self {
            identifier: pp.identifier.clone(),
            interface_identifier: iface.identifier.clone(),
            display_name: format!("Peer {}", pp.identifier.short()),
            endpoint: ConfigOption::new(pp.endpoint.clone(), true),
            endpoint_public_key: ConfigOption::new(iface.key_pair.public_key.clone(), true),
            preshared_key: pp.preshared_key.clone(),
            persistent_keepalive: ConfigOption::new(pp.persistent_keepalive, true),
            backend_extras: pp.extras.clone(),
            peer_interface: PeerInterfaceConfig {
                key_pair: pp.key_pair.clone(),
                ..PeerInterfaceConfig::default()
            },
            ..Self::default()
        };

        if iface.interface_type == InterfaceType::Client {
            peer.peer_interface.interface_type = InterfaceType::Server;
            peer.allowed_ips_str = ConfigOption::new(Cidr::list_to_string(&pp.allowed_ips), true);
        } else {
            let (hosts, networks): (Vec<Cidr>, Vec<Cidr>) = pp
                .allowed_ips
                .iter()
                .copied()
                .partition(|c| c.prefix_len() == c.max_prefix_len());
            peer.peer_interface.interface_type = InterfaceType::Client;
            peer.peer_interface.address_str = Cidr::list_to_string(&hosts);
            peer.extra_allowed_ips_str = Cidr::list_to_string(&networks);
            peer.allowed_ips_str =
                ConfigOption::new(iface.peer_defaults.allowed_ips_str.clone(), true);
        }
        peer
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.is_some()
    }

    pub fn disable(&mut self, reason: impl Into<String>) {
        self.disabled = Some(Utc::now());
        self.disabled_reason = reason.into();
    }

    pub fn enable(&mut self) {
        self.disabled = None;
        self.disabled_reason.clear();
    }

    /// The allowed IPs pushed to our side of the tunnel.
    ///
    /// A server-type peer gets its own allowed IPs followed by the extra
    /// ones, concatenated as-is without deduplication. Any other peer gets
    /// its addresses as host routes followed by the extra allowed IPs.
    pub fn materialize_allowed_ips(&self) -> Result<Vec<Cidr>, CoreError> {
        let mut allowed = match self.peer_interface.interface_type {
            InterfaceType::Server => Cidr::parse_list(self.allowed_ips_str.get())?,
            InterfaceType::Client | InterfaceType::Any => self
                .peer_interface
                .addresses()?
                .iter()
                .map(Cidr::host_cidr)
                .collect(),
        };
        allowed.extend(Cidr::parse_list(&self.extra_allowed_ips_str)?);
        Ok(allowed)
    }

    /// Copy device-relevant settings onto a physical snapshot. Extras are
    /// left for the owning backend.
    pub fn merge_into(&self, pp: &mut PhysicalPeer) -> Result<(), CoreError> {
        pp.allowed_ips = self.materialize_allowed_ips()?;
        pp.identifier = self.identifier.clone();
        pp.endpoint.clone_from(self.endpoint.get());
        pp.key_pair
            .public_key
            .clone_from(&self.peer_interface.key_pair.public_key);
        if pp.key_pair.public_key.is_empty() {
            pp.key_pair.public_key = self.identifier.to_string();
        }
        pp.preshared_key = self.preshared_key.clone();
        pp.persistent_keepalive = *self.persistent_keepalive.get();
        Ok(())
    }

    /// Overwrite every overridable option from the interface defaults.
    pub fn apply_interface_defaults(&mut self, iface: &InterfaceConfig) {
        let defaults = &iface.peer_defaults;
        self.endpoint.try_set(defaults.endpoint.clone());
        self.endpoint_public_key
            .try_set(iface.key_pair.public_key.clone());
        self.allowed_ips_str.try_set(defaults.allowed_ips_str.clone());
        self.persistent_keepalive.try_set(defaults.persistent_keepalive);

        let pi = &mut self.peer_interface;
        pi.dns_str.try_set(defaults.dns_str.clone());
        pi.dns_search_str.try_set(defaults.dns_search_str.clone());
        pi.mtu.try_set(defaults.mtu);
        pi.firewall_mark.try_set(defaults.firewall_mark);
        pi.routing_table.try_set(defaults.routing_table.clone());
        pi.pre_up.try_set(defaults.pre_up.clone());
        pi.post_up.try_set(defaults.post_up.clone());
        pi.pre_down.try_set(defaults.pre_down.clone());
        pi.post_down.try_set(defaults.post_down.clone());
    }

    /// Address used for liveness checks: the explicit one, else the
    /// first assigned address.
    pub fn check_alive_address(&self) -> Option<String> {
        if !self.peer_interface.check_alive_address.is_empty() {
            return Some(self.peer_interface.check_alive_address.clone());
        }
        self.peer_interface
            .addresses()
            .ok()?
            .first()
            .map(|c| c.addr().to_string())
    }
}
