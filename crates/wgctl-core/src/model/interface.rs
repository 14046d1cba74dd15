// ── Interface configuration ──
//
// The long-lived record the orchestrator keeps per interface. It merges
// into a `PhysicalInterface` before a push and is built from one when a
// live interface is imported.

use serde::{Deserialize, Serialize};

use super::cidr::Cidr;
use super::identifiers::{InterfaceBackend, InterfaceIdentifier};
use super::keys::KeyPair;
use super::physical::PhysicalInterface;

/// Role of an interface (or of a peer's own interface).
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InterfaceType {
    Server,
    Client,
    #[default]
    Any,
}

/// A peer setting that may be overwritten from interface defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOption<T> {
    pub value: T,
    pub overridable: bool,
}

impl<T> ConfigOption<T> {
    pub fn new(value: T, overridable: bool) -> Self {
        Self { value, overridable }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn set(&mut self, value: T) {
        self.value = value;
    }

    /// Replace the value only if it is overridable.
    pub fn try_set(&mut self, value: T) -> bool {
        if self.overridable {
            self.value = value;
        }
        self.overridable
    }
}

/// Settings new peers inherit from their interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerDefaults {
    /// Subnets peer addresses are allocated from.
    pub networks: Vec<Cidr>,
    pub dns_str: String,
    pub dns_search_str: String,
    pub endpoint: String,
    pub allowed_ips_str: String,
    pub mtu: u32,
    pub persistent_keepalive: u32,
    pub firewall_mark: u32,
    pub routing_table: String,
    pub pre_up: String,
    pub post_up: String,
    pub pre_down: String,
    pub post_down: String,
}

/// Lifecycle hook points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum HookKind {
    PreUp,
    PostUp,
    PreDown,
    PostDown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceConfig {
    pub identifier: InterfaceIdentifier,
    pub backend: InterfaceBackend,
    pub key_pair: KeyPair,
    pub listen_port: u16,
    pub addresses: Vec<Cidr>,
    pub dns_str: String,
    pub dns_search_str: String,
    pub mtu: u32,
    pub firewall_mark: u32,
    /// Table number, `0x` hex number, empty for automatic, or `off`.
    pub routing_table: String,
    pub pre_up: String,
    pub post_up: String,
    pub pre_down: String,
    pub post_down: String,
    pub display_name: String,
    pub interface_type: InterfaceType,
    pub driver_type: String,
    pub enabled: bool,
    pub disabled_reason: String,
    pub peer_defaults: PeerDefaults,
}

impl InterfaceConfig {
    /// Blank record for a freshly created interface.
    pub fn new(identifier: InterfaceIdentifier, backend: InterfaceBackend) -> Self {
        Self {
            display_name: identifier.to_string(),
            identifier,
            backend,
            enabled: true,
            ..Self::default()
        }
    }

    /// Build a record from a live interface found on a backend.
    pub fn from_physical(pi: &PhysicalInterface, backend: InterfaceBackend) -> Self {
        let networks: Vec<Cidr> = pi.addresses.iter().map(Cidr::network).collect();
        Self {
            identifier: pi.identifier.clone(),
            backend,
            key_pair: pi.key_pair.clone(),
            listen_port: pi.listen_port,
            addresses: pi.addresses.clone(),
            mtu: pi.mtu,
            firewall_mark: pi.firewall_mark,
            display_name: pi.identifier.to_string(),
            interface_type: InterfaceType::Any,
            driver_type: pi.device_type.clone(),
            enabled: pi.device_up,
            peer_defaults: PeerDefaults {
                allowed_ips_str: Cidr::list_to_string(&networks),
                networks,
                mtu: pi.mtu,
                ..PeerDefaults::default()
            },
            ..Self::default()
        }
    }

    /// Copy the device-relevant settings onto a physical snapshot.
    /// Extras are left alone; backends attach their own.
    pub fn merge_into(&self, pi: &mut PhysicalInterface) {
        pi.identifier = self.identifier.clone();
        pi.key_pair = self.key_pair.clone();
        pi.listen_port = self.listen_port;
        pi.addresses = self.addresses.clone();
        pi.mtu = self.mtu;
        pi.firewall_mark = self.firewall_mark;
        pi.device_up = self.enabled;
    }

    pub fn manage_routing_table(&self) -> bool {
        !self.routing_table.trim().eq_ignore_ascii_case("off")
    }

    /// Numeric routing table: 0 = automatic, -1 = off or unparseable.
    pub fn routing_table_id(&self) -> i32 {
        let raw = self.routing_table.trim().to_ascii_lowercase();
        let parsed = match raw.as_str() {
            "" => return 0,
            "off" => return -1,
            other => match other.strip_prefix("0x") {
                Some(hex) => i32::from_str_radix(hex, 16),
                None => other.parse::<i32>(),
            },
        };
        match parsed {
            Ok(table) if table >= 0 => table,
            _ => {
                tracing::warn!(
                    interface = %self.identifier,
                    table = %self.routing_table,
                    "unparseable routing table, treating routing as disabled"
                );
                -1
            }
        }
    }

    pub fn hook(&self, kind: HookKind) -> &str {
        match kind {
            HookKind::PreUp => &self.pre_up,
            HookKind::PostUp => &self.post_up,
            HookKind::PreDown => &self.pre_down,
            HookKind::PostDown => &self.post_down,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn iface(table: &str) -> InterfaceConfig {
        InterfaceConfig {
            routing_table: table.into(),
            ..InterfaceConfig::new("wg0".into(), InterfaceBackend::local())
        }
    }

    #[test]
    fn routing_table_parsing() {
        assert_eq!(iface("").routing_table_id(), 0);
        assert_eq!(iface("off").routing_table_id(), -1);
        assert_eq!(iface("OFF").routing_table_id(), -1);
        assert_eq!(iface("1234").routing_table_id(), 1234);
        assert_eq!(iface("0x10").routing_table_id(), 16);
        assert_eq!(iface("main").routing_table_id(), -1);
        assert!(!iface("off").manage_routing_table());
        assert!(iface("100").manage_routing_table());
    }

    #[test]
    fn import_derives_peer_defaults_from_addresses() {
        let pi = PhysicalInterface {
            addresses: vec!["10.8.0.1/24".parse().unwrap()],
            device_up: true,
            mtu: 1420,
            ..PhysicalInterface::new("wg1".into())
        };
        let cfg = InterfaceConfig::from_physical(&pi, InterfaceBackend::local());
        assert!(cfg.enabled);
        assert_eq!(cfg.peer_defaults.allowed_ips_str, "10.8.0.0/24");
        assert_eq!(cfg.peer_defaults.mtu, 1420);
    }

    #[test]
    fn merge_maps_enabled_to_device_up() {
        let mut cfg = InterfaceConfig::new("wg0".into(), InterfaceBackend::local());
        cfg.enabled = false;
        cfg.listen_port = 51820;
        let mut pi = PhysicalInterface::new("wg0".into());
        pi.device_up = true;
        cfg.merge_into(&mut pi);
        assert!(!pi.device_up);
        assert_eq!(pi.listen_port, 51820);
    }

    #[test]
    fn config_option_respects_overridable() {
        let mut fixed = ConfigOption::new(25u32, false);
        assert!(!fixed.try_set(10));
        assert_eq!(*fixed.get(), 25);

        let mut open = ConfigOption::new(25u32, true);
        assert!(open.try_set(10));
        assert_eq!(open.value, 10);
    }
}
