// ── Physical objects ──
//
// Snapshots of what a backend reports right now. They are rebuilt on
// every read and never cached inside a backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::cidr::Cidr;
use super::extras::{InterfaceExtras, PeerExtras};
use super::identifiers::{InterfaceIdentifier, PeerIdentifier};
use super::keys::{KeyPair, PresharedKey};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysicalInterface {
    pub identifier: InterfaceIdentifier,
    pub key_pair: KeyPair,
    pub listen_port: u16,
    pub addresses: Vec<Cidr>,
    pub mtu: u32,
    pub firewall_mark: u32,
    pub device_up: bool,
    pub import_source: String,
    pub device_type: String,
    pub bytes_upload: u64,
    pub bytes_download: u64,
    pub extras: Option<InterfaceExtras>,
}

impl PhysicalInterface {
    pub fn new(identifier: InterfaceIdentifier) -> Self {
        Self {
            identifier,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysicalPeer {
    pub identifier: PeerIdentifier,
    /// `host:port`, or empty for peers that never initiate.
    pub endpoint: String,
    pub allowed_ips: Vec<Cidr>,
    pub key_pair: KeyPair,
    pub preshared_key: Option<PresharedKey>,
    /// Seconds, 0 = off.
    pub persistent_keepalive: u32,
    pub last_handshake: Option<DateTime<Utc>>,
    pub protocol_version: u32,
    pub bytes_upload: u64,
    pub bytes_download: u64,
    pub import_source: String,
    pub extras: Option<PeerExtras>,
}

impl PhysicalPeer {
    pub fn new(identifier: PeerIdentifier) -> Self {
        Self {
            key_pair: KeyPair::public_only(identifier.as_str()),
            identifier,
            ..Self::default()
        }
    }
}

/// Input to route management for one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTableInfo {
    pub interface: InterfaceIdentifier,
    /// 0 = derive from the link index.
    pub fw_mark: u32,
    /// 0 = derive from the mark, -1 = routing management disabled.
    pub table: i32,
    /// Textual table name as configured, used by RouterOS.
    pub table_str: String,
    pub allowed_ips: Vec<Cidr>,
}

impl RoutingTableInfo {
    pub fn is_disabled(&self) -> bool {
        self.table == -1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PingResult {
    pub packets_sent: u32,
    pub packets_recv: u32,
    pub rtts: Vec<Duration>,
}

impl PingResult {
    pub fn is_reachable(&self) -> bool {
        self.packets_recv > 0
    }

    pub fn average_rtt(&self) -> Option<Duration> {
        let count = u32::try_from(self.rtts.len()).ok().filter(|n| *n > 0)?;
        Some(self.rtts.iter().sum::<Duration>() / count)
    }
}
