// ── pfSense-style REST backend ──
//
// Tunnels and peers live under /api/v2/vpn/wireguard. Objects carry a
// numeric remote id that is kept in the backend extras. Peer queries
// ignore server-side filters, so every peer lookup filters client-side.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use wgctl_api::{JsonObject, PfsenseClient, RequestOptions};

use super::bulk::fetch_bounded;
use super::locks::BackendLocks;
use super::{
    ControllerBackend, InterfaceTransform, PeerTransform, is_ignored, lenient_cidrs,
    parse_keepalive,
};
use crate::config::{RestBackendConfig, RestCredentials};
use crate::error::CoreError;
use crate::model::{
    BackendKind, Cidr, InterfaceBackend, InterfaceConfig, InterfaceExtras, InterfaceIdentifier,
    KeyPair, PeerConfig, PeerExtras, PeerIdentifier, PfsenseInterfaceExtras, PfsensePeerExtras,
    PhysicalInterface, PhysicalPeer, PingResult, PresharedKey, RoutingTableInfo,
};

const TUNNELS: &str = "/api/v2/vpn/wireguard/tunnels";
const TUNNEL: &str = "/api/v2/vpn/wireguard/tunnel";
const PEERS: &str = "/api/v2/vpn/wireguard/peers";
const PEER: &str = "/api/v2/vpn/wireguard/peer";

const IMPORT_SOURCE: &str = "pfsense";

pub struct PfsenseBackend {
    cfg: RestBackendConfig,
    client: Arc<PfsenseClient>,
    locks: BackendLocks,
}

impl PfsenseBackend {
    /// Build a backend with its own HTTP client. Requires API key credentials.
    pub fn new(cfg: RestBackendConfig) -> Result<Self, CoreError> {
        let RestCredentials::ApiKey(key) = &cfg.credentials else {
            return Err(CoreError::Config {
                message: format!("pfSense backend '{}' needs an API key", cfg.id),
            });
        };
        let client = PfsenseClient::new(cfg.api_url.clone(), key, &cfg.transport())
            .map_err(CoreError::remote(&cfg.id, "build client"))?;
        Ok(Self::with_client(cfg, client))
    }

    pub fn with_client(cfg: RestBackendConfig, client: PfsenseClient) -> Self {
        Self {
            cfg,
            client: Arc::new(client),
            locks: BackendLocks::new(),
        }
    }

    fn remote(&self, operation: impl Into<String>) -> impl FnOnce(wgctl_api::Error) -> CoreError {
        CoreError::remote(&self.cfg.id, operation)
    }

    // ── Tunnels ──────────────────────────────────────────────────────

    async fn find_tunnel(&self, id: &InterfaceIdentifier) -> Result<Option<JsonObject>, CoreError> {
        let opts = RequestOptions::new().filter("name", id.as_str());
        let tunnels = self
            .client
            .query(TUNNELS, &opts)
            .await
            .map_err(self.remote(format!("query tunnel {id}")))?;
        Ok(tunnels
            .into_iter()
            .find(|t| t.get_string("name") == id.as_str()))
    }

    async fn get_or_create_interface(
        &self,
        id: &InterfaceIdentifier,
    ) -> Result<PhysicalInterface, CoreError> {
        if let Some(tunnel) = self.find_tunnel(id).await? {
            return load_tunnel(&self.client, &self.cfg.id, tunnel).await;
        }

        let payload = JsonObject::new().with("name", id.as_str());
        let created = self
            .client
            .create(TUNNEL, &payload)
            .await
            .map_err(self.remote(format!("create tunnel {id}")))?;
        info!(backend = %self.cfg.id, interface = %id, remote_id = %created.get_string("id"), "created tunnel");

        match self.find_tunnel(id).await? {
            Some(tunnel) => load_tunnel(&self.client, &self.cfg.id, tunnel).await,
            None if !created.is_empty() => load_tunnel(&self.client, &self.cfg.id, created).await,
            None => Err(CoreError::not_found("tunnel", id)),
        }
    }

    async fn update_interface(&self, pi: &PhysicalInterface) -> Result<(), CoreError> {
        let extras = interface_extras_of(pi);
        let path = format!("{TUNNEL}/{}", extras.id);
        self.client
            .update(&path, &interface_payload(pi))
            .await
            .map_err(self.remote(format!("update tunnel {}", pi.identifier)))?;
        Ok(())
    }

    // ── Peers ────────────────────────────────────────────────────────

    async fn find_peer(
        &self,
        device: &InterfaceIdentifier,
        id: &PeerIdentifier,
    ) -> Result<Option<JsonObject>, CoreError> {
        let opts = RequestOptions::new()
            .filter("publickey", id.as_str())
            .filter("interface", device.as_str());
        let peers = self
            .client
            .query(PEERS, &opts)
            .await
            .map_err(self.remote(format!("query peer {id}")))?;
        Ok(peers
            .into_iter()
            .find(|p| peer_public_key(p) == id.as_str() && peer_on_tunnel(p, device)))
    }

    async fn get_or_create_peer(
        &self,
        device: &InterfaceIdentifier,
        id: &PeerIdentifier,
    ) -> Result<PhysicalPeer, CoreError> {
        if let Some(existing) = self.find_peer(device, id).await? {
            debug!(backend = %self.cfg.id, interface = %device, peer = %id, "found existing peer");
            return Ok(peer_from_json(&existing));
        }

        let payload = JsonObject::new()
            .with("name", format!("wg-{}", id.short()))
            .with("interface", device.as_str())
            .with("publickey", id.as_str())
            .with("allowedips", "0.0.0.0/0");
        let created = self
            .client
            .create(PEER, &payload)
            .await
            .map_err(self.remote(format!("create peer {id}")))?;
        debug!(backend = %self.cfg.id, interface = %device, peer = %id, "created peer");

        match self.find_peer(device, id).await? {
            Some(peer) => Ok(peer_from_json(&peer)),
            None if !created.is_empty() => Ok(peer_from_json(&created)),
            None => Err(CoreError::not_found("peer", id)),
        }
    }

    async fn update_peer(&self, device: &InterfaceIdentifier, pp: &PhysicalPeer) -> Result<(), CoreError> {
        let extras = peer_extras_of(pp);
        debug!(
            backend = %self.cfg.id,
            interface = %device,
            peer = %pp.identifier,
            allowed_ips = pp.allowed_ips.len(),
            disabled = extras.disabled,
            "updating peer"
        );
        let path = format!("{PEER}/{}", extras.id);
        self.client
            .update(&path, &peer_payload(pp))
            .await
            .map_err(self.remote(format!("update peer {}", pp.identifier)))?;
        Ok(())
    }
}

// ── Conversion ───────────────────────────────────────────────────────

async fn load_tunnel(
    client: &PfsenseClient,
    backend: &InterfaceBackend,
    tunnel: JsonObject,
) -> Result<PhysicalInterface, CoreError> {
    let remote_id = tunnel.get_string("id");
    let path = format!("{TUNNEL}/{remote_id}");
    let detail = client
        .get(&path, &RequestOptions::new())
        .await
        .map_err(CoreError::remote(backend, format!("load tunnel {}", tunnel.get_string("name"))))?;

    let mut merged = tunnel;
    for (key, value) in detail.into_inner() {
        if !value.is_null() {
            merged.insert(key, value);
        }
    }
    Ok(interface_from_json(&merged))
}

pub(crate) fn interface_from_json(tunnel: &JsonObject) -> PhysicalInterface {
    let disabled = tunnel.get_bool("disabled");
    PhysicalInterface {
        identifier: InterfaceIdentifier::new(tunnel.get_string("name")),
        key_pair: KeyPair {
            private_key: tunnel.get_string_any(&["privatekey", "private-key"]),
            public_key: tunnel.get_string_any(&["publickey", "public-key"]),
        },
        listen_port: u16::try_from(first_int(tunnel, &["listenport", "listen-port"]))
            .unwrap_or_default(),
        addresses: cidrs_of(tunnel, &["addresses"]),
        mtu: u32::try_from(tunnel.get_int("mtu")).unwrap_or_default(),
        firewall_mark: 0,
        device_up: tunnel.get_bool("running") && !disabled,
        import_source: IMPORT_SOURCE.into(),
        device_type: IMPORT_SOURCE.into(),
        bytes_upload: counter(tunnel, &["txbytes", "tx-bytes"]),
        bytes_download: counter(tunnel, &["rxbytes", "rx-bytes"]),
        extras: Some(InterfaceExtras::Pfsense(PfsenseInterfaceExtras {
            id: tunnel.get_string("id"),
            comment: tunnel.get_string_any(&["descr", "description", "comment"]),
            disabled,
        })),
    }
}

pub(crate) fn interface_payload(pi: &PhysicalInterface) -> JsonObject {
    let extras = interface_extras_of(pi);
    let mut payload = JsonObject::new()
        .with("name", pi.identifier.as_str())
        .with("description", extras.comment)
        .with("mtu", pi.mtu.to_string())
        .with("listenport", pi.listen_port.to_string())
        .with("privatekey", pi.key_pair.private_key.as_str())
        .with("disabled", (!pi.device_up).to_string());
    if !pi.addresses.is_empty() {
        payload.insert("addresses", Cidr::list_to_string(&pi.addresses));
    }
    payload
}

pub(crate) fn peer_from_json(peer: &JsonObject) -> PhysicalPeer {
    let public_key = peer_public_key(peer);

    let mut endpoint = peer.get_string("endpoint");
    let port = peer.get_string("port");
    if !endpoint.is_empty() && !port.is_empty() && !endpoint.contains(':') {
        endpoint = format!("{endpoint}:{port}");
    }

    let description = peer.get_string_any(&["descr", "description", "comment"]);
    let name = match peer.get_string_any(&["name", "descr"]) {
        name if name.is_empty() => description.clone(),
        name => name,
    };

    PhysicalPeer {
        identifier: PeerIdentifier::new(public_key.clone()),
        endpoint,
        allowed_ips: cidrs_of(peer, &["allowedips", "allowed-ips"]),
        key_pair: KeyPair {
            private_key: peer.get_string_any(&["privatekey", "private-key"]),
            public_key,
        },
        preshared_key: PresharedKey::non_empty(
            peer.get_string_any(&["presharedkey", "preshared-key"]),
        ),
        persistent_keepalive: parse_keepalive(
            &peer.get_string_any(&["persistentkeepalive", "persistent-keepalive"]),
        ),
        last_handshake: parse_handshake(&peer.get_string_any(&["lasthandshake", "last-handshake"])),
        protocol_version: 0,
        bytes_upload: counter(peer, &["txbytes", "tx-bytes"]),
        bytes_download: counter(peer, &["rxbytes", "rx-bytes"]),
        import_source: IMPORT_SOURCE.into(),
        extras: Some(PeerExtras::Pfsense(PfsensePeerExtras {
            id: peer.get_string("id"),
            name,
            comment: description,
            disabled: peer.get_bool("disabled"),
        })),
    }
}

pub(crate) fn peer_payload(pp: &PhysicalPeer) -> JsonObject {
    let extras = peer_extras_of(pp);
    let mut payload = JsonObject::new()
        .with("name", extras.name)
        .with("description", extras.comment)
        .with(
            "presharedkey",
            pp.preshared_key.as_ref().map(PresharedKey::as_str).unwrap_or_default(),
        )
        .with("publickey", pp.key_pair.public_key.as_str())
        .with("privatekey", pp.key_pair.private_key.as_str())
        .with("persistentkeepalive", pp.persistent_keepalive.to_string())
        .with("disabled", extras.disabled.to_string())
        .with("allowedips", Cidr::list_to_string(&pp.allowed_ips));
    if !pp.endpoint.is_empty() {
        payload.insert("endpoint", pp.endpoint.as_str());
    }
    payload
}

fn interface_extras_of(pi: &PhysicalInterface) -> PfsenseInterfaceExtras {
    match &pi.extras {
        Some(InterfaceExtras::Pfsense(extras)) => extras.clone(),
        _ => PfsenseInterfaceExtras::default(),
    }
}

fn peer_extras_of(pp: &PhysicalPeer) -> PfsensePeerExtras {
    match &pp.extras {
        Some(PeerExtras::Pfsense(extras)) => extras.clone(),
        _ => PfsensePeerExtras::default(),
    }
}

fn peer_public_key(peer: &JsonObject) -> String {
    peer.get_string_any(&["publickey", "public-key"])
}

/// Tunnel a peer belongs to (`tun`, with older field names as fallback).
const PEER_TUNNEL_KEYS: [&str; 3] = ["tun", "interface", "tunnel"];

fn peer_tunnel(peer: &JsonObject) -> String {
    peer.get_string_any(&PEER_TUNNEL_KEYS)
}

/// A peer record without any tunnel field is trusted to the server side
/// filter; one that names a tunnel, even an empty one, must name `device`.
fn peer_on_tunnel(peer: &JsonObject, device: &InterfaceIdentifier) -> bool {
    if !PEER_TUNNEL_KEYS.iter().any(|key| peer.contains_key(key)) {
        return true;
    }
    peer_tunnel(peer) == device.as_str()
}

fn first_int(obj: &JsonObject, keys: &[&str]) -> i64 {
    keys.iter()
        .map(|key| obj.get_int(key))
        .find(|value| *value != 0)
        .unwrap_or_default()
}

fn counter(obj: &JsonObject, keys: &[&str]) -> u64 {
    u64::try_from(first_int(obj, keys)).unwrap_or_default()
}

/// Address lists arrive as `[{address, mask}]` arrays or comma strings.
fn cidrs_of(obj: &JsonObject, keys: &[&str]) -> Vec<Cidr> {
    for key in keys {
        let cidrs = match obj.get(key) {
            Some(Value::Array(items)) => items.iter().filter_map(cidr_from_value).collect(),
            Some(Value::String(list)) => lenient_cidrs(list),
            _ => Vec::new(),
        };
        if !cidrs.is_empty() {
            return cidrs;
        }
    }
    Vec::new()
}

fn cidr_from_value(value: &Value) -> Option<Cidr> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(map) => {
            let entry = JsonObject::from(map.clone());
            let address = entry.get_string("address");
            let mask = entry.get_int("mask");
            if address.is_empty() {
                None
            } else if mask > 0 {
                format!("{address}/{mask}").parse().ok()
            } else {
                address.parse().ok()
            }
        }
        _ => None,
    }
}

/// Relative duration ("1m20s" ago) or an RFC 3339 timestamp.
fn parse_handshake(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(ago) = humantime::parse_duration(value) {
        return chrono::Duration::from_std(ago).ok().map(|ago| Utc::now() - ago);
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

// ── ControllerBackend ────────────────────────────────────────────────

#[async_trait]
impl ControllerBackend for PfsenseBackend {
    fn id(&self) -> &InterfaceBackend {
        &self.cfg.id
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Pfsense
    }

    async fn get_interfaces(&self) -> Result<Vec<PhysicalInterface>, CoreError> {
        let tunnels = self
            .client
            .query(TUNNELS, &RequestOptions::new())
            .await
            .map_err(self.remote("query tunnels"))?;

        let tunnels: Vec<JsonObject> = tunnels
            .into_iter()
            .filter(|t| {
                let name = InterfaceIdentifier::new(t.get_string("name"));
                let ignored = is_ignored(&self.cfg.ignored_interfaces, &name);
                if ignored && self.cfg.debug {
                    debug!(backend = %self.cfg.id, interface = %name, "skipping ignored interface");
                }
                !ignored
            })
            .collect();

        let client = Arc::clone(&self.client);
        let backend = self.cfg.id.clone();
        fetch_bounded(tunnels, self.cfg.effective_concurrency(), move |tunnel| {
            let client = Arc::clone(&client);
            let backend = backend.clone();
            async move { load_tunnel(&client, &backend, tunnel).await }
        })
        .await
    }

    async fn get_interface(&self, id: &InterfaceIdentifier) -> Result<PhysicalInterface, CoreError> {
        let tunnel = self
            .find_tunnel(id)
            .await?
            .ok_or_else(|| CoreError::not_found("tunnel", id))?;
        load_tunnel(&self.client, &self.cfg.id, tunnel).await
    }

    async fn get_peers(&self, device: &InterfaceIdentifier) -> Result<Vec<PhysicalPeer>, CoreError> {
        let all = self
            .client
            .query(PEERS, &RequestOptions::new())
            .await
            .map_err(self.remote(format!("query peers of {device}")))?;
        let total = all.len();

        let peers: Vec<PhysicalPeer> = all
            .iter()
            .filter(|p| {
                let matches = peer_tunnel(p) == device.as_str();
                if !matches && self.cfg.debug {
                    debug!(
                        backend = %self.cfg.id,
                        interface = %device,
                        peer = %p.get_string("name"),
                        peer_tunnel = %peer_tunnel(p),
                        "skipping peer of other tunnel"
                    );
                }
                matches
            })
            .map(peer_from_json)
            .collect();

        if self.cfg.debug {
            debug!(backend = %self.cfg.id, interface = %device, total, matched = peers.len(), "filtered peers");
        }
        Ok(peers)
    }

    async fn save_interface(
        &self,
        id: &InterfaceIdentifier,
        transform: InterfaceTransform,
    ) -> Result<(), CoreError> {
        let _guard = self.locks.interface(id).await;

        let pi = self.get_or_create_interface(id).await?;
        let original = interface_extras_of(&pi);
        let mut pi = transform(pi)?;

        match &mut pi.extras {
            Some(InterfaceExtras::Pfsense(extras)) => extras.id.clone_from(&original.id),
            other => *other = Some(InterfaceExtras::Pfsense(original)),
        }
        self.update_interface(&pi).await
    }

    async fn delete_interface(&self, id: &InterfaceIdentifier) -> Result<(), CoreError> {
        let _guard = self.locks.interface(id).await;

        let Some(tunnel) = self.find_tunnel(id).await? else {
            return Ok(());
        };
        let path = format!("{TUNNEL}/{}", tunnel.get_string("id"));
        match self.client.delete(&path).await {
            Ok(()) => {
                info!(backend = %self.cfg.id, interface = %id, "deleted tunnel");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(self.remote(format!("delete tunnel {id}"))(e)),
        }
    }

    async fn save_peer(
        &self,
        device: &InterfaceIdentifier,
        id: &PeerIdentifier,
        transform: PeerTransform,
    ) -> Result<(), CoreError> {
        let _guard = self.locks.peer(device, id).await;

        let pp = self.get_or_create_peer(device, id).await?;
        let original = peer_extras_of(&pp);
        let mut pp = transform(pp)?;

        match &mut pp.extras {
            Some(PeerExtras::Pfsense(extras)) => extras.id.clone_from(&original.id),
            other => *other = Some(PeerExtras::Pfsense(original)),
        }
        self.update_peer(device, &pp).await
    }

    async fn delete_peer(
        &self,
        device: &InterfaceIdentifier,
        id: &PeerIdentifier,
    ) -> Result<(), CoreError> {
        let _guard = self.locks.peer(device, id).await;

        let Some(peer) = self.find_peer(device, id).await? else {
            return Ok(());
        };
        let path = format!("{PEER}/{}", peer.get_string("id"));
        match self.client.delete(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(self.remote(format!("delete peer {id}"))(e)),
        }
    }

    async fn execute_interface_hook(
        &self,
        id: &InterfaceIdentifier,
        _command: &str,
    ) -> Result<(), CoreError> {
        warn!(backend = %self.cfg.id, interface = %id, "interface hooks are not supported on pfSense backends");
        Ok(())
    }

    async fn set_dns(
        &self,
        id: &InterfaceIdentifier,
        _dns: &str,
        _search: &str,
    ) -> Result<(), CoreError> {
        let _guard = self.locks.core().await;
        warn!(backend = %self.cfg.id, interface = %id, "DNS is managed system-wide on pfSense, not set");
        Ok(())
    }

    async fn unset_dns(
        &self,
        id: &InterfaceIdentifier,
        _dns: &str,
        _search: &str,
    ) -> Result<(), CoreError> {
        let _guard = self.locks.core().await;
        warn!(backend = %self.cfg.id, interface = %id, "DNS is managed system-wide on pfSense, not unset");
        Ok(())
    }

    async fn set_routes(&self, info: &RoutingTableInfo) -> Result<(), CoreError> {
        warn!(backend = %self.cfg.id, interface = %info.interface, "route management is not supported on pfSense backends");
        Ok(())
    }

    async fn remove_routes(&self, info: &RoutingTableInfo) -> Result<(), CoreError> {
        warn!(backend = %self.cfg.id, interface = %info.interface, "route management is not supported on pfSense backends");
        Ok(())
    }

    async fn ping_addresses(&self, _addr: &str) -> Result<PingResult, CoreError> {
        Err(CoreError::Unimplemented {
            backend: self.cfg.id.to_string(),
            operation: "ping",
        })
    }

    // ── Extras boundary ──────────────────────────────────────────────

    fn interface_extras(&self, cfg: &InterfaceConfig) -> Option<InterfaceExtras> {
        Some(InterfaceExtras::Pfsense(PfsenseInterfaceExtras {
            id: String::new(),
            comment: cfg.display_name.clone(),
            disabled: !cfg.enabled,
        }))
    }

    fn peer_extras(&self, peer: &PeerConfig) -> Option<PeerExtras> {
        Some(PeerExtras::Pfsense(PfsensePeerExtras {
            id: String::new(),
            name: peer.display_name.clone(),
            comment: peer.notes.clone(),
            disabled: peer.is_disabled(),
        }))
    }

    fn import_interface(&self, pi: &PhysicalInterface) -> InterfaceConfig {
        let mut cfg = InterfaceConfig::from_physical(pi, self.cfg.id.clone());
        if let Some(InterfaceExtras::Pfsense(extras)) = &pi.extras {
            if !extras.comment.is_empty() {
                cfg.display_name.clone_from(&extras.comment);
            }
            cfg.enabled = !extras.disabled;
        }
        cfg
    }

    fn import_peer(&self, pp: &PhysicalPeer, iface: &InterfaceConfig) -> PeerConfig {
        let mut peer = PeerConfig::from_physical(pp, iface);
        if let Some(PeerExtras::Pfsense(extras)) = &pp.extras {
            if !extras.name.is_empty() {
                peer.display_name.clone_from(&extras.name);
            }
            peer.notes.clone_from(&extras.comment);
            if extras.disabled {
                peer.disable("disabled on appliance");
            }
        }
        peer
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeSet;

    const KEY: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";

    fn object(value: Value) -> JsonObject {
        match value {
            Value::Object(map) => JsonObject::from(map),
            _ => unreachable!("test fixtures are objects"),
        }
    }

    #[test]
    fn peer_survives_payload_round_trip() {
        let pp = PhysicalPeer {
            allowed_ips: Cidr::parse_list("10.0.0.2/32,fd00::2/128,192.168.0.0/24").unwrap(),
            preshared_key: Some(PresharedKey::new("c2VjcmV0")),
            persistent_keepalive: 25,
            endpoint: "vpn.example.com:51820".into(),
            ..PhysicalPeer::new(KEY.into())
        };

        let back = peer_from_json(&peer_payload(&pp));

        assert_eq!(back.identifier, pp.identifier);
        assert_eq!(
            back.allowed_ips.iter().collect::<BTreeSet<_>>(),
            pp.allowed_ips.iter().collect::<BTreeSet<_>>()
        );
        assert_eq!(back.preshared_key, pp.preshared_key);
        assert_eq!(back.persistent_keepalive, 25);
        assert_eq!(back.endpoint, pp.endpoint);
    }

    #[test]
    fn peer_json_accepts_address_objects_and_aliases() {
        let peer = object(json!({
            "id": 3,
            "tun": "tun_wg0",
            "public-key": KEY,
            "allowedips": [
                {"address": "10.0.0.2", "mask": 32},
                {"address": "10.9.0.0", "mask": "16"},
                {"address": "", "mask": 24}
            ],
            "endpoint": "198.51.100.7",
            "port": "51821",
            "persistentkeepalive": "1m",
            "descr": "laptop",
            "disabled": "yes"
        }));

        let pp = peer_from_json(&peer);
        assert_eq!(pp.identifier.as_str(), KEY);
        assert_eq!(pp.allowed_ips, Cidr::parse_list("10.0.0.2/32,10.9.0.0/16").unwrap());
        assert_eq!(pp.endpoint, "198.51.100.7:51821");
        assert_eq!(pp.persistent_keepalive, 60);
        assert_eq!(
            pp.extras,
            Some(PeerExtras::Pfsense(PfsensePeerExtras {
                id: "3".into(),
                name: "laptop".into(),
                comment: "laptop".into(),
                disabled: true,
            }))
        );
    }

    #[test]
    fn tunnel_json_maps_running_and_disabled() {
        let tunnel = object(json!({
            "id": "0",
            "name": "tun_wg0",
            "privatekey": "priv",
            "publickey": KEY,
            "listenport": "51820",
            "mtu": 1420,
            "running": true,
            "disabled": false,
            "addresses": "10.8.0.1/24, fd00::1/64",
            "descr": "office"
        }));
        let pi = interface_from_json(&tunnel);
        assert!(pi.device_up);
        assert_eq!(pi.listen_port, 51820);
        assert_eq!(pi.addresses.len(), 2);

        let payload = interface_payload(&pi);
        assert_eq!(payload.get_string("disabled"), "false");
        assert_eq!(payload.get_string("description"), "office");
        assert_eq!(payload.get_string("addresses"), "10.8.0.1/24,fd00::1/64");

        let stopped = object(json!({"name": "tun_wg1", "running": true, "disabled": "true"}));
        assert!(!interface_from_json(&stopped).device_up);
    }

    #[test]
    fn empty_address_list_is_left_out_of_payload() {
        let pi = PhysicalInterface::new("tun_wg2".into());
        assert!(!interface_payload(&pi).contains_key("addresses"));
    }
}
