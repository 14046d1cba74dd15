// ── RouterOS-style REST backend ──
//
// WireGuard interfaces, peers, addresses, routes and DNS on a RouterOS v7
// device. Objects are addressed by their `.id`; the interface `.id` and
// peer `.id` ride along in the backend extras.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use wgctl_api::{JsonObject, MikrotikClient, RequestOptions};

use super::bulk::fetch_bounded;
use super::locks::BackendLocks;
use super::{
    ControllerBackend, InterfaceTransform, PeerTransform, format_keepalive, is_ignored,
    lenient_cidrs, parse_keepalive,
};
use crate::config::{RestBackendConfig, RestCredentials};
use crate::error::CoreError;
use crate::model::{
    BackendKind, Cidr, ConfigOption, InterfaceBackend, InterfaceConfig, InterfaceExtras,
    InterfaceIdentifier, InterfaceType, KeyPair, MikrotikInterfaceExtras, MikrotikPeerExtras,
    PeerConfig, PeerExtras, PeerIdentifier, PhysicalInterface, PhysicalPeer, PingResult,
    PresharedKey, RoutingTableInfo,
};

const WIREGUARD: &str = "/interface/wireguard";
const PEERS: &str = "/interface/wireguard/peers";
const INTERFACE: &str = "/interface";
const ADDRESS_V4: &str = "/ip/address";
const ADDRESS_V6: &str = "/ipv6/address";
const DNS: &str = "/ip/dns";
const DNS_SET: &str = "/ip/dns/set";
const ROUTING_TABLE: &str = "/routing/table";
const ROUTE_V4: &str = "/ip/route";
const ROUTE_V6: &str = "/ipv6/route";
const PING: &str = "/tool/ping";

const IMPORT_SOURCE: &str = "mikrotik";
const MAIN_TABLE: &str = "main";
const ROUTE_DISTANCE: &str = "5";
const DEFAULT_ENDPOINT_PORT: &str = "51820";
/// Stand-in RTT for ping replies whose `avg-rtt` cannot be read.
const FAILED_RTT: Duration = Duration::from_millis(999_999);

const INTERFACE_PROPS: [&str; 9] = [
    ".id",
    "name",
    "public-key",
    "private-key",
    "listen-port",
    "mtu",
    "disabled",
    "running",
    "comment",
];

const PEER_PROPS: [&str; 20] = [
    ".id",
    "name",
    "allowed-address",
    "client-address",
    "client-endpoint",
    "client-keepalive",
    "comment",
    "current-endpoint-address",
    "current-endpoint-port",
    "last-handshake",
    "persistent-keepalive",
    "public-key",
    "private-key",
    "preshared-key",
    "mtu",
    "disabled",
    "rx",
    "tx",
    "responder",
    "client-dns",
];

const ROUTE_PROPS: [&str; 6] = [".id", "dst-address", "dynamic", "gateway", "routing-table", "disabled"];

pub struct MikrotikBackend {
    cfg: RestBackendConfig,
    client: Arc<MikrotikClient>,
    locks: BackendLocks,
}

impl MikrotikBackend {
    /// Build a backend with its own HTTP client. Requires basic-auth credentials.
    pub fn new(cfg: RestBackendConfig) -> Result<Self, CoreError> {
        let RestCredentials::Basic { username, password } = &cfg.credentials else {
            return Err(CoreError::Config {
                message: format!("Mikrotik backend '{}' needs a username and password", cfg.id),
            });
        };
        let client = MikrotikClient::new(
            cfg.api_url.clone(),
            username.clone(),
            password.clone(),
            &cfg.transport(),
        )
        .map_err(CoreError::remote(&cfg.id, "build client"))?;
        Ok(Self::with_client(cfg, client))
    }

    pub fn with_client(cfg: RestBackendConfig, client: MikrotikClient) -> Self {
        Self {
            cfg,
            client: Arc::new(client),
            locks: BackendLocks::new(),
        }
    }

    fn remote(&self, operation: impl Into<String>) -> impl FnOnce(wgctl_api::Error) -> CoreError {
        CoreError::remote(&self.cfg.id, operation)
    }

    // ── Interfaces ───────────────────────────────────────────────────

    async fn find_interface(&self, id: &InterfaceIdentifier) -> Result<Option<JsonObject>, CoreError> {
        let opts = RequestOptions::new()
            .filter("name", id.as_str())
            .proplist(INTERFACE_PROPS);
        let found = self
            .client
            .query(WIREGUARD, &opts)
            .await
            .map_err(self.remote(format!("query interface {id}")))?;
        Ok(found.into_iter().find(|i| i.get_string("name") == id.as_str()))
    }

    async fn get_or_create_interface(
        &self,
        id: &InterfaceIdentifier,
    ) -> Result<PhysicalInterface, CoreError> {
        if let Some(existing) = self.find_interface(id).await? {
            return load_interface(&self.client, &self.cfg.id, existing).await;
        }

        let payload = JsonObject::new().with("name", id.as_str());
        let created = self
            .client
            .create(WIREGUARD, &payload)
            .await
            .map_err(self.remote(format!("create interface {id}")))?;
        info!(backend = %self.cfg.id, interface = %id, remote_id = %created.get_string(".id"), "created interface");

        match self.find_interface(id).await? {
            Some(found) => load_interface(&self.client, &self.cfg.id, found).await,
            None if !created.is_empty() => load_interface(&self.client, &self.cfg.id, created).await,
            None => Err(CoreError::not_found("interface", id)),
        }
    }

    async fn update_interface(&self, pi: &PhysicalInterface) -> Result<(), CoreError> {
        let extras = interface_extras_of(pi);
        let path = format!("{WIREGUARD}/{}", extras.id);
        self.client
            .update(&path, &interface_payload(pi))
            .await
            .map_err(self.remote(format!("update interface {}", pi.identifier)))?;

        let current = load_addresses(&self.client, &self.cfg.id, pi.identifier.as_str()).await?;
        let (obsolete, new) = diff_addresses(&current, &pi.addresses);

        for entry in obsolete {
            let path = format!("{}/{}", address_path(&entry.cidr), entry.id);
            self.client
                .delete(&path)
                .await
                .map_err(self.remote(format!("delete address {}", entry.cidr)))?;
            debug!(backend = %self.cfg.id, interface = %pi.identifier, address = %entry.cidr, "removed address");
        }
        for cidr in new {
            let payload = JsonObject::new()
                .with("address", cidr.to_string())
                .with("interface", pi.identifier.as_str());
            self.client
                .create(address_path(&cidr), &payload)
                .await
                .map_err(self.remote(format!("create address {cidr}")))?;
            debug!(backend = %self.cfg.id, interface = %pi.identifier, address = %cidr, "added address");
        }
        Ok(())
    }

    // ── Peers ────────────────────────────────────────────────────────

    async fn find_peer(
        &self,
        device: &InterfaceIdentifier,
        id: &PeerIdentifier,
    ) -> Result<Option<JsonObject>, CoreError> {
        let opts = RequestOptions::new()
            .filter("public-key", id.as_str())
            .filter("interface", device.as_str())
            .proplist(PEER_PROPS);
        let found = self
            .client
            .query(PEERS, &opts)
            .await
            .map_err(self.remote(format!("query peer {id}")))?;
        Ok(found
            .into_iter()
            .find(|p| p.get_string("public-key") == id.as_str()))
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
            .with("name", format!("tmp-wg-{}", id.short()))
            .with("interface", device.as_str())
            .with("public-key", id.as_str())
            .with("allowed-address", "0.0.0.0/0");
        let created = self
            .client
            .create(PEERS, &payload)
            .await
            .map_err(self.remote(format!("create peer {id}")))?;
        debug!(backend = %self.cfg.id, interface = %device, peer = %id, "created peer");

        match self.find_peer(device, id).await? {
            Some(found) => Ok(peer_from_json(&found)),
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
        let path = format!("{PEERS}/{}", extras.id);
        self.client
            .update(&path, &peer_payload(pp))
            .await
            .map_err(self.remote(format!("update peer {}", pp.identifier)))?;
        Ok(())
    }

    // ── DNS ──────────────────────────────────────────────────────────

    async fn dns_servers(&self) -> Result<Vec<String>, CoreError> {
        let opts = RequestOptions::new().proplist(["servers"]);
        let dns = self
            .client
            .get(DNS, &opts)
            .await
            .map_err(self.remote("read DNS settings"))?;
        Ok(split_servers(&dns.get_string("servers")))
    }

    async fn write_dns_servers(&self, servers: &[String]) -> Result<(), CoreError> {
        let joined = servers.join(",");
        let payload = JsonObject::new().with("servers", joined.as_str());
        self.client
            .exec(DNS_SET, &payload)
            .await
            .map_err(self.remote(format!("set DNS servers {joined}")))
    }

    // ── Routing ──────────────────────────────────────────────────────

    async fn get_or_create_table(
        &self,
        interface: &InterfaceIdentifier,
        table: &str,
    ) -> Result<String, CoreError> {
        let wanted = resolve_table_name(table);
        let opts = RequestOptions::new().proplist([".id", "dynamic", "fib", "name"]);
        let tables = self
            .client
            .query(ROUTING_TABLE, &opts)
            .await
            .map_err(self.remote("query routing tables"))?;
        if tables.iter().any(|t| t.get_string("name") == wanted) {
            return Ok(wanted);
        }

        let payload = JsonObject::new()
            .with("name", wanted.as_str())
            .with("comment", format!("Routing Table for {interface}"))
            .with("fib", "true");
        self.client
            .create(ROUTING_TABLE, &payload)
            .await
            .map_err(self.remote(format!("create routing table {wanted}")))?;
        info!(backend = %self.cfg.id, interface = %interface, table = %wanted, "created routing table");
        Ok(wanted)
    }

    async fn routes_via(&self, path: &str, interface: &InterfaceIdentifier) -> Result<Vec<JsonObject>, CoreError> {
        let opts = RequestOptions::new()
            .filter("gateway", interface.as_str())
            .proplist(ROUTE_PROPS);
        self.client
            .query(path, &opts)
            .await
            .map_err(self.remote(format!("query routes via {interface}")))
    }

    async fn set_family_routes(
        &self,
        interface: &InterfaceIdentifier,
        path: &str,
        table: &str,
        cidrs: &[Cidr],
    ) -> Result<(), CoreError> {
        let existing = self.routes_via(path, interface).await?;
        let existing: Vec<(JsonObject, Cidr)> = existing
            .into_iter()
            .filter_map(|route| {
                let dst = route.get_string("dst-address");
                match dst.parse::<Cidr>() {
                    Ok(cidr) => Some((route, cidr)),
                    Err(e) => {
                        warn!(backend = %self.cfg.id, route = %dst, error = %e, "unparseable route destination");
                        None
                    }
                }
            })
            .collect();

        for cidr in cidrs {
            let present = existing.iter().any(|(route, dst)| {
                dst.same_prefix(cidr) && route.get_string("routing-table") == table
            });
            if present {
                continue;
            }
            let payload = JsonObject::new()
                .with("gateway", interface.as_str())
                .with("dst-address", cidr.to_string())
                .with("distance", ROUTE_DISTANCE)
                .with("disabled", "false")
                .with("routing-table", table);
            self.client
                .create(path, &payload)
                .await
                .map_err(self.remote(format!("create route {cidr} via {interface}")))?;
        }

        for (route, dst) in &existing {
            if route.get_bool("dynamic") || cidrs.iter().any(|c| c.same_prefix(dst)) {
                continue;
            }
            let route_path = format!("{path}/{}", route.get_string(".id"));
            self.client
                .delete(&route_path)
                .await
                .map_err(self.remote(format!("remove route {dst}")))?;
            debug!(backend = %self.cfg.id, interface = %interface, route = %dst, "removed outdated route");
        }
        Ok(())
    }

    async fn remove_family_routes(
        &self,
        interface: &InterfaceIdentifier,
        path: &str,
        table: &str,
        cidrs: &[Cidr],
    ) -> Result<(), CoreError> {
        for route in self.routes_via(path, interface).await? {
            if route.get_bool("dynamic") || route.get_string("routing-table") != table {
                continue;
            }
            let Ok(dst) = route.get_string("dst-address").parse::<Cidr>() else {
                continue;
            };
            if !cidrs.iter().any(|c| c.same_prefix(&dst)) {
                continue;
            }
            let route_path = format!("{path}/{}", route.get_string(".id"));
            self.client
                .delete(&route_path)
                .await
                .map_err(self.remote(format!("remove route {dst}")))?;
        }
        Ok(())
    }

    async fn remove_table(&self, table: &str) -> Result<(), CoreError> {
        if table == MAIN_TABLE {
            return Ok(());
        }
        let opts = RequestOptions::new().proplist([".id", "dynamic", "fib", "name"]);
        let tables = self
            .client
            .query(ROUTING_TABLE, &opts)
            .await
            .map_err(self.remote("query routing tables"))?;
        let Some(found) = tables
            .iter()
            .find(|t| !t.get_bool("dynamic") && t.get_string("name") == table)
        else {
            return Ok(());
        };
        let path = format!("{ROUTING_TABLE}/{}", found.get_string(".id"));
        self.client
            .delete(&path)
            .await
            .map_err(self.remote(format!("remove routing table {table}")))
    }
}

// ── Conversion ───────────────────────────────────────────────────────

/// A static address and the `.id` needed to delete it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AddressEntry {
    id: String,
    cidr: Cidr,
}

fn address_path(cidr: &Cidr) -> &'static str {
    if cidr.is_v4() { ADDRESS_V4 } else { ADDRESS_V6 }
}

async fn load_addresses(
    client: &MikrotikClient,
    backend: &InterfaceBackend,
    device: &str,
) -> Result<Vec<AddressEntry>, CoreError> {
    let opts = RequestOptions::new()
        .filter("interface", device)
        .filter("dynamic", "false")
        .filter("disabled", "false")
        .proplist([".id", "address", "network"]);
    let (v4, v6) = tokio::try_join!(client.query(ADDRESS_V4, &opts), client.query(ADDRESS_V6, &opts))
        .map_err(CoreError::remote(backend, format!("query addresses of {device}")))?;

    Ok(v4
        .iter()
        .chain(v6.iter())
        .filter_map(|a| {
            let cidr = a.get_string("address").parse().ok()?;
            Some(AddressEntry {
                id: a.get_string(".id"),
                cidr,
            })
        })
        .collect())
}

/// (obsolete entries to delete, new addresses to create).
fn diff_addresses(current: &[AddressEntry], desired: &[Cidr]) -> (Vec<AddressEntry>, Vec<Cidr>) {
    let obsolete = current
        .iter()
        .filter(|entry| !desired.contains(&entry.cidr))
        .cloned()
        .collect();
    let new = desired
        .iter()
        .filter(|cidr| !current.iter().any(|entry| entry.cidr == **cidr))
        .copied()
        .collect();
    (obsolete, new)
}

async fn load_interface(
    client: &MikrotikClient,
    backend: &InterfaceBackend,
    wg: JsonObject,
) -> Result<PhysicalInterface, CoreError> {
    let remote_id = wg.get_string(".id");
    let name = wg.get_string("name");
    let opts = RequestOptions::new().proplist(["name", "rx-byte", "tx-byte"]);
    let detail = client
        .get(&format!("{INTERFACE}/{remote_id}"), &opts)
        .await
        .map_err(CoreError::remote(backend, format!("load interface {name}")))?;
    let addresses = load_addresses(client, backend, &name).await?;
    let addresses: Vec<Cidr> = addresses.into_iter().map(|a| a.cidr).collect();
    Ok(interface_from_json(&wg, &detail, addresses))
}

pub(crate) fn interface_from_json(
    wg: &JsonObject,
    detail: &JsonObject,
    addresses: Vec<Cidr>,
) -> PhysicalInterface {
    PhysicalInterface {
        identifier: InterfaceIdentifier::new(wg.get_string("name")),
        key_pair: KeyPair {
            private_key: wg.get_string("private-key"),
            public_key: wg.get_string("public-key"),
        },
        listen_port: u16::try_from(wg.get_int("listen-port")).unwrap_or_default(),
        addresses,
        mtu: u32::try_from(wg.get_int("mtu")).unwrap_or_default(),
        firewall_mark: 0,
        device_up: wg.get_bool("running"),
        import_source: IMPORT_SOURCE.into(),
        device_type: IMPORT_SOURCE.into(),
        bytes_upload: u64::try_from(detail.get_int("tx-byte")).unwrap_or_default(),
        bytes_download: u64::try_from(detail.get_int("rx-byte")).unwrap_or_default(),
        extras: Some(InterfaceExtras::Mikrotik(MikrotikInterfaceExtras {
            id: wg.get_string(".id"),
            comment: wg.get_string("comment"),
            disabled: wg.get_bool("disabled"),
        })),
    }
}

pub(crate) fn interface_payload(pi: &PhysicalInterface) -> JsonObject {
    let extras = interface_extras_of(pi);
    JsonObject::new()
        .with("name", pi.identifier.as_str())
        .with("comment", extras.comment)
        .with("mtu", pi.mtu.to_string())
        .with("listen-port", pi.listen_port.to_string())
        .with("private-key", pi.key_pair.private_key.as_str())
        .with("disabled", (!pi.device_up).to_string())
}

pub(crate) fn peer_from_json(peer: &JsonObject) -> PhysicalPeer {
    let public_key = peer.get_string("public-key");

    let address = peer.get_string("current-endpoint-address");
    let port = peer.get_string("current-endpoint-port");
    let endpoint = if address.is_empty() || port.is_empty() {
        String::new()
    } else {
        format!("{address}:{port}")
    };

    let last_handshake = humantime::parse_duration(peer.get_string("last-handshake").trim())
        .ok()
        .and_then(|ago| chrono::Duration::from_std(ago).ok())
        .map(|ago| Utc::now() - ago);

    PhysicalPeer {
        identifier: PeerIdentifier::new(public_key.clone()),
        endpoint,
        allowed_ips: lenient_cidrs(&peer.get_string("allowed-address")),
        key_pair: KeyPair {
            private_key: peer.get_string("private-key"),
            public_key,
        },
        preshared_key: PresharedKey::non_empty(peer.get_string("preshared-key")),
        persistent_keepalive: parse_keepalive(&peer.get_string("persistent-keepalive")),
        last_handshake,
        protocol_version: 0,
        bytes_upload: u64::try_from(peer.get_int("rx")).unwrap_or_default(),
        bytes_download: u64::try_from(peer.get_int("tx")).unwrap_or_default(),
        import_source: IMPORT_SOURCE.into(),
        extras: Some(PeerExtras::Mikrotik(MikrotikPeerExtras {
            id: peer.get_string(".id"),
            name: peer.get_string("name"),
            comment: peer.get_string("comment"),
            is_responder: peer.get_bool("responder"),
            disabled: peer.get_bool("disabled"),
            client_endpoint: peer.get_string("client-endpoint"),
            client_address: peer.get_string("client-address"),
            client_dns: peer.get_string("client-dns"),
            client_keepalive: parse_keepalive(&peer.get_string("client-keepalive")),
        })),
    }
}

pub(crate) fn peer_payload(pp: &PhysicalPeer) -> JsonObject {
    let extras = peer_extras_of(pp);

    // Responders never initiate, so they get no endpoint.
    let (endpoint, endpoint_port) = if extras.is_responder {
        (String::new(), "0".to_owned())
    } else {
        match pp.endpoint.split(':').collect::<Vec<_>>().as_slice() {
            [host, port] => ((*host).to_owned(), (*port).to_owned()),
            _ => (pp.endpoint.clone(), DEFAULT_ENDPOINT_PORT.to_owned()),
        }
    };

    JsonObject::new()
        .with("name", extras.name)
        .with("comment", extras.comment)
        .with(
            "preshared-key",
            pp.preshared_key.as_ref().map(PresharedKey::as_str).unwrap_or_default(),
        )
        .with("public-key", pp.key_pair.public_key.as_str())
        .with("private-key", pp.key_pair.private_key.as_str())
        .with("persistent-keepalive", format_keepalive(pp.persistent_keepalive))
        .with("disabled", extras.disabled.to_string())
        .with("responder", extras.is_responder.to_string())
        .with("client-endpoint", extras.client_endpoint)
        .with("client-address", extras.client_address)
        .with("client-keepalive", format_keepalive(extras.client_keepalive))
        .with("client-dns", extras.client_dns)
        .with("endpoint-address", endpoint)
        .with("endpoint-port", endpoint_port)
        .with("allowed-address", Cidr::list_to_string(&pp.allowed_ips))
}

fn interface_extras_of(pi: &PhysicalInterface) -> MikrotikInterfaceExtras {
    match &pi.extras {
        Some(InterfaceExtras::Mikrotik(extras)) => extras.clone(),
        _ => MikrotikInterfaceExtras::default(),
    }
}

fn peer_extras_of(pp: &PhysicalPeer) -> MikrotikPeerExtras {
    match &pp.extras {
        Some(PeerExtras::Mikrotik(extras)) => extras.clone(),
        _ => MikrotikPeerExtras::default(),
    }
}

/// Empty or `0` selects the main table; a literal `main` gets its own
/// managed table so the device's main table is never touched.
fn resolve_table_name(name: &str) -> String {
    let name = name.trim();
    match name.to_ascii_lowercase().as_str() {
        "" | "0" => MAIN_TABLE.to_owned(),
        MAIN_TABLE => format!("wgportal-{MAIN_TABLE}"),
        _ => name.to_owned(),
    }
}

fn split_servers(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn merge_servers(existing: &[String], added: &str) -> Vec<String> {
    let mut merged = existing.to_vec();
    for server in split_servers(added) {
        if !merged.contains(&server) {
            merged.push(server);
        }
    }
    merged
}

fn remove_servers(existing: &[String], removed: &str) -> Vec<String> {
    let removed = split_servers(removed);
    existing
        .iter()
        .filter(|s| !removed.contains(s))
        .cloned()
        .collect()
}

fn ping_result(replies: &[JsonObject]) -> PingResult {
    let mut result = PingResult::default();
    for reply in replies {
        result.packets_recv += u32::try_from(reply.get_int("received")).unwrap_or_default();
        result.packets_sent += u32::try_from(reply.get_int("sent")).unwrap_or_default();
        let rtt = reply.get_string("avg-rtt");
        if !rtt.is_empty() {
            result
                .rtts
                .push(humantime::parse_duration(&rtt).unwrap_or(FAILED_RTT));
        }
    }
    result
}

// ── ControllerBackend ────────────────────────────────────────────────

#[async_trait]
impl ControllerBackend for MikrotikBackend {
    fn id(&self) -> &InterfaceBackend {
        &self.cfg.id
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Mikrotik
    }

    async fn get_interfaces(&self) -> Result<Vec<PhysicalInterface>, CoreError> {
        let opts = RequestOptions::new().proplist(INTERFACE_PROPS);
        let interfaces = self
            .client
            .query(WIREGUARD, &opts)
            .await
            .map_err(self.remote("query interfaces"))?;

        let interfaces: Vec<JsonObject> = interfaces
            .into_iter()
            .filter(|i| {
                let name = InterfaceIdentifier::new(i.get_string("name"));
                let ignored = is_ignored(&self.cfg.ignored_interfaces, &name);
                if ignored && self.cfg.debug {
                    debug!(backend = %self.cfg.id, interface = %name, "skipping ignored interface");
                }
                !ignored
            })
            .collect();

        let client = Arc::clone(&self.client);
        let backend = self.cfg.id.clone();
        fetch_bounded(interfaces, self.cfg.effective_concurrency(), move |wg| {
            let client = Arc::clone(&client);
            let backend = backend.clone();
            async move { load_interface(&client, &backend, wg).await }
        })
        .await
    }

    async fn get_interface(&self, id: &InterfaceIdentifier) -> Result<PhysicalInterface, CoreError> {
        let wg = self
            .find_interface(id)
            .await?
            .ok_or_else(|| CoreError::not_found("interface", id))?;
        load_interface(&self.client, &self.cfg.id, wg).await
    }

    async fn get_peers(&self, device: &InterfaceIdentifier) -> Result<Vec<PhysicalPeer>, CoreError> {
        let opts = RequestOptions::new()
            .filter("interface", device.as_str())
            .proplist(PEER_PROPS);
        let peers = self
            .client
            .query(PEERS, &opts)
            .await
            .map_err(self.remote(format!("query peers of {device}")))?;
        Ok(peers.iter().map(peer_from_json).collect())
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
            Some(InterfaceExtras::Mikrotik(extras)) => extras.id.clone_from(&original.id),
            other => *other = Some(InterfaceExtras::Mikrotik(original)),
        }
        self.update_interface(&pi).await
    }

    async fn delete_interface(&self, id: &InterfaceIdentifier) -> Result<(), CoreError> {
        let _guard = self.locks.interface(id).await;

        for entry in load_addresses(&self.client, &self.cfg.id, id.as_str()).await? {
            let path = format!("{}/{}", address_path(&entry.cidr), entry.id);
            self.client
                .delete(&path)
                .await
                .map_err(self.remote(format!("delete address {}", entry.cidr)))?;
        }

        let Some(wg) = self.find_interface(id).await? else {
            return Ok(());
        };
        let path = format!("{WIREGUARD}/{}", wg.get_string(".id"));
        match self.client.delete(&path).await {
            Ok(()) => {
                info!(backend = %self.cfg.id, interface = %id, "deleted interface");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(self.remote(format!("delete interface {id}"))(e)),
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
            Some(PeerExtras::Mikrotik(extras)) => extras.id.clone_from(&original.id),
            other => *other = Some(PeerExtras::Mikrotik(original)),
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
        let path = format!("{PEERS}/{}", peer.get_string(".id"));
        match self.client.delete(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(self.remote(format!("delete peer {id}"))(e)),
        }
    }

    async fn execute_interface_hook(
        &self,
        _id: &InterfaceIdentifier,
        _command: &str,
    ) -> Result<(), CoreError> {
        Err(CoreError::Unimplemented {
            backend: self.cfg.id.to_string(),
            operation: "interface hooks",
        })
    }

    async fn set_dns(
        &self,
        id: &InterfaceIdentifier,
        dns: &str,
        _search: &str,
    ) -> Result<(), CoreError> {
        let _guard = self.locks.core().await;
        let existing = self.dns_servers().await?;
        let merged = merge_servers(&existing, dns);
        if merged == existing {
            return Ok(());
        }
        self.write_dns_servers(&merged).await?;
        info!(backend = %self.cfg.id, interface = %id, servers = %merged.join(","), "DNS servers set");
        Ok(())
    }

    async fn unset_dns(
        &self,
        id: &InterfaceIdentifier,
        dns: &str,
        _search: &str,
    ) -> Result<(), CoreError> {
        let _guard = self.locks.core().await;
        let existing = self.dns_servers().await?;
        let remaining = remove_servers(&existing, dns);
        if remaining == existing {
            return Ok(());
        }
        self.write_dns_servers(&remaining).await?;
        info!(backend = %self.cfg.id, interface = %id, servers = %remaining.join(","), "DNS servers unset");
        Ok(())
    }

    async fn set_routes(&self, info: &RoutingTableInfo) -> Result<(), CoreError> {
        if info.is_disabled() {
            return Ok(());
        }
        let _guard = self.locks.core().await;
        debug!(backend = %self.cfg.id, interface = %info.interface, table = %info.table_str, "setting routes");

        let table = self.get_or_create_table(&info.interface, &info.table_str).await?;
        let (v4, v6) = Cidr::per_family(&info.allowed_ips);
        self.set_family_routes(&info.interface, ROUTE_V4, &table, &v4)
            .await?;
        self.set_family_routes(&info.interface, ROUTE_V6, &table, &v6)
            .await
    }

    async fn remove_routes(&self, info: &RoutingTableInfo) -> Result<(), CoreError> {
        let _guard = self.locks.core().await;
        debug!(backend = %self.cfg.id, interface = %info.interface, table = %info.table_str, "removing routes");

        let table = resolve_table_name(&info.table_str);
        let (v4, v6) = Cidr::per_family(&info.allowed_ips);
        self.remove_family_routes(&info.interface, ROUTE_V4, &table, &v4)
            .await?;
        self.remove_family_routes(&info.interface, ROUTE_V6, &table, &v6)
            .await?;
        self.remove_table(&table).await
    }

    async fn ping_addresses(&self, addr: &str) -> Result<PingResult, CoreError> {
        let payload = JsonObject::new()
            .with("address", addr)
            .with("count", 1)
            .with("interval", "00:00:02");
        let replies = self
            .client
            .exec_list(PING, &payload)
            .await
            .map_err(self.remote(format!("ping {addr}")))?;
        Ok(ping_result(&replies))
    }

    // ── Extras boundary ──────────────────────────────────────────────

    fn interface_extras(&self, cfg: &InterfaceConfig) -> Option<InterfaceExtras> {
        Some(InterfaceExtras::Mikrotik(MikrotikInterfaceExtras {
            id: String::new(),
            comment: cfg.display_name.clone(),
            disabled: !cfg.enabled,
        }))
    }

    fn peer_extras(&self, peer: &PeerConfig) -> Option<PeerExtras> {
        let pi = &peer.peer_interface;
        Some(PeerExtras::Mikrotik(MikrotikPeerExtras {
            id: String::new(),
            name: peer.display_name.clone(),
            comment: peer.notes.clone(),
            is_responder: pi.interface_type == InterfaceType::Client,
            disabled: peer.is_disabled(),
            client_endpoint: peer.endpoint.get().clone(),
            client_address: pi.address_str.clone(),
            client_dns: pi.dns_str.get().clone(),
            client_keepalive: *peer.persistent_keepalive.get(),
        }))
    }

    fn import_interface(&self, pi: &PhysicalInterface) -> InterfaceConfig {
        let mut cfg = InterfaceConfig::from_physical(pi, self.cfg.id.clone());
        if let Some(InterfaceExtras::Mikrotik(extras)) = &pi.extras {
            if !extras.comment.is_empty() {
                cfg.display_name.clone_from(&extras.comment);
            }
            cfg.enabled = !extras.disabled;
        }
        cfg
    }

    fn import_peer(&self, pp: &PhysicalPeer, iface: &InterfaceConfig) -> PeerConfig {
        let mut peer = PeerConfig::from_physical(pp, iface);
        let Some(PeerExtras::Mikrotik(extras)) = &pp.extras else {
            return peer;
        };
        if !extras.name.is_empty() {
            peer.display_name.clone_from(&extras.name);
        }
        peer.notes.clone_from(&extras.comment);
        if extras.disabled {
            peer.disable("disabled on device");
        }
        if !extras.client_endpoint.is_empty() {
            let pi = &mut peer.peer_interface;
            pi.interface_type = InterfaceType::Client;
            if !extras.client_address.is_empty() {
                pi.address_str.clone_from(&extras.client_address);
            }
            pi.dns_str = ConfigOption::new(extras.client_dns.clone(), true);
            peer.endpoint = ConfigOption::new(extras.client_endpoint.clone(), true);
            peer.persistent_keepalive = ConfigOption::new(extras.client_keepalive, true);
        }
        peer
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    const KEY: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";

    fn entry(id: &str, cidr: &str) -> AddressEntry {
        AddressEntry {
            id: id.into(),
            cidr: cidr.parse().unwrap(),
        }
    }

    #[test]
    fn peer_survives_payload_round_trip() {
        let pp = PhysicalPeer {
            allowed_ips: Cidr::parse_list("10.0.0.2/32,fd00::2/128").unwrap(),
            preshared_key: Some(PresharedKey::new("c2VjcmV0")),
            persistent_keepalive: 25,
            ..PhysicalPeer::new(KEY.into())
        };

        let payload = peer_payload(&pp);
        assert_eq!(payload.get_string("persistent-keepalive"), "25s");

        let back = peer_from_json(&payload);
        assert_eq!(back.identifier, pp.identifier);
        assert_eq!(
            back.allowed_ips.iter().collect::<BTreeSet<_>>(),
            pp.allowed_ips.iter().collect::<BTreeSet<_>>()
        );
        assert_eq!(back.preshared_key, pp.preshared_key);
        assert_eq!(back.persistent_keepalive, 25);
    }

    #[test]
    fn endpoint_split_depends_on_responder_flag() {
        let mut pp = PhysicalPeer {
            endpoint: "198.51.100.3:51999".into(),
            ..PhysicalPeer::new(KEY.into())
        };
        let payload = peer_payload(&pp);
        assert_eq!(payload.get_string("endpoint-address"), "198.51.100.3");
        assert_eq!(payload.get_string("endpoint-port"), "51999");

        pp.endpoint = "vpn.example.com".into();
        assert_eq!(peer_payload(&pp).get_string("endpoint-port"), DEFAULT_ENDPOINT_PORT);

        pp.extras = Some(PeerExtras::Mikrotik(MikrotikPeerExtras {
            is_responder: true,
            ..MikrotikPeerExtras::default()
        }));
        let payload = peer_payload(&pp);
        assert_eq!(payload.get_string("endpoint-address"), "");
        assert_eq!(payload.get_string("endpoint-port"), "0");
        assert_eq!(payload.get_string("responder"), "true");
    }

    #[test]
    fn address_diff() {
        let current = [entry("*1", "10.0.0.1/24"), entry("*2", "fd00::1/64")];
        let desired = Cidr::parse_list("10.0.0.1/24,10.1.0.1/24").unwrap();
        let (obsolete, new) = diff_addresses(&current, &desired);
        assert_eq!(obsolete, vec![entry("*2", "fd00::1/64")]);
        assert_eq!(new, Cidr::parse_list("10.1.0.1/24").unwrap());
    }

    #[test]
    fn table_names() {
        assert_eq!(resolve_table_name(""), "main");
        assert_eq!(resolve_table_name(" 0 "), "main");
        assert_eq!(resolve_table_name("main"), "wgportal-main");
        assert_eq!(resolve_table_name("vpn"), "vpn");
    }

    #[test]
    fn dns_merge_and_removal() {
        let existing = split_servers("1.1.1.1, 9.9.9.9");
        assert_eq!(
            merge_servers(&existing, "9.9.9.9,10.0.0.53"),
            vec!["1.1.1.1", "9.9.9.9", "10.0.0.53"]
        );
        assert_eq!(remove_servers(&existing, "9.9.9.9"), vec!["1.1.1.1"]);
        assert_eq!(merge_servers(&[], ""), Vec::<String>::new());
    }

    #[test]
    fn ping_replies_are_summed() {
        let reply = |sent: i64, received: i64, rtt: &str| {
            JsonObject::new()
                .with("sent", sent)
                .with("received", received)
                .with("avg-rtt", rtt)
        };
        let result = ping_result(&[reply(1, 1, "1ms"), reply(1, 0, "garbage")]);
        assert_eq!(result.packets_sent, 2);
        assert_eq!(result.packets_recv, 1);
        assert_eq!(result.rtts, vec![Duration::from_millis(1), FAILED_RTT]);
    }
}
