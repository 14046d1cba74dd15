// Shared fixtures for wgctl-core integration tests: an in-memory host
// standing in for the kernel's WireGuard and routing state plus the shell, a store that fails on demand,
// and REST backend builders pointed at a wiremock server.
#![allow(dead_code, clippy::unwrap_used)]

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ipnet::IpNet;
use url::Url;
use wiremock::{MockServer, Request, Respond, ResponseTemplate};

use wgctl_api::wgctrl::{Device, DeviceConfig, Peer};
use wgctl_api::{
    CommandOutput, Error, Family, Link, MikrotikClient, NetlinkClient, PfsenseClient, Route, Rule,
    ShellRunner, WireGuardClient,
};
use wgctl_core::store::{MemoryStore, Store, StoreError, StoreSnapshot};
use wgctl_core::{
    BackendKind, ControllerBackend, CoreError, InterfaceBackend, InterfaceConfig,
    InterfaceIdentifier, InterfaceTransform, LocalBackend, LocalBackendConfig, MikrotikBackend,
    PeerConfig, PeerIdentifier, PeerTransform, PfsenseBackend, PhysicalInterface, PhysicalPeer,
    PingResult, RestBackendConfig, RestCredentials, RoutingTableInfo, TlsVerification,
};

pub const KEY_A: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";
pub const KEY_B: &str = "TrMvSoP4jYQlY6RIzBgbssQqY3vxI2Pi+y71lOWWXX0=";
pub const KEY_C: &str = "HIgo9xNzJMWLKASShiTqIybxZ0U3wGLiUeJ1PKf8ykw=";

// ── Mock host ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct HostState {
    links: BTreeMap<String, Link>,
    addresses: BTreeMap<String, Vec<IpNet>>,
    devices: BTreeMap<String, Device>,
    routes: Vec<Route>,
    rules: Vec<Rule>,
    commands: Vec<(String, Vec<String>, Option<String>)>,
}

/// One fake machine: WireGuard devices, links, routes, rules and a shell.
/// Creating a `wireguard` link also creates the matching device.
#[derive(Debug, Default)]
pub struct MockHost {
    state: Mutex<HostState>,
    pub link_adds: AtomicUsize,
    pub configure_calls: AtomicUsize,
    shell_replies: Mutex<BTreeMap<String, CommandOutput>>,
}

impl MockHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn local_backend(self: &Arc<Self>) -> LocalBackend {
        LocalBackend::new(
            Arc::clone(self) as Arc<dyn WireGuardClient>,
            Arc::clone(self) as Arc<dyn NetlinkClient>,
            Arc::clone(self) as Arc<dyn ShellRunner>,
            LocalBackendConfig::default(),
        )
    }

    /// Pre-existing device, as if created outside wgctl.
    pub fn add_device(&self, name: &str, peers: Vec<Peer>) {
        let mut state = self.state.lock().unwrap();
        let index = 10 + u32::try_from(state.links.len()).unwrap();
        state.links.insert(name.into(), link(index, name));
        state.addresses.insert(name.into(), Vec::new());
        state.devices.insert(
            name.into(),
            Device {
                name: name.into(),
                peers,
                ..Device::default()
            },
        );
    }

    pub fn device_snapshot(&self, name: &str) -> Option<Device> {
        self.state.lock().unwrap().devices.get(name).cloned()
    }

    pub fn link_snapshot(&self, name: &str) -> Option<Link> {
        self.state.lock().unwrap().links.get(name).cloned()
    }

    pub fn addresses_of(&self, name: &str) -> Vec<IpNet> {
        self.state
            .lock()
            .unwrap()
            .addresses
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn routes(&self) -> Vec<Route> {
        self.state.lock().unwrap().routes.clone()
    }

    pub fn rules(&self) -> Vec<Rule> {
        self.state.lock().unwrap().rules.clone()
    }

    pub fn commands(&self) -> Vec<(String, Vec<String>, Option<String>)> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn reply_to(&self, program: &str, output: CommandOutput) {
        self.shell_replies
            .lock()
            .unwrap()
            .insert(program.into(), output);
    }
}

fn link(index: u32, name: &str) -> Link {
    Link {
        index,
        name: name.into(),
        mtu: 1420,
        oper_state: "DOWN".into(),
        rx_bytes: 0,
        tx_bytes: 0,
    }
}

fn link_not_found(name: &str) -> Error {
    Error::LinkNotFound { name: name.into() }
}

fn already_exists() -> Error {
    Error::Io(std::io::Error::from(std::io::ErrorKind::AlreadyExists))
}

#[async_trait]
impl NetlinkClient for MockHost {
    async fn link_add_wireguard(&self, name: &str) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if state.links.contains_key(name) {
            return Err(already_exists());
        }
        self.link_adds.fetch_add(1, Ordering::SeqCst);
        let index = 10 + u32::try_from(state.links.len()).unwrap();
        state.links.insert(name.into(), link(index, name));
        state.addresses.insert(name.into(), Vec::new());
        state.devices.insert(
            name.into(),
            Device {
                name: name.into(),
                ..Device::default()
            },
        );
        Ok(())
    }

    async fn link_delete(&self, name: &str) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.links.remove(name).ok_or_else(|| link_not_found(name))?;
        state.addresses.remove(name);
        state.devices.remove(name);
        state.routes.retain(|r| r.device != name);
        Ok(())
    }

    async fn link_by_name(&self, name: &str) -> Result<Link, Error> {
        self.link_snapshot(name).ok_or_else(|| link_not_found(name))
    }

    async fn link_set_up(&self, name: &str) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let link = state.links.get_mut(name).ok_or_else(|| link_not_found(name))?;
        link.oper_state = "UNKNOWN".into();
        Ok(())
    }

    async fn link_set_down(&self, name: &str) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let link = state.links.get_mut(name).ok_or_else(|| link_not_found(name))?;
        link.oper_state = "DOWN".into();
        Ok(())
    }

    async fn link_set_mtu(&self, name: &str, mtu: u32) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let link = state.links.get_mut(name).ok_or_else(|| link_not_found(name))?;
        link.mtu = mtu;
        Ok(())
    }

    async fn addr_replace(&self, name: &str, addr: IpNet) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let list = state.addresses.get_mut(name).ok_or_else(|| link_not_found(name))?;
        if !list.contains(&addr) {
            list.push(addr);
        }
        Ok(())
    }

    async fn addr_add(&self, name: &str, addr: IpNet) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let list = state.addresses.get_mut(name).ok_or_else(|| link_not_found(name))?;
        if list.contains(&addr) {
            return Err(already_exists());
        }
        list.push(addr);
        Ok(())
    }

    async fn addr_list(&self, name: &str) -> Result<Vec<IpNet>, Error> {
        let state = self.state.lock().unwrap();
        state.addresses.get(name).cloned().ok_or_else(|| link_not_found(name))
    }

    async fn addr_delete(&self, name: &str, addr: IpNet) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let list = state.addresses.get_mut(name).ok_or_else(|| link_not_found(name))?;
        list.retain(|a| *a != addr);
        Ok(())
    }

    async fn route_add(&self, route: &Route) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if state.routes.contains(route) {
            return Err(already_exists());
        }
        state.routes.push(route.clone());
        Ok(())
    }

    async fn route_replace(&self, route: &Route) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if !state.routes.contains(route) {
            state.routes.push(route.clone());
        }
        Ok(())
    }

    async fn route_delete(&self, route: &Route) -> Result<(), Error> {
        self.state.lock().unwrap().routes.retain(|r| r != route);
        Ok(())
    }

    async fn route_list(&self, family: Family, device: &str) -> Result<Vec<Route>, Error> {
        let state = self.state.lock().unwrap();
        if !state.links.contains_key(device) {
            return Err(link_not_found(device));
        }
        Ok(state
            .routes
            .iter()
            .filter(|r| r.device == device && Family::of(&r.destination) == family)
            .cloned()
            .collect())
    }

    async fn rule_add(&self, rule: &Rule) -> Result<(), Error> {
        self.state.lock().unwrap().rules.push(rule.clone());
        Ok(())
    }

    async fn rule_delete(&self, rule: &Rule) -> Result<(), Error> {
        self.state.lock().unwrap().rules.retain(|r| r != rule);
        Ok(())
    }

    async fn rule_list(&self, family: Family) -> Result<Vec<Rule>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state.rules.iter().filter(|r| r.family == family).cloned().collect())
    }
}

#[async_trait]
impl WireGuardClient for MockHost {
    async fn devices(&self) -> Result<Vec<Device>, Error> {
        Ok(self.state.lock().unwrap().devices.values().cloned().collect())
    }

    async fn device(&self, name: &str) -> Result<Device, Error> {
        self.device_snapshot(name)
            .ok_or_else(|| Error::DeviceNotFound { name: name.into() })
    }

    async fn configure_device(&self, name: &str, config: &DeviceConfig) -> Result<(), Error> {
        self.configure_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let device = state
            .devices
            .get_mut(name)
            .ok_or_else(|| Error::DeviceNotFound { name: name.into() })?;

        if let Some(key) = &config.private_key {
            device.private_key = Some(key.clone());
        }
        if let Some(port) = config.listen_port {
            device.listen_port = port;
        }
        if let Some(mark) = config.firewall_mark {
            device.firewall_mark = mark;
        }

        for change in &config.peers {
            let existing = device.peers.iter().position(|p| p.public_key == change.public_key);
            if change.remove {
                device.peers.retain(|p| p.public_key != change.public_key);
                continue;
            }
            let index = match existing {
                Some(index) => index,
                None if change.update_only => continue,
                None => {
                    device.peers.push(Peer {
                        public_key: change.public_key.clone(),
                        ..Peer::default()
                    });
                    device.peers.len() - 1
                }
            };
            let peer = &mut device.peers[index];
            if let Some(psk) = &change.preshared_key {
                peer.preshared_key = (!psk.is_empty()).then(|| psk.clone());
            }
            if let Some(endpoint) = &change.endpoint {
                peer.endpoint = Some(endpoint.clone());
            }
            if let Some(keepalive) = change.persistent_keepalive {
                peer.persistent_keepalive = keepalive;
            }
            if let Some(allowed) = &change.allowed_ips {
                peer.allowed_ips.clone_from(allowed);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ShellRunner for MockHost {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, Error> {
        self.state.lock().unwrap().commands.push((
            program.into(),
            args.to_vec(),
            stdin.map(str::to_owned),
        ));
        let reply = self.shell_replies.lock().unwrap().get(program).cloned();
        Ok(reply.unwrap_or(CommandOutput {
            status: Some(0),
            ..CommandOutput::default()
        }))
    }
}

// ── Stores ──────────────────────────────────────────────────────────

/// A [`MemoryStore`] whose peer deletes fail for selected peers.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    failing_peer_deletes: Mutex<HashSet<PeerIdentifier>>,
    pub fail_peer_saves: AtomicBool,
}

impl FlakyStore {
    pub fn with_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            inner: MemoryStore::with_snapshot(snapshot),
            ..Self::default()
        }
    }

    pub fn fail_delete_of(&self, peer: &str) {
        self.failing_peer_deletes
            .lock()
            .unwrap()
            .insert(PeerIdentifier::new(peer));
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn load_all(&self) -> Result<StoreSnapshot, StoreError> {
        self.inner.load_all().await
    }

    async fn save_interface(&self, cfg: &InterfaceConfig, peers: &[PeerConfig]) -> Result<(), StoreError> {
        self.inner.save_interface(cfg, peers).await
    }

    async fn save_peer(&self, peer: &PeerConfig, interface: &InterfaceIdentifier) -> Result<(), StoreError> {
        if self.fail_peer_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("refusing to save {}", peer.identifier)));
        }
        self.inner.save_peer(peer, interface).await
    }

    async fn delete_interface(&self, id: &InterfaceIdentifier) -> Result<(), StoreError> {
        self.inner.delete_interface(id).await
    }

    async fn delete_peer(&self, peer: &PeerIdentifier, interface: &InterfaceIdentifier) -> Result<(), StoreError> {
        if self.failing_peer_deletes.lock().unwrap().contains(peer) {
            return Err(StoreError::Backend(format!("refusing to delete {peer}")));
        }
        self.inner.delete_peer(peer, interface).await
    }
}

// ── Appliance stand-in ──────────────────────────────────────────────

/// A peerless appliance-style backend with fixed live interfaces. Reads
/// succeed, writes are only counted.
pub struct FakeRouter {
    id: InterfaceBackend,
    live: Vec<InterfaceIdentifier>,
    pub interface_saves: AtomicUsize,
    pub peer_saves: AtomicUsize,
}

impl FakeRouter {
    pub fn new(id: &str, live: &[&str]) -> Self {
        Self {
            id: InterfaceBackend::new(id),
            live: live.iter().map(|name| InterfaceIdentifier::new(*name)).collect(),
            interface_saves: AtomicUsize::new(0),
            peer_saves: AtomicUsize::new(0),
        }
    }

    fn unsupported(&self, operation: &'static str) -> CoreError {
        CoreError::Unimplemented {
            backend: self.id.to_string(),
            operation,
        }
    }
}

#[async_trait]
impl ControllerBackend for FakeRouter {
    fn id(&self) -> &InterfaceBackend {
        &self.id
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Mikrotik
    }

    async fn get_interfaces(&self) -> Result<Vec<PhysicalInterface>, CoreError> {
        Ok(self.live.iter().cloned().map(PhysicalInterface::new).collect())
    }

    async fn get_interface(&self, id: &InterfaceIdentifier) -> Result<PhysicalInterface, CoreError> {
        self.live
            .iter()
            .find(|live| *live == id)
            .cloned()
            .map(PhysicalInterface::new)
            .ok_or_else(|| CoreError::NotFound {
                entity_type: "interface",
                identifier: id.to_string(),
            })
    }

    async fn get_peers(&self, _device: &InterfaceIdentifier) -> Result<Vec<PhysicalPeer>, CoreError> {
        Ok(Vec::new())
    }

    async fn save_interface(&self, _id: &InterfaceIdentifier, _transform: InterfaceTransform) -> Result<(), CoreError> {
        self.interface_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_interface(&self, _id: &InterfaceIdentifier) -> Result<(), CoreError> {
        Err(self.unsupported("delete interface"))
    }

    async fn save_peer(
        &self,
        _device: &InterfaceIdentifier,
        _id: &PeerIdentifier,
        _transform: PeerTransform,
    ) -> Result<(), CoreError> {
        self.peer_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_peer(&self, _device: &InterfaceIdentifier, _id: &PeerIdentifier) -> Result<(), CoreError> {
        Err(self.unsupported("delete peer"))
    }

    async fn execute_interface_hook(&self, _id: &InterfaceIdentifier, _command: &str) -> Result<(), CoreError> {
        Ok(())
    }

    async fn set_dns(&self, _id: &InterfaceIdentifier, _dns: &str, _search: &str) -> Result<(), CoreError> {
        Ok(())
    }

    async fn unset_dns(&self, _id: &InterfaceIdentifier, _dns: &str, _search: &str) -> Result<(), CoreError> {
        Ok(())
    }

    async fn set_routes(&self, _info: &RoutingTableInfo) -> Result<(), CoreError> {
        Ok(())
    }

    async fn remove_routes(&self, _info: &RoutingTableInfo) -> Result<(), CoreError> {
        Ok(())
    }

    async fn ping_addresses(&self, _addr: &str) -> Result<PingResult, CoreError> {
        Err(self.unsupported("ping"))
    }
}

// ── Snapshots ───────────────────────────────────────────────────────

/// A stored interface on `backend` with peers keyed by the given public keys.
pub fn snapshot_with(
    interface: &str,
    backend: InterfaceBackend,
    peers: &[(&str, &str)],
) -> StoreSnapshot {
    let iface = InterfaceConfig::new(interface.into(), backend);
    let mut snapshot = StoreSnapshot::default();
    let stored = snapshot.peers.entry(iface.identifier.clone()).or_default();
    for (key, address) in peers {
        let mut peer = PeerConfig {
            identifier: PeerIdentifier::new(*key),
            interface_identifier: iface.identifier.clone(),
            ..PeerConfig::default()
        };
        peer.peer_interface.address_str = (*address).into();
        stored.insert(peer.identifier.clone(), peer);
    }
    snapshot.interfaces.insert(iface.identifier.clone(), iface);
    snapshot
}

// ── REST backends ───────────────────────────────────────────────────

pub fn rest_config(id: &str, server: &MockServer, credentials: RestCredentials) -> RestBackendConfig {
    RestBackendConfig {
        id: InterfaceBackend::new(id),
        display_name: id.into(),
        api_url: Url::parse(&server.uri()).unwrap(),
        credentials,
        tls: TlsVerification::SystemDefaults,
        timeout: Duration::from_secs(5),
        concurrency: 2,
        ignored_interfaces: Vec::new(),
        debug: true,
    }
}

pub fn pfsense_backend(server: &MockServer) -> PfsenseBackend {
    let cfg = rest_config(
        "fw1",
        server,
        RestCredentials::ApiKey("test-key".to_string().into()),
    );
    let client = PfsenseClient::with_client(
        reqwest::Client::new(),
        cfg.api_url.clone(),
        cfg.timeout,
    );
    PfsenseBackend::with_client(cfg, client)
}

pub fn mikrotik_backend(server: &MockServer) -> MikrotikBackend {
    let cfg = rest_config(
        "rb1",
        server,
        RestCredentials::Basic {
            username: "admin".into(),
            password: "secret".to_string().into(),
        },
    );
    let client = MikrotikClient::with_client(
        reqwest::Client::new(),
        cfg.api_url.clone(),
        "admin".into(),
        "secret".to_string().into(),
        cfg.timeout,
    );
    MikrotikBackend::with_client(cfg, client)
}

/// pfSense success envelope around `data`.
pub fn pf_ok(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "code": 200,
        "status": "ok",
        "message": "",
        "data": data,
    }))
}

// ── Stateful responders ─────────────────────────────────────────────

/// Answers `before` until the shared flag is raised, `after` from then on.
pub struct Switched {
    pub flag: Arc<AtomicBool>,
    pub before: ResponseTemplate,
    pub after: ResponseTemplate,
}

impl Respond for Switched {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        if self.flag.load(Ordering::SeqCst) {
            self.after.clone()
        } else {
            self.before.clone()
        }
    }
}

/// Raises the shared flag and answers `response`.
pub struct RaiseFlag {
    pub flag: Arc<AtomicBool>,
    pub response: ResponseTemplate,
}

impl Respond for RaiseFlag {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.flag.store(true, Ordering::SeqCst);
        self.response.clone()
    }
}
