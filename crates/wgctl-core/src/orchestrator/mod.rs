// ── Orchestrator ──
//
// The process-local authority over interface and peer configuration.
// Every mutating call holds the write half of one coarse lock for its
// whole duration, backend and store I/O included, so a hung backend
// stalls all other mutations. Multi-step operations are not
// transactional: work done before a failure stays done.

mod reconcile;

pub use reconcile::ReconcileReport;

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::allocation;
use crate::backend::{BackendRegistry, ControllerBackend, InterfaceTransform, PeerTransform};
use crate::error::CoreError;
use crate::model::{
    Cidr, HookKind, InterfaceBackend, InterfaceConfig, InterfaceExtras, InterfaceIdentifier,
    KeyPair, PeerConfig, PeerExtras, PeerIdentifier, PingResult, PresharedKey, RoutingTableInfo,
};
use crate::store::{Store, StoreSnapshot};

type PeerMap = BTreeMap<PeerIdentifier, PeerConfig>;

#[derive(Debug, Default)]
struct State {
    interfaces: BTreeMap<InterfaceIdentifier, InterfaceConfig>,
    peers: BTreeMap<InterfaceIdentifier, PeerMap>,
}

impl State {
    fn interface(&self, id: &InterfaceIdentifier) -> Result<&InterfaceConfig, CoreError> {
        self.interfaces
            .get(id)
            .ok_or_else(|| CoreError::not_found("interface", id))
    }

    fn peers_of(&self, id: &InterfaceIdentifier) -> impl Iterator<Item = &PeerConfig> {
        self.peers.get(id).into_iter().flat_map(BTreeMap::values)
    }

    /// The interface a peer lives on, searching every interface.
    fn owner_of(&self, peer: &PeerIdentifier) -> Option<&InterfaceIdentifier> {
        self.peers
            .iter()
            .find(|(_, peers)| peers.contains_key(peer))
            .map(|(iface, _)| iface)
    }
}

// ── Orchestrator ─────────────────────────────────────────────────────

/// Cheaply cloneable handle; all clones share one state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    state: RwLock<State>,
    backends: BackendRegistry,
    store: Arc<dyn Store>,
}

impl Orchestrator {
    /// Empty orchestrator. Call [`hydrate`](Self::hydrate) to load the store.
    pub fn new(backends: BackendRegistry, store: Arc<dyn Store>) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                state: RwLock::new(State::default()),
                backends,
                store,
            }),
        }
    }

    pub fn backends(&self) -> &BackendRegistry {
        &self.inner.backends
    }

    /// Replace the in-memory state with everything the store holds.
    pub async fn hydrate(&self) -> Result<(), CoreError> {
        let StoreSnapshot { interfaces, mut peers } = self
            .inner
            .store
            .load_all()
            .await
            .map_err(CoreError::persistence("load stored state"))?;

        let mut state = self.inner.state.write().await;
        state.peers = interfaces
            .keys()
            .map(|id| (id.clone(), peers.remove(id).unwrap_or_default()))
            .collect();
        for orphaned in peers.keys() {
            warn!(interface = %orphaned, "ignoring stored peers of an unknown interface");
        }
        state.interfaces = interfaces;

        info!(
            interfaces = state.interfaces.len(),
            peers = state.peers.values().map(BTreeMap::len).sum::<usize>(),
            "hydrated from store"
        );
        Ok(())
    }

    fn backend_for(&self, cfg: &InterfaceConfig) -> Result<Arc<dyn ControllerBackend>, CoreError> {
        self.inner.backends.get(&cfg.backend)
    }

    // ── Interfaces ───────────────────────────────────────────────────

    /// All interfaces, ordered by identifier.
    pub async fn get_interfaces(&self) -> Vec<InterfaceConfig> {
        let state = self.inner.state.read().await;
        state.interfaces.values().cloned().collect()
    }

    pub async fn get_interface(&self, id: &InterfaceIdentifier) -> Result<InterfaceConfig, CoreError> {
        let state = self.inner.state.read().await;
        state.interface(id).cloned()
    }

    /// Create an interface on the default backend.
    pub async fn create_interface(&self, id: &InterfaceIdentifier) -> Result<(), CoreError> {
        let backend = self.inner.backends.default_id().clone();
        self.create_interface_on(id, &backend).await
    }

    /// Create the device on `backend`, then record and persist a blank config.
    pub async fn create_interface_on(
        &self,
        id: &InterfaceIdentifier,
        backend_id: &InterfaceBackend,
    ) -> Result<(), CoreError> {
        let mut state = self.inner.state.write().await;
        if state.interfaces.contains_key(id) {
            return Err(CoreError::AlreadyExists {
                entity_type: "interface",
                identifier: id.to_string(),
            });
        }
        let backend = self.inner.backends.get(backend_id)?;

        let cfg = InterfaceConfig::new(id.clone(), backend_id.clone());
        let extras = backend.interface_extras(&cfg);
        backend
            .save_interface(id, Box::new(move |mut pi| {
                if extras.is_some() {
                    pi.extras = extras;
                }
                Ok(pi)
            }))
            .await?;

        state.interfaces.insert(id.clone(), cfg.clone());
        state.peers.insert(id.clone(), PeerMap::new());

        // A failure here leaves device and memory ahead of the store;
        // the startup reconciliation pass repairs that.
        self.inner
            .store
            .save_interface(&cfg, &[])
            .await
            .map_err(CoreError::persistence(format!("save interface {id}")))?;

        info!(interface = %id, backend = %backend_id, "interface created");
        Ok(())
    }

    /// Push `cfg` to the device, persist it and replace the stored record.
    pub async fn update_interface(
        &self,
        id: &InterfaceIdentifier,
        mut cfg: InterfaceConfig,
    ) -> Result<(), CoreError> {
        let mut state = self.inner.state.write().await;
        let current = state.interface(id)?;
        cfg.identifier = id.clone();
        cfg.backend = current.backend.clone();

        let backend = self.backend_for(&cfg)?;
        backend
            .save_interface(id, interface_transform(&cfg, backend.interface_extras(&cfg)))
            .await?;

        let peers: Vec<PeerConfig> = state.peers_of(id).cloned().collect();
        self.inner
            .store
            .save_interface(&cfg, &peers)
            .await
            .map_err(CoreError::persistence(format!("save interface {id}")))?;

        state.interfaces.insert(id.clone(), cfg);
        info!(interface = %id, "interface updated");
        Ok(())
    }

    /// Delete the device, then every stored peer, then the interface record.
    ///
    /// A failed peer delete aborts before the interface record is touched;
    /// peers deleted up to that point stay deleted.
    pub async fn delete_interface(&self, id: &InterfaceIdentifier) -> Result<(), CoreError> {
        let mut state = self.inner.state.write().await;
        let backend = self.backend_for(state.interface(id)?)?;

        backend.delete_interface(id).await?;

        let peer_ids: Vec<PeerIdentifier> = state
            .peers
            .get(id)
            .map(|peers| peers.keys().cloned().collect())
            .unwrap_or_default();
        for peer_id in peer_ids {
            self.inner
                .store
                .delete_peer(&peer_id, id)
                .await
                .map_err(CoreError::persistence(format!("delete peer {peer_id}")))?;
            if let Some(peers) = state.peers.get_mut(id) {
                peers.remove(&peer_id);
            }
            debug!(interface = %id, peer = %peer_id, "stored peer deleted");
        }

        self.inner
            .store
            .delete_interface(id)
            .await
            .map_err(CoreError::persistence(format!("delete interface {id}")))?;

        state.interfaces.remove(id);
        state.peers.remove(id);
        info!(interface = %id, "interface deleted");
        Ok(())
    }

    /// Re-apply the interface's peer defaults to every overridable peer
    /// option and persist the result. The live device is not touched.
    pub async fn apply_default_configs(&self, id: &InterfaceIdentifier) -> Result<(), CoreError> {
        let mut state = self.inner.state.write().await;
        let iface = state.interface(id)?.clone();

        let Some(peers) = state.peers.get_mut(id) else {
            return Ok(());
        };
        for peer in peers.values_mut() {
            peer.apply_interface_defaults(&iface);
            self.inner
                .store
                .save_peer(peer, id)
                .await
                .map_err(CoreError::persistence(format!(
                    "persist peer defaults to {}",
                    peer.identifier
                )))?;
        }
        debug!(interface = %id, peers = peers.len(), "peer defaults applied");
        Ok(())
    }

    // ── Peers ────────────────────────────────────────────────────────

    pub async fn get_peers(&self, interface: &InterfaceIdentifier) -> Result<Vec<PeerConfig>, CoreError> {
        let state = self.inner.state.read().await;
        state.interface(interface)?;
        Ok(state.peers_of(interface).cloned().collect())
    }

    pub async fn get_peer(&self, id: &PeerIdentifier) -> Result<PeerConfig, CoreError> {
        let state = self.inner.state.read().await;
        state
            .owner_of(id)
            .and_then(|iface| state.peers.get(iface)?.get(id))
            .cloned()
            .ok_or_else(|| CoreError::not_found("peer", id))
    }

    /// Push and persist each peer in order.
    ///
    /// A failure on one peer aborts the call; earlier peers remain pushed
    /// and persisted.
    pub async fn save_peers(&self, peers: Vec<PeerConfig>) -> Result<(), CoreError> {
        let mut state = self.inner.state.write().await;

        for peer in peers {
            let device = peer.interface_identifier.clone();
            let backend = self.backend_for(state.interface(&device)?)?;

            backend
                .save_peer(&device, &peer.identifier, peer_transform(&peer, backend.peer_extras(&peer)))
                .await?;

            self.inner
                .store
                .save_peer(&peer, &device)
                .await
                .map_err(CoreError::persistence(format!("save peer {}", peer.identifier)))?;

            debug!(interface = %device, peer = %peer.identifier, "peer saved");
            state
                .peers
                .entry(device)
                .or_default()
                .insert(peer.identifier.clone(), peer);
        }
        Ok(())
    }

    /// Remove a peer from its device, the store and memory.
    pub async fn remove_peer(&self, id: &PeerIdentifier) -> Result<(), CoreError> {
        let mut state = self.inner.state.write().await;
        let device = state
            .owner_of(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("peer", id))?;
        let backend = self.backend_for(state.interface(&device)?)?;

        backend.delete_peer(&device, id).await?;
        self.inner
            .store
            .delete_peer(id, &device)
            .await
            .map_err(CoreError::persistence(format!("delete peer {id}")))?;

        if let Some(peers) = state.peers.get_mut(&device) {
            peers.remove(id);
        }
        info!(interface = %device, peer = %id, "peer removed");
        Ok(())
    }

    /// A new peer for `interface`: fresh keys, interface defaults and one
    /// free address from each default peer network. Nothing is saved.
    pub async fn prepare_peer(&self, interface: &InterfaceIdentifier) -> Result<PeerConfig, CoreError> {
        let state = self.inner.state.read().await;
        let iface = state.interface(interface)?;

        let mut peer = PeerConfig::from_defaults(iface, Self::new_key_pair());
        peer.preshared_key = Some(Self::new_preshared_key());

        let used = allocation::used_ips(state.peers_of(interface))?;
        let addresses = iface
            .peer_defaults
            .networks
            .iter()
            .map(|network| allocation::fresh_ip(network, &used, false))
            .collect::<Result<Vec<_>, _>>()?;
        peer.peer_interface.address_str = Cidr::list_to_string(&addresses);
        Ok(peer)
    }

    pub fn new_key_pair() -> KeyPair {
        KeyPair::generate()
    }

    pub fn new_preshared_key() -> PresharedKey {
        PresharedKey::generate()
    }

    // ── Address allocation ───────────────────────────────────────────

    /// Every address assigned to the interface's peers, sorted.
    pub async fn get_all_used_ips(&self, interface: &InterfaceIdentifier) -> Result<Vec<Cidr>, CoreError> {
        let state = self.inner.state.read().await;
        state.interface(interface)?;
        allocation::used_ips(state.peers_of(interface))
    }

    /// Used addresses inside `subnet`, sorted.
    pub async fn get_used_ips(
        &self,
        interface: &InterfaceIdentifier,
        subnet: &Cidr,
    ) -> Result<Vec<Cidr>, CoreError> {
        let used = self.get_all_used_ips(interface).await?;
        Ok(allocation::used_ips_in(&used, subnet))
    }

    pub async fn get_fresh_ip(
        &self,
        interface: &InterfaceIdentifier,
        subnet: &Cidr,
        increment: bool,
    ) -> Result<Cidr, CoreError> {
        let used = self.get_all_used_ips(interface).await?;
        allocation::fresh_ip(subnet, &used, increment)
    }

    // ── Device side effects ──────────────────────────────────────────

    /// Route the interface's enabled peers, or drop its routes when
    /// routing is switched off.
    pub async fn sync_routes(&self, interface: &InterfaceIdentifier) -> Result<(), CoreError> {
        let state = self.inner.state.write().await;
        let iface = state.interface(interface)?;
        let backend = self.backend_for(iface)?;

        let mut allowed_ips = Vec::new();
        for peer in state.peers_of(interface).filter(|p| !p.is_disabled()) {
            allowed_ips.extend(peer.materialize_allowed_ips()?);
        }
        allowed_ips.sort();
        allowed_ips.dedup();

        let info = RoutingTableInfo {
            interface: interface.clone(),
            fw_mark: iface.firewall_mark,
            table: iface.routing_table_id(),
            table_str: iface.routing_table.clone(),
            allowed_ips,
        };
        if iface.manage_routing_table() {
            backend.set_routes(&info).await
        } else {
            backend.remove_routes(&info).await
        }
    }

    /// Install (`up`) or withdraw the interface's DNS settings.
    pub async fn apply_dns(&self, interface: &InterfaceIdentifier, up: bool) -> Result<(), CoreError> {
        let state = self.inner.state.write().await;
        let iface = state.interface(interface)?;
        let backend = self.backend_for(iface)?;
        if up {
            backend
                .set_dns(interface, &iface.dns_str, &iface.dns_search_str)
                .await
        } else {
            backend
                .unset_dns(interface, &iface.dns_str, &iface.dns_search_str)
                .await
        }
    }

    /// Run one of the interface's lifecycle hooks. Empty hooks are skipped.
    pub async fn run_hook(&self, interface: &InterfaceIdentifier, kind: HookKind) -> Result<(), CoreError> {
        let state = self.inner.state.write().await;
        let iface = state.interface(interface)?;
        let command = iface.hook(kind).trim();
        if command.is_empty() {
            return Ok(());
        }
        let backend = self.backend_for(iface)?;
        debug!(interface = %interface, hook = %kind, "running hook");
        backend.execute_interface_hook(interface, command).await
    }

    /// Ping the peer's check-alive address from its interface's backend.
    pub async fn ping_peer(&self, id: &PeerIdentifier) -> Result<PingResult, CoreError> {
        let (backend, address) = {
            let state = self.inner.state.read().await;
            let device = state
                .owner_of(id)
                .ok_or_else(|| CoreError::not_found("peer", id))?;
            let backend = self.backend_for(state.interface(device)?)?;
            let address = state
                .peers
                .get(device)
                .and_then(|peers| peers.get(id))
                .and_then(PeerConfig::check_alive_address)
                .ok_or_else(|| CoreError::Validation {
                    field: "peer address".into(),
                    reason: format!("peer {id} has no address to ping"),
                })?;
            (backend, address)
        };
        backend.ping_addresses(&address).await
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("backends", &self.inner.backends)
            .finish_non_exhaustive()
    }
}

// ── Transforms ───────────────────────────────────────────────────────

/// Merge `cfg` onto whatever the backend currently has, attaching the
/// backend's own extras when it builds any.
fn interface_transform(cfg: &InterfaceConfig, extras: Option<InterfaceExtras>) -> InterfaceTransform {
    let cfg = cfg.clone();
    Box::new(move |mut pi| {
        cfg.merge_into(&mut pi);
        if extras.is_some() {
            pi.extras = extras;
        }
        Ok(pi)
    })
}

fn peer_transform(peer: &PeerConfig, extras: Option<PeerExtras>) -> PeerTransform {
    let peer = peer.clone();
    Box::new(move |mut pp| {
        peer.merge_into(&mut pp)?;
        if extras.is_some() {
            pp.extras = extras;
        }
        Ok(pp)
    })
}
