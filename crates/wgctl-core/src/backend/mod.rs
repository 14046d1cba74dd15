// ── Controller backends ──
//
// One trait, three implementations: the local kernel device, and REST
// managed pfSense and RouterOS appliances. Callers drive every backend
// the same way; each maps the calls onto its own low-level client.

pub mod bulk;
pub mod local;
pub mod locks;
pub mod mikrotik;
pub mod pfsense;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::CoreError;
use crate::model::{
    BackendKind, InterfaceBackend, InterfaceConfig, InterfaceExtras, InterfaceIdentifier,
    PeerConfig, PeerExtras, PeerIdentifier, PhysicalInterface, PhysicalPeer, PingResult,
    RoutingTableInfo,
};

pub use local::LocalBackend;
pub use mikrotik::MikrotikBackend;
pub use pfsense::PfsenseBackend;

/// Change applied to the current (or freshly created) interface before
/// it is pushed back.
pub type InterfaceTransform =
    Box<dyn FnOnce(PhysicalInterface) -> Result<PhysicalInterface, CoreError> + Send>;

/// Change applied to the current (or freshly created) peer before it is
/// pushed back.
pub type PeerTransform = Box<dyn FnOnce(PhysicalPeer) -> Result<PhysicalPeer, CoreError> + Send>;

/// Leaves the value untouched.
pub fn identity_interface() -> InterfaceTransform {
    Box::new(Ok)
}

/// Leaves the value untouched.
pub fn identity_peer() -> PeerTransform {
    Box::new(Ok)
}

/// Capability contract every backend implements.
///
/// `save_interface` and `save_peer` follow the same algorithm everywhere:
/// load the object, create it if missing and reload, apply the
/// transform, restore backend bookkeeping in the extras, then push the
/// whole result back.
#[async_trait]
pub trait ControllerBackend: Send + Sync {
    fn id(&self) -> &InterfaceBackend;

    fn kind(&self) -> BackendKind;

    async fn get_interfaces(&self) -> Result<Vec<PhysicalInterface>, CoreError>;

    async fn get_interface(&self, id: &InterfaceIdentifier)
    -> Result<PhysicalInterface, CoreError>;

    async fn get_peers(&self, device: &InterfaceIdentifier)
    -> Result<Vec<PhysicalPeer>, CoreError>;

    async fn save_interface(
        &self,
        id: &InterfaceIdentifier,
        transform: InterfaceTransform,
    ) -> Result<(), CoreError>;

    async fn delete_interface(&self, id: &InterfaceIdentifier) -> Result<(), CoreError>;

    async fn save_peer(
        &self,
        device: &InterfaceIdentifier,
        id: &PeerIdentifier,
        transform: PeerTransform,
    ) -> Result<(), CoreError>;

    async fn delete_peer(
        &self,
        device: &InterfaceIdentifier,
        id: &PeerIdentifier,
    ) -> Result<(), CoreError>;

    async fn execute_interface_hook(
        &self,
        id: &InterfaceIdentifier,
        command: &str,
    ) -> Result<(), CoreError>;

    async fn set_dns(
        &self,
        id: &InterfaceIdentifier,
        dns: &str,
        search: &str,
    ) -> Result<(), CoreError>;

    async fn unset_dns(
        &self,
        id: &InterfaceIdentifier,
        dns: &str,
        search: &str,
    ) -> Result<(), CoreError>;

    async fn set_routes(&self, info: &RoutingTableInfo) -> Result<(), CoreError>;

    async fn remove_routes(&self, info: &RoutingTableInfo) -> Result<(), CoreError>;

    async fn ping_addresses(&self, addr: &str) -> Result<PingResult, CoreError>;

    // ── Extras boundary ──────────────────────────────────────────────

    /// Backend extras to attach when pushing `cfg`.
    fn interface_extras(&self, _cfg: &InterfaceConfig) -> Option<InterfaceExtras> {
        None
    }

    /// Backend extras to attach when pushing `peer`.
    fn peer_extras(&self, _peer: &PeerConfig) -> Option<PeerExtras> {
        None
    }

    /// Build a stored record for a live interface.
    fn import_interface(&self, pi: &PhysicalInterface) -> InterfaceConfig {
        InterfaceConfig::from_physical(pi, self.id().clone())
    }

    /// Build a stored record for a live peer.
    fn import_peer(&self, pp: &PhysicalPeer, iface: &InterfaceConfig) -> PeerConfig {
        PeerConfig::from_physical(pp, iface)
    }
}

/// Whether `name` is in a backend's ignore list.
pub(crate) fn is_ignored(ignored: &[String], name: &InterfaceIdentifier) -> bool {
    ignored.iter().any(|i| i == name.as_str())
}

// ── Registry ─────────────────────────────────────────────────────────

/// All configured backends, keyed by id, plus the default for new
/// interfaces.
#[derive(Clone)]
pub struct BackendRegistry {
    backends: BTreeMap<InterfaceBackend, Arc<dyn ControllerBackend>>,
    default: InterfaceBackend,
}

impl BackendRegistry {
    pub fn new(default: InterfaceBackend) -> Self {
        Self {
            backends: BTreeMap::new(),
            default,
        }
    }

    pub fn register(&mut self, backend: Arc<dyn ControllerBackend>) {
        tracing::debug!(backend = %backend.id(), kind = %backend.kind(), "registered backend");
        self.backends.insert(backend.id().clone(), backend);
    }

    pub fn with(mut self, backend: Arc<dyn ControllerBackend>) -> Self {
        self.register(backend);
        self
    }

    pub fn get(&self, id: &InterfaceBackend) -> Result<Arc<dyn ControllerBackend>, CoreError> {
        self.backends
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("backend", id))
    }

    pub fn default_id(&self) -> &InterfaceBackend {
        &self.default
    }

    pub fn default_backend(&self) -> Result<Arc<dyn ControllerBackend>, CoreError> {
        self.get(&self.default)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ControllerBackend>> {
        self.backends.values()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .field("default", &self.default)
            .finish()
    }
}

// ── Lenient payload parsing shared by the REST backends ──────────────

/// Comma-separated CIDRs, silently dropping entries that do not parse.
pub(crate) fn lenient_cidrs(list: &str) -> Vec<crate::model::Cidr> {
    list.split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

/// Keepalive as a duration (`25s`, `1m`) or as plain seconds.
pub(crate) fn parse_keepalive(value: &str) -> u32 {
    let value = value.trim();
    if value.is_empty() {
        return 0;
    }
    match humantime::parse_duration(value) {
        Ok(duration) => u32::try_from(duration.as_secs()).unwrap_or(u32::MAX),
        Err(_) => value.parse().unwrap_or_default(),
    }
}

/// Formats keepalive the way RouterOS expects durations.
pub(crate) fn format_keepalive(seconds: u32) -> String {
    format!("{seconds}s")
}
