//! WireGuard control plane over heterogeneous backends.
//!
//! - **[`ControllerBackend`]**: One capability contract for every place a
//!   WireGuard device can live: the local kernel ([`LocalBackend`]), a
//!   pfSense-style appliance ([`PfsenseBackend`]) and a RouterOS-style
//!   router ([`MikrotikBackend`]). Saves follow get-or-create, transform,
//!   push; REST backends serialize that sequence per interface and per
//!   peer and fetch details with bounded parallelism.
//!
//! - **[`Orchestrator`]**: The authoritative in-memory copy of interface
//!   and peer configuration. One coarse lock covers every mutation,
//!   backend and [`Store`] I/O included. [`Orchestrator::reconcile`] closes
//!   the gap a crash can leave between device and store.
//!
//! - **[`allocation`]**: Free-address search per subnet for IPv4 and
//!   IPv6, skipping the network address and the IPv4 broadcast address.
//!
//! - **Domain model** ([`model`]): Physical snapshots, long-lived configs,
//!   [`Cidr`] with a family-independent ordering, and backend-owned extras.

pub mod allocation;
pub mod backend;
pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use backend::{
    BackendRegistry, ControllerBackend, InterfaceTransform, LocalBackend, MikrotikBackend,
    PeerTransform, PfsenseBackend,
};
pub use config::{LocalBackendConfig, RestBackendConfig, RestCredentials, TlsVerification};
pub use error::CoreError;
pub use orchestrator::{Orchestrator, ReconcileReport};
pub use store::{JsonFileStore, MemoryStore, Store, StoreError, StoreSnapshot};

pub use model::{
    BackendKind, Cidr, ConfigOption, HookKind, InterfaceBackend, InterfaceConfig,
    InterfaceIdentifier, InterfaceType, KeyPair, PeerConfig, PeerDefaults, PeerIdentifier,
    PhysicalInterface, PhysicalPeer, PingResult, PresharedKey, RoutingTableInfo,
};
