// ── Domain model ──
//
// Physical snapshots reported by backends, the configuration records the
// orchestrator keeps, and the value types both are built from.

pub mod cidr;
pub mod extras;
pub mod identifiers;
pub mod interface;
pub mod keys;
pub mod peer;
pub mod physical;

pub use cidr::Cidr;
pub use extras::{
    InterfaceExtras, LocalPeerExtras, MikrotikInterfaceExtras, MikrotikPeerExtras,
    PeerExtras, PfsenseInterfaceExtras, PfsensePeerExtras,
};
pub use identifiers::{BackendKind, InterfaceBackend, InterfaceIdentifier, PeerIdentifier};
pub use interface::{ConfigOption, HookKind, InterfaceConfig, InterfaceType, PeerDefaults};
pub use keys::{KeyPair, PresharedKey};
pub use peer::{PeerConfig, PeerInterfaceConfig};
pub use physical::{PhysicalInterface, PhysicalPeer, PingResult, RoutingTableInfo};
