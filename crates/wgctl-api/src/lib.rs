// wgctl-api: low-level clients for WireGuard backends
//
// REST clients for pfSense- and RouterOS-style appliances, plus the local
// drivers the kernel backend uses: WireGuard devices and routing over
// netlink, and a shell runner for hooks.

pub mod error;
pub mod json;
pub mod netlink;
pub mod rest;
pub mod shell;
pub mod transport;
pub mod wgctrl;

pub use error::Error;
pub use json::JsonObject;
pub use netlink::{Family, Link, NetlinkClient, Route, Rtnetlink, Rule};
pub use rest::mikrotik::MikrotikClient;
pub use rest::pfsense::PfsenseClient;
pub use rest::{ApiEnvelope, ApiErrorBody, ApiStatus, RequestOptions};
pub use shell::{CommandOutput, ShellRunner, SystemShell};
pub use transport::{TlsMode, TransportConfig};
pub use wgctrl::{KernelWireGuard, WireGuardClient};
