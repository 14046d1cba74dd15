// ── Runtime backend configuration ──
//
// These types describe how to reach each backend. They carry credentials
// and tuning but never touch disk: wgctl-config builds them from the
// config file and hands them in.

use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::model::InterfaceBackend;

/// Settings for the local kernel backend.
#[derive(Debug, Clone)]
pub struct LocalBackendConfig {
    /// Device names never reported by `get_interfaces`.
    pub ignored_interfaces: Vec<String>,
    /// Prefix for resolvconf interface records (`%resPref`).
    pub resolvconf_prefix: String,
    /// Base for generated firewall marks and table ids.
    pub route_table_offset: u32,
    /// First priority tried for the `lookup main suppress_prefixlength 0` rule.
    pub rule_prio_offset: u32,
    /// Timeout for each external command.
    pub command_timeout: Duration,
}

impl Default for LocalBackendConfig {
    fn default() -> Self {
        Self {
            ignored_interfaces: Vec::new(),
            resolvconf_prefix: "tun.".into(),
            route_table_offset: 20_000,
            rule_prio_offset: 20_000,
            command_timeout: Duration::from_secs(10),
        }
    }
}

/// How to authenticate with a REST appliance.
#[derive(Debug, Clone)]
pub enum RestCredentials {
    /// pfSense REST API key.
    ApiKey(SecretString),
    /// RouterOS HTTP basic auth.
    Basic {
        username: String,
        password: SecretString,
    },
}

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    #[default]
    SystemDefaults,
    CustomCa(PathBuf),
    /// Skip verification (self-signed appliances).
    DangerAcceptInvalid,
}

impl From<&TlsVerification> for wgctl_api::TlsMode {
    fn from(tls: &TlsVerification) -> Self {
        match tls {
            TlsVerification::SystemDefaults => Self::System,
            TlsVerification::CustomCa(path) => Self::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => Self::DangerAcceptInvalid,
        }
    }
}

/// Settings for one pfSense- or RouterOS-style backend.
#[derive(Debug, Clone)]
pub struct RestBackendConfig {
    pub id: InterfaceBackend,
    pub display_name: String,
    pub api_url: Url,
    pub credentials: RestCredentials,
    pub tls: TlsVerification,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Bound on parallel detail fetches during bulk reads.
    pub concurrency: usize,
    pub ignored_interfaces: Vec<String>,
    /// Log every filtered or skipped object.
    pub debug: bool,
}

impl RestBackendConfig {
    pub fn transport(&self) -> wgctl_api::TransportConfig {
        wgctl_api::TransportConfig {
            tls: (&self.tls).into(),
            timeout: self.timeout,
        }
    }

    /// Concurrency bound, never zero.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }
}
