//! Configuration for the wgctl daemon.
//!
//! One TOML file layered under `WGCTL_*` environment variables, checked
//! for consistency, then translated into the runtime configs
//! `wgctl_core` hands to its backends.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use wgctl_core::{
    InterfaceBackend, LocalBackendConfig, RestBackendConfig, RestCredentials, TlsVerification,
};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for backend '{backend}'")]
    NoCredentials { backend: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendSection,

    #[serde(default)]
    pub advanced: Advanced,

    #[serde(default)]
    pub store: StoreSection,
}

/// Which backends exist and which one new interfaces land on.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BackendSection {
    /// Backend id for interfaces created without an explicit backend.
    #[serde(default = "default_backend_id")]
    pub default: String,

    /// Kernel devices the local backend never reports.
    #[serde(default)]
    pub ignored_local_interfaces: Vec<String>,

    /// Prefix of resolvconf records written for local interfaces.
    #[serde(default = "default_resolvconf_prefix")]
    pub local_resolvconf_prefix: String,

    #[serde(default)]
    pub mikrotik: Vec<RemoteBackend>,

    #[serde(default)]
    pub pfsense: Vec<RemoteBackend>,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            default: default_backend_id(),
            ignored_local_interfaces: Vec::new(),
            local_resolvconf_prefix: default_resolvconf_prefix(),
            mikrotik: Vec::new(),
            pfsense: Vec::new(),
        }
    }
}

/// One `[[backend.mikrotik]]` or `[[backend.pfsense]]` entry.
///
/// RouterOS entries authenticate with `api_user` and `api_password`;
/// pfSense entries with `api_key`. A `*_env` field names an environment
/// variable that takes precedence over the plaintext value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RemoteBackend {
    pub id: String,

    /// Human-readable name; the id when unset.
    pub display_name: Option<String>,

    #[serde(default)]
    pub ignored_interfaces: Vec<String>,

    /// Base URL of the appliance's REST API.
    pub api_url: String,

    #[serde(default = "default_true")]
    pub api_verify_tls: bool,

    /// CA bundle for appliances signed by a private authority.
    pub api_ca_cert: Option<PathBuf>,

    /// Per-request timeout; zero or negative means the default.
    #[serde(default = "default_api_timeout")]
    pub api_timeout_secs: i64,

    /// Parallel detail fetches; zero or negative means the default.
    #[serde(default = "default_concurrency")]
    pub concurrency: i64,

    #[serde(default)]
    pub debug: bool,

    pub api_user: Option<String>,
    pub api_password: Option<String>,
    pub api_password_env: Option<String>,

    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
}

impl RemoteBackend {
    pub fn display_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.id)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(positive_or(self.api_timeout_secs, default_api_timeout()))
    }

    pub fn effective_concurrency(&self) -> usize {
        usize::try_from(positive_or(self.concurrency, default_concurrency())).unwrap_or(usize::MAX)
    }

    fn tls(&self) -> TlsVerification {
        match (&self.api_ca_cert, self.api_verify_tls) {
            (_, false) => TlsVerification::DangerAcceptInvalid,
            (Some(ca), true) => TlsVerification::CustomCa(ca.clone()),
            (None, true) => TlsVerification::SystemDefaults,
        }
    }

    fn parsed_url(&self, field: &str) -> Result<url::Url, ConfigError> {
        self.api_url
            .parse()
            .map_err(|e| ConfigError::invalid(field, format!("invalid URL '{}': {e}", self.api_url)))
    }

    fn runtime(&self, field: &str, credentials: RestCredentials) -> Result<RestBackendConfig, ConfigError> {
        Ok(RestBackendConfig {
            id: InterfaceBackend::new(self.id.clone()),
            display_name: self.display_name().to_owned(),
            api_url: self.parsed_url(field)?,
            credentials,
            tls: self.tls(),
            timeout: self.timeout(),
            concurrency: self.effective_concurrency(),
            ignored_interfaces: self.ignored_interfaces.clone(),
            debug: self.debug,
        })
    }
}

/// Tuning for the local kernel backend.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Advanced {
    /// Base for generated firewall marks and routing table ids.
    #[serde(default = "default_offset")]
    pub route_table_offset: u32,

    /// First priority tried for the main-table suppress rule.
    #[serde(default = "default_offset")]
    pub rule_prio_offset: u32,

    /// Timeout for `resolvconf`, `ping` and hook commands.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

impl Default for Advanced {
    fn default() -> Self {
        Self {
            route_table_offset: default_offset(),
            rule_prio_offset: default_offset(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct StoreSection {
    /// JSON state file; a file under the platform data dir when unset.
    pub path: Option<PathBuf>,
}

fn default_backend_id() -> String {
    InterfaceBackend::LOCAL.into()
}
fn default_resolvconf_prefix() -> String {
    "tun.".into()
}
fn default_true() -> bool {
    true
}
fn default_api_timeout() -> u64 {
    30
}
fn default_concurrency() -> u64 {
    5
}
fn default_offset() -> u32 {
    20_000
}
fn default_command_timeout() -> u64 {
    10
}

fn positive_or(value: i64, default: u64) -> u64 {
    u64::try_from(value).ok().filter(|v| *v > 0).unwrap_or(default)
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "wgctl", "wgctl")
}

fn home() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || home().join(".config").join("wgctl").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Where the JSON state lives when `[store] path` is unset.
pub fn default_store_path() -> PathBuf {
    project_dirs().map_or_else(
        || home().join(".local").join("share").join("wgctl").join("state.json"),
        |dirs| dirs.data_dir().join("state.json"),
    )
}

// ── Loading ─────────────────────────────────────────────────────────

/// Defaults, then the TOML file at `path`, then `WGCTL_*` variables
/// (`__` separates nested keys, as in `WGCTL_BACKEND__DEFAULT`).
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("WGCTL_").split("__"))
}

/// Load and validate the configuration. A missing file yields defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    let config: Config = figment(&path).extract()?;
    config.validate()?;
    Ok(config)
}

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(cfg)?)?;
    Ok(())
}

// ── Validation & translation ────────────────────────────────────────

impl Config {
    /// Check ids, the default backend and every API URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        let remotes = self
            .backend
            .mikrotik
            .iter()
            .map(|b| ("backend.mikrotik", b))
            .chain(self.backend.pfsense.iter().map(|b| ("backend.pfsense", b)));

        for (section, remote) in remotes {
            if remote.id.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("{section}.id"),
                    "backend id must not be empty",
                ));
            }
            if remote.id == InterfaceBackend::LOCAL {
                return Err(ConfigError::invalid(
                    format!("{section}.id"),
                    "'local' is reserved for the kernel backend",
                ));
            }
            if !seen.insert(remote.id.as_str()) {
                return Err(ConfigError::invalid(
                    format!("{section}.id"),
                    format!("duplicate backend id '{}'", remote.id),
                ));
            }
            remote.parsed_url(&format!("{section}.{}.api_url", remote.id))?;
        }

        let default = self.backend.default.as_str();
        if default != InterfaceBackend::LOCAL && !seen.contains(default) {
            return Err(ConfigError::invalid(
                "backend.default",
                format!("'{default}' is neither 'local' nor a configured backend"),
            ));
        }
        Ok(())
    }

    pub fn default_backend(&self) -> InterfaceBackend {
        InterfaceBackend::new(self.backend.default.clone())
    }

    pub fn store_path(&self) -> PathBuf {
        self.store.path.clone().unwrap_or_else(default_store_path)
    }

    pub fn local_backend_config(&self) -> LocalBackendConfig {
        LocalBackendConfig {
            ignored_interfaces: self.backend.ignored_local_interfaces.clone(),
            resolvconf_prefix: self.backend.local_resolvconf_prefix.clone(),
            route_table_offset: self.advanced.route_table_offset,
            rule_prio_offset: self.advanced.rule_prio_offset,
            command_timeout: Duration::from_secs(self.advanced.command_timeout_secs),
        }
    }

    /// Runtime configs for every RouterOS entry.
    pub fn mikrotik_backends(&self) -> Result<Vec<RestBackendConfig>, ConfigError> {
        self.backend
            .mikrotik
            .iter()
            .map(|remote| {
                let credentials = resolve_basic_auth(remote)?;
                remote.runtime(&format!("backend.mikrotik.{}.api_url", remote.id), credentials)
            })
            .collect()
    }

    /// Runtime configs for every pfSense entry.
    pub fn pfsense_backends(&self) -> Result<Vec<RestBackendConfig>, ConfigError> {
        self.backend
            .pfsense
            .iter()
            .map(|remote| {
                let credentials = RestCredentials::ApiKey(resolve_api_key(remote)?);
                remote.runtime(&format!("backend.pfsense.{}.api_url", remote.id), credentials)
            })
            .collect()
    }
}

// ── Credential resolution ───────────────────────────────────────────

fn from_env_or_plain(env_name: Option<&str>, plain: Option<&str>) -> Option<SecretString> {
    if let Some(name) = env_name {
        if let Ok(value) = std::env::var(name) {
            return Some(SecretString::from(value));
        }
    }
    plain.map(SecretString::from)
}

/// API key from `api_key_env`, then `api_key`.
pub fn resolve_api_key(remote: &RemoteBackend) -> Result<SecretString, ConfigError> {
    from_env_or_plain(remote.api_key_env.as_deref(), remote.api_key.as_deref()).ok_or_else(|| {
        ConfigError::NoCredentials {
            backend: remote.id.clone(),
        }
    })
}

/// `api_user` plus a password from `api_password_env`, then `api_password`.
pub fn resolve_basic_auth(remote: &RemoteBackend) -> Result<RestCredentials, ConfigError> {
    let no_credentials = || ConfigError::NoCredentials {
        backend: remote.id.clone(),
    };
    let username = remote
        .api_user
        .clone()
        .filter(|user| !user.is_empty())
        .ok_or_else(no_credentials)?;
    let password = from_env_or_plain(remote.api_password_env.as_deref(), remote.api_password.as_deref())
        .ok_or_else(no_credentials)?;
    Ok(RestCredentials::Basic { username, password })
}
