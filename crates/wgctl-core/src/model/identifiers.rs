// ── Identity types ──
//
// Interfaces are named by their device name ("wg0"), peers by their
// base64 public key. Both are opaque strings to everything except the
// backends that validate them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::model::keys;

// ── InterfaceIdentifier ─────────────────────────────────────────────

/// Device name of a WireGuard interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterfaceIdentifier(String);

impl InterfaceIdentifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for InterfaceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InterfaceIdentifier {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for InterfaceIdentifier {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl FromStr for InterfaceIdentifier {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

// ── PeerIdentifier ──────────────────────────────────────────────────

/// Identifier of a peer, normally its base64 public key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerIdentifier(String);

impl PeerIdentifier {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the identifier decodes to a 32-byte WireGuard key.
    pub fn is_public_key(&self) -> bool {
        keys::is_valid_key(&self.0)
    }

    /// Fails with `InvalidIdentifier` unless this is a valid public key.
    pub fn ensure_public_key(&self) -> Result<(), CoreError> {
        if self.is_public_key() {
            Ok(())
        } else {
            Err(CoreError::InvalidIdentifier {
                identifier: self.0.clone(),
                reason: "not a base64-encoded 32-byte public key".into(),
            })
        }
    }

    /// First eight characters, used to derive remote object names.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for PeerIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerIdentifier {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for PeerIdentifier {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl FromStr for PeerIdentifier {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

// ── InterfaceBackend ────────────────────────────────────────────────

/// Tag naming the backend instance that owns an interface.
///
/// The local kernel backend is always `"local"`; remote backends use the
/// id from their configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterfaceBackend(String);

impl InterfaceBackend {
    pub const LOCAL: &'static str = "local";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn local() -> Self {
        Self(Self::LOCAL.to_owned())
    }

    pub fn is_local(&self) -> bool {
        self.0 == Self::LOCAL
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for InterfaceBackend {
    fn default() -> Self {
        Self::local()
    }
}

impl fmt::Display for InterfaceBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InterfaceBackend {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ── BackendKind ─────────────────────────────────────────────────────

/// Which controller implementation a backend instance uses.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BackendKind {
    Local,
    Pfsense,
    Mikrotik,
}
