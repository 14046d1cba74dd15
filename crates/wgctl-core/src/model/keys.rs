// ── WireGuard keys ──
//
// Keys travel as base64 strings end to end (device dumps, REST payloads,
// stored configs), so the model keeps them as strings and only decodes
// for validation and derivation.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::CoreError;

/// Curve25519 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// Private/public key pair, both base64. Either side may be empty when
/// the backend does not expose it.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

impl KeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            private_key: STANDARD.encode(secret.to_bytes()),
            public_key: STANDARD.encode(public.as_bytes()),
        }
    }

    /// Rebuild a pair from a base64 private key, deriving the public half.
    pub fn from_private_key(private_key: &str) -> Result<Self, CoreError> {
        let bytes = decode_key("private key", private_key)?;
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Ok(Self {
            private_key: private_key.to_owned(),
            public_key: STANDARD.encode(public.as_bytes()),
        })
    }

    pub fn public_only(public_key: impl Into<String>) -> Self {
        Self {
            private_key: String::new(),
            public_key: public_key.into(),
        }
    }

    pub fn has_private_key(&self) -> bool {
        !self.private_key.is_empty()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_key", &redacted(&self.private_key))
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// Optional symmetric key mixed into the handshake.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresharedKey(String);

impl PresharedKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(STANDARD.encode(bytes))
    }

    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `None` for an empty key, which backends report for "no preshared key".
    pub fn non_empty(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        (!key.is_empty()).then_some(Self(key))
    }
}

impl fmt::Debug for PresharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PresharedKey({})", redacted(&self.0))
    }
}

/// Whether `key` is a base64-encoded 32-byte key.
pub fn is_valid_key(key: &str) -> bool {
    STANDARD
        .decode(key)
        .is_ok_and(|bytes| bytes.len() == KEY_SIZE)
}

pub fn validate_key(field: &str, key: &str) -> Result<(), CoreError> {
    decode_key(field, key).map(|_| ())
}

fn decode_key(field: &str, key: &str) -> Result<[u8; KEY_SIZE], CoreError> {
    let invalid = |reason: String| CoreError::Validation {
        field: field.to_owned(),
        reason,
    };
    let bytes = STANDARD
        .decode(key)
        .map_err(|e| invalid(format!("invalid base64: {e}")))?;
    <[u8; KEY_SIZE]>::try_from(bytes.as_slice())
        .map_err(|_| invalid(format!("expected {KEY_SIZE} bytes, got {}", bytes.len())))
}

fn redacted(value: &str) -> &'static str {
    if value.is_empty() { "<empty>" } else { "<redacted>" }
}
