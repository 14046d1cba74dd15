// ── Persistence ──
//
// The orchestrator reads the store once at startup and afterwards only
// writes to it. No read-after-write checks are made.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::model::{InterfaceConfig, InterfaceIdentifier, PeerConfig, PeerIdentifier};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Everything a store holds, as loaded at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSnapshot {
    pub interfaces: BTreeMap<InterfaceIdentifier, InterfaceConfig>,
    pub peers: BTreeMap<InterfaceIdentifier, BTreeMap<PeerIdentifier, PeerConfig>>,
}

impl StoreSnapshot {
    pub fn peer_count(&self) -> usize {
        self.peers.values().map(BTreeMap::len).sum()
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// One-time hydration source.
    async fn load_all(&self) -> Result<StoreSnapshot, StoreError>;

    /// Write an interface record together with its current peers.
    async fn save_interface(
        &self,
        cfg: &InterfaceConfig,
        peers: &[PeerConfig],
    ) -> Result<(), StoreError>;

    async fn save_peer(
        &self,
        peer: &PeerConfig,
        interface: &InterfaceIdentifier,
    ) -> Result<(), StoreError>;

    async fn delete_interface(&self, id: &InterfaceIdentifier) -> Result<(), StoreError>;

    async fn delete_peer(
        &self,
        peer: &PeerIdentifier,
        interface: &InterfaceIdentifier,
    ) -> Result<(), StoreError>;
}

// ── Shared snapshot mutation ─────────────────────────────────────────

impl StoreSnapshot {
    pub(crate) fn put_interface(&mut self, cfg: &InterfaceConfig, peers: &[PeerConfig]) {
        self.interfaces.insert(cfg.identifier.clone(), cfg.clone());
        let entry = self.peers.entry(cfg.identifier.clone()).or_default();
        for peer in peers {
            entry.insert(peer.identifier.clone(), peer.clone());
        }
    }

    pub(crate) fn put_peer(&mut self, peer: &PeerConfig, interface: &InterfaceIdentifier) {
        let mut peer = peer.clone();
        peer.interface_identifier = interface.clone();
        self.peers
            .entry(interface.clone())
            .or_default()
            .insert(peer.identifier.clone(), peer);
    }

    pub(crate) fn remove_interface(&mut self, id: &InterfaceIdentifier) {
        self.interfaces.remove(id);
        self.peers.remove(id);
    }

    pub(crate) fn remove_peer(&mut self, peer: &PeerIdentifier, interface: &InterfaceIdentifier) {
        if let Some(peers) = self.peers.get_mut(interface) {
            peers.remove(peer);
        }
    }
}
