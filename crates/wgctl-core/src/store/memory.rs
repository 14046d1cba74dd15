use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Store, StoreError, StoreSnapshot};
use crate::model::{InterfaceConfig, InterfaceIdentifier, PeerConfig, PeerIdentifier};

/// Store that keeps everything in memory. Useful for tests and for
/// embedding without persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
        }
    }

    /// Copy of the current contents.
    pub async fn snapshot(&self) -> StoreSnapshot {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_all(&self) -> Result<StoreSnapshot, StoreError> {
        Ok(self.snapshot().await)
    }

    async fn save_interface(
        &self,
        cfg: &InterfaceConfig,
        peers: &[PeerConfig],
    ) -> Result<(), StoreError> {
        self.state.lock().await.put_interface(cfg, peers);
        Ok(())
    }

    async fn save_peer(
        &self,
        peer: &PeerConfig,
        interface: &InterfaceIdentifier,
    ) -> Result<(), StoreError> {
        self.state.lock().await.put_peer(peer, interface);
        Ok(())
    }

    async fn delete_interface(&self, id: &InterfaceIdentifier) -> Result<(), StoreError> {
        self.state.lock().await.remove_interface(id);
        Ok(())
    }

    async fn delete_peer(
        &self,
        peer: &PeerIdentifier,
        interface: &InterfaceIdentifier,
    ) -> Result<(), StoreError> {
        self.state.lock().await.remove_peer(peer, interface);
        Ok(())
    }
}
