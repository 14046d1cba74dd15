// JSON file store: the whole snapshot, rewritten atomically on every
// change through a temp file in the same directory.

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use super::{Store, StoreError, StoreSnapshot};
use crate::model::{InterfaceConfig, InterfaceIdentifier, PeerConfig, PeerIdentifier};

#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<StoreSnapshot, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(StoreSnapshot::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreSnapshot::default()),
            Err(source) => Err(StoreError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    async fn write(&self, snapshot: &StoreSnapshot) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &json))
            .await
            .map_err(|e| StoreError::Backend(format!("store writer task failed: {e}")))??;
        debug!(path = %self.path.display(), "store written");
        Ok(())
    }

    async fn modify(&self, f: impl FnOnce(&mut StoreSnapshot) + Send) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut snapshot = self.read().await?;
        f(&mut snapshot);
        self.write(&snapshot).await
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(io_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(contents).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

#[async_trait]
impl Store for JsonFileStore {
    async fn load_all(&self) -> Result<StoreSnapshot, StoreError> {
        self.read().await
    }

    async fn save_interface(
        &self,
        cfg: &InterfaceConfig,
        peers: &[PeerConfig],
    ) -> Result<(), StoreError> {
        self.modify(|s| s.put_interface(cfg, peers)).await
    }

    async fn save_peer(
        &self,
        peer: &PeerConfig,
        interface: &InterfaceIdentifier,
    ) -> Result<(), StoreError> {
        self.modify(|s| s.put_peer(peer, interface)).await
    }

    async fn delete_interface(&self, id: &InterfaceIdentifier) -> Result<(), StoreError> {
        self.modify(|s| s.remove_interface(id)).await
    }

    async fn delete_peer(
        &self,
        peer: &PeerIdentifier,
        interface: &InterfaceIdentifier,
    ) -> Result<(), StoreError> {
        self.modify(|s| s.remove_peer(peer, interface)).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::InterfaceBackend;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        assert_eq!(store.load_all().await.unwrap(), StoreSnapshot::default());
    }

    #[tokio::test]
    async fn writes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let store = JsonFileStore::new(&path);

        let iface = InterfaceConfig::new("wg0".into(), InterfaceBackend::local());
        let peer = PeerConfig {
            identifier: "peer-a".into(),
            ..PeerConfig::default()
        };
        store.save_interface(&iface, &[]).await.unwrap();
        store.save_peer(&peer, &iface.identifier).await.unwrap();

        let reopened = JsonFileStore::new(&path).load_all().await.unwrap();
        assert_eq!(reopened.interfaces.len(), 1);
        assert_eq!(reopened.peer_count(), 1);
        let stored = &reopened.peers[&iface.identifier][&peer.identifier];
        assert_eq!(stored.interface_identifier, iface.identifier);

        store.delete_peer(&peer.identifier, &iface.identifier).await.unwrap();
        store.delete_interface(&iface.identifier).await.unwrap();
        assert_eq!(store.load_all().await.unwrap(), StoreSnapshot::default());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{not json").unwrap();
        let err = JsonFileStore::new(&path).load_all().await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
