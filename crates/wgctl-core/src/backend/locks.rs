// ── Per-resource lock registry ──
//
// REST appliances have no compare-and-swap, so every get-or-create-then-
// push sequence runs under a lock keyed by the resource it touches.
// Locks are created on first use and live as long as the backend.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};

use crate::model::{InterfaceIdentifier, PeerIdentifier};

/// Lazily populated map from key to async mutex.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        self.handle(key).lock_owned().await
    }

    /// Number of keys ever locked.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    // Load-or-insert. The map shard guard is released before the caller awaits.
    fn handle(&self, key: &str) -> Arc<Mutex<()>> {
        if let Some(existing) = self.locks.get(key) {
            return Arc::clone(existing.value());
        }
        Arc::clone(self.locks.entry(key.to_owned()).or_default().value())
    }
}

/// The lock set each REST backend carries.
#[derive(Debug, Default)]
pub struct BackendLocks {
    interfaces: KeyedLocks,
    peers: KeyedLocks,
    core: Mutex<()>,
}

impl BackendLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn interface(&self, id: &InterfaceIdentifier) -> OwnedMutexGuard<()> {
        self.interfaces.lock(id.as_str()).await
    }

    pub async fn peer(
        &self,
        device: &InterfaceIdentifier,
        peer: &PeerIdentifier,
    ) -> OwnedMutexGuard<()> {
        self.peers.lock(&format!("{device}/{peer}")).await
    }

    /// Guard for backend-global settings (DNS, routing tables).
    pub async fn core(&self) -> MutexGuard<'_, ()> {
        self.core.lock().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let (locks, active, peak) = (locks.clone(), active.clone(), peak.clone());
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("wg0").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn peer_locks_are_scoped_per_device() {
        let locks = BackendLocks::new();
        let peer = PeerIdentifier::from("key");
        let _held = locks.peer(&"wg0".into(), &peer).await;
        let other = tokio::time::timeout(
            Duration::from_millis(100),
            locks.peer(&"wg1".into(), &peer),
        )
        .await;
        assert!(other.is_ok());
    }
}
