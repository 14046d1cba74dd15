// ── Startup reconciliation ──
//
// Device changes happen before persistence, so a crash in between leaves
// the two sides apart. This pass brings them back together: objects only
// found live are imported and persisted, objects only found in the store
// are pushed again. Nothing is ever deleted, and a failing object is
// counted and skipped. A live interface that shares its name with one
// stored for another backend is a conflict: it is counted and left alone.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{Orchestrator, State, interface_transform, peer_transform};
use crate::backend::ControllerBackend;
use crate::error::CoreError;
use crate::model::{InterfaceConfig, InterfaceIdentifier, PeerIdentifier, PhysicalInterface};

/// What a reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub interfaces_imported: usize,
    pub peers_imported: usize,
    pub interfaces_repaired: usize,
    pub peers_repaired: usize,
    /// Live interfaces whose name is stored under another backend.
    pub conflicts: usize,
    pub failures: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "imported {} interface(s) and {} peer(s), repaired {} interface(s) and {} peer(s), {} conflict(s), {} failure(s)",
            self.interfaces_imported,
            self.peers_imported,
            self.interfaces_repaired,
            self.peers_repaired,
            self.conflicts,
            self.failures
        )
    }
}

impl Orchestrator {
    /// Compare every backend's live state with the stored state and close
    /// the gaps in both directions.
    pub async fn reconcile(&self) -> ReconcileReport {
        let mut state = self.inner.state.write().await;
        let mut report = ReconcileReport::default();

        for backend in self.inner.backends.iter() {
            let live = match backend.get_interfaces().await {
                Ok(live) => live,
                Err(e) => {
                    warn!(backend = %backend.id(), error = %e, "cannot list interfaces, skipping backend");
                    report.failures += 1;
                    continue;
                }
            };
            let live_ids: BTreeSet<InterfaceIdentifier> =
                live.iter().map(|pi| pi.identifier.clone()).collect();

            for pi in &live {
                let owner = state.interfaces.get(&pi.identifier).map(|cfg| cfg.backend.clone());
                let result = match owner {
                    None => {
                        self.import_interface(backend, pi, &mut state, &mut report)
                            .await
                    }
                    Some(owner) if &owner == backend.id() => {
                        self.reconcile_peers(backend, &pi.identifier, &mut state, &mut report)
                            .await
                    }
                    Some(owner) => {
                        warn!(
                            backend = %backend.id(),
                            interface = %pi.identifier,
                            stored_backend = %owner,
                            "live interface name is stored for another backend, leaving it alone"
                        );
                        report.conflicts += 1;
                        continue;
                    }
                };
                if let Err(e) = result {
                    warn!(backend = %backend.id(), interface = %pi.identifier, error = %e, "reconciliation failed");
                    report.failures += 1;
                }
            }

            let stored_only: Vec<InterfaceConfig> = state
                .interfaces
                .values()
                .filter(|cfg| &cfg.backend == backend.id() && !live_ids.contains(&cfg.identifier))
                .cloned()
                .collect();
            for cfg in stored_only {
                if let Err(e) = self.repair_interface(backend, &cfg, &state, &mut report).await {
                    warn!(backend = %backend.id(), interface = %cfg.identifier, error = %e, "cannot restore interface");
                    report.failures += 1;
                }
            }
        }

        for cfg in state.interfaces.values() {
            if self.inner.backends.get(&cfg.backend).is_err() {
                warn!(interface = %cfg.identifier, backend = %cfg.backend, "stored interface belongs to an unknown backend");
                report.failures += 1;
            }
        }

        info!(%report, "reconciliation finished");
        report
    }

    /// Adopt a live interface and all of its peers.
    async fn import_interface(
        &self,
        backend: &Arc<dyn ControllerBackend>,
        pi: &PhysicalInterface,
        state: &mut State,
        report: &mut ReconcileReport,
    ) -> Result<(), CoreError> {
        let cfg = backend.import_interface(pi);
        let peers: Vec<_> = backend
            .get_peers(&pi.identifier)
            .await?
            .iter()
            .map(|pp| backend.import_peer(pp, &cfg))
            .collect();

        self.inner
            .store
            .save_interface(&cfg, &peers)
            .await
            .map_err(CoreError::persistence(format!("save imported interface {}", cfg.identifier)))?;

        info!(backend = %backend.id(), interface = %cfg.identifier, peers = peers.len(), "imported live interface");
        report.interfaces_imported += 1;
        report.peers_imported += peers.len();
        state.peers.insert(
            cfg.identifier.clone(),
            peers.into_iter().map(|p| (p.identifier.clone(), p)).collect(),
        );
        state.interfaces.insert(cfg.identifier.clone(), cfg);
        Ok(())
    }

    /// Import live-only peers and push stored-only enabled peers of an
    /// interface both sides know. The stored interface must belong to
    /// `backend`.
    async fn reconcile_peers(
        &self,
        backend: &Arc<dyn ControllerBackend>,
        id: &InterfaceIdentifier,
        state: &mut State,
        report: &mut ReconcileReport,
    ) -> Result<(), CoreError> {
        let live = backend.get_peers(id).await?;
        let live_ids: BTreeSet<&PeerIdentifier> = live.iter().map(|pp| &pp.identifier).collect();
        let cfg = state.interface(id)?.clone();
        let stored = state.peers.entry(id.clone()).or_default();

        for pp in &live {
            if stored.contains_key(&pp.identifier) {
                continue;
            }
            let peer = backend.import_peer(pp, &cfg);
            match self.inner.store.save_peer(&peer, id).await {
                Ok(()) => {
                    debug!(interface = %id, peer = %peer.identifier, "imported live peer");
                    report.peers_imported += 1;
                    stored.insert(peer.identifier.clone(), peer);
                }
                Err(e) => {
                    warn!(interface = %id, peer = %pp.identifier, error = %e, "cannot persist imported peer");
                    report.failures += 1;
                }
            }
        }

        for peer in stored.values() {
            if peer.is_disabled() || live_ids.contains(&peer.identifier) {
                continue;
            }
            let transform = peer_transform(peer, backend.peer_extras(peer));
            match backend.save_peer(id, &peer.identifier, transform).await {
                Ok(()) => {
                    debug!(interface = %id, peer = %peer.identifier, "restored missing peer");
                    report.peers_repaired += 1;
                }
                Err(e) => {
                    warn!(interface = %id, peer = %peer.identifier, error = %e, "cannot restore peer");
                    report.failures += 1;
                }
            }
        }
        Ok(())
    }

    /// Recreate a stored interface that vanished from its backend.
    async fn repair_interface(
        &self,
        backend: &Arc<dyn ControllerBackend>,
        cfg: &InterfaceConfig,
        state: &State,
        report: &mut ReconcileReport,
    ) -> Result<(), CoreError> {
        backend
            .save_interface(&cfg.identifier, interface_transform(cfg, backend.interface_extras(cfg)))
            .await?;
        info!(backend = %backend.id(), interface = %cfg.identifier, "restored missing interface");
        report.interfaces_repaired += 1;

        for peer in state.peers_of(&cfg.identifier).filter(|p| !p.is_disabled()) {
            let transform = peer_transform(peer, backend.peer_extras(peer));
            match backend.save_peer(&cfg.identifier, &peer.identifier, transform).await {
                Ok(()) => report.peers_repaired += 1,
                Err(e) => {
                    warn!(interface = %cfg.identifier, peer = %peer.identifier, error = %e, "cannot restore peer");
                    report.failures += 1;
                }
            }
        }
        Ok(())
    }
}
