// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Startup: connect, verify, seed.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use super::{CatalogCoordinator, CoordinatorState};
use crate::cache::CachedCatalogStore;
use crate::catalog::{Catalog, CatalogSnapshot};
use crate::diff::FullDiffData;
use crate::revision::memory::InMemoryRevisionLog;
use crate::revision::sql::SqlRevisionLog;
use crate::revision::RevisionLog;
use crate::seed::SeedDocument;
use crate::storage::memory::InMemoryCatalogStore;
use crate::storage::read_only::ReadOnlyStore;
use crate::storage::sql::SqlCatalogStore;
use crate::storage::traits::{CatalogEntries, CatalogStore, StorageError};

/// Read every entry of every catalog.
pub(super) async fn read_all(store: &dyn CatalogStore) -> Result<CatalogSnapshot, StorageError> {
    let compounds = store.compound_names().await?;
    let blends = store.blend_names().await?;
    let frequencies = store.frequency_names().await?;
    Ok(CatalogSnapshot {
        compounds: store.compounds(&compounds).await?,
        blends: store.blends(&blends).await?,
        frequencies: store.frequencies(&frequencies).await?,
    })
}

/// Entries a diff adds, as a bulk put.
pub(super) fn entries_added(diff: &FullDiffData) -> CatalogEntries {
    CatalogEntries {
        compounds: diff.compounds.add.clone(),
        blends: diff.blends.add.clone(),
        frequencies: diff.frequencies.add.clone(),
    }
}

impl CatalogCoordinator {
    /// Start the coordinator.
    ///
    /// Startup flow:
    /// 1. Connect to SQL (or use in-memory / provided backends), wrap
    ///    read-only if configured, put the cache layer in front
    /// 2. Verify: a catalog table that is empty while the head snapshot has
    ///    entries for it, or stored blends referencing missing compounds,
    ///    mean corruption, and startup aborts
    /// 3. Seed: an empty store with an empty log is loaded from the seed
    ///    document as revision 1; a non-empty store with an empty log has
    ///    its contents recorded as revision 1
    /// 4. Ready
    #[tracing::instrument(skip(self), fields(object_type = %self.object_type))]
    pub async fn start(&mut self) -> Result<(), StorageError> {
        let startup_start = Instant::now();
        info!("Starting catalog coordinator");

        // ========== PHASE 1: Connect ==========
        let phase_start = Instant::now();
        let _ = self.state.send(CoordinatorState::Connecting);
        let (store, log) = self.connect().await?;
        let store: Arc<dyn CatalogStore> = if self.config.read_only {
            info!("Read-only mode: mutations will be rejected");
            Arc::new(ReadOnlyStore::new(store))
        } else {
            store
        };
        let cached = Arc::new(CachedCatalogStore::new(
            store,
            self.config.names_policy(),
            self.config.variants_policy(),
        ));
        crate::metrics::record_startup_phase("connect", phase_start.elapsed());

        // ========== PHASE 2: Verify ==========
        let phase_start = Instant::now();
        let _ = self.state.send(CoordinatorState::Verifying);
        let stored = read_all(cached.as_ref()).await?;
        let head = log.head_snapshot(&self.object_type).await?;
        if let Some((revision, snapshot)) = &head {
            self.verify_against_head(*revision, snapshot, &stored)?;
        }
        if let Err(e) = stored.check_integrity(&stored) {
            error!(error = %e, "Stored blends reference missing compounds");
            return Err(StorageError::Inconsistent(format!(
                "stored catalogs of '{}' are not self-consistent: {e}",
                self.object_type
            )));
        }
        crate::metrics::record_startup_phase("verify", phase_start.elapsed());

        // ========== PHASE 3: Seed / bootstrap ==========
        let phase_start = Instant::now();
        let _ = self.state.send(CoordinatorState::Seeding);
        let (revision, snapshot) = match head {
            Some((revision, snapshot)) => {
                if stored != snapshot {
                    warn!(
                        revision,
                        "Store contents differ from the head snapshot; serving store contents"
                    );
                }
                (Some(revision), stored)
            }
            None if stored.is_empty() => self.seed(cached.as_ref(), log.as_ref()).await?,
            None => self.bootstrap(stored, log.as_ref()).await?,
        };
        crate::metrics::record_startup_phase("seed", phase_start.elapsed());

        self.store = Some(cached);
        self.log = Some(log);
        self.set_head(revision, snapshot);
        let _ = self.state.send(CoordinatorState::Ready);

        crate::metrics::record_startup_phase("total", startup_start.elapsed());
        info!(
            head = ?revision,
            startup_ms = startup_start.elapsed().as_millis() as u64,
            "Catalog coordinator ready"
        );
        Ok(())
    }

    async fn connect(
        &mut self,
    ) -> Result<(Arc<dyn CatalogStore>, Arc<dyn RevisionLog>), StorageError> {
        if let Some(provided) = self.provided.take() {
            info!("Using provided backends");
            return Ok(provided);
        }
        match self.config.sql_url.as_deref() {
            Some(url) => {
                let store = SqlCatalogStore::new(url, self.config.max_connections)
                    .await
                    .map_err(|e| {
                        error!(error = %e, "Failed to connect to SQL");
                        e
                    })?;
                let log = SqlRevisionLog::new(store.pool(), store.is_sqlite()).await?;
                info!("SQL store and revision log connected");
                Ok((Arc::new(store), Arc::new(log)))
            }
            None => {
                warn!("No SQL URL configured - catalogs will not survive a restart");
                Ok((
                    Arc::new(InMemoryCatalogStore::new()),
                    Arc::new(InMemoryRevisionLog::new()),
                ))
            }
        }
    }

    /// A catalog table that is empty while the head snapshot has entries for
    /// it means the table was lost, not that the catalog is new.
    fn verify_against_head(
        &self,
        revision: u64,
        snapshot: &CatalogSnapshot,
        stored: &CatalogSnapshot,
    ) -> Result<(), StorageError> {
        for (catalog, stored_empty, snapshot_len) in [
            (Catalog::Compounds, stored.compounds.is_empty(), snapshot.compounds.len()),
            (Catalog::Blends, stored.blends.is_empty(), snapshot.blends.len()),
            (Catalog::Frequencies, stored.frequencies.is_empty(), snapshot.frequencies.len()),
        ] {
            if stored_empty && snapshot_len > 0 {
                error!(
                    %catalog,
                    revision,
                    expected = snapshot_len,
                    "Catalog table is empty but the revision log is not"
                );
                return Err(StorageError::Inconsistent(format!(
                    "{catalog} table is empty but revision {revision} of '{}' has {snapshot_len} entries",
                    self.object_type
                )));
            }
        }
        Ok(())
    }

    /// Load the seed into an empty store as revision 1.
    async fn seed(
        &self,
        store: &dyn CatalogStore,
        log: &dyn RevisionLog,
    ) -> Result<(Option<u64>, CatalogSnapshot), StorageError> {
        let Some(path) = self.config.seed_path.as_deref() else {
            info!("Store is empty and no seed is configured; starting empty");
            return Ok((None, CatalogSnapshot::default()));
        };
        if self.config.read_only {
            warn!(path, "Read-only mode: store is empty, seed not loaded");
            return Ok((None, CatalogSnapshot::default()));
        }

        let diff = SeedDocument::load(path).await?.into_diff()?;
        store.put_bulk(entries_added(&diff)).await?;
        let revision = log.append(&self.object_type, diff).await?;
        let snapshot = CatalogSnapshot::default().applied(&revision.diff);
        log.put_snapshot(&self.object_type, revision.revision, &snapshot)
            .await?;

        info!(
            revision = revision.revision,
            summary = %revision.diff.summarize(),
            "Seeded empty catalog"
        );
        Ok((Some(revision.revision), snapshot))
    }

    /// Record the contents of a store with no history as revision 1.
    async fn bootstrap(
        &self,
        snapshot: CatalogSnapshot,
        log: &dyn RevisionLog,
    ) -> Result<(Option<u64>, CatalogSnapshot), StorageError> {
        if self.config.read_only {
            info!("Read-only mode: not recording existing contents as a revision");
            return Ok((None, snapshot));
        }

        let revision = log
            .append(&self.object_type, FullDiffData::from_snapshot(snapshot.clone()))
            .await?;
        log.put_snapshot(&self.object_type, revision.revision, &snapshot)
            .await?;
        info!(
            revision = revision.revision,
            summary = %revision.diff.summarize(),
            "Recorded existing catalog contents"
        );
        Ok((Some(revision.revision), snapshot))
    }
}
