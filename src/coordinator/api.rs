// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reads, mutations and revision history.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, error, info, warn};

use super::lifecycle::entries_added;
use super::{CatalogCoordinator, MutationOutcome};
use crate::cache::CacheStats;
use crate::catalog::{
    BlendName, BlendValue, CatalogSnapshot, CompoundBase, CompoundInfo, CompoundName,
    CompoundPatch, FrequencyName, FrequencyValue,
};
use crate::diff::{compute_composite, Diff, DiffData, FullDiffData};
use crate::revision::Revision;
use crate::storage::traits::{
    CatalogEntries, CatalogStore, DeleteRequest, DeleteTarget, StorageError,
};

/// Names in `present` that a compound delete target removes. Subset names
/// carrying the all-variants marker expand to every variant of their base.
fn expand_compounds(
    target: &DeleteTarget<CompoundName>,
    present: &BTreeMap<CompoundName, CompoundInfo>,
) -> BTreeSet<CompoundName> {
    match target {
        DeleteTarget::None => BTreeSet::new(),
        DeleteTarget::All => present.keys().cloned().collect(),
        DeleteTarget::Subset(names) => present
            .keys()
            .filter(|key| names.iter().any(|name| name.matches(key)))
            .cloned()
            .collect(),
    }
}

fn expand<K: Ord + Clone, V>(target: &DeleteTarget<K>, present: &BTreeMap<K, V>) -> BTreeSet<K> {
    target
        .resolve(present.keys())
        .into_iter()
        .filter(|name| present.contains_key(*name))
        .cloned()
        .collect()
}

/// Names in `before` missing from `after`.
fn removed<K: Ord + Clone, V>(before: &BTreeMap<K, V>, after: &BTreeMap<K, V>) -> BTreeSet<K> {
    before
        .keys()
        .filter(|name| !after.contains_key(*name))
        .cloned()
        .collect()
}

impl CatalogCoordinator {
    // ═══════════════════════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════════════════════

    pub async fn compound_names(&self) -> Result<BTreeSet<CompoundName>, StorageError> {
        self.backends()?.0.compound_names().await
    }

    pub async fn blend_names(&self) -> Result<BTreeSet<BlendName>, StorageError> {
        self.backends()?.0.blend_names().await
    }

    pub async fn frequency_names(&self) -> Result<BTreeSet<FrequencyName>, StorageError> {
        self.backends()?.0.frequency_names().await
    }

    pub async fn compounds(
        &self,
        names: &BTreeSet<CompoundName>,
    ) -> Result<BTreeMap<CompoundName, CompoundInfo>, StorageError> {
        self.backends()?.0.compounds(names).await
    }

    pub async fn blends(
        &self,
        names: &BTreeSet<BlendName>,
    ) -> Result<BTreeMap<BlendName, BlendValue>, StorageError> {
        self.backends()?.0.blends(names).await
    }

    pub async fn frequencies(
        &self,
        names: &BTreeSet<FrequencyName>,
    ) -> Result<BTreeMap<FrequencyName, FrequencyValue>, StorageError> {
        self.backends()?.0.frequencies(names).await
    }

    pub async fn compound(&self, name: &CompoundName) -> Result<Option<CompoundInfo>, StorageError> {
        self.backends()?.0.compound(name).await
    }

    pub async fn blend(&self, name: &BlendName) -> Result<Option<BlendValue>, StorageError> {
        self.backends()?.0.blend(name).await
    }

    pub async fn frequency(&self, name: &FrequencyName) -> Result<Option<FrequencyValue>, StorageError> {
        self.backends()?.0.frequency(name).await
    }

    pub async fn compound_variants(&self, base: &CompoundBase) -> Result<BTreeSet<String>, StorageError> {
        self.backends()?.0.compound_variants(base).await
    }

    pub async fn is_empty(&self) -> Result<bool, StorageError> {
        self.backends()?.0.is_empty().await
    }

    pub async fn compound_names_changed_since(
        &self,
        since_ms: i64,
    ) -> Result<BTreeSet<CompoundName>, StorageError> {
        self.backends()?.0.compound_names_changed_since(since_ms).await
    }

    pub async fn blend_names_changed_since(
        &self,
        since_ms: i64,
    ) -> Result<BTreeSet<BlendName>, StorageError> {
        self.backends()?.0.blend_names_changed_since(since_ms).await
    }

    pub async fn frequency_names_changed_since(
        &self,
        since_ms: i64,
    ) -> Result<BTreeSet<FrequencyName>, StorageError> {
        self.backends()?.0.frequency_names_changed_since(since_ms).await
    }

    /// Hit/miss/load counters per cache.
    pub fn cache_stats(&self) -> BTreeMap<&'static str, CacheStats> {
        self.store
            .as_ref()
            .map(|store| store.stats())
            .unwrap_or_default()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Mutations
    // ═══════════════════════════════════════════════════════════════════════════

    /// Insert or replace entries across all catalogs in one transaction.
    ///
    /// Every blend in the resulting catalog must reference existing
    /// compounds; compounds and the blends using them may arrive together.
    pub async fn put_bulk(&self, entries: CatalogEntries) -> Result<MutationOutcome, StorageError> {
        let (store, _) = self.backends()?;
        let _guard = self.write_lock.lock().await;
        let before = self.head.load().snapshot.clone();

        let mut after = before.clone();
        after.compounds.extend(entries.compounds.clone());
        after.blends.extend(entries.blends.clone());
        after.frequencies.extend(entries.frequencies.clone());
        after.check_integrity(&before)?;

        let mut proposed = DiffData::default();
        proposed.compounds.add = entries.compounds.clone();
        proposed.blends.add = entries.blends.clone();
        proposed.frequencies.add = entries.frequencies.clone();

        let changed = store.put_bulk(entries).await?;
        self.record(changed, &before, &proposed).await
    }

    /// Patch compound fields. Unknown names are skipped.
    pub async fn update_compounds(
        &self,
        patches: BTreeMap<CompoundName, CompoundPatch>,
    ) -> Result<MutationOutcome, StorageError> {
        let (store, _) = self.backends()?;
        let _guard = self.write_lock.lock().await;
        let before = self.head.load().snapshot.clone();

        let mut proposed = DiffData::default();
        for (name, patch) in &patches {
            if let Some(current) = before.compounds.get(name) {
                proposed.compounds.add.insert(name.clone(), patch.apply(current)?);
            }
        }

        let changed = store.update_compounds(patches).await?;
        self.record(changed, &before, &proposed).await
    }

    /// Delete across all catalogs in one transaction.
    ///
    /// Fails with [`crate::catalog::ValidationError::OrphanedBlend`] if a
    /// remaining blend would reference a deleted compound.
    pub async fn delete_bulk(&self, request: DeleteRequest) -> Result<MutationOutcome, StorageError> {
        let (store, _) = self.backends()?;
        if request.is_noop() {
            return Ok(MutationOutcome::unchanged());
        }
        let _guard = self.write_lock.lock().await;
        let before = self.head.load().snapshot.clone();

        let mut proposed = DiffData::default();
        proposed.compounds.delete = expand_compounds(&request.compounds, &before.compounds);
        proposed.blends.delete = expand(&request.blends, &before.blends);
        proposed.frequencies.delete = expand(&request.frequencies, &before.frequencies);
        before
            .clone()
            .applied(&proposed.resolve(&before))
            .check_integrity(&before)?;

        let changed = store.delete_bulk(request).await?;
        self.record(changed, &before, &proposed).await
    }

    pub async fn put_compound(&self, name: CompoundName, info: CompoundInfo) -> Result<MutationOutcome, StorageError> {
        let mut entries = CatalogEntries::default();
        entries.compounds.insert(name, info);
        self.put_bulk(entries).await
    }

    pub async fn put_blend(&self, name: BlendName, value: BlendValue) -> Result<MutationOutcome, StorageError> {
        let mut entries = CatalogEntries::default();
        entries.blends.insert(name, value);
        self.put_bulk(entries).await
    }

    pub async fn put_frequency(
        &self,
        name: FrequencyName,
        value: FrequencyValue,
    ) -> Result<MutationOutcome, StorageError> {
        let mut entries = CatalogEntries::default();
        entries.frequencies.insert(name, value);
        self.put_bulk(entries).await
    }

    /// Record a revision for a change the store reported. Caller holds the
    /// write lock.
    async fn record(
        &self,
        changed: bool,
        before: &CatalogSnapshot,
        proposed: &DiffData,
    ) -> Result<MutationOutcome, StorageError> {
        if !changed {
            debug!("Mutation changed nothing; no revision recorded");
            return Ok(MutationOutcome::unchanged());
        }
        let (_, log) = self.backends()?;

        let diff = proposed.resolve(before);
        if diff.is_empty() {
            warn!("Store reported a change the head snapshot doesn't reflect; no revision recorded");
            return Ok(MutationOutcome {
                changed,
                ..Default::default()
            });
        }

        let revision = match log.append(&self.object_type, diff.clone()).await {
            Ok(revision) => revision,
            Err(e) => {
                error!(
                    error = %e,
                    summary = %diff.summarize(),
                    "Failed to record revision; rolling back store change"
                );
                self.roll_back(&diff).await;
                return Err(e);
            }
        };
        let snapshot = before.clone().applied(&revision.diff);
        if let Err(e) = log
            .put_snapshot(&self.object_type, revision.revision, &snapshot)
            .await
        {
            warn!(
                error = %e,
                revision = revision.revision,
                "Failed to cache snapshot; it will be rebuilt from the log"
            );
        }
        self.set_head(Some(revision.revision), snapshot);

        Ok(MutationOutcome {
            changed,
            revision: Some(revision.revision),
            summary: revision.diff.summarize(),
        })
    }

    /// Write `diff` to the store: puts first, then deletes of names the diff
    /// removes, so no step leaves a blend without its compounds.
    async fn write_through(&self, diff: &FullDiffData) -> Result<(), StorageError> {
        let (store, _) = self.backends()?;
        let entries = entries_added(diff);
        if !entries.is_empty() {
            store.put_bulk(entries).await?;
        }
        let request = DeleteRequest {
            compounds: DeleteTarget::subset(diff.compounds.removed_names().cloned()),
            blends: DeleteTarget::subset(diff.blends.removed_names().cloned()),
            frequencies: DeleteTarget::subset(diff.frequencies.removed_names().cloned()),
        };
        if !request.is_noop() {
            store.delete_bulk(request).await?;
        }
        Ok(())
    }

    /// Undo a store change that was already written. Works from a partly
    /// applied state too.
    async fn roll_back(&self, applied: &FullDiffData) {
        if let Err(e) = self.write_through(&applied.reverse()).await {
            error!(error = %e, "Rollback failed; store no longer matches the revision log");
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // History
    // ═══════════════════════════════════════════════════════════════════════════

    /// Revisions in `(after, up_to]`, revoked ones included.
    pub async fn revisions(&self, after: u64, up_to: Option<u64>) -> Result<Vec<Revision>, StorageError> {
        self.backends()?
            .1
            .revisions(&self.object_type, after, up_to)
            .await
    }

    /// Catalog contents as of `revision`.
    pub async fn snapshot_at(&self, revision: u64) -> Result<CatalogSnapshot, StorageError> {
        self.backends()?
            .1
            .snapshot_at(&self.object_type, revision)
            .await
    }

    /// Single diff equivalent to the live revisions in `(after, up_to]`.
    pub async fn composite(&self, after: u64, up_to: Option<u64>) -> Result<FullDiffData, StorageError> {
        self.backends()?
            .1
            .composite(&self.object_type, after, up_to)
            .await
    }

    /// Revoke a revision and bring the store back in line with the
    /// remaining history. Returns false if the revision doesn't exist or is
    /// already revoked.
    ///
    /// Fails without revoking if the remaining history would leave a blend
    /// referencing a missing compound, or with `Unsupported` in read-only
    /// mode. The store is corrected before the revision is flagged.
    pub async fn revoke(&self, revision: u64) -> Result<bool, StorageError> {
        let (_, log) = self.backends()?;
        if self.config.read_only {
            return Err(StorageError::Unsupported("revoke"));
        }
        let _guard = self.write_lock.lock().await;

        let history = log.revisions(&self.object_type, 0, None).await?;
        if !history.iter().any(|r| r.revision == revision && !r.revoked) {
            return Ok(false);
        }
        let remaining = compute_composite(
            history
                .iter()
                .filter(|r| !r.revoked && r.revision != revision)
                .map(|r| &r.diff),
        );
        let target = CatalogSnapshot::default().applied(&remaining);
        let before = self.head.load().snapshot.clone();
        target.check_integrity(&before)?;

        // Store first: a failed correction leaves the revision live
        let correction = DiffData {
            compounds: Diff {
                delete: removed(&before.compounds, &target.compounds),
                add: target.compounds.clone(),
            },
            blends: Diff {
                delete: removed(&before.blends, &target.blends),
                add: target.blends.clone(),
            },
            frequencies: Diff {
                delete: removed(&before.frequencies, &target.frequencies),
                add: target.frequencies.clone(),
            },
        }
        .resolve(&before);
        if let Err(e) = self.write_through(&correction).await {
            error!(error = %e, revision, "Failed to restore store contents; revision left live");
            self.roll_back(&correction).await;
            return Err(e);
        }

        match log.revoke(&self.object_type, revision).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(revision, "Revision was revoked concurrently; restoring store contents");
                self.roll_back(&correction).await;
                return Ok(false);
            }
            Err(e) => {
                error!(error = %e, revision, "Failed to revoke; restoring store contents");
                self.roll_back(&correction).await;
                return Err(e);
            }
        }

        let head = log.head(&self.object_type).await?;
        if let Some(head) = head {
            if let Err(e) = log.put_snapshot(&self.object_type, head, &target).await {
                warn!(error = %e, head, "Failed to cache snapshot; it will be rebuilt from the log");
            }
        }
        info!(revision, head = ?head, "Revoked revision and restored store contents");
        self.set_head(head, target);
        Ok(true)
    }
}
