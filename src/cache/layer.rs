// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cached view over a [`CatalogStore`].
//!
//! Full name sets (one per catalog) and per-base variant lists are served
//! from single-flight caches. Entry lookups go straight to the inner store.
//! After a mutation reports a change, cached sets are patched rather than
//! dropped; a set that isn't cached stays uncached.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::policy::ExpirationPolicy;
use super::single_flight::{CacheStats, SingleFlightCache, SingletonCache};
use crate::catalog::{
    BlendName, BlendValue, CompoundBase, CompoundInfo, CompoundName, CompoundPatch, FrequencyName,
    FrequencyValue,
};
use crate::storage::traits::{
    CatalogEntries, CatalogStore, DeleteRequest, DeleteTarget, StorageError,
};

/// Remove the names a delete target covers from a cached set.
fn remove_target<K: Ord + Clone>(set: &BTreeSet<K>, target: &DeleteTarget<K>) -> BTreeSet<K> {
    match target {
        DeleteTarget::None => set.clone(),
        DeleteTarget::All => BTreeSet::new(),
        DeleteTarget::Subset(names) => set.difference(names).cloned().collect(),
    }
}

fn insert_all<K: Ord + Clone>(set: &BTreeSet<K>, added: &BTreeSet<K>) -> BTreeSet<K> {
    set.union(added).cloned().collect()
}

pub struct CachedCatalogStore {
    inner: Arc<dyn CatalogStore>,
    compound_names: SingletonCache<BTreeSet<CompoundName>>,
    blend_names: SingletonCache<BTreeSet<BlendName>>,
    frequency_names: SingletonCache<BTreeSet<FrequencyName>>,
    variants: SingleFlightCache<CompoundBase, BTreeSet<String>>,
}

impl CachedCatalogStore {
    pub fn new(
        inner: Arc<dyn CatalogStore>,
        names_policy: ExpirationPolicy,
        variants_policy: ExpirationPolicy,
    ) -> Self {
        Self {
            inner,
            compound_names: SingletonCache::new("compound_names", names_policy),
            blend_names: SingletonCache::new("blend_names", names_policy),
            frequency_names: SingletonCache::new("frequency_names", names_policy),
            variants: SingleFlightCache::new("variants", variants_policy),
        }
    }

    pub fn inner(&self) -> &Arc<dyn CatalogStore> {
        &self.inner
    }

    /// Drop every cached entry.
    pub fn invalidate_all(&self) {
        self.compound_names.invalidate();
        self.blend_names.invalidate();
        self.frequency_names.invalidate();
        self.variants.invalidate_all();
        debug!("Invalidated all catalog caches");
    }

    pub fn stats(&self) -> BTreeMap<&'static str, CacheStats> {
        BTreeMap::from([
            (self.compound_names.name(), self.compound_names.stats()),
            (self.blend_names.name(), self.blend_names.stats()),
            (self.frequency_names.name(), self.frequency_names.stats()),
            (self.variants.name(), self.variants.stats()),
        ])
    }

    fn after_put(&self, compounds: &BTreeSet<CompoundName>, blends: &BTreeSet<BlendName>, frequencies: &BTreeSet<FrequencyName>) {
        if !compounds.is_empty() {
            self.compound_names.patch(|set| insert_all(set, compounds));
            for name in compounds {
                self.variants.patch(name.base(), |variants| {
                    let mut variants = variants.clone();
                    variants.insert(name.variant().to_string());
                    variants
                });
            }
        }
        if !blends.is_empty() {
            self.blend_names.patch(|set| insert_all(set, blends));
        }
        if !frequencies.is_empty() {
            self.frequency_names.patch(|set| insert_all(set, frequencies));
        }
    }

    fn after_delete(&self, request: &DeleteRequest) {
        match &request.compounds {
            DeleteTarget::None => {}
            DeleteTarget::All => {
                self.compound_names.patch(|_| BTreeSet::new());
                self.variants.invalidate_all();
            }
            DeleteTarget::Subset(names) => {
                self.compound_names.patch(|set| {
                    set.iter()
                        .filter(|present| !names.iter().any(|query| query.matches(present)))
                        .cloned()
                        .collect()
                });
                for name in names {
                    self.variants.patch(name.base(), |variants| {
                        if name.selects_all_variants() {
                            BTreeSet::new()
                        } else {
                            let mut variants = variants.clone();
                            variants.remove(name.variant());
                            variants
                        }
                    });
                }
            }
        }
        if !request.blends.is_noop() {
            self.blend_names.patch(|set| remove_target(set, &request.blends));
        }
        if !request.frequencies.is_noop() {
            self.frequency_names
                .patch(|set| remove_target(set, &request.frequencies));
        }
    }
}

#[async_trait]
impl CatalogStore for CachedCatalogStore {
    async fn compound_names(&self) -> Result<BTreeSet<CompoundName>, StorageError> {
        self.compound_names
            .get_or_load(|| self.inner.compound_names())
            .await
    }

    async fn blend_names(&self) -> Result<BTreeSet<BlendName>, StorageError> {
        self.blend_names.get_or_load(|| self.inner.blend_names()).await
    }

    async fn frequency_names(&self) -> Result<BTreeSet<FrequencyName>, StorageError> {
        self.frequency_names
            .get_or_load(|| self.inner.frequency_names())
            .await
    }

    async fn compounds(
        &self,
        names: &BTreeSet<CompoundName>,
    ) -> Result<BTreeMap<CompoundName, CompoundInfo>, StorageError> {
        self.inner.compounds(names).await
    }

    async fn blends(
        &self,
        names: &BTreeSet<BlendName>,
    ) -> Result<BTreeMap<BlendName, BlendValue>, StorageError> {
        self.inner.blends(names).await
    }

    async fn frequencies(
        &self,
        names: &BTreeSet<FrequencyName>,
    ) -> Result<BTreeMap<FrequencyName, FrequencyValue>, StorageError> {
        self.inner.frequencies(names).await
    }

    async fn put_bulk(&self, entries: CatalogEntries) -> Result<bool, StorageError> {
        let compounds: BTreeSet<CompoundName> = entries.compounds.keys().cloned().collect();
        let blends: BTreeSet<BlendName> = entries.blends.keys().cloned().collect();
        let frequencies: BTreeSet<FrequencyName> = entries.frequencies.keys().cloned().collect();

        let changed = self.inner.put_bulk(entries).await?;
        if changed {
            self.after_put(&compounds, &blends, &frequencies);
        }
        Ok(changed)
    }

    async fn update_compounds(
        &self,
        patches: BTreeMap<CompoundName, CompoundPatch>,
    ) -> Result<bool, StorageError> {
        // Field patches never add or remove names
        self.inner.update_compounds(patches).await
    }

    async fn delete_bulk(&self, request: DeleteRequest) -> Result<bool, StorageError> {
        let changed = self.inner.delete_bulk(request.clone()).await?;
        if changed {
            self.after_delete(&request);
        }
        Ok(changed)
    }

    async fn is_empty(&self) -> Result<bool, StorageError> {
        self.inner.is_empty().await
    }

    async fn compound_names_changed_since(
        &self,
        since_ms: i64,
    ) -> Result<BTreeSet<CompoundName>, StorageError> {
        self.inner.compound_names_changed_since(since_ms).await
    }

    async fn blend_names_changed_since(
        &self,
        since_ms: i64,
    ) -> Result<BTreeSet<BlendName>, StorageError> {
        self.inner.blend_names_changed_since(since_ms).await
    }

    async fn frequency_names_changed_since(
        &self,
        since_ms: i64,
    ) -> Result<BTreeSet<FrequencyName>, StorageError> {
        self.inner.frequency_names_changed_since(since_ms).await
    }

    async fn compound_variants(&self, base: &CompoundBase) -> Result<BTreeSet<String>, StorageError> {
        self.variants
            .get_or_load(base.clone(), || self.inner.compound_variants(base))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryCatalogStore;
    use std::time::Duration;

    fn compound(wire: &str) -> CompoundName {
        wire.parse().unwrap()
    }

    fn info(hours: u64) -> CompoundInfo {
        CompoundInfo::with_half_life(Duration::from_secs(hours * 3600)).unwrap()
    }

    fn cached() -> (CachedCatalogStore, Arc<InMemoryCatalogStore>) {
        let inner = Arc::new(InMemoryCatalogStore::new());
        let store = CachedCatalogStore::new(
            inner.clone(),
            ExpirationPolicy::never(),
            ExpirationPolicy::never(),
        );
        (store, inner)
    }

    #[tokio::test]
    async fn test_put_patches_loaded_name_set() {
        let (store, _inner) = cached();
        store.put_compound(compound("t=a"), info(24)).await.unwrap();
        assert_eq!(store.compound_names().await.unwrap().len(), 1);

        store.put_compound(compound("t=b"), info(48)).await.unwrap();
        let names: Vec<String> = store
            .compound_names()
            .await
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(names, vec!["t=a", "t=b"]);
        // One load, then served from the patched entry
        assert_eq!(store.stats()["compound_names"].loads, 1);
    }

    #[tokio::test]
    async fn test_unloaded_sets_stay_unloaded() {
        let (store, _inner) = cached();
        store
            .put_frequency(
                FrequencyName::new("daily").unwrap(),
                FrequencyValue::every(Duration::from_secs(86_400)).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(store.stats()["frequency_names"].entry_count, 0);
        assert_eq!(store.frequency_names().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_patches_names_and_variants() {
        let (store, _inner) = cached();
        store.put_compound(compound("t=a"), info(24)).await.unwrap();
        store.put_compound(compound("t=b"), info(48)).await.unwrap();
        let base = CompoundBase::new("t").unwrap();
        assert_eq!(store.compound_variants(&base).await.unwrap().len(), 2);
        store.compound_names().await.unwrap();

        store
            .delete_compounds(DeleteTarget::subset([compound("t=a")]))
            .await
            .unwrap();
        let variants: Vec<String> = store.compound_variants(&base).await.unwrap().into_iter().collect();
        assert_eq!(variants, vec!["b"]);
        assert_eq!(store.compound_names().await.unwrap().len(), 1);

        store.delete_compounds(DeleteTarget::All).await.unwrap();
        assert!(store.compound_names().await.unwrap().is_empty());
        assert!(store.compound_variants(&base).await.unwrap().is_empty());
        assert_eq!(store.stats()["compound_names"].loads, 1);
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_cache_alone() {
        let (store, _inner) = cached();
        store.put_compound(compound("t=a"), info(24)).await.unwrap();
        store
            .put_blend(
                BlendName::new("mix").unwrap(),
                BlendValue::from_pairs([("t=a", 1.0), ("t=a2", 1.0)]).unwrap(),
            )
            .await
            .unwrap_err();
        assert!(store.blend_names().await.unwrap().is_empty());
    }
}
