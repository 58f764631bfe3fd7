// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process catalog store.
//!
//! The whole state is an immutable snapshot behind an [`ArcSwap`]. A mutation
//! clones the snapshot, edits the copy and swaps the pointer, so readers never
//! lock and always see either the old or the new state in full. Writers are
//! serialized by a mutex.
//!
//! Unlike the SQL store this one can see every catalog at once, so it also
//! rejects blends whose components are not compounds.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::Mutex;

use super::now_millis;
use super::traits::{CatalogEntries, CatalogStore, DeleteRequest, DeleteTarget, StorageError};
use crate::catalog::{
    BlendName, BlendValue, CatalogSnapshot, CompoundInfo, CompoundName, CompoundPatch,
    FrequencyName, FrequencyValue, ValidationError,
};
use crate::metrics::{self, LatencyTimer};

#[derive(Debug, Clone)]
struct Stamped<V> {
    value: V,
    updated_at: i64,
}

#[derive(Debug, Clone, Default)]
struct CatalogState {
    compounds: BTreeMap<CompoundName, Stamped<CompoundInfo>>,
    blends: BTreeMap<BlendName, Stamped<BlendValue>>,
    frequencies: BTreeMap<FrequencyName, Stamped<FrequencyValue>>,
}

fn put_all<K: Ord + Clone, V: Clone + PartialEq>(
    map: &mut BTreeMap<K, Stamped<V>>,
    entries: &BTreeMap<K, V>,
    now: i64,
) -> bool {
    let mut changed = false;
    for (name, value) in entries {
        if map.get(name).is_some_and(|old| old.value == *value) {
            continue;
        }
        map.insert(
            name.clone(),
            Stamped {
                value: value.clone(),
                updated_at: now,
            },
        );
        changed = true;
    }
    changed
}

fn delete_matching<K: Ord, V>(
    map: &mut BTreeMap<K, Stamped<V>>,
    target: &DeleteTarget<K>,
    matches: impl Fn(&K, &K) -> bool,
) -> bool {
    match target {
        DeleteTarget::None => false,
        DeleteTarget::All => {
            let changed = !map.is_empty();
            map.clear();
            changed
        }
        DeleteTarget::Subset(names) => {
            let before = map.len();
            map.retain(|key, _| !names.iter().any(|name| matches(name, key)));
            map.len() != before
        }
    }
}

fn changed_since<K: Ord + Clone, V>(map: &BTreeMap<K, Stamped<V>>, since_ms: i64) -> BTreeSet<K> {
    map.iter()
        .filter(|(_, stamped)| stamped.updated_at >= since_ms)
        .map(|(name, _)| name.clone())
        .collect()
}

fn lookup<K: Ord + Clone, V: Clone>(
    map: &BTreeMap<K, Stamped<V>>,
    names: &BTreeSet<K>,
) -> BTreeMap<K, V> {
    names
        .iter()
        .filter_map(|name| map.get(name).map(|s| (name.clone(), s.value.clone())))
        .collect()
}

impl CatalogState {
    /// Every blend component must name an existing compound.
    fn check_integrity(&self, previous: &CatalogState) -> Result<(), ValidationError> {
        for (blend, stamped) in &self.blends {
            for compound in stamped.value.compound_names() {
                if self.compounds.contains_key(compound) {
                    continue;
                }
                let was_present = previous.compounds.contains_key(compound);
                let (blend, compound) = (blend.to_string(), compound.to_string());
                return Err(if was_present {
                    ValidationError::OrphanedBlend { blend, compound }
                } else {
                    ValidationError::UnknownComponent { blend, compound }
                });
            }
        }
        Ok(())
    }
}

pub struct InMemoryCatalogStore {
    state: ArcSwap<CatalogState>,
    write_lock: Mutex<()>,
}

impl InMemoryCatalogStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(CatalogState::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Full copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> CatalogSnapshot {
        let state = self.state.load();
        CatalogSnapshot {
            compounds: state.compounds.iter().map(|(k, s)| (k.clone(), s.value.clone())).collect(),
            blends: state.blends.iter().map(|(k, s)| (k.clone(), s.value.clone())).collect(),
            frequencies: state.frequencies.iter().map(|(k, s)| (k.clone(), s.value.clone())).collect(),
        }
    }

    /// Build a new state from the current one and publish it if it changed.
    fn mutate(
        &self,
        operation: &'static str,
        edit: impl FnOnce(&mut CatalogState) -> Result<bool, StorageError>,
    ) -> Result<bool, StorageError> {
        let _timer = LatencyTimer::new("memory", operation);
        let result = self.swap(edit);
        let status = if result.is_ok() { "success" } else { "error" };
        metrics::record_store_operation("memory", operation, status);
        result
    }

    fn swap(
        &self,
        edit: impl FnOnce(&mut CatalogState) -> Result<bool, StorageError>,
    ) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock();
        let current = self.state.load_full();
        let mut next = CatalogState::clone(&current);
        if !edit(&mut next)? {
            return Ok(false);
        }
        next.check_integrity(&current)?;
        self.state.store(Arc::new(next));
        Ok(true)
    }
}

impl Default for InMemoryCatalogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn compound_names(&self) -> Result<BTreeSet<CompoundName>, StorageError> {
        Ok(self.state.load().compounds.keys().cloned().collect())
    }

    async fn blend_names(&self) -> Result<BTreeSet<BlendName>, StorageError> {
        Ok(self.state.load().blends.keys().cloned().collect())
    }

    async fn frequency_names(&self) -> Result<BTreeSet<FrequencyName>, StorageError> {
        Ok(self.state.load().frequencies.keys().cloned().collect())
    }

    async fn compounds(
        &self,
        names: &BTreeSet<CompoundName>,
    ) -> Result<BTreeMap<CompoundName, CompoundInfo>, StorageError> {
        let state = self.state.load();
        Ok(state
            .compounds
            .iter()
            .filter(|(key, _)| names.iter().any(|name| name.matches(key)))
            .map(|(key, s)| (key.clone(), s.value.clone()))
            .collect())
    }

    async fn blends(
        &self,
        names: &BTreeSet<BlendName>,
    ) -> Result<BTreeMap<BlendName, BlendValue>, StorageError> {
        Ok(lookup(&self.state.load().blends, names))
    }

    async fn frequencies(
        &self,
        names: &BTreeSet<FrequencyName>,
    ) -> Result<BTreeMap<FrequencyName, FrequencyValue>, StorageError> {
        Ok(lookup(&self.state.load().frequencies, names))
    }

    async fn put_bulk(&self, entries: CatalogEntries) -> Result<bool, StorageError> {
        let now = now_millis();
        self.mutate("put_bulk", |state| {
            let mut changed = put_all(&mut state.compounds, &entries.compounds, now);
            changed |= put_all(&mut state.blends, &entries.blends, now);
            changed |= put_all(&mut state.frequencies, &entries.frequencies, now);
            Ok(changed)
        })
    }

    async fn update_compounds(
        &self,
        patches: BTreeMap<CompoundName, CompoundPatch>,
    ) -> Result<bool, StorageError> {
        let now = now_millis();
        self.mutate("update_compounds", |state| {
            let mut changed = false;
            for (name, patch) in &patches {
                let Some(stamped) = state.compounds.get_mut(name) else {
                    continue;
                };
                let patched = patch.apply(&stamped.value)?;
                if patched != stamped.value {
                    *stamped = Stamped {
                        value: patched,
                        updated_at: now,
                    };
                    changed = true;
                }
            }
            Ok(changed)
        })
    }

    async fn delete_bulk(&self, request: DeleteRequest) -> Result<bool, StorageError> {
        self.mutate("delete_bulk", |state| {
            let mut changed =
                delete_matching(&mut state.compounds, &request.compounds, |q, k| q.matches(k));
            changed |= delete_matching(&mut state.blends, &request.blends, |q, k| q == k);
            changed |= delete_matching(&mut state.frequencies, &request.frequencies, |q, k| q == k);
            Ok(changed)
        })
    }

    async fn is_empty(&self) -> Result<bool, StorageError> {
        let state = self.state.load();
        Ok(state.compounds.is_empty() && state.blends.is_empty() && state.frequencies.is_empty())
    }

    async fn compound_names_changed_since(
        &self,
        since_ms: i64,
    ) -> Result<BTreeSet<CompoundName>, StorageError> {
        Ok(changed_since(&self.state.load().compounds, since_ms))
    }

    async fn blend_names_changed_since(
        &self,
        since_ms: i64,
    ) -> Result<BTreeSet<BlendName>, StorageError> {
        Ok(changed_since(&self.state.load().blends, since_ms))
    }

    async fn frequency_names_changed_since(
        &self,
        since_ms: i64,
    ) -> Result<BTreeSet<FrequencyName>, StorageError> {
        Ok(changed_since(&self.state.load().frequencies, since_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const HOUR: Duration = Duration::from_secs(3600);

    fn compound(wire: &str) -> CompoundName {
        wire.parse().unwrap()
    }

    fn seeded() -> CatalogEntries {
        let mut entries = CatalogEntries::default();
        entries
            .compounds
            .insert(compound("t=a"), CompoundInfo::with_half_life(HOUR * 24).unwrap());
        entries
            .compounds
            .insert(compound("t=b"), CompoundInfo::with_half_life(HOUR * 48).unwrap());
        entries
    }

    fn mix() -> (BlendName, BlendValue) {
        (
            BlendName::new("Mix").unwrap(),
            BlendValue::from_pairs([("t=a", 1.0), ("t=b", 1.0)]).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = InMemoryCatalogStore::new();
        assert!(store.is_empty().await.unwrap());
        assert!(!store.delete_bulk(DeleteRequest::all()).await.unwrap());
    }

    #[tokio::test]
    async fn test_compounds_and_blend_in_one_bulk() {
        let store = InMemoryCatalogStore::new();
        let mut entries = seeded();
        let (name, value) = mix();
        entries.blends.insert(name, value);
        assert!(store.put_bulk(entries).await.unwrap());

        let blends: Vec<String> = store
            .blend_names()
            .await
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(blends, vec!["Mix"]);
    }

    #[tokio::test]
    async fn test_blend_with_unknown_component_rejected() {
        let store = InMemoryCatalogStore::new();
        let (name, value) = mix();
        let err = store.put_blend(name, value).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Validation(ValidationError::UnknownComponent { .. })
        ));
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_orphaning_compound_rejected() {
        let store = InMemoryCatalogStore::new();
        store.put_bulk(seeded()).await.unwrap();
        let (name, value) = mix();
        store.put_blend(name, value).await.unwrap();

        let err = store
            .delete_compounds(DeleteTarget::subset([compound("t=a")]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Validation(ValidationError::OrphanedBlend { .. })
        ));
        // State unchanged
        assert_eq!(store.compound_names().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_readers_keep_their_snapshot() {
        let store = InMemoryCatalogStore::new();
        store.put_bulk(seeded()).await.unwrap();

        let before = store.snapshot();
        store.delete_compounds(DeleteTarget::All).await.unwrap();
        assert_eq!(before.compounds.len(), 2);
        assert!(store.snapshot().compounds.is_empty());
    }

    #[tokio::test]
    async fn test_update_and_changed_since() {
        let store = InMemoryCatalogStore::new();
        store.put_bulk(seeded()).await.unwrap();
        let since = now_millis() + 1;

        tokio::time::sleep(Duration::from_millis(5)).await;
        let patches = BTreeMap::from([(compound("t=b"), CompoundPatch::note("slow ester"))]);
        assert!(store.update_compounds(patches).await.unwrap());

        let changed = store.compound_names_changed_since(since).await.unwrap();
        assert_eq!(changed, BTreeSet::from([compound("t=b")]));
    }

    #[test]
    fn test_mutations_are_counted_per_outcome() {
        use metrics_util::debugging::{DebugValue, DebuggingRecorder};

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let store = InMemoryCatalogStore::new();
        ::metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                store.put_bulk(seeded()).await.unwrap();
                let (name, value) = mix();
                store.put_blend(name, value).await.unwrap();
                store
                    .delete_compounds(DeleteTarget::subset([compound("t=a")]))
                    .await
                    .unwrap_err();
            });
        });

        let count = |operation: &str, status: &str| {
            snapshotter
                .snapshot()
                .into_vec()
                .into_iter()
                .find_map(|(key, _, _, value)| {
                    let key = key.key();
                    let labelled =
                        |k: &str, v: &str| key.labels().any(|l| l.key() == k && l.value() == v);
                    match value {
                        DebugValue::Counter(n)
                            if key.name() == "dose_catalog_store_operations_total"
                                && labelled("backend", "memory")
                                && labelled("operation", operation)
                                && labelled("status", status) =>
                        {
                            Some(n)
                        }
                        _ => None,
                    }
                })
        };
        assert_eq!(count("put_bulk", "success"), Some(2));
        assert_eq!(count("delete_bulk", "error"), Some(1));
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let store = Arc::new(InMemoryCatalogStore::new());
        let mut handles = Vec::new();
        for batch in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..10 {
                    let name = FrequencyName::new(format!("f{batch}-{i}")).unwrap();
                    let value = FrequencyValue::every(HOUR).unwrap();
                    store.put_frequency(name, value).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.frequency_names().await.unwrap().len(), 100);
    }
}
