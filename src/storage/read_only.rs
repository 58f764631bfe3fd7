// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Read-only view over another store, for demos and tests against live data.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::traits::{CatalogEntries, CatalogStore, DeleteRequest, StorageError};
use crate::catalog::{
    BlendName, BlendValue, CompoundBase, CompoundInfo, CompoundName, CompoundPatch, FrequencyName,
    FrequencyValue,
};

/// Delegates every read; every mutation fails with
/// [`StorageError::Unsupported`] without reaching the inner store.
pub struct ReadOnlyStore {
    inner: Arc<dyn CatalogStore>,
}

impl ReadOnlyStore {
    pub fn new(inner: Arc<dyn CatalogStore>) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &Arc<dyn CatalogStore> {
        &self.inner
    }

    fn reject(operation: &'static str) -> Result<bool, StorageError> {
        warn!(operation, "Rejected mutation on read-only store");
        Err(StorageError::Unsupported(operation))
    }
}

#[async_trait]
impl CatalogStore for ReadOnlyStore {
    async fn compound_names(&self) -> Result<BTreeSet<CompoundName>, StorageError> {
        self.inner.compound_names().await
    }

    async fn blend_names(&self) -> Result<BTreeSet<BlendName>, StorageError> {
        self.inner.blend_names().await
    }

    async fn frequency_names(&self) -> Result<BTreeSet<FrequencyName>, StorageError> {
        self.inner.frequency_names().await
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

    async fn put_bulk(&self, _entries: CatalogEntries) -> Result<bool, StorageError> {
        Self::reject("put_bulk")
    }

    async fn update_compounds(
        &self,
        _patches: BTreeMap<CompoundName, CompoundPatch>,
    ) -> Result<bool, StorageError> {
        Self::reject("update_compounds")
    }

    async fn delete_bulk(&self, _request: DeleteRequest) -> Result<bool, StorageError> {
        Self::reject("delete_bulk")
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
        self.inner.compound_variants(base).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryCatalogStore;
    use crate::storage::traits::DeleteTarget;
    use std::time::Duration;

    #[tokio::test]
    async fn test_reads_pass_through_and_writes_fail() {
        let inner = InMemoryCatalogStore::new();
        let name = FrequencyName::new("daily").unwrap();
        inner
            .put_frequency(name.clone(), FrequencyValue::every(Duration::from_secs(86_400)).unwrap())
            .await
            .unwrap();

        let store = ReadOnlyStore::new(Arc::new(inner));
        assert!(store.frequency(&name).await.unwrap().is_some());

        let err = store.delete_frequencies(DeleteTarget::All).await.unwrap_err();
        assert!(matches!(err, StorageError::Unsupported("delete_bulk")));
        let err = store
            .put_frequency(FrequencyName::new("weekly").unwrap(), FrequencyValue::every(Duration::from_secs(1)).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Unsupported("put_bulk")));
        assert!(store.update_compounds(BTreeMap::new()).await.is_err());

        // Inner store untouched
        assert_eq!(store.inner().frequency_names().await.unwrap().len(), 1);
    }
}
