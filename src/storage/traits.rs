// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The catalog store contract.
//!
//! Only the bulk operations are primitive. Single-item reads and writes are
//! provided methods that wrap them.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use thiserror::Error;

use crate::catalog::{
    BlendName, BlendValue, CompoundBase, CompoundInfo, CompoundName, CompoundPatch, FrequencyName,
    FrequencyValue, ValidationError,
};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Unsupported operation on read-only store: {0}")]
    Unsupported(&'static str),
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Failed to encode or decode stored data: {0}")]
    Codec(String),
    #[error("Inconsistent storage state: {0}")]
    Inconsistent(String),
    #[error("Seed error: {0}")]
    Seed(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// What a bulk delete removes from one catalog.
///
/// `Subset` of an empty set deletes nothing; it never means "everything".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteTarget<K> {
    None,
    All,
    Subset(BTreeSet<K>),
}

impl<K> Default for DeleteTarget<K> {
    fn default() -> Self {
        Self::None
    }
}

impl<K: Ord> DeleteTarget<K> {
    pub fn subset(names: impl IntoIterator<Item = K>) -> Self {
        Self::Subset(names.into_iter().collect())
    }

    /// Whether this target can't remove anything.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        match self {
            Self::None => true,
            Self::All => false,
            Self::Subset(names) => names.is_empty(),
        }
    }

    /// Names this target removes from a catalog currently holding `present`.
    pub fn resolve<'a>(&'a self, present: impl IntoIterator<Item = &'a K>) -> BTreeSet<&'a K> {
        match self {
            Self::None => BTreeSet::new(),
            Self::All => present.into_iter().collect(),
            Self::Subset(names) => names.iter().collect(),
        }
    }
}

/// Entries for a bulk insert-or-replace across all catalogs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogEntries {
    pub compounds: BTreeMap<CompoundName, CompoundInfo>,
    pub blends: BTreeMap<BlendName, BlendValue>,
    pub frequencies: BTreeMap<FrequencyName, FrequencyValue>,
}

impl CatalogEntries {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.compounds.is_empty() && self.blends.is_empty() && self.frequencies.is_empty()
    }
}

/// Targets for a bulk delete across all catalogs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteRequest {
    pub compounds: DeleteTarget<CompoundName>,
    pub blends: DeleteTarget<BlendName>,
    pub frequencies: DeleteTarget<FrequencyName>,
}

impl DeleteRequest {
    /// Delete everything in every catalog.
    #[must_use]
    pub fn all() -> Self {
        Self {
            compounds: DeleteTarget::All,
            blends: DeleteTarget::All,
            frequencies: DeleteTarget::All,
        }
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.compounds.is_noop() && self.blends.is_noop() && self.frequencies.is_noop()
    }
}

/// Transactional storage for the three catalogs.
///
/// Every mutation runs in one transaction and returns whether anything
/// actually changed. Missing names are omitted from bulk reads rather than
/// reported as errors. Implementations do not retry.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn compound_names(&self) -> Result<BTreeSet<CompoundName>, StorageError>;
    async fn blend_names(&self) -> Result<BTreeSet<BlendName>, StorageError>;
    async fn frequency_names(&self) -> Result<BTreeSet<FrequencyName>, StorageError>;

    /// Look up compounds. A name carrying the all-variants marker matches
    /// every variant of its base.
    async fn compounds(
        &self,
        names: &BTreeSet<CompoundName>,
    ) -> Result<BTreeMap<CompoundName, CompoundInfo>, StorageError>;
    async fn blends(
        &self,
        names: &BTreeSet<BlendName>,
    ) -> Result<BTreeMap<BlendName, BlendValue>, StorageError>;
    async fn frequencies(
        &self,
        names: &BTreeSet<FrequencyName>,
    ) -> Result<BTreeMap<FrequencyName, FrequencyValue>, StorageError>;

    /// Insert or replace entries across all catalogs in one transaction.
    async fn put_bulk(&self, entries: CatalogEntries) -> Result<bool, StorageError>;

    /// Patch individual compound fields. Unknown names are skipped.
    async fn update_compounds(
        &self,
        patches: BTreeMap<CompoundName, CompoundPatch>,
    ) -> Result<bool, StorageError>;

    async fn delete_bulk(&self, request: DeleteRequest) -> Result<bool, StorageError>;

    async fn is_empty(&self) -> Result<bool, StorageError>;

    /// Names created or updated at or after `since_ms` (epoch millis).
    async fn compound_names_changed_since(
        &self,
        since_ms: i64,
    ) -> Result<BTreeSet<CompoundName>, StorageError>;
    async fn blend_names_changed_since(
        &self,
        since_ms: i64,
    ) -> Result<BTreeSet<BlendName>, StorageError>;
    async fn frequency_names_changed_since(
        &self,
        since_ms: i64,
    ) -> Result<BTreeSet<FrequencyName>, StorageError>;

    /// Sorted variants of one compound base.
    async fn compound_variants(&self, base: &CompoundBase) -> Result<BTreeSet<String>, StorageError> {
        let query = BTreeSet::from([CompoundName::all_variants_of(base.clone())]);
        Ok(self
            .compounds(&query)
            .await?
            .into_keys()
            .map(|name| name.variant().to_string())
            .collect())
    }

    async fn compound(&self, name: &CompoundName) -> Result<Option<CompoundInfo>, StorageError> {
        let query = BTreeSet::from([name.clone()]);
        Ok(self.compounds(&query).await?.remove(name))
    }

    async fn blend(&self, name: &BlendName) -> Result<Option<BlendValue>, StorageError> {
        let query = BTreeSet::from([name.clone()]);
        Ok(self.blends(&query).await?.remove(name))
    }

    async fn frequency(&self, name: &FrequencyName) -> Result<Option<FrequencyValue>, StorageError> {
        let query = BTreeSet::from([name.clone()]);
        Ok(self.frequencies(&query).await?.remove(name))
    }

    async fn put_compound(&self, name: CompoundName, info: CompoundInfo) -> Result<bool, StorageError> {
        let mut entries = CatalogEntries::default();
        entries.compounds.insert(name, info);
        self.put_bulk(entries).await
    }

    async fn put_blend(&self, name: BlendName, value: BlendValue) -> Result<bool, StorageError> {
        let mut entries = CatalogEntries::default();
        entries.blends.insert(name, value);
        self.put_bulk(entries).await
    }

    async fn put_frequency(
        &self,
        name: FrequencyName,
        value: FrequencyValue,
    ) -> Result<bool, StorageError> {
        let mut entries = CatalogEntries::default();
        entries.frequencies.insert(name, value);
        self.put_bulk(entries).await
    }

    async fn delete_compounds(&self, target: DeleteTarget<CompoundName>) -> Result<bool, StorageError> {
        self.delete_bulk(DeleteRequest {
            compounds: target,
            ..Default::default()
        })
        .await
    }

    async fn delete_blends(&self, target: DeleteTarget<BlendName>) -> Result<bool, StorageError> {
        self.delete_bulk(DeleteRequest {
            blends: target,
            ..Default::default()
        })
        .await
    }

    async fn delete_frequencies(
        &self,
        target: DeleteTarget<FrequencyName>,
    ) -> Result<bool, StorageError> {
        self.delete_bulk(DeleteRequest {
            frequencies: target,
            ..Default::default()
        })
        .await
    }
}
