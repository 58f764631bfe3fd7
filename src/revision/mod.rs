// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Revision log and materialized snapshots.
//!
//! Each object type has an append-only chain of revisions. Revision `n`
//! carries the [`FullDiffData`] that turns snapshot `n - 1` into snapshot `n`
//! and points at its parent. A bad revision is revoked (flagged), never
//! renumbered or removed; replay skips it.
//!
//! Replaying a long chain on every cold start is avoided with a snapshot
//! cache keyed by `(object type, revision)`:
//!
//! ```text
//! snapshot_at(n):
//!   (k, S_k) = nearest cached snapshot with k <= n   (or (0, {}))
//!   S_n      = apply(S_k, composite(diffs k+1..=n, skipping revoked))
//!   cache (n, S_n)
//! ```

pub mod memory;
pub mod sql;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{CatalogSnapshot, ObjectType};
use crate::diff::{compute_composite, FullDiffData};
use crate::storage::traits::StorageError;

/// One durable step of an object type's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub revision: u64,
    /// Epoch millis.
    pub created_at: i64,
    pub diff: FullDiffData,
    pub parent: Option<u64>,
    pub revoked: bool,
}

/// Append-only revision storage plus the snapshot cache.
#[async_trait]
pub trait RevisionLog: Send + Sync {
    /// Highest revision number ever assigned, revoked or not.
    async fn latest(&self, object_type: &ObjectType) -> Result<Option<u64>, StorageError>;

    /// Highest revision that is not revoked.
    async fn head(&self, object_type: &ObjectType) -> Result<Option<u64>, StorageError>;

    /// Record `diff` as the next revision, parented on the current head.
    async fn append(
        &self,
        object_type: &ObjectType,
        diff: FullDiffData,
    ) -> Result<Revision, StorageError>;

    /// Revisions in `(after, up_to]` in order, revoked ones included.
    async fn revisions(
        &self,
        object_type: &ObjectType,
        after: u64,
        up_to: Option<u64>,
    ) -> Result<Vec<Revision>, StorageError>;

    /// Flag a revision as revoked and drop cached snapshots that include it.
    /// Returns false if the revision doesn't exist or was already revoked.
    async fn revoke(&self, object_type: &ObjectType, revision: u64) -> Result<bool, StorageError>;

    /// Nearest cached snapshot at or below `at_or_below`.
    async fn cached_snapshot(
        &self,
        object_type: &ObjectType,
        at_or_below: u64,
    ) -> Result<Option<(u64, CatalogSnapshot)>, StorageError>;

    async fn put_snapshot(
        &self,
        object_type: &ObjectType,
        revision: u64,
        snapshot: &CatalogSnapshot,
    ) -> Result<(), StorageError>;

    /// Single diff equivalent to the live revisions in `(after, up_to]`.
    async fn composite(
        &self,
        object_type: &ObjectType,
        after: u64,
        up_to: Option<u64>,
    ) -> Result<FullDiffData, StorageError> {
        let revisions = self.revisions(object_type, after, up_to).await?;
        Ok(compute_composite(
            revisions.iter().filter(|r| !r.revoked).map(|r| &r.diff),
        ))
    }

    /// Materialize the catalogs as of `revision`, caching the result.
    async fn snapshot_at(
        &self,
        object_type: &ObjectType,
        revision: u64,
    ) -> Result<CatalogSnapshot, StorageError> {
        let (base, snapshot) = self
            .cached_snapshot(object_type, revision)
            .await?
            .unwrap_or_default();
        if base == revision {
            return Ok(snapshot);
        }
        let composite = self.composite(object_type, base, Some(revision)).await?;
        let snapshot = snapshot.applied(&composite);
        debug!(
            %object_type,
            from = base,
            to = revision,
            summary = %composite.summarize(),
            "Materialized snapshot"
        );
        self.put_snapshot(object_type, revision, &snapshot).await?;
        Ok(snapshot)
    }

    /// Snapshot at the current head, or `None` if nothing was ever recorded.
    async fn head_snapshot(
        &self,
        object_type: &ObjectType,
    ) -> Result<Option<(u64, CatalogSnapshot)>, StorageError> {
        match self.head(object_type).await? {
            Some(head) => Ok(Some((head, self.snapshot_at(object_type, head).await?))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use crate::catalog::{CompoundInfo, CompoundName, FrequencyName, FrequencyValue};
    use crate::diff::FullDiffData;

    pub fn add_compound(wire: &str, hours: u64) -> FullDiffData {
        let mut diff = FullDiffData::default();
        diff.compounds.add.insert(
            wire.parse::<CompoundName>().unwrap(),
            CompoundInfo::with_half_life(Duration::from_secs(hours * 3600)).unwrap(),
        );
        diff
    }

    pub fn remove_compound(wire: &str, hours: u64) -> FullDiffData {
        add_compound(wire, hours).reverse()
    }

    pub fn add_frequency(name: &str, hours: u64) -> FullDiffData {
        let mut diff = FullDiffData::default();
        diff.frequencies.add.insert(
            FrequencyName::new(name).unwrap(),
            FrequencyValue::every(Duration::from_secs(hours * 3600)).unwrap(),
        );
        diff
    }
}
