// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process revision log for tests and ephemeral catalogs.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{info, warn};

use super::{Revision, RevisionLog};
use crate::catalog::{CatalogSnapshot, ObjectType};
use crate::diff::FullDiffData;
use crate::metrics;
use crate::storage::now_millis;
use crate::storage::traits::StorageError;

#[derive(Default)]
struct Chain {
    revisions: Vec<Revision>,
    snapshots: BTreeMap<u64, CatalogSnapshot>,
}

#[derive(Default)]
pub struct InMemoryRevisionLog {
    chains: RwLock<HashMap<ObjectType, Chain>>,
}

impl InMemoryRevisionLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RevisionLog for InMemoryRevisionLog {
    async fn latest(&self, object_type: &ObjectType) -> Result<Option<u64>, StorageError> {
        let chains = self.chains.read();
        Ok(chains
            .get(object_type)
            .and_then(|chain| chain.revisions.last())
            .map(|r| r.revision))
    }

    async fn head(&self, object_type: &ObjectType) -> Result<Option<u64>, StorageError> {
        let chains = self.chains.read();
        Ok(chains.get(object_type).and_then(|chain| {
            chain
                .revisions
                .iter()
                .rev()
                .find(|r| !r.revoked)
                .map(|r| r.revision)
        }))
    }

    async fn append(
        &self,
        object_type: &ObjectType,
        diff: FullDiffData,
    ) -> Result<Revision, StorageError> {
        let revision = {
            let mut chains = self.chains.write();
            let chain = chains.entry(object_type.clone()).or_default();
            let revision = Revision {
                revision: chain.revisions.last().map_or(1, |r| r.revision + 1),
                created_at: now_millis(),
                diff,
                parent: chain
                    .revisions
                    .iter()
                    .rev()
                    .find(|r| !r.revoked)
                    .map(|r| r.revision),
                revoked: false,
            };
            chain.revisions.push(revision.clone());
            revision
        };

        metrics::record_revision(object_type.as_str(), revision.revision);
        info!(
            %object_type,
            revision = revision.revision,
            summary = %revision.diff.summarize(),
            "Appended revision"
        );
        Ok(revision)
    }

    async fn revisions(
        &self,
        object_type: &ObjectType,
        after: u64,
        up_to: Option<u64>,
    ) -> Result<Vec<Revision>, StorageError> {
        let up_to = up_to.unwrap_or(u64::MAX);
        let chains = self.chains.read();
        Ok(chains
            .get(object_type)
            .map(|chain| {
                chain
                    .revisions
                    .iter()
                    .filter(|r| r.revision > after && r.revision <= up_to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn revoke(&self, object_type: &ObjectType, revision: u64) -> Result<bool, StorageError> {
        let mut chains = self.chains.write();
        let Some(chain) = chains.get_mut(object_type) else {
            return Ok(false);
        };
        let Some(entry) = chain
            .revisions
            .iter_mut()
            .find(|r| r.revision == revision && !r.revoked)
        else {
            return Ok(false);
        };
        entry.revoked = true;
        let dropped = chain.snapshots.split_off(&revision).len();
        warn!(%object_type, revision, dropped_snapshots = dropped, "Revoked revision");
        Ok(true)
    }

    async fn cached_snapshot(
        &self,
        object_type: &ObjectType,
        at_or_below: u64,
    ) -> Result<Option<(u64, CatalogSnapshot)>, StorageError> {
        let chains = self.chains.read();
        Ok(chains.get(object_type).and_then(|chain| {
            chain
                .snapshots
                .range(..=at_or_below)
                .next_back()
                .map(|(revision, snapshot)| (*revision, snapshot.clone()))
        }))
    }

    async fn put_snapshot(
        &self,
        object_type: &ObjectType,
        revision: u64,
        snapshot: &CatalogSnapshot,
    ) -> Result<(), StorageError> {
        self.chains
            .write()
            .entry(object_type.clone())
            .or_default()
            .snapshots
            .insert(revision, snapshot.clone());
        Ok(())
    }
}
