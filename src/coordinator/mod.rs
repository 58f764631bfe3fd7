// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Catalog coordinator.
//!
//! The [`CatalogCoordinator`] is the aggregate layer tying together:
//! - the backing store (SQL or in-memory), optionally read-only
//! - the single-flight cache layer in front of it
//! - the revision log and its snapshot cache
//!
//! It sees all three catalogs at once, so it owns the checks a single store
//! call can't make: blend components must name existing compounds.
//!
//! # Mutation flow
//!
//! ```text
//! mutation ──→ validate against head snapshot (integrity)
//!          ──→ store transaction ──→ changed?
//!                                      │ yes
//!                                      ▼
//!              resolve diff vs head ──→ append revision ──→ snapshot row
//!                                                        ──→ cache patch
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! Created → Connecting → Verifying → Seeding → Ready
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use dose_catalog::{CatalogConfig, CatalogCoordinator, CoordinatorState};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = CatalogConfig {
//!     sql_url: Some("sqlite:catalog.db?mode=rwc".into()),
//!     seed_path: Some("seed.json".into()),
//!     ..Default::default()
//! };
//! let mut coordinator = CatalogCoordinator::new(config);
//! assert_eq!(coordinator.state(), CoordinatorState::Created);
//!
//! coordinator.start().await.expect("Start failed");
//! let blends = coordinator.blend_names().await.unwrap();
//! # }
//! ```

mod api;
mod lifecycle;
mod types;

pub use types::{CoordinatorState, MutationOutcome};
use types::Head;

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::{watch, Mutex};

use crate::cache::CachedCatalogStore;
use crate::catalog::{CatalogSnapshot, ObjectType};
use crate::config::CatalogConfig;
use crate::revision::RevisionLog;
use crate::storage::traits::{CatalogStore, StorageError};

/// Aggregate layer over the catalog store, revision log and caches.
///
/// # Thread Safety
///
/// `Send + Sync`. Reads run concurrently; mutations are serialized so each
/// one validates against, and records a revision on top of, the previous.
pub struct CatalogCoordinator {
    pub(super) config: CatalogConfig,
    pub(super) object_type: ObjectType,

    /// Lifecycle state (broadcast to watchers)
    pub(super) state: watch::Sender<CoordinatorState>,
    pub(super) state_rx: watch::Receiver<CoordinatorState>,

    /// Backends supplied before `start()`, instead of connecting from config
    pub(super) provided: Option<(Arc<dyn CatalogStore>, Arc<dyn RevisionLog>)>,

    /// Cache layer over the (possibly read-only) store
    pub(super) store: Option<Arc<CachedCatalogStore>>,

    pub(super) log: Option<Arc<dyn RevisionLog>>,

    /// Head revision and its snapshot, swapped after every recorded change
    pub(super) head: ArcSwap<Head>,

    /// Serializes mutations
    pub(super) write_lock: Mutex<()>,
}

impl CatalogCoordinator {
    /// Create a coordinator that connects according to `config` on
    /// [`start()`](Self::start).
    pub fn new(config: CatalogConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(CoordinatorState::Created);
        Self {
            object_type: config.object_type(),
            config,
            state: state_tx,
            state_rx,
            provided: None,
            store: None,
            log: None,
            head: ArcSwap::from_pointee(Head::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Create a coordinator over existing backends. `start()` still runs
    /// the consistency check and seeding.
    pub fn with_backends(
        config: CatalogConfig,
        store: Arc<dyn CatalogStore>,
        log: Arc<dyn RevisionLog>,
    ) -> Self {
        let mut coordinator = Self::new(config);
        coordinator.provided = Some((store, log));
        coordinator
    }

    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<CoordinatorState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == CoordinatorState::Ready
    }

    #[must_use]
    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    #[must_use]
    pub fn object_type(&self) -> &ObjectType {
        &self.object_type
    }

    /// Head revision, or `None` before anything was recorded.
    #[must_use]
    pub fn head_revision(&self) -> Option<u64> {
        self.head.load().revision
    }

    /// Materialized contents at the head revision.
    #[must_use]
    pub fn snapshot(&self) -> CatalogSnapshot {
        self.head.load().snapshot.clone()
    }

    pub(super) fn backends(
        &self,
    ) -> Result<(&Arc<CachedCatalogStore>, &Arc<dyn RevisionLog>), StorageError> {
        match (&self.store, &self.log) {
            (Some(store), Some(log)) if self.is_ready() => Ok((store, log)),
            _ => Err(StorageError::Backend(format!(
                "catalog coordinator not ready (state: {})",
                self.state()
            ))),
        }
    }

    pub(super) fn set_head(&self, revision: Option<u64>, snapshot: CatalogSnapshot) {
        if let Some(revision) = revision {
            crate::metrics::set_revision_head(self.object_type.as_str(), revision);
        }
        self.head.store(Arc::new(Head { revision, snapshot }));
    }
}
