// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Dose Catalog
//!
//! Transactional reference catalogs for dosing data: compounds (half-life,
//! active fraction), blends (compound mixes) and dosing frequencies.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CatalogCoordinator                       │
//! │  • Referential integrity across all three catalogs         │
//! │  • Serialized mutations, one revision per real change      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 CachedCatalogStore                          │
//! │  • Single-flight name-set and variant caches               │
//! │  • Patched in place after committed writes                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │        SqlCatalogStore (SQLite/MySQL) / InMemory            │
//! │  • One transaction per bulk operation                      │
//! │  • Optional ReadOnlyStore wrapper                          │
//! └─────────────────────────────────────────────────────────────┘
//!
//!          RevisionLog: append-only FullDiffData chain per
//!          object type, revocable, with a snapshot cache
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use dose_catalog::{
//!     BlendName, BlendValue, CatalogConfig, CatalogCoordinator, CompoundInfo, CompoundName,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut coordinator = CatalogCoordinator::new(CatalogConfig::default());
//!     coordinator.start().await.expect("Failed to start");
//!
//!     let half_life = CompoundInfo::with_half_life(Duration::from_secs(8 * 86_400)).unwrap();
//!     for wire in ["test=cyp", "test=enan"] {
//!         let name = CompoundName::parse_wire(wire).unwrap();
//!         coordinator.put_compound(name, half_life.clone()).await.unwrap();
//!     }
//!
//!     let blend = BlendValue::from_pairs([("test=cyp", 100.0), ("test=enan", 100.0)]).unwrap();
//!     let outcome = coordinator
//!         .put_blend(BlendName::new("mix").unwrap(), blend)
//!         .await
//!         .unwrap();
//!     println!("revision {:?}: {}", outcome.revision, outcome.summary);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`catalog`]: Names, values and validation
//! - [`diff`]: Diff algebra (resolve, apply, combine, reverse, case fold)
//! - [`storage`]: The store contract and its SQL / in-memory / read-only forms
//! - [`cache`]: Single-flight caches and the caching store layer
//! - [`revision`]: Revision log and snapshot cache
//! - [`seed`]: Seed document loading
//! - [`coordinator`]: The [`CatalogCoordinator`] tying it all together
//! - [`resilience`]: Startup retry

pub mod cache;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod diff;
pub mod metrics;
pub mod resilience;
pub mod revision;
pub mod seed;
pub mod storage;

pub use cache::{CacheStats, CachedCatalogStore, ExpirationPolicy, SingleFlightCache, SingletonCache};
pub use catalog::{
    BlendName, BlendValue, Catalog, CatalogSnapshot, CompoundBase, CompoundInfo, CompoundName,
    CompoundPatch, FrequencyName, FrequencyValue, ObjectType, ValidationError,
};
pub use config::CatalogConfig;
pub use coordinator::{CatalogCoordinator, CoordinatorState, MutationOutcome};
pub use diff::{compute_composite, DataSummary, Diff, DiffData, DiffSummary, FullDiff, FullDiffData};
pub use crate::metrics::LatencyTimer;
pub use resilience::retry::RetryConfig;
pub use revision::{Revision, RevisionLog};
pub use seed::SeedDocument;
pub use storage::traits::{CatalogEntries, CatalogStore, DeleteRequest, DeleteTarget, StorageError};
