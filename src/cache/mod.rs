// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory caches in front of the catalog store.
//!
//! - [`single_flight::SingleFlightCache`]: keyed, at most one load per key in flight
//! - [`single_flight::SingletonCache`]: the unit-keyed variant for whole name sets
//! - [`layer::CachedCatalogStore`]: a [`crate::storage::traits::CatalogStore`] wrapper using both

pub mod layer;
pub mod policy;
pub mod single_flight;

pub use layer::CachedCatalogStore;
pub use policy::ExpirationPolicy;
pub use single_flight::{CacheStats, SingleFlightCache, SingletonCache};
