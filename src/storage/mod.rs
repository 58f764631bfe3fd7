// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Catalog storage backends.
//!
//! - [`sql::SqlCatalogStore`]: transactional SQLite/MySQL store (ground truth)
//! - [`memory::InMemoryCatalogStore`]: copy-on-write in-process store
//! - [`read_only::ReadOnlyStore`]: wrapper rejecting every mutation

pub mod memory;
pub mod read_only;
pub mod sql;
pub mod traits;

/// Current wall-clock time in epoch millis.
pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
