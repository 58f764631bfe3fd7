// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the catalog coordinator.

use crate::catalog::CatalogSnapshot;
use crate::diff::DataSummary;

/// Coordinator lifecycle state.
///
/// Use [`super::CatalogCoordinator::state()`] to check the current state or
/// [`super::CatalogCoordinator::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Just created, not yet started
    Created,
    /// Connecting to the store and revision log
    Connecting,
    /// Checking store contents against the revision log
    Verifying,
    /// Loading the seed document or recording existing data as revision 1
    Seeding,
    /// Serving reads and mutations
    Ready,
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Verifying => write!(f, "Verifying"),
            Self::Seeding => write!(f, "Seeding"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}

/// Result of one mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationOutcome {
    /// Whether the store reported any change
    pub changed: bool,
    /// Revision recorded for the change, if any
    pub revision: Option<u64>,
    /// Delete/add counts of the recorded diff
    pub summary: DataSummary,
}

impl MutationOutcome {
    pub(super) fn unchanged() -> Self {
        Self::default()
    }
}

/// Materialized view at the head of the revision chain.
#[derive(Debug, Clone, Default)]
pub(super) struct Head {
    pub revision: Option<u64>,
    pub snapshot: CatalogSnapshot,
}
