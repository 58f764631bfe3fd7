// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Diff algebra over catalogs.
//!
//! Every mutation of a catalog is expressed as a delta:
//!
//! - [`Diff`]: the proposed form. Deleted names are bare keys because their
//!   current values are not known yet.
//! - [`FullDiff`]: the durable, reversible form. `delete` carries the prior
//!   value of every removed name, so [`FullDiff::reverse`] is exact.
//!
//! # Laws
//!
//! ```text
//! apply(apply(s, d1), d2) == apply(s, combine(d1, d2))
//! reverse(reverse(d))     == d
//! apply(apply(s, d), reverse(d)) == s
//! ```
//!
//! A name added by `d1` that did not exist before it and is deleted again by
//! `d2` (without being re-added) is crossed out of the composite entirely.
//!
//! Everything here is pure: no I/O, no locking.

mod fold;

pub use fold::{fold_diff, fold_full_diff};

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::catalog::{
    BlendName, BlendValue, CatalogSnapshot, CompoundInfo, CompoundName, FrequencyName,
    FrequencyValue, ValidationError,
};

/// Proposed mutation of one catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: Serialize, V: Serialize",
    deserialize = "K: Ord + Deserialize<'de>, V: Deserialize<'de>"
))]
pub struct Diff<K, V> {
    #[serde(default)]
    pub delete: BTreeSet<K>,
    #[serde(default)]
    pub add: BTreeMap<K, V>,
}

impl<K, V> Default for Diff<K, V> {
    fn default() -> Self {
        Self {
            delete: BTreeSet::new(),
            add: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone, V: Clone + PartialEq> Diff<K, V> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.delete.is_empty() && self.add.is_empty()
    }

    /// Turn into the durable form using the current values in `prior`.
    ///
    /// Deleting an absent name and re-adding an identical value are both
    /// dropped, so the result only contains real changes.
    #[must_use]
    pub fn resolve(&self, prior: &BTreeMap<K, V>) -> FullDiff<K, V> {
        let mut full = FullDiff::default();
        for name in &self.delete {
            if let Some(old) = prior.get(name) {
                full.delete.insert(name.clone(), old.clone());
            }
        }
        for (name, value) in &self.add {
            match prior.get(name) {
                Some(old) if old == value => {
                    // Unchanged: cancel any delete of the same name
                    full.delete.remove(name);
                }
                Some(old) => {
                    full.delete.insert(name.clone(), old.clone());
                    full.add.insert(name.clone(), value.clone());
                }
                None => {
                    full.add.insert(name.clone(), value.clone());
                }
            }
        }
        full
    }
}

/// Cardinalities of a diff, for logging and audit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub deleted: usize,
    pub added: usize,
}

impl std::fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "-{} +{}", self.deleted, self.added)
    }
}

/// Durable, reversible mutation of one catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: Serialize, V: Serialize",
    deserialize = "K: Ord + Deserialize<'de>, V: Deserialize<'de>"
))]
pub struct FullDiff<K, V> {
    #[serde(default)]
    pub delete: BTreeMap<K, V>,
    #[serde(default)]
    pub add: BTreeMap<K, V>,
}

impl<K, V> Default for FullDiff<K, V> {
    fn default() -> Self {
        Self {
            delete: BTreeMap::new(),
            add: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone, V: Clone> FullDiff<K, V> {
    /// Diff that adds every entry of `entries` to an empty catalog.
    #[must_use]
    pub fn from_empty(entries: BTreeMap<K, V>) -> Self {
        Self {
            delete: BTreeMap::new(),
            add: entries,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.delete.is_empty() && self.add.is_empty()
    }

    /// `map - delete.keys ∪ add`, in place.
    pub fn apply_to(&self, map: &mut BTreeMap<K, V>) {
        for name in self.delete.keys() {
            map.remove(name);
        }
        for (name, value) in &self.add {
            map.insert(name.clone(), value.clone());
        }
    }

    #[must_use]
    pub fn apply(&self, map: &BTreeMap<K, V>) -> BTreeMap<K, V> {
        let mut out = map.clone();
        self.apply_to(&mut out);
        out
    }

    /// Compose `self: i -> i+1` with `next: i+1 -> i+2` into `i -> i+2`.
    #[must_use]
    pub fn combine(&self, next: &Self) -> Self {
        let names: BTreeSet<&K> = self
            .delete
            .keys()
            .chain(self.add.keys())
            .chain(next.delete.keys())
            .chain(next.add.keys())
            .collect();

        let mut out = Self::default();
        for name in names {
            // Value before step 1. A name only in `self.add` did not exist.
            let before = match self.delete.get(name) {
                Some(value) => Some(value),
                None if self.add.contains_key(name) => None,
                None => next.delete.get(name),
            };
            // Value after step 2.
            let after = match next.add.get(name) {
                Some(value) => Some(value),
                None if next.delete.contains_key(name) => None,
                None => self.add.get(name),
            };
            if let Some(value) = before {
                out.delete.insert(name.clone(), value.clone());
            }
            if let Some(value) = after {
                out.add.insert(name.clone(), value.clone());
            }
        }
        out
    }

    #[must_use]
    pub fn reverse(&self) -> Self {
        Self {
            delete: self.add.clone(),
            add: self.delete.clone(),
        }
    }

    #[must_use]
    pub fn summarize(&self) -> DiffSummary {
        DiffSummary {
            deleted: self.delete.len(),
            added: self.add.len(),
        }
    }

    /// Every name the diff touches.
    #[must_use]
    pub fn names(&self) -> BTreeSet<K> {
        self.delete.keys().chain(self.add.keys()).cloned().collect()
    }

    /// Names present before the diff and absent after it.
    pub fn removed_names(&self) -> impl Iterator<Item = &K> {
        self.delete.keys().filter(|name| !self.add.contains_key(*name))
    }

    /// Names absent before the diff and present after it.
    pub fn created_names(&self) -> impl Iterator<Item = &K> {
        self.add.keys().filter(|name| !self.delete.contains_key(*name))
    }
}

/// Proposed mutation of all three catalogs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffData {
    #[serde(default)]
    pub compounds: Diff<CompoundName, CompoundInfo>,
    #[serde(default)]
    pub blends: Diff<BlendName, BlendValue>,
    #[serde(default)]
    pub frequencies: Diff<FrequencyName, FrequencyValue>,
}

impl DiffData {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.compounds.is_empty() && self.blends.is_empty() && self.frequencies.is_empty()
    }

    /// Resolve against the current values of the touched names.
    #[must_use]
    pub fn resolve(&self, prior: &CatalogSnapshot) -> FullDiffData {
        FullDiffData {
            compounds: self.compounds.resolve(&prior.compounds),
            blends: self.blends.resolve(&prior.blends),
            frequencies: self.frequencies.resolve(&prior.frequencies),
        }
    }

    /// Lowercase every key, and every component name inside blends.
    pub fn case_fold(&self) -> Result<Self, ValidationError> {
        Ok(Self {
            compounds: fold_diff(&self.compounds, |info| Ok(info.clone()))?,
            blends: fold_diff(&self.blends, BlendValue::case_folded)?,
            frequencies: fold_diff(&self.frequencies, |freq| Ok(freq.clone()))?,
        })
    }
}

/// Per-catalog summary of a [`FullDiffData`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataSummary {
    pub compounds: DiffSummary,
    pub blends: DiffSummary,
    pub frequencies: DiffSummary,
}

impl std::fmt::Display for DataSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "compounds {} blends {} frequencies {}",
            self.compounds, self.blends, self.frequencies
        )
    }
}

/// Durable mutation of all three catalogs; the payload of one revision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FullDiffData {
    #[serde(default)]
    pub compounds: FullDiff<CompoundName, CompoundInfo>,
    #[serde(default)]
    pub blends: FullDiff<BlendName, BlendValue>,
    #[serde(default)]
    pub frequencies: FullDiff<FrequencyName, FrequencyValue>,
}

impl FullDiffData {
    /// Diff that creates `snapshot` from nothing.
    #[must_use]
    pub fn from_snapshot(snapshot: CatalogSnapshot) -> Self {
        Self {
            compounds: FullDiff::from_empty(snapshot.compounds),
            blends: FullDiff::from_empty(snapshot.blends),
            frequencies: FullDiff::from_empty(snapshot.frequencies),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.compounds.is_empty() && self.blends.is_empty() && self.frequencies.is_empty()
    }

    #[must_use]
    pub fn combine(&self, next: &Self) -> Self {
        Self {
            compounds: self.compounds.combine(&next.compounds),
            blends: self.blends.combine(&next.blends),
            frequencies: self.frequencies.combine(&next.frequencies),
        }
    }

    #[must_use]
    pub fn reverse(&self) -> Self {
        Self {
            compounds: self.compounds.reverse(),
            blends: self.blends.reverse(),
            frequencies: self.frequencies.reverse(),
        }
    }

    #[must_use]
    pub fn summarize(&self) -> DataSummary {
        DataSummary {
            compounds: self.compounds.summarize(),
            blends: self.blends.summarize(),
            frequencies: self.frequencies.summarize(),
        }
    }

    /// Lowercase every key, and every component name inside blends.
    pub fn case_fold(&self) -> Result<Self, ValidationError> {
        Ok(Self {
            compounds: fold_full_diff(&self.compounds, |info| Ok(info.clone()))?,
            blends: fold_full_diff(&self.blends, BlendValue::case_folded)?,
            frequencies: fold_full_diff(&self.frequencies, |freq| Ok(freq.clone()))?,
        })
    }
}

/// Left-fold a chain of sequential diffs into one equivalent diff.
pub fn compute_composite<'a>(diffs: impl IntoIterator<Item = &'a FullDiffData>) -> FullDiffData {
    diffs
        .into_iter()
        .fold(FullDiffData::default(), |acc, next| acc.combine(next))
}

#[cfg(test)]
mod tests {
    use super::*;

    type D = FullDiff<String, i32>;

    fn map(entries: &[(&str, i32)]) -> BTreeMap<String, i32> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn diff(delete: &[(&str, i32)], add: &[(&str, i32)]) -> D {
        FullDiff {
            delete: map(delete),
            add: map(add),
        }
    }

    #[test]
    fn test_apply() {
        let snapshot = map(&[("a", 1), ("b", 2)]);
        let d = diff(&[("a", 1)], &[("c", 3)]);
        assert_eq!(d.apply(&snapshot), map(&[("b", 2), ("c", 3)]));
    }

    #[test]
    fn test_combine_crosses_out_add_then_delete() {
        let d1 = diff(&[], &[("x", 1)]);
        let d2 = diff(&[("x", 1)], &[("y", 2)]);
        let combined = d1.combine(&d2);
        assert!(!combined.delete.contains_key("x"));
        assert!(!combined.add.contains_key("x"));
        assert_eq!(combined.add, map(&[("y", 2)]));
    }

    #[test]
    fn test_combine_keeps_prior_value_of_replaced_then_deleted() {
        let snapshot = map(&[("x", 0)]);
        let d1 = diff(&[("x", 0)], &[("x", 1)]);
        let d2 = diff(&[("x", 1)], &[]);
        let combined = d1.combine(&d2);
        assert_eq!(combined, diff(&[("x", 0)], &[]));
        assert_eq!(combined.apply(&snapshot), d2.apply(&d1.apply(&snapshot)));
    }

    #[test]
    fn test_combine_later_add_wins() {
        let d1 = diff(&[], &[("x", 1)]);
        let d2 = diff(&[("x", 1)], &[("x", 2)]);
        let combined = d1.combine(&d2);
        assert_eq!(combined, diff(&[], &[("x", 2)]));
    }

    #[test]
    fn test_reverse_round_trip() {
        let snapshot = map(&[("a", 1), ("b", 2)]);
        let d = diff(&[("a", 1), ("b", 2)], &[("b", 5), ("c", 3)]);
        let forward = d.apply(&snapshot);
        assert_eq!(d.reverse().apply(&forward), snapshot);
        assert_eq!(d.reverse().reverse(), d);
    }

    #[test]
    fn test_summarize() {
        let d = diff(&[("a", 1)], &[("b", 2), ("c", 3)]);
        assert_eq!(
            d.summarize(),
            DiffSummary {
                deleted: 1,
                added: 2
            }
        );
        assert_eq!(d.summarize().to_string(), "-1 +2");
    }

    #[test]
    fn test_resolve_drops_no_ops() {
        let prior = map(&[("a", 1), ("b", 2)]);
        let proposed: Diff<String, i32> = Diff {
            delete: ["a".to_string(), "missing".to_string()].into_iter().collect(),
            add: map(&[("b", 2), ("c", 3)]),
        };
        let full = proposed.resolve(&prior);
        assert_eq!(full, diff(&[("a", 1)], &[("c", 3)]));
    }

    #[test]
    fn test_resolve_replacement_carries_prior() {
        let prior = map(&[("a", 1)]);
        let proposed: Diff<String, i32> = Diff {
            delete: BTreeSet::new(),
            add: map(&[("a", 9)]),
        };
        assert_eq!(proposed.resolve(&prior), diff(&[("a", 1)], &[("a", 9)]));
    }

    #[test]
    fn test_compute_composite_matches_sequential_apply() {
        let s0 = map(&[("a", 1)]);
        let d1 = FullDiffData {
            compounds: FullDiff::default(),
            ..Default::default()
        };
        assert!(compute_composite([&d1, &d1]).is_empty());

        let steps = [
            diff(&[], &[("b", 2)]),
            diff(&[("a", 1)], &[("a", 10)]),
            diff(&[("b", 2)], &[]),
        ];
        let composite = steps.iter().fold(D::default(), |acc, d| acc.combine(d));
        let sequential = steps.iter().fold(s0.clone(), |s, d| d.apply(&s));
        assert_eq!(composite.apply(&s0), sequential);
        assert_eq!(composite, diff(&[("a", 1)], &[("a", 10)]));
    }

    #[test]
    fn test_full_diff_data_default_deserializes_from_empty_object() {
        let data: FullDiffData = serde_json::from_str("{}").unwrap();
        assert!(data.is_empty());
    }
}
