// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Catalog entities shared by every layer.
//!
//! Three catalogs exist: compounds, blends and dosing frequencies. Names and
//! values are validated on construction (and on deserialization), so a value
//! that exists is a valid one.

pub mod names;
pub mod values;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use names::{BlendName, CaseFold, CompoundBase, CompoundName, FrequencyName};
pub use values::{BlendValue, CompoundInfo, CompoundPatch, FrequencyValue};

use crate::diff::FullDiffData;

/// Bad-argument errors raised before any storage call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{kind} name must not be empty")]
    EmptyName { kind: &'static str },
    #[error("{kind} name '{name}' must not start with '.'")]
    ForbiddenLeadingDot { kind: &'static str, name: String },
    #[error("{kind} name '{name}' must not contain '{ch}'")]
    ForbiddenChar {
        kind: &'static str,
        name: String,
        ch: char,
    },
    #[error("half-life must be positive")]
    NonPositiveHalfLife,
    #[error("percent active must be in (0, 1], got {0}")]
    PercentActiveOutOfRange(f64),
    #[error("blend needs at least two components, got {0}")]
    TooFewComponents(usize),
    #[error("blend has non-positive component '{component}' ({weight})")]
    NonPositiveComponent { component: String, weight: f64 },
    #[error("frequency schedule must not be empty")]
    EmptySchedule,
    #[error("frequency interval #{0} must be positive")]
    NonPositiveInterval(usize),
    #[error("duration {0:?} is not a whole number of milliseconds")]
    FractionalMillis(std::time::Duration),
    #[error("duplicate key after case folding: '{0}'")]
    DuplicateKey(String),
    #[error("deleting compound '{compound}' would orphan blend '{blend}'")]
    OrphanedBlend { blend: String, compound: String },
    #[error("blend '{blend}' references unknown compound '{compound}'")]
    UnknownComponent { blend: String, compound: String },
}

/// One of the three named collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Catalog {
    Compounds,
    Blends,
    Frequencies,
}

impl Catalog {
    pub const ALL: [Catalog; 3] = [Catalog::Compounds, Catalog::Blends, Catalog::Frequencies];

    /// Table name used by the SQL store.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compounds => "compounds",
            Self::Blends => "blends",
            Self::Frequencies => "frequencies",
        }
    }
}

impl fmt::Display for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of a revision history. Each object type has its own revision chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectType(String);

impl ObjectType {
    /// Object type holding the three reference catalogs together.
    pub const CATALOG: &'static str = "catalog";

    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ObjectType {
    fn default() -> Self {
        Self::new(Self::CATALOG)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fully materialized contents of all three catalogs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub compounds: BTreeMap<CompoundName, CompoundInfo>,
    #[serde(default)]
    pub blends: BTreeMap<BlendName, BlendValue>,
    #[serde(default)]
    pub frequencies: BTreeMap<FrequencyName, FrequencyValue>,
}

impl CatalogSnapshot {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.compounds.is_empty() && self.blends.is_empty() && self.frequencies.is_empty()
    }

    /// Apply one revision's diff in place.
    pub fn apply(&mut self, diff: &FullDiffData) {
        diff.compounds.apply_to(&mut self.compounds);
        diff.blends.apply_to(&mut self.blends);
        diff.frequencies.apply_to(&mut self.frequencies);
    }

    #[must_use]
    pub fn applied(mut self, diff: &FullDiffData) -> Self {
        self.apply(diff);
        self
    }

    /// Blends that reference `compound`.
    pub fn blends_using<'a>(
        &'a self,
        compound: &'a CompoundName,
    ) -> impl Iterator<Item = &'a BlendName> + 'a {
        self.blends
            .iter()
            .filter(move |(_, value)| value.components().contains_key(compound))
            .map(|(name, _)| name)
    }

    /// Every blend component must name a compound in this snapshot. A
    /// component that was present in `previous` is reported as orphaned,
    /// anything else as unknown.
    pub fn check_integrity(&self, previous: &CatalogSnapshot) -> Result<(), ValidationError> {
        for (blend, value) in &self.blends {
            let Some(compound) = value
                .compound_names()
                .find(|compound| !self.compounds.contains_key(*compound))
            else {
                continue;
            };
            let (blend, compound_str) = (blend.to_string(), compound.to_string());
            return Err(if previous.compounds.contains_key(compound) {
                ValidationError::OrphanedBlend {
                    blend,
                    compound: compound_str,
                }
            } else {
                ValidationError::UnknownComponent {
                    blend,
                    compound: compound_str,
                }
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_display() {
        assert_eq!(Catalog::Compounds.to_string(), "compounds");
        assert_eq!(Catalog::ALL.len(), 3);
    }

    #[test]
    fn test_object_type_default() {
        assert_eq!(ObjectType::default().as_str(), "catalog");
    }

    #[test]
    fn test_blends_using() {
        let mut snapshot = CatalogSnapshot::default();
        let blend = BlendValue::from_pairs([("t=a", 1.0), ("t=b", 1.0)]).unwrap();
        snapshot.blends.insert(BlendName::new("mix").unwrap(), blend);

        let used: CompoundName = "t=a".parse().unwrap();
        let unused: CompoundName = "t=c".parse().unwrap();
        assert_eq!(snapshot.blends_using(&used).count(), 1);
        assert_eq!(snapshot.blends_using(&unused).count(), 0);
    }

    #[test]
    fn test_check_integrity_names_orphans() {
        let half_life = std::time::Duration::from_secs(3600);
        let mut before = CatalogSnapshot::default();
        for wire in ["t=a", "t=b"] {
            before
                .compounds
                .insert(wire.parse().unwrap(), CompoundInfo::with_half_life(half_life).unwrap());
        }
        before.blends.insert(
            BlendName::new("mix").unwrap(),
            BlendValue::from_pairs([("t=a", 1.0), ("t=b", 1.0)]).unwrap(),
        );
        assert!(before.check_integrity(&CatalogSnapshot::default()).is_ok());

        let mut after = before.clone();
        after.compounds.remove(&"t=a".parse::<CompoundName>().unwrap());
        assert_eq!(
            after.check_integrity(&before),
            Err(ValidationError::OrphanedBlend {
                blend: "mix".into(),
                compound: "t=a".into()
            })
        );
        assert!(matches!(
            after.check_integrity(&after),
            Err(ValidationError::UnknownComponent { .. })
        ));
    }
}
