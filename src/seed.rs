// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Initial catalog contents for an empty store.
//!
//! The seed is a JSON document with three non-empty sections:
//!
//! ```json
//! {
//!   "compounds": {
//!     "Testosterone=Enanthate": { "half_life_ms": 388800000, "pct_active": 0.7 },
//!     "nandrolone-dec": { "base": "Nandrolone", "variant": "Decanoate", "half_life_ms": 648000000 }
//!   },
//!   "blends": { "Sustanon": { "testosterone=propionate": 1.0, "testosterone=phenylpropionate": 2.0 } },
//!   "frequencies": { "daily": [86400000] }
//! }
//! ```
//!
//! A compound without an explicit `base` takes base and variant from its
//! key. Every name is case-folded before the seed becomes revision 1.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::catalog::{
    BlendName, BlendValue, CatalogSnapshot, CompoundBase, CompoundInfo, CompoundName,
    FrequencyName, FrequencyValue,
};
use crate::diff::FullDiffData;
use crate::storage::traits::StorageError;

fn default_pct_active() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedCompound {
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub variant: Option<String>,
    pub half_life_ms: u64,
    #[serde(default = "default_pct_active")]
    pub pct_active: f64,
    #[serde(default)]
    pub note: String,
}

impl SeedCompound {
    fn name(&self, key: &str) -> Result<CompoundName, StorageError> {
        let name = match &self.base {
            Some(base) => CompoundName::new(
                CompoundBase::new(base.as_str())?,
                self.variant.clone().unwrap_or_default(),
            ),
            None => {
                let parsed = CompoundName::parse_wire(key)?;
                match &self.variant {
                    Some(variant) => CompoundName::new(parsed.base().clone(), variant.as_str()),
                    None => parsed,
                }
            }
        };
        Ok(name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedDocument {
    #[serde(default)]
    pub compounds: BTreeMap<String, SeedCompound>,
    #[serde(default)]
    pub blends: BTreeMap<BlendName, BlendValue>,
    #[serde(default)]
    pub frequencies: BTreeMap<FrequencyName, FrequencyValue>,
}

impl SeedDocument {
    pub fn from_json(json: &str) -> Result<Self, StorageError> {
        serde_json::from_str(json).map_err(|e| StorageError::Seed(format!("unparsable seed document: {e}")))
    }

    /// Read and parse a seed file. A missing file is an error.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StorageError::Seed(format!("cannot read {}: {e}", path.display())))?;
        let document = Self::from_json(&json)?;
        info!(
            path = %path.display(),
            compounds = document.compounds.len(),
            blends = document.blends.len(),
            frequencies = document.frequencies.len(),
            "Loaded seed document"
        );
        Ok(document)
    }

    fn require_sections(&self) -> Result<(), StorageError> {
        for (section, empty) in [
            ("compounds", self.compounds.is_empty()),
            ("blends", self.blends.is_empty()),
            ("frequencies", self.frequencies.is_empty()),
        ] {
            if empty {
                return Err(StorageError::Seed(format!("section '{section}' is empty")));
            }
        }
        Ok(())
    }

    /// Validate, case-fold and express the seed as a diff against an empty
    /// catalog.
    pub fn into_diff(self) -> Result<FullDiffData, StorageError> {
        self.require_sections()?;

        let mut snapshot = CatalogSnapshot {
            blends: self.blends,
            frequencies: self.frequencies,
            ..Default::default()
        };
        for (key, compound) in &self.compounds {
            let info = CompoundInfo::new(
                Duration::from_millis(compound.half_life_ms),
                compound.pct_active,
                compound.note.as_str(),
            )?;
            if snapshot.compounds.insert(compound.name(key)?, info).is_some() {
                return Err(StorageError::Seed(format!("compound '{key}' is listed twice")));
            }
        }

        let diff = FullDiffData::from_snapshot(snapshot).case_fold()?;
        CatalogSnapshot::default()
            .applied(&diff)
            .check_integrity(&CatalogSnapshot::default())?;
        Ok(diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ValidationError;

    const SEED: &str = r#"{
        "compounds": {
            "T=A": { "half_life_ms": 86400000 },
            "label": { "base": "T", "variant": "B", "half_life_ms": 172800000, "pct_active": 0.5 }
        },
        "blends": { "Mix": { "T=A": 1.0, "t=b": 2.0 } },
        "frequencies": { "Daily": [86400000] }
    }"#;

    #[test]
    fn test_seed_derives_names_and_folds_case() {
        let diff = SeedDocument::from_json(SEED).unwrap().into_diff().unwrap();
        assert!(diff.compounds.delete.is_empty());

        let compounds: Vec<String> = diff.compounds.add.keys().map(ToString::to_string).collect();
        assert_eq!(compounds, vec!["t=a", "t=b"]);
        let b = &diff.compounds.add[&"t=b".parse::<CompoundName>().unwrap()];
        assert_eq!(b.pct_active(), 0.5);

        let mix = &diff.blends.add[&BlendName::new("mix").unwrap()];
        assert_eq!(mix.components().len(), 2);
        assert!(diff.frequencies.add.contains_key(&FrequencyName::new("daily").unwrap()));
    }

    #[test]
    fn test_seed_rejects_empty_section() {
        let json = r#"{ "compounds": { "a": { "half_life_ms": 1 } }, "blends": {}, "frequencies": { "d": [1] } }"#;
        let err = SeedDocument::from_json(json).unwrap().into_diff().unwrap_err();
        assert!(matches!(err, StorageError::Seed(msg) if msg.contains("blends")));
    }

    #[test]
    fn test_seed_rejects_case_collision() {
        let json = r#"{
            "compounds": { "a": { "half_life_ms": 1 }, "b": { "half_life_ms": 1 } },
            "blends": { "m": { "a": 1.0, "b": 1.0 } },
            "frequencies": { "Daily": [1], "daily": [2] }
        }"#;
        let err = SeedDocument::from_json(json).unwrap().into_diff().unwrap_err();
        assert!(matches!(
            err,
            StorageError::Validation(ValidationError::DuplicateKey(key)) if key == "Daily"
        ));
    }

    #[test]
    fn test_seed_rejects_unknown_blend_component() {
        let json = r#"{
            "compounds": { "a": { "half_life_ms": 1 } },
            "blends": { "m": { "a": 1.0, "z": 1.0 } },
            "frequencies": { "d": [1] }
        }"#;
        let err = SeedDocument::from_json(json).unwrap().into_diff().unwrap_err();
        assert!(matches!(
            err,
            StorageError::Validation(ValidationError::UnknownComponent { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_or_garbled_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(SeedDocument::load(&missing).await, Err(StorageError::Seed(_))));

        let garbled = dir.path().join("seed.json");
        std::fs::write(&garbled, "{ not json").unwrap();
        assert!(matches!(SeedDocument::load(&garbled).await, Err(StorageError::Seed(_))));
    }
}
