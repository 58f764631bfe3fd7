// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Case folding of diff keys.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use super::{Diff, FullDiff};
use crate::catalog::{CaseFold, ValidationError};

/// Tracks folded keys and reports the offending original on a collision.
struct KeyFolder<'a, K> {
    seen: BTreeMap<K, &'a K>,
}

impl<'a, K: CaseFold + Ord + Clone + Display> KeyFolder<'a, K> {
    fn new() -> Self {
        Self {
            seen: BTreeMap::new(),
        }
    }

    fn fold(&mut self, original: &'a K) -> Result<K, ValidationError> {
        let folded = original.case_folded();
        if let Some(previous) = self.seen.get(&folded) {
            // Blame whichever spelling isn't already lowercase
            let offender = if *original == folded { *previous } else { original };
            return Err(ValidationError::DuplicateKey(offender.to_string()));
        }
        self.seen.insert(folded.clone(), original);
        Ok(folded)
    }
}

/// Lowercase every key of a proposed diff, transforming values on the way.
///
/// Fails with [`ValidationError::DuplicateKey`] when two keys of the same
/// section fold to the same name.
pub fn fold_diff<K, V, F>(diff: &Diff<K, V>, transform: F) -> Result<Diff<K, V>, ValidationError>
where
    K: CaseFold + Ord + Clone + Display,
    F: Fn(&V) -> Result<V, ValidationError>,
{
    let mut deletes = KeyFolder::new();
    let mut delete = BTreeSet::new();
    for name in &diff.delete {
        delete.insert(deletes.fold(name)?);
    }

    let mut adds = KeyFolder::new();
    let mut add = BTreeMap::new();
    for (name, value) in &diff.add {
        add.insert(adds.fold(name)?, transform(value)?);
    }

    Ok(Diff { delete, add })
}

/// [`fold_diff`] for the durable form. Prior values are transformed too.
pub fn fold_full_diff<K, V, F>(
    diff: &FullDiff<K, V>,
    transform: F,
) -> Result<FullDiff<K, V>, ValidationError>
where
    K: CaseFold + Ord + Clone + Display,
    F: Fn(&V) -> Result<V, ValidationError>,
{
    let fold_map = |map: &BTreeMap<K, V>| -> Result<BTreeMap<K, V>, ValidationError> {
        let mut folder = KeyFolder::new();
        let mut out = BTreeMap::new();
        for (name, value) in map {
            out.insert(folder.fold(name)?, transform(value)?);
        }
        Ok(out)
    };

    Ok(FullDiff {
        delete: fold_map(&diff.delete)?,
        add: fold_map(&diff.add)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BlendName, BlendValue, FrequencyName};
    use crate::diff::DiffData;

    fn freq_diff(delete: &[&str]) -> Diff<FrequencyName, crate::catalog::FrequencyValue> {
        Diff {
            delete: delete.iter().map(|s| FrequencyName::new(*s).unwrap()).collect(),
            add: BTreeMap::new(),
        }
    }

    #[test]
    fn test_fold_collision_names_uppercase_key() {
        let err = fold_diff(&freq_diff(&["a", "A"]), |v| Ok(v.clone())).unwrap_err();
        assert_eq!(err, ValidationError::DuplicateKey("A".to_string()));
    }

    #[test]
    fn test_fold_without_collision() {
        let folded = fold_diff(&freq_diff(&["a", "b"]), |v| Ok(v.clone())).unwrap();
        let names: Vec<&str> = folded.delete.iter().map(FrequencyName::as_str).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_fold_same_name_in_delete_and_add_is_fine() {
        let mut data = DiffData::default();
        let name = BlendName::new("Mix").unwrap();
        data.blends.delete.insert(name.clone());
        data.blends.add.insert(
            name,
            BlendValue::from_pairs([("T=A", 1.0), ("T=B", 2.0)]).unwrap(),
        );

        let folded = data.case_fold().unwrap();
        let mix = BlendName::new("mix").unwrap();
        assert!(folded.blends.delete.contains(&mix));
        let components: Vec<String> = folded.blends.add[&mix]
            .compound_names()
            .map(ToString::to_string)
            .collect();
        assert_eq!(components, vec!["t=a", "t=b"]);
    }
}
