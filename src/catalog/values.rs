// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Validated catalog values.
//!
//! Durations are serialized as integer milliseconds. All deserialization goes
//! through the same validating constructors as direct construction.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::names::{CaseFold, CompoundName};
use super::ValidationError;

fn default_pct_active() -> f64 {
    1.0
}

fn duration_to_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Durations are stored as integer milliseconds, so anything finer would
/// not survive a round trip.
fn whole_millis(d: Duration) -> bool {
    d.subsec_nanos() % 1_000_000 == 0
}

/// Pharmacokinetic facts about one compound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CompoundInfoRepr", into = "CompoundInfoRepr")]
pub struct CompoundInfo {
    half_life: Duration,
    pct_active: f64,
    note: String,
}

#[derive(Serialize, Deserialize)]
struct CompoundInfoRepr {
    half_life_ms: u64,
    #[serde(default = "default_pct_active")]
    pct_active: f64,
    #[serde(default)]
    note: String,
}

impl CompoundInfo {
    pub fn new(
        half_life: Duration,
        pct_active: f64,
        note: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        if half_life < Duration::from_millis(1) {
            return Err(ValidationError::NonPositiveHalfLife);
        }
        if !whole_millis(half_life) {
            return Err(ValidationError::FractionalMillis(half_life));
        }
        // Written so NaN fails too
        if !(pct_active > 0.0 && pct_active <= 1.0) {
            return Err(ValidationError::PercentActiveOutOfRange(pct_active));
        }
        Ok(Self {
            half_life,
            pct_active,
            note: note.into(),
        })
    }

    /// Fully active compound with no note.
    pub fn with_half_life(half_life: Duration) -> Result<Self, ValidationError> {
        Self::new(half_life, default_pct_active(), String::new())
    }

    #[must_use]
    pub fn half_life(&self) -> Duration {
        self.half_life
    }

    #[must_use]
    pub fn pct_active(&self) -> f64 {
        self.pct_active
    }

    #[must_use]
    pub fn note(&self) -> &str {
        &self.note
    }
}

impl TryFrom<CompoundInfoRepr> for CompoundInfo {
    type Error = ValidationError;

    fn try_from(repr: CompoundInfoRepr) -> Result<Self, Self::Error> {
        Self::new(Duration::from_millis(repr.half_life_ms), repr.pct_active, repr.note)
    }
}

impl From<CompoundInfo> for CompoundInfoRepr {
    fn from(info: CompoundInfo) -> Self {
        Self {
            half_life_ms: duration_to_ms(info.half_life),
            pct_active: info.pct_active,
            note: info.note,
        }
    }
}

/// Sparse field update for a compound. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompoundPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub half_life_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pct_active: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl CompoundPatch {
    #[must_use]
    pub fn note(note: impl Into<String>) -> Self {
        Self {
            note: Some(note.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.half_life_ms.is_none() && self.pct_active.is_none() && self.note.is_none()
    }

    /// Produce the patched value, re-validating every field.
    pub fn apply(&self, info: &CompoundInfo) -> Result<CompoundInfo, ValidationError> {
        CompoundInfo::new(
            self.half_life_ms
                .map(Duration::from_millis)
                .unwrap_or(info.half_life),
            self.pct_active.unwrap_or(info.pct_active),
            self.note.clone().unwrap_or_else(|| info.note.clone()),
        )
    }
}

/// Weighted mix of compounds. Always at least two components.
///
/// Component names are not checked against the compound catalog here; that
/// happens where all catalogs are visible at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<CompoundName, f64>", into = "BTreeMap<CompoundName, f64>")]
pub struct BlendValue(BTreeMap<CompoundName, f64>);

impl BlendValue {
    pub fn new(components: BTreeMap<CompoundName, f64>) -> Result<Self, ValidationError> {
        if components.len() < 2 {
            return Err(ValidationError::TooFewComponents(components.len()));
        }
        for (name, weight) in &components {
            if !(*weight > 0.0 && weight.is_finite()) {
                return Err(ValidationError::NonPositiveComponent {
                    component: name.to_string(),
                    weight: *weight,
                });
            }
        }
        Ok(Self(components))
    }

    /// Convenience constructor from wire-form names.
    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a str, f64)>,
    ) -> Result<Self, ValidationError> {
        let mut components = BTreeMap::new();
        for (wire, weight) in pairs {
            components.insert(CompoundName::parse_wire(wire)?, weight);
        }
        Self::new(components)
    }

    #[must_use]
    pub fn components(&self) -> &BTreeMap<CompoundName, f64> {
        &self.0
    }

    pub fn compound_names(&self) -> impl Iterator<Item = &CompoundName> {
        self.0.keys()
    }

    /// Lowercase every component name. Fails if two components collide.
    pub fn case_folded(&self) -> Result<Self, ValidationError> {
        let mut folded = BTreeMap::new();
        for (name, weight) in &self.0 {
            let key = name.case_folded();
            if folded.insert(key, *weight).is_some() {
                return Err(ValidationError::DuplicateKey(name.to_string()));
            }
        }
        Ok(Self(folded))
    }
}

impl TryFrom<BTreeMap<CompoundName, f64>> for BlendValue {
    type Error = ValidationError;

    fn try_from(components: BTreeMap<CompoundName, f64>) -> Result<Self, Self::Error> {
        Self::new(components)
    }
}

impl From<BlendValue> for BTreeMap<CompoundName, f64> {
    fn from(value: BlendValue) -> Self {
        value.0
    }
}

/// Ordered, non-empty dosing schedule of positive intervals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u64>", into = "Vec<u64>")]
pub struct FrequencyValue(Vec<Duration>);

impl FrequencyValue {
    pub fn new(intervals: Vec<Duration>) -> Result<Self, ValidationError> {
        if intervals.is_empty() {
            return Err(ValidationError::EmptySchedule);
        }
        for (index, interval) in intervals.iter().enumerate() {
            if *interval < Duration::from_millis(1) {
                return Err(ValidationError::NonPositiveInterval(index));
            }
            if !whole_millis(*interval) {
                return Err(ValidationError::FractionalMillis(*interval));
            }
        }
        Ok(Self(intervals))
    }

    /// Single repeating interval.
    pub fn every(interval: Duration) -> Result<Self, ValidationError> {
        Self::new(vec![interval])
    }

    #[must_use]
    pub fn intervals(&self) -> &[Duration] {
        &self.0
    }
}

impl TryFrom<Vec<u64>> for FrequencyValue {
    type Error = ValidationError;

    fn try_from(ms: Vec<u64>) -> Result<Self, Self::Error> {
        Self::new(ms.into_iter().map(Duration::from_millis).collect())
    }
}

impl From<FrequencyValue> for Vec<u64> {
    fn from(value: FrequencyValue) -> Self {
        value.0.into_iter().map(duration_to_ms).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_compound_info_validation() {
        assert!(matches!(
            CompoundInfo::new(Duration::ZERO, 1.0, ""),
            Err(ValidationError::NonPositiveHalfLife)
        ));
        assert!(CompoundInfo::new(HOUR, 0.0, "").is_err());
        assert!(CompoundInfo::new(HOUR, 1.5, "").is_err());
        assert!(CompoundInfo::new(HOUR, f64::NAN, "").is_err());
        let info = CompoundInfo::new(HOUR, 0.7, "ester").unwrap();
        assert_eq!(info.pct_active(), 0.7);
    }

    #[test]
    fn test_sub_millisecond_durations_rejected() {
        assert!(matches!(
            CompoundInfo::new(Duration::from_micros(500), 1.0, ""),
            Err(ValidationError::NonPositiveHalfLife)
        ));
        assert!(matches!(
            CompoundInfo::new(Duration::from_micros(1500), 1.0, ""),
            Err(ValidationError::FractionalMillis(_))
        ));
        assert!(matches!(
            FrequencyValue::new(vec![HOUR, Duration::from_micros(999)]),
            Err(ValidationError::NonPositiveInterval(1))
        ));
        assert!(matches!(
            FrequencyValue::every(HOUR + Duration::from_nanos(1)),
            Err(ValidationError::FractionalMillis(_))
        ));

        // The smallest accepted value survives the wire form
        let info = CompoundInfo::with_half_life(Duration::from_millis(1)).unwrap();
        let back: CompoundInfo = serde_json::from_str(&serde_json::to_string(&info).unwrap()).unwrap();
        assert_eq!(back, info);
        let freq = FrequencyValue::every(Duration::from_millis(1)).unwrap();
        let back: FrequencyValue = serde_json::from_str(&serde_json::to_string(&freq).unwrap()).unwrap();
        assert_eq!(back, freq);
    }

    #[test]
    fn test_compound_info_serde_defaults() {
        let info: CompoundInfo = serde_json::from_str(r#"{"half_life_ms": 3600000}"#).unwrap();
        assert_eq!(info.half_life(), HOUR);
        assert_eq!(info.pct_active(), 1.0);
        assert_eq!(info.note(), "");

        let bad: Result<CompoundInfo, _> = serde_json::from_str(r#"{"half_life_ms": 0}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_patch_only_touches_given_fields() {
        let info = CompoundInfo::new(HOUR, 0.5, "old").unwrap();
        let patched = CompoundPatch::note("new").apply(&info).unwrap();
        assert_eq!(patched.note(), "new");
        assert_eq!(patched.half_life(), HOUR);
        assert_eq!(patched.pct_active(), 0.5);

        let invalid = CompoundPatch {
            pct_active: Some(2.0),
            ..Default::default()
        };
        assert!(invalid.apply(&info).is_err());
    }

    #[test]
    fn test_blend_requires_two_components() {
        assert!(matches!(
            BlendValue::from_pairs([("a", 1.0)]),
            Err(ValidationError::TooFewComponents(1))
        ));
    }

    #[test]
    fn test_blend_rejects_non_positive_component() {
        assert!(matches!(
            BlendValue::from_pairs([("a", 0.0), ("b", 1.0)]),
            Err(ValidationError::NonPositiveComponent { .. })
        ));
    }

    #[test]
    fn test_blend_accepts_valid_components() {
        let blend = BlendValue::from_pairs([("a", 1.0), ("b", 2.0)]).unwrap();
        assert_eq!(blend.components().len(), 2);

        let json = serde_json::to_string(&blend).unwrap();
        assert_eq!(json, r#"{"a":1.0,"b":2.0}"#);
        let back: BlendValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, blend);
    }

    #[test]
    fn test_blend_case_fold_collision() {
        let blend = BlendValue::from_pairs([("T=A", 1.0), ("t=a", 2.0)]).unwrap();
        assert!(matches!(
            blend.case_folded(),
            Err(ValidationError::DuplicateKey(_))
        ));
    }

    #[test]
    fn test_frequency_validation() {
        assert!(matches!(
            FrequencyValue::new(vec![]),
            Err(ValidationError::EmptySchedule)
        ));
        assert!(matches!(
            FrequencyValue::new(vec![HOUR, Duration::ZERO]),
            Err(ValidationError::NonPositiveInterval(1))
        ));
        let freq: FrequencyValue = serde_json::from_str("[3600000, 7200000]").unwrap();
        assert_eq!(freq.intervals(), &[HOUR, HOUR * 2]);
    }
}
