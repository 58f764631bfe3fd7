// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Validated catalog names.
//!
//! Every name type rejects empty strings, a leading `.` and any `=` at
//! construction time, so nothing invalid ever reaches storage.
//!
//! Compound names carry an optional variant and have a wire form:
//!
//! ```
//! use dose_catalog::catalog::CompoundName;
//!
//! let plain: CompoundName = "testosterone".parse().unwrap();
//! assert_eq!(plain.variant(), "");
//!
//! let ester: CompoundName = "testosterone=enanthate".parse().unwrap();
//! assert_eq!(ester.base().as_str(), "testosterone");
//! assert_eq!(ester.variant(), "enanthate");
//! assert_eq!(ester.to_string(), "testosterone=enanthate");
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ValidationError;

/// Separator between base and variant in the wire form of a [`CompoundName`].
pub const VARIANT_SEPARATOR: char = '=';

fn validate_name(kind: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::EmptyName { kind });
    }
    if value.starts_with('.') {
        return Err(ValidationError::ForbiddenLeadingDot {
            kind,
            name: value.to_string(),
        });
    }
    if value.contains(VARIANT_SEPARATOR) {
        return Err(ValidationError::ForbiddenChar {
            kind,
            name: value.to_string(),
            ch: VARIANT_SEPARATOR,
        });
    }
    Ok(())
}

/// Lowercases a key. Used by diff case-folding.
pub trait CaseFold: Sized {
    fn case_folded(&self) -> Self;
}

macro_rules! simple_name {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
                let value = value.into();
                validate_name($kind, &value)?;
                Ok(Self(value))
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl CaseFold for $name {
            fn case_folded(&self) -> Self {
                // Lowercasing can't introduce '=' or a leading '.'
                Self(self.0.to_lowercase())
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(name: $name) -> Self {
                name.0
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

simple_name!(
    /// Base part of a compound name (e.g. `testosterone`).
    CompoundBase,
    "compound base"
);

simple_name!(
    /// Name of a blend of compounds.
    BlendName,
    "blend"
);

simple_name!(
    /// Name of a dosing frequency.
    FrequencyName,
    "frequency"
);

/// Name of a compound: a base plus a (possibly empty) variant.
///
/// Ordering, equality and hashing only look at `(base, variant)`. The
/// all-variants marker is a query modifier and is never serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CompoundName {
    base: CompoundBase,
    variant: String,
    all_variants: bool,
}

impl CompoundName {
    #[must_use]
    pub fn new(base: CompoundBase, variant: impl Into<String>) -> Self {
        Self {
            base,
            variant: variant.into(),
            all_variants: false,
        }
    }

    /// Name without a variant.
    #[must_use]
    pub fn plain(base: CompoundBase) -> Self {
        Self::new(base, String::new())
    }

    /// Query name matching every variant of `base`.
    #[must_use]
    pub fn all_variants_of(base: CompoundBase) -> Self {
        Self {
            base,
            variant: String::new(),
            all_variants: true,
        }
    }

    /// Parse the wire form `base` or `base=variant`.
    pub fn parse_wire(wire: &str) -> Result<Self, ValidationError> {
        match wire.split_once(VARIANT_SEPARATOR) {
            Some((base, variant)) => Ok(Self::new(CompoundBase::new(base)?, variant)),
            None => Ok(Self::plain(CompoundBase::new(wire)?)),
        }
    }

    #[must_use]
    pub fn base(&self) -> &CompoundBase {
        &self.base
    }

    #[must_use]
    pub fn variant(&self) -> &str {
        &self.variant
    }

    #[must_use]
    pub fn selects_all_variants(&self) -> bool {
        self.all_variants
    }

    /// Whether `other` is selected by this name when used as a query.
    #[must_use]
    pub fn matches(&self, other: &CompoundName) -> bool {
        if self.all_variants {
            self.base == other.base
        } else {
            self == other
        }
    }
}

impl CaseFold for CompoundName {
    fn case_folded(&self) -> Self {
        Self {
            base: self.base.case_folded(),
            variant: self.variant.to_lowercase(),
            all_variants: self.all_variants,
        }
    }
}

impl PartialEq for CompoundName {
    fn eq(&self, other: &Self) -> bool {
        self.base == other.base && self.variant == other.variant
    }
}

impl Eq for CompoundName {}

impl PartialOrd for CompoundName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CompoundName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.base
            .cmp(&other.base)
            .then_with(|| self.variant.cmp(&other.variant))
    }
}

impl Hash for CompoundName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.base.hash(state);
        self.variant.hash(state);
    }
}

impl fmt::Display for CompoundName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.variant.is_empty() {
            write!(f, "{}", self.base)
        } else {
            write!(f, "{}{}{}", self.base, VARIANT_SEPARATOR, self.variant)
        }
    }
}

impl FromStr for CompoundName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_wire(s)
    }
}

impl TryFrom<String> for CompoundName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_wire(&value)
    }
}

impl From<CompoundName> for String {
    fn from(name: CompoundName) -> Self {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn base(s: &str) -> CompoundBase {
        CompoundBase::new(s).unwrap()
    }

    #[test]
    fn test_rejects_invalid_names() {
        assert!(matches!(
            CompoundBase::new(""),
            Err(ValidationError::EmptyName { .. })
        ));
        assert!(matches!(
            BlendName::new(".hidden"),
            Err(ValidationError::ForbiddenLeadingDot { .. })
        ));
        assert!(matches!(
            FrequencyName::new("a=b"),
            Err(ValidationError::ForbiddenChar { ch: '=', .. })
        ));
        // A dot is fine anywhere but first
        assert!(BlendName::new("mix.v2").is_ok());
    }

    #[test]
    fn test_wire_form_round_trip() {
        let name = CompoundName::parse_wire("t=a").unwrap();
        assert_eq!(name.base().as_str(), "t");
        assert_eq!(name.variant(), "a");
        assert_eq!(name.to_string(), "t=a");

        let plain = CompoundName::parse_wire("t").unwrap();
        assert_eq!(plain.to_string(), "t");
        assert!(CompoundName::parse_wire("=a").is_err());
    }

    #[test]
    fn test_ordering_by_base_then_variant() {
        let names: BTreeSet<CompoundName> = ["b", "a=z", "a", "a=b"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        let wire: Vec<String> = names.iter().map(ToString::to_string).collect();
        assert_eq!(wire, vec!["a", "a=b", "a=z", "b"]);
    }

    #[test]
    fn test_all_variants_marker_is_transient() {
        let query = CompoundName::all_variants_of(base("t"));
        assert!(query.selects_all_variants());
        assert!(query.matches(&CompoundName::new(base("t"), "a")));
        assert!(!query.matches(&CompoundName::new(base("u"), "a")));

        // Marker does not survive serialization and does not affect equality
        let json = serde_json::to_string(&query).unwrap();
        assert_eq!(json, "\"t\"");
        let back: CompoundName = serde_json::from_str(&json).unwrap();
        assert!(!back.selects_all_variants());
        assert_eq!(back, CompoundName::plain(base("t")));
    }

    #[test]
    fn test_case_fold() {
        let name = CompoundName::parse_wire("Test=Enanthate").unwrap();
        assert_eq!(name.case_folded().to_string(), "test=enanthate");
        assert_eq!(BlendName::new("MIX").unwrap().case_folded().as_str(), "mix");
    }
}
