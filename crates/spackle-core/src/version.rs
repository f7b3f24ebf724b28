//! Versions and version ranges.
//!
//! A version is a sequence of numeric and alphabetic components separated by
//! `.`, `-` or `_`. Components compare pairwise: alphabetic components sort
//! below numbers, while the development names (`develop`, `main`, ...) sort
//! above every number. A version sorts before any of its extensions, so
//! `1.0 < 1.0.1`.
//!
//! Ranges follow the familiar `lo:hi` syntax. The upper bound is inclusive of
//! every version it prefixes: `:1.0` admits `1.0.7` but not `1.1`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Development version names, lowest first.
const INFINITY_VERSIONS: [&str; 6] = ["stable", "trunk", "head", "master", "main", "develop"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Component {
    // Variant order is the comparison order.
    Alpha(String),
    Numeric(u64),
    Infinity(u8),
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alpha(s) => f.write_str(s),
            Self::Numeric(n) => write!(f, "{n}"),
            Self::Infinity(i) => f.write_str(INFINITY_VERSIONS[*i as usize]),
        }
    }
}

/// A concrete package version such as `1.2.3`, `2.0-rc1` or `develop`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    text: String,
    components: SmallVec<[Component; 4]>,
}

impl Version {
    /// Parse a version string.
    ///
    /// # Errors
    /// Returns [`Error::InvalidVersion`] for empty input or characters
    /// outside `[A-Za-z0-9._-]`.
    pub fn parse(input: &str) -> Result<Self> {
        let text = input.trim();
        if text.is_empty() {
            return Err(Error::invalid_version(input, "empty version"));
        }
        if let Some(bad) = text
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
        {
            return Err(Error::invalid_version(
                input,
                format!("unexpected character '{bad}'"),
            ));
        }

        let bytes = text.as_bytes();
        let mut components = SmallVec::new();
        let mut i = 0;
        while i < bytes.len() {
            let start = i;
            if bytes[i].is_ascii_digit() {
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let n = text[start..i]
                    .parse::<u64>()
                    .map_err(|e| Error::invalid_version(input, e.to_string()))?;
                components.push(Component::Numeric(n));
            } else if bytes[i].is_ascii_alphabetic() {
                while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                    i += 1;
                }
                let word = &text[start..i];
                components.push(
                    INFINITY_VERSIONS
                        .iter()
                        .position(|inf| *inf == word)
                        .map_or_else(|| Component::Alpha(word.to_string()), |idx| {
                            Component::Infinity(idx as u8)
                        }),
                );
            } else {
                i += 1;
            }
        }

        if components.is_empty() {
            return Err(Error::invalid_version(input, "no version components"));
        }

        Ok(Self {
            text: text.to_string(),
            components,
        })
    }

    /// The version as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Whether this is a development version (`develop`, `main`, ...).
    #[must_use]
    pub fn is_infinity(&self) -> bool {
        self.components
            .iter()
            .any(|c| matches!(c, Component::Infinity(_)))
    }

    /// Whether every component of `self` starts `other`.
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.components.len() <= other.components.len()
            && self
                .components
                .iter()
                .zip(other.components.iter())
                .all(|(a, b)| a == b)
    }

    /// Number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Always false; versions have at least one component.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Dotted rendering of the components (`1-2_3` becomes `1.2.3`).
    #[must_use]
    pub fn dotted(&self) -> String {
        self.components
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.components == other.components
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.components.hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.components.cmp(&other.components)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.text
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RangeItem {
    /// `=1.2`
    Exact(Version),
    /// `1.2`, matching every version it prefixes.
    Prefix(Version),
    /// `lo:hi` with either side optional.
    Interval {
        lo: Option<Version>,
        hi: Option<Version>,
    },
}

impl RangeItem {
    fn parse(input: &str, item: &str) -> Result<Self> {
        let item = item.trim();
        if item.is_empty() {
            return Err(Error::invalid_version(input, "empty range item"));
        }
        if let Some(exact) = item.strip_prefix('=') {
            return Ok(Self::Exact(Version::parse(exact)?));
        }
        let Some((lo, hi)) = item.split_once(':') else {
            return Ok(Self::Prefix(Version::parse(item)?));
        };
        let lo = if lo.trim().is_empty() {
            None
        } else {
            Some(Version::parse(lo)?)
        };
        let hi = if hi.trim().is_empty() {
            None
        } else {
            Some(Version::parse(hi)?)
        };
        if let (Some(l), Some(h)) = (&lo, &hi)
            && l > h
            && !h.is_prefix_of(l)
        {
            return Err(Error::invalid_version(
                input,
                format!("empty range {l}:{h}"),
            ));
        }
        Ok(Self::Interval { lo, hi })
    }

    fn lower(&self) -> Option<&Version> {
        match self {
            Self::Exact(v) | Self::Prefix(v) => Some(v),
            Self::Interval { lo, .. } => lo.as_ref(),
        }
    }

    /// Whether `v` lies at or below this item's upper bound.
    fn under_upper(&self, v: &Version) -> bool {
        match self {
            Self::Exact(hi) => v <= hi,
            Self::Prefix(hi) | Self::Interval { hi: Some(hi), .. } => v <= hi || hi.is_prefix_of(v),
            Self::Interval { hi: None, .. } => true,
        }
    }

    fn contains(&self, v: &Version) -> bool {
        match self {
            Self::Exact(e) => e == v,
            Self::Prefix(p) => p.is_prefix_of(v),
            Self::Interval { lo, .. } => lo.as_ref().is_none_or(|lo| lo <= v) && self.under_upper(v),
        }
    }

    fn intersects(&self, other: &Self) -> bool {
        self.lower().is_none_or(|lo| other.under_upper(lo))
            && other.lower().is_none_or(|lo| self.under_upper(lo))
    }
}

impl fmt::Display for RangeItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "={v}"),
            Self::Prefix(v) => write!(f, "{v}"),
            Self::Interval { lo, hi } => {
                if let Some(lo) = lo {
                    write!(f, "{lo}")?;
                }
                f.write_str(":")?;
                if let Some(hi) = hi {
                    write!(f, "{hi}")?;
                }
                Ok(())
            }
        }
    }
}

/// A union of version ranges, e.g. `1.2:1.4,=2.0,3:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionRange {
    items: SmallVec<[RangeItem; 1]>,
}

impl VersionRange {
    /// Parse a comma-separated range list.
    ///
    /// # Errors
    /// Returns [`Error::InvalidVersion`] for malformed items or ranges whose
    /// lower bound exceeds the upper bound.
    pub fn parse(input: &str) -> Result<Self> {
        let items = input
            .split(',')
            .map(|item| RangeItem::parse(input, item))
            .collect::<Result<SmallVec<_>>>()?;
        Ok(Self { items })
    }

    /// The unbounded range `:`.
    #[must_use]
    pub fn any() -> Self {
        let mut items = SmallVec::new();
        items.push(RangeItem::Interval { lo: None, hi: None });
        Self { items }
    }

    /// The single version `=v`.
    #[must_use]
    pub fn exact(version: Version) -> Self {
        let mut items = SmallVec::new();
        items.push(RangeItem::Exact(version));
        Self { items }
    }

    /// Whether the range admits every version.
    #[must_use]
    pub fn is_any(&self) -> bool {
        self.items
            .iter()
            .any(|item| matches!(item, RangeItem::Interval { lo: None, hi: None }))
    }

    /// The pinned version, if the range is a single `=v`.
    #[must_use]
    pub fn as_exact(&self) -> Option<&Version> {
        match self.items.as_slice() {
            [RangeItem::Exact(v)] => Some(v),
            _ => None,
        }
    }

    /// Whether `version` lies in the range.
    #[must_use]
    pub fn contains(&self, version: &Version) -> bool {
        self.items.iter().any(|item| item.contains(version))
    }

    /// Whether some version could lie in both ranges.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.items
            .iter()
            .any(|a| other.items.iter().any(|b| a.intersects(b)))
    }
}

impl Default for VersionRange {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{item}")?;
        }
        Ok(())
    }
}

impl FromStr for VersionRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionRange {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<VersionRange> for String {
    fn from(value: VersionRange) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn r(s: &str) -> VersionRange {
        VersionRange::parse(s).unwrap()
    }

    #[test_case("1.0", "1.0.1" ; "prefix sorts first")]
    #[test_case("1.9", "1.10" ; "numeric not lexical")]
    #[test_case("1.0a", "1.0.1" ; "alpha below number")]
    #[test_case("2.0", "develop" ; "develop above numbers")]
    #[test_case("master", "develop" ; "infinity order")]
    #[test_case("trunk", "main" ; "trunk below main")]
    #[test_case("1.2-rc1", "1.2.1" ; "rc below patch")]
    fn ordering(lower: &str, higher: &str) {
        assert!(v(lower) < v(higher), "{lower} < {higher}");
    }

    #[test]
    fn separators_do_not_matter() {
        assert_eq!(v("1.2.3"), v("1-2_3"));
        assert_eq!(v("1-2_3").as_str(), "1-2_3");
        assert_eq!(v("1-2_3").dotted(), "1.2.3");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("1.0+build").is_err());
        assert!(Version::parse("...").is_err());
    }

    #[test_case(":1.0", "1.0", true)]
    #[test_case(":1.0", "1.0.7", true)]
    #[test_case(":1.0", "1.1", false)]
    #[test_case("0.9:1.0", "0.9", true)]
    #[test_case("1.0:", "0.9", false)]
    #[test_case("1.2", "1.2.5", true)]
    #[test_case("1.2", "1.3", false)]
    #[test_case("=1.2", "1.2.5", false)]
    #[test_case("=1.2", "1.2", true)]
    #[test_case("1.0,=2.0", "2.0", true)]
    #[test_case(":", "develop", true)]
    fn range_contains(range: &str, version: &str, expected: bool) {
        assert_eq!(r(range).contains(&v(version)), expected);
    }

    #[test_case(":1.0", "1.0.5:", true)]
    #[test_case(":1.0", "1.1:", false)]
    #[test_case("1.0:2.0", "=1.5", true)]
    #[test_case("=1.0", "1.1:", false)]
    #[test_case("2", "2.4:", true)]
    #[test_case("1:2,5:", "3:4", false)]
    fn range_intersects(a: &str, b: &str, expected: bool) {
        assert_eq!(r(a).intersects(&r(b)), expected);
        assert_eq!(r(b).intersects(&r(a)), expected);
    }

    #[test]
    fn empty_range_rejected() {
        assert!(VersionRange::parse("2.0:1.0").is_err());
        assert!(VersionRange::parse("1.0.5:1.0").is_ok());
        assert!(VersionRange::parse("1.0,").is_err());
    }

    #[test]
    fn display_roundtrip() {
        for s in ["1.0:2.0", ":1.0", "1.0:", ":", "=1.2", "1.2,3:"] {
            assert_eq!(r(s).to_string(), s);
        }
        assert!(r(":").is_any());
        assert_eq!(r("=1.2").as_exact(), Some(&v("1.2")));
    }

    #[test]
    fn serde_as_string() {
        let json = sonic_rs::to_string(&r("1.0:2.0")).unwrap();
        assert_eq!(json, "\"1.0:2.0\"");
        let back: Version = sonic_rs::from_str("\"2.1\"").unwrap();
        assert_eq!(back, v("2.1"));
    }

    proptest! {
        #[test]
        fn ordering_is_total_and_consistent(a in "[0-9]{1,3}(\\.[0-9a-c]{1,2}){0,3}", b in "[0-9]{1,3}(\\.[0-9a-c]{1,2}){0,3}") {
            let (va, vb) = (v(&a), v(&b));
            prop_assert_eq!(va.cmp(&vb), vb.cmp(&va).reverse());
            prop_assert_eq!(va == vb, va.cmp(&vb) == Ordering::Equal);
        }

        #[test]
        fn exact_range_contains_only_itself(a in "[0-9]{1,2}(\\.[0-9]{1,2}){0,2}", b in "[0-9]{1,2}(\\.[0-9]{1,2}){0,2}") {
            let range = VersionRange::exact(v(&a));
            prop_assert_eq!(range.contains(&v(&b)), v(&a) == v(&b));
        }
    }
}
