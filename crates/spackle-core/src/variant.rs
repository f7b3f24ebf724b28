//! Build variants.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The shape of a variant and its legal values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum VariantKind {
    /// `+name` / `~name`.
    Bool,
    /// Exactly one of `values`.
    Single {
        /// Legal values.
        values: Vec<String>,
    },
    /// A non-empty subset of `values`.
    Multi {
        /// Legal values.
        values: Vec<String>,
    },
}

/// A variant value, either bound on a concrete spec or required by a constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariantValue {
    /// Boolean variant.
    Bool(bool),
    /// Single-valued variant.
    Single(String),
    /// Multi-valued variant.
    Multi(BTreeSet<String>),
}

impl VariantValue {
    /// Parse the right-hand side of `name=value`.
    ///
    /// `true`/`false` become booleans and comma lists become sets. The result
    /// is refined against the declaration by [`VariantDef::normalize`].
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "true" | "True" => Self::Bool(true),
            "false" | "False" => Self::Bool(false),
            _ if raw.contains(',') => Self::Multi(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            _ => Self::Single(raw.to_string()),
        }
    }

    /// Whether this bound value meets `requirement`.
    ///
    /// A multi-valued requirement is met when its values are a subset of the
    /// bound values.
    #[must_use]
    pub fn satisfies(&self, requirement: &Self) -> bool {
        match (self, requirement) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Single(a), Self::Single(b)) => a == b,
            (Self::Multi(bound), Self::Multi(required)) => required.is_subset(bound),
            (Self::Multi(bound), Self::Single(required)) => bound.contains(required),
            _ => false,
        }
    }

    /// Render as it appears in spec syntax for `name`.
    #[must_use]
    pub fn render(&self, name: &str) -> String {
        match self {
            Self::Bool(true) => format!("+{name}"),
            Self::Bool(false) => format!("~{name}"),
            other => format!("{name}={other}"),
        }
    }
}

impl fmt::Display for VariantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Single(s) => f.write_str(s),
            Self::Multi(values) => {
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    f.write_str(value)?;
                }
                Ok(())
            }
        }
    }
}

/// A variant declared by a package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariantDef {
    /// Variant name.
    pub name: String,
    /// Shape and domain.
    #[serde(flatten)]
    pub kind: VariantKind,
    /// Value used when nothing else decides.
    pub default: VariantValue,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl VariantDef {
    /// A boolean variant.
    #[must_use]
    pub fn boolean(name: impl Into<String>, default: bool) -> Self {
        Self {
            name: name.into(),
            kind: VariantKind::Bool,
            default: VariantValue::Bool(default),
            description: String::new(),
        }
    }

    /// A single-valued variant.
    #[must_use]
    pub fn single(name: impl Into<String>, values: &[&str], default: &str) -> Self {
        Self {
            name: name.into(),
            kind: VariantKind::Single {
                values: values.iter().map(|s| (*s).to_string()).collect(),
            },
            default: VariantValue::Single(default.to_string()),
            description: String::new(),
        }
    }

    /// A multi-valued variant.
    #[must_use]
    pub fn multi(name: impl Into<String>, values: &[&str], defaults: &[&str]) -> Self {
        Self {
            name: name.into(),
            kind: VariantKind::Multi {
                values: values.iter().map(|s| (*s).to_string()).collect(),
            },
            default: VariantValue::Multi(defaults.iter().map(|s| (*s).to_string()).collect()),
            description: String::new(),
        }
    }

    /// Attach a description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Legal values of a single- or multi-valued variant; empty for booleans.
    #[must_use]
    pub fn values(&self) -> &[String] {
        match &self.kind {
            VariantKind::Bool => &[],
            VariantKind::Single { values } | VariantKind::Multi { values } => values,
        }
    }

    /// Whether this is a multi-valued variant.
    #[must_use]
    pub const fn is_multi(&self) -> bool {
        matches!(self.kind, VariantKind::Multi { .. })
    }

    /// Coerce a parsed value to this variant's shape.
    ///
    /// Returns `None` when the value cannot be legal for this variant.
    #[must_use]
    pub fn normalize(&self, value: &VariantValue) -> Option<VariantValue> {
        let normalized = match (&self.kind, value) {
            (VariantKind::Bool, VariantValue::Bool(b)) => VariantValue::Bool(*b),
            (VariantKind::Single { .. }, VariantValue::Single(s)) => VariantValue::Single(s.clone()),
            (VariantKind::Single { .. }, VariantValue::Bool(b)) => VariantValue::Single(b.to_string()),
            (VariantKind::Multi { .. }, VariantValue::Single(s)) => {
                VariantValue::Multi(std::iter::once(s.clone()).collect())
            }
            (VariantKind::Multi { .. }, VariantValue::Multi(set)) => VariantValue::Multi(set.clone()),
            _ => return None,
        };
        self.is_legal(&normalized).then_some(normalized)
    }

    /// Whether `value` is in this variant's domain.
    #[must_use]
    pub fn is_legal(&self, value: &VariantValue) -> bool {
        match (&self.kind, value) {
            (VariantKind::Bool, VariantValue::Bool(_)) => true,
            (VariantKind::Single { values }, VariantValue::Single(v)) => values.contains(v),
            (VariantKind::Multi { values }, VariantValue::Multi(set)) => {
                !set.is_empty() && set.iter().all(|v| values.contains(v))
            }
            _ => false,
        }
    }
}
