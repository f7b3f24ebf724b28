//! Compiler specs.

use crate::error::{Error, Result};
use crate::version::{Version, VersionRange};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

fn parse_name<'a>(input: &str, name: &'a str) -> Result<&'a str> {
    let name = name.trim();
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(Error::invalid_spec(input, "invalid compiler name"));
    }
    Ok(name)
}

/// A concrete compiler, `name@version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CompilerSpec {
    /// Compiler name, e.g. `gcc`.
    pub name: String,
    /// Exact version.
    pub version: Version,
}

impl CompilerSpec {
    /// Create a compiler spec.
    #[must_use]
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Parse `name@version`.
    ///
    /// # Errors
    /// Fails when the name or version is missing or malformed.
    pub fn parse(input: &str) -> Result<Self> {
        let (name, version) = input
            .trim()
            .split_once('@')
            .ok_or_else(|| Error::invalid_spec(input, "compiler needs an exact version"))?;
        let name = parse_name(input, name)?;
        let version = Version::parse(version.trim_start_matches('='))?;
        Ok(Self::new(name, version))
    }
}

impl fmt::Display for CompilerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

impl FromStr for CompilerSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CompilerSpec {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<CompilerSpec> for String {
    fn from(value: CompilerSpec) -> Self {
        value.to_string()
    }
}

/// A compiler requirement, `name[@range]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CompilerConstraint {
    /// Compiler name.
    pub name: String,
    /// Admissible versions; `None` admits any.
    pub versions: Option<VersionRange>,
}

impl CompilerConstraint {
    /// Any version of the named compiler.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            versions: None,
        }
    }

    /// Parse `name[@range]`.
    ///
    /// # Errors
    /// Fails on an invalid name or range.
    pub fn parse(input: &str) -> Result<Self> {
        let (name, versions) = match input.trim().split_once('@') {
            Some((name, range)) => (name, Some(VersionRange::parse(range)?)),
            None => (input, None),
        };
        Ok(Self {
            name: parse_name(input, name)?.to_string(),
            versions,
        })
    }

    /// Whether `compiler` meets this requirement.
    #[must_use]
    pub fn matches(&self, compiler: &CompilerSpec) -> bool {
        self.name == compiler.name
            && self
                .versions
                .as_ref()
                .is_none_or(|range| range.contains(&compiler.version))
    }
}

impl fmt::Display for CompilerConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(versions) = &self.versions {
            write!(f, "@{versions}")?;
        }
        Ok(())
    }
}

impl FromStr for CompilerConstraint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CompilerConstraint {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<CompilerConstraint> for String {
    fn from(value: CompilerConstraint) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_compiler_spec() {
        let gcc = CompilerSpec::parse("gcc@12.2.0").unwrap();
        assert_eq!(gcc.name, "gcc");
        assert_eq!(gcc.to_string(), "gcc@12.2.0");
        assert!(CompilerSpec::parse("gcc").is_err());
        assert!(CompilerSpec::parse("@12").is_err());
    }

    #[test]
    fn constraint_matches() {
        let gcc12 = CompilerSpec::parse("gcc@12.2.0").unwrap();
        assert!(CompilerConstraint::parse("gcc").unwrap().matches(&gcc12));
        assert!(CompilerConstraint::parse("gcc@12").unwrap().matches(&gcc12));
        assert!(!CompilerConstraint::parse("gcc@:11").unwrap().matches(&gcc12));
        assert!(!CompilerConstraint::parse("clang").unwrap().matches(&gcc12));
    }
}
