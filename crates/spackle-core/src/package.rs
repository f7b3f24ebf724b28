//! Package definitions.

use crate::error::{Error, Result};
use crate::spec::{AbstractSpec, Constraint, Parser};
use crate::variant::VariantDef;
use crate::version::{Version, VersionRange};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Dependency edge types, a small bit set over build/link/run/test.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DepTypes(u8);

impl DepTypes {
    /// Needed to build the dependent.
    pub const BUILD: Self = Self(1);
    /// Linked into the dependent.
    pub const LINK: Self = Self(1 << 1);
    /// Needed at run time.
    pub const RUN: Self = Self(1 << 2);
    /// Needed only to run the dependent's tests.
    pub const TEST: Self = Self(1 << 3);

    const NAMES: [(Self, &'static str); 4] = [
        (Self::BUILD, "build"),
        (Self::LINK, "link"),
        (Self::RUN, "run"),
        (Self::TEST, "test"),
    ];

    /// No types.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// `build,link`, the types of a plain `depends_on`.
    #[must_use]
    pub const fn default_types() -> Self {
        Self(Self::BUILD.0 | Self::LINK.0)
    }

    /// Whether no type is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether every type in `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether `test` is the only type set.
    #[must_use]
    pub const fn is_test_only(self) -> bool {
        self.0 == Self::TEST.0
    }

    /// Raw bits, for hashing.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Parse a comma-separated list such as `build,run`.
    ///
    /// # Errors
    /// Fails on unknown type names or an empty list.
    pub fn parse(input: &str) -> Result<Self> {
        let mut types = Self::empty();
        for name in input.split(',').map(str::trim) {
            let (flag, _) = Self::NAMES
                .iter()
                .find(|(_, n)| *n == name)
                .ok_or_else(|| Error::invalid_spec(input, format!("unknown dependency type '{name}'")))?;
            types |= *flag;
        }
        if types.is_empty() {
            return Err(Error::invalid_spec(input, "empty dependency type list"));
        }
        Ok(types)
    }
}

impl BitOr for DepTypes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DepTypes {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for DepTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join(","))
    }
}

impl fmt::Debug for DepTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DepTypes({self})")
    }
}

impl TryFrom<String> for DepTypes {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<DepTypes> for String {
    fn from(value: DepTypes) -> Self {
        value.to_string()
    }
}

/// A declared version of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDecl {
    /// The version.
    pub version: Version,
    /// Source checksum, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Deprecated versions are chosen only when nothing else works.
    #[serde(default)]
    pub deprecated: bool,
    /// Preferred over newer versions.
    #[serde(default)]
    pub preferred: bool,
}

impl VersionDecl {
    /// A plain version.
    #[must_use]
    pub const fn new(version: Version) -> Self {
        Self {
            version,
            checksum: None,
            deprecated: false,
            preferred: false,
        }
    }
}

/// `depends_on(target, when=...)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyDecl {
    /// Package or virtual name.
    pub target: String,
    /// Requirements on the dependency.
    #[serde(default)]
    pub constraint: Constraint,
    /// Edge types.
    #[serde(default = "DepTypes::default_types")]
    pub types: DepTypes,
    /// Activation condition on the declaring package.
    #[serde(default)]
    pub when: Constraint,
}

/// What a conflict forbids once its trigger holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ConflictTarget {
    /// A constraint on the declaring package itself, e.g. `%intel`.
    OnSelf(Constraint),
    /// A node of another package in the same DAG, e.g. `^openmpi@:3`.
    Package {
        /// Package name.
        name: String,
        /// Constraint the node must not meet.
        constraint: Constraint,
    },
}

impl ConflictTarget {
    /// Parse `%intel`-style anonymous targets or `^name...` package targets.
    ///
    /// # Errors
    /// Fails on malformed input.
    pub fn parse(input: &str) -> Result<Self> {
        let parsed = Parser::new(input).parse_parts()?;
        match (parsed.name, parsed.dependencies.as_slice()) {
            (None, []) => Ok(Self::OnSelf(parsed.constraint)),
            (None, [dep]) if parsed.constraint.is_empty() => Ok(Self::Package {
                name: dep.spec.name.clone(),
                constraint: dep.spec.constraint.clone(),
            }),
            _ => Err(Error::invalid_spec(
                input,
                "conflict must be an anonymous constraint or a single '^package'",
            )),
        }
    }
}

impl fmt::Display for ConflictTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnSelf(constraint) => write!(f, "{constraint}"),
            Self::Package { name, constraint } => {
                let rendered = AbstractSpec {
                    name: name.clone(),
                    constraint: constraint.clone(),
                    dependencies: Vec::new(),
                };
                write!(f, "^{rendered}")
            }
        }
    }
}

impl TryFrom<String> for ConflictTarget {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ConflictTarget> for String {
    fn from(value: ConflictTarget) -> Self {
        value.to_string()
    }
}

/// `conflicts(target, when=...)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictDecl {
    /// Trigger on the declaring package.
    #[serde(default)]
    pub when: Constraint,
    /// What may not hold together with the trigger.
    pub conflict: ConflictTarget,
    /// Explanation shown to users.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `provides(virtual@versions, when=...)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvidesDecl {
    /// Virtual package name.
    #[serde(rename = "virtual")]
    pub virtual_name: String,
    /// Versions of the virtual interface provided.
    #[serde(default)]
    pub versions: VersionRange,
    /// Condition on the provider.
    #[serde(default)]
    pub when: Constraint,
}

/// Build-system family, used by installers to pick a build strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildSystem {
    /// `configure && make`.
    Autotools,
    /// CMake.
    CMake,
    /// Plain makefiles.
    Makefile,
    /// Meson.
    Meson,
    /// Python packaging.
    Python,
    /// Custom install logic.
    Generic,
}

/// A capability a package declares instead of inheriting behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// Built with the given build system.
    BuildSystem(BuildSystem),
    /// Extends a language runtime; implies a `build,run` dependency on it.
    Extends(String),
}

/// An immutable package definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDef {
    /// Package name.
    pub name: String,
    /// Description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Declared versions.
    pub versions: Vec<VersionDecl>,
    /// Declared variants by name.
    #[serde(default)]
    pub variants: BTreeMap<String, VariantDef>,
    /// Dependencies.
    #[serde(default)]
    pub dependencies: Vec<DependencyDecl>,
    /// Conflicts.
    #[serde(default)]
    pub conflicts: Vec<ConflictDecl>,
    /// Provided virtuals.
    #[serde(default)]
    pub provides: Vec<ProvidesDecl>,
    /// Capabilities.
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
}

impl PackageDef {
    /// Start building a definition.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> PackageBuilder {
        PackageBuilder::new(name)
    }

    /// The declaration for `version`.
    #[must_use]
    pub fn version_decl(&self, version: &Version) -> Option<&VersionDecl> {
        self.versions.iter().find(|decl| &decl.version == version)
    }

    /// The variant named `name`.
    #[must_use]
    pub fn variant(&self, name: &str) -> Option<&VariantDef> {
        self.variants.get(name)
    }

    /// Declarations providing `virtual_name`.
    pub fn provides_for<'a>(
        &'a self,
        virtual_name: &'a str,
    ) -> impl Iterator<Item = &'a ProvidesDecl> + 'a {
        self.provides
            .iter()
            .filter(move |decl| decl.virtual_name == virtual_name)
    }

    /// The runtime this package extends, if any.
    #[must_use]
    pub fn extends(&self) -> Option<&str> {
        self.capabilities.iter().find_map(|cap| match cap {
            Capability::Extends(runtime) => Some(runtime.as_str()),
            Capability::BuildSystem(_) => None,
        })
    }

    /// The declared build system, if any.
    #[must_use]
    pub fn build_system(&self) -> Option<BuildSystem> {
        self.capabilities.iter().find_map(|cap| match cap {
            Capability::BuildSystem(system) => Some(*system),
            Capability::Extends(_) => None,
        })
    }

    /// Check internal consistency.
    ///
    /// # Errors
    /// Returns [`Error::InvalidPackage`] describing every problem found.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        let valid_name = !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid_name {
            problems.push("invalid package name".to_string());
        }
        if self.versions.is_empty() {
            problems.push("no versions declared".to_string());
        }
        let mut seen = BTreeSet::new();
        for decl in &self.versions {
            if !seen.insert(&decl.version) {
                problems.push(format!("version {} declared twice", decl.version));
            }
        }
        for (name, variant) in &self.variants {
            if name != &variant.name {
                problems.push(format!("variant '{}' stored under '{name}'", variant.name));
            }
            if !variant.is_legal(&variant.default) {
                problems.push(format!("variant '{name}' has an illegal default"));
            }
        }
        let mut check_self = |what: &str, constraint: &Constraint| {
            for (name, value) in &constraint.variants {
                match self.variants.get(name) {
                    None => problems.push(format!("{what} uses undeclared variant '{name}'")),
                    Some(def) if def.normalize(value).is_none() => {
                        problems.push(format!("{what} uses illegal value '{value}' for '{name}'"));
                    }
                    Some(_) => {}
                }
            }
        };
        for dep in &self.dependencies {
            check_self(&format!("dependency on '{}'", dep.target), &dep.when);
        }
        for conflict in &self.conflicts {
            check_self("conflict trigger", &conflict.when);
            if let ConflictTarget::OnSelf(target) = &conflict.conflict {
                check_self("conflict", target);
            }
        }
        for provided in &self.provides {
            check_self(&format!("provides '{}'", provided.virtual_name), &provided.when);
        }
        for dep in &self.dependencies {
            if dep.target == self.name {
                problems.push("package depends on itself".to_string());
            }
            if dep.types.is_empty() {
                problems.push(format!("dependency on '{}' has no types", dep.target));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidPackage {
                name: self.name.clone(),
                message: problems.join("; "),
            })
        }
    }

    /// Turn capabilities into the declarations they imply.
    pub(crate) fn lower_capabilities(&mut self) {
        let Some(runtime) = self.extends().map(str::to_string) else {
            return;
        };
        let implied = DepTypes::BUILD | DepTypes::RUN;
        if let Some(existing) = self
            .dependencies
            .iter_mut()
            .find(|dep| dep.target == runtime && dep.when.is_empty())
        {
            existing.types |= implied;
        } else {
            self.dependencies.push(DependencyDecl {
                target: runtime,
                constraint: Constraint::default(),
                types: implied,
                when: Constraint::default(),
            });
        }
    }
}

/// Fluent construction of a [`PackageDef`] from spec strings.
///
/// Parse errors are collected and reported together by [`build`](Self::build).
#[derive(Debug)]
pub struct PackageBuilder {
    def: PackageDef,
    errors: Vec<String>,
}

impl PackageBuilder {
    /// Start a definition for `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            def: PackageDef {
                name: name.into(),
                description: String::new(),
                versions: Vec::new(),
                variants: BTreeMap::new(),
                dependencies: Vec::new(),
                conflicts: Vec::new(),
                provides: Vec::new(),
                capabilities: BTreeSet::new(),
            },
            errors: Vec::new(),
        }
    }

    fn record<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.errors.push(err.to_string());
                None
            }
        }
    }

    fn push_version(mut self, version: &str, preferred: bool, deprecated: bool) -> Self {
        if let Some(version) = self.record(Version::parse(version)) {
            self.def.versions.push(VersionDecl {
                version,
                checksum: None,
                deprecated,
                preferred,
            });
        }
        self
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.def.description = description.into();
        self
    }

    /// Declare a version.
    #[must_use]
    pub fn version(self, version: &str) -> Self {
        self.push_version(version, false, false)
    }

    /// Declare a preferred version.
    #[must_use]
    pub fn preferred_version(self, version: &str) -> Self {
        self.push_version(version, true, false)
    }

    /// Declare a deprecated version.
    #[must_use]
    pub fn deprecated_version(self, version: &str) -> Self {
        self.push_version(version, false, true)
    }

    /// Declare a fully specified version.
    #[must_use]
    pub fn version_decl(mut self, decl: VersionDecl) -> Self {
        self.def.versions.push(decl);
        self
    }

    /// Declare a variant.
    #[must_use]
    pub fn variant(mut self, variant: VariantDef) -> Self {
        self.def.variants.insert(variant.name.clone(), variant);
        self
    }

    /// `depends_on(spec)` with `build,link` types.
    #[must_use]
    pub fn depends_on(self, spec: &str) -> Self {
        self.depends_on_typed(spec, DepTypes::default_types(), "")
    }

    /// `depends_on(spec, when=when)` with `build,link` types.
    #[must_use]
    pub fn depends_on_when(self, spec: &str, when: &str) -> Self {
        self.depends_on_typed(spec, DepTypes::default_types(), when)
    }

    /// `depends_on(spec, type=types, when=when)`.
    #[must_use]
    pub fn depends_on_typed(mut self, spec: &str, types: DepTypes, when: &str) -> Self {
        let target = self.record(AbstractSpec::parse(spec));
        let when = self.record(Constraint::parse(when));
        if let (Some(target), Some(when)) = (target, when) {
            if target.dependencies.is_empty() {
                self.def.dependencies.push(DependencyDecl {
                    target: target.name,
                    constraint: target.constraint,
                    types,
                    when,
                });
            } else {
                self.errors
                    .push(format!("dependency '{spec}' may not carry '^' constraints"));
            }
        }
        self
    }

    /// Unconditional `conflicts(target)`.
    #[must_use]
    pub fn conflicts(self, target: &str) -> Self {
        self.conflicts_when(target, "", None)
    }

    /// `conflicts(target, when=when, msg=reason)`.
    #[must_use]
    pub fn conflicts_when(mut self, target: &str, when: &str, reason: Option<&str>) -> Self {
        let conflict = self.record(ConflictTarget::parse(target));
        let when = self.record(Constraint::parse(when));
        if let (Some(conflict), Some(when)) = (conflict, when) {
            self.def.conflicts.push(ConflictDecl {
                when,
                conflict,
                reason: reason.map(str::to_string),
            });
        }
        self
    }

    /// Unconditional `provides(spec)`, e.g. `mpi@:3.1`.
    #[must_use]
    pub fn provides(self, spec: &str) -> Self {
        self.provides_when(spec, "")
    }

    /// `provides(spec, when=when)`.
    #[must_use]
    pub fn provides_when(mut self, spec: &str, when: &str) -> Self {
        let provided = self.record(AbstractSpec::parse(spec));
        let when = self.record(Constraint::parse(when));
        if let (Some(provided), Some(when)) = (provided, when) {
            let constraint = &provided.constraint;
            if constraint.variants.is_empty()
                && constraint.compiler.is_none()
                && provided.dependencies.is_empty()
            {
                self.def.provides.push(ProvidesDecl {
                    virtual_name: provided.name,
                    versions: provided.constraint.versions.unwrap_or_default(),
                    when,
                });
            } else {
                self.errors
                    .push(format!("provided virtual '{spec}' may only carry versions"));
            }
        }
        self
    }

    /// Declare the build system.
    #[must_use]
    pub fn build_system(mut self, system: BuildSystem) -> Self {
        self.def.capabilities.insert(Capability::BuildSystem(system));
        self
    }

    /// Extend a language runtime.
    #[must_use]
    pub fn extends(mut self, runtime: impl Into<String>) -> Self {
        self.def.capabilities.insert(Capability::Extends(runtime.into()));
        self
    }

    /// Finish the definition.
    ///
    /// # Errors
    /// Returns [`Error::InvalidPackage`] listing every parse or consistency
    /// problem.
    pub fn build(self) -> Result<PackageDef> {
        if !self.errors.is_empty() {
            return Err(Error::InvalidPackage {
                name: self.def.name,
                message: self.errors.join("; "),
            });
        }
        self.def.validate()?;
        Ok(self.def)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::VariantValue;

    #[test]
    fn dep_types_parse_and_display() {
        let types = DepTypes::parse("build,run").unwrap();
        assert!(types.contains(DepTypes::BUILD));
        assert!(!types.contains(DepTypes::LINK));
        assert_eq!(types.to_string(), "build,run");
        assert!(DepTypes::TEST.is_test_only());
        assert!(DepTypes::parse("install").is_err());
    }

    #[test]
    fn builder_collects_declarations() {
        let pkg = PackageDef::builder("hdf5")
            .version("1.12.2")
            .preferred_version("1.10.7")
            .deprecated_version("1.8.0")
            .variant(VariantDef::boolean("mpi", true))
            .depends_on_when("mpi@3:", "+mpi")
            .depends_on_typed("cmake@3.12:", DepTypes::BUILD, "")
            .conflicts_when("%intel", "@:1.10", Some("fails to build"))
            .conflicts("^openmpi@:2")
            .build()
            .unwrap();

        assert_eq!(pkg.versions.len(), 3);
        assert!(pkg.versions[1].preferred);
        assert!(pkg.versions[2].deprecated);
        assert_eq!(pkg.dependencies[0].when.variants["mpi"], VariantValue::Bool(true));
        assert_eq!(pkg.dependencies[1].types, DepTypes::BUILD);
        assert!(matches!(pkg.conflicts[0].conflict, ConflictTarget::OnSelf(_)));
        assert!(matches!(
            &pkg.conflicts[1].conflict,
            ConflictTarget::Package { name, .. } if name == "openmpi"
        ));
    }

    #[test]
    fn builder_reports_all_errors() {
        let err = PackageDef::builder("bad")
            .version("1.0")
            .version("1..0$")
            .depends_on("@@")
            .build()
            .unwrap_err();
        let Error::InvalidPackage { message, .. } = err else {
            panic!("expected InvalidPackage");
        };
        assert_eq!(message.matches("invalid").count(), 2);
    }

    #[test]
    fn validate_catches_undeclared_variants() {
        let err = PackageDef::builder("a")
            .version("1.0")
            .depends_on_when("b", "+missing")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("undeclared variant 'missing'"));

        let err = PackageDef::builder("a")
            .version("1.0")
            .version("1.0")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn extends_lowers_to_dependency() {
        let mut pkg = PackageDef::builder("py-numpy")
            .version("1.26.0")
            .extends("python")
            .build()
            .unwrap();
        pkg.lower_capabilities();
        assert_eq!(pkg.dependencies.len(), 1);
        assert_eq!(pkg.dependencies[0].target, "python");
        assert_eq!(pkg.dependencies[0].types, DepTypes::BUILD | DepTypes::RUN);
        assert_eq!(pkg.extends(), Some("python"));
    }

    #[test]
    fn provides_parses_virtual_range() {
        let pkg = PackageDef::builder("openmpi")
            .version("4.1.5")
            .provides("mpi@:3.1")
            .build()
            .unwrap();
        let decl = pkg.provides_for("mpi").next().unwrap();
        assert!(decl.versions.contains(&Version::parse("3.0").unwrap()));
        assert!(!decl.versions.contains(&Version::parse("4.0").unwrap()));
    }

    #[test]
    fn json_roundtrip() {
        let pkg = PackageDef::builder("zlib")
            .version("1.3")
            .variant(VariantDef::boolean("pic", true))
            .conflicts_when("%nvhpc", "+pic", None)
            .build_system(BuildSystem::Autotools)
            .build()
            .unwrap();
        let json = sonic_rs::to_string(&pkg).unwrap();
        let back: PackageDef = sonic_rs::from_str(&json).unwrap();
        assert_eq!(back, pkg);
    }
}
