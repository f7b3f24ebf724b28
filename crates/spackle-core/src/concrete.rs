//! Fully resolved specs.

use crate::compiler::CompilerSpec;
use crate::hash::{ContentHash, ContentHasher};
use crate::package::DepTypes;
use crate::spec::Constraint;
use crate::variant::VariantValue;
use crate::version::Version;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

/// An edge from a concrete spec to one of its dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    /// The dependency.
    pub spec: Arc<ConcreteSpec>,
    /// Union of the types of every declaration behind this edge.
    pub types: DepTypes,
    /// Virtuals the dependency satisfies on this edge, sorted.
    pub virtuals: Vec<String>,
}

/// A node of a concretized DAG: every attribute bound, dependencies resolved.
///
/// The [`hash`](Self::hash) is a pure function of the node and its
/// dependency subgraph, so two specs with equal hashes are interchangeable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcreteSpec {
    name: String,
    version: Version,
    variants: BTreeMap<String, VariantValue>,
    compiler: CompilerSpec,
    platform: String,
    dependencies: Vec<DependencyEdge>,
    external: Option<String>,
    hash: ContentHash,
}

impl ConcreteSpec {
    /// Create a concrete spec and compute its hash.
    ///
    /// Edges are sorted by dependency name.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        version: Version,
        variants: BTreeMap<String, VariantValue>,
        compiler: CompilerSpec,
        platform: impl Into<String>,
        mut dependencies: Vec<DependencyEdge>,
    ) -> Self {
        dependencies.sort_by(|a, b| a.spec.name.cmp(&b.spec.name));
        for edge in &mut dependencies {
            edge.virtuals.sort();
            edge.virtuals.dedup();
        }
        let mut spec = Self {
            name: name.into(),
            version,
            variants,
            compiler,
            platform: platform.into(),
            dependencies,
            external: None,
            hash: ContentHash::from_bytes(&[]),
        };
        spec.hash = spec.compute_hash();
        spec
    }

    /// Mark the spec as provided by an installation outside the repository,
    /// rooted at `prefix`. The hash covers the prefix.
    #[must_use]
    pub fn with_external(mut self, prefix: impl Into<String>) -> Self {
        self.external = Some(prefix.into());
        self.hash = self.compute_hash();
        self
    }

    fn compute_hash(&self) -> ContentHash {
        let mut hasher = ContentHasher::new();
        hasher
            .field(&self.name)
            .field(&self.version.dotted())
            .number(self.variants.len() as u64);
        for (name, value) in &self.variants {
            hasher.field(name).field(&value.to_string());
        }
        hasher
            .field(&self.compiler.to_string())
            .field(&self.platform)
            .number(self.dependencies.len() as u64);
        for edge in &self.dependencies {
            hasher
                .hash(&edge.spec.hash)
                .number(u64::from(edge.types.bits()))
                .number(edge.virtuals.len() as u64);
            for virtual_name in &edge.virtuals {
                hasher.field(virtual_name);
            }
        }
        if let Some(prefix) = &self.external {
            hasher.field("external").field(prefix);
        }
        hasher.finalize()
    }

    /// Package name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bound version.
    #[must_use]
    pub const fn version(&self) -> &Version {
        &self.version
    }

    /// Bound variants.
    #[must_use]
    pub const fn variants(&self) -> &BTreeMap<String, VariantValue> {
        &self.variants
    }

    /// One bound variant.
    #[must_use]
    pub fn variant(&self, name: &str) -> Option<&VariantValue> {
        self.variants.get(name)
    }

    /// Chosen compiler.
    #[must_use]
    pub const fn compiler(&self) -> &CompilerSpec {
        &self.compiler
    }

    /// Chosen platform.
    #[must_use]
    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Dependency edges sorted by dependency name.
    #[must_use]
    pub fn dependencies(&self) -> &[DependencyEdge] {
        &self.dependencies
    }

    /// The edge to the dependency named `name`.
    #[must_use]
    pub fn dependency(&self, name: &str) -> Option<&DependencyEdge> {
        self.dependencies.iter().find(|edge| edge.spec.name == name)
    }

    /// Installation prefix of an external spec.
    #[must_use]
    pub fn external_prefix(&self) -> Option<&str> {
        self.external.as_deref()
    }

    /// Whether the spec is provided outside the repository.
    #[must_use]
    pub const fn is_external(&self) -> bool {
        self.external.is_some()
    }

    /// Structural hash of this subgraph.
    #[must_use]
    pub const fn hash(&self) -> ContentHash {
        self.hash
    }

    /// Every distinct node reachable from (and including) this one,
    /// depth-first pre-order, each hash visited once.
    #[must_use]
    pub fn traverse(&self) -> Vec<&Self> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if !seen.insert(node.hash) {
                continue;
            }
            out.push(node);
            stack.extend(node.dependencies.iter().rev().map(|edge| edge.spec.as_ref()));
        }
        out
    }

    /// The reachable node named `name`.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Self> {
        self.traverse().into_iter().find(|node| node.name == name)
    }

    /// Whether this node meets `constraint`.
    #[must_use]
    pub fn satisfies(&self, constraint: &Constraint) -> bool {
        constraint
            .versions
            .as_ref()
            .is_none_or(|range| range.contains(&self.version))
            && constraint.variants.iter().all(|(name, required)| {
                self.variants
                    .get(name)
                    .is_some_and(|bound| bound.satisfies(required))
            })
            && constraint
                .compiler
                .as_ref()
                .is_none_or(|compiler| compiler.matches(&self.compiler))
            && constraint
                .platform
                .as_ref()
                .is_none_or(|platform| platform == &self.platform)
    }

    /// Indented dependency tree, one node per line.
    #[must_use]
    pub fn tree(&self) -> String {
        fn walk(spec: &ConcreteSpec, depth: usize, label: &str, out: &mut String) {
            let _ = writeln!(
                out,
                "{:indent$}{label}{} [{}]",
                "",
                spec,
                spec.hash.short(),
                indent = depth * 4
            );
            for edge in &spec.dependencies {
                let label = if edge.virtuals.is_empty() {
                    format!("^[{}] ", edge.types)
                } else {
                    format!("^[{} virtuals={}] ", edge.types, edge.virtuals.join(","))
                };
                walk(&edge.spec, depth + 1, &label, out);
            }
        }

        let mut out = String::new();
        walk(self, 0, "", &mut out);
        out
    }
}

impl fmt::Display for ConcreteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@={}", self.name, self.version)?;
        for (name, value) in &self.variants {
            write!(f, " {}", value.render(name))?;
        }
        write!(f, " %{} platform={}", self.compiler, self.platform)
    }
}
