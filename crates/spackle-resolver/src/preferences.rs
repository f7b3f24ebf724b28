//! Soft preferences that order the solver's choices.
//!
//! Preferences never make a request fail; they only decide which of several
//! valid values the solver tries first.

use spackle_config::{ConcretizerConfig, ExternalPackage, PackagePreferences};
use spackle_core::{
    CompilerConstraint, CompilerSpec, ConcreteSpec, ContentHash, ContentHasher, VariantDef,
    VariantValue, VersionDecl,
};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Preferences extracted from a [`ConcretizerConfig`], plus the installed
/// specs the solver may reuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferenceSet {
    platforms: Vec<String>,
    compilers: Vec<CompilerSpec>,
    packages: BTreeMap<String, PackagePreferences>,
    providers: BTreeMap<String, Vec<String>>,
    include_test_deps: bool,
    reuse: bool,
    /// Installed nodes by package name, sorted by hash.
    installed: BTreeMap<String, Vec<Arc<ConcreteSpec>>>,
}

impl Default for PreferenceSet {
    fn default() -> Self {
        Self::from_config(&ConcretizerConfig::default())
    }
}

impl PreferenceSet {
    /// Extract preferences from a configuration.
    #[must_use]
    pub fn from_config(config: &ConcretizerConfig) -> Self {
        Self {
            platforms: config.platforms.clone(),
            compilers: config.compilers.clone(),
            packages: config.packages.clone(),
            providers: config.providers.clone(),
            include_test_deps: config.include_test_deps,
            reuse: config.reuse,
            installed: BTreeMap::new(),
        }
    }

    /// Offer `specs` and every node below them for reuse.
    #[must_use]
    pub fn with_installed(mut self, specs: impl IntoIterator<Item = Arc<ConcreteSpec>>) -> Self {
        let mut seen: BTreeSet<ContentHash> = self
            .installed
            .values()
            .flatten()
            .map(|spec| spec.hash())
            .collect();
        let mut stack: Vec<Arc<ConcreteSpec>> = specs.into_iter().collect();
        while let Some(spec) = stack.pop() {
            if !seen.insert(spec.hash()) {
                continue;
            }
            stack.extend(spec.dependencies().iter().map(|edge| Arc::clone(&edge.spec)));
            self.installed
                .entry(spec.name().to_string())
                .or_default()
                .push(spec);
        }
        for candidates in self.installed.values_mut() {
            candidates.sort_by_key(|spec| spec.hash());
        }
        self
    }

    /// Installed nodes of `package` the solver may reuse; empty when reuse
    /// is disabled.
    #[must_use]
    pub fn installed_for(&self, package: &str) -> &[Arc<ConcreteSpec>] {
        if !self.reuse {
            return &[];
        }
        self.installed
            .get(package)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Configured externals of `package`.
    #[must_use]
    pub fn externals_for(&self, package: &str) -> &[ExternalPackage] {
        self.packages
            .get(package)
            .map(|p| p.externals.as_slice())
            .unwrap_or_default()
    }

    /// Whether `package` may be built from source.
    #[must_use]
    pub fn is_buildable(&self, package: &str) -> bool {
        self.packages.get(package).is_none_or(|p| p.buildable)
    }

    /// Allowed platforms, preferred first.
    #[must_use]
    pub fn platforms(&self) -> &[String] {
        &self.platforms
    }

    /// Available compilers, preferred first.
    #[must_use]
    pub fn compilers(&self) -> &[CompilerSpec] {
        &self.compilers
    }

    /// Whether test-only dependencies take part in solving.
    #[must_use]
    pub const fn include_test_deps(&self) -> bool {
        self.include_test_deps
    }

    /// Indices into `versions`, best candidate first.
    ///
    /// Non-deprecated before deprecated, then configured rank, then versions
    /// marked preferred, then regular before infinity versions, then newest.
    #[must_use]
    pub fn version_order(&self, package: &str, versions: &[VersionDecl]) -> Vec<usize> {
        let prefs = self.packages.get(package);
        let mut order: Vec<usize> = (0..versions.len()).collect();
        order.sort_by_key(|&i| {
            let decl = &versions[i];
            (
                decl.deprecated,
                prefs
                    .and_then(|p| p.version_rank(&decl.version))
                    .unwrap_or(usize::MAX),
                !decl.preferred,
                decl.version.is_infinity(),
                Reverse(&decl.version),
            )
        });
        order
    }

    /// The value tried first for `variant` of `package`: the configured
    /// value when it is legal, otherwise the declared default.
    #[must_use]
    pub fn preferred_variant(&self, package: &str, variant: &VariantDef) -> VariantValue {
        self.packages
            .get(package)
            .and_then(|p| p.variants.variants.get(&variant.name))
            .and_then(|value| variant.normalize(value))
            .unwrap_or_else(|| variant.default.clone())
    }

    /// Configured compiler for `package`.
    #[must_use]
    pub fn compiler_preference(&self, package: &str) -> Option<&CompilerConstraint> {
        self.packages.get(package).and_then(|p| p.compiler.as_ref())
    }

    /// Position of `provider` in the configured order for `virtual_name`;
    /// unlisted providers rank after every listed one.
    #[must_use]
    pub fn provider_rank(&self, virtual_name: &str, provider: &str) -> usize {
        self.providers
            .get(virtual_name)
            .and_then(|order| order.iter().position(|p| p == provider))
            .unwrap_or(usize::MAX)
    }

    /// Hash of everything that can change a solver outcome.
    #[must_use]
    pub fn fingerprint(&self) -> ContentHash {
        let mut hasher = ContentHasher::new();
        hasher.number(self.platforms.len() as u64);
        for platform in &self.platforms {
            hasher.field(platform);
        }
        hasher.number(self.compilers.len() as u64);
        for compiler in &self.compilers {
            hasher.field(&compiler.to_string());
        }
        hasher.number(self.packages.len() as u64);
        for (name, prefs) in &self.packages {
            hasher.field(name).number(prefs.versions.len() as u64);
            for range in &prefs.versions {
                hasher.field(&range.to_string());
            }
            hasher.field(&prefs.variants.to_string()).field(
                &prefs
                    .compiler
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            );
            hasher
                .number(u64::from(prefs.buildable))
                .number(prefs.externals.len() as u64);
            for external in &prefs.externals {
                hasher
                    .field(&external.spec.to_string())
                    .field(&external.prefix);
            }
        }
        hasher.number(self.providers.len() as u64);
        for (virtual_name, order) in &self.providers {
            hasher.field(virtual_name).field(&order.join(","));
        }
        hasher.number(u64::from(self.include_test_deps));
        hasher.number(u64::from(self.reuse));
        for candidates in self.installed.values() {
            for spec in candidates {
                hasher.hash(&spec.hash());
            }
        }
        hasher.finalize()
    }
}
