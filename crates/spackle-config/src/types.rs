//! Configuration types.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use spackle_core::{CompilerConstraint, CompilerSpec, Constraint, Version, VersionRange};
use std::collections::BTreeMap;

/// Default step budget for a single solve.
pub const DEFAULT_MAX_STEPS: u64 = 200_000;

/// Default number of re-solves spent shrinking an unsatisfiable core.
pub const DEFAULT_MAX_CORE_CHECKS: u32 = 64;

/// Whether several roots share one node per package name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnifyMode {
    /// One joint solve; every package appears once across all roots.
    #[default]
    Together,
    /// Each root is solved on its own.
    Separately,
}

impl std::str::FromStr for UnifyMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "together" | "true" => Ok(Self::Together),
            "separately" | "false" => Ok(Self::Separately),
            other => Err(format!("expected 'together' or 'separately', got '{other}'")),
        }
    }
}

/// Solver budgets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SolverConfig {
    /// Maximum decisions plus backtracks per solve.
    pub max_steps: u64,
    /// Wall-clock budget per solve; `None` disables it.
    pub timeout_ms: Option<u64>,
    /// Shrink unsatisfiable cores by re-solving.
    pub minimize_cores: bool,
    /// Upper bound on re-solves spent shrinking a core.
    pub max_core_checks: u32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            timeout_ms: Some(60_000),
            minimize_cores: true,
            max_core_checks: DEFAULT_MAX_CORE_CHECKS,
        }
    }
}

/// An installation of a package made outside the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExternalPackage {
    /// What the installation provides, as an anonymous constraint with an
    /// exact version (`@=3.1.2 +shared`).
    pub spec: Constraint,
    /// Installation prefix.
    pub prefix: String,
}

/// Per-package preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PackagePreferences {
    /// Preferred versions, best first.
    pub versions: Vec<VersionRange>,
    /// Preferred variant values, as an anonymous constraint (`+mpi ~shared`).
    pub variants: Constraint,
    /// Preferred compiler.
    pub compiler: Option<CompilerConstraint>,
    /// Whether the package may be built from source. When it may not, an
    /// external or an installed spec has to be used.
    pub buildable: bool,
    /// Installations outside the repository.
    pub externals: Vec<ExternalPackage>,
}

impl Default for PackagePreferences {
    fn default() -> Self {
        Self {
            versions: Vec::new(),
            variants: Constraint::default(),
            compiler: None,
            buildable: true,
            externals: Vec::new(),
        }
    }
}

impl PackagePreferences {
    /// Rank of `version` among the preferred ranges; `None` if unlisted.
    #[must_use]
    pub fn version_rank(&self, version: &Version) -> Option<usize> {
        self.versions.iter().position(|range| range.contains(version))
    }
}

/// Fully resolved concretizer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ConcretizerConfig {
    /// Solver budgets.
    pub solver: SolverConfig,
    /// Unification mode for multiple roots.
    pub unify: UnifyMode,
    /// Honour test-only dependencies.
    pub include_test_deps: bool,
    /// Target platforms, preferred first.
    pub platforms: Vec<String>,
    /// Available compilers, preferred first.
    pub compilers: Vec<CompilerSpec>,
    /// Preferences by package name.
    pub packages: BTreeMap<String, PackagePreferences>,
    /// Provider order by virtual name.
    pub providers: BTreeMap<String, Vec<String>>,
    /// Prefer installed specs over building new ones.
    pub reuse: bool,
}

impl Default for ConcretizerConfig {
    fn default() -> Self {
        Self {
            solver: SolverConfig::default(),
            unify: UnifyMode::default(),
            include_test_deps: false,
            platforms: vec![default_platform()],
            compilers: CompilerSpec::parse("gcc@12.2.0").into_iter().collect(),
            packages: BTreeMap::new(),
            providers: BTreeMap::new(),
            reuse: true,
        }
    }
}

/// `<os>-<arch>` of the running host.
#[must_use]
pub fn default_platform() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

impl ConcretizerConfig {
    /// Preferences for `package`, if any.
    #[must_use]
    pub fn package(&self, package: &str) -> Option<&PackagePreferences> {
        self.packages.get(package)
    }

    /// Configured provider order for `virtual_name`.
    #[must_use]
    pub fn provider_order(&self, virtual_name: &str) -> &[String] {
        self.providers
            .get(virtual_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Overlay a partial layer; fields set in `layer` win.
    pub fn apply(&mut self, layer: ConfigLayer) {
        if let Some(solver) = layer.solver {
            if let Some(max_steps) = solver.max_steps {
                self.solver.max_steps = max_steps;
            }
            if let Some(timeout_ms) = solver.timeout_ms {
                self.solver.timeout_ms = (timeout_ms > 0).then_some(timeout_ms);
            }
            if let Some(minimize) = solver.minimize_cores {
                self.solver.minimize_cores = minimize;
            }
            if let Some(checks) = solver.max_core_checks {
                self.solver.max_core_checks = checks;
            }
        }
        if let Some(unify) = layer.unify {
            self.unify = unify;
        }
        if let Some(include) = layer.include_test_deps {
            self.include_test_deps = include;
        }
        if let Some(reuse) = layer.reuse {
            self.reuse = reuse;
        }
        if let Some(platforms) = layer.platforms {
            self.platforms = platforms;
        }
        if let Some(compilers) = layer.compilers {
            self.compilers = compilers;
        }
        self.packages.extend(layer.packages);
        self.providers.extend(layer.providers);
    }

    /// Check the merged configuration.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] listing every problem.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.solver.max_steps == 0 {
            problems.push("solver.max-steps must be positive".to_string());
        }
        if self.solver.minimize_cores && self.solver.max_core_checks == 0 {
            problems.push("solver.max-core-checks must be positive when minimizing cores".into());
        }
        if self.platforms.is_empty() {
            problems.push("at least one platform is required".to_string());
        }
        if self.platforms.iter().any(|p| p.trim().is_empty()) {
            problems.push("platform names may not be empty".to_string());
        }
        if self.compilers.is_empty() {
            problems.push("at least one compiler is required".to_string());
        }
        for (name, prefs) in &self.packages {
            if prefs.variants.versions.is_some()
                || prefs.variants.compiler.is_some()
                || prefs.variants.platform.is_some()
            {
                problems.push(format!(
                    "packages.{name}.variants may only contain variant settings"
                ));
            }
            for (i, external) in prefs.externals.iter().enumerate() {
                if external
                    .spec
                    .versions
                    .as_ref()
                    .and_then(VersionRange::as_exact)
                    .is_none()
                {
                    problems.push(format!(
                        "packages.{name}.externals[{i}] needs an exact version (@=x.y)"
                    ));
                }
                if external.prefix.trim().is_empty() {
                    problems.push(format!("packages.{name}.externals[{i}] has an empty prefix"));
                }
            }
        }
        for (virtual_name, order) in &self.providers {
            if order.is_empty() {
                problems.push(format!("providers.{virtual_name} is empty"));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

/// Solver settings as they appear in one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SolverLayer {
    /// See [`SolverConfig::max_steps`].
    pub max_steps: Option<u64>,
    /// See [`SolverConfig::timeout_ms`]; `0` disables the timeout.
    pub timeout_ms: Option<u64>,
    /// See [`SolverConfig::minimize_cores`].
    pub minimize_cores: Option<bool>,
    /// See [`SolverConfig::max_core_checks`].
    pub max_core_checks: Option<u32>,
}

/// One configuration source; unset fields leave lower layers untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ConfigLayer {
    /// Solver settings.
    pub solver: Option<SolverLayer>,
    /// Unification mode.
    pub unify: Option<UnifyMode>,
    /// Honour test-only dependencies.
    pub include_test_deps: Option<bool>,
    /// Prefer installed specs.
    pub reuse: Option<bool>,
    /// Platforms, replacing lower layers.
    pub platforms: Option<Vec<String>>,
    /// Compilers, replacing lower layers.
    pub compilers: Option<Vec<CompilerSpec>>,
    /// Package preferences, merged by package name.
    pub packages: BTreeMap<String, PackagePreferences>,
    /// Provider orders, merged by virtual name.
    pub providers: BTreeMap<String, Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ConcretizerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.unify, UnifyMode::Together);
        assert_eq!(config.platforms, [default_platform()]);
        assert!(!config.include_test_deps);
    }

    #[test]
    fn layer_overrides_only_set_fields() {
        let mut config = ConcretizerConfig::default();
        let layer: ConfigLayer = sonic_rs::from_str(
            r#"{
                "solver": {"max-steps": 10, "timeout-ms": 0},
                "providers": {"mpi": ["mpich", "openmpi"]},
                "packages": {"hdf5": {"versions": ["1.12:", "1.10"], "variants": "+mpi"}}
            }"#,
        )
        .unwrap();
        config.apply(layer);

        assert_eq!(config.solver.max_steps, 10);
        assert_eq!(config.solver.timeout_ms, None);
        assert!(config.solver.minimize_cores);
        assert_eq!(config.provider_order("mpi"), ["mpich", "openmpi"]);
        let hdf5 = config.package("hdf5").unwrap();
        assert_eq!(hdf5.version_rank(&Version::parse("1.12.2").unwrap()), Some(0));
        assert_eq!(hdf5.version_rank(&Version::parse("1.10.9").unwrap()), Some(1));
        assert_eq!(hdf5.version_rank(&Version::parse("1.8").unwrap()), None);
    }

    #[test]
    fn validate_reports_every_problem() {
        let mut config = ConcretizerConfig::default();
        config.solver.max_steps = 0;
        config.platforms.clear();
        config.compilers.clear();
        let ConfigError::Invalid(problems) = config.validate().unwrap_err() else {
            panic!("expected Invalid");
        };
        assert_eq!(problems.len(), 3);
    }

    #[test]
    fn externals_need_exact_versions_and_prefixes() {
        let mut config = ConcretizerConfig::default();
        let layer: ConfigLayer = sonic_rs::from_str(
            r#"{
                "reuse": false,
                "packages": {
                    "openssl": {
                        "buildable": false,
                        "externals": [
                            {"spec": "@=3.1.2", "prefix": "/usr"},
                            {"spec": "@3:", "prefix": " "}
                        ]
                    }
                }
            }"#,
        )
        .unwrap();
        config.apply(layer);

        assert!(!config.reuse);
        let openssl = config.package("openssl").unwrap();
        assert!(!openssl.buildable);
        assert_eq!(openssl.externals[0].prefix, "/usr");
        assert!(PackagePreferences::default().buildable);

        let ConfigError::Invalid(problems) = config.validate().unwrap_err() else {
            panic!("expected Invalid");
        };
        assert_eq!(
            problems,
            [
                "packages.openssl.externals[1] needs an exact version (@=x.y)",
                "packages.openssl.externals[1] has an empty prefix",
            ]
        );
    }

    #[test]
    fn unify_parses_aliases() {
        assert_eq!("Separately".parse::<UnifyMode>(), Ok(UnifyMode::Separately));
        assert_eq!("true".parse::<UnifyMode>(), Ok(UnifyMode::Together));
        assert!("sometimes".parse::<UnifyMode>().is_err());
    }
}
