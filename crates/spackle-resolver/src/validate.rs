//! Independent re-check of concretized DAGs against the repository.
//!
//! The validator shares no code with the fact base; a violation found here
//! means the solver or the assembler is wrong.

use spackle_core::{
    ConcreteSpec, ConflictTarget, Constraint, ConstraintViolation, DepTypes, DependencyDecl,
    PackageDef, PackageRepository,
};
use std::collections::BTreeMap;

/// Knobs mirroring the concretizer settings that change which edges exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationOptions {
    /// Whether test-only dependencies were solved for.
    pub include_test_deps: bool,
}

/// Check every node reachable from `spec`.
///
/// # Errors
/// Returns every violation found.
pub fn validate(
    spec: &ConcreteSpec,
    repo: &PackageRepository,
    options: &ValidationOptions,
) -> Result<(), Vec<ConstraintViolation>> {
    let nodes = spec.traverse();
    let mut violations = Vec::new();

    let mut by_name: BTreeMap<&str, &ConcreteSpec> = BTreeMap::new();
    for node in &nodes {
        if let Some(previous) = by_name.insert(node.name(), node) {
            violations.push(ConstraintViolation::new(
                node.name(),
                format!("appears twice: {previous} and {node}"),
            ));
        }
    }

    for node in &nodes {
        if node.platform() != spec.platform() {
            violations.push(ConstraintViolation::new(
                node.name(),
                format!(
                    "platform {} differs from the root's {}",
                    node.platform(),
                    spec.platform()
                ),
            ));
        }
        match repo.get(node.name()) {
            Some(package) => {
                let mut check = NodeCheck {
                    node,
                    root: spec,
                    package,
                    repo,
                    options,
                    violations: &mut violations,
                };
                check.attributes();
                if node.is_external() {
                    check.external();
                } else {
                    check.dependencies();
                }
                check.conflicts();
            }
            None => violations.push(ConstraintViolation::new(
                node.name(),
                "not defined in the repository",
            )),
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

struct NodeCheck<'a> {
    node: &'a ConcreteSpec,
    root: &'a ConcreteSpec,
    package: &'a PackageDef,
    repo: &'a PackageRepository,
    options: &'a ValidationOptions,
    violations: &'a mut Vec<ConstraintViolation>,
}

impl<'a> NodeCheck<'a> {
    fn report(&mut self, message: impl Into<String>) {
        self.violations
            .push(ConstraintViolation::new(self.node.name(), message));
    }

    fn attributes(&mut self) {
        let (node, package) = (self.node, self.package);
        let version = node.version();
        if package.version_decl(version).is_none() {
            self.report(format!("version {version} is not declared"));
        }

        for (name, def) in &package.variants {
            match node.variant(name) {
                None => self.report(format!("variant '{name}' is unset")),
                Some(value) if !def.is_legal(value) => {
                    self.report(format!("variant '{name}' has illegal value '{value}'"));
                }
                Some(_) => {}
            }
        }
        for name in node.variants().keys() {
            if !package.variants.contains_key(name) {
                self.report(format!("variant '{name}' is not declared"));
            }
        }
    }

    /// Externals are installed elsewhere; their dependencies are not ours.
    fn external(&mut self) {
        if self.node.external_prefix().is_some_and(|p| p.trim().is_empty()) {
            self.report("external has an empty prefix");
        }
        for edge in self.node.dependencies() {
            self.report(format!("external depends on {}", edge.spec.name()));
        }
    }

    fn active_dependencies(&self) -> Vec<&'a DependencyDecl> {
        let (package, node, options) = (self.package, self.node, self.options);
        package
            .dependencies
            .iter()
            .filter(|decl| !decl.types.is_test_only() || options.include_test_deps)
            .filter(|decl| node.satisfies(&decl.when))
            .collect()
    }

    fn dependencies(&mut self) {
        let node = self.node;
        let mut expected: BTreeMap<String, DepTypes> = BTreeMap::new();
        let mut virtuals: Vec<&str> = Vec::new();

        for decl in self.active_dependencies() {
            if self.repo.get(&decl.target).is_some() {
                let Some(edge) = node.dependency(&decl.target) else {
                    self.report(format!("missing dependency on {}", decl.target));
                    continue;
                };
                if !edge.spec.satisfies(&decl.constraint) {
                    self.report(format!(
                        "dependency {} does not satisfy '{}'",
                        edge.spec, decl.constraint
                    ));
                }
                *expected.entry(decl.target.clone()).or_default() |= decl.types;
                continue;
            }

            virtuals.push(&decl.target);
            let Some(edge) = node
                .dependencies()
                .iter()
                .find(|edge| edge.virtuals.contains(&decl.target))
            else {
                self.report(format!("no provider for virtual {}", decl.target));
                continue;
            };
            if !self.provides(&edge.spec, &decl.target, &decl.constraint) {
                self.report(format!(
                    "{} does not provide {} meeting '{}'",
                    edge.spec.name(),
                    decl.target,
                    decl.constraint
                ));
            }
            *expected.entry(edge.spec.name().to_string()).or_default() |= decl.types;
        }

        for edge in node.dependencies() {
            let name = edge.spec.name();
            match expected.get(name) {
                None => self.report(format!("dependency on {name} is not declared")),
                Some(types) if *types != edge.types => self.report(format!(
                    "edge to {name} has types '{}', declarations give '{types}'",
                    edge.types
                )),
                Some(_) => {}
            }
            for virtual_name in &edge.virtuals {
                if !virtuals.contains(&virtual_name.as_str()) {
                    self.report(format!("edge to {name} claims undeclared virtual {virtual_name}"));
                }
            }
        }
    }

    /// Whether `provider` provides `virtual_name` in a version meeting `constraint`.
    fn provides(&self, provider: &ConcreteSpec, virtual_name: &str, constraint: &Constraint) -> bool {
        let Some(package) = self.repo.get(provider.name()) else {
            return false;
        };
        let rest = Constraint {
            versions: None,
            ..constraint.clone()
        };
        provider.satisfies(&rest)
            && package.provides_for(virtual_name).any(|decl| {
                provider.satisfies(&decl.when)
                    && constraint
                        .versions
                        .as_ref()
                        .is_none_or(|range| range.intersects(&decl.versions))
            })
    }

    fn conflicts(&mut self) {
        let (node, root, package) = (self.node, self.root, self.package);
        for decl in &package.conflicts {
            if !node.satisfies(&decl.when) {
                continue;
            }
            let hit = match &decl.conflict {
                ConflictTarget::OnSelf(constraint) => node.satisfies(constraint),
                ConflictTarget::Package { name, constraint } => root
                    .find(name)
                    .is_some_and(|other| other.satisfies(constraint)),
            };
            if hit {
                self.report(format!("conflicts with {}", decl.conflict));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spackle_core::{CompilerSpec, DependencyEdge, VariantDef, VariantValue, Version};
    use std::sync::Arc;

    fn repo() -> PackageRepository {
        PackageRepository::new([
            PackageDef::builder("app")
                .version("1.0")
                .variant(VariantDef::boolean("ssl", true))
                .depends_on_when("openssl", "+ssl")
                .conflicts_when("%clang", "", Some("miscompiles"))
                .build()
                .unwrap(),
            PackageDef::builder("openssl").version("3.1").build().unwrap(),
        ])
        .unwrap()
    }

    fn node(
        name: &str,
        version: &str,
        variants: &[(&str, VariantValue)],
        compiler: &str,
        deps: Vec<DependencyEdge>,
    ) -> Arc<ConcreteSpec> {
        Arc::new(ConcreteSpec::new(
            name,
            Version::parse(version).unwrap(),
            variants
                .iter()
                .map(|(n, v)| ((*n).to_string(), v.clone()))
                .collect(),
            CompilerSpec::parse(compiler).unwrap(),
            "linux-x86_64",
            deps,
        ))
    }

    fn edge(spec: Arc<ConcreteSpec>) -> DependencyEdge {
        DependencyEdge {
            spec,
            types: DepTypes::default_types(),
            virtuals: vec![],
        }
    }

    #[test]
    fn accepts_consistent_dag() {
        let openssl = node("openssl", "3.1", &[], "gcc@12.2.0", vec![]);
        let app = node(
            "app",
            "1.0",
            &[("ssl", VariantValue::Bool(true))],
            "gcc@12.2.0",
            vec![edge(openssl)],
        );
        validate(&app, &repo(), &ValidationOptions::default()).unwrap();
    }

    #[test]
    fn reports_every_violation() {
        let app = node(
            "app",
            "2.0",
            &[("ssl", VariantValue::Bool(true)), ("bogus", VariantValue::Bool(true))],
            "clang@16",
            vec![],
        );
        let violations = validate(&app, &repo(), &ValidationOptions::default()).unwrap_err();
        let messages: Vec<&str> = violations.iter().map(|v| v.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("version 2.0")));
        assert!(messages.iter().any(|m| m.contains("'bogus' is not declared")));
        assert!(messages.iter().any(|m| m.contains("missing dependency on openssl")));
        assert!(messages.iter().any(|m| m.contains("conflicts with %clang")));
    }

    #[test]
    fn externals_bring_no_dependencies() {
        let external = |deps| {
            let spec = node(
                "app",
                "1.0",
                &[("ssl", VariantValue::Bool(true))],
                "gcc@12.2.0",
                deps,
            );
            ConcreteSpec::clone(&spec).with_external("/opt/app")
        };
        validate(&external(vec![]), &repo(), &ValidationOptions::default()).unwrap();

        let openssl = node("openssl", "3.1", &[], "gcc@12.2.0", vec![]);
        let violations =
            validate(&external(vec![edge(openssl)]), &repo(), &ValidationOptions::default())
                .unwrap_err();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].message, "external depends on openssl");
    }

    #[test]
    fn rejects_unjustified_edges() {
        let openssl = node("openssl", "3.1", &[], "gcc@12.2.0", vec![]);
        let app = node(
            "app",
            "1.0",
            &[("ssl", VariantValue::Bool(false))],
            "gcc@12.2.0",
            vec![edge(openssl)],
        );
        let violations = validate(&app, &repo(), &ValidationOptions::default()).unwrap_err();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("not declared"));
    }
}
