//! End-to-end concretization scenarios.

use proptest::prelude::*;
use spackle_core::{ConstraintKind, VariantDef, VariantValue};
use spackle_resolver::{
    AbstractSpec, CancellationToken, ConcreteSpec, ConcretizationCache, Concretizer,
    ConcretizerConfig, Error, ExternalPackage, PackageDef, PackageRepository,
    PackagePreferences, SolveLimits, UnifyMode, ValidationOptions, validate,
};
use std::sync::Arc;
use test_case::test_case;

fn repo(defs: Vec<PackageDef>) -> Arc<PackageRepository> {
    Arc::new(PackageRepository::new(defs).unwrap())
}

fn concretizer(repo: &Arc<PackageRepository>) -> Concretizer {
    Concretizer::new(Arc::clone(repo), ConcretizerConfig::default()).unwrap()
}

fn separately(repo: &Arc<PackageRepository>) -> Concretizer {
    Concretizer::new(
        Arc::clone(repo),
        ConcretizerConfig {
            unify: UnifyMode::Separately,
            ..ConcretizerConfig::default()
        },
    )
    .unwrap()
}

fn version_of(dag: &ConcreteSpec, name: &str) -> String {
    dag.find(name)
        .unwrap_or_else(|| panic!("{name} missing from {}", dag.tree()))
        .version()
        .to_string()
}

fn assert_valid(repo: &PackageRepository, dags: &[Arc<ConcreteSpec>]) {
    for dag in dags {
        validate(dag, repo, &ValidationOptions::default()).unwrap();
    }
}

/// `a -> b@:1.0`, b in {0.9, 1.0, 1.1}.
fn bounded() -> Arc<PackageRepository> {
    repo(vec![
        PackageDef::builder("a").version("1.0").depends_on("b@:1.0").build().unwrap(),
        PackageDef::builder("b")
            .version("0.9")
            .version("1.0")
            .version("1.1")
            .build()
            .unwrap(),
    ])
}

/// `a +feature` needs c, c conflicts with `^d`, and a always reaches d
/// through e.
fn conflicting() -> Arc<PackageRepository> {
    repo(vec![
        PackageDef::builder("a")
            .version("1.0")
            .variant(VariantDef::boolean("feature", false))
            .depends_on_when("c", "+feature")
            .depends_on("e")
            .build()
            .unwrap(),
        PackageDef::builder("c").version("1.0").conflicts("^d").build().unwrap(),
        PackageDef::builder("e").version("1.0").depends_on("d").build().unwrap(),
        PackageDef::builder("d").version("1.0").build().unwrap(),
    ])
}

/// `top` needs `left` and `right`, each with two versions, so the first
/// solution takes at least two decisions.
fn wide() -> Arc<PackageRepository> {
    repo(vec![
        PackageDef::builder("top")
            .version("1.0")
            .depends_on("left")
            .depends_on("right")
            .build()
            .unwrap(),
        PackageDef::builder("left").version("1.0").version("2.0").build().unwrap(),
        PackageDef::builder("right").version("1.0").version("2.0").build().unwrap(),
    ])
}

/// Two applications on the `mpi` virtual with two providers.
fn mpi() -> Arc<PackageRepository> {
    repo(vec![
        PackageDef::builder("x").version("1.0").depends_on("mpi").build().unwrap(),
        PackageDef::builder("y").version("2.1").depends_on("mpi").build().unwrap(),
        PackageDef::builder("z").version("1.0").depends_on("mpi@3:").build().unwrap(),
        PackageDef::builder("mpich")
            .version("4.1")
            .provides("mpi@:3.1")
            .build()
            .unwrap(),
        PackageDef::builder("openmpi")
            .version("4.1.5")
            .provides("mpi@:2")
            .depends_on("hwloc")
            .build()
            .unwrap(),
        PackageDef::builder("hwloc").version("2.9").build().unwrap(),
    ])
}

/// `app` and `tool` share zlib; `app` caps it.
fn zlib_pair() -> Arc<PackageRepository> {
    repo(vec![
        PackageDef::builder("app")
            .version("1.0")
            .depends_on("zlib@:1.2")
            .build()
            .unwrap(),
        PackageDef::builder("tool").version("0.5").depends_on("zlib").build().unwrap(),
        PackageDef::builder("zlib")
            .version("1.2.13")
            .version("1.3")
            .variant(VariantDef::boolean("pic", true))
            .build()
            .unwrap(),
    ])
}

/// `app` and `curl` over zlib and openssl, for reuse and externals.
fn installable() -> Arc<PackageRepository> {
    repo(vec![
        PackageDef::builder("app")
            .version("1.0")
            .version("2.0")
            .depends_on("zlib")
            .build()
            .unwrap(),
        PackageDef::builder("curl")
            .version("8.4")
            .depends_on("openssl")
            .depends_on("zlib")
            .build()
            .unwrap(),
        PackageDef::builder("zlib")
            .version("1.2.13")
            .version("1.3")
            .variant(VariantDef::boolean("pic", true))
            .build()
            .unwrap(),
        PackageDef::builder("openssl")
            .version("1.1.1")
            .version("3.1.2")
            .build()
            .unwrap(),
    ])
}

fn with_openssl(prefs: PackagePreferences) -> ConcretizerConfig {
    let mut config = ConcretizerConfig::default();
    config.packages.insert("openssl".into(), prefs);
    config
}

#[test]
fn newest_version_within_range_is_chosen() {
    let repo = bounded();
    let dags = concretizer(&repo).concretize_str(&["a"]).unwrap();
    assert_eq!(version_of(&dags[0], "b"), "1.0");
    assert_valid(&repo, &dags);
}

#[test]
fn conflict_is_explained() {
    let err = concretizer(&conflicting())
        .concretize_str(&["a +feature"])
        .unwrap_err();
    let core = err.core().unwrap_or_else(|| panic!("expected a core, got {err}"));
    assert!(core.mentions(ConstraintKind::Conflict, "c conflicts with ^d"), "{core}");
    assert!(core.mentions(ConstraintKind::Request, "+feature"), "{core}");
    assert!(core.minimal);
    assert!(!core.suggestions.is_empty());
}

#[test]
fn conflict_is_avoided_when_not_requested() {
    let repo = conflicting();
    let dags = concretizer(&repo).concretize_str(&["a"]).unwrap();
    assert_eq!(dags[0].variant("feature"), Some(&VariantValue::Bool(false)));
    assert!(dags[0].find("c").is_none());
    assert_eq!(version_of(&dags[0], "d"), "1.0");
    assert_valid(&repo, &dags);
}

#[test]
fn roots_share_one_provider() {
    let repo = mpi();
    let dags = concretizer(&repo).concretize_str(&["x", "y"]).unwrap();
    let x_mpi = &dags[0].dependencies()[0];
    let y_mpi = &dags[1].dependencies()[0];
    assert_eq!(x_mpi.virtuals, ["mpi"]);
    assert!(Arc::ptr_eq(&x_mpi.spec, &y_mpi.spec));
    assert_valid(&repo, &dags);
}

#[test]
fn provider_must_cover_the_requested_range() {
    let repo = mpi();
    let dags = concretizer(&repo).concretize_str(&["z"]).unwrap();
    assert_eq!(dags[0].dependencies()[0].spec.name(), "mpich");
    assert_valid(&repo, &dags);
}

#[test_case("x ^mpich", "mpich", "openmpi" ; "steer to mpich")]
#[test_case("x ^openmpi", "openmpi", "mpich" ; "steer to openmpi")]
fn dependency_constraints_steer_providers(spec: &str, chosen: &str, absent: &str) {
    let repo = mpi();
    let dags = concretizer(&repo).concretize_str(&[spec]).unwrap();
    assert!(dags[0].find(chosen).is_some(), "{}", dags[0].tree());
    assert!(dags[0].find(absent).is_none(), "{}", dags[0].tree());
    assert_valid(&repo, &dags);
}

#[test]
fn unknown_package_is_reported() {
    let err = concretizer(&bounded()).concretize_str(&["ghost"]).unwrap_err();
    assert!(matches!(err, Error::UnknownPackage { ref name, .. } if name == "ghost"));
}

#[test_case("b@5.0" ; "exact")]
#[test_case("b@2:" ; "open range")]
fn empty_range_is_reported(spec: &str) {
    let err = concretizer(&bounded()).concretize_str(&[spec]).unwrap_err();
    assert!(
        matches!(err, Error::NoVersionSatisfiesRange { ref name, .. } if name == "b"),
        "{err}"
    );
}

#[test]
fn unrelated_dependency_request_fails() {
    let err = concretizer(&zlib_pair())
        .concretize_str(&["tool ^app"])
        .unwrap_err();
    assert!(err.core().is_some(), "{err}");
}

#[test]
fn concretization_is_idempotent() {
    let repo = mpi();
    let first = concretizer(&repo).concretize_str(&["x", "z"]).unwrap();
    let second = concretizer(&repo).concretize_str(&["x", "z"]).unwrap();
    let hashes = |dags: &[Arc<ConcreteSpec>]| dags.iter().map(|d| d.hash()).collect::<Vec<_>>();
    assert_eq!(hashes(&first), hashes(&second));
}

#[test]
fn concretization_is_deterministic_across_threads() {
    let repo = mpi();
    let concretizer = concretizer(&repo);
    let expected = concretizer.concretize_str(&["x", "y"]).unwrap()[0].hash();
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| concretizer.concretize_str(&["x", "y"]).unwrap()[0].hash()))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    });
}

#[test]
fn unify_modes_differ_on_shared_packages() {
    let repo = zlib_pair();
    let together = concretizer(&repo).concretize_str(&["app", "tool"]).unwrap();
    assert_eq!(version_of(&together[0], "zlib"), "1.2.13");
    assert_eq!(version_of(&together[1], "zlib"), "1.2.13");
    assert!(Arc::ptr_eq(
        &together[0].dependencies()[0].spec,
        &together[1].dependencies()[0].spec
    ));

    let apart = separately(&repo).concretize_str(&["app", "tool"]).unwrap();
    assert_eq!(version_of(&apart[0], "zlib"), "1.2.13");
    assert_eq!(version_of(&apart[1], "zlib"), "1.3");
    assert_valid(&repo, &apart);
}

#[test]
fn separate_roots_share_equal_subgraphs() {
    let repo = mpi();
    let dags = separately(&repo).concretize_str(&["x", "y"]).unwrap();
    assert!(Arc::ptr_eq(
        &dags[0].dependencies()[0].spec,
        &dags[1].dependencies()[0].spec
    ));
}

#[test]
fn step_budget_surfaces_as_timeout_and_is_not_cached() {
    let cache = Arc::new(ConcretizationCache::new());
    let concretizer = concretizer(&wide())
        .with_limits(SolveLimits {
            max_steps: 1,
            ..SolveLimits::default()
        })
        .with_cache(Arc::clone(&cache));
    let err = concretizer.concretize_str(&["top"]).unwrap_err();
    assert!(matches!(err, Error::SolverTimeout { steps, .. } if steps > 1), "{err}");
    assert!(cache.is_empty());
}

#[test]
fn generous_step_budget_solves_the_same_request() {
    let repo = wide();
    let dags = concretizer(&repo).concretize_str(&["top"]).unwrap();
    assert_eq!(version_of(&dags[0], "left"), "2.0");
    assert_eq!(version_of(&dags[0], "right"), "2.0");
    assert_valid(&repo, &dags);
}

#[test]
fn separate_mode_reports_the_first_failure_in_request_order() {
    let repo = mpi();
    let err = separately(&repo)
        .concretize_str(&["x", "z@9:", "ghost"])
        .unwrap_err();
    assert!(
        matches!(err, Error::NoVersionSatisfiesRange { ref name, .. } if name == "z"),
        "{err}"
    );
}

#[test]
fn cancelled_requests_stop() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = concretizer(&mpi())
        .concretize_with(&[AbstractSpec::named("x")], &cancel)
        .unwrap_err();
    assert_eq!(err, Error::Cancelled);
}

#[test]
fn repository_edits_invalidate_the_cache() {
    let cache = Arc::new(ConcretizationCache::new());
    let before = bounded();
    let dags = concretizer(&before)
        .with_cache(Arc::clone(&cache))
        .concretize_str(&["a"])
        .unwrap();
    assert_eq!(version_of(&dags[0], "b"), "1.0");

    let after = Arc::new(
        before
            .with_package(
                PackageDef::builder("b")
                    .version("0.9")
                    .version("1.0")
                    .version("1.0.1")
                    .build()
                    .unwrap(),
            )
            .unwrap(),
    );
    let dags = concretizer(&after)
        .with_cache(Arc::clone(&cache))
        .concretize_str(&["a"])
        .unwrap();
    assert_eq!(version_of(&dags[0], "b"), "1.0.1");
    assert_eq!(cache.stats().invalidations, 1);
}

proptest! {
    #[test]
    fn cap_selects_newest_allowed_version(
        declared in prop::collection::btree_set(1u32..10, 1..6),
        cap in 1u32..10,
    ) {
        let mut b = PackageDef::builder("b");
        for v in &declared {
            b = b.version(&v.to_string());
        }
        let repo = repo(vec![
            PackageDef::builder("a")
                .version("1.0")
                .depends_on(&format!("b@:{cap}"))
                .build()
                .unwrap(),
            b.build().unwrap(),
        ]);
        let result = concretizer(&repo).concretize_str(&["a"]);
        match declared.range(..=cap).next_back() {
            Some(best) => {
                let dags = result.unwrap();
                prop_assert_eq!(version_of(&dags[0], "b"), best.to_string());
            }
            None => prop_assert!(result.is_err()),
        }
    }
}

#[test]
fn installed_dependency_is_reused() {
    let repo = installable();
    let installed = concretizer(&repo).concretize_str(&["zlib@1.2.13"]).unwrap();
    let reusing = concretizer(&repo).with_installed(installed.clone());

    let dags = reusing.concretize_str(&["app"]).unwrap();
    assert_eq!(version_of(&dags[0], "app"), "2.0");
    let zlib = dags[0].find("zlib").unwrap();
    assert_eq!(zlib.hash(), installed[0].hash());
    assert_valid(&repo, &dags);

    let roots = [AbstractSpec::named("app")];
    assert_ne!(reusing.cache_key(&roots), concretizer(&repo).cache_key(&roots));

    let fresh = Concretizer::new(
        Arc::clone(&repo),
        ConcretizerConfig {
            reuse: false,
            ..ConcretizerConfig::default()
        },
    )
    .unwrap()
    .with_installed(installed);
    let dags = fresh.concretize_str(&["app"]).unwrap();
    assert_eq!(version_of(&dags[0], "zlib"), "1.3");
}

#[test]
fn installed_dag_beats_a_newer_build() {
    let repo = installable();
    let installed = concretizer(&repo)
        .concretize_str(&["app@1.0 ^zlib@1.2.13"])
        .unwrap();
    let dags = concretizer(&repo)
        .with_installed(installed.clone())
        .concretize_str(&["app"])
        .unwrap();
    assert_eq!(dags[0].hash(), installed[0].hash());
    assert_eq!(version_of(&dags[0], "app"), "1.0");

    // A request the installation cannot meet is built instead.
    let dags = concretizer(&repo)
        .with_installed(installed)
        .concretize_str(&["app ^zlib ~pic"])
        .unwrap();
    assert_eq!(version_of(&dags[0], "app"), "2.0");
    let zlib = dags[0].find("zlib").unwrap();
    assert_eq!(zlib.variant("pic"), Some(&VariantValue::Bool(false)));
}

#[test]
fn unbuildable_package_uses_its_external() {
    let repo = installable();
    let config = with_openssl(PackagePreferences {
        buildable: false,
        externals: vec![ExternalPackage {
            spec: "@=3.1.2".parse().unwrap(),
            prefix: "/usr".into(),
        }],
        ..PackagePreferences::default()
    });
    let dags = Concretizer::new(Arc::clone(&repo), config)
        .unwrap()
        .concretize_str(&["curl"])
        .unwrap();
    let openssl = dags[0].find("openssl").unwrap();
    assert_eq!(openssl.external_prefix(), Some("/usr"));
    assert_eq!(openssl.version().to_string(), "3.1.2");
    assert!(openssl.dependencies().is_empty());
    assert!(dags[0].find("zlib").is_some_and(|zlib| !zlib.is_external()));
    assert_valid(&repo, &dags);
}

#[test]
fn unbuildable_package_without_candidates_is_explained() {
    let repo = installable();
    let config = with_openssl(PackagePreferences {
        buildable: false,
        ..PackagePreferences::default()
    });
    let err = Concretizer::new(Arc::clone(&repo), config)
        .unwrap()
        .concretize_str(&["curl"])
        .unwrap_err();
    let core = err.core().unwrap_or_else(|| panic!("expected a core, got {err}"));
    assert!(core.mentions(ConstraintKind::Buildable, "openssl is not buildable"), "{core}");
    assert!(core.minimal);

    let config = with_openssl(PackagePreferences {
        buildable: false,
        externals: vec![ExternalPackage {
            spec: "@=3.1.2".parse().unwrap(),
            prefix: "/usr".into(),
        }],
        ..PackagePreferences::default()
    });
    let err = Concretizer::new(Arc::clone(&repo), config)
        .unwrap()
        .concretize_str(&["curl ^openssl@1.1.1"])
        .unwrap_err();
    assert!(err.core().is_some(), "{err}");
}
