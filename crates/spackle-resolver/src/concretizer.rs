//! The concretization pipeline.

use crate::assemble::{NodeInterner, assemble};
use crate::cancel::CancellationToken;
use crate::facts::{FactSet, build_facts};
use crate::preferences::PreferenceSet;
use crate::solver::{Assignment, SolveFailure, SolveLimits, Solver};
use crate::stats::ConcretizerStats;
use crate::validate::{ValidationOptions, validate};
use rayon::prelude::*;
use spackle_cache::ConcretizationCache;
use spackle_config::{ConcretizerConfig, UnifyMode};
use spackle_core::{
    AbstractSpec, ConcreteSpec, ContentHash, ContentHasher, Error, PackageRepository, Result,
};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{error, info, warn};

/// Turns abstract requests into validated concrete DAGs.
///
/// A concretizer owns one repository snapshot and one configuration. It is
/// `Sync`; calls from several threads share the optional cache.
pub struct Concretizer {
    repo: Arc<PackageRepository>,
    config: ConcretizerConfig,
    prefs: PreferenceSet,
    limits: SolveLimits,
    cache: Option<Arc<ConcretizationCache>>,
    stats: Arc<ConcretizerStats>,
}

impl std::fmt::Debug for Concretizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Concretizer")
            .field("packages", &self.repo.len())
            .field("config", &self.config)
            .field("cached", &self.cache.is_some())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Concretizer {
    /// Create a concretizer over `repo`.
    ///
    /// # Errors
    /// Returns [`Error::Config`] when the configuration does not validate.
    pub fn new(repo: Arc<PackageRepository>, config: ConcretizerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            prefs: PreferenceSet::from_config(&config),
            limits: SolveLimits::from_config(&config.solver),
            repo,
            config,
            cache: None,
            stats: Arc::new(ConcretizerStats::default()),
        })
    }

    /// Memoize outcomes in `cache`, which may be shared with other
    /// concretizers.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<ConcretizationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Offer installed DAGs for reuse. Takes effect unless the configuration
    /// disables reuse; the cache key covers the offered specs.
    #[must_use]
    pub fn with_installed(mut self, specs: impl IntoIterator<Item = Arc<ConcreteSpec>>) -> Self {
        self.prefs = self.prefs.with_installed(specs);
        self
    }

    /// Replace the solver limits taken from the configuration.
    #[must_use]
    pub fn with_limits(mut self, limits: SolveLimits) -> Self {
        self.limits = limits;
        self
    }

    /// The repository snapshot.
    #[must_use]
    pub fn repository(&self) -> &Arc<PackageRepository> {
        &self.repo
    }

    /// The effective configuration.
    #[must_use]
    pub const fn config(&self) -> &ConcretizerConfig {
        &self.config
    }

    /// Cumulative statistics.
    #[must_use]
    pub fn stats(&self) -> &ConcretizerStats {
        &self.stats
    }

    /// Concretize `roots`, one DAG per root in request order.
    ///
    /// # Errors
    /// Any [`Error`] of the pipeline; see [`concretize_with`](Self::concretize_with).
    pub fn concretize(&self, roots: &[AbstractSpec]) -> Result<Vec<Arc<ConcreteSpec>>> {
        self.concretize_with(roots, &CancellationToken::new())
    }

    /// Parse each string as an [`AbstractSpec`] and concretize them.
    ///
    /// # Errors
    /// [`Error::InvalidSpec`] for malformed input, then as
    /// [`concretize`](Self::concretize).
    pub fn concretize_str(&self, specs: &[&str]) -> Result<Vec<Arc<ConcreteSpec>>> {
        let roots = specs
            .iter()
            .map(|s| AbstractSpec::parse(s))
            .collect::<Result<Vec<_>>>()?;
        self.concretize(&roots)
    }

    /// Concretize `roots`, observing `cancel`.
    ///
    /// # Errors
    /// - [`Error::UnknownPackage`] / [`Error::NoVersionSatisfiesRange`] for bad
    ///   requests or repository references.
    /// - [`Error::Unsatisfiable`] with a core when no DAG exists.
    /// - [`Error::SolverTimeout`] / [`Error::Cancelled`] when a budget ran out
    ///   or `cancel` was set.
    /// - [`Error::CyclicDependency`] when the chosen packages form a cycle.
    /// - [`Error::Internal`] when an assembled DAG fails validation.
    pub fn concretize_with(
        &self,
        roots: &[AbstractSpec],
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<ConcreteSpec>>> {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();

        let outcome = match &self.cache {
            Some(cache) => cache.get_or_compute(
                self.cache_key(roots),
                self.repo.content_version(),
                || self.run(roots, cancel),
            ),
            None => self.run(roots, cancel),
        };

        match &outcome {
            Ok(dags) => info!(
                roots = roots.len(),
                nodes = dags.iter().map(|d| d.traverse().len()).sum::<usize>(),
                total_ms = start.elapsed().as_millis(),
                "concretization complete"
            ),
            Err(err) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                match err {
                    Error::SolverTimeout { steps, elapsed_ms } => {
                        warn!(steps, elapsed_ms, "concretization timed out");
                    }
                    _ => info!(roots = roots.len(), error = %err, "concretization failed"),
                }
            }
        }
        outcome
    }

    /// Key under which the outcome for `roots` is cached: the canonical form
    /// of every root, the unification mode and the preference fingerprint.
    #[must_use]
    pub fn cache_key(&self, roots: &[AbstractSpec]) -> ContentHash {
        let mut hasher = ContentHasher::new();
        hasher.field("concretize").number(roots.len() as u64);
        for root in roots {
            hasher.hash(&root.canonical_hash());
        }
        hasher
            .field(match self.config.unify {
                UnifyMode::Together => "together",
                UnifyMode::Separately => "separately",
            })
            .hash(&self.prefs.fingerprint())
            .number(u64::from(self.limits.minimize_cores))
            .number(u64::from(self.limits.max_core_checks));
        hasher.finalize()
    }

    fn run(
        &self,
        roots: &[AbstractSpec],
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<ConcreteSpec>>> {
        if roots.is_empty() {
            return Ok(Vec::new());
        }
        info!(
            roots = roots.len(),
            unify = ?self.config.unify,
            packages = self.repo.len(),
            "concretization starting"
        );

        let mut interner = NodeInterner::new();
        let dags = match self.config.unify {
            UnifyMode::Together => {
                let (facts, assignment) = self.solve(roots, cancel)?;
                assemble(&assignment, &facts, &mut interner)?
            }
            UnifyMode::Separately => {
                // Solve in parallel, assemble sequentially so equal subgraphs
                // share one interner. Every root is solved before the first
                // failure in request order is reported.
                let outcomes: Vec<Result<_>> = roots
                    .par_iter()
                    .map(|root| self.solve(std::slice::from_ref(root), cancel))
                    .collect();
                let solved = outcomes.into_iter().collect::<Result<Vec<_>>>()?;
                let mut dags = Vec::with_capacity(roots.len());
                for (facts, assignment) in &solved {
                    dags.extend(assemble(assignment, facts, &mut interner)?);
                }
                dags
            }
        };

        self.validate_all(&dags)?;
        Ok(dags)
    }

    fn solve(
        &self,
        roots: &[AbstractSpec],
        cancel: &CancellationToken,
    ) -> Result<(FactSet, Assignment)> {
        let facts = build_facts(roots, &self.repo, &self.prefs)?;
        let start = Instant::now();
        let mut solver = Solver::new(&facts, &self.prefs)
            .with_limits(self.limits.clone())
            .with_cancel(cancel.clone());
        let result = solver.solve();
        self.stats.record_solve(solver.stats(), start.elapsed());

        match result {
            Ok(assignment) => Ok((facts, assignment)),
            Err(SolveFailure::Unsatisfiable(core)) => {
                info!(
                    constraints = core.constraints.len(),
                    minimal = core.minimal,
                    "request is unsatisfiable"
                );
                Err(Error::Unsatisfiable(Box::new(core)))
            }
            Err(failure) => Err(failure.into()),
        }
    }

    fn validate_all(&self, dags: &[Arc<ConcreteSpec>]) -> Result<()> {
        let options = ValidationOptions {
            include_test_deps: self.config.include_test_deps,
        };
        let violations: Vec<_> = dags
            .iter()
            .filter_map(|dag| validate(dag, &self.repo, &options).err())
            .flatten()
            .collect();
        if violations.is_empty() {
            return Ok(());
        }
        for violation in &violations {
            error!(package = %violation.package, message = %violation.message, "concretized DAG is invalid");
        }
        Err(Error::Internal(violations))
    }
}
