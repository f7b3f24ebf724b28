//! Constraint solver.
//!
//! A deterministic branch and bound search over the variables of a
//! [`FactSet`]: the platform first, then each present node's origin, version,
//! variants, compiler and providers, in node discovery order. Values are
//! tried in the order the [`PreferenceSet`] ranks them and every decision is
//! followed by unit propagation over the rules. Nodes nothing requires are
//! left out.
//!
//! The answer is the solution with the least cost over the whole DAG, so a
//! preference is never met at one node by paying more at another. The
//! criteria are listed in the `cost` module.
//!
//! When no assignment exists, the rules involved in the conflicts met during
//! search are shrunk into an [`UnsatisfiableCore`].

mod assignment;
mod cost;
mod explain;
mod search;

pub use assignment::Assignment;

use crate::cancel::CancellationToken;
use crate::facts::FactSet;
use crate::preferences::PreferenceSet;
use crate::stats::SolveStats;
use search::{Abort, Goal, Search};
use spackle_config::SolverConfig;
use spackle_core::{Error, UnsatisfiableCore};
use std::time::{Duration, Instant};
use tracing::debug;

/// Budgets for one solve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolveLimits {
    /// Maximum decisions plus backtracks.
    pub max_steps: u64,
    /// Wall-clock budget, covering core extraction as well.
    pub timeout: Option<Duration>,
    /// Shrink unsatisfiable cores by re-solving.
    pub minimize_cores: bool,
    /// Upper bound on re-solves while shrinking.
    pub max_core_checks: u32,
}

impl Default for SolveLimits {
    fn default() -> Self {
        Self::from_config(&SolverConfig::default())
    }
}

impl SolveLimits {
    /// Limits from the solver section of the configuration.
    #[must_use]
    pub fn from_config(config: &SolverConfig) -> Self {
        Self {
            max_steps: config.max_steps,
            timeout: config.timeout_ms.map(Duration::from_millis),
            minimize_cores: config.minimize_cores,
            max_core_checks: config.max_core_checks,
        }
    }
}

/// Why a solve produced no assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveFailure {
    /// No assignment satisfies the rules.
    Unsatisfiable(UnsatisfiableCore),
    /// The step or time budget ran out.
    Timeout {
        /// Decisions plus backtracks performed.
        steps: u64,
        /// Elapsed wall-clock time.
        elapsed_ms: u64,
    },
    /// The cancellation token was set.
    Cancelled,
}

impl From<SolveFailure> for Error {
    fn from(failure: SolveFailure) -> Self {
        match failure {
            SolveFailure::Unsatisfiable(core) => Self::Unsatisfiable(Box::new(core)),
            SolveFailure::Timeout { steps, elapsed_ms } => Self::SolverTimeout { steps, elapsed_ms },
            SolveFailure::Cancelled => Self::Cancelled,
        }
    }
}

/// Shared budget of a solve and the re-solves it spawns.
pub(crate) struct Budget {
    cancel: CancellationToken,
    max_steps: u64,
    started: Instant,
    deadline: Option<Instant>,
}

impl Budget {
    fn new(limits: &SolveLimits, cancel: CancellationToken) -> Self {
        let started = Instant::now();
        Self {
            cancel,
            max_steps: limits.max_steps,
            started,
            deadline: limits.timeout.map(|timeout| started + timeout),
        }
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Solver over one fact base.
pub struct Solver<'a> {
    facts: &'a FactSet,
    prefs: &'a PreferenceSet,
    limits: SolveLimits,
    cancel: CancellationToken,
    stats: SolveStats,
}

impl std::fmt::Debug for Solver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Solver")
            .field("nodes", &self.facts.nodes().len())
            .field("rules", &self.facts.rules().len())
            .field("limits", &self.limits)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<'a> Solver<'a> {
    /// A solver with default limits.
    #[must_use]
    pub fn new(facts: &'a FactSet, prefs: &'a PreferenceSet) -> Self {
        Self {
            facts,
            prefs,
            limits: SolveLimits::default(),
            cancel: CancellationToken::new(),
            stats: SolveStats::default(),
        }
    }

    /// Replace the limits.
    #[must_use]
    pub fn with_limits(mut self, limits: SolveLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Observe a cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Counters of the last [`solve`](Self::solve).
    #[must_use]
    pub const fn stats(&self) -> &SolveStats {
        &self.stats
    }

    /// Find the least-cost assignment.
    ///
    /// The same facts, preferences and step budget always give the same
    /// result. When the step budget runs out after some solution was found,
    /// the best one so far is returned; a passed deadline always fails.
    ///
    /// # Errors
    /// See [`SolveFailure`].
    pub fn solve(&mut self) -> Result<Assignment, SolveFailure> {
        let budget = Budget::new(&self.limits, self.cancel.clone());
        let enabled = vec![true; self.facts.rules().len()];
        let mut search =
            Search::new(self.facts, self.prefs, &budget, &enabled, Goal::Optimal);
        let outcome = search.run();
        self.stats = search.stats;
        let blamed = search.take_blame();

        match outcome {
            Ok(Some(values)) => {
                debug!(
                    decisions = self.stats.decisions,
                    backtracks = self.stats.backtracks,
                    solutions = self.stats.solutions,
                    pruned = self.stats.pruned,
                    elapsed_ms = budget.elapsed_ms(),
                    "solution found"
                );
                Ok(Assignment::new(values))
            }
            Ok(None) => {
                debug!(
                    blamed = blamed.len(),
                    conflicts = self.stats.conflicts,
                    "no solution, extracting core"
                );
                let core = explain::unsat_core(
                    self.facts,
                    self.prefs,
                    &self.limits,
                    &budget,
                    blamed,
                    &mut self.stats,
                )?;
                Err(SolveFailure::Unsatisfiable(core))
            }
            Err(Abort::Steps | Abort::Deadline) => Err(SolveFailure::Timeout {
                steps: self.stats.steps(),
                elapsed_ms: budget.elapsed_ms(),
            }),
            Err(Abort::Cancelled) => Err(SolveFailure::Cancelled),
        }
    }
}

/// Solve `facts` under `prefs`.
///
/// # Errors
/// See [`SolveFailure`].
pub fn solve(
    facts: &FactSet,
    prefs: &PreferenceSet,
    limits: SolveLimits,
    cancel: &CancellationToken,
) -> Result<Assignment, SolveFailure> {
    Solver::new(facts, prefs)
        .with_limits(limits)
        .with_cancel(cancel.clone())
        .solve()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::build_facts;
    use spackle_core::{
        AbstractSpec, ConstraintKind, PackageDef, PackageRepository, VariantDef, VariantValue,
    };

    fn solve_one(repo: &PackageRepository, spec: &str) -> (FactSet, Result<Assignment, SolveFailure>) {
        let prefs = PreferenceSet::default();
        let facts = build_facts(&[AbstractSpec::parse(spec).unwrap()], repo, &prefs).unwrap();
        let result = Solver::new(&facts, &prefs).solve();
        (facts, result)
    }

    fn diamond() -> PackageRepository {
        PackageRepository::new([
            PackageDef::builder("top")
                .version("1.0")
                .depends_on("left")
                .depends_on("right")
                .build()
                .unwrap(),
            PackageDef::builder("left")
                .version("1.0")
                .depends_on("base@:1")
                .build()
                .unwrap(),
            PackageDef::builder("right")
                .version("1.0")
                .depends_on("base@1.1:")
                .build()
                .unwrap(),
            PackageDef::builder("base")
                .version("1.0")
                .version("1.1")
                .version("2.0")
                .build()
                .unwrap(),
            PackageDef::builder("unused").version("1.0").build().unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn diamond_unifies_on_shared_version() {
        let (facts, result) = solve_one(&diamond(), "top");
        let assignment = result.unwrap();
        assert_eq!(
            assignment.summary(&facts),
            ["base@1.1", "left@1.0", "right@1.0", "top@1.0"]
        );
    }

    #[test]
    fn preferences_are_weighed_over_the_whole_dag() {
        // The newest a only allows the deprecated b; the older a allows the
        // regular one.
        let repo = PackageRepository::new([
            PackageDef::builder("a")
                .version("1.0")
                .version("2.0")
                .depends_on_when("b@:1.0", "@2.0")
                .depends_on_when("b", "@:1.0")
                .build()
                .unwrap(),
            PackageDef::builder("b")
                .deprecated_version("1.0")
                .version("2.0")
                .build()
                .unwrap(),
        ])
        .unwrap();
        let prefs = PreferenceSet::default();
        let facts = build_facts(&[AbstractSpec::named("a")], &repo, &prefs).unwrap();
        let mut solver = Solver::new(&facts, &prefs);
        let assignment = solver.solve().unwrap();
        assert_eq!(assignment.summary(&facts), ["a@1.0", "b@2.0"]);
        assert!(solver.stats().solutions >= 2, "{:?}", solver.stats());

        let (facts, result) = solve_one(&repo, "a@2.0");
        assert_eq!(result.unwrap().summary(&facts), ["a@2.0", "b@1.0"]);
    }

    #[test]
    fn equal_cost_keeps_first_solution_in_preference_order() {
        // Taking the newest x forces the older y; the reverse costs the same
        // rank sum, so the solution reached first stands.
        let repo = PackageRepository::new([
            PackageDef::builder("top")
                .version("1.0")
                .depends_on("x")
                .depends_on("y")
                .build()
                .unwrap(),
            PackageDef::builder("x")
                .version("1.0")
                .version("2.0")
                .depends_on_when("y@:1.0", "@2.0")
                .build()
                .unwrap(),
            PackageDef::builder("y").version("1.0").version("2.0").build().unwrap(),
        ])
        .unwrap();
        let (facts, result) = solve_one(&repo, "top");
        assert_eq!(
            result.unwrap().summary(&facts),
            ["top@1.0", "x@2.0", "y@1.0"]
        );
    }

    #[test]
    fn variant_preference_and_request() {
        let repo = PackageRepository::new([PackageDef::builder("zlib")
            .version("1.3")
            .variant(VariantDef::boolean("shared", true))
            .variant(VariantDef::multi("libs", &["static", "shared"], &["shared"]))
            .build()
            .unwrap()])
        .unwrap();

        let (facts, result) = solve_one(&repo, "zlib");
        let variants = result.unwrap().variants(&facts, 0);
        assert_eq!(variants["shared"], VariantValue::Bool(true));
        assert_eq!(
            variants["libs"],
            VariantValue::Multi(["shared".to_string()].into())
        );

        let (facts, result) = solve_one(&repo, "zlib ~shared libs=static");
        let variants = result.unwrap().variants(&facts, 0);
        assert_eq!(variants["shared"], VariantValue::Bool(false));
        assert_eq!(variants["libs"], VariantValue::parse("shared,static"));
    }

    #[test]
    fn unknown_variant_is_unsatisfiable() {
        let (_, result) = solve_one(&diamond(), "top +nonexistent");
        let SolveFailure::Unsatisfiable(core) = result.unwrap_err() else {
            panic!("expected an unsatisfiable core");
        };
        assert!(core.mentions(ConstraintKind::Request, "top"));
        assert_eq!(core.constraints.len(), 1);
        assert!(core.minimal);
    }

    /// `top` needs `left` and `right`, each with two versions.
    fn wide() -> PackageRepository {
        PackageRepository::new([
            PackageDef::builder("top")
                .version("1.0")
                .depends_on("left")
                .depends_on("right")
                .build()
                .unwrap(),
            PackageDef::builder("left").version("1.0").version("2.0").build().unwrap(),
            PackageDef::builder("right").version("1.0").version("2.0").build().unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn step_budget_is_enforced() {
        let prefs = PreferenceSet::default();
        let facts = build_facts(&[AbstractSpec::named("top")], &wide(), &prefs).unwrap();
        let limits = SolveLimits {
            max_steps: 1,
            ..SolveLimits::default()
        };
        let err = solve(&facts, &prefs, limits, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, SolveFailure::Timeout { steps: 2, .. }), "{err:?}");

        let limits = SolveLimits {
            max_steps: 2,
            ..SolveLimits::default()
        };
        let assignment = solve(&facts, &prefs, limits, &CancellationToken::new()).unwrap();
        assert_eq!(
            assignment.summary(&facts),
            ["left@2.0", "right@2.0", "top@1.0"]
        );
    }

    #[test]
    fn passed_deadline_times_out_before_any_decision() {
        let prefs = PreferenceSet::default();
        let facts = build_facts(&[AbstractSpec::named("top")], &diamond(), &prefs).unwrap();
        let limits = SolveLimits {
            timeout: Some(Duration::ZERO),
            ..SolveLimits::default()
        };
        let err = solve(&facts, &prefs, limits, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, SolveFailure::Timeout { steps: 0, .. }), "{err:?}");
    }

    #[test]
    fn solver_debug_names_its_budget() {
        let prefs = PreferenceSet::default();
        let facts = build_facts(&[AbstractSpec::named("top")], &diamond(), &prefs).unwrap();
        let rendered = format!("{:?}", Solver::new(&facts, &prefs));
        assert!(rendered.starts_with("Solver {"), "{rendered}");
        assert!(rendered.contains("max_steps"), "{rendered}");
    }

    #[test]
    fn cancelled_token_stops_search() {
        let prefs = PreferenceSet::default();
        let facts = build_facts(&[AbstractSpec::named("top")], &diamond(), &prefs).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = solve(&facts, &prefs, SolveLimits::default(), &cancel).unwrap_err();
        assert_eq!(err, SolveFailure::Cancelled);
        assert_eq!(Error::from(err), Error::Cancelled);
    }
}
