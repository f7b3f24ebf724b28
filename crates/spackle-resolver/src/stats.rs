//! Concretizer statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters for one solve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SolveStats {
    /// Values tried.
    pub decisions: u64,
    /// Decisions undone after their values ran out.
    pub backtracks: u64,
    /// Conflicts found by propagation.
    pub conflicts: u64,
    /// Rule evaluations.
    pub propagations: u64,
    /// Re-solves spent shrinking an unsatisfiable core.
    pub core_checks: u64,
    /// Complete assignments reached, the returned one included.
    pub solutions: u64,
    /// Branches cut because they could not beat the best solution.
    pub pruned: u64,
}

impl SolveStats {
    /// Decisions plus backtracks, the quantity bounded by `max_steps`.
    #[must_use]
    pub const fn steps(&self) -> u64 {
        self.decisions + self.backtracks
    }
}

/// Cumulative counters across every concretization of one concretizer.
#[derive(Debug, Default)]
pub struct ConcretizerStats {
    /// Concretize calls.
    pub requests: AtomicU64,
    /// Solver runs (one per root in separate mode).
    pub solves: AtomicU64,
    /// Requests that ended in an error.
    pub failures: AtomicU64,
    /// Total decisions.
    pub decisions: AtomicU64,
    /// Total backtracks.
    pub backtracks: AtomicU64,
    /// Total core-shrinking re-solves.
    pub core_checks: AtomicU64,
    /// Time spent solving, in microseconds.
    pub solve_time_us: AtomicU64,
}

impl ConcretizerStats {
    pub(crate) fn record_solve(&self, stats: &SolveStats, elapsed: Duration) {
        self.solves.fetch_add(1, Ordering::Relaxed);
        self.decisions.fetch_add(stats.decisions, Ordering::Relaxed);
        self.backtracks.fetch_add(stats.backtracks, Ordering::Relaxed);
        self.core_checks.fetch_add(stats.core_checks, Ordering::Relaxed);
        self.solve_time_us.fetch_add(
            u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }

    /// A plain copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            solves: self.solves.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            decisions: self.decisions.load(Ordering::Relaxed),
            backtracks: self.backtracks.load(Ordering::Relaxed),
            core_checks: self.core_checks.load(Ordering::Relaxed),
            solve_time: Duration::from_micros(self.solve_time_us.load(Ordering::Relaxed)),
        }
    }
}

/// Point-in-time copy of [`ConcretizerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub solves: u64,
    pub failures: u64,
    pub decisions: u64,
    pub backtracks: u64,
    pub core_checks: u64,
    pub solve_time: Duration,
}
