//! Unsatisfiable cores.
//!
//! The rules blamed during search are shrunk by deletion: drop one rule,
//! re-solve, and keep it dropped if the rest is still unsatisfiable.
//! Structural rules are always kept and never reported.

use super::search::{Abort, Goal, Search};
use super::{Budget, SolveFailure, SolveLimits, SolveStats};
use crate::facts::{FactSet, RuleId};
use crate::preferences::PreferenceSet;
use spackle_core::{ConstraintKind, CoreConstraint, UnsatisfiableCore};
use std::collections::BTreeSet;
use tracing::debug;

enum Verdict {
    Sat,
    Unsat,
    Unknown,
}

struct Shrinker<'a> {
    facts: &'a FactSet,
    prefs: &'a PreferenceSet,
    budget: &'a Budget,
    stats: &'a mut SolveStats,
}

impl Shrinker<'_> {
    fn check(&mut self, enabled: &[bool]) -> Result<Verdict, SolveFailure> {
        self.stats.core_checks += 1;
        let mut search =
            Search::new(self.facts, self.prefs, self.budget, enabled, Goal::Feasible);
        let outcome = search.run();
        self.stats.propagations += search.stats.propagations;
        match outcome {
            Ok(Some(_)) => Ok(Verdict::Sat),
            Ok(None) => Ok(Verdict::Unsat),
            Err(Abort::Steps | Abort::Deadline) => Ok(Verdict::Unknown),
            Err(Abort::Cancelled) => Err(SolveFailure::Cancelled),
        }
    }
}

/// Explain why the rules of `facts` admit no solution.
pub(super) fn unsat_core(
    facts: &FactSet,
    prefs: &PreferenceSet,
    limits: &SolveLimits,
    budget: &Budget,
    blamed: BTreeSet<RuleId>,
    stats: &mut SolveStats,
) -> Result<UnsatisfiableCore, SolveFailure> {
    let rules = facts.rules();
    let structural: Vec<bool> = rules.iter().map(|rule| rule.structural).collect();
    let relaxable = |id: &RuleId| !rules[*id].structural;

    let mut candidates: Vec<RuleId> = blamed.into_iter().filter(relaxable).collect();
    if candidates.is_empty() {
        candidates = (0..rules.len()).filter(relaxable).collect();
    }
    if !limits.minimize_cores {
        return Ok(build_core(facts, &candidates, false));
    }

    let mut shrinker = Shrinker {
        facts,
        prefs,
        budget,
        stats,
    };
    let mut enabled = structural;
    for &id in &candidates {
        enabled[id] = true;
    }

    match shrinker.check(&enabled)? {
        Verdict::Unsat => {}
        Verdict::Sat => {
            debug!("blamed rules are satisfiable on their own, shrinking from every rule");
            candidates = (0..rules.len()).filter(relaxable).collect();
            enabled = vec![true; rules.len()];
        }
        Verdict::Unknown => return Ok(build_core(facts, &candidates, false)),
    }

    let mut minimal = true;
    let mut checks = 0;
    for &id in &candidates {
        if checks >= limits.max_core_checks {
            minimal = false;
            break;
        }
        checks += 1;
        enabled[id] = false;
        match shrinker.check(&enabled)? {
            Verdict::Unsat => {}
            Verdict::Sat => enabled[id] = true,
            Verdict::Unknown => {
                enabled[id] = true;
                minimal = false;
                break;
            }
        }
    }
    candidates.retain(|&id| enabled[id]);
    debug!(
        constraints = candidates.len(),
        checks, minimal, "unsatisfiable core extracted"
    );
    Ok(build_core(facts, &candidates, minimal))
}

fn build_core(facts: &FactSet, rules: &[RuleId], minimal: bool) -> UnsatisfiableCore {
    let mut constraints: Vec<CoreConstraint> = rules
        .iter()
        .map(|&id| {
            let rule = facts.rule(id);
            CoreConstraint {
                kind: rule.kind,
                description: rule.description.clone(),
            }
        })
        .collect();
    constraints.sort_by(|a, b| (a.kind, &a.description).cmp(&(b.kind, &b.description)));
    constraints.dedup();

    let mut suggestions: Vec<String> = constraints.iter().map(suggest).collect();
    suggestions.dedup();

    UnsatisfiableCore {
        constraints,
        minimal,
        suggestions,
    }
}

fn suggest(constraint: &CoreConstraint) -> String {
    let d = &constraint.description;
    match constraint.kind {
        ConstraintKind::Request => format!("relax or drop '{d}'"),
        ConstraintKind::Dependency => {
            format!("change variants or versions so that '{d}' no longer applies")
        }
        ConstraintKind::VirtualDependency => format!("prefer another provider than '{d}'"),
        ConstraintKind::Conflict => format!("avoid the combination in '{d}'"),
        ConstraintKind::Variant => format!("select a value for the variant in '{d}'"),
        ConstraintKind::Buildable => {
            format!("allow building, or configure a matching external, where '{d}'")
        }
    }
}
