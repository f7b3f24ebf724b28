//! Depth-first branch and bound with unit propagation.
//!
//! Domains only ever shrink between a decision and its undo. Each narrowing is
//! pushed on the trail together with the rule that caused it, so a conflict
//! can be traced back to the rules responsible for it.
//!
//! Under [`Goal::Optimal`] every solution becomes the incumbent when it is
//! cheaper than the previous one, and branches whose cost bound cannot beat
//! the incumbent are cut. The search ends when the tree is exhausted or a
//! solution without any penalty is found.

use super::cost::{Cost, CostModel};
use super::{Budget, SolveStats};
use crate::domain::Domain;
use crate::facts::{
    BUILD, Consequence, FALSE, FactSet, Lit, NO_PROVIDER, RuleId, TRUE, VarId, VarKind,
};
use crate::preferences::PreferenceSet;
use spackle_core::VariantValue;
use std::collections::{BTreeSet, VecDeque};
use tracing::{debug, trace};

/// Rules applied between two looks at the cancellation token and deadline.
const POLL_INTERVAL: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    True,
    False,
    Unknown,
}

/// Why a search stopped without an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Abort {
    /// `max_steps` decisions and backtracks were spent.
    Steps,
    /// The wall-clock deadline passed.
    Deadline,
    Cancelled,
}

/// What stopped propagation.
enum Halt {
    Conflict(RuleId),
    Abort(Abort),
}

impl From<Abort> for Halt {
    fn from(abort: Abort) -> Self {
        Self::Abort(abort)
    }
}

/// What the search is after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Goal {
    /// The cheapest solution; conflicts are blamed for core extraction.
    Optimal,
    /// Any solution.
    Feasible,
}

struct Incumbent {
    cost: Cost,
    values: Vec<Option<usize>>,
}

struct TrailEntry {
    var: VarId,
    previous: Domain,
    reason: Option<RuleId>,
}

struct Frame {
    var: VarId,
    /// Remaining values, next on top.
    remaining: Vec<usize>,
    mark: usize,
}

pub(super) struct Search<'a> {
    facts: &'a FactSet,
    prefs: &'a PreferenceSet,
    budget: &'a Budget,
    watches: Vec<Vec<RuleId>>,
    domains: Vec<Domain>,
    trail: Vec<TrailEntry>,
    frames: Vec<Frame>,
    queue: VecDeque<RuleId>,
    queued: Vec<bool>,
    blame: Option<BTreeSet<RuleId>>,
    cost: Option<CostModel>,
    best: Option<Incumbent>,
    steps: u64,
    pub(super) stats: SolveStats,
}

impl<'a> Search<'a> {
    /// A search over the rules marked in `enabled`.
    pub(super) fn new(
        facts: &'a FactSet,
        prefs: &'a PreferenceSet,
        budget: &'a Budget,
        enabled: &'a [bool],
        goal: Goal,
    ) -> Self {
        let mut watches = vec![Vec::new(); facts.vars().len()];
        for (id, rule) in facts.rules().iter().enumerate() {
            if !enabled[id] {
                continue;
            }
            let mut vars: Vec<VarId> = rule.lits().map(|lit| lit.var).collect();
            vars.sort_unstable();
            vars.dedup();
            for var in vars {
                watches[var].push(id);
            }
        }
        Self {
            facts,
            prefs,
            budget,
            watches,
            domains: facts.vars().iter().map(|v| Domain::full(v.size)).collect(),
            trail: Vec::new(),
            frames: Vec::new(),
            queue: (0..facts.rules().len()).filter(|&id| enabled[id]).collect(),
            queued: enabled.to_vec(),
            blame: (goal == Goal::Optimal).then(BTreeSet::new),
            cost: (goal == Goal::Optimal).then(|| CostModel::new(facts, prefs)),
            best: None,
            steps: 0,
            stats: SolveStats::default(),
        }
    }

    /// Rules that took part in some conflict.
    pub(super) fn take_blame(&mut self) -> BTreeSet<RuleId> {
        self.blame.take().unwrap_or_default()
    }

    /// Run the search. `Ok(None)` means the rules are unsatisfiable.
    ///
    /// When the step budget runs out after a solution was found, the best
    /// one so far is returned.
    pub(super) fn run(&mut self) -> Result<Option<Vec<Option<usize>>>, Abort> {
        match self.explore() {
            Ok(()) => {}
            Err(Abort::Steps) if self.best.is_some() => {
                debug!(
                    steps = self.steps,
                    solutions = self.stats.solutions,
                    "step budget spent, keeping the best solution found"
                );
            }
            Err(abort) => return Err(abort),
        }
        Ok(self.best.take().map(|best| best.values))
    }

    fn explore(&mut self) -> Result<(), Abort> {
        self.interrupted()?;
        match self.propagate() {
            Ok(()) => {}
            Err(Halt::Conflict(conflict)) => {
                self.on_conflict(conflict);
                return Ok(());
            }
            Err(Halt::Abort(abort)) => return Err(abort),
        }
        loop {
            if let Some(var) = self.next_var() {
                let mut remaining = self.value_order(var);
                remaining.reverse();
                self.frames.push(Frame {
                    var,
                    remaining,
                    mark: self.trail.len(),
                });
            } else {
                let mark = self.trail.len();
                match self.close() {
                    Ok(()) => {
                        if self.record() {
                            return Ok(());
                        }
                    }
                    Err(Halt::Conflict(conflict)) => self.on_conflict(conflict),
                    Err(Halt::Abort(abort)) => return Err(abort),
                }
                self.undo(mark);
            }
            if !self.advance()? {
                return Ok(());
            }
        }
    }

    /// Keep the current full assignment if it beats the incumbent. Returns
    /// whether the search is over.
    fn record(&mut self) -> bool {
        self.stats.solutions += 1;
        let values = || self.domains.iter().map(Domain::single).collect();
        let Some(model) = &self.cost else {
            self.best = Some(Incumbent {
                cost: Cost::default(),
                values: values(),
            });
            return true;
        };
        let cost = model.lower_bound(&self.domains);
        if self.best.as_ref().is_none_or(|best| cost < best.cost) {
            trace!(?cost, "new incumbent");
            self.best = Some(Incumbent {
                cost,
                values: values(),
            });
        }
        cost == Cost::default()
    }

    /// Whether the current branch cannot beat the incumbent.
    fn dominated(&mut self) -> bool {
        let (Some(model), Some(best)) = (&self.cost, &self.best) else {
            return false;
        };
        let dominated = model.lower_bound(&self.domains) >= best.cost;
        if dominated {
            self.stats.pruned += 1;
        }
        dominated
    }

    fn interrupted(&self) -> Result<(), Abort> {
        if self.budget.cancel.is_cancelled() {
            return Err(Abort::Cancelled);
        }
        if self.budget.expired() {
            return Err(Abort::Deadline);
        }
        Ok(())
    }

    fn tick(&mut self) -> Result<(), Abort> {
        self.steps += 1;
        self.interrupted()?;
        if self.steps > self.budget.max_steps {
            return Err(Abort::Steps);
        }
        Ok(())
    }

    /// Try the next value of the innermost decision, backtracking through
    /// exhausted ones. Returns `false` once every decision is exhausted.
    fn advance(&mut self) -> Result<bool, Abort> {
        loop {
            let Some(frame) = self.frames.last_mut() else {
                return Ok(false);
            };
            let (var, mark) = (frame.var, frame.mark);
            let next = frame.remaining.pop();
            self.undo(mark);
            let Some(value) = next else {
                self.frames.pop();
                self.stats.backtracks += 1;
                self.tick()?;
                continue;
            };

            self.stats.decisions += 1;
            self.tick()?;
            trace!(var = %self.facts.describe_var(var), value, "decide");
            let size = self.facts.var(var).size;
            self.set_domain(var, Domain::singleton(size, value), None);
            match self.propagate() {
                Ok(()) if !self.dominated() => return Ok(true),
                Ok(()) => {}
                Err(Halt::Conflict(conflict)) => self.on_conflict(conflict),
                Err(Halt::Abort(abort)) => return Err(abort),
            }
        }
    }

    /// Every node not yet required is left out.
    fn close(&mut self) -> Result<(), Halt> {
        let facts = self.facts;
        for node in facts.nodes() {
            if self.domains[node.presence].len() > 1 {
                self.set_domain(node.presence, Domain::singleton(2, FALSE), None);
            }
        }
        self.propagate()
    }

    fn undo(&mut self, mark: usize) {
        while self.trail.len() > mark {
            if let Some(entry) = self.trail.pop() {
                self.domains[entry.var] = entry.previous;
            }
        }
    }

    /// First undecided variable whose owner is present.
    fn next_var(&self) -> Option<VarId> {
        self.facts.decision_order().iter().copied().find(|&var| {
            self.domains[var].len() > 1
                && self.facts.var(var).owner.is_none_or(|node| {
                    self.domains[self.facts.node(node).presence].single() == Some(TRUE)
                })
        })
    }

    // Propagation

    fn status(&self, lit: &Lit) -> Status {
        let domain = &self.domains[lit.var];
        if domain.is_subset(&lit.values) {
            Status::True
        } else if domain.is_disjoint(&lit.values) {
            Status::False
        } else {
            Status::Unknown
        }
    }

    fn set_domain(&mut self, var: VarId, domain: Domain, reason: Option<RuleId>) {
        let previous = std::mem::replace(&mut self.domains[var], domain);
        self.trail.push(TrailEntry {
            var,
            previous,
            reason,
        });
        for &rule in &self.watches[var] {
            if !self.queued[rule] {
                self.queued[rule] = true;
                self.queue.push_back(rule);
            }
        }
    }

    fn narrow(&mut self, var: VarId, domain: Domain, reason: RuleId) -> Result<(), RuleId> {
        if domain.is_empty() {
            return Err(reason);
        }
        if domain != self.domains[var] {
            self.set_domain(var, domain, Some(reason));
        }
        Ok(())
    }

    fn require(&mut self, lit: &Lit, reason: RuleId) -> Result<(), RuleId> {
        let domain = self.domains[lit.var].intersect(&lit.values);
        self.narrow(lit.var, domain, reason)
    }

    fn exclude(&mut self, lit: &Lit, reason: RuleId) -> Result<(), RuleId> {
        let domain = self.domains[lit.var].difference(&lit.values);
        self.narrow(lit.var, domain, reason)
    }

    fn propagate(&mut self) -> Result<(), Halt> {
        while let Some(rule) = self.queue.pop_front() {
            self.queued[rule] = false;
            self.stats.propagations += 1;
            let outcome = if self.stats.propagations % POLL_INTERVAL == 0 {
                self.interrupted().map_err(Halt::from)
            } else {
                Ok(())
            };
            if let Err(halt) = outcome.and_then(|()| self.apply(rule).map_err(Halt::Conflict)) {
                for rule in self.queue.drain(..) {
                    self.queued[rule] = false;
                }
                return Err(halt);
            }
        }
        Ok(())
    }

    fn apply(&mut self, id: RuleId) -> Result<(), RuleId> {
        let facts = self.facts;
        let rule = facts.rule(id);

        let mut pending = None;
        for lit in &rule.when {
            match self.status(lit) {
                Status::False => return Ok(()),
                Status::True => {}
                Status::Unknown if pending.is_some() => return Ok(()),
                Status::Unknown => pending = Some(lit),
            }
        }

        match &rule.then {
            Consequence::Forbidden => match pending {
                None => Err(id),
                Some(cond) => self.exclude(cond, id),
            },
            Consequence::All(lits) => match pending {
                None => {
                    for lit in lits {
                        self.require(lit, id)?;
                    }
                    Ok(())
                }
                Some(cond) if lits.iter().any(|lit| self.status(lit) == Status::False) => {
                    self.exclude(cond, id)
                }
                Some(_) => Ok(()),
            },
            Consequence::Any(lits) => {
                let mut open = None;
                let mut open_count = 0;
                for lit in lits {
                    match self.status(lit) {
                        Status::True => return Ok(()),
                        Status::Unknown => {
                            open_count += 1;
                            open = Some(lit);
                        }
                        Status::False => {}
                    }
                }
                match (pending, open_count, open) {
                    (None, 0, _) => Err(id),
                    (None, 1, Some(lit)) => self.require(lit, id),
                    (Some(cond), 0, _) => self.exclude(cond, id),
                    _ => Ok(()),
                }
            }
        }
    }

    // Conflict analysis

    fn on_conflict(&mut self, conflict: RuleId) {
        self.stats.conflicts += 1;
        trace!(rule = %self.facts.rule(conflict).description, "conflict");
        let Some(blame) = self.blame.as_mut() else {
            return;
        };

        let mut seen_vars = BTreeSet::new();
        let mut stack = vec![conflict];
        let mut seen_rules = BTreeSet::new();
        while let Some(rule) = stack.pop() {
            if !seen_rules.insert(rule) {
                continue;
            }
            blame.insert(rule);
            for lit in self.facts.rule(rule).lits() {
                if !seen_vars.insert(lit.var) {
                    continue;
                }
                stack.extend(
                    self.trail
                        .iter()
                        .filter(|entry| entry.var == lit.var)
                        .filter_map(|entry| entry.reason),
                );
            }
        }
    }

    // Value ordering

    fn value_order(&self, var: VarId) -> Vec<usize> {
        let facts = self.facts;
        let domain = &self.domains[var];
        let mut order: Vec<usize> = domain.iter().collect();

        match facts.var(var).kind {
            VarKind::Platform | VarKind::Presence(_) | VarKind::EdgeActive(_) => {}
            VarKind::Origin(node) => {
                let n = facts.node(node);
                let rank = self.prefs.version_order(&n.name, &n.versions);
                order.sort_by_key(|&value| {
                    let position = n.origins.get(value).and_then(|origin| {
                        let version = origin.version()?;
                        let index = n.versions.iter().position(|d| &d.version == version)?;
                        rank.iter().position(|&i| i == index)
                    });
                    (value == BUILD, position)
                });
            }
            VarKind::Version(node) => {
                let n = facts.node(node);
                order = self
                    .prefs
                    .version_order(&n.name, &n.versions)
                    .into_iter()
                    .filter(|&i| domain.contains(i))
                    .collect();
            }
            VarKind::Variant { node, slot } => {
                let n = facts.node(node);
                let slot = &n.variants[slot];
                let preferred = self.prefs.preferred_variant(&n.name, &slot.def);
                if let Some(first) = slot.value_index(&preferred) {
                    order.sort_by_key(|&value| value != first);
                }
            }
            VarKind::Member { node, slot, value } => {
                let n = facts.node(node);
                let slot = &n.variants[slot];
                let wanted = match self.prefs.preferred_variant(&n.name, &slot.def) {
                    VariantValue::Multi(set) => {
                        slot.def.values().get(value).is_some_and(|v| set.contains(v))
                    }
                    _ => false,
                };
                if wanted {
                    order.reverse();
                }
            }
            VarKind::Compiler(node) => {
                let preference = self.prefs.compiler_preference(&facts.node(node).name);
                let inherited = self.inherited_compiler();
                order.sort_by_key(|&i| {
                    let compiler = &facts.compilers()[i];
                    (
                        !preference.is_some_and(|p| p.matches(compiler)),
                        inherited != Some(i),
                    )
                });
            }
            VarKind::Provider(choice) => {
                order.sort_by_key(|&value| self.provider_key(choice, value));
            }
        }
        order
    }

    /// Compiler of the earliest present node that already has one.
    fn inherited_compiler(&self) -> Option<usize> {
        self.facts
            .nodes()
            .iter()
            .filter(|node| self.domains[node.presence].single() == Some(TRUE))
            .find_map(|node| self.domains[node.compiler].single())
    }

    fn provider_key(&self, choice: usize, value: usize) -> (bool, bool, bool, usize, &'a str, usize) {
        let facts = self.facts;
        let choice = facts.choice(choice);
        let Some(option) = choice.option(value) else {
            return (value != NO_PROVIDER, false, false, 0, "", 0);
        };
        let provider = facts.node(option.provider);
        let chosen_elsewhere = facts.choices_of(&choice.virtual_name).iter().any(|&other| {
            let other = facts.choice(other);
            other.var != choice.var
                && self.domains[other.var]
                    .single()
                    .and_then(|v| other.option(v))
                    .is_some_and(|opt| opt.provider == option.provider)
        });
        let present = self.domains[provider.presence].single() == Some(TRUE);
        (
            true,
            !chosen_elsewhere,
            !present,
            self.prefs.provider_rank(&choice.virtual_name, &provider.name),
            provider.name.as_str(),
            option.decl,
        )
    }
}
