//! Solution cost.
//!
//! Solutions are compared lexicographically on [`CRITERIA`] counters, most
//! important first:
//!
//! 1. deprecated versions;
//! 2. nodes built although an installed or external candidate existed;
//! 3. sum of version ranks in preference order;
//! 4. variant values other than the preferred ones;
//! 5. extra providers per virtual;
//! 6. sum of provider ranks;
//! 7. nodes whose configured compiler was not used;
//! 8. extra compilers;
//! 9. sum of compiler indices;
//! 10. platform index.
//!
//! [`CostModel::lower_bound`] only counts present nodes and takes the best
//! value still in each domain, so it never decreases as domains shrink and is
//! exact once every variable of a present node is decided.

use crate::domain::Domain;
use crate::facts::{BUILD, FALSE, FactSet, NO_PROVIDER, NodeId, TRUE, VarId};
use crate::preferences::PreferenceSet;
use spackle_core::VariantValue;
use std::collections::{BTreeMap, BTreeSet};

/// Number of optimization criteria.
pub(super) const CRITERIA: usize = 10;

/// Lexicographically compared penalty counters.
pub(super) type Cost = [u64; CRITERIA];

/// Penalty of every value of a variable.
struct Table {
    var: VarId,
    penalty: Vec<u64>,
}

impl Table {
    fn new(var: VarId, penalty: Vec<u64>) -> Self {
        Self { var, penalty }
    }

    fn flags(var: VarId, flags: impl IntoIterator<Item = bool>) -> Self {
        Self::new(var, flags.into_iter().map(u64::from).collect())
    }

    fn min(&self, domains: &[Domain]) -> u64 {
        domains[self.var]
            .iter()
            .filter_map(|value| self.penalty.get(value).copied())
            .min()
            .unwrap_or(0)
    }
}

struct NodeCost {
    presence: VarId,
    compiler: VarId,
    deprecated: Table,
    build: Option<Table>,
    version_rank: Table,
    variants: Vec<Table>,
    compiler_mismatch: Option<Table>,
}

struct ChoiceCost {
    var: VarId,
    virtual_name: String,
    /// Provider node of each value; `None` for [`NO_PROVIDER`].
    providers: Vec<Option<NodeId>>,
    rank: Table,
}

/// Penalty tables of one fact base under one preference set.
pub(super) struct CostModel {
    nodes: Vec<NodeCost>,
    choices: Vec<ChoiceCost>,
    platform: VarId,
}

impl CostModel {
    pub(super) fn new(facts: &FactSet, prefs: &PreferenceSet) -> Self {
        let nodes = facts
            .nodes()
            .iter()
            .map(|node| {
                let mut rank = vec![0; node.versions.len()];
                for (position, index) in prefs
                    .version_order(&node.name, &node.versions)
                    .into_iter()
                    .enumerate()
                {
                    rank[index] = position as u64;
                }

                let mut variants = Vec::new();
                for slot in &node.variants {
                    let preferred = prefs.preferred_variant(&node.name, &slot.def);
                    if let Some(var) = slot.var {
                        let first = slot.value_index(&preferred);
                        variants.push(Table::flags(
                            var,
                            (0..facts.var(var).size).map(|value| Some(value) != first),
                        ));
                    }
                    for (member, value) in slot.members.iter().zip(slot.def.values()) {
                        let wanted = match &preferred {
                            VariantValue::Multi(set) if set.contains(value) => TRUE,
                            _ => FALSE,
                        };
                        variants.push(Table::flags(*member, [FALSE, TRUE].map(|v| v != wanted)));
                    }
                }

                let compiler_mismatch = prefs.compiler_preference(&node.name).map(|preference| {
                    Table::flags(
                        node.compiler,
                        facts.compilers().iter().map(|c| !preference.matches(c)),
                    )
                });

                NodeCost {
                    presence: node.presence,
                    compiler: node.compiler,
                    deprecated: Table::flags(
                        node.version,
                        node.versions.iter().map(|decl| decl.deprecated),
                    ),
                    build: node.origin.map(|var| {
                        Table::flags(var, (0..facts.var(var).size).map(|v| v == BUILD))
                    }),
                    version_rank: Table::new(node.version, rank),
                    variants,
                    compiler_mismatch,
                }
            })
            .collect();

        let choices = facts
            .choices()
            .iter()
            .map(|choice| {
                let mut providers = vec![None];
                let mut rank = vec![0];
                for option in &choice.options {
                    let provider = facts.node(option.provider);
                    providers.push(Some(option.provider));
                    rank.push(
                        prefs
                            .provider_rank(&choice.virtual_name, &provider.name)
                            .min(choice.options.len()) as u64,
                    );
                }
                ChoiceCost {
                    var: choice.var,
                    virtual_name: choice.virtual_name.clone(),
                    providers,
                    rank: Table::new(choice.var, rank),
                }
            })
            .collect();

        Self {
            nodes,
            choices,
            platform: facts.platform_var(),
        }
    }

    /// Least cost of any solution below the current domains.
    pub(super) fn lower_bound(&self, domains: &[Domain]) -> Cost {
        let mut cost = [0; CRITERIA];
        let mut compilers = BTreeSet::new();

        for node in &self.nodes {
            if domains[node.presence].single() != Some(TRUE) {
                continue;
            }
            cost[0] += node.deprecated.min(domains);
            cost[1] += node.build.as_ref().map_or(0, |table| table.min(domains));
            cost[2] += node.version_rank.min(domains);
            cost[3] += node.variants.iter().map(|table| table.min(domains)).sum::<u64>();
            cost[6] += node.compiler_mismatch.as_ref().map_or(0, |table| table.min(domains));
            let compiler = &domains[node.compiler];
            if let Some(index) = compiler.single() {
                compilers.insert(index);
            }
            cost[8] += compiler.iter().min().unwrap_or(0) as u64;
        }

        let mut providers: BTreeMap<&str, BTreeSet<NodeId>> = BTreeMap::new();
        for choice in &self.choices {
            let domain = &domains[choice.var];
            if let Some(provider) = domain
                .single()
                .filter(|&value| value != NO_PROVIDER)
                .and_then(|value| choice.providers.get(value).copied().flatten())
            {
                providers
                    .entry(choice.virtual_name.as_str())
                    .or_default()
                    .insert(provider);
            }
            cost[5] += choice.rank.min(domains);
        }
        cost[4] = providers
            .values()
            .map(|set| set.len().saturating_sub(1) as u64)
            .sum();
        cost[7] = compilers.len().saturating_sub(1) as u64;
        cost[9] = domains[self.platform].iter().min().unwrap_or(0) as u64;
        cost
    }
}
