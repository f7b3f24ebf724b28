//! Solver output.

use crate::facts::{
    ChoiceId, EdgeId, FactSet, NodeId, Origin, ProviderOption, RootTarget, TRUE, VarId,
};
use spackle_core::{CompilerSpec, VariantValue, Version};
use std::collections::BTreeMap;

/// One value per variable of a [`FactSet`].
///
/// Variables of absent nodes may be unassigned. The typed accessors decode
/// values against the fact set the assignment was computed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    values: Vec<Option<usize>>,
}

impl Assignment {
    pub(crate) const fn new(values: Vec<Option<usize>>) -> Self {
        Self { values }
    }

    /// Raw value of a variable.
    #[must_use]
    pub fn value(&self, var: VarId) -> Option<usize> {
        self.values.get(var).copied().flatten()
    }

    /// Whether `node` is part of the solution.
    #[must_use]
    pub fn is_present(&self, facts: &FactSet, node: NodeId) -> bool {
        self.value(facts.node(node).presence) == Some(TRUE)
    }

    /// Present nodes in discovery order.
    #[must_use]
    pub fn present_nodes(&self, facts: &FactSet) -> Vec<NodeId> {
        (0..facts.nodes().len())
            .filter(|&node| self.is_present(facts, node))
            .collect()
    }

    /// Chosen version.
    #[must_use]
    pub fn version<'f>(&self, facts: &'f FactSet, node: NodeId) -> Option<&'f Version> {
        let n = facts.node(node);
        self.value(n.version)
            .and_then(|i| n.versions.get(i))
            .map(|decl| &decl.version)
    }

    /// Chosen variant values, by variant name.
    #[must_use]
    pub fn variants(&self, facts: &FactSet, node: NodeId) -> BTreeMap<String, VariantValue> {
        let mut out = BTreeMap::new();
        for slot in &facts.node(node).variants {
            let value = match slot.var {
                Some(var) => self.value(var).and_then(|i| slot.value_at(i)),
                None => {
                    let set: std::collections::BTreeSet<String> = slot
                        .members
                        .iter()
                        .zip(slot.def.values())
                        .filter(|(member, _)| self.value(**member) == Some(TRUE))
                        .map(|(_, value)| value.clone())
                        .collect();
                    (!set.is_empty()).then_some(VariantValue::Multi(set))
                }
            };
            if let Some(value) = value {
                out.insert(slot.def.name.clone(), value);
            }
        }
        out
    }

    /// Chosen compiler.
    #[must_use]
    pub fn compiler<'f>(&self, facts: &'f FactSet, node: NodeId) -> Option<&'f CompilerSpec> {
        self.value(facts.node(node).compiler)
            .and_then(|i| facts.compilers().get(i))
    }

    /// Chosen platform.
    #[must_use]
    pub fn platform<'f>(&self, facts: &'f FactSet) -> Option<&'f str> {
        self.value(facts.platform_var())
            .and_then(|i| facts.platforms().get(i))
            .map(String::as_str)
    }

    /// Provider selected by a choice, if any.
    #[must_use]
    pub fn provider<'f>(&self, facts: &'f FactSet, choice: ChoiceId) -> Option<&'f ProviderOption> {
        let choice = facts.choice(choice);
        self.value(choice.var).and_then(|value| choice.option(value))
    }

    /// Where a node comes from; `None` for nodes that can only be built.
    #[must_use]
    pub fn origin<'f>(&self, facts: &'f FactSet, node: NodeId) -> Option<&'f Origin> {
        let n = facts.node(node);
        n.origin
            .and_then(|var| self.value(var))
            .and_then(|i| n.origins.get(i))
    }

    /// Whether a dependency edge is active.
    #[must_use]
    pub fn is_active(&self, facts: &FactSet, edge: EdgeId) -> bool {
        self.value(facts.edges()[edge].active) == Some(TRUE)
    }

    /// The node a requested root resolved to.
    #[must_use]
    pub fn root_node(&self, facts: &FactSet, root: usize) -> Option<NodeId> {
        match facts.roots().get(root)?.target {
            RootTarget::Node(node) => Some(node),
            RootTarget::Virtual(choice) => self.provider(facts, choice).map(|opt| opt.provider),
        }
    }

    /// `name@version` of every present node, sorted.
    #[must_use]
    pub fn summary(&self, facts: &FactSet) -> Vec<String> {
        let mut out: Vec<String> = self
            .present_nodes(facts)
            .into_iter()
            .map(|node| {
                let name = &facts.node(node).name;
                match self.version(facts, node) {
                    Some(version) => format!("{name}@{version}"),
                    None => name.clone(),
                }
            })
            .collect();
        out.sort();
        out
    }
}
