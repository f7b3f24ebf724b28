//! Fact base construction.
//!
//! [`build_facts`] walks the repository from the requested roots and lowers
//! everything reachable from them into finite-domain variables and
//! implication rules over those variables:
//!
//! - every candidate package is a node with a presence, a version, a compiler
//!   and one variable per variant (one boolean per value for multi-valued
//!   variants);
//! - every dependency declaration gets an activity variable that holds
//!   exactly when its parent is present and its `when` condition is met;
//! - every (parent, virtual) pair gets a provider variable whose values are
//!   "none" followed by each (provider, provides declaration) pair;
//! - the platform is one variable shared by all nodes;
//! - a node that has installed or external candidates, or that may not be
//!   built, gets an origin variable: build from source, or one candidate.
//!   An external node has no dependencies; a reused installed node pins its
//!   attributes and the origin of each of its dependencies.
//!
//! A literal restricts one variable to a set of values. Every rule carries the
//! [`ConstraintKind`] and the human readable description that unsatisfiable
//! cores are reported with.

use crate::domain::Domain;
use crate::preferences::PreferenceSet;
use spackle_core::{
    AbstractSpec, CompilerSpec, ConcreteSpec, ConflictDecl, ConflictTarget, Constraint,
    ConstraintKind, ContentHash, DependencyDecl, DependencyEdge, Error, PackageDef,
    PackageRepository, Result, VariantDef, VariantKind, VariantValue, Version, VersionDecl,
    VersionRange,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Index of a node in [`FactSet::nodes`].
pub type NodeId = usize;
/// Index of a variable in [`FactSet::vars`].
pub type VarId = usize;
/// Index of a rule in [`FactSet::rules`].
pub type RuleId = usize;
/// Index of a provider choice in [`FactSet::choices`].
pub type ChoiceId = usize;
/// Index of an edge in [`FactSet::edges`].
pub type EdgeId = usize;

/// Value of a presence or boolean variable meaning "false".
pub const FALSE: usize = 0;
/// Value of a presence or boolean variable meaning "true".
pub const TRUE: usize = 1;
/// Value of a provider variable meaning "no provider".
pub const NO_PROVIDER: usize = 0;
/// Value of an origin variable meaning "build from source".
pub const BUILD: usize = 0;

/// What a variable stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VarKind {
    /// The shared platform; values index [`FactSet::platforms`].
    Platform,
    /// Whether the node is in the solution.
    Presence(NodeId),
    /// Index into the node's [`versions`](NodeFacts::versions).
    Version(NodeId),
    /// A boolean or single-valued variant.
    Variant {
        /// Owning node.
        node: NodeId,
        /// Index into the node's variant slots.
        slot: usize,
    },
    /// Membership of one value of a multi-valued variant.
    Member {
        /// Owning node.
        node: NodeId,
        /// Index into the node's variant slots.
        slot: usize,
        /// Index into the variant's legal values.
        value: usize,
    },
    /// Index into [`FactSet::compilers`].
    Compiler(NodeId),
    /// Chosen option of a provider choice, or [`NO_PROVIDER`].
    Provider(ChoiceId),
    /// Whether a dependency edge is active.
    EdgeActive(EdgeId),
    /// Index into the node's [`origins`](NodeFacts::origins).
    Origin(NodeId),
}

/// A variable and its domain size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    /// What the variable encodes.
    pub kind: VarKind,
    /// Number of values.
    pub size: usize,
    /// Node whose presence gates decisions on this variable.
    pub owner: Option<NodeId>,
}

/// `var ∈ values`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lit {
    /// Constrained variable.
    pub var: VarId,
    /// Admitted values.
    pub values: Domain,
}

impl Lit {
    /// A literal no assignment satisfies.
    #[must_use]
    pub fn is_never(&self) -> bool {
        self.values.is_empty()
    }
}

/// Right-hand side of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consequence {
    /// Every literal must hold.
    All(Vec<Lit>),
    /// At least one literal must hold.
    Any(Vec<Lit>),
    /// The left-hand side must not hold.
    Forbidden,
}

/// `when ⇒ then`, where `when` is a conjunction. An empty `when` always fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Category used in unsatisfiable cores.
    pub kind: ConstraintKind,
    /// Human readable statement of the constraint.
    pub description: String,
    /// Conjunction of conditions.
    pub when: Vec<Lit>,
    /// What must follow.
    pub then: Consequence,
    /// Bookkeeping rule that is never reported and never relaxed.
    pub structural: bool,
}

impl Rule {
    /// Every literal mentioned by the rule.
    pub fn lits(&self) -> impl Iterator<Item = &Lit> {
        let then: &[Lit] = match &self.then {
            Consequence::All(lits) | Consequence::Any(lits) => lits,
            Consequence::Forbidden => &[],
        };
        self.when.iter().chain(then)
    }
}

/// A variant of a node and the variables encoding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantSlot {
    /// The declaration.
    pub def: VariantDef,
    /// Variable of a boolean or single-valued variant.
    pub var: Option<VarId>,
    /// Membership variables of a multi-valued variant, aligned with
    /// [`VariantDef::values`].
    pub members: Vec<VarId>,
}

impl VariantSlot {
    /// Domain index of a boolean or single value.
    #[must_use]
    pub fn value_index(&self, value: &VariantValue) -> Option<usize> {
        match (&self.def.kind, value) {
            (VariantKind::Bool, VariantValue::Bool(b)) => Some(usize::from(*b)),
            (VariantKind::Single { values }, VariantValue::Single(s)) => {
                values.iter().position(|v| v == s)
            }
            _ => None,
        }
    }

    /// Decode a domain index of a boolean or single-valued variant.
    #[must_use]
    pub fn value_at(&self, index: usize) -> Option<VariantValue> {
        match &self.def.kind {
            VariantKind::Bool => Some(VariantValue::Bool(index == TRUE)),
            VariantKind::Single { values } => values.get(index).cloned().map(VariantValue::Single),
            VariantKind::Multi { .. } => None,
        }
    }
}

/// Where a present node comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Built from the repository.
    Build,
    /// An installed spec, reused together with its dependencies.
    Installed(Arc<ConcreteSpec>),
    /// A configured external installation.
    External {
        /// Installation prefix.
        prefix: String,
        /// What the installation provides.
        spec: Constraint,
    },
}

impl Origin {
    /// The version a candidate pins.
    #[must_use]
    pub fn version(&self) -> Option<&Version> {
        match self {
            Self::Build => None,
            Self::Installed(spec) => Some(spec.version()),
            Self::External { spec, .. } => spec.versions.as_ref().and_then(VersionRange::as_exact),
        }
    }
}

/// One candidate package.
#[derive(Debug, Clone)]
pub struct NodeFacts {
    /// Package name.
    pub name: String,
    /// Its definition.
    pub package: Arc<PackageDef>,
    /// Declared versions, newest first; the version variable indexes this.
    pub versions: Vec<VersionDecl>,
    /// Variants by name.
    pub variants: Vec<VariantSlot>,
    /// Presence variable.
    pub presence: VarId,
    /// Version variable.
    pub version: VarId,
    /// Compiler variable.
    pub compiler: VarId,
    /// Outgoing dependency edges.
    pub edges: Vec<EdgeId>,
    /// Provider choices owned by this node.
    pub choices: Vec<ChoiceId>,
    /// Origin variable, for nodes with reuse candidates or that may not be
    /// built.
    pub origin: Option<VarId>,
    /// Values of the origin variable; [`BUILD`] first.
    pub origins: Vec<Origin>,
}

impl NodeFacts {
    /// The slot for variant `name`.
    #[must_use]
    pub fn variant_slot(&self, name: &str) -> Option<&VariantSlot> {
        self.variants.iter().find(|slot| slot.def.name == name)
    }
}

/// One way of satisfying a virtual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderOption {
    /// Providing node.
    pub provider: NodeId,
    /// Index into the provider's `provides` declarations.
    pub decl: usize,
    /// Virtual versions the declaration provides.
    pub versions: VersionRange,
}

/// The provider picked for a virtual on behalf of a node or a root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderChoice {
    /// Virtual name.
    pub virtual_name: String,
    /// Depending node; `None` for a requested virtual.
    pub owner: Option<NodeId>,
    /// Provider variable: [`NO_PROVIDER`] or `1 + index` into `options`.
    pub var: VarId,
    /// Candidates, by provider name then declaration order.
    pub options: Vec<ProviderOption>,
}

impl ProviderChoice {
    /// The option a provider variable value stands for.
    #[must_use]
    pub fn option(&self, value: usize) -> Option<&ProviderOption> {
        value.checked_sub(1).and_then(|i| self.options.get(i))
    }
}

/// Dependency edge target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeTarget {
    /// A concrete package.
    Node(NodeId),
    /// Whichever provider the choice selects.
    Virtual(ChoiceId),
}

/// One dependency declaration of a candidate node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeFact {
    /// Declaring node.
    pub parent: NodeId,
    /// Target.
    pub target: EdgeTarget,
    /// Declared edge types.
    pub types: spackle_core::DepTypes,
    /// Activity variable.
    pub active: VarId,
}

/// What a requested root resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootTarget {
    /// A package.
    Node(NodeId),
    /// A virtual, resolved through a root-level provider choice.
    Virtual(ChoiceId),
}

/// A requested root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootFact {
    /// The request as given.
    pub spec: AbstractSpec,
    /// What it resolves to.
    pub target: RootTarget,
}

/// Everything the solver needs for one concretization.
#[derive(Debug, Clone)]
pub struct FactSet {
    nodes: Vec<NodeFacts>,
    node_index: BTreeMap<String, NodeId>,
    vars: Vec<Variable>,
    rules: Vec<Rule>,
    edges: Vec<EdgeFact>,
    choices: Vec<ProviderChoice>,
    choices_by_virtual: BTreeMap<String, Vec<ChoiceId>>,
    roots: Vec<RootFact>,
    platforms: Vec<String>,
    compilers: Vec<CompilerSpec>,
    platform_var: VarId,
    decision_order: Vec<VarId>,
}

impl FactSet {
    /// Candidate nodes in discovery order.
    #[must_use]
    pub fn nodes(&self) -> &[NodeFacts] {
        &self.nodes
    }

    /// One node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &NodeFacts {
        &self.nodes[id]
    }

    /// The node for package `name`.
    #[must_use]
    pub fn node_named(&self, name: &str) -> Option<NodeId> {
        self.node_index.get(name).copied()
    }

    /// All variables.
    #[must_use]
    pub fn vars(&self) -> &[Variable] {
        &self.vars
    }

    /// One variable.
    #[must_use]
    pub fn var(&self, id: VarId) -> &Variable {
        &self.vars[id]
    }

    /// All rules.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// One rule.
    #[must_use]
    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id]
    }

    /// All dependency edges.
    #[must_use]
    pub fn edges(&self) -> &[EdgeFact] {
        &self.edges
    }

    /// All provider choices.
    #[must_use]
    pub fn choices(&self) -> &[ProviderChoice] {
        &self.choices
    }

    /// One provider choice.
    #[must_use]
    pub fn choice(&self, id: ChoiceId) -> &ProviderChoice {
        &self.choices[id]
    }

    /// Provider choices for `virtual_name`.
    #[must_use]
    pub fn choices_of(&self, virtual_name: &str) -> &[ChoiceId] {
        self.choices_by_virtual
            .get(virtual_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Requested roots, in request order.
    #[must_use]
    pub fn roots(&self) -> &[RootFact] {
        &self.roots
    }

    /// Platform domain.
    #[must_use]
    pub fn platforms(&self) -> &[String] {
        &self.platforms
    }

    /// Compiler domain.
    #[must_use]
    pub fn compilers(&self) -> &[CompilerSpec] {
        &self.compilers
    }

    /// The shared platform variable.
    #[must_use]
    pub const fn platform_var(&self) -> VarId {
        self.platform_var
    }

    /// Variables the solver decides, in decision order.
    #[must_use]
    pub fn decision_order(&self) -> &[VarId] {
        &self.decision_order
    }

    /// `var ∈ values`.
    #[must_use]
    pub fn lit(&self, var: VarId, values: impl IntoIterator<Item = usize>) -> Lit {
        Lit {
            var,
            values: Domain::from_values(self.vars[var].size, values),
        }
    }

    /// A literal that never holds.
    #[must_use]
    pub fn never(&self, var: VarId) -> Lit {
        Lit {
            var,
            values: Domain::empty(self.vars[var].size),
        }
    }

    /// Readable name of a variable, for tracing.
    #[must_use]
    pub fn describe_var(&self, var: VarId) -> String {
        match self.vars[var].kind {
            VarKind::Platform => "platform".to_string(),
            VarKind::Presence(node) => format!("present({})", self.nodes[node].name),
            VarKind::Version(node) => format!("version({})", self.nodes[node].name),
            VarKind::Variant { node, slot } | VarKind::Member { node, slot, .. } => format!(
                "variant({}, {})",
                self.nodes[node].name, self.nodes[node].variants[slot].def.name
            ),
            VarKind::Compiler(node) => format!("compiler({})", self.nodes[node].name),
            VarKind::Provider(choice) => {
                let choice = &self.choices[choice];
                let owner = choice
                    .owner
                    .map_or("request", |node| self.nodes[node].name.as_str());
                format!("provider({owner}, {})", choice.virtual_name)
            }
            VarKind::EdgeActive(edge) => {
                let edge = &self.edges[edge];
                format!("edge({})", self.nodes[edge.parent].name)
            }
            VarKind::Origin(node) => format!("origin({})", self.nodes[node].name),
        }
    }
}

/// Build the fact base for `roots`.
///
/// # Errors
/// - [`Error::UnknownPackage`] when a request or a reachable dependency names
///   neither a package nor a virtual.
/// - [`Error::NoVersionSatisfiesRange`] when a requested range matches no
///   declared version (or, for a virtual, no provided version).
pub fn build_facts(
    roots: &[AbstractSpec],
    repo: &PackageRepository,
    prefs: &PreferenceSet,
) -> Result<FactSet> {
    let mut builder = FactBuilder::new(repo, prefs);
    builder.discover(roots)?;
    builder.collect_origins();
    builder.lower_edges();
    builder.lower_origins();
    builder.lower_roots();
    builder.lower_conflicts();
    builder.lower_multi_variants();
    builder.lower_providers();
    builder.order_decisions();

    let facts = builder.facts;
    debug!(
        roots = roots.len(),
        nodes = facts.nodes.len(),
        vars = facts.vars.len(),
        rules = facts.rules.len(),
        "fact base built"
    );
    Ok(facts)
}

fn describe(name: &str, constraint: &Constraint) -> String {
    AbstractSpec {
        name: name.to_string(),
        constraint: constraint.clone(),
        dependencies: Vec::new(),
    }
    .to_string()
}

fn describe_conflict(package: &str, decl: &ConflictDecl) -> String {
    let mut out = format!("{} conflicts with {}", describe(package, &decl.when), decl.conflict);
    if let Some(reason) = &decl.reason {
        out.push_str(&format!(" ({reason})"));
    }
    out
}

struct FactBuilder<'a> {
    repo: &'a PackageRepository,
    prefs: &'a PreferenceSet,
    facts: FactSet,
    queue: VecDeque<NodeId>,
}

impl<'a> FactBuilder<'a> {
    fn new(repo: &'a PackageRepository, prefs: &'a PreferenceSet) -> Self {
        let mut facts = FactSet {
            nodes: Vec::new(),
            node_index: BTreeMap::new(),
            vars: Vec::new(),
            rules: Vec::new(),
            edges: Vec::new(),
            choices: Vec::new(),
            choices_by_virtual: BTreeMap::new(),
            roots: Vec::new(),
            platforms: prefs.platforms().to_vec(),
            compilers: prefs.compilers().to_vec(),
            platform_var: 0,
            decision_order: Vec::new(),
        };
        facts.vars.push(Variable {
            kind: VarKind::Platform,
            size: facts.platforms.len(),
            owner: None,
        });
        Self {
            repo,
            prefs,
            facts,
            queue: VecDeque::new(),
        }
    }

    fn var(&mut self, kind: VarKind, size: usize, owner: Option<NodeId>) -> VarId {
        self.facts.vars.push(Variable { kind, size, owner });
        self.facts.vars.len() - 1
    }

    fn rule(
        &mut self,
        kind: ConstraintKind,
        description: impl Into<String>,
        when: Vec<Lit>,
        then: Consequence,
        structural: bool,
    ) {
        if when.iter().any(Lit::is_never) {
            return;
        }
        self.facts.rules.push(Rule {
            kind,
            description: description.into(),
            when,
            then,
            structural,
        });
    }

    fn present(&self, node: NodeId) -> Lit {
        self.facts.lit(self.facts.nodes[node].presence, [TRUE])
    }

    fn is_included(&self, decl: &DependencyDecl) -> bool {
        !decl.types.is_test_only() || self.prefs.include_test_deps()
    }

    // Discovery

    fn discover(&mut self, roots: &[AbstractSpec]) -> Result<()> {
        for root in roots {
            self.require(&root.name, "request")?;
            self.check_range(&root.name, &root.constraint)?;
            for dep in root.flattened_dependencies() {
                self.require(&dep.spec.name, &root.name)?;
                self.check_range(&dep.spec.name, &dep.spec.constraint)?;
            }
        }

        while let Some(id) = self.queue.pop_front() {
            let package = Arc::clone(&self.facts.nodes[id].package);
            for decl in &package.dependencies {
                if self.is_included(decl) {
                    self.require(&decl.target, &package.name)?;
                }
            }
        }

        for root in roots {
            let target = match self.facts.node_named(&root.name) {
                Some(id) => RootTarget::Node(id),
                None => RootTarget::Virtual(self.choice(&root.name, None)),
            };
            self.facts.roots.push(RootFact {
                spec: root.clone(),
                target,
            });
        }
        Ok(())
    }

    fn require(&mut self, name: &str, required_by: &str) -> Result<()> {
        let repo = self.repo;
        if let Some(package) = repo.get(name) {
            self.node(package);
        } else if repo.is_virtual(name) {
            for package in repo.providers_of(name).iter().filter_map(|p| repo.get(p)) {
                self.node(package);
            }
        } else {
            return Err(Error::UnknownPackage {
                name: name.to_string(),
                required_by: required_by.to_string(),
            });
        }
        Ok(())
    }

    fn check_range(&self, name: &str, constraint: &Constraint) -> Result<()> {
        let Some(range) = &constraint.versions else {
            return Ok(());
        };
        let satisfiable = match self.repo.get(name) {
            Some(package) => package.versions.iter().any(|d| range.contains(&d.version)),
            None => self.repo.providers_of(name).iter().any(|provider| {
                self.repo.get(provider).is_some_and(|package| {
                    package
                        .provides_for(name)
                        .any(|decl| decl.versions.intersects(range))
                })
            }),
        };
        if satisfiable {
            Ok(())
        } else {
            Err(Error::NoVersionSatisfiesRange {
                name: name.to_string(),
                range: range.to_string(),
            })
        }
    }

    /// The node for `package`, created on first use.
    fn node(&mut self, package: &Arc<PackageDef>) -> NodeId {
        if let Some(id) = self.facts.node_named(&package.name) {
            return id;
        }
        let package = Arc::clone(package);
        let id = self.facts.nodes.len();

        let presence = self.var(VarKind::Presence(id), 2, None);
        let mut versions = package.versions.clone();
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        let version = self.var(VarKind::Version(id), versions.len(), Some(id));

        let mut variants = Vec::with_capacity(package.variants.len());
        for (slot, def) in package.variants.values().enumerate() {
            let (var, members) = if def.is_multi() {
                let members = (0..def.values().len())
                    .map(|value| self.var(VarKind::Member { node: id, slot, value }, 2, Some(id)))
                    .collect();
                (None, members)
            } else {
                let size = match &def.kind {
                    VariantKind::Single { values } => values.len(),
                    _ => 2,
                };
                (
                    Some(self.var(VarKind::Variant { node: id, slot }, size, Some(id))),
                    Vec::new(),
                )
            };
            variants.push(VariantSlot {
                def: def.clone(),
                var,
                members,
            });
        }

        let compiler = self.var(VarKind::Compiler(id), self.facts.compilers.len(), Some(id));
        self.facts.nodes.push(NodeFacts {
            name: package.name.clone(),
            package,
            versions,
            variants,
            presence,
            version,
            compiler,
            edges: Vec::new(),
            choices: Vec::new(),
            origin: None,
            origins: vec![Origin::Build],
        });
        self.facts
            .node_index
            .insert(self.facts.nodes[id].name.clone(), id);
        self.queue.push_back(id);
        id
    }

    /// The provider choice of `owner` for `virtual_name`, created on first use.
    fn choice(&mut self, virtual_name: &str, owner: Option<NodeId>) -> ChoiceId {
        if let Some(owner) = owner {
            let existing = self.facts.nodes[owner]
                .choices
                .iter()
                .copied()
                .find(|&c| self.facts.choices[c].virtual_name == virtual_name);
            if let Some(existing) = existing {
                return existing;
            }
        }

        let mut options = Vec::new();
        for provider in self.repo.providers_of(virtual_name) {
            let Some(node) = self.facts.node_named(provider) else {
                continue;
            };
            for (decl, provides) in self.facts.nodes[node].package.provides.iter().enumerate() {
                if provides.virtual_name == virtual_name {
                    options.push(ProviderOption {
                        provider: node,
                        decl,
                        versions: provides.versions.clone(),
                    });
                }
            }
        }

        let id = self.facts.choices.len();
        let var = self.var(VarKind::Provider(id), options.len() + 1, owner);
        self.facts.choices.push(ProviderChoice {
            virtual_name: virtual_name.to_string(),
            owner,
            var,
            options,
        });
        if let Some(owner) = owner {
            self.facts.nodes[owner].choices.push(id);
        }
        self.facts
            .choices_by_virtual
            .entry(virtual_name.to_string())
            .or_default()
            .push(id);
        id
    }

    // Lowering

    /// Literals requiring `node` to meet `constraint`; presence not included.
    fn lower(&self, node: NodeId, constraint: &Constraint) -> Vec<Lit> {
        let facts = &self.facts;
        let n = &facts.nodes[node];
        let mut lits = Vec::new();

        if let Some(range) = &constraint.versions {
            lits.push(
                facts.lit(
                    n.version,
                    n.versions
                        .iter()
                        .enumerate()
                        .filter(|(_, decl)| range.contains(&decl.version))
                        .map(|(i, _)| i),
                ),
            );
        }

        for (name, required) in &constraint.variants {
            let Some(slot) = n.variant_slot(name) else {
                lits.push(facts.never(n.presence));
                continue;
            };
            match (slot.def.normalize(required), slot.var) {
                (Some(VariantValue::Multi(values)), _) => {
                    for value in values {
                        let Some(index) = slot.def.values().iter().position(|v| *v == value)
                        else {
                            lits.push(facts.never(n.presence));
                            continue;
                        };
                        lits.push(facts.lit(slot.members[index], [TRUE]));
                    }
                }
                (Some(value), Some(var)) => match slot.value_index(&value) {
                    Some(index) => lits.push(facts.lit(var, [index])),
                    None => lits.push(facts.never(var)),
                },
                _ => lits.push(facts.never(n.presence)),
            }
        }

        if let Some(compiler) = &constraint.compiler {
            lits.push(
                facts.lit(
                    n.compiler,
                    facts
                        .compilers
                        .iter()
                        .enumerate()
                        .filter(|(_, c)| compiler.matches(c))
                        .map(|(i, _)| i),
                ),
            );
        }

        if let Some(platform) = &constraint.platform {
            lits.push(
                facts.lit(
                    facts.platform_var,
                    facts
                        .platforms
                        .iter()
                        .enumerate()
                        .filter(|(_, p)| *p == platform)
                        .map(|(i, _)| i),
                ),
            );
        }
        lits
    }

    /// Provider values of `choice` whose provided versions meet `range`.
    fn eligible(&self, choice: ChoiceId, range: Option<&VersionRange>) -> Lit {
        let choice = &self.facts.choices[choice];
        self.facts.lit(
            choice.var,
            choice
                .options
                .iter()
                .enumerate()
                .filter(|(_, opt)| range.is_none_or(|r| r.intersects(&opt.versions)))
                .map(|(i, _)| i + 1),
        )
    }

    fn any_provider(&self, choice: ChoiceId) -> Lit {
        let choice = &self.facts.choices[choice];
        self.facts.lit(choice.var, 1..=choice.options.len())
    }

    /// Apply the non-version parts of `constraint` to whichever provider
    /// `choice` selects, under `guard`.
    fn bind_provider_constraint(
        &mut self,
        choice: ChoiceId,
        constraint: &Constraint,
        guard: &[Lit],
        kind: ConstraintKind,
        description: &str,
    ) {
        let rest = Constraint {
            versions: None,
            ..constraint.clone()
        };
        if rest.is_empty() {
            return;
        }
        let var = self.facts.choices[choice].var;
        for (i, option) in self.facts.choices[choice].options.clone().iter().enumerate() {
            let mut when = guard.to_vec();
            when.push(self.facts.lit(var, [i + 1]));
            let then = self.lower(option.provider, &rest);
            self.rule(kind, description, when, Consequence::All(then), false);
        }
    }

    // Reuse

    /// Give an origin variable to every node with installed or external
    /// candidates, and to every node that may not be built.
    fn collect_origins(&mut self) {
        let prefs = self.prefs;
        let mut admissible = BTreeMap::new();
        for id in 0..self.facts.nodes.len() {
            let name = self.facts.nodes[id].name.clone();
            let mut origins = vec![Origin::Build];
            for spec in prefs.installed_for(&name) {
                if self.admissible(spec, &mut admissible) {
                    origins.push(Origin::Installed(Arc::clone(spec)));
                } else {
                    debug!(
                        package = %name,
                        hash = %spec.hash().short(),
                        "installed spec does not fit the repository, not reusing it"
                    );
                }
            }
            for external in prefs.externals_for(&name) {
                let declared = external
                    .spec
                    .versions
                    .as_ref()
                    .and_then(VersionRange::as_exact)
                    .is_some_and(|v| self.facts.nodes[id].versions.iter().any(|d| d.version == *v));
                if declared {
                    origins.push(Origin::External {
                        prefix: external.prefix.clone(),
                        spec: external.spec.clone(),
                    });
                } else {
                    warn!(
                        package = %name,
                        prefix = %external.prefix,
                        spec = %external.spec,
                        "external version is not declared by the package, ignoring it"
                    );
                }
            }
            if origins.len() == 1 && prefs.is_buildable(&name) {
                continue;
            }
            let var = self.var(VarKind::Origin(id), origins.len(), Some(id));
            let node = &mut self.facts.nodes[id];
            node.origin = Some(var);
            node.origins = origins;
        }
    }

    /// Whether `spec` and everything below it can be expressed over the
    /// current nodes: declared versions and variants, a known compiler and
    /// platform, and only declared dependencies.
    fn admissible(&self, spec: &ConcreteSpec, memo: &mut BTreeMap<ContentHash, bool>) -> bool {
        if let Some(&known) = memo.get(&spec.hash()) {
            return known;
        }
        let facts = &self.facts;
        let fits = !spec.is_external()
            && facts.node_named(spec.name()).is_some_and(|id| {
                let node = &facts.nodes[id];
                node.versions.iter().any(|d| d.version == *spec.version())
                    && spec.variants().len() == node.variants.len()
                    && node.variants.iter().all(|slot| {
                        spec.variant(&slot.def.name)
                            .is_some_and(|value| slot.def.is_legal(value))
                    })
                    && facts.compilers.contains(spec.compiler())
                    && facts.platforms.iter().any(|p| p == spec.platform())
                    && spec
                        .dependencies()
                        .iter()
                        .all(|edge| self.declares(&node.package, edge))
            })
            && spec
                .dependencies()
                .iter()
                .all(|edge| self.admissible(&edge.spec, memo));
        memo.insert(spec.hash(), fits);
        fits
    }

    /// Whether `package` declares a dependency `edge` can stand for.
    fn declares(&self, package: &PackageDef, edge: &DependencyEdge) -> bool {
        let child = edge.spec.name();
        package
            .dependencies
            .iter()
            .filter(|decl| self.is_included(decl))
            .any(|decl| {
                decl.target == child
                    || (edge.virtuals.contains(&decl.target)
                        && self
                            .repo
                            .get(child)
                            .is_some_and(|p| p.provides_for(&decl.target).next().is_some()))
            })
    }

    /// `origin` values other than externals, if the node has any external.
    fn not_external(&self, node: NodeId) -> Option<Lit> {
        let n = &self.facts.nodes[node];
        let var = n.origin?;
        if !n.origins.iter().any(|o| matches!(o, Origin::External { .. })) {
            return None;
        }
        Some(self.facts.lit(
            var,
            n.origins
                .iter()
                .enumerate()
                .filter(|(_, o)| !matches!(o, Origin::External { .. }))
                .map(|(i, _)| i),
        ))
    }

    fn lower_origins(&mut self) {
        for id in 0..self.facts.nodes.len() {
            let Some(var) = self.facts.nodes[id].origin else {
                continue;
            };
            let name = self.facts.nodes[id].name.clone();
            for (value, origin) in self.facts.nodes[id].origins.clone().into_iter().enumerate() {
                let chosen = self.facts.lit(var, [value]);
                match origin {
                    Origin::Build => {
                        if !self.prefs.is_buildable(&name) {
                            let when = vec![self.present(id), chosen];
                            self.rule(
                                ConstraintKind::Buildable,
                                format!("{name} is not buildable"),
                                when,
                                Consequence::Forbidden,
                                false,
                            );
                        }
                    }
                    Origin::Installed(spec) => self.lower_reuse(id, chosen, &spec),
                    Origin::External { prefix, spec } => {
                        let mut then = vec![self.present(id)];
                        then.extend(self.lower(id, &spec));
                        self.rule(
                            ConstraintKind::Buildable,
                            format!("{} is external at {prefix}", describe(&name, &spec)),
                            vec![chosen],
                            Consequence::All(then),
                            true,
                        );
                    }
                }
            }
        }
    }

    /// Reusing `spec` for `node` pins the node's attributes, keeps only the
    /// edges `spec` has, and reuses each dependency of `spec` in turn.
    fn lower_reuse(&mut self, node: NodeId, chosen: Lit, spec: &ConcreteSpec) {
        let facts = &self.facts;
        let n = &facts.nodes[node];
        let mut then = vec![self.present(node)];
        then.push(facts.lit(
            n.version,
            n.versions.iter().position(|d| d.version == *spec.version()),
        ));
        for slot in &n.variants {
            let value = spec.variant(&slot.def.name);
            if let Some(var) = slot.var {
                then.push(facts.lit(var, value.and_then(|v| slot.value_index(v))));
            }
            for (&member, legal) in slot.members.iter().zip(slot.def.values()) {
                let set = matches!(value, Some(VariantValue::Multi(set)) if set.contains(legal));
                then.push(facts.lit(member, [usize::from(set)]));
            }
        }
        then.push(facts.lit(
            n.compiler,
            facts.compilers.iter().position(|c| c == spec.compiler()),
        ));
        then.push(facts.lit(
            facts.platform_var,
            facts.platforms.iter().position(|p| p == spec.platform()),
        ));

        // Active edges leading to each dependency of `spec`.
        let mut live: BTreeMap<NodeId, Vec<Lit>> = BTreeMap::new();
        for &edge_id in &n.edges {
            let edge = &facts.edges[edge_id];
            let target = match edge.target {
                EdgeTarget::Node(child) => spec
                    .dependency(&facts.nodes[child].name)
                    .map(|_| (child, None)),
                EdgeTarget::Virtual(choice) => {
                    let virtual_name = &facts.choices[choice].virtual_name;
                    spec.dependencies()
                        .iter()
                        .find(|dep| dep.virtuals.contains(virtual_name))
                        .and_then(|dep| facts.node_named(dep.spec.name()))
                        .map(|child| (child, Some(choice)))
                }
            };
            let Some((child, choice)) = target else {
                then.push(facts.lit(edge.active, [FALSE]));
                continue;
            };
            live.entry(child)
                .or_default()
                .push(facts.lit(edge.active, [TRUE]));
            if let Some(choice) = choice {
                let choice = &facts.choices[choice];
                then.push(facts.lit(
                    choice.var,
                    choice
                        .options
                        .iter()
                        .enumerate()
                        .filter(|(_, opt)| opt.provider == child)
                        .map(|(i, _)| i + 1),
                ));
            }
        }

        let mut reached = Vec::new();
        for dep in spec.dependencies() {
            let Some(child) = facts.node_named(dep.spec.name()) else {
                then.push(facts.never(n.presence));
                continue;
            };
            let c = &facts.nodes[child];
            let index = c.origins.iter().position(
                |o| matches!(o, Origin::Installed(installed) if installed.hash() == dep.spec.hash()),
            );
            match (c.origin, index) {
                (Some(var), Some(index)) => {
                    then.push(self.present(child));
                    then.push(facts.lit(var, [index]));
                }
                _ => then.push(facts.never(c.presence)),
            }
            reached.push(live.remove(&child).unwrap_or_default());
        }

        let description = format!("{} may reuse {}", n.name, spec.hash().short());
        self.rule(
            ConstraintKind::Dependency,
            description.clone(),
            vec![chosen.clone()],
            Consequence::All(then),
            true,
        );
        for edges in reached {
            self.rule(
                ConstraintKind::Dependency,
                description.clone(),
                vec![chosen.clone()],
                Consequence::Any(edges),
                true,
            );
        }
    }

    fn lower_edges(&mut self) {
        for id in 0..self.facts.nodes.len() {
            let package = Arc::clone(&self.facts.nodes[id].package);
            let mut per_choice: BTreeMap<ChoiceId, Vec<VarId>> = BTreeMap::new();

            let decls: Vec<&DependencyDecl> = package
                .dependencies
                .iter()
                .filter(|d| self.is_included(d))
                .collect();
            for decl in decls {
                let edge_id = self.facts.edges.len();
                let active = self.var(VarKind::EdgeActive(edge_id), 2, None);
                let active_lit = self.facts.lit(active, [TRUE]);
                let mut condition = vec![self.present(id)];
                condition.extend(self.not_external(id));
                condition.extend(self.lower(id, &decl.when));
                let description = format!(
                    "{} depends on {}",
                    describe(&package.name, &decl.when),
                    describe(&decl.target, &decl.constraint)
                );

                let (target, consequence) = match self.facts.node_named(&decl.target) {
                    Some(child) => {
                        let mut then = vec![self.present(child)];
                        then.extend(self.lower(child, &decl.constraint));
                        (EdgeTarget::Node(child), then)
                    }
                    None => {
                        let choice = self.choice(&decl.target, Some(id));
                        per_choice.entry(choice).or_default().push(active);
                        (
                            EdgeTarget::Virtual(choice),
                            vec![self.eligible(choice, decl.constraint.versions.as_ref())],
                        )
                    }
                };

                let mut then = vec![active_lit.clone()];
                then.extend(consequence);
                self.rule(
                    ConstraintKind::Dependency,
                    description.clone(),
                    condition.clone(),
                    Consequence::All(then),
                    false,
                );
                self.rule(
                    ConstraintKind::Dependency,
                    description.clone(),
                    vec![active_lit.clone()],
                    Consequence::All(condition),
                    true,
                );
                if let EdgeTarget::Virtual(choice) = target {
                    self.bind_provider_constraint(
                        choice,
                        &decl.constraint,
                        &[active_lit],
                        ConstraintKind::Dependency,
                        &description,
                    );
                }

                self.facts.edges.push(EdgeFact {
                    parent: id,
                    target,
                    types: decl.types,
                    active,
                });
                self.facts.nodes[id].edges.push(edge_id);
            }

            // A provider is only picked while some edge needs it.
            for (choice, actives) in per_choice {
                let when = vec![self.any_provider(choice)];
                let then = actives
                    .into_iter()
                    .map(|active| self.facts.lit(active, [TRUE]))
                    .collect();
                let description = format!(
                    "{} needs a {} provider only while depending on it",
                    package.name, self.facts.choices[choice].virtual_name
                );
                self.rule(
                    ConstraintKind::VirtualDependency,
                    description,
                    when,
                    Consequence::Any(then),
                    true,
                );
            }
        }
    }

    fn lower_roots(&mut self) {
        let roots = self.facts.roots.clone();
        let root_nodes: Vec<NodeId> = roots
            .iter()
            .filter_map(|root| match root.target {
                RootTarget::Node(id) => Some(id),
                RootTarget::Virtual(_) => None,
            })
            .collect();

        for root in &roots {
            let spec = &root.spec;
            let description = format!("request {}", describe(&spec.name, &spec.constraint));
            match root.target {
                RootTarget::Node(id) => {
                    let mut then = vec![self.present(id)];
                    then.extend(self.lower(id, &spec.constraint));
                    self.rule(
                        ConstraintKind::Request,
                        description,
                        Vec::new(),
                        Consequence::All(then),
                        false,
                    );
                }
                RootTarget::Virtual(choice) => {
                    let then = vec![self.eligible(choice, spec.constraint.versions.as_ref())];
                    self.rule(
                        ConstraintKind::Request,
                        description.clone(),
                        Vec::new(),
                        Consequence::All(then),
                        false,
                    );
                    self.bind_provider_constraint(
                        choice,
                        &spec.constraint,
                        &[],
                        ConstraintKind::Request,
                        &description,
                    );
                }
            }

            for dep in spec.flattened_dependencies() {
                let name = &dep.spec.name;
                let constraint = &dep.spec.constraint;
                let description = format!("{} requires ^{}", spec.name, describe(name, constraint));
                if let Some(id) = self.facts.node_named(name) {
                    let mut then = vec![self.present(id)];
                    then.extend(self.lower(id, constraint));
                    self.rule(
                        ConstraintKind::Request,
                        description,
                        Vec::new(),
                        Consequence::All(then),
                        false,
                    );
                    if !root_nodes.contains(&id) {
                        self.support(id);
                    }
                } else {
                    let choices = self.choices_of_virtual(name);
                    let any = choices.iter().map(|&c| self.any_provider(c)).collect();
                    self.rule(
                        ConstraintKind::Request,
                        description.clone(),
                        Vec::new(),
                        Consequence::Any(any),
                        false,
                    );
                    for choice in choices {
                        let when = vec![self.any_provider(choice)];
                        let then = vec![self.eligible(choice, constraint.versions.as_ref())];
                        self.rule(
                            ConstraintKind::Request,
                            description.clone(),
                            when,
                            Consequence::All(then),
                            false,
                        );
                        self.bind_provider_constraint(
                            choice,
                            constraint,
                            &[],
                            ConstraintKind::Request,
                            &description,
                        );
                    }
                }
            }
        }
    }

    fn choices_of_virtual(&self, name: &str) -> Vec<ChoiceId> {
        self.facts.choices_of(name).to_vec()
    }

    /// A present `node` must be reached by an active edge or a chosen provider.
    fn support(&mut self, node: NodeId) {
        let mut then: Vec<Lit> = self
            .facts
            .edges
            .iter()
            .filter(|edge| edge.target == EdgeTarget::Node(node))
            .map(|edge| self.facts.lit(edge.active, [TRUE]))
            .collect();
        for choice in &self.facts.choices {
            let values: Vec<usize> = choice
                .options
                .iter()
                .enumerate()
                .filter(|(_, opt)| opt.provider == node)
                .map(|(i, _)| i + 1)
                .collect();
            if !values.is_empty() {
                then.push(self.facts.lit(choice.var, values));
            }
        }
        let description = format!(
            "{} must be a dependency of the request",
            self.facts.nodes[node].name
        );
        let when = vec![self.present(node)];
        self.rule(
            ConstraintKind::Request,
            description,
            when,
            Consequence::Any(then),
            false,
        );
    }

    fn lower_conflicts(&mut self) {
        for id in 0..self.facts.nodes.len() {
            let package = Arc::clone(&self.facts.nodes[id].package);
            for decl in &package.conflicts {
                let description = describe_conflict(&package.name, decl);
                let mut trigger = vec![self.present(id)];
                trigger.extend(self.lower(id, &decl.when));

                match &decl.conflict {
                    ConflictTarget::OnSelf(constraint) => {
                        trigger.extend(self.lower(id, constraint));
                        self.rule(
                            ConstraintKind::Conflict,
                            description,
                            trigger,
                            Consequence::Forbidden,
                            false,
                        );
                    }
                    ConflictTarget::Package { name, constraint } => {
                        if let Some(other) = self.facts.node_named(name) {
                            trigger.push(self.present(other));
                            trigger.extend(self.lower(other, constraint));
                            self.rule(
                                ConstraintKind::Conflict,
                                description,
                                trigger,
                                Consequence::Forbidden,
                                false,
                            );
                        } else if self.repo.is_virtual(name) {
                            for choice in self.choices_of_virtual(name) {
                                let mut when = trigger.clone();
                                when.push(self.eligible(choice, constraint.versions.as_ref()));
                                self.rule(
                                    ConstraintKind::Conflict,
                                    description.clone(),
                                    when,
                                    Consequence::Forbidden,
                                    false,
                                );
                            }
                        } else if self.repo.get(name).is_none() {
                            debug!(
                                package = %package.name,
                                target = %name,
                                "ignoring conflict with unknown package"
                            );
                        }
                    }
                }
            }
        }
    }

    fn lower_multi_variants(&mut self) {
        for id in 0..self.facts.nodes.len() {
            for slot in self.facts.nodes[id].variants.clone() {
                if slot.members.is_empty() {
                    continue;
                }
                let mut when = vec![self.present(id)];
                when.extend(slot.members.iter().map(|&m| self.facts.lit(m, [FALSE])));
                let description = format!(
                    "{} needs at least one value for '{}'",
                    self.facts.nodes[id].name, slot.def.name
                );
                self.rule(
                    ConstraintKind::Variant,
                    description,
                    when,
                    Consequence::Forbidden,
                    false,
                );
            }
        }
    }

    fn lower_providers(&mut self) {
        for choice in self.facts.choices.clone() {
            for (i, option) in choice.options.iter().enumerate() {
                let package = Arc::clone(&self.facts.nodes[option.provider].package);
                let Some(decl) = package.provides.get(option.decl) else {
                    continue;
                };
                let mut provided = choice.virtual_name.clone();
                if !decl.versions.is_any() {
                    provided.push_str(&format!("@{}", decl.versions));
                }
                let description = format!(
                    "{} provides {provided}",
                    describe(&package.name, &decl.when)
                );
                let mut then = vec![self.present(option.provider)];
                then.extend(self.lower(option.provider, &decl.when));
                self.rule(
                    ConstraintKind::VirtualDependency,
                    description,
                    vec![self.facts.lit(choice.var, [i + 1])],
                    Consequence::All(then),
                    false,
                );
            }
        }
    }

    fn order_decisions(&mut self) {
        let facts = &mut self.facts;
        let mut order = vec![facts.platform_var];
        order.extend(
            facts
                .choices
                .iter()
                .filter(|choice| choice.owner.is_none())
                .map(|choice| choice.var),
        );
        for node in &facts.nodes {
            order.extend(node.origin);
            order.push(node.version);
            for slot in &node.variants {
                order.extend(slot.var);
                order.extend(slot.members.iter().copied());
            }
            order.push(node.compiler);
            let mut owned: Vec<&ProviderChoice> =
                node.choices.iter().map(|&c| &facts.choices[c]).collect();
            owned.sort_by(|a, b| a.virtual_name.cmp(&b.virtual_name));
            order.extend(owned.into_iter().map(|choice| choice.var));
        }
        facts.decision_order = order;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spackle_core::{DepTypes, PackageDef};

    fn repo() -> PackageRepository {
        PackageRepository::new([
            PackageDef::builder("app")
                .version("1.0")
                .version("2.0")
                .variant(VariantDef::boolean("mpi", true))
                .depends_on_when("mpi", "+mpi")
                .depends_on("zlib@1.2:")
                .depends_on_typed("check", DepTypes::TEST, "")
                .build()
                .unwrap(),
            PackageDef::builder("zlib")
                .version("1.2.13")
                .version("1.3")
                .build()
                .unwrap(),
            PackageDef::builder("check").version("0.15").build().unwrap(),
            PackageDef::builder("openmpi")
                .version("4.1.5")
                .provides("mpi@:3.1")
                .build()
                .unwrap(),
            PackageDef::builder("mpich")
                .version("4.1")
                .provides("mpi@:4.0")
                .build()
                .unwrap(),
        ])
        .unwrap()
    }

    fn facts_for(spec: &str) -> Result<FactSet> {
        build_facts(
            &[AbstractSpec::parse(spec).unwrap()],
            &repo(),
            &PreferenceSet::default(),
        )
    }

    #[test]
    fn discovers_reachable_packages() {
        let facts = facts_for("app").unwrap();
        let names: Vec<&str> = facts.nodes().iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["app", "mpich", "openmpi", "zlib"]);
        assert!(facts.node_named("check").is_none());

        let app = facts.node(0);
        assert_eq!(app.versions[0].version.as_str(), "2.0");
        assert_eq!(app.edges.len(), 2);
        assert_eq!(facts.choices_of("mpi").len(), 1);
        assert_eq!(facts.choice(app.choices[0]).options.len(), 2);
    }

    #[test]
    fn decision_order_starts_with_platform() {
        let facts = facts_for("app").unwrap();
        let order = facts.decision_order();
        assert_eq!(order[0], facts.platform_var());
        assert_eq!(order[1], facts.node(0).version);
        assert!(order.iter().all(|&v| !matches!(
            facts.var(v).kind,
            VarKind::Presence(_) | VarKind::EdgeActive(_)
        )));
    }

    #[test]
    fn unknown_names_are_reported() {
        let err = facts_for("nope").unwrap_err();
        assert!(matches!(err, Error::UnknownPackage { ref name, ref required_by }
            if name == "nope" && required_by == "request"));

        let err = facts_for("app ^nada").unwrap_err();
        assert!(matches!(err, Error::UnknownPackage { ref required_by, .. } if required_by == "app"));
    }

    #[test]
    fn empty_requested_range_is_reported() {
        let err = facts_for("app@9:").unwrap_err();
        assert_eq!(
            err,
            Error::NoVersionSatisfiesRange {
                name: "app".into(),
                range: "9:".into()
            }
        );
        assert!(facts_for("mpi@5:").is_err());
        assert!(facts_for("mpi@3:").is_ok());
    }

    #[test]
    fn test_dependencies_follow_preference() {
        let mut config = spackle_config::ConcretizerConfig::default();
        config.include_test_deps = true;
        let facts = build_facts(
            &[AbstractSpec::named("app")],
            &repo(),
            &PreferenceSet::from_config(&config),
        )
        .unwrap();
        assert!(facts.node_named("check").is_some());
    }

    #[test]
    fn unknown_variant_lowers_to_never() {
        let facts = facts_for("app +nonexistent").unwrap();
        let request = facts
            .rules()
            .iter()
            .find(|rule| rule.kind == ConstraintKind::Request)
            .unwrap();
        let Consequence::All(lits) = &request.then else {
            panic!("request should be a conjunction");
        };
        assert!(lits.iter().any(Lit::is_never));
    }

    #[test]
    fn requested_virtual_gets_root_choice() {
        let facts = facts_for("mpi@4:").unwrap();
        let RootTarget::Virtual(choice) = facts.roots()[0].target else {
            panic!("expected a virtual root");
        };
        assert_eq!(facts.choice(choice).owner, None);
        assert_eq!(facts.decision_order()[1], facts.choice(choice).var);
    }

    fn with_zlib_external(version: &str) -> FactSet {
        let mut config = spackle_config::ConcretizerConfig::default();
        config.packages.insert(
            "zlib".into(),
            spackle_config::PackagePreferences {
                externals: vec![spackle_config::ExternalPackage {
                    spec: format!("@={version}").parse().unwrap(),
                    prefix: "/usr".into(),
                }],
                ..spackle_config::PackagePreferences::default()
            },
        );
        build_facts(
            &[AbstractSpec::named("app")],
            &repo(),
            &PreferenceSet::from_config(&config),
        )
        .unwrap()
    }

    #[test]
    fn externals_get_an_origin_decided_before_the_version() {
        let facts = with_zlib_external("1.2.13");
        let zlib = facts.node(facts.node_named("zlib").unwrap());
        let origin = zlib.origin.expect("zlib has an external");
        assert_eq!(zlib.origins.len(), 2);
        assert!(matches!(zlib.origins[0], Origin::Build));
        assert!(matches!(&zlib.origins[1], Origin::External { prefix, .. } if prefix == "/usr"));

        let order = facts.decision_order();
        let at = |var| order.iter().position(|&v| v == var).unwrap();
        assert!(at(origin) < at(zlib.version));
        assert!(facts.node(0).origin.is_none());
    }

    #[test]
    fn undeclared_external_version_is_skipped() {
        let facts = with_zlib_external("1.1");
        let zlib = facts.node(facts.node_named("zlib").unwrap());
        assert!(zlib.origin.is_none());
        assert_eq!(zlib.origins.len(), 1);
    }
}
