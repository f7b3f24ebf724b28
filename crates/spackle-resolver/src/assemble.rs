//! DAG assembly.
//!
//! Turns a solver [`Assignment`] into shared [`ConcreteSpec`] nodes. Nodes are
//! built children first and interned by hash, so structurally equal subgraphs
//! are a single allocation within a run and across runs sharing an interner.

use crate::facts::{EdgeTarget, FactSet, NodeId, Origin};
use crate::solver::Assignment;
use ahash::AHashMap;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use spackle_core::{
    AbstractDependency, ConcreteSpec, ConstraintKind, ConstraintViolation, ContentHash,
    CoreConstraint, DepTypes, DependencyEdge, Error, Result, UnsatisfiableCore,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Deduplicates concrete nodes by hash.
#[derive(Debug, Default)]
pub struct NodeInterner {
    nodes: AHashMap<ContentHash, Arc<ConcreteSpec>>,
}

impl NodeInterner {
    /// An empty interner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared node equal to `spec`, inserting it if new.
    pub fn intern(&mut self, spec: ConcreteSpec) -> Arc<ConcreteSpec> {
        Arc::clone(
            self.nodes
                .entry(spec.hash())
                .or_insert_with(|| Arc::new(spec)),
        )
    }

    /// Look up a node by hash.
    #[must_use]
    pub fn get(&self, hash: &ContentHash) -> Option<&Arc<ConcreteSpec>> {
        self.nodes.get(hash)
    }

    /// Number of distinct nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node was interned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Default)]
struct EdgeInfo {
    types: DepTypes,
    virtuals: Vec<String>,
}

fn internal(package: &str, message: impl Into<String>) -> Error {
    Error::Internal(vec![ConstraintViolation::new(package, message)])
}

/// Build one concrete DAG per requested root, in request order.
///
/// # Errors
/// - [`Error::CyclicDependency`] when active edges form a cycle.
/// - [`Error::Unsatisfiable`] when a `^dep` of a root is not reachable from it.
/// - [`Error::Internal`] when the assignment is incomplete.
pub fn assemble(
    assignment: &Assignment,
    facts: &FactSet,
    interner: &mut NodeInterner,
) -> Result<Vec<Arc<ConcreteSpec>>> {
    let present = assignment.present_nodes(facts);

    let mut graph: DiGraph<NodeId, ()> = DiGraph::new();
    let mut indices: AHashMap<NodeId, NodeIndex> = AHashMap::with_capacity(present.len());
    for &node in &present {
        indices.insert(node, graph.add_node(node));
    }

    let mut outgoing: BTreeMap<NodeId, BTreeMap<NodeId, EdgeInfo>> = BTreeMap::new();
    for &node in &present {
        let mut children: BTreeMap<NodeId, EdgeInfo> = BTreeMap::new();
        for &edge_id in &facts.node(node).edges {
            if !assignment.is_active(facts, edge_id) {
                continue;
            }
            let edge = &facts.edges()[edge_id];
            let (child, virtual_name) = match edge.target {
                EdgeTarget::Node(child) => (child, None),
                EdgeTarget::Virtual(choice) => {
                    let option = assignment.provider(facts, choice).ok_or_else(|| {
                        internal(
                            &facts.node(node).name,
                            format!("no provider chosen for {}", facts.choice(choice).virtual_name),
                        )
                    })?;
                    (option.provider, Some(facts.choice(choice).virtual_name.clone()))
                }
            };
            let Some(&to) = indices.get(&child) else {
                return Err(internal(
                    &facts.node(node).name,
                    format!("depends on absent package {}", facts.node(child).name),
                ));
            };
            if !children.contains_key(&child) {
                graph.add_edge(indices[&node], to, ());
            }
            let info = children.entry(child).or_default();
            info.types |= edge.types;
            info.virtuals.extend(virtual_name);
        }
        outgoing.insert(node, children);
    }

    let order = toposort(&graph, None).map_err(|cycle| Error::CyclicDependency {
        cycle: cycle_through(graph[cycle.node_id()], &outgoing)
            .into_iter()
            .map(|node| facts.node(node).name.clone())
            .collect(),
    })?;

    let mut built: BTreeMap<NodeId, Arc<ConcreteSpec>> = BTreeMap::new();
    for index in order.into_iter().rev() {
        let node = graph[index];
        let name = &facts.node(node).name;
        let version = assignment
            .version(facts, node)
            .ok_or_else(|| internal(name, "no version chosen"))?;
        let compiler = assignment
            .compiler(facts, node)
            .ok_or_else(|| internal(name, "no compiler chosen"))?;
        let platform = assignment
            .platform(facts)
            .ok_or_else(|| internal(name, "no platform chosen"))?;

        let mut dependencies = Vec::new();
        for (child, info) in outgoing.remove(&node).unwrap_or_default() {
            let spec = built
                .get(&child)
                .cloned()
                .ok_or_else(|| internal(name, "dependency built out of order"))?;
            dependencies.push(DependencyEdge {
                spec,
                types: info.types,
                virtuals: info.virtuals,
            });
        }

        let spec = ConcreteSpec::new(
            name.clone(),
            version.clone(),
            assignment.variants(facts, node),
            compiler.clone(),
            platform,
            dependencies,
        );
        let spec = match assignment.origin(facts, node) {
            Some(Origin::External { prefix, .. }) => spec.with_external(prefix.clone()),
            Some(Origin::Installed(installed)) => {
                if installed.hash() != spec.hash() {
                    debug!(
                        package = %name,
                        installed = %installed.hash().short(),
                        rebuilt = %spec.hash().short(),
                        "reused node differs from its installation in edge types"
                    );
                }
                spec
            }
            Some(Origin::Build) | None => spec,
        };
        built.insert(node, interner.intern(spec));
    }

    let mut roots = Vec::with_capacity(facts.roots().len());
    for (i, root) in facts.roots().iter().enumerate() {
        let spec = assignment
            .root_node(facts, i)
            .and_then(|node| built.get(&node))
            .cloned()
            .ok_or_else(|| internal(&root.spec.name, "requested root was not solved"))?;
        for dep in root.spec.flattened_dependencies() {
            if !reaches(&spec, dep) {
                return Err(unreachable_dependency(&root.spec.name, dep));
            }
        }
        roots.push(spec);
    }

    debug!(
        roots = roots.len(),
        nodes = built.len(),
        interned = interner.len(),
        "dag assembled"
    );
    Ok(roots)
}

/// Whether some edge below `root` leads to `dep` with at least its types.
fn reaches(root: &ConcreteSpec, dep: &AbstractDependency) -> bool {
    let name = dep.spec.name.as_str();
    root.traverse()
        .iter()
        .flat_map(|node| node.dependencies())
        .any(|edge| {
            (edge.spec.name() == name || edge.virtuals.iter().any(|v| v == name))
                && edge.types.contains(dep.types)
        })
}

fn unreachable_dependency(root: &str, dep: &AbstractDependency) -> Error {
    let mut target = dep.spec.name.clone();
    if !dep.types.is_empty() {
        target = format!("{target} as a {} dependency", dep.types);
    }
    Error::Unsatisfiable(Box::new(UnsatisfiableCore {
        constraints: vec![CoreConstraint {
            kind: ConstraintKind::Request,
            description: format!("{root} does not depend on {target}"),
        }],
        minimal: true,
        suggestions: vec![format!("remove ^{} from the request", dep.spec.name)],
    }))
}

/// Shortest cycle through `start`, first node repeated at the end.
fn cycle_through(
    start: NodeId,
    outgoing: &BTreeMap<NodeId, BTreeMap<NodeId, EdgeInfo>>,
) -> Vec<NodeId> {
    let mut parent: BTreeMap<NodeId, NodeId> = BTreeMap::new();
    let mut queue = VecDeque::from([start]);
    while let Some(node) = queue.pop_front() {
        for &child in outgoing.get(&node).into_iter().flat_map(BTreeMap::keys) {
            if child == start {
                let mut path = vec![node];
                let mut current = node;
                while let Some(&previous) = parent.get(&current) {
                    path.push(previous);
                    current = previous;
                }
                path.reverse();
                path.push(start);
                return path;
            }
            if !parent.contains_key(&child) {
                parent.insert(child, node);
                queue.push_back(child);
            }
        }
    }
    vec![start, start]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::build_facts;
    use crate::preferences::PreferenceSet;
    use crate::solver::Solver;
    use spackle_core::{AbstractSpec, PackageDef, PackageRepository};

    fn run(repo: &PackageRepository, specs: &[&str]) -> Result<Vec<Arc<ConcreteSpec>>> {
        let prefs = PreferenceSet::default();
        let roots: Vec<AbstractSpec> = specs.iter().map(|s| AbstractSpec::parse(s).unwrap()).collect();
        let facts = build_facts(&roots, repo, &prefs)?;
        let assignment = Solver::new(&facts, &prefs).solve()?;
        assemble(&assignment, &facts, &mut NodeInterner::new())
    }

    #[test]
    fn shared_dependency_is_one_node() {
        let repo = PackageRepository::new([
            PackageDef::builder("a")
                .version("1.0")
                .depends_on("b")
                .depends_on("c")
                .build()
                .unwrap(),
            PackageDef::builder("b").version("1.0").depends_on("z").build().unwrap(),
            PackageDef::builder("c").version("1.0").depends_on("z").build().unwrap(),
            PackageDef::builder("z").version("1.0").build().unwrap(),
        ])
        .unwrap();
        let roots = run(&repo, &["a"]).unwrap();
        let a = &roots[0];
        let via_b = &a.dependency("b").unwrap().spec.dependencies()[0].spec;
        let via_c = &a.dependency("c").unwrap().spec.dependencies()[0].spec;
        assert!(Arc::ptr_eq(via_b, via_c));
        assert_eq!(a.traverse().len(), 4);
    }

    #[test]
    fn cycles_are_reported_with_their_path() {
        let repo = PackageRepository::new([
            PackageDef::builder("a").version("1.0").depends_on("b").build().unwrap(),
            PackageDef::builder("b").version("1.0").depends_on("c").build().unwrap(),
            PackageDef::builder("c").version("1.0").depends_on("a").build().unwrap(),
        ])
        .unwrap();
        let err = run(&repo, &["a"]).unwrap_err();
        let Error::CyclicDependency { cycle } = err else {
            panic!("expected a cycle, got {err}");
        };
        assert_eq!(cycle.len(), 4);
        assert_eq!(cycle.first(), cycle.last());
        let mut members = cycle[..3].to_vec();
        members.sort();
        assert_eq!(members, ["a", "b", "c"]);
    }

    #[test]
    fn edge_types_and_virtuals_merge() {
        let repo = PackageRepository::new([
            PackageDef::builder("app")
                .version("1.0")
                .depends_on_typed("cmake", DepTypes::BUILD, "")
                .depends_on_typed("cmake", DepTypes::RUN, "")
                .depends_on("blas")
                .build()
                .unwrap(),
            PackageDef::builder("cmake").version("3.27").build().unwrap(),
            PackageDef::builder("openblas")
                .version("0.3.24")
                .provides("blas")
                .build()
                .unwrap(),
        ])
        .unwrap();
        let roots = run(&repo, &["app"]).unwrap();
        let app = &roots[0];
        let cmake = app.dependency("cmake").unwrap();
        assert_eq!(cmake.types, DepTypes::BUILD | DepTypes::RUN);
        let blas = app.dependency("openblas").unwrap();
        assert_eq!(blas.virtuals, ["blas"]);
    }

    #[test]
    fn interner_reuses_equal_nodes() {
        let repo = PackageRepository::new([PackageDef::builder("z").version("1.0").build().unwrap()])
            .unwrap();
        let prefs = PreferenceSet::default();
        let facts = build_facts(&[AbstractSpec::named("z")], &repo, &prefs).unwrap();
        let assignment = Solver::new(&facts, &prefs).solve().unwrap();
        let mut interner = NodeInterner::new();
        let first = assemble(&assignment, &facts, &mut interner).unwrap();
        let second = assemble(&assignment, &facts, &mut interner).unwrap();
        assert!(Arc::ptr_eq(&first[0], &second[0]));
        assert_eq!(interner.len(), 1);
    }
}
