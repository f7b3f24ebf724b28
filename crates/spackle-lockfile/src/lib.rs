//! Lockfiles for concretized Spackle DAGs.
//!
//! A lockfile stores every node of one or more concrete DAGs once, keyed by
//! its hash, and lists the roots by hash:
//!
//! ```json
//! {
//!   "version": 1,
//!   "generated": "2026-01-15T10:30:00Z",
//!   "generator": "spackle 0.1.0",
//!   "roots": ["5f0c…"],
//!   "nodes": {
//!     "9ab1…": { "name": "zlib", "version": "1.3", "variants": { "pic": true },
//!                "compiler": "gcc@12.2.0", "platform": "linux-x86_64" },
//!     "5f0c…": { "name": "app", "version": "1.0", "compiler": "gcc@12.2.0",
//!                "platform": "linux-x86_64",
//!                "dependencies": [{ "hash": "9ab1…", "types": "build,link" }] }
//!   }
//! }
//! ```
//!
//! Nodes are written children first. Reading a lockfile back recomputes every
//! hash, so an edited or truncated file is rejected instead of silently
//! producing a different DAG.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use spackle_core::{
    CompilerSpec, ConcreteSpec, ContentHash, DepTypes, DependencyEdge, Error, Result,
    VariantValue, Version,
};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Current lockfile format version.
pub const LOCKFILE_VERSION: u32 = 1;

/// Default lockfile name.
pub const LOCKFILE_NAME: &str = "spackle.lock";

/// A serialized set of concrete DAGs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lockfile {
    /// Format version.
    pub version: u32,
    /// When the lockfile was generated.
    pub generated: DateTime<Utc>,
    /// Tool that generated the lockfile.
    pub generator: String,
    /// Root hashes, in request order.
    pub roots: Vec<ContentHash>,
    /// Every node by hex hash, children before parents.
    pub nodes: IndexMap<String, LockedNode>,
}

/// One concrete node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedNode {
    /// Package name.
    pub name: String,
    /// Bound version.
    pub version: Version,
    /// Bound variants.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variants: BTreeMap<String, VariantValue>,
    /// Chosen compiler.
    pub compiler: CompilerSpec,
    /// Chosen platform.
    pub platform: String,
    /// Outgoing edges.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<LockedEdge>,
    /// Installation prefix of an external node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<String>,
}

/// An edge to another node of the same lockfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedEdge {
    /// Hash of the dependency.
    pub hash: ContentHash,
    /// Edge types.
    pub types: DepTypes,
    /// Virtuals satisfied through this edge.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub virtuals: Vec<String>,
}

impl LockedNode {
    fn from_spec(spec: &ConcreteSpec) -> Self {
        Self {
            name: spec.name().to_string(),
            version: spec.version().clone(),
            variants: spec.variants().clone(),
            compiler: spec.compiler().clone(),
            platform: spec.platform().to_string(),
            dependencies: spec
                .dependencies()
                .iter()
                .map(|edge| LockedEdge {
                    hash: edge.spec.hash(),
                    types: edge.types,
                    virtuals: edge.virtuals.clone(),
                })
                .collect(),
            external: spec.external_prefix().map(str::to_string),
        }
    }
}

impl Lockfile {
    /// Record the DAGs below `roots`.
    #[must_use]
    pub fn from_roots(roots: &[Arc<ConcreteSpec>]) -> Self {
        let mut nodes = IndexMap::new();
        for root in roots {
            insert_post_order(root, &mut nodes);
        }
        Self {
            version: LOCKFILE_VERSION,
            generated: Utc::now(),
            generator: format!("spackle {}", env!("CARGO_PKG_VERSION")),
            roots: roots.iter().map(|root| root.hash()).collect(),
            nodes,
        }
    }

    /// Serialize to pretty JSON.
    ///
    /// # Errors
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(sonic_rs::to_string_pretty(self)?)
    }

    /// Parse JSON produced by [`to_json`](Self::to_json).
    ///
    /// # Errors
    /// Returns [`Error::Json`] for malformed input and [`Error::Lockfile`] for
    /// an unsupported format version.
    pub fn from_json(json: &str) -> Result<Self> {
        let lockfile: Self = sonic_rs::from_str(json)?;
        if lockfile.version != LOCKFILE_VERSION {
            return Err(Error::Lockfile(format!(
                "unsupported lockfile version {} (expected {LOCKFILE_VERSION})",
                lockfile.version
            )));
        }
        Ok(lockfile)
    }

    /// Read a lockfile from disk.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the file cannot be read, then as
    /// [`from_json`](Self::from_json).
    pub fn read(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let lockfile = Self::from_json(&json)?;
        debug!(path = %path.display(), nodes = lockfile.nodes.len(), "lockfile read");
        Ok(lockfile)
    }

    /// Write to `path` through a temporary file in the same directory, so
    /// readers see either the old or the new lockfile.
    ///
    /// # Errors
    /// Returns [`Error::Io`] on any filesystem failure.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

        let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
        temp.write_all(json.as_bytes())
            .map_err(|e| Error::io(temp.path(), e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| Error::io(temp.path(), e))?;
        temp.persist(path).map_err(|e| Error::io(path, e.error))?;

        info!(
            path = %path.display(),
            roots = self.roots.len(),
            nodes = self.nodes.len(),
            "lockfile written"
        );
        Ok(())
    }

    /// Rebuild the recorded DAGs, sharing one allocation per node.
    ///
    /// # Errors
    /// Returns [`Error::Lockfile`] when a node's recomputed hash differs from
    /// its key, an edge or root names a missing node, or the edges form a
    /// cycle.
    pub fn roots(&self) -> Result<Vec<Arc<ConcreteSpec>>> {
        let mut builder = Rebuilder {
            nodes: &self.nodes,
            built: HashMap::with_capacity(self.nodes.len()),
            visiting: Vec::new(),
        };
        self.roots
            .iter()
            .map(|hash| builder.build(&hash.to_hex()))
            .collect()
    }
}

fn insert_post_order(spec: &ConcreteSpec, nodes: &mut IndexMap<String, LockedNode>) {
    let key = spec.hash().to_hex();
    if nodes.contains_key(&key) {
        return;
    }
    for edge in spec.dependencies() {
        insert_post_order(&edge.spec, nodes);
    }
    nodes.insert(key, LockedNode::from_spec(spec));
}

struct Rebuilder<'a> {
    nodes: &'a IndexMap<String, LockedNode>,
    built: HashMap<String, Arc<ConcreteSpec>>,
    visiting: Vec<String>,
}

impl Rebuilder<'_> {
    fn build(&mut self, key: &str) -> Result<Arc<ConcreteSpec>> {
        if let Some(spec) = self.built.get(key) {
            return Ok(Arc::clone(spec));
        }
        if let Some(start) = self.visiting.iter().position(|k| k == key) {
            let cycle: Vec<&str> = self.visiting[start..]
                .iter()
                .filter_map(|k| self.nodes.get(k).map(|n| n.name.as_str()))
                .collect();
            return Err(Error::Lockfile(format!("cycle through {}", cycle.join(" -> "))));
        }
        let nodes = self.nodes;
        let node = nodes
            .get(key)
            .ok_or_else(|| Error::Lockfile(format!("missing node {key}")))?;

        self.visiting.push(key.to_string());
        let mut dependencies = Vec::with_capacity(node.dependencies.len());
        for edge in &node.dependencies {
            dependencies.push(DependencyEdge {
                spec: self.build(&edge.hash.to_hex())?,
                types: edge.types,
                virtuals: edge.virtuals.clone(),
            });
        }
        self.visiting.pop();

        let spec = ConcreteSpec::new(
            node.name.clone(),
            node.version.clone(),
            node.variants.clone(),
            node.compiler.clone(),
            node.platform.clone(),
            dependencies,
        );
        let spec = match &node.external {
            Some(prefix) => spec.with_external(prefix.clone()),
            None => spec,
        };
        let actual = spec.hash().to_hex();
        if actual != key {
            return Err(Error::Lockfile(format!(
                "{} hash mismatch: recorded {key}, computed {actual}",
                node.name
            )));
        }
        let spec = Arc::new(spec);
        self.built.insert(key.to_string(), Arc::clone(&spec));
        Ok(spec)
    }
}
