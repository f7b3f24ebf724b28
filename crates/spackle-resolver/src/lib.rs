//! Deterministic concretizer for Spackle.
//!
//! Concretization turns partial requests such as `hdf5@1.12: +mpi %gcc` into
//! fully bound dependency DAGs: one version, variant set, compiler and
//! platform per package, with every virtual dependency bound to a provider.
//!
//! # Pipeline
//!
//! 1. [`build_facts`] lowers the requests, every reachable package
//!    definition and the [`PreferenceSet`] into variables and rules.
//! 2. [`Solver`] searches for the least-cost assignment, reusing installed
//!    specs and externals where it can, or shrinks the rules it tripped over
//!    into an unsatisfiable core.
//! 3. [`assemble`] builds shared [`ConcreteSpec`] nodes from the assignment
//!    and rejects cycles.
//! 4. [`validate`] re-checks every DAG against the repository.
//!
//! [`Concretizer`] runs the whole pipeline and memoizes outcomes in an
//! optional [`ConcretizationCache`].
//!
//! # Example
//!
//! ```rust,ignore
//! use spackle_resolver::{Concretizer, ConcretizerConfig, PackageRepository};
//! use std::sync::Arc;
//!
//! let repo = Arc::new(PackageRepository::from_json(&std::fs::read_to_string("repo.json")?)?);
//! let concretizer = Concretizer::new(repo, ConcretizerConfig::default())?;
//!
//! for dag in concretizer.concretize_str(&["hdf5 +mpi ^mpich"])? {
//!     println!("{}", dag.tree());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod assemble;
pub mod cancel;
pub mod concretizer;
pub mod domain;
pub mod facts;
pub mod preferences;
pub mod solver;
pub mod stats;
pub mod validate;

pub use assemble::{NodeInterner, assemble};
pub use cancel::CancellationToken;
pub use concretizer::Concretizer;
pub use domain::Domain;
pub use facts::{FactSet, build_facts};
pub use preferences::PreferenceSet;
pub use solver::{Assignment, SolveFailure, SolveLimits, Solver, solve};
pub use stats::{ConcretizerStats, SolveStats, StatsSnapshot};
pub use validate::{ValidationOptions, validate};

pub use spackle_cache::{CacheStats, ConcretizationCache};
pub use spackle_config::{ConcretizerConfig, ExternalPackage, PackagePreferences, UnifyMode};
pub use spackle_core::{AbstractSpec, ConcreteSpec, Error, PackageDef, PackageRepository, Result};
