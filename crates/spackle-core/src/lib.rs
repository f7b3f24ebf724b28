//! Core types for the Spackle concretizer.
//!
//! - [`Version`] / [`VersionRange`]: dotted versions with development names
//!   and prefix-inclusive ranges.
//! - [`AbstractSpec`] / [`Constraint`]: partial requests and their string
//!   syntax (`hdf5@1.12: +mpi %gcc ^openmpi`).
//! - [`PackageDef`] / [`PackageRepository`]: immutable package definitions
//!   and the snapshot they are resolved against.
//! - [`ConcreteSpec`]: fully bound, hash-addressed DAG nodes.

pub mod compiler;
pub mod concrete;
pub mod error;
pub mod hash;
pub mod package;
pub mod repo;
pub mod spec;
pub mod variant;
pub mod version;

pub use compiler::{CompilerConstraint, CompilerSpec};
pub use concrete::{ConcreteSpec, DependencyEdge};
pub use error::{
    ConstraintKind, ConstraintViolation, CoreConstraint, Error, Result, UnsatisfiableCore,
};
pub use hash::{ContentHash, ContentHasher};
pub use package::{
    BuildSystem, Capability, ConflictDecl, ConflictTarget, DepTypes, DependencyDecl,
    PackageBuilder, PackageDef, ProvidesDecl, VersionDecl,
};
pub use repo::PackageRepository;
pub use spec::{AbstractDependency, AbstractSpec, Constraint};
pub use variant::{VariantDef, VariantKind, VariantValue};
pub use version::{Version, VersionRange};
