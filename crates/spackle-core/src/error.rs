//! Error types for Spackle operations.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Spackle.
///
/// Errors are `Clone` so that a cached failure can be handed to every caller
/// waiting on the same concretization.
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A request or dependency names a package the repository does not know.
    #[error("unknown package '{name}' (required by {required_by})")]
    #[diagnostic(
        code(spackle::unknown_package),
        help("check the spelling or add a definition for the package to the repository")
    )]
    UnknownPackage {
        /// Package or virtual name.
        name: String,
        /// Who asked for it (`request` or a package name).
        required_by: String,
    },

    /// A requested range matches none of the declared versions.
    #[error("no version of '{name}' satisfies '@{range}'")]
    #[diagnostic(
        code(spackle::no_version),
        help("relax the version range or declare a matching version")
    )]
    NoVersionSatisfiesRange {
        /// Package name.
        name: String,
        /// Requested range.
        range: String,
    },

    /// The constraints admit no solution.
    #[error("unsatisfiable request: {0}")]
    #[diagnostic(code(spackle::unsatisfiable))]
    Unsatisfiable(Box<UnsatisfiableCore>),

    /// The solver ran out of steps or wall-clock time.
    #[error("solver gave up after {steps} steps ({elapsed_ms} ms)")]
    #[diagnostic(
        code(spackle::solver_timeout),
        help("raise solver.max_steps or solver.timeout_ms and try again")
    )]
    SolverTimeout {
        /// Decisions plus backtracks performed.
        steps: u64,
        /// Elapsed wall-clock time.
        elapsed_ms: u64,
    },

    /// The caller cancelled the concretization.
    #[error("concretization cancelled")]
    #[diagnostic(code(spackle::cancelled))]
    Cancelled,

    /// The chosen packages form a dependency cycle.
    #[error("cyclic dependency: {}", cycle.join(" -> "))]
    #[diagnostic(code(spackle::cyclic_dependency))]
    CyclicDependency {
        /// Package names along the cycle, first name repeated at the end.
        cycle: Vec<String>,
    },

    /// An assembled DAG failed validation. Always a bug.
    #[error("internal error: concretized DAG violates {} constraint(s): {}", .0.len(), join_violations(.0))]
    #[diagnostic(code(spackle::internal))]
    Internal(Vec<ConstraintViolation>),

    /// Malformed spec string.
    #[error("invalid spec '{input}': {message}")]
    #[diagnostic(code(spackle::invalid_spec))]
    InvalidSpec {
        /// Offending input.
        input: String,
        /// What went wrong.
        message: String,
    },

    /// Malformed version or version range.
    #[error("invalid version '{input}': {message}")]
    #[diagnostic(code(spackle::invalid_version))]
    InvalidVersion {
        /// Offending input.
        input: String,
        /// What went wrong.
        message: String,
    },

    /// Inconsistent package definition.
    #[error("invalid package '{name}': {message}")]
    #[diagnostic(code(spackle::invalid_package))]
    InvalidPackage {
        /// Package name.
        name: String,
        /// What went wrong.
        message: String,
    },

    /// Configuration error.
    #[error("config error: {0}")]
    #[diagnostic(code(spackle::config))]
    Config(String),

    /// Lockfile error.
    #[error("lockfile error: {0}")]
    #[diagnostic(code(spackle::lockfile))]
    Lockfile(String),

    /// JSON error.
    #[error("json error: {0}")]
    #[diagnostic(code(spackle::json))]
    Json(String),

    /// IO error.
    #[error("io error at {path}: {message}")]
    #[diagnostic(code(spackle::io))]
    Io {
        /// File path.
        path: PathBuf,
        /// Error message.
        message: String,
    },
}

impl Error {
    /// Create an IO error with context.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Create a spec parse error.
    #[must_use]
    pub fn invalid_spec(input: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSpec {
            input: input.into(),
            message: message.into(),
        }
    }

    /// Create a version parse error.
    #[must_use]
    pub fn invalid_version(input: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidVersion {
            input: input.into(),
            message: message.into(),
        }
    }

    /// Whether the same request against the same repository always fails the
    /// same way. Only deterministic failures may be memoized.
    #[must_use]
    pub const fn is_deterministic(&self) -> bool {
        matches!(
            self,
            Self::UnknownPackage { .. }
                | Self::NoVersionSatisfiesRange { .. }
                | Self::Unsatisfiable(_)
                | Self::CyclicDependency { .. }
                | Self::InvalidSpec { .. }
                | Self::InvalidVersion { .. }
        )
    }

    /// The unsatisfiable core, if this is an unsatisfiability error.
    #[must_use]
    pub fn core(&self) -> Option<&UnsatisfiableCore> {
        match self {
            Self::Unsatisfiable(core) => Some(core),
            _ => None,
        }
    }
}

impl From<sonic_rs::Error> for Error {
    fn from(err: sonic_rs::Error) -> Self {
        Self::Json(err.to_string())
    }
}

fn join_violations(violations: &[ConstraintViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for Spackle operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Where a constraint taking part in an unsatisfiable core came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConstraintKind {
    /// A root request or a `^dep` constraint given by the user.
    Request,
    /// A `depends_on` declaration.
    Dependency,
    /// A virtual dependency and the provider declarations able to satisfy it.
    VirtualDependency,
    /// A `conflicts` declaration.
    Conflict,
    /// A structural rule on variant values.
    Variant,
    /// A package that may not be built from source.
    Buildable,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Request => "request",
            Self::Dependency => "dependency",
            Self::VirtualDependency => "virtual dependency",
            Self::Conflict => "conflict",
            Self::Variant => "variant",
            Self::Buildable => "buildable",
        })
    }
}

/// One member of an unsatisfiable core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConstraint {
    /// Constraint origin.
    pub kind: ConstraintKind,
    /// Human readable rendering, e.g. `a+feature depends on c`.
    pub description: String,
}

impl fmt::Display for CoreConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.description)
    }
}

/// A set of mutually incompatible constraints explaining a failed solve.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UnsatisfiableCore {
    /// The incompatible constraints.
    pub constraints: Vec<CoreConstraint>,
    /// Whether removing any single constraint makes the rest satisfiable.
    pub minimal: bool,
    /// Relaxations worth trying.
    pub suggestions: Vec<String>,
}

impl UnsatisfiableCore {
    /// Whether the core cites a constraint of this kind whose description
    /// contains `needle`.
    #[must_use]
    pub fn mentions(&self, kind: ConstraintKind, needle: &str) -> bool {
        self.constraints
            .iter()
            .any(|c| c.kind == kind && c.description.contains(needle))
    }
}

impl fmt::Display for UnsatisfiableCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, constraint) in self.constraints.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{constraint}")?;
        }
        if !self.minimal {
            f.write_str(" (core may not be minimal)")?;
        }
        Ok(())
    }
}

/// A broken invariant found by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintViolation {
    /// Node the violation was found on.
    pub package: String,
    /// Description.
    pub message: String,
}

impl ConstraintViolation {
    /// Create a violation.
    #[must_use]
    pub fn new(package: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.package, self.message)
    }
}
