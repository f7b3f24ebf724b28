//! Layered concretizer configuration for Spackle.
//!
//! Configuration is merged from built-in defaults, system, user and project
//! JSON files, and `SPACKLE_*` environment variables, in that order:
//!
//! ```json
//! {
//!     "solver": { "max-steps": 100000, "timeout-ms": 30000 },
//!     "unify": "together",
//!     "platforms": ["linux-x86_64"],
//!     "compilers": ["gcc@12.2.0", "clang@17.0.1"],
//!     "packages": {
//!         "hdf5": { "versions": ["1.14:"], "variants": "+mpi ~shared" }
//!     },
//!     "providers": { "mpi": ["openmpi", "mpich"] }
//! }
//! ```
//!
//! ```no_run
//! use spackle_config::ConfigLoader;
//!
//! let config = ConfigLoader::new(".").resolve().expect("valid config");
//! println!("max steps: {}", config.solver.max_steps);
//! ```

pub mod error;
pub mod loader;
pub mod types;

pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, ConfigSource, PROJECT_CONFIG_FILE, SpackleEnvVar, env_layer, read_layer};
pub use types::{
    ConcretizerConfig, ConfigLayer, ExternalPackage, PackagePreferences, SolverConfig,
    SolverLayer, UnifyMode, default_platform,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_names() {
        assert_eq!(SpackleEnvVar::MaxSteps.as_str(), "SPACKLE_MAX_STEPS");
        assert_eq!(SpackleEnvVar::Unify.as_str(), "SPACKLE_UNIFY");
        assert!(SpackleEnvVar::ALL.iter().all(|v| v.as_str().starts_with("SPACKLE_")));
    }

    #[test]
    fn config_error_converts_to_core_error() {
        let err: spackle_core::Error = ConfigError::Invalid(vec!["x".into()]).into();
        assert!(matches!(err, spackle_core::Error::Config(msg) if msg.contains('x')));
    }
}
