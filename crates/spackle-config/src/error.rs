//! Configuration errors.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A config file exists but could not be read.
    #[error("failed to read {path}: {message}")]
    #[diagnostic(code(spackle::config::read))]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        message: String,
    },

    /// A config file is not valid JSON for the schema.
    #[error("invalid config in {path}: {message}")]
    #[diagnostic(code(spackle::config::parse))]
    Parse {
        /// File path.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// An environment variable holds an unusable value.
    #[error("invalid value for {var}: {message}")]
    #[diagnostic(code(spackle::config::env))]
    Env {
        /// Variable name.
        var: String,
        /// What went wrong.
        message: String,
    },

    /// The merged configuration is inconsistent.
    #[error("invalid config: {}", .0.join("; "))]
    #[diagnostic(
        code(spackle::config::invalid),
        help("fix the listed settings in the highest-priority source that sets them")
    )]
    Invalid(Vec<String>),
}

impl From<ConfigError> for spackle_core::Error {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
