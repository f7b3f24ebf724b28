//! Layered configuration loading.
//!
//! Sources are merged in priority order, later sources winning:
//!
//! 1. Built-in defaults
//! 2. System config (`/etc/spackle/config.json`)
//! 3. User config (`~/.config/spackle/config.json` or the platform equivalent)
//! 4. Project config (`<project>/spackle.json`)
//! 5. Environment variables (`SPACKLE_*`)

use crate::error::{ConfigError, Result};
use crate::types::{ConcretizerConfig, ConfigLayer, SolverLayer, UnifyMode};
use directories::ProjectDirs;
use spackle_core::CompilerSpec;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the per-project config file.
pub const PROJECT_CONFIG_FILE: &str = "spackle.json";

/// Where a layer came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Built-in defaults.
    Defaults,
    /// System-wide file.
    System(PathBuf),
    /// Per-user file.
    User(PathBuf),
    /// Per-project file.
    Project(PathBuf),
    /// `SPACKLE_*` variables.
    Environment,
}

/// Environment variables understood by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpackleEnvVar {
    /// `SPACKLE_MAX_STEPS`
    MaxSteps,
    /// `SPACKLE_TIMEOUT_MS`
    TimeoutMs,
    /// `SPACKLE_UNIFY`
    Unify,
    /// `SPACKLE_PLATFORM`
    Platform,
    /// `SPACKLE_COMPILERS`, comma separated.
    Compilers,
    /// `SPACKLE_INCLUDE_TEST_DEPS`
    IncludeTestDeps,
    /// `SPACKLE_REUSE`
    Reuse,
}

impl SpackleEnvVar {
    /// All variables.
    pub const ALL: [Self; 7] = [
        Self::MaxSteps,
        Self::TimeoutMs,
        Self::Unify,
        Self::Platform,
        Self::Compilers,
        Self::IncludeTestDeps,
        Self::Reuse,
    ];

    /// Variable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MaxSteps => "SPACKLE_MAX_STEPS",
            Self::TimeoutMs => "SPACKLE_TIMEOUT_MS",
            Self::Unify => "SPACKLE_UNIFY",
            Self::Platform => "SPACKLE_PLATFORM",
            Self::Compilers => "SPACKLE_COMPILERS",
            Self::IncludeTestDeps => "SPACKLE_INCLUDE_TEST_DEPS",
            Self::Reuse => "SPACKLE_REUSE",
        }
    }
}

fn parse_bool(var: SpackleEnvVar, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Env {
            var: var.as_str().to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

fn parse_u64(var: SpackleEnvVar, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|e| ConfigError::Env {
        var: var.as_str().to_string(),
        message: format!("{e}"),
    })
}

/// Build a layer from `(name, value)` pairs; unknown names are ignored.
///
/// # Errors
/// Fails when a known variable holds an unusable value.
pub fn env_layer<I, K, V>(vars: I) -> Result<ConfigLayer>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut layer = ConfigLayer::default();
    let mut solver = SolverLayer::default();
    for (key, value) in vars {
        let Some(var) = SpackleEnvVar::ALL
            .into_iter()
            .find(|v| v.as_str() == key.as_ref())
        else {
            continue;
        };
        let value = value.as_ref();
        match var {
            SpackleEnvVar::MaxSteps => solver.max_steps = Some(parse_u64(var, value)?),
            SpackleEnvVar::TimeoutMs => solver.timeout_ms = Some(parse_u64(var, value)?),
            SpackleEnvVar::Unify => {
                layer.unify = Some(value.parse::<UnifyMode>().map_err(|message| {
                    ConfigError::Env {
                        var: var.as_str().to_string(),
                        message,
                    }
                })?);
            }
            SpackleEnvVar::Platform => layer.platforms = Some(vec![value.trim().to_string()]),
            SpackleEnvVar::Compilers => {
                let compilers = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(CompilerSpec::parse)
                    .collect::<spackle_core::Result<Vec<_>>>()
                    .map_err(|e| ConfigError::Env {
                        var: var.as_str().to_string(),
                        message: e.to_string(),
                    })?;
                layer.compilers = Some(compilers);
            }
            SpackleEnvVar::IncludeTestDeps => {
                layer.include_test_deps = Some(parse_bool(var, value)?);
            }
            SpackleEnvVar::Reuse => layer.reuse = Some(parse_bool(var, value)?),
        }
    }
    if solver != SolverLayer::default() {
        layer.solver = Some(solver);
    }
    Ok(layer)
}

/// Read one config file; a missing file yields `None`.
///
/// # Errors
/// Fails when the file exists but cannot be read or parsed.
pub fn read_layer(path: &Path) -> Result<Option<ConfigLayer>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                message: e.to_string(),
            });
        }
    };
    sonic_rs::from_str(&text)
        .map(Some)
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Loads and merges configuration sources.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    project_dir: PathBuf,
    system_path: Option<PathBuf>,
    user_path: Option<PathBuf>,
    use_env: bool,
}

impl ConfigLoader {
    /// Loader for the project in `project_dir` with the standard system and
    /// user locations.
    #[must_use]
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        let system_path = cfg!(unix).then(|| PathBuf::from("/etc/spackle/config.json"));
        let user_path = ProjectDirs::from("", "", "spackle")
            .map(|dirs| dirs.config_dir().join("config.json"));
        Self {
            project_dir: project_dir.into(),
            system_path,
            user_path,
            use_env: true,
        }
    }

    /// Override or disable the system config file.
    #[must_use]
    pub fn with_system_path(mut self, path: Option<PathBuf>) -> Self {
        self.system_path = path;
        self
    }

    /// Override or disable the user config file.
    #[must_use]
    pub fn with_user_path(mut self, path: Option<PathBuf>) -> Self {
        self.user_path = path;
        self
    }

    /// Ignore `SPACKLE_*` variables.
    #[must_use]
    pub const fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    /// Path of the project config file.
    #[must_use]
    pub fn project_config_path(&self) -> PathBuf {
        self.project_dir.join(PROJECT_CONFIG_FILE)
    }

    /// Sources in merge order, including files that may not exist.
    #[must_use]
    pub fn sources(&self) -> Vec<ConfigSource> {
        let mut sources = vec![ConfigSource::Defaults];
        if let Some(path) = &self.system_path {
            sources.push(ConfigSource::System(path.clone()));
        }
        if let Some(path) = &self.user_path {
            sources.push(ConfigSource::User(path.clone()));
        }
        sources.push(ConfigSource::Project(self.project_config_path()));
        if self.use_env {
            sources.push(ConfigSource::Environment);
        }
        sources
    }

    /// Merge every source and validate the result.
    ///
    /// # Errors
    /// Fails on unreadable or malformed files, bad environment values, or an
    /// invalid merged configuration.
    pub fn resolve(&self) -> Result<ConcretizerConfig> {
        self.resolve_with_env(std::env::vars())
    }

    /// Like [`resolve`](Self::resolve) with an explicit environment.
    ///
    /// # Errors
    /// Same as [`resolve`](Self::resolve).
    pub fn resolve_with_env<I>(&self, vars: I) -> Result<ConcretizerConfig>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = ConcretizerConfig::default();
        let mut vars = Some(vars);
        for source in self.sources() {
            let layer = match &source {
                ConfigSource::Defaults => None,
                ConfigSource::System(path) | ConfigSource::User(path) | ConfigSource::Project(path) => {
                    read_layer(path)?
                }
                ConfigSource::Environment => vars.take().map(env_layer).transpose()?,
            };
            if let Some(layer) = layer {
                debug!(source = ?source, "applying config layer");
                config.apply(layer);
            }
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use test_case::test_case;

    fn loader(dir: &TempDir) -> ConfigLoader {
        ConfigLoader::new(dir.path())
            .with_system_path(None)
            .with_user_path(None)
    }

    #[test]
    fn missing_files_yield_defaults() {
        let dir = TempDir::new().unwrap();
        let config = loader(&dir).resolve_with_env(Vec::new()).unwrap();
        assert_eq!(config, ConcretizerConfig::default());
    }

    #[test]
    fn project_then_env_precedence() {
        let dir = TempDir::new().unwrap();
        let user = dir.path().join("user.json");
        fs::write(&user, r#"{"unify": "separately", "solver": {"max-steps": 5}}"#).unwrap();
        fs::write(
            dir.path().join(PROJECT_CONFIG_FILE),
            r#"{"solver": {"max-steps": 50}, "compilers": ["clang@17.0.1"]}"#,
        )
        .unwrap();

        let config = loader(&dir)
            .with_user_path(Some(user))
            .resolve_with_env(vec![(
                "SPACKLE_MAX_STEPS".to_string(),
                "500".to_string(),
            )])
            .unwrap();

        assert_eq!(config.unify, UnifyMode::Separately);
        assert_eq!(config.solver.max_steps, 500);
        assert_eq!(config.compilers[0].name, "clang");
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(PROJECT_CONFIG_FILE), "{not json").unwrap();
        let err = loader(&dir).resolve_with_env(Vec::new()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn env_layer_reads_known_vars() {
        let layer = env_layer([
            ("SPACKLE_PLATFORM", "darwin-aarch64"),
            ("SPACKLE_COMPILERS", "gcc@13.1.0, clang@16.0.0"),
            ("SPACKLE_INCLUDE_TEST_DEPS", "yes"),
            ("SPACKLE_UNIFY", "separately"),
            ("SPACKLE_REUSE", "off"),
            ("UNRELATED", "x"),
        ])
        .unwrap();
        assert_eq!(layer.platforms, Some(vec!["darwin-aarch64".to_string()]));
        assert_eq!(layer.compilers.as_ref().map(Vec::len), Some(2));
        assert_eq!(layer.include_test_deps, Some(true));
        assert_eq!(layer.unify, Some(UnifyMode::Separately));
        assert_eq!(layer.reuse, Some(false));
        assert!(layer.solver.is_none());
    }

    #[test_case("SPACKLE_MAX_STEPS", "lots" ; "non numeric steps")]
    #[test_case("SPACKLE_INCLUDE_TEST_DEPS", "maybe" ; "non boolean")]
    #[test_case("SPACKLE_COMPILERS", "gcc" ; "compiler without version")]
    #[test_case("SPACKLE_UNIFY", "sometimes" ; "unknown unify mode")]
    #[test_case("SPACKLE_REUSE", "perhaps" ; "non boolean reuse")]
    fn env_layer_rejects(var: &str, value: &str) {
        let err = env_layer([(var, value)]).unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: v, .. } if v == var));
    }

    #[test]
    fn invalid_merge_fails_validation() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(PROJECT_CONFIG_FILE), r#"{"platforms": []}"#).unwrap();
        let err = loader(&dir).resolve_with_env(Vec::new()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn sources_in_order() {
        let sources = ConfigLoader::new("/project")
            .with_system_path(Some("/etc/spackle/config.json".into()))
            .with_user_path(None)
            .sources();
        assert_eq!(sources.first(), Some(&ConfigSource::Defaults));
        assert_eq!(sources.last(), Some(&ConfigSource::Environment));
        assert_eq!(sources.len(), 4);
    }
}
