//! `gt-review.toml` configuration.
//!
//! ```toml
//! records_dir = "ground_truth/output"
//! artifact_path = "web/public/data/analysis.json"
//! validate = true
//! failure_policy = "all-or-nothing"
//!
//! [validation]
//! require_object_root = true
//! max_depth = 64
//!
//! [engine]
//! program = "python3"
//! args = ["analysis_script.py"]
//! working_dir = "."
//! output = { file = "analysis.json" }
//! timeout_secs = 300
//! require_json_artifact = true
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coordinator::FailurePolicy;
use crate::regen::{CommandEngine, EngineOutput, RegenerationTrigger};
use crate::validate::StructuralValidator;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "gt-review.toml";

const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReviewConfig {
    pub records_dir: PathBuf,
    pub artifact_path: PathBuf,
    /// Default for requests that do not say whether to validate.
    #[serde(default = "default_true")]
    pub validate: bool,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Without an engine, edits are committed but nothing is regenerated.
    #[serde(default)]
    pub engine: Option<EngineConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationConfig {
    #[serde(default = "default_true")]
    pub require_object_root: bool,
    #[serde(default)]
    pub max_depth: Option<usize>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { require_object_root: true, max_depth: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub output: EngineOutput,
    /// Seconds before the engine is killed; `0` disables the limit.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub require_json_artifact: bool,
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl ReviewConfig {
    /// Read and parse a config file, resolving relative paths against its
    /// directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&text).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        config.resolve_relative_to(base);
        Ok(config)
    }

    /// Parse config text without touching the file system.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.records_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("records_dir is empty".to_string()));
        }
        if self.artifact_path.as_os_str().is_empty() || self.artifact_path.file_name().is_none() {
            return Err(ConfigError::Invalid("artifact_path must name a file".to_string()));
        }
        if let Some(engine) = &self.engine {
            if engine.program.trim().is_empty() {
                return Err(ConfigError::Invalid("engine.program is empty".to_string()));
            }
        }
        if self.validation.max_depth == Some(0) {
            return Err(ConfigError::Invalid("validation.max_depth must be at least 1".to_string()));
        }
        Ok(())
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        resolve(&mut self.records_dir, base);
        resolve(&mut self.artifact_path, base);
        if let Some(engine) = &mut self.engine {
            match &mut engine.working_dir {
                Some(dir) => resolve(dir, base),
                None => engine.working_dir = Some(base.to_path_buf()),
            }
        }
    }

    pub fn validator(&self) -> StructuralValidator {
        StructuralValidator {
            require_object_root: self.validation.require_object_root,
            max_depth: self.validation.max_depth,
        }
    }
}

impl EngineConfig {
    pub fn command_engine(&self) -> CommandEngine {
        let mut engine = CommandEngine::new(&self.program)
            .args(self.args.iter().cloned())
            .output(self.output.clone());
        if let Some(dir) = &self.working_dir {
            engine = engine.working_dir(dir);
        }
        engine
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn trigger(&self) -> RegenerationTrigger {
        RegenerationTrigger {
            timeout: self.timeout(),
            require_json: self.require_json_artifact,
        }
    }
}

fn resolve(path: &mut PathBuf, base: &Path) {
    if path.is_relative() && !base.as_os_str().is_empty() {
        *path = base.join(&*path);
    }
}
