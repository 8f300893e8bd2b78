//! ---
//! ks_section: "01-shared-primitives"
//! ks_subsection: "module"
//! ks_type: "source"
//! ks_scope: "code"
//! ks_description: "Shared primitives and utilities for the component runtime."
//! ks_version: "v0.0.0-prealpha"
//! ks_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::capability::{Model, ModelError};
use crate::logging::LogFormat;

fn default_isolate_panics() -> bool {
    true
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for a Keystone runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub signals: SignalConfig,
    #[serde(default)]
    pub timeline: TimelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where a [`RuntimeConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedRuntimeConfig {
    pub config: RuntimeConfig,
    pub source: PathBuf,
}

impl RuntimeConfig {
    pub const ENV_CONFIG_PATH: &str = "KEYSTONE_CONFIG";

    /// Load configuration from disk, respecting the `KEYSTONE_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedRuntimeConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedRuntimeConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedRuntimeConfig {
                    config,
                    source: path.to_path_buf(),
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Configuration for the process-wide runtime.
    ///
    /// Reads `KEYSTONE_CONFIG` when it is set and falls back to defaults when
    /// it is unset or unreadable.
    pub fn from_env_or_default() -> Self {
        match std::env::var(Self::ENV_CONFIG_PATH) {
            Ok(path) if !path.trim().is_empty() => match Self::from_path(Path::new(&path)) {
                Ok(config) => config,
                Err(err) => {
                    warn!(config_path = %path, error = %err, "ignoring unreadable runtime config");
                    Self::default()
                }
            },
            _ => Self::default(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<RuntimeConfig>()
            .with_context(|| format!("failed to load config file {}", path.display()))
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to render configuration")
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.logging.validate()
    }
}

impl std::str::FromStr for RuntimeConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: RuntimeConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

impl Model for RuntimeConfig {
    fn save(&self) -> std::result::Result<String, ModelError> {
        toml::to_string_pretty(self).map_err(|err| ModelError::Encode(err.to_string()))
    }

    fn load(&mut self, data: &str) -> std::result::Result<(), ModelError> {
        *self = data
            .parse()
            .map_err(|err: anyhow::Error| ModelError::Decode(format!("{err:#}")))?;
        Ok(())
    }
}

/// Registry resolution behaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Fail `register` when the new slot waits on a key nobody registered yet.
    #[serde(default)]
    pub strict_dependencies: bool,
}

/// Signal dispatch behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Convert listener panics into dispatch failures instead of unwinding.
    #[serde(default = "default_isolate_panics")]
    pub isolate_panics: bool,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            isolate_panics: default_isolate_panics(),
        }
    }
}

/// Timeline scheduler behaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineConfig {
    /// Create lanes on first use instead of rejecting unknown ids.
    #[serde(default)]
    pub auto_create: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for the rolling JSON log file. Stdout only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(prefix) = &self.file_prefix {
            if prefix.trim().is_empty() || prefix.contains(['/', '\\']) {
                return Err(anyhow!(
                    "logging.file_prefix '{}' must be a non-empty file name",
                    prefix
                ));
            }
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            format: default_log_format(),
            file_prefix: None,
        }
    }
}
