//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{rules_from_yaml, PolicyRule, PolicySet};

/// Prefix for environment overrides, e.g. `TURNSTILE__STORE__URL`.
const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for a Turnstile process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Guarded operations and their policies.
    ///
    /// Read straight from the YAML source so operation names keep their case;
    /// the layered loader lowercases every key it sees.
    #[serde(default, skip_deserializing)]
    pub policies: BTreeMap<String, PolicyRule>,
}

/// Which counter store backs the gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis store
    #[default]
    Redis,
    /// Per-process store; counters are not shared between processes
    Memory,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store implementation
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_url")]
    pub url: String,

    /// Prefix for every counter key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Deadline for one counting transaction, in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Deadline for connecting and registering the script, in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_url(),
            key_prefix: default_key_prefix(),
            command_timeout_ms: default_command_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl StoreConfig {
    /// Deadline for one counting transaction.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Deadline for connecting and registering the script.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn default_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_key_prefix() -> String {
    "turnstile:".to_string()
}

fn default_command_timeout_ms() -> u64 {
    500
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

impl TurnstileConfig {
    /// Load configuration from an optional YAML file plus environment overrides.
    ///
    /// Environment overrides apply to the `store` and `logging` sections;
    /// policies come from the file only.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let contents = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(TurnstileError::Config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                Some(std::fs::read_to_string(path)?)
            }
            None => None,
        };

        let mut builder = config::Config::builder();
        if let Some(yaml) = contents.as_deref() {
            builder = builder.add_source(config::File::from_str(yaml, config::FileFormat::Yaml));
        }

        let mut loaded: Self = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TurnstileError::Config(e.to_string()))?;

        if let Some(yaml) = contents.as_deref() {
            loaded.policies = rules_from_yaml(yaml)?;
        }
        Ok(loaded)
    }

    /// Load configuration from a YAML string, without environment overrides.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut loaded: Self = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TurnstileError::Config(e.to_string()))?;

        loaded.policies = rules_from_yaml(yaml)?;
        Ok(loaded)
    }

    /// Validate the configured policies.
    pub fn policy_set(&self) -> Result<PolicySet> {
        PolicySet::from_rules(&self.policies)
    }
}
