//! Policy rules configuration and lookup.
//!
//! This module maps guarded operation names to their admission policies.
//! Rules are validated once, when the set is built, and the resulting
//! `Policy` values are immutable from then on.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use super::policy::Policy;
use crate::error::{Result, TurnstileError};

/// Message returned on denial when a rule does not set its own.
pub const DEFAULT_REJECTION_MESSAGE: &str = "Too many requests, please try again later";

/// A policy rule as written in configuration.
///
/// Defaults mirror a typical per-address limiter: 10 calls per second.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// The rate-limited key
    pub key: String,
    /// Calls allowed per window
    #[serde(default = "default_limit")]
    pub limit: u64,
    /// Window length, in `unit`s
    #[serde(default = "default_window")]
    pub window: u64,
    /// The time unit of `window`
    #[serde(default)]
    pub unit: TimeUnit,
    /// Message returned on denial
    #[serde(default = "default_message")]
    pub message: String,
}

fn default_limit() -> u64 {
    10
}

fn default_window() -> u64 {
    1
}

fn default_message() -> String {
    DEFAULT_REJECTION_MESSAGE.to_string()
}

/// Time unit for policy windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Millisecond,
    #[default]
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Duration of `amount` of this unit.
    pub fn duration(&self, amount: u64) -> Duration {
        match self {
            TimeUnit::Millisecond => Duration::from_millis(amount),
            TimeUnit::Second => Duration::from_secs(amount),
            TimeUnit::Minute => Duration::from_secs(amount.saturating_mul(60)),
            TimeUnit::Hour => Duration::from_secs(amount.saturating_mul(3600)),
            TimeUnit::Day => Duration::from_secs(amount.saturating_mul(86400)),
        }
    }
}

impl PolicyRule {
    /// Convert to a validated `Policy`.
    pub fn to_policy(&self) -> Result<Policy> {
        let policy = Policy::new(
            self.key.clone(),
            self.limit,
            self.unit.duration(self.window),
            self.message.clone(),
        );
        policy.validate()?;
        Ok(policy)
    }
}

/// A YAML document holding only policies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PolicyDocument {
    #[serde(default)]
    policies: BTreeMap<String, PolicyRule>,
}

/// Parse the `policies` map of a YAML document, keeping operation names as written.
pub(crate) fn rules_from_yaml(yaml: &str) -> Result<BTreeMap<String, PolicyRule>> {
    if yaml.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let document: PolicyDocument = serde_yaml::from_str(yaml)
        .map_err(|e| TurnstileError::Config(format!("Failed to parse policy config: {}", e)))?;
    Ok(document.policies)
}

/// Validated policies indexed by guarded operation name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySet {
    policies: BTreeMap<String, Policy>,
}

impl PolicySet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a map of rules into a set. Fails on the first invalid rule.
    pub fn from_rules(rules: &BTreeMap<String, PolicyRule>) -> Result<Self> {
        let mut policies = BTreeMap::new();
        for (operation, rule) in rules {
            let policy = rule.to_policy().map_err(|e| match e {
                TurnstileError::InvalidPolicy(msg) => {
                    TurnstileError::InvalidPolicy(format!("operation '{}': {}", operation, msg))
                }
                other => other,
            })?;
            policies.insert(operation.clone(), policy);
        }
        Ok(Self { policies })
    }

    /// Load policies from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading policy configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load policies from a YAML string with a top-level `policies` map.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_rules(&rules_from_yaml(yaml)?)
    }

    /// Add or replace the policy for an operation.
    pub fn insert(&mut self, operation: impl Into<String>, policy: Policy) -> Result<()> {
        policy.validate()?;
        self.policies.insert(operation.into(), policy);
        Ok(())
    }

    /// The policy guarding an operation.
    pub fn get(&self, operation: &str) -> Option<&Policy> {
        self.policies.get(operation)
    }

    /// The policy guarding an operation, or `InvalidPolicy` if none is registered.
    pub fn resolve(&self, operation: &str) -> Result<&Policy> {
        self.get(operation).ok_or_else(|| {
            TurnstileError::InvalidPolicy(format!(
                "no policy registered for operation '{}'",
                operation
            ))
        })
    }

    /// Iterate over `(operation, policy)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Policy)> {
        self.policies.iter().map(|(name, policy)| (name.as_str(), policy))
    }

    /// Number of guarded operations.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether no operation is guarded.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
