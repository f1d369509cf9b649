//! Warden configuration (strict TOML parsing).
//!
//! ```toml
//! actors = ["architect", "code_developer"]
//!
//! [enforcement]
//! unclear_policy = "fail_open"
//! cache_capacity = 65536
//!
//! [audit]
//! sink = "sqlite"
//! path = ".warden/audit.db"
//!
//! [[rules]]
//! pattern = "coffee_maker/**"
//! owner = "code_developer"
//! ```

use crate::core::actor::Roster;
use crate::core::audit::RetryPolicy;
use crate::core::cache::DEFAULT_CACHE_CAPACITY;
use crate::core::error::WardenError;
use crate::core::registry::OwnershipRegistry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What to do with a mutation on a path no rule covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnclearPolicy {
    /// Proceed as if authorized and record a `policy_gap` trace.
    #[default]
    FailOpen,
    /// Refuse with `OwnershipUnclear`.
    FailClosed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Sqlite,
    Jsonl,
    #[default]
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    pub pattern: String,
    pub owner: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnforcementSection {
    #[serde(default)]
    pub unclear_policy: UnclearPolicy,

    /// Resolved paths memoized before the cache starts over.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

impl Default for EnforcementSection {
    fn default() -> Self {
        Self {
            unclear_policy: UnclearPolicy::default(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditSection {
    #[serde(default)]
    pub sink: SinkKind,

    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

fn default_max_retries() -> u32 {
    5
}
fn default_retry_base_ms() -> u64 {
    100
}
fn default_max_pending() -> usize {
    10_000
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            sink: SinkKind::default(),
            path: None,
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            max_pending: default_max_pending(),
        }
    }
}

impl AuditSection {
    pub fn validate(&self) -> Result<(), WardenError> {
        if self.sink != SinkKind::None && self.path.is_none() {
            return Err(WardenError::Configuration(
                "audit.path is required when audit.sink is sqlite or jsonl".into(),
            ));
        }
        if self.max_pending == 0 {
            return Err(WardenError::Configuration(
                "audit.max_pending must be greater than zero".into(),
            ));
        }
        if self.retry_base_ms > 60_000 {
            return Err(WardenError::Configuration(
                "audit.retry_base_ms must be at most 60000".into(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_ms),
            max_pending: self.max_pending,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WardenConfig {
    pub actors: Vec<String>,

    #[serde(default)]
    pub enforcement: EnforcementSection,

    #[serde(default)]
    pub audit: AuditSection,

    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

impl WardenConfig {
    /// Structural checks. Rule ambiguity is checked by the registry.
    pub fn validate(&self) -> Result<(), WardenError> {
        if self.actors.is_empty() {
            return Err(WardenError::Configuration("actors must not be empty".into()));
        }
        if self.enforcement.cache_capacity == 0 {
            return Err(WardenError::Configuration(
                "enforcement.cache_capacity must be greater than zero".into(),
            ));
        }
        self.audit.validate()?;
        Ok(())
    }

    pub fn roster(&self) -> Result<Roster, WardenError> {
        Roster::new(&self.actors)
    }

    /// Parse rules against the roster. Does not check for ambiguity.
    pub fn registry(&self, roster: &Roster) -> Result<OwnershipRegistry, WardenError> {
        OwnershipRegistry::from_specs(roster, &self.rules)
    }

    /// Resolve a relative audit path against `base` (usually the config file's directory).
    pub fn resolve_audit_path(&mut self, base: &Path) {
        if let Some(path) = &self.audit.path
            && path.is_relative()
        {
            self.audit.path = Some(base.join(path));
        }
    }
}

pub fn load_from_file(path: &Path) -> Result<WardenConfig, WardenError> {
    let content = fs::read_to_string(path).map_err(|e| {
        WardenError::Configuration(format!("read config {} failed: {}", path.display(), e))
    })?;
    let mut cfg = load_from_str(&content)?;
    if let Some(base) = path.parent() {
        cfg.resolve_audit_path(base);
    }
    Ok(cfg)
}

pub fn load_from_str(s: &str) -> Result<WardenConfig, WardenError> {
    let cfg: WardenConfig =
        toml::from_str(s).map_err(|e| WardenError::Configuration(format!("invalid toml: {}", e)))?;
    cfg.validate()?;
    Ok(cfg)
}
