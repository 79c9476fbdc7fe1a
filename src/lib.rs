//! sqlhook
//!
//! Driver lifecycle hooks and table invalidation for reactive queries:
//! - `hook`: typed, hierarchical Before/After events for every driver operation
//! - `driver`: hook-emitting driver, connection and transaction handles over a pluggable backend
//! - `invalidation`: per-driver and per-transaction invalidation scopes, and queries that re-run when their tables change
//! - `repository`: CRUD statement reporting with dependent tables
//!
//! ```
//! use futures::StreamExt;
//! use sqlhook::driver::{Driver, MockBackend, QueryExecutor};
//! use sqlhook::hook::HookSettings;
//! use sqlhook::invalidation::{InvalidationHandler, TableSet};
//! use sqlhook::repository::Repository;
//!
//! tokio_test::block_on(async {
//!     let driver = Driver::new(MockBackend::new(), HookSettings::default());
//!     let _handler = InvalidationHandler::install(&driver).unwrap();
//!
//!     let reader = driver.clone();
//!     let mut users = driver
//!         .listen_for_invalidation(TableSet::from_iter(["users"]), move || {
//!             let reader = reader.clone();
//!             async move { reader.fetch_all("SELECT * FROM users").await.map(|rows| rows.len()) }
//!         })
//!         .unwrap();
//!     assert_eq!(users.next().await.unwrap().unwrap(), 0);
//!
//!     Repository::new("users")
//!         .insert(&driver, r#"INSERT INTO users {"id": 1}"#)
//!         .await
//!         .unwrap();
//!     assert_eq!(users.next().await.unwrap().unwrap(), 1);
//! });
//! ```

pub mod driver;
pub mod hook;
pub mod invalidation;
pub mod repository;

#[cfg(test)]
pub(crate) mod test_helpers;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub hooks: HooksYamlConfig,
}

/// `hooks:` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HooksYamlConfig {
    pub enabled: bool,
    pub max_concurrent_handlers: usize,
}

impl Default for HooksYamlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_concurrent_handlers: hook::DEFAULT_MAX_CONCURRENT_HANDLERS,
        }
    }
}

// ============================================================================
// Runtime config
// ============================================================================

/// Effective configuration, turned into [`hook::HookSettings`] with
/// [`hook::HookSettings::from_config`].
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub hooks_enabled: bool,
    pub max_concurrent_handlers: usize,
}

impl Default for Config {
    fn default() -> Self {
        let yaml = HooksYamlConfig::default();
        Self {
            hooks_enabled: yaml.enabled,
            max_concurrent_handlers: yaml.max_concurrent_handlers,
        }
    }
}

impl Config {
    /// Equivalent to `from_yaml_and_env(None)`.
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "sqlhook.yaml" in CWD.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        let yaml = Self::load_yaml(yaml_path);

        Ok(Self {
            hooks_enabled: std::env::var("SQLHOOK_HOOKS_ENABLED")
                .ok()
                .and_then(|s| parse_bool(&s))
                .unwrap_or(yaml.hooks.enabled),
            max_concurrent_handlers: std::env::var("SQLHOOK_MAX_CONCURRENT_HANDLERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(yaml.hooks.max_concurrent_handlers)
                .max(1),
        })
    }

    /// Hook settings from `yaml_path`, or `sqlhook.yaml` in the working
    /// directory. A missing or malformed file counts as empty.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let path = yaml_path.unwrap_or(Path::new("sqlhook.yaml"));

        let Ok(contents) = std::fs::read_to_string(path) else {
            tracing::debug!(path = %path.display(), "No hook config file, falling back to environment");
            return YamlConfig::default();
        };
        serde_yaml::from_str(&contents).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Hook config file is invalid, ignoring it");
            YamlConfig::default()
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================
