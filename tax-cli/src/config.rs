//! `tax.toml` loading.
//!
//! ```toml
//! [database]
//! backend = "sqlite"
//! connection_string = "tax.db"
//!
//! [cache]
//! ttl_secs = 3600
//! max_entries = 1024
//! ```
//!
//! Both tables are optional, as is every key inside them.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tax_core::CacheConfig;
use tax_core::db::DbConfig;

pub const DEFAULT_DATABASE: &str = "tax.db";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DbConfig,
    pub cache: CacheConfig,
}

impl Default for AppConfig {
    /// Unlike [`DbConfig::default`], the CLI persists to `tax.db`.
    fn default() -> Self {
        Self {
            database: DbConfig {
                connection_string: DEFAULT_DATABASE.to_string(),
                ..DbConfig::default()
            },
            cache: CacheConfig::default(),
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub backend: Option<String>,
    pub db: Option<String>,
    pub cache_ttl: Option<u64>,
}

impl AppConfig {
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Reads `path` when given, otherwise starts from the defaults, then
    /// applies `overrides`.
    pub fn resolve(path: Option<&Path>, overrides: Overrides) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        Ok(config.with_overrides(overrides))
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(backend) = overrides.backend {
            self.database.backend = backend;
        }
        if let Some(db) = overrides.db {
            self.database.connection_string = db;
        }
        if let Some(ttl_secs) = overrides.cache_ttl {
            self.cache.ttl_secs = ttl_secs;
        }
        self
    }
}
