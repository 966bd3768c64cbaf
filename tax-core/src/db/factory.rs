use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::repository::{RepositoryError, TaxRepository};

/// Which backend to open and how to reach it.
///
/// `connection_string` is handed to the backend untouched; for SQLite it is
/// a file path such as `tax.db`, a `sqlite:` URL or `:memory:`.
///
/// Deserializes from a partial `[database]` table; missing keys take the
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub backend: String,
    pub connection_string: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            connection_string: ":memory:".to_string(),
        }
    }
}

/// Opens a [`TaxRepository`] for one storage backend.
#[async_trait]
pub trait RepositoryFactory: Send + Sync {
    /// Lowercase name matched against [`DbConfig::backend`].
    fn backend_name(&self) -> &'static str;

    /// Returns a repository with its schema in place, ready for the service.
    async fn create(&self, config: &DbConfig) -> Result<Box<dyn TaxRepository>, RepositoryError>;
}

/// Backends compiled into the running binary, keyed by name.
pub struct RepositoryRegistry {
    factories: HashMap<&'static str, Box<dyn RepositoryFactory>>,
}

impl RepositoryRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A later registration under the same name replaces the earlier one.
    pub fn register(&mut self, factory: Box<dyn RepositoryFactory>) {
        self.factories.insert(factory.backend_name(), factory);
    }

    /// Registered backend names, sorted.
    pub fn available_backends(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Opens the repository for `config.backend`.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Configuration`] when no such backend is registered;
    /// otherwise whatever the backend's factory returns.
    pub async fn create(
        &self,
        config: &DbConfig,
    ) -> Result<Box<dyn TaxRepository>, RepositoryError> {
        let factory = self
            .factories
            .get(config.backend.as_str())
            .ok_or_else(|| {
                RepositoryError::Configuration(format!(
                    "unknown backend '{}'; available: {:?}",
                    config.backend,
                    self.available_backends()
                ))
            })?;

        factory.create(config).await
    }
}

impl Default for RepositoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}
