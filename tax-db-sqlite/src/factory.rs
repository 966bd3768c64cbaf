use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use tax_core::db::repository::{RepositoryError, TaxRepository};
use tax_core::db::{DbConfig, RepositoryFactory};

use crate::repository::SqliteRepository;

/// Resolve the seeds directory at runtime so it works in both development and
/// packaged distribution.
///
/// Resolution order:
/// 1. **`TAX_DB_SQLITE_SEEDS_DIR`**: if set, use this path (override for
///    packagers or custom layouts).
/// 2. **`./seeds`**: if the directory exists in the current working directory.
/// 3. **Crate manifest dir**: `$CARGO_MANIFEST_DIR/seeds` as last resort
///    (dev/tests when run from the build tree).
fn seeds_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TAX_DB_SQLITE_SEEDS_DIR") {
        return PathBuf::from(dir);
    }
    let cwd_seeds = PathBuf::from("./seeds");
    if cwd_seeds.is_dir() {
        return cwd_seeds;
    }
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("seeds")
}

/// [`RepositoryFactory`] for SQLite.
///
/// Register this with a [`tax_core::db::RepositoryRegistry`] to make the
/// `"sqlite"` backend available:
///
/// ```rust,no_run
/// use tax_core::db::RepositoryRegistry;
/// use tax_db_sqlite::SqliteRepositoryFactory;
///
/// let mut registry = RepositoryRegistry::new();
/// registry.register(Box::new(SqliteRepositoryFactory));
/// ```
pub struct SqliteRepositoryFactory;

#[async_trait]
impl RepositoryFactory for SqliteRepositoryFactory {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    /// Open the database described by `config.connection_string`, migrate
    /// it and apply the seed files.
    ///
    /// Accepted connection-string values:
    /// * A bare file path, e.g. `"tax.db"`. The file is created if it
    ///   does not exist.
    /// * A sqlx URL such as `"sqlite://tax.db"`.
    /// * `":memory:"`: an ephemeral in-memory database (useful for tests).
    ///
    /// Seed SQL files are loaded from a directory resolved at runtime (see
    /// [`seeds_dir`]). Seeds only insert missing rows, so reopening an
    /// existing database leaves edited configuration alone.
    async fn create(
        &self,
        config: &DbConfig,
    ) -> Result<Box<dyn TaxRepository>, RepositoryError> {
        let repo = SqliteRepository::new(&config.connection_string)
            .await
            .map_err(|e| RepositoryError::Connection(format!("{e:#}")))?;
        repo.run_migrations()
            .await
            .map_err(|e| RepositoryError::Database(format!("{e:#}")))?;

        let seeds = seeds_dir();
        repo.run_seeds(&seeds)
            .await
            .map_err(|e| RepositoryError::Configuration(format!("{e:#}")))?;
        info!(
            database = %config.connection_string,
            seeds = %seeds.display(),
            "opened sqlite tax repository"
        );
        Ok(Box::new(repo))
    }
}
