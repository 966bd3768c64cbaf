//! SQLite backend for [`tax_core::TaxRepository`].

mod decimal;
mod factory;
mod repository;

pub use factory::SqliteRepositoryFactory;
pub use repository::SqliteRepository;
