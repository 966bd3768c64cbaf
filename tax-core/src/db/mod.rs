pub mod factory;
#[cfg(test)]
pub(crate) mod memory;
pub mod repository;

pub use factory::{DbConfig, RepositoryFactory, RepositoryRegistry};
pub use repository::{RepositoryError, TaxRepository};
