pub mod cache;
pub mod calculations;
pub mod db;
pub mod models;
pub mod service;
pub mod validation;

pub use cache::{CacheConfig, CacheScope, TaxCache};
pub use calculations::{TaxCalculationError, TaxConditions, TaxEngine, TaxResult};
pub use db::repository::{RepositoryError, TaxRepository};
pub use models::*;
pub use service::{TaxService, TaxServiceError};
