use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    BoundTaxRule, NewTaxClass, NewTaxRate, NewTaxRule, TaxClass, TaxRate, TaxRule,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("Record not found")]
    NotFound,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A write broke a uniqueness or reference constraint, e.g. deleting a
    /// class that still owns rates.
    #[error("Conflict: {0}")]
    Conflict(String),
}

#[async_trait]
pub trait TaxRepository: Send + Sync {
    // Tax classes
    async fn create_tax_class(&self, class: NewTaxClass) -> Result<TaxClass, RepositoryError>;
    async fn get_tax_class(&self, id: i64) -> Result<TaxClass, RepositoryError>;
    async fn get_tax_class_by_code(&self, code: &str) -> Result<TaxClass, RepositoryError>;
    async fn list_tax_classes(&self) -> Result<Vec<TaxClass>, RepositoryError>;
    async fn update_tax_class(&self, class: &TaxClass) -> Result<(), RepositoryError>;
    async fn delete_tax_class(&self, id: i64) -> Result<(), RepositoryError>;

    // Tax rates
    async fn create_tax_rate(&self, rate: NewTaxRate) -> Result<TaxRate, RepositoryError>;
    async fn get_tax_rate(&self, id: i64) -> Result<TaxRate, RepositoryError>;
    async fn get_tax_rate_by_code(&self, code: &str) -> Result<TaxRate, RepositoryError>;

    /// Rates for a country, active or not, highest priority first.
    async fn list_tax_rates_by_country(
        &self,
        country_code: &str,
    ) -> Result<Vec<TaxRate>, RepositoryError>;

    async fn update_tax_rate(&self, rate: &TaxRate) -> Result<(), RepositoryError>;
    async fn delete_tax_rate(&self, id: i64) -> Result<(), RepositoryError>;

    // Tax rules
    async fn create_tax_rule(&self, rule: NewTaxRule) -> Result<TaxRule, RepositoryError>;
    async fn get_tax_rule(&self, id: i64) -> Result<TaxRule, RepositoryError>;
    async fn list_tax_rules_for_rate(
        &self,
        tax_rate_id: i64,
    ) -> Result<Vec<TaxRule>, RepositoryError>;
    async fn update_tax_rule(&self, rule: &TaxRule) -> Result<(), RepositoryError>;
    async fn delete_tax_rule(&self, id: i64) -> Result<(), RepositoryError>;

    /// Active rules joined with their rate and class, restricted to one
    /// country when `country_code` is given.
    ///
    /// Date windows and rate activity are left to the engine so the result
    /// can be cached independently of the evaluation date.
    async fn list_candidate_rules(
        &self,
        country_code: Option<&str>,
    ) -> Result<Vec<BoundTaxRule>, RepositoryError>;
}
