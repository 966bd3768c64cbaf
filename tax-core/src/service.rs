//! Async facade tying storage, cache and engine together.
//!
//! Reads go through the [`TaxCache`]; every write validates its input,
//! hits the repository and then invalidates the scope it touched.

use std::sync::Arc;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use crate::cache::{CacheScope, TaxCache};
use crate::calculations::{self, TaxCalculationError, TaxConditions, TaxEngine, TaxResult};
use crate::db::{RepositoryError, TaxRepository};
use crate::models::{
    BoundTaxRule, ModelError, NewTaxClass, NewTaxRate, NewTaxRule, TaxClass, TaxRate, TaxRule,
};

/// Country whose rate list is kept warm for checkout.
pub const TURKEY: &str = "TR";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaxServiceError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Calculation(#[from] TaxCalculationError),

    #[error("invalid input: {0}")]
    Validation(#[from] ModelError),
}

#[derive(Clone)]
pub struct TaxService {
    repository: Arc<dyn TaxRepository>,
    cache: Arc<TaxCache>,
}

impl TaxService {
    pub fn new(repository: Arc<dyn TaxRepository>, cache: Arc<TaxCache>) -> Self {
        Self { repository, cache }
    }

    pub fn repository(&self) -> &dyn TaxRepository {
        self.repository.as_ref()
    }

    pub fn cache(&self) -> &TaxCache {
        &self.cache
    }

    // =========================================================================
    // calculation
    // =========================================================================

    /// Resolves tax for `amount` under `conditions`.
    ///
    /// Candidate rules are loaded for the caller's country (or for every
    /// country when none is given) and cached per country. `fallback` is used
    /// only when no rule applies.
    pub async fn calculate_tax(
        &self,
        amount: Decimal,
        conditions: &TaxConditions,
        fallback: Option<&TaxClass>,
    ) -> Result<TaxResult, TaxServiceError> {
        if amount <= Decimal::ZERO {
            return Ok(TaxResult::zero());
        }

        let rules = self.candidate_rules(conditions.country_code.as_deref()).await?;
        let result = TaxEngine::new(&rules).calculate(amount, conditions, fallback)?;
        Ok(result)
    }

    /// Flat calculation at a stored class's default rate.
    pub async fn calculate_with_tax_class(
        &self,
        amount: Decimal,
        tax_class_id: i64,
    ) -> Result<TaxResult, TaxServiceError> {
        let tax_class = self.tax_class(tax_class_id).await?;
        Ok(calculations::calculate_with_tax_class(amount, &tax_class)?)
    }

    pub async fn candidate_rules(
        &self,
        country_code: Option<&str>,
    ) -> Result<Arc<Vec<BoundTaxRule>>, TaxServiceError> {
        if let Some(rules) = self.cache.rule_set(country_code) {
            return Ok(rules);
        }

        let generation = self.cache.generation();
        let rules = Arc::new(self.repository.list_candidate_rules(country_code).await?);
        debug!(
            country = country_code.unwrap_or("*"),
            rules = rules.len(),
            "loaded candidate tax rules"
        );
        self.cache
            .put_rule_set(country_code, Arc::clone(&rules), generation);
        Ok(rules)
    }

    // =========================================================================
    // cached reads
    // =========================================================================

    /// Active tax classes, ordered by name.
    pub async fn tax_classes(&self) -> Result<Vec<TaxClass>, TaxServiceError> {
        if let Some(classes) = self.cache.tax_classes() {
            return Ok(classes);
        }

        let generation = self.cache.generation();
        let mut classes: Vec<_> = self
            .repository
            .list_tax_classes()
            .await?
            .into_iter()
            .filter(|c| c.is_active)
            .collect();
        classes.sort_by(|a, b| a.name.cmp(&b.name));

        self.cache.put_tax_classes(classes.clone(), generation);
        Ok(classes)
    }

    pub async fn tax_class(&self, id: i64) -> Result<TaxClass, TaxServiceError> {
        if let Some(class) = self.cache.tax_class(id) {
            return Ok(class);
        }

        let generation = self.cache.generation();
        let class = self.repository.get_tax_class(id).await?;
        self.cache.put_tax_class(class.clone(), generation);
        Ok(class)
    }

    /// Active rates for Turkey, highest priority first.
    pub async fn turkish_rates(&self) -> Result<Vec<TaxRate>, TaxServiceError> {
        if let Some(rates) = self.cache.turkish_rates() {
            return Ok(rates);
        }

        let generation = self.cache.generation();
        let rates: Vec<_> = self
            .repository
            .list_tax_rates_by_country(TURKEY)
            .await?
            .into_iter()
            .filter(|r| r.is_active)
            .collect();

        self.cache.put_turkish_rates(rates.clone(), generation);
        Ok(rates)
    }

    // =========================================================================
    // writes
    // =========================================================================

    pub async fn create_tax_class(&self, class: NewTaxClass) -> Result<TaxClass, TaxServiceError> {
        class.validate()?;
        let created = self.repository.create_tax_class(class).await?;
        self.cache.invalidate(CacheScope::TaxClass);
        Ok(created)
    }

    pub async fn update_tax_class(&self, class: &TaxClass) -> Result<(), TaxServiceError> {
        class.validate()?;
        self.repository.update_tax_class(class).await?;
        self.cache.invalidate(CacheScope::TaxClass);
        Ok(())
    }

    pub async fn delete_tax_class(&self, id: i64) -> Result<(), TaxServiceError> {
        self.repository.delete_tax_class(id).await?;
        self.cache.invalidate(CacheScope::TaxClass);
        Ok(())
    }

    pub async fn create_tax_rate(&self, rate: NewTaxRate) -> Result<TaxRate, TaxServiceError> {
        rate.validate()?;
        let created = self.repository.create_tax_rate(rate).await?;
        self.cache.invalidate(CacheScope::TaxRate);
        Ok(created)
    }

    pub async fn update_tax_rate(&self, rate: &TaxRate) -> Result<(), TaxServiceError> {
        rate.validate()?;
        self.repository.update_tax_rate(rate).await?;
        self.cache.invalidate(CacheScope::TaxRate);
        Ok(())
    }

    pub async fn delete_tax_rate(&self, id: i64) -> Result<(), TaxServiceError> {
        self.repository.delete_tax_rate(id).await?;
        self.cache.invalidate(CacheScope::TaxRate);
        Ok(())
    }

    pub async fn create_tax_rule(&self, rule: NewTaxRule) -> Result<TaxRule, TaxServiceError> {
        rule.validate()?;
        let created = self.repository.create_tax_rule(rule).await?;
        self.cache.invalidate(CacheScope::TaxRule);
        Ok(created)
    }

    pub async fn update_tax_rule(&self, rule: &TaxRule) -> Result<(), TaxServiceError> {
        rule.validate()?;
        self.repository.update_tax_rule(rule).await?;
        self.cache.invalidate(CacheScope::TaxRule);
        Ok(())
    }

    pub async fn delete_tax_rule(&self, id: i64) -> Result<(), TaxServiceError> {
        self.repository.delete_tax_rule(id).await?;
        self.cache.invalidate(CacheScope::TaxRule);
        Ok(())
    }
}

impl std::fmt::Debug for TaxService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaxService")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
