use std::fmt;
use std::sync::Arc;

use tax_core::db::RepositoryRegistry;
use tax_core::validation::{TaxNumberKind, format_tax_number, validate_tax_number};
use tax_core::{EntityRef, ModelError, TaxCache, TaxClass, TaxRate, TaxResult, TaxService};
use tax_db_sqlite::SqliteRepositoryFactory;
use tracing::debug;

use crate::config::AppConfig;

/// Registry with every backend compiled into this binary.
pub fn build_registry() -> RepositoryRegistry {
    let mut registry = RepositoryRegistry::new();
    registry.register(Box::new(SqliteRepositoryFactory));
    registry
}

/// Opens the configured backend and wraps it in a cached [`TaxService`].
pub async fn connect(config: &AppConfig) -> anyhow::Result<TaxService> {
    debug!(backend = %config.database.backend, "connecting to database");
    let repo = build_registry().create(&config.database).await?;
    let cache = TaxCache::new(config.cache);
    Ok(TaxService::new(Arc::from(repo), Arc::new(cache)))
}

/// Parses `type` or `type:id`, e.g. `product:42` or `shipping`.
pub fn parse_entity(raw: &str) -> Result<EntityRef, ModelError> {
    let raw = raw.trim();
    match raw.split_once(':') {
        Some((kind, id)) => {
            let id = id
                .trim()
                .parse::<i64>()
                .map_err(|e| ModelError::InvalidConditions(format!("entity id '{id}': {e}")))?;
            EntityRef::from_parts(kind.trim(), Some(id))
        }
        None => EntityRef::from_parts(raw, None),
    }
}

/// Human-readable report of one calculation.
pub struct ResultReport<'a>(pub &'a TaxResult);

impl fmt::Display for ResultReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = self.0;
        writeln!(f, "Base amount:    {}", result.base_amount)?;
        writeln!(f, "Tax:            {}", result.tax_amount)?;
        writeln!(f, "Total:          {}", result.total_with_tax)?;
        writeln!(f, "Effective rate: {}", result.effective_rate)?;
        if let (Some(name), Some(code)) = (&result.tax_class_name, &result.tax_class_code) {
            writeln!(f, "Tax class:      {name} ({code})")?;
        }
        if result.applied_rules.is_empty() {
            return Ok(());
        }

        writeln!(f, "Applied rules:")?;
        for applied in &result.applied_rules {
            write!(
                f,
                "  #{:<5} {:>10} {:<10} {}",
                applied.rule_id,
                applied.rate,
                applied.rate_type.as_str(),
                applied.amount_contributed.round_dp(2),
            )?;
            if let Some(description) = &applied.description {
                write!(f, "  {description}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// One line per class: id, code, name, default rate.
pub struct ClassTable<'a>(pub &'a [TaxClass]);

impl fmt::Display for ClassTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for class in self.0 {
            writeln!(
                f,
                "{:<4} {:<16} {:<24} {}",
                class.id, class.code, class.name, class.default_rate
            )?;
        }
        Ok(())
    }
}

pub struct RateTable<'a>(pub &'a [TaxRate]);

impl fmt::Display for RateTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for rate in self.0 {
            let region = rate.region.as_deref().unwrap_or("-");
            writeln!(
                f,
                "{:<16} {:<24} {:>8} {:<10} {:<3} {:<4} p{}{}",
                rate.code,
                rate.name,
                rate.rate,
                rate.rate_type.as_str(),
                rate.country_code,
                region,
                rate.priority,
                if rate.is_compound { " compound" } else { "" },
            )?;
        }
        Ok(())
    }
}

/// Outcome of checking a TCKN or VKN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxNumberCheck {
    pub kind: Option<TaxNumberKind>,
    pub valid: bool,
    pub formatted: String,
}

pub fn check_tax_number(raw: &str) -> TaxNumberCheck {
    TaxNumberCheck {
        kind: TaxNumberKind::detect(raw),
        valid: validate_tax_number(raw),
        formatted: format_tax_number(raw),
    }
}
