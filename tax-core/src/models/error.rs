use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

/// Validation and parsing failures for tax classes, rates and rules.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("default rate must be non-negative, got {0}")]
    NegativeDefaultRate(Decimal),

    #[error("rate must be non-negative, got {0}")]
    NegativeRate(Decimal),

    /// Percentage rates are fractions; anything above 10 (1000%) is a data entry error.
    #[error("percentage rate {0} is outside 0..=10")]
    PercentageRateOutOfRange(Decimal),

    #[error("unknown tax rate type '{0}' (expected 'percentage' or 'fixed')")]
    UnknownRateType(String),

    #[error("unknown entity type '{0}'")]
    UnknownEntityType(String),

    #[error("unknown customer type '{0}' (expected 'individual' or 'company')")]
    UnknownCustomerType(String),

    #[error("entity type '{entity_type}' does not take an id (got {entity_id})")]
    EntityIdNotAllowed {
        entity_type: &'static str,
        entity_id: i64,
    },

    #[error("window starts {from} after it ends {until}")]
    InvalidDateWindow { from: NaiveDate, until: NaiveDate },

    #[error("order amount band starts {from} above its end {to}")]
    InvalidAmountBand { from: Decimal, to: Decimal },

    #[error("invalid rule conditions: {0}")]
    InvalidConditions(String),
}
