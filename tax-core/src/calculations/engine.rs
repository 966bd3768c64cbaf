//! Tax rule resolution.
//!
//! [`TaxEngine`] decides which rules apply to an amount, in which order, and
//! how much each contributes. It never performs I/O: callers hand it the
//! bound rules (rule + rate + class) they loaded, and it returns a
//! [`TaxResult`].
//!
//! # Resolution
//!
//! | Step | Description |
//! |------|-------------|
//! | 1    | `amount <= 0` returns the zero result |
//! | 2    | Keep rules that are active, inside their window, whose rate is active and effective, and that match the conditions |
//! | 3    | Order by priority, then creation time, then id (all descending) |
//! | 4    | No candidates: fall back to the tax class default rate, or return the zero result |
//! | 5    | Walk candidates, accumulating tax; compound rates tax on top of earlier tax; `stop_processing` ends the walk |
//! | 6    | Round tax to 2 places and the effective rate to 4 |
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use tax_core::calculations::calculate_with_tax_class;
//! use tax_core::TaxClass;
//!
//! let class = TaxClass {
//!     id: 1,
//!     name: "KDV %18".to_string(),
//!     code: "kdv-18".to_string(),
//!     description: None,
//!     default_rate: dec!(0.18),
//!     is_active: true,
//!     created_at: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
//!     updated_at: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
//! };
//!
//! let result = calculate_with_tax_class(dec!(100), &class).unwrap();
//!
//! assert_eq!(result.tax_amount, dec!(18.00));
//! assert_eq!(result.total_with_tax, dec!(118.00));
//! ```

use std::cmp::Reverse;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::common::{round_money, round_rate};
use super::matching::rule_matches;
use super::TaxConditions;
use crate::models::{BoundTaxRule, ModelError, TaxClass, TaxRateType};

/// Errors raised while resolving tax.
///
/// The `Invalid*` variants mean stored configuration is wrong. `Overflow`
/// means the amount is too large for the tax on it to be represented.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaxCalculationError {
    #[error("tax rate {tax_rate_id} is misconfigured: {source}")]
    InvalidTaxRate {
        tax_rate_id: i64,
        source: ModelError,
    },

    #[error("tax class is misconfigured: {0}")]
    InvalidTaxClass(#[source] ModelError),

    #[error("tax on {amount} exceeds the decimal range")]
    Overflow { amount: Decimal },
}

/// One rule's share of the total tax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedTaxRule {
    pub rule_id: i64,
    pub tax_rate_id: i64,
    pub tax_class_id: i64,
    pub rate: Decimal,
    pub rate_type: TaxRateType,
    /// Unrounded contribution; only the total is rounded.
    pub amount_contributed: Decimal,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxResult {
    pub tax_amount: Decimal,
    pub effective_rate: Decimal,
    pub applied_rules: Vec<AppliedTaxRule>,
    /// Class of the first applied rule, or of the fallback class.
    pub tax_class_name: Option<String>,
    pub tax_class_code: Option<String>,
    pub base_amount: Decimal,
    pub total_with_tax: Decimal,
}

impl TaxResult {
    /// Every figure zero. Returned for non-positive amounts and when nothing
    /// taxes the amount at all.
    pub fn zero() -> Self {
        Self {
            tax_amount: Decimal::ZERO,
            effective_rate: Decimal::ZERO,
            applied_rules: Vec::new(),
            tax_class_name: None,
            tax_class_code: None,
            base_amount: Decimal::ZERO,
            total_with_tax: Decimal::ZERO,
        }
    }

    pub fn is_taxed(&self) -> bool {
        !self.tax_amount.is_zero()
    }
}

/// Resolves tax for amounts against a fixed set of bound rules.
///
/// The rule slice may contain inactive, expired or non-matching rules; they
/// are filtered on every call.
#[derive(Debug, Clone, Copy)]
pub struct TaxEngine<'a> {
    rules: &'a [BoundTaxRule],
}

impl<'a> TaxEngine<'a> {
    pub fn new(rules: &'a [BoundTaxRule]) -> Self {
        Self { rules }
    }

    /// Rules that apply to `conditions`, in evaluation order.
    pub fn candidates(&self, conditions: &TaxConditions) -> Vec<&'a BoundTaxRule> {
        let date = conditions.date_or_today();

        let mut candidates: Vec<&BoundTaxRule> = self
            .rules
            .iter()
            .filter(|bound| bound.is_candidate_on(date))
            .filter(|bound| rule_matches(&bound.rule, conditions))
            .collect();

        candidates.sort_by_key(|bound| {
            (
                Reverse(bound.rule.priority),
                Reverse(bound.rule.created_at),
                Reverse(bound.rule.id),
            )
        });
        candidates
    }

    /// Calculates tax on `amount`.
    ///
    /// `fallback` is only consulted when no rule applies.
    ///
    /// # Errors
    ///
    /// Returns [`TaxCalculationError`] if an applied rule's rate, or the
    /// fallback class, fails validation, or if the tax overflows.
    pub fn calculate(
        &self,
        amount: Decimal,
        conditions: &TaxConditions,
        fallback: Option<&TaxClass>,
    ) -> Result<TaxResult, TaxCalculationError> {
        if amount <= Decimal::ZERO {
            if amount < Decimal::ZERO {
                warn!(%amount, "negative amount; returning zero tax");
            }
            return Ok(TaxResult::zero());
        }

        let candidates = self.candidates(conditions);
        debug!(
            candidates = candidates.len(),
            considered = self.rules.len(),
            "resolved tax rule candidates"
        );

        if candidates.is_empty() {
            return match fallback {
                Some(tax_class) => {
                    warn!(tax_class = %tax_class.code, "no rule matched; using tax class default");
                    calculate_with_tax_class(amount, tax_class)
                }
                None => {
                    debug!("no rule matched and no fallback class; returning zero result");
                    Ok(TaxResult::zero())
                }
            };
        }

        let overflow = || TaxCalculationError::Overflow { amount };
        let mut total_tax = Decimal::ZERO;
        let mut current_amount = amount;
        let mut applied_rules = Vec::with_capacity(candidates.len());

        for bound in &candidates {
            let (rule, rate) = (&bound.rule, &bound.rate);
            rate.validate()
                .map_err(|source| TaxCalculationError::InvalidTaxRate {
                    tax_rate_id: rate.id,
                    source,
                })?;

            let base = if rate.is_compound {
                current_amount.checked_add(total_tax).ok_or_else(overflow)?
            } else {
                amount
            };
            let contribution = rate.apply(base).ok_or_else(overflow)?;

            total_tax = total_tax.checked_add(contribution).ok_or_else(overflow)?;
            if rate.is_compound {
                current_amount = current_amount.checked_add(contribution).ok_or_else(overflow)?;
            }

            debug!(
                rule_id = rule.id,
                tax_rate = %rate.code,
                %base,
                %contribution,
                compound = rate.is_compound,
                "applied tax rule"
            );

            applied_rules.push(AppliedTaxRule {
                rule_id: rule.id,
                tax_rate_id: rate.id,
                tax_class_id: bound.tax_class.id,
                rate: rate.rate,
                rate_type: rate.rate_type,
                amount_contributed: contribution,
                description: rule.description.clone(),
            });

            if rule.stop_processing {
                debug!(rule_id = rule.id, "rule stops further processing");
                break;
            }
        }

        let primary = &candidates[0].tax_class;
        let tax_amount = round_money(total_tax);
        let effective_rate = total_tax.checked_div(amount).ok_or_else(overflow)?;
        let total_with_tax = amount.checked_add(tax_amount).ok_or_else(overflow)?;

        Ok(TaxResult {
            tax_amount,
            effective_rate: round_rate(effective_rate),
            applied_rules,
            tax_class_name: Some(primary.name.clone()),
            tax_class_code: Some(primary.code.clone()),
            base_amount: amount,
            total_with_tax,
        })
    }
}

/// Taxes `amount` at a class's flat default rate, ignoring rules entirely.
///
/// # Errors
///
/// Returns [`TaxCalculationError::InvalidTaxClass`] for a negative default
/// rate and [`TaxCalculationError::Overflow`] when the taxed total does not
/// fit in a `Decimal`.
pub fn calculate_with_tax_class(
    amount: Decimal,
    tax_class: &TaxClass,
) -> Result<TaxResult, TaxCalculationError> {
    if amount <= Decimal::ZERO {
        return Ok(TaxResult::zero());
    }
    tax_class
        .validate()
        .map_err(TaxCalculationError::InvalidTaxClass)?;

    let overflow = || TaxCalculationError::Overflow { amount };
    let tax_amount = amount
        .checked_mul(tax_class.default_rate)
        .map(round_money)
        .ok_or_else(overflow)?;
    let total_with_tax = amount.checked_add(tax_amount).ok_or_else(overflow)?;

    Ok(TaxResult {
        tax_amount,
        effective_rate: tax_class.default_rate,
        applied_rules: Vec::new(),
        tax_class_name: Some(tax_class.name.clone()),
        tax_class_code: Some(tax_class.code.clone()),
        base_amount: amount,
        total_with_tax,
    })
}
