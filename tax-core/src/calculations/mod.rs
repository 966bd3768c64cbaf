//! Tax calculation: condition matching, rule resolution and rounding.
//!
//! Everything in this module is synchronous and free of I/O. Loading rules
//! from storage is the job of [`crate::service::TaxService`].

pub mod common;
mod conditions;
mod engine;
mod matching;

pub use conditions::TaxConditions;
pub use engine::{
    AppliedTaxRule, TaxCalculationError, TaxEngine, TaxResult, calculate_with_tax_class,
};
pub use matching::rule_matches;
