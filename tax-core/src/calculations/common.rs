//! Rounding helpers shared by the tax engine.
//!
//! Every monetary figure leaves the engine at two decimal places; effective
//! rates are reported at four. Both use half-up rounding.

use rust_decimal::{Decimal, RoundingStrategy};

const MONEY_DP: u32 = 2;
const RATE_DP: u32 = 4;

/// Rounds a monetary value to two decimal places using half-up rounding.
///
/// Values at exactly 0.005 are rounded away from zero.
///
/// # Examples
///
/// ```
/// use rust_decimal_macros::dec;
/// use tax_core::calculations::common::round_money;
///
/// assert_eq!(round_money(dec!(123.454)), dec!(123.45));
/// assert_eq!(round_money(dec!(123.455)), dec!(123.46));
/// assert_eq!(round_money(dec!(-123.455)), dec!(-123.46)); // Away from zero
/// ```
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Rounds a rate (a fraction such as `0.1845`) to four decimal places.
///
/// # Examples
///
/// ```
/// use rust_decimal_macros::dec;
/// use tax_core::calculations::common::round_rate;
///
/// assert_eq!(round_rate(dec!(0.18454)), dec!(0.1845));
/// assert_eq!(round_rate(dec!(0.18455)), dec!(0.1846));
/// ```
pub fn round_rate(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(RATE_DP, RoundingStrategy::MidpointAwayFromZero)
}
