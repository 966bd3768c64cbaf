use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ModelError;
use super::effective::{validate_window, window_contains};

/// Upper bound for percentage rates, expressed as a fraction.
const MAX_PERCENTAGE_RATE: Decimal = Decimal::TEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaxRateType {
    /// `rate` is a fraction of the taxable base.
    Percentage,
    /// `rate` is an absolute currency amount, independent of the base.
    Fixed,
}

impl TaxRateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::Fixed => "fixed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "percentage" => Some(Self::Percentage),
            "fixed" => Some(Self::Fixed),
            _ => None,
        }
    }

    /// Like [`TaxRateType::parse`], but unknown types are a configuration error.
    pub fn parse_strict(s: &str) -> Result<Self, ModelError> {
        Self::parse(s).ok_or_else(|| ModelError::UnknownRateType(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxRate {
    pub id: i64,
    pub tax_class_id: i64,
    pub name: String,
    pub code: String,
    pub rate: Decimal,
    pub rate_type: TaxRateType,
    pub country_code: String,
    pub region: Option<String>,
    pub is_compound: bool,
    pub priority: i32,
    pub effective_from: Option<NaiveDate>,
    pub effective_until: Option<NaiveDate>,
    pub is_active: bool,
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaxRate {
    pub fn is_effective_on(&self, date: NaiveDate) -> bool {
        window_contains(self.effective_from, self.effective_until, date)
    }

    pub fn is_applicable_on(&self, date: NaiveDate) -> bool {
        self.is_active && self.is_effective_on(date)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        validate_rate(self.rate, self.rate_type)?;
        validate_window(self.effective_from, self.effective_until)
    }

    /// Tax owed on `base` under this rate, or `None` if the product
    /// leaves the `Decimal` range.
    pub fn apply(&self, base: Decimal) -> Option<Decimal> {
        match self.rate_type {
            TaxRateType::Percentage => base.checked_mul(self.rate),
            TaxRateType::Fixed => Some(self.rate),
        }
    }
}

/// For creating new tax rates (no id or timestamps)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTaxRate {
    pub tax_class_id: i64,
    pub name: String,
    pub code: String,
    pub rate: Decimal,
    pub rate_type: TaxRateType,
    pub country_code: String,
    pub region: Option<String>,
    pub is_compound: bool,
    pub priority: i32,
    pub effective_from: Option<NaiveDate>,
    pub effective_until: Option<NaiveDate>,
    pub is_active: bool,
    pub metadata: BTreeMap<String, String>,
}

impl NewTaxRate {
    pub fn validate(&self) -> Result<(), ModelError> {
        validate_rate(self.rate, self.rate_type)?;
        validate_window(self.effective_from, self.effective_until)
    }
}

fn validate_rate(rate: Decimal, rate_type: TaxRateType) -> Result<(), ModelError> {
    if rate < Decimal::ZERO {
        return Err(ModelError::NegativeRate(rate));
    }
    if rate_type == TaxRateType::Percentage && rate > MAX_PERCENTAGE_RATE {
        return Err(ModelError::PercentageRateOutOfRange(rate));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn test_rate(rate: Decimal, rate_type: TaxRateType) -> TaxRate {
        TaxRate {
            id: 1,
            tax_class_id: 1,
            name: "KDV".to_string(),
            code: "tr-kdv-20".to_string(),
            rate,
            rate_type,
            country_code: "TR".to_string(),
            region: None,
            is_compound: false,
            priority: 0,
            effective_from: None,
            effective_until: None,
            is_active: true,
            metadata: BTreeMap::new(),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    #[test]
    fn parse_known_types() {
        assert_eq!(TaxRateType::parse("percentage"), Some(TaxRateType::Percentage));
        assert_eq!(TaxRateType::parse("fixed"), Some(TaxRateType::Fixed));
    }

    /// Unknown rate types are rejected outright instead of being treated as
    /// percentage or fixed; callers must fix the data.
    #[test]
    fn parse_strict_rejects_unknown_type() {
        assert_eq!(
            TaxRateType::parse_strict("flat"),
            Err(ModelError::UnknownRateType("flat".to_string()))
        );
    }

    #[test]
    fn percentage_applies_to_base() {
        let rate = test_rate(dec!(0.18), TaxRateType::Percentage);

        assert_eq!(rate.apply(dec!(250.00)), Some(dec!(45.0000)));
    }

    #[test]
    fn percentage_of_huge_base_overflows_to_none() {
        let rate = test_rate(dec!(10), TaxRateType::Percentage);

        assert_eq!(rate.apply(Decimal::MAX), None);
    }

    #[test]
    fn fixed_ignores_base() {
        let rate = test_rate(dec!(2.50), TaxRateType::Fixed);

        assert_eq!(rate.apply(dec!(1000)), Some(dec!(2.50)));
        assert_eq!(rate.apply(Decimal::MAX), Some(dec!(2.50)));
    }

    #[test]
    fn validate_rejects_negative_rate() {
        let rate = test_rate(dec!(-1), TaxRateType::Fixed);

        assert_eq!(rate.validate(), Err(ModelError::NegativeRate(dec!(-1))));
    }

    #[test]
    fn validate_rejects_percentage_above_ten() {
        let rate = test_rate(dec!(18), TaxRateType::Percentage);

        assert_eq!(
            rate.validate(),
            Err(ModelError::PercentageRateOutOfRange(dec!(18)))
        );
    }

    #[test]
    fn validate_allows_large_fixed_amounts() {
        let rate = test_rate(dec!(18), TaxRateType::Fixed);

        assert_eq!(rate.validate(), Ok(()));
    }

    #[test]
    fn inactive_rate_is_not_applicable() {
        let mut rate = test_rate(dec!(0.20), TaxRateType::Percentage);
        rate.is_active = false;

        assert!(rate.is_effective_on(date(2025, 1, 1)));
        assert!(!rate.is_applicable_on(date(2025, 1, 1)));
    }

    #[test]
    fn rate_outside_window_is_not_applicable() {
        let mut rate = test_rate(dec!(0.20), TaxRateType::Percentage);
        rate.effective_from = Some(date(2023, 7, 10));

        assert!(!rate.is_applicable_on(date(2023, 7, 9)));
        assert!(rate.is_applicable_on(date(2023, 7, 10)));
    }
}
