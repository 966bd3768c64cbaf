use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::effective::{validate_window, window_contains};
use super::{CustomerType, EntityRef, ModelError, TaxClass, TaxRate};

/// Extra matching conditions stored alongside a rule.
///
/// `is_export` is the only key the engine interprets. Anything else is kept
/// verbatim in `extra` so admin tooling can round-trip it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleConditions {
    /// Export-only rules are skipped unless the caller opts in.
    #[serde(default)]
    pub is_export: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RuleConditions {
    pub fn export_only() -> Self {
        Self {
            is_export: true,
            ..Self::default()
        }
    }

    /// Parses the stored JSON blob. Empty input and `null` mean "no conditions".
    pub fn from_json(raw: &str) -> Result<Self, ModelError> {
        let raw = raw.trim();
        if raw.is_empty() || raw == "null" {
            return Ok(Self::default());
        }
        serde_json::from_str(raw).map_err(|e| ModelError::InvalidConditions(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, ModelError> {
        serde_json::to_string(self).map_err(|e| ModelError::InvalidConditions(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxRule {
    pub id: i64,
    pub tax_rate_id: i64,
    pub entity: EntityRef,
    pub country_code: String,
    pub region: Option<String>,
    pub postal_code_from: Option<String>,
    pub postal_code_to: Option<String>,
    pub customer_type: Option<CustomerType>,
    pub order_amount_from: Option<Decimal>,
    pub order_amount_to: Option<Decimal>,
    pub priority: i32,
    pub stop_processing: bool,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub is_active: bool,
    pub conditions: RuleConditions,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaxRule {
    pub fn is_effective_on(&self, date: NaiveDate) -> bool {
        window_contains(self.date_from, self.date_to, date)
    }

    pub fn is_export_only(&self) -> bool {
        self.conditions.is_export
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        validate_rule_bounds(
            self.date_from,
            self.date_to,
            self.order_amount_from,
            self.order_amount_to,
        )
    }
}

/// For creating new tax rules (no id or timestamps)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTaxRule {
    pub tax_rate_id: i64,
    pub entity: EntityRef,
    pub country_code: String,
    pub region: Option<String>,
    pub postal_code_from: Option<String>,
    pub postal_code_to: Option<String>,
    pub customer_type: Option<CustomerType>,
    pub order_amount_from: Option<Decimal>,
    pub order_amount_to: Option<Decimal>,
    pub priority: i32,
    pub stop_processing: bool,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub is_active: bool,
    pub conditions: RuleConditions,
    pub description: Option<String>,
}

impl NewTaxRule {
    pub fn validate(&self) -> Result<(), ModelError> {
        validate_rule_bounds(
            self.date_from,
            self.date_to,
            self.order_amount_from,
            self.order_amount_to,
        )
    }
}

fn validate_rule_bounds(
    date_from: Option<NaiveDate>,
    date_to: Option<NaiveDate>,
    amount_from: Option<Decimal>,
    amount_to: Option<Decimal>,
) -> Result<(), ModelError> {
    validate_window(date_from, date_to)?;
    match (amount_from, amount_to) {
        (Some(from), Some(to)) if from > to => Err(ModelError::InvalidAmountBand { from, to }),
        _ => Ok(()),
    }
}

/// A rule joined with the rate it activates and that rate's class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundTaxRule {
    pub rule: TaxRule,
    pub rate: TaxRate,
    pub tax_class: TaxClass,
}

impl BoundTaxRule {
    /// Both the rule and its rate must be switched on and inside their windows.
    pub fn is_candidate_on(&self, date: NaiveDate) -> bool {
        self.rule.is_active && self.rule.is_effective_on(date) && self.rate.is_applicable_on(date)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn conditions_from_empty_and_null_are_default() {
        assert_eq!(RuleConditions::from_json(""), Ok(RuleConditions::default()));
        assert_eq!(RuleConditions::from_json(" null "), Ok(RuleConditions::default()));
    }

    #[test]
    fn conditions_keep_unknown_keys() {
        let parsed = RuleConditions::from_json(r#"{"is_export":true,"channel":"b2b"}"#)
            .expect("valid conditions");

        assert!(parsed.is_export);
        assert_eq!(
            parsed.extra.get("channel"),
            Some(&serde_json::Value::String("b2b".to_string()))
        );
    }

    #[test]
    fn conditions_reject_non_boolean_export_flag() {
        let result = RuleConditions::from_json(r#"{"is_export":"yes"}"#);

        assert!(
            matches!(result, Err(ModelError::InvalidConditions(_))),
            "got {result:?}"
        );
    }

    #[test]
    fn conditions_survive_json_round_trip() {
        let mut conditions = RuleConditions::export_only();
        conditions
            .extra
            .insert("note".to_string(), serde_json::json!({"free_zone": true}));

        let json = conditions.to_json().expect("serializable");

        assert_eq!(RuleConditions::from_json(&json), Ok(conditions));
    }

    #[test]
    fn new_rule_rejects_inverted_amount_band() {
        let rule = NewTaxRule {
            tax_rate_id: 1,
            entity: EntityRef::Product(None),
            country_code: "TR".to_string(),
            region: None,
            postal_code_from: None,
            postal_code_to: None,
            customer_type: None,
            order_amount_from: Some(dec!(100)),
            order_amount_to: Some(dec!(50)),
            priority: 0,
            stop_processing: false,
            date_from: None,
            date_to: None,
            is_active: true,
            conditions: RuleConditions::default(),
            description: None,
        };

        assert_eq!(
            rule.validate(),
            Err(ModelError::InvalidAmountBand {
                from: dec!(100),
                to: dec!(50),
            })
        );
    }
}
