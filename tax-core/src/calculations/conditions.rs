//! Caller-supplied context for a tax calculation.
//!
//! Every field is optional. An absent field places no constraint on rules,
//! with one exception: a rule pinned to a specific entity id only matches a
//! caller naming that id (see [`EntityRef::accepts`]).

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{CustomerType, EntityRef, ModelError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxConditions {
    pub entity: Option<EntityRef>,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub customer_type: Option<CustomerType>,
    pub order_amount: Option<Decimal>,
    /// Opt-in for export-only rules.
    pub is_export: bool,
    /// Date rules and rates are evaluated at. Today (UTC) when absent.
    pub evaluation_date: Option<NaiveDate>,
}

impl TaxConditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(mut self, entity: EntityRef) -> Self {
        self.entity = Some(entity);
        self
    }

    pub fn country(mut self, country_code: impl Into<String>) -> Self {
        self.country_code = Some(country_code.into());
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn postal_code(mut self, postal_code: impl Into<String>) -> Self {
        self.postal_code = Some(postal_code.into());
        self
    }

    pub fn customer_type(mut self, customer_type: CustomerType) -> Self {
        self.customer_type = Some(customer_type);
        self
    }

    pub fn order_amount(mut self, amount: Decimal) -> Self {
        self.order_amount = Some(amount);
        self
    }

    pub fn export(mut self, is_export: bool) -> Self {
        self.is_export = is_export;
        self
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.evaluation_date = Some(date);
        self
    }

    pub fn date_or_today(&self) -> NaiveDate {
        self.evaluation_date
            .unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Builds conditions from a loosely-typed JSON object, as produced by
    /// cart and pricing callers.
    ///
    /// Recognised keys: `entity_type`, `entity_id`, `country_code`, `region`,
    /// `postal_code`, `customer_type`, `order_amount`, `is_export`, `date`.
    /// Unrecognised keys are ignored; recognised ones must have the right type.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ModelError> {
        let raw: RawConditions = serde_json::from_value(value)
            .map_err(|e| ModelError::InvalidConditions(e.to_string()))?;

        let entity = match (raw.entity_type.as_deref(), raw.entity_id) {
            (Some(kind), id) => Some(EntityRef::from_parts(kind, id)?),
            (None, None) => None,
            (None, Some(_)) => {
                return Err(ModelError::InvalidConditions(
                    "entity_id given without entity_type".to_string(),
                ));
            }
        };

        let customer_type = raw
            .customer_type
            .map(|s| CustomerType::parse(&s).ok_or(ModelError::UnknownCustomerType(s)))
            .transpose()?;

        Ok(Self {
            entity,
            country_code: raw.country_code,
            region: raw.region,
            postal_code: raw.postal_code,
            customer_type,
            order_amount: raw.order_amount,
            is_export: raw.is_export.unwrap_or(false),
            evaluation_date: raw.date,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawConditions {
    entity_type: Option<String>,
    entity_id: Option<i64>,
    country_code: Option<String>,
    region: Option<String>,
    postal_code: Option<String>,
    customer_type: Option<String>,
    order_amount: Option<Decimal>,
    is_export: Option<bool>,
    date: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::*;

    #[test]
    fn builder_sets_fields() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let conditions = TaxConditions::new()
            .entity(EntityRef::Product(Some(9)))
            .country("TR")
            .region("34")
            .postal_code("34000")
            .customer_type(CustomerType::Company)
            .order_amount(dec!(120))
            .export(true)
            .on(date);

        assert_eq!(
            conditions,
            TaxConditions {
                entity: Some(EntityRef::Product(Some(9))),
                country_code: Some("TR".to_string()),
                region: Some("34".to_string()),
                postal_code: Some("34000".to_string()),
                customer_type: Some(CustomerType::Company),
                order_amount: Some(dec!(120)),
                is_export: true,
                evaluation_date: Some(date),
            }
        );
        assert_eq!(conditions.date_or_today(), date);
    }

    #[test]
    fn from_json_reads_known_keys() {
        let conditions = TaxConditions::from_json(json!({
            "entity_type": "product",
            "entity_id": 12,
            "country_code": "TR",
            "customer_type": "individual",
            "order_amount": "75.50",
            "is_export": false,
            "date": "2025-05-01",
            "currency": "TRY"
        }))
        .expect("valid conditions");

        assert_eq!(conditions.entity, Some(EntityRef::Product(Some(12))));
        assert_eq!(conditions.country_code.as_deref(), Some("TR"));
        assert_eq!(conditions.customer_type, Some(CustomerType::Individual));
        assert_eq!(conditions.order_amount, Some(dec!(75.50)));
        assert!(!conditions.is_export);
        assert_eq!(
            conditions.evaluation_date,
            NaiveDate::from_ymd_opt(2025, 5, 1)
        );
    }

    #[test]
    fn from_json_defaults_missing_export_flag_to_false() {
        let conditions = TaxConditions::from_json(json!({"entity_type": "shipping"}))
            .expect("valid conditions");

        assert_eq!(conditions.entity, Some(EntityRef::Shipping));
        assert!(!conditions.is_export);
    }

    #[test]
    fn from_json_rejects_non_boolean_export_flag() {
        let result = TaxConditions::from_json(json!({"is_export": "true"}));

        assert!(matches!(result, Err(ModelError::InvalidConditions(_))));
    }

    #[test]
    fn from_json_rejects_unknown_customer_type() {
        let result = TaxConditions::from_json(json!({"customer_type": "reseller"}));

        assert_eq!(
            result,
            Err(ModelError::UnknownCustomerType("reseller".to_string()))
        );
    }

    #[test]
    fn from_json_rejects_id_without_type() {
        let result = TaxConditions::from_json(json!({"entity_id": 4}));

        assert!(matches!(result, Err(ModelError::InvalidConditions(_))));
    }
}
