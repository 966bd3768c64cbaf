//! Rule matching predicate.
//!
//! A rule field that is unset matches anything. A caller field that is unset
//! places no constraint, except for pinned entity ids.

use rust_decimal::Decimal;

use super::TaxConditions;
use crate::models::TaxRule;

/// Whether `rule` applies to the caller's `conditions`.
///
/// Activity and effective windows are checked separately; this is only the
/// field-by-field comparison plus the export gate.
pub fn rule_matches(rule: &TaxRule, conditions: &TaxConditions) -> bool {
    export_allowed(rule, conditions)
        && rule.entity.accepts(conditions.entity.as_ref())
        && country_matches(rule, conditions)
        && optional_eq(rule.region.as_ref(), conditions.region.as_ref())
        && postal_code_matches(rule, conditions)
        && optional_eq(rule.customer_type.as_ref(), conditions.customer_type.as_ref())
        && order_amount_matches(rule, conditions.order_amount)
}

/// Export rules are opt-in; a caller that does not say `is_export` never gets them.
fn export_allowed(rule: &TaxRule, conditions: &TaxConditions) -> bool {
    !rule.is_export_only() || conditions.is_export
}

fn country_matches(rule: &TaxRule, conditions: &TaxConditions) -> bool {
    conditions
        .country_code
        .as_deref()
        .is_none_or(|country| rule.country_code == country)
}

fn optional_eq<T: PartialEq>(rule: Option<&T>, caller: Option<&T>) -> bool {
    match (rule, caller) {
        (Some(rule), Some(caller)) => rule == caller,
        _ => true,
    }
}

/// Only enforced when the rule carries both bounds. Compared as strings so
/// that stored formats (leading zeros, letters) order the way they were entered.
fn postal_code_matches(rule: &TaxRule, conditions: &TaxConditions) -> bool {
    match (
        rule.postal_code_from.as_deref(),
        rule.postal_code_to.as_deref(),
        conditions.postal_code.as_deref(),
    ) {
        (Some(from), Some(to), Some(code)) => from <= code && code <= to,
        _ => true,
    }
}

fn order_amount_matches(rule: &TaxRule, order_amount: Option<Decimal>) -> bool {
    let Some(amount) = order_amount else {
        return true;
    };
    rule.order_amount_from.is_none_or(|from| amount >= from)
        && rule.order_amount_to.is_none_or(|to| amount <= to)
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;

    use super::*;
    use crate::models::{CustomerType, EntityRef, RuleConditions};

    fn rule() -> TaxRule {
        TaxRule {
            id: 1,
            tax_rate_id: 1,
            entity: EntityRef::Product(None),
            country_code: "TR".to_string(),
            region: None,
            postal_code_from: None,
            postal_code_to: None,
            customer_type: None,
            order_amount_from: None,
            order_amount_to: None,
            priority: 0,
            stop_processing: false,
            date_from: None,
            date_to: None,
            is_active: true,
            conditions: RuleConditions::default(),
            description: None,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    #[test]
    fn unconstrained_rule_matches_empty_conditions() {
        assert!(rule_matches(&rule(), &TaxConditions::new()));
    }

    #[test]
    fn entity_type_must_agree() {
        let conditions = TaxConditions::new().entity(EntityRef::Shipping);

        assert!(!rule_matches(&rule(), &conditions));
    }

    #[test]
    fn pinned_entity_requires_exact_id() {
        let mut pinned = rule();
        pinned.entity = EntityRef::Product(Some(5));

        assert!(rule_matches(
            &pinned,
            &TaxConditions::new().entity(EntityRef::Product(Some(5)))
        ));
        assert!(!rule_matches(
            &pinned,
            &TaxConditions::new().entity(EntityRef::Product(Some(6)))
        ));
        assert!(!rule_matches(&pinned, &TaxConditions::new()));
    }

    #[test]
    fn country_is_exact() {
        assert!(rule_matches(&rule(), &TaxConditions::new().country("TR")));
        assert!(!rule_matches(&rule(), &TaxConditions::new().country("DE")));
        assert!(!rule_matches(&rule(), &TaxConditions::new().country("tr")));
    }

    #[test]
    fn region_only_checked_when_both_sides_set() {
        let mut regional = rule();
        regional.region = Some("34".to_string());

        assert!(rule_matches(&regional, &TaxConditions::new().region("34")));
        assert!(!rule_matches(&regional, &TaxConditions::new().region("06")));
        assert!(rule_matches(&regional, &TaxConditions::new()));
        assert!(rule_matches(&rule(), &TaxConditions::new().region("06")));
    }

    #[test]
    fn postal_range_is_inclusive_string_comparison() {
        let mut ranged = rule();
        ranged.postal_code_from = Some("34000".to_string());
        ranged.postal_code_to = Some("34999".to_string());

        for inside in ["34000", "34500", "34999"] {
            assert!(
                rule_matches(&ranged, &TaxConditions::new().postal_code(inside)),
                "{inside} should be inside the range"
            );
        }
        for outside in ["33999", "35000", "06100"] {
            assert!(
                !rule_matches(&ranged, &TaxConditions::new().postal_code(outside)),
                "{outside} should be outside the range"
            );
        }
        assert!(rule_matches(&ranged, &TaxConditions::new()));
    }

    #[test]
    fn postal_range_skipped_with_single_bound() {
        let mut half = rule();
        half.postal_code_from = Some("34000".to_string());

        assert!(rule_matches(&half, &TaxConditions::new().postal_code("01000")));
    }

    #[test]
    fn customer_type_must_agree_when_both_set() {
        let mut company_only = rule();
        company_only.customer_type = Some(CustomerType::Company);

        assert!(rule_matches(
            &company_only,
            &TaxConditions::new().customer_type(CustomerType::Company)
        ));
        assert!(!rule_matches(
            &company_only,
            &TaxConditions::new().customer_type(CustomerType::Individual)
        ));
    }

    #[test]
    fn order_amount_band_is_inclusive() {
        let mut banded = rule();
        banded.order_amount_from = Some(dec!(50));
        banded.order_amount_to = Some(dec!(100));

        let at = |amount| rule_matches(&banded, &TaxConditions::new().order_amount(amount));

        assert!(at(dec!(50)));
        assert!(at(dec!(100)));
        assert!(!at(dec!(49.99)));
        assert!(!at(dec!(100.01)));
    }

    #[test]
    fn open_ended_amount_band() {
        let mut minimum_only = rule();
        minimum_only.order_amount_from = Some(dec!(1000));

        assert!(rule_matches(
            &minimum_only,
            &TaxConditions::new().order_amount(dec!(1000000))
        ));
        assert!(!rule_matches(
            &minimum_only,
            &TaxConditions::new().order_amount(dec!(999.99))
        ));
        assert!(rule_matches(&minimum_only, &TaxConditions::new()));
    }

    /// Export rules must never leak into domestic checkouts.
    #[test]
    fn export_rules_are_opt_in() {
        let mut export = rule();
        export.conditions = RuleConditions::export_only();

        assert!(!rule_matches(&export, &TaxConditions::new()));
        assert!(!rule_matches(&export, &TaxConditions::new().export(false)));
        assert!(rule_matches(&export, &TaxConditions::new().export(true)));
    }

    #[test]
    fn domestic_rules_still_apply_to_exports() {
        assert!(rule_matches(&rule(), &TaxConditions::new().export(true)));
    }
}
