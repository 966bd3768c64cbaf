mod effective;
mod entity;
mod error;
mod tax_class;
mod tax_rate;
mod tax_rule;

pub use effective::window_contains;
pub use entity::{CustomerType, EntityRef, EntityType};
pub use error::ModelError;
pub use tax_class::{NewTaxClass, TaxClass, slugify};
pub use tax_rate::{NewTaxRate, TaxRate, TaxRateType};
pub use tax_rule::{BoundTaxRule, NewTaxRule, RuleConditions, TaxRule};
