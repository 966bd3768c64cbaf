//! Identifier validation.

mod tax_number;

pub use tax_number::{
    TaxNumberKind, format_tax_number, validate_corporate_tax_number, validate_personal_tax_number,
    validate_tax_number,
};
