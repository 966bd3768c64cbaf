use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ModelError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxClass {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    /// Fraction applied when no rule matches (0.20 = 20%).
    pub default_rate: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaxClass {
    pub fn validate(&self) -> Result<(), ModelError> {
        validate_default_rate(self.default_rate)
    }
}

/// For creating new tax classes (no id or timestamps)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTaxClass {
    pub name: String,
    /// Derived from `name` when absent.
    pub code: Option<String>,
    pub description: Option<String>,
    pub default_rate: Decimal,
    pub is_active: bool,
}

impl NewTaxClass {
    pub fn validate(&self) -> Result<(), ModelError> {
        validate_default_rate(self.default_rate)
    }

    pub fn resolved_code(&self) -> String {
        match &self.code {
            Some(code) if !code.trim().is_empty() => code.trim().to_string(),
            _ => slugify(&self.name),
        }
    }
}

fn validate_default_rate(rate: Decimal) -> Result<(), ModelError> {
    if rate < Decimal::ZERO {
        return Err(ModelError::NegativeDefaultRate(rate));
    }
    Ok(())
}

/// Lowercase, hyphen-separated code for a class name.
///
/// Turkish letters are transliterated to ASCII; every other run of
/// non-alphanumeric characters becomes a single `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for ch in name.chars() {
        let mapped = match ch {
            'ç' | 'Ç' => Some('c'),
            'ğ' | 'Ğ' => Some('g'),
            'ı' | 'I' | 'İ' | 'i' => Some('i'),
            'ö' | 'Ö' => Some('o'),
            'ş' | 'Ş' => Some('s'),
            'ü' | 'Ü' => Some('u'),
            c if c.is_ascii_alphanumeric() => Some(c.to_ascii_lowercase()),
            _ => None,
        };

        match mapped {
            Some(c) => {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                slug.push(c);
            }
            None => pending_dash = true,
        }
    }

    slug
}
