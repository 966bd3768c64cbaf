//! Turkish tax identification numbers.
//!
//! | Kind      | Digits | Also known as |
//! |-----------|--------|---------------|
//! | Personal  | 11     | TCKN (T.C. Kimlik No) |
//! | Corporate | 10     | VKN (Vergi Kimlik No) |
//!
//! All functions accept free-form input: every character that is not an
//! ASCII digit is stripped first, so `"123 456 789 0"` and `"1234567890"`
//! are the same number. Malformed input is never an error; it just fails
//! validation.
//!
//! # Example
//!
//! ```
//! use tax_core::validation::{format_tax_number, validate_tax_number};
//!
//! assert!(validate_tax_number("100 000 001 46"));
//! assert!(!validate_tax_number("10000000147"));
//! assert_eq!(format_tax_number("10000000146"), "100 00 000 14 6");
//! ```

use serde::{Deserialize, Serialize};

const PERSONAL_LEN: usize = 11;
const CORPORATE_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaxNumberKind {
    Personal,
    Corporate,
}

impl TaxNumberKind {
    /// Classifies by digit count alone; says nothing about validity.
    pub fn detect(raw: &str) -> Option<Self> {
        match digits(raw).len() {
            PERSONAL_LEN => Some(Self::Personal),
            CORPORATE_LEN => Some(Self::Corporate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Corporate => "corporate",
        }
    }
}

fn digits(raw: &str) -> Vec<u32> {
    raw.chars().filter_map(|c| c.to_digit(10)).collect()
}

/// Validates an 11-digit personal number (TCKN).
///
/// * the first digit may not be zero
/// * digit 10 is `(7 * odd-position sum - even-position sum) mod 10` over the first nine
/// * digit 11 is the sum of the first ten digits mod 10
pub fn validate_personal_tax_number(raw: &str) -> bool {
    let d = digits(raw);
    if d.len() != PERSONAL_LEN || d[0] == 0 {
        return false;
    }

    let sum1: i64 = [d[0], d[2], d[4], d[6], d[8]].iter().map(|&x| i64::from(x)).sum();
    let sum2: i64 = [d[1], d[3], d[5], d[7]].iter().map(|&x| i64::from(x)).sum();

    let check1 = (sum1 * 7 - sum2).rem_euclid(10);
    if check1 != i64::from(d[9]) {
        return false;
    }

    let check2 = (sum1 + sum2 + i64::from(d[9])) % 10;
    check2 == i64::from(d[10])
}

/// Validates a 10-digit corporate number (VKN).
///
/// Each of the first nine digits is multiplied by its 1-based position; the
/// product's digits are summed, and the last digit must bring the total up
/// to a multiple of ten.
pub fn validate_corporate_tax_number(raw: &str) -> bool {
    let d = digits(raw);
    if d.len() != CORPORATE_LEN {
        return false;
    }

    let sum: u32 = d[..9]
        .iter()
        .zip(1..)
        .map(|(&digit, weight)| {
            let product = digit * weight;
            product % 10 + product / 10
        })
        .sum();

    (10 - sum % 10) % 10 == d[9]
}

/// Validates either kind, choosing by digit count.
pub fn validate_tax_number(raw: &str) -> bool {
    match TaxNumberKind::detect(raw) {
        Some(TaxNumberKind::Personal) => validate_personal_tax_number(raw),
        Some(TaxNumberKind::Corporate) => validate_corporate_tax_number(raw),
        None => false,
    }
}

/// Groups digits for display (`XXX XX XXX XX XX` / `XXX XXX XX XX`).
///
/// Presentation only: no checksum is verified. Input of any other length is
/// returned trimmed and otherwise untouched.
pub fn format_tax_number(raw: &str) -> String {
    let groups: &[usize] = match TaxNumberKind::detect(raw) {
        Some(TaxNumberKind::Personal) => &[3, 2, 3, 2, 1],
        Some(TaxNumberKind::Corporate) => &[3, 3, 2, 2],
        None => return raw.trim().to_string(),
    };

    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let mut formatted = String::with_capacity(digits.len() + groups.len());
    let mut start = 0;
    for &len in groups {
        if start > 0 {
            formatted.push(' ');
        }
        formatted.push_str(&digits[start..start + len]);
        start += len;
    }
    formatted
}
