//! CSV bulk loading for tax rates and tax rules.
//!
//! ## Rates
//!
//! | Column            | Required | Notes |
//! |-------------------|----------|-------|
//! | `tax_class_code`  | yes      | Code of an existing tax class |
//! | `code`            | yes      | Unique rate code; an existing rate with this code is updated |
//! | `name`            | yes      | |
//! | `rate`            | yes      | Fraction for `percentage` (`0.20`), amount for `fixed` |
//! | `type`            | yes      | `percentage` or `fixed` |
//! | `country_code`    | yes      | |
//! | `region`          | no       | |
//! | `is_compound`     | no       | `true`/`false`/`1`/`0`, empty is false |
//! | `priority`        | no       | empty is 0 |
//! | `effective_from`  | no       | `YYYY-MM-DD` |
//! | `effective_until` | no       | `YYYY-MM-DD` |
//!
//! ## Rules
//!
//! `tax_rate_code,entity_type,entity_id,country_code,region,postal_code_from,
//! postal_code_to,customer_type,order_amount_from,order_amount_to,priority,
//! stop_processing,date_from,date_to,is_export,description`
//!
//! Rules have no natural key, so loading the same rule file twice creates
//! the rules twice.
//!
//! Every row is converted and validated before anything is written; an
//! unknown `type`, `entity_type` or `customer_type` aborts the whole load
//! with the offending line number.
//!
//! The writes themselves are not atomic. Rows are stored one at a time, and
//! a storage failure part-way stops the load with
//! [`TaxDataLoaderError::Write`], which names the failing line and how many
//! rows were already stored. Rerunning a rate file after such a failure is
//! safe since rates are matched by code. Rerunning a rule file duplicates
//! the rules stored before the failure; load only the rows after them.

use std::collections::BTreeMap;
use std::io::Read;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use tax_core::{
    CustomerType, EntityRef, ModelError, NewTaxRate, NewTaxRule, RepositoryError, RuleConditions,
    TaxRateType, TaxRepository,
};
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur when loading tax rate and rule data.
#[derive(Debug, Error)]
pub enum TaxDataLoaderError {
    #[error("CSV parse error: {0}")]
    CsvParse(String),

    /// `line` counts the header as line 1.
    #[error("line {line}: {source}")]
    InvalidRow {
        line: usize,
        #[source]
        source: ModelError,
    },

    #[error("line {line}: tax class '{code}' not found in database (have you run the seeds?)")]
    TaxClassNotFound { line: usize, code: String },

    #[error("line {line}: tax rate '{code}' not found in database (load rates first)")]
    TaxRateNotFound { line: usize, code: String },

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Storing `line` failed; the `written` rows before it stay stored.
    #[error("line {line}: write failed after {written} row(s) were stored: {source}")]
    Write {
        line: usize,
        written: usize,
        #[source]
        source: RepositoryError,
    },
}

impl From<csv::Error> for TaxDataLoaderError {
    fn from(err: csv::Error) -> Self {
        TaxDataLoaderError::CsvParse(err.to_string())
    }
}

fn deserialize_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.trim().parse::<Decimal>().map_err(serde::de::Error::custom)
}

fn deserialize_optional_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    match s {
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => s
            .trim()
            .parse::<Decimal>()
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

/// Empty cells are `false`.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    match s.as_deref().map(str::trim).map(str::to_ascii_lowercase).as_deref() {
        None | Some("") | Some("0") | Some("false") | Some("no") => Ok(false),
        Some("1") | Some("true") | Some("yes") => Ok(true),
        Some(other) => Err(serde::de::Error::custom(format!(
            "invalid flag '{other}' (expected true/false)"
        ))),
    }
}

/// A single record from the tax rates CSV file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TaxRateRecord {
    pub tax_class_code: String,
    pub code: String,
    pub name: String,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub rate: Decimal,
    #[serde(rename = "type")]
    pub rate_type: String,
    pub country_code: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub is_compound: bool,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub effective_from: Option<NaiveDate>,
    #[serde(default)]
    pub effective_until: Option<NaiveDate>,
}

impl TaxRateRecord {
    /// Converts and validates the row for a class that has already been resolved.
    pub fn to_new_rate(&self, tax_class_id: i64) -> Result<NewTaxRate, ModelError> {
        let rate = NewTaxRate {
            tax_class_id,
            name: self.name.clone(),
            code: self.code.clone(),
            rate: self.rate,
            rate_type: TaxRateType::parse_strict(&self.rate_type)?,
            country_code: self.country_code.clone(),
            region: self.region.clone(),
            is_compound: self.is_compound,
            priority: self.priority.unwrap_or(0),
            effective_from: self.effective_from,
            effective_until: self.effective_until,
            is_active: true,
            metadata: BTreeMap::new(),
        };
        rate.validate()?;
        Ok(rate)
    }
}

/// A single record from the tax rules CSV file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TaxRuleRecord {
    pub tax_rate_code: String,
    pub entity_type: String,
    #[serde(default)]
    pub entity_id: Option<i64>,
    pub country_code: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub postal_code_from: Option<String>,
    #[serde(default)]
    pub postal_code_to: Option<String>,
    #[serde(default)]
    pub customer_type: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    pub order_amount_from: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    pub order_amount_to: Option<Decimal>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub stop_processing: bool,
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    #[serde(default)]
    pub date_to: Option<NaiveDate>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub is_export: bool,
    #[serde(default)]
    pub description: Option<String>,
}

impl TaxRuleRecord {
    pub fn to_new_rule(&self, tax_rate_id: i64) -> Result<NewTaxRule, ModelError> {
        let customer_type = self
            .customer_type
            .as_deref()
            .map(|s| CustomerType::parse(s).ok_or_else(|| ModelError::UnknownCustomerType(s.to_string())))
            .transpose()?;

        let conditions = if self.is_export {
            RuleConditions::export_only()
        } else {
            RuleConditions::default()
        };

        let rule = NewTaxRule {
            tax_rate_id,
            entity: EntityRef::from_parts(&self.entity_type, self.entity_id)?,
            country_code: self.country_code.clone(),
            region: self.region.clone(),
            postal_code_from: self.postal_code_from.clone(),
            postal_code_to: self.postal_code_to.clone(),
            customer_type,
            order_amount_from: self.order_amount_from,
            order_amount_to: self.order_amount_to,
            priority: self.priority.unwrap_or(0),
            stop_processing: self.stop_processing,
            date_from: self.date_from,
            date_to: self.date_to,
            is_active: true,
            conditions,
            description: self.description.clone(),
        };
        rule.validate()?;
        Ok(rule)
    }
}

/// Counts from a rate load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLoadSummary {
    pub created: usize,
    pub updated: usize,
}

/// Loader for tax rate and rule data from CSV files.
///
/// Writes go through the [`TaxRepository`] trait, so any backend works.
/// Callers holding a [`tax_core::TaxCache`] must invalidate it afterwards.
pub struct TaxDataLoader;

impl TaxDataLoader {
    fn reader<R: Read>(reader: R) -> csv::Reader<R> {
        csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader)
    }

    /// Parse tax rate records from a CSV reader.
    pub fn parse_rates<R: Read>(reader: R) -> Result<Vec<TaxRateRecord>, TaxDataLoaderError> {
        let mut records = Vec::new();
        for result in Self::reader(reader).deserialize() {
            let record: TaxRateRecord = result?;
            records.push(record);
        }
        Ok(records)
    }

    /// Parse tax rule records from a CSV reader.
    pub fn parse_rules<R: Read>(reader: R) -> Result<Vec<TaxRuleRecord>, TaxDataLoaderError> {
        let mut records = Vec::new();
        for result in Self::reader(reader).deserialize() {
            let record: TaxRuleRecord = result?;
            records.push(record);
        }
        Ok(records)
    }

    /// Load tax rate records, creating new rates and updating existing ones
    /// by code. Running the same file twice leaves the database unchanged.
    pub async fn load_rates<R: TaxRepository + ?Sized>(
        repo: &R,
        records: &[TaxRateRecord],
    ) -> Result<RateLoadSummary, TaxDataLoaderError> {
        let mut rates = Vec::with_capacity(records.len());
        for (idx, record) in records.iter().enumerate() {
            let line = idx + 2;
            let class = repo
                .get_tax_class_by_code(&record.tax_class_code)
                .await
                .map_err(|e| match e {
                    RepositoryError::NotFound => TaxDataLoaderError::TaxClassNotFound {
                        line,
                        code: record.tax_class_code.clone(),
                    },
                    other => TaxDataLoaderError::Repository(other),
                })?;
            let rate = record
                .to_new_rate(class.id)
                .map_err(|source| TaxDataLoaderError::InvalidRow { line, source })?;
            rates.push((line, rate));
        }

        let mut summary = RateLoadSummary::default();
        for (line, rate) in rates {
            let written = summary.created + summary.updated;
            let write_failed = |source| TaxDataLoaderError::Write {
                line,
                written,
                source,
            };
            match repo.get_tax_rate_by_code(&rate.code).await {
                Ok(existing) => {
                    let updated = tax_core::TaxRate {
                        tax_class_id: rate.tax_class_id,
                        name: rate.name,
                        rate: rate.rate,
                        rate_type: rate.rate_type,
                        country_code: rate.country_code,
                        region: rate.region,
                        is_compound: rate.is_compound,
                        priority: rate.priority,
                        effective_from: rate.effective_from,
                        effective_until: rate.effective_until,
                        ..existing
                    };
                    repo.update_tax_rate(&updated).await.map_err(write_failed)?;
                    debug!(code = %updated.code, "updated tax rate");
                    summary.updated += 1;
                }
                Err(RepositoryError::NotFound) => {
                    let created = repo.create_tax_rate(rate).await.map_err(write_failed)?;
                    debug!(code = %created.code, id = created.id, "created tax rate");
                    summary.created += 1;
                }
                Err(e) => return Err(write_failed(e)),
            }
        }

        info!(
            created = summary.created,
            updated = summary.updated,
            "loaded tax rates"
        );
        Ok(summary)
    }

    /// Load tax rule records. Returns the number of rules created.
    pub async fn load_rules<R: TaxRepository + ?Sized>(
        repo: &R,
        records: &[TaxRuleRecord],
    ) -> Result<usize, TaxDataLoaderError> {
        let mut rules = Vec::with_capacity(records.len());
        for (idx, record) in records.iter().enumerate() {
            let line = idx + 2;
            let rate = repo
                .get_tax_rate_by_code(&record.tax_rate_code)
                .await
                .map_err(|e| match e {
                    RepositoryError::NotFound => TaxDataLoaderError::TaxRateNotFound {
                        line,
                        code: record.tax_rate_code.clone(),
                    },
                    other => TaxDataLoaderError::Repository(other),
                })?;
            let rule = record
                .to_new_rule(rate.id)
                .map_err(|source| TaxDataLoaderError::InvalidRow { line, source })?;
            rules.push((line, rule));
        }

        let mut inserted = 0;
        for (line, rule) in rules {
            repo.create_tax_rule(rule)
                .await
                .map_err(|source| TaxDataLoaderError::Write {
                    line,
                    written: inserted,
                    source,
                })?;
            inserted += 1;
        }

        info!(rules = inserted, "loaded tax rules");
        Ok(inserted)
    }
}
