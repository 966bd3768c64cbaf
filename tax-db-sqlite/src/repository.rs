use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tax_core::{
    BoundTaxRule, CustomerType, EntityRef, NewTaxClass, NewTaxRate, NewTaxRule, RepositoryError,
    RuleConditions, TaxClass, TaxRate, TaxRateType, TaxRepository, TaxRule,
};
use tracing::debug;

use crate::decimal::{decimal_to_text, get_decimal, get_optional_decimal};

const TAX_CLASS_COLUMNS: &str =
    "id, name, code, description, default_rate, is_active, created_at, updated_at";

const TAX_RATE_COLUMNS: &str = "id, tax_class_id, name, code, rate, type, country_code, region,
     is_compound, priority, effective_from, effective_until, is_active, metadata,
     created_at, updated_at";

const TAX_RULE_COLUMNS: &str = "id, tax_rate_id, entity_type, entity_id, country_code, region,
     postal_code_from, postal_code_to, customer_type, order_amount_from, order_amount_to,
     priority, stop_processing, date_from, date_to, is_active, conditions, description,
     created_at, updated_at";

pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Connects to `database_url`, creating the file if needed.
    ///
    /// Accepts sqlx URLs (`sqlite://tax.db`, `sqlite::memory:`) as well as
    /// bare paths and `:memory:`. An in-memory database lives on a single
    /// connection so that every query sees the same data.
    pub async fn new(database_url: &str) -> Result<Self> {
        let in_memory = database_url.contains(":memory:");
        let url = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else if in_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{database_url}")
        };

        let options = SqliteConnectOptions::from_str(&url)
            .with_context(|| format!("Invalid database URL: {}", database_url))?
            .create_if_missing(true)
            .foreign_keys(true);

        let mut pool_options = SqlitePoolOptions::new();
        if in_memory {
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to database: {}", database_url))?;
        Ok(Self { pool })
    }

    pub async fn new_with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    /// Load and execute all SQL seed files from the specified directory.
    /// Files are executed in alphabetical order by filename.
    pub async fn run_seeds(&self, seeds_dir: &Path) -> Result<()> {
        let mut entries: Vec<_> = std::fs::read_dir(seeds_dir)
            .with_context(|| format!("Failed to read seeds directory '{}'", seeds_dir.display()))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "sql"))
            .collect();

        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let path = entry.path();
            let sql = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read seed file '{}'", path.display()))?;

            sqlx::raw_sql(&sql)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to execute seed file '{}'", path.display()))?;
            debug!(seed = %path.display(), "applied seed file");
        }

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Constraint violations become [`RepositoryError::Conflict`]; everything
/// else is a plain database error.
fn db_error(e: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_foreign_key_violation() || db.is_unique_violation() {
            return RepositoryError::Conflict(db.message().to_string());
        }
    }
    RepositoryError::Database(e.to_string())
}

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(column)
        .map_err(|e| RepositoryError::Database(format!("Failed to get {}: {}", column, e)))
}

fn bad_config(what: &str, id: i64, detail: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Configuration(format!("{} {} is invalid: {}", what, id, detail))
}

fn metadata_to_json(metadata: &BTreeMap<String, String>) -> Result<String, RepositoryError> {
    serde_json::to_string(metadata).map_err(|e| RepositoryError::Database(e.to_string()))
}

fn conditions_to_json(conditions: &RuleConditions) -> Result<String, RepositoryError> {
    conditions
        .to_json()
        .map_err(|e| RepositoryError::Database(e.to_string()))
}

fn row_to_tax_class(row: &SqliteRow) -> Result<TaxClass, RepositoryError> {
    Ok(TaxClass {
        id: get(row, "id")?,
        name: get(row, "name")?,
        code: get(row, "code")?,
        description: get(row, "description")?,
        default_rate: get_decimal(row, "default_rate")?,
        is_active: get(row, "is_active")?,
        created_at: get::<DateTime<Utc>>(row, "created_at")?,
        updated_at: get::<DateTime<Utc>>(row, "updated_at")?,
    })
}

fn row_to_tax_rate(row: &SqliteRow) -> Result<TaxRate, RepositoryError> {
    let id: i64 = get(row, "id")?;

    let rate_type: String = get(row, "type")?;
    let rate_type =
        TaxRateType::parse_strict(&rate_type).map_err(|e| bad_config("tax rate", id, e))?;

    let metadata: Option<String> = get(row, "metadata")?;
    let metadata = match metadata.as_deref().map(str::trim) {
        None | Some("") => BTreeMap::new(),
        Some(json) => serde_json::from_str(json).map_err(|e| bad_config("tax rate", id, e))?,
    };

    Ok(TaxRate {
        id,
        tax_class_id: get(row, "tax_class_id")?,
        name: get(row, "name")?,
        code: get(row, "code")?,
        rate: get_decimal(row, "rate")?,
        rate_type,
        country_code: get(row, "country_code")?,
        region: get(row, "region")?,
        is_compound: get(row, "is_compound")?,
        priority: get(row, "priority")?,
        effective_from: get::<Option<NaiveDate>>(row, "effective_from")?,
        effective_until: get::<Option<NaiveDate>>(row, "effective_until")?,
        is_active: get(row, "is_active")?,
        metadata,
        created_at: get::<DateTime<Utc>>(row, "created_at")?,
        updated_at: get::<DateTime<Utc>>(row, "updated_at")?,
    })
}

fn row_to_tax_rule(row: &SqliteRow) -> Result<TaxRule, RepositoryError> {
    let id: i64 = get(row, "id")?;

    let entity_type: String = get(row, "entity_type")?;
    let entity = EntityRef::from_parts(&entity_type, get(row, "entity_id")?)
        .map_err(|e| bad_config("tax rule", id, e))?;

    let customer_type = get::<Option<String>>(row, "customer_type")?
        .map(|s| {
            CustomerType::parse(&s)
                .ok_or_else(|| bad_config("tax rule", id, format!("unknown customer type '{s}'")))
        })
        .transpose()?;

    let conditions: Option<String> = get(row, "conditions")?;
    let conditions = RuleConditions::from_json(conditions.as_deref().unwrap_or_default())
        .map_err(|e| bad_config("tax rule", id, e))?;

    Ok(TaxRule {
        id,
        tax_rate_id: get(row, "tax_rate_id")?,
        entity,
        country_code: get(row, "country_code")?,
        region: get(row, "region")?,
        postal_code_from: get(row, "postal_code_from")?,
        postal_code_to: get(row, "postal_code_to")?,
        customer_type,
        order_amount_from: get_optional_decimal(row, "order_amount_from")?,
        order_amount_to: get_optional_decimal(row, "order_amount_to")?,
        priority: get(row, "priority")?,
        stop_processing: get(row, "stop_processing")?,
        date_from: get::<Option<NaiveDate>>(row, "date_from")?,
        date_to: get::<Option<NaiveDate>>(row, "date_to")?,
        is_active: get(row, "is_active")?,
        conditions,
        description: get(row, "description")?,
        created_at: get::<DateTime<Utc>>(row, "created_at")?,
        updated_at: get::<DateTime<Utc>>(row, "updated_at")?,
    })
}

#[async_trait]
impl TaxRepository for SqliteRepository {
    // =========================================================================
    // tax classes
    // =========================================================================

    async fn create_tax_class(&self, class: NewTaxClass) -> Result<TaxClass, RepositoryError> {
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO tax_classes (
                name, code, description, default_rate, is_active, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&class.name)
        .bind(class.resolved_code())
        .bind(&class.description)
        .bind(decimal_to_text(class.default_rate))
        .bind(class.is_active)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        self.get_tax_class(result.last_insert_rowid()).await
    }

    async fn get_tax_class(&self, id: i64) -> Result<TaxClass, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TAX_CLASS_COLUMNS} FROM tax_classes WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or(RepositoryError::NotFound)?;

        row_to_tax_class(&row)
    }

    async fn get_tax_class_by_code(&self, code: &str) -> Result<TaxClass, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TAX_CLASS_COLUMNS} FROM tax_classes WHERE code = ?"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or(RepositoryError::NotFound)?;

        row_to_tax_class(&row)
    }

    async fn list_tax_classes(&self) -> Result<Vec<TaxClass>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TAX_CLASS_COLUMNS} FROM tax_classes ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(row_to_tax_class).collect()
    }

    async fn update_tax_class(&self, class: &TaxClass) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE tax_classes SET
                name = ?, code = ?, description = ?, default_rate = ?, is_active = ?,
                updated_at = ?
             WHERE id = ?",
        )
        .bind(&class.name)
        .bind(&class.code)
        .bind(&class.description)
        .bind(decimal_to_text(class.default_rate))
        .bind(class.is_active)
        .bind(Utc::now())
        .bind(class.id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn delete_tax_class(&self, id: i64) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM tax_classes WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    // =========================================================================
    // tax rates
    // =========================================================================

    async fn create_tax_rate(&self, rate: NewTaxRate) -> Result<TaxRate, RepositoryError> {
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO tax_rates (
                tax_class_id, name, code, rate, type, country_code, region,
                is_compound, priority, effective_from, effective_until, is_active, metadata,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(rate.tax_class_id)
        .bind(&rate.name)
        .bind(&rate.code)
        .bind(decimal_to_text(rate.rate))
        .bind(rate.rate_type.as_str())
        .bind(&rate.country_code)
        .bind(&rate.region)
        .bind(rate.is_compound)
        .bind(rate.priority)
        .bind(rate.effective_from)
        .bind(rate.effective_until)
        .bind(rate.is_active)
        .bind(metadata_to_json(&rate.metadata)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        self.get_tax_rate(result.last_insert_rowid()).await
    }

    async fn get_tax_rate(&self, id: i64) -> Result<TaxRate, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {TAX_RATE_COLUMNS} FROM tax_rates WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .ok_or(RepositoryError::NotFound)?;

        row_to_tax_rate(&row)
    }

    async fn get_tax_rate_by_code(&self, code: &str) -> Result<TaxRate, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TAX_RATE_COLUMNS} FROM tax_rates WHERE code = ?"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or(RepositoryError::NotFound)?;

        row_to_tax_rate(&row)
    }

    async fn list_tax_rates_by_country(
        &self,
        country_code: &str,
    ) -> Result<Vec<TaxRate>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TAX_RATE_COLUMNS} FROM tax_rates
             WHERE country_code = ?
             ORDER BY priority DESC, id"
        ))
        .bind(country_code)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(row_to_tax_rate).collect()
    }

    async fn update_tax_rate(&self, rate: &TaxRate) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE tax_rates SET
                tax_class_id = ?, name = ?, code = ?, rate = ?, type = ?, country_code = ?,
                region = ?, is_compound = ?, priority = ?, effective_from = ?,
                effective_until = ?, is_active = ?, metadata = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(rate.tax_class_id)
        .bind(&rate.name)
        .bind(&rate.code)
        .bind(decimal_to_text(rate.rate))
        .bind(rate.rate_type.as_str())
        .bind(&rate.country_code)
        .bind(&rate.region)
        .bind(rate.is_compound)
        .bind(rate.priority)
        .bind(rate.effective_from)
        .bind(rate.effective_until)
        .bind(rate.is_active)
        .bind(metadata_to_json(&rate.metadata)?)
        .bind(Utc::now())
        .bind(rate.id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn delete_tax_rate(&self, id: i64) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM tax_rates WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    // =========================================================================
    // tax rules
    // =========================================================================

    async fn create_tax_rule(&self, rule: NewTaxRule) -> Result<TaxRule, RepositoryError> {
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO tax_rules (
                tax_rate_id, entity_type, entity_id, country_code, region,
                postal_code_from, postal_code_to, customer_type, order_amount_from,
                order_amount_to, priority, stop_processing, date_from, date_to, is_active,
                conditions, description, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(rule.tax_rate_id)
        .bind(rule.entity.entity_type().as_str())
        .bind(rule.entity.id())
        .bind(&rule.country_code)
        .bind(&rule.region)
        .bind(&rule.postal_code_from)
        .bind(&rule.postal_code_to)
        .bind(rule.customer_type.map(|c| c.as_str()))
        .bind(rule.order_amount_from.map(decimal_to_text))
        .bind(rule.order_amount_to.map(decimal_to_text))
        .bind(rule.priority)
        .bind(rule.stop_processing)
        .bind(rule.date_from)
        .bind(rule.date_to)
        .bind(rule.is_active)
        .bind(conditions_to_json(&rule.conditions)?)
        .bind(&rule.description)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        self.get_tax_rule(result.last_insert_rowid()).await
    }

    async fn get_tax_rule(&self, id: i64) -> Result<TaxRule, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {TAX_RULE_COLUMNS} FROM tax_rules WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .ok_or(RepositoryError::NotFound)?;

        row_to_tax_rule(&row)
    }

    async fn list_tax_rules_for_rate(
        &self,
        tax_rate_id: i64,
    ) -> Result<Vec<TaxRule>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TAX_RULE_COLUMNS} FROM tax_rules WHERE tax_rate_id = ? ORDER BY id"
        ))
        .bind(tax_rate_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(row_to_tax_rule).collect()
    }

    async fn update_tax_rule(&self, rule: &TaxRule) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE tax_rules SET
                tax_rate_id = ?, entity_type = ?, entity_id = ?, country_code = ?, region = ?,
                postal_code_from = ?, postal_code_to = ?, customer_type = ?,
                order_amount_from = ?, order_amount_to = ?, priority = ?, stop_processing = ?,
                date_from = ?, date_to = ?, is_active = ?, conditions = ?, description = ?,
                updated_at = ?
             WHERE id = ?",
        )
        .bind(rule.tax_rate_id)
        .bind(rule.entity.entity_type().as_str())
        .bind(rule.entity.id())
        .bind(&rule.country_code)
        .bind(&rule.region)
        .bind(&rule.postal_code_from)
        .bind(&rule.postal_code_to)
        .bind(rule.customer_type.map(|c| c.as_str()))
        .bind(rule.order_amount_from.map(decimal_to_text))
        .bind(rule.order_amount_to.map(decimal_to_text))
        .bind(rule.priority)
        .bind(rule.stop_processing)
        .bind(rule.date_from)
        .bind(rule.date_to)
        .bind(rule.is_active)
        .bind(conditions_to_json(&rule.conditions)?)
        .bind(&rule.description)
        .bind(Utc::now())
        .bind(rule.id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn delete_tax_rule(&self, id: i64) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM tax_rules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn list_candidate_rules(
        &self,
        country_code: Option<&str>,
    ) -> Result<Vec<BoundTaxRule>, RepositoryError> {
        const RULE_FILTER: &str = "is_active = 1 AND (?1 IS NULL OR country_code = ?1)";

        // one snapshot for all three reads, so a rule moved to another rate
        // between them cannot lose its binding
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let rules = sqlx::query(&format!(
            "SELECT {TAX_RULE_COLUMNS} FROM tax_rules WHERE {RULE_FILTER}"
        ))
        .bind(country_code)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error)?
        .iter()
        .map(row_to_tax_rule)
        .collect::<Result<Vec<_>, _>>()?;

        let rates: HashMap<i64, TaxRate> = sqlx::query(&format!(
            "SELECT {TAX_RATE_COLUMNS} FROM tax_rates
             WHERE id IN (SELECT tax_rate_id FROM tax_rules WHERE {RULE_FILTER})"
        ))
        .bind(country_code)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error)?
        .iter()
        .map(|row| row_to_tax_rate(row).map(|rate| (rate.id, rate)))
        .collect::<Result<_, _>>()?;

        let classes: HashMap<i64, TaxClass> = sqlx::query(&format!(
            "SELECT {TAX_CLASS_COLUMNS} FROM tax_classes
             WHERE id IN (
                 SELECT tax_class_id FROM tax_rates
                 WHERE id IN (SELECT tax_rate_id FROM tax_rules WHERE {RULE_FILTER})
             )"
        ))
        .bind(country_code)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error)?
        .iter()
        .map(|row| row_to_tax_class(row).map(|class| (class.id, class)))
        .collect::<Result<_, _>>()?;

        tx.commit().await.map_err(db_error)?;

        let mut bound = Vec::with_capacity(rules.len());
        for rule in rules {
            let rate = rates
                .get(&rule.tax_rate_id)
                .cloned()
                .ok_or_else(|| bad_config("tax rule", rule.id, "rate is missing"))?;
            let tax_class = classes
                .get(&rate.tax_class_id)
                .cloned()
                .ok_or_else(|| bad_config("tax rate", rate.id, "class is missing"))?;
            bound.push(BoundTaxRule {
                rule,
                rate,
                tax_class,
            });
        }

        debug!(
            country = country_code.unwrap_or("*"),
            rules = bound.len(),
            "loaded candidate rules from sqlite"
        );
        Ok(bound)
    }
}
