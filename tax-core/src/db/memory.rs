//! In-memory [`TaxRepository`] for unit tests.
//!
//! Mirrors the SQLite backend's constraints (unique codes, restricted
//! deletes) and counts reads so cache behaviour can be asserted. A hook can
//! run between a rule read and its return to stage a concurrent write.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use super::repository::{RepositoryError, TaxRepository};
use crate::models::{
    BoundTaxRule, NewTaxClass, NewTaxRate, NewTaxRule, TaxClass, TaxRate, TaxRule,
};

#[derive(Default)]
struct State {
    next_id: i64,
    classes: Vec<TaxClass>,
    rates: Vec<TaxRate>,
    rules: Vec<TaxRule>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

type ReadHook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub(crate) struct MemoryRepository {
    state: Mutex<State>,
    class_reads: AtomicUsize,
    rate_reads: AtomicUsize,
    rule_reads: AtomicUsize,
    after_rule_read: Mutex<Option<ReadHook>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads of the class list or a single class.
    pub fn class_reads(&self) -> usize {
        self.class_reads.load(Ordering::SeqCst)
    }

    pub fn rate_reads(&self) -> usize {
        self.rate_reads.load(Ordering::SeqCst)
    }

    pub fn rule_reads(&self) -> usize {
        self.rule_reads.load(Ordering::SeqCst)
    }

    /// Runs `hook` after candidate rules are read but before they are returned.
    pub fn after_rule_read(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.after_rule_read.lock().unwrap() = Some(Box::new(hook));
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

fn replace<T, F>(items: &mut [T], matches: F, value: T) -> Result<(), RepositoryError>
where
    F: Fn(&T) -> bool,
{
    let slot = items.iter_mut().find(|item| matches(item)).ok_or(RepositoryError::NotFound)?;
    *slot = value;
    Ok(())
}

#[async_trait]
impl TaxRepository for MemoryRepository {
    async fn create_tax_class(&self, class: NewTaxClass) -> Result<TaxClass, RepositoryError> {
        let mut state = self.state();
        let code = class.resolved_code();
        if state.classes.iter().any(|c| c.code == code || c.name == class.name) {
            return Err(RepositoryError::Conflict(format!("tax class {code} exists")));
        }
        let now = Utc::now();
        let created = TaxClass {
            id: state.next_id(),
            name: class.name,
            code,
            description: class.description,
            default_rate: class.default_rate,
            is_active: class.is_active,
            created_at: now,
            updated_at: now,
        };
        state.classes.push(created.clone());
        Ok(created)
    }

    async fn get_tax_class(&self, id: i64) -> Result<TaxClass, RepositoryError> {
        self.class_reads.fetch_add(1, Ordering::SeqCst);
        self.state()
            .classes
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn get_tax_class_by_code(&self, code: &str) -> Result<TaxClass, RepositoryError> {
        self.state()
            .classes
            .iter()
            .find(|c| c.code == code)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn list_tax_classes(&self) -> Result<Vec<TaxClass>, RepositoryError> {
        self.class_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.state().classes.clone())
    }

    async fn update_tax_class(&self, class: &TaxClass) -> Result<(), RepositoryError> {
        replace(&mut self.state().classes, |c| c.id == class.id, class.clone())
    }

    async fn delete_tax_class(&self, id: i64) -> Result<(), RepositoryError> {
        let mut state = self.state();
        if state.rates.iter().any(|r| r.tax_class_id == id) {
            return Err(RepositoryError::Conflict(format!("tax class {id} has rates")));
        }
        let before = state.classes.len();
        state.classes.retain(|c| c.id != id);
        if state.classes.len() == before {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn create_tax_rate(&self, rate: NewTaxRate) -> Result<TaxRate, RepositoryError> {
        let mut state = self.state();
        if !state.classes.iter().any(|c| c.id == rate.tax_class_id) {
            return Err(RepositoryError::Conflict(format!(
                "tax class {} does not exist",
                rate.tax_class_id
            )));
        }
        let now = Utc::now();
        let created = TaxRate {
            id: state.next_id(),
            tax_class_id: rate.tax_class_id,
            name: rate.name,
            code: rate.code,
            rate: rate.rate,
            rate_type: rate.rate_type,
            country_code: rate.country_code,
            region: rate.region,
            is_compound: rate.is_compound,
            priority: rate.priority,
            effective_from: rate.effective_from,
            effective_until: rate.effective_until,
            is_active: rate.is_active,
            metadata: rate.metadata,
            created_at: now,
            updated_at: now,
        };
        state.rates.push(created.clone());
        Ok(created)
    }

    async fn get_tax_rate(&self, id: i64) -> Result<TaxRate, RepositoryError> {
        self.state()
            .rates
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn get_tax_rate_by_code(&self, code: &str) -> Result<TaxRate, RepositoryError> {
        self.state()
            .rates
            .iter()
            .find(|r| r.code == code)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn list_tax_rates_by_country(
        &self,
        country_code: &str,
    ) -> Result<Vec<TaxRate>, RepositoryError> {
        self.rate_reads.fetch_add(1, Ordering::SeqCst);
        let mut rates: Vec<_> = self
            .state()
            .rates
            .iter()
            .filter(|r| r.country_code == country_code)
            .cloned()
            .collect();
        rates.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(rates)
    }

    async fn update_tax_rate(&self, rate: &TaxRate) -> Result<(), RepositoryError> {
        replace(&mut self.state().rates, |r| r.id == rate.id, rate.clone())
    }

    async fn delete_tax_rate(&self, id: i64) -> Result<(), RepositoryError> {
        let mut state = self.state();
        if state.rules.iter().any(|r| r.tax_rate_id == id) {
            return Err(RepositoryError::Conflict(format!("tax rate {id} has rules")));
        }
        let before = state.rates.len();
        state.rates.retain(|r| r.id != id);
        if state.rates.len() == before {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn create_tax_rule(&self, rule: NewTaxRule) -> Result<TaxRule, RepositoryError> {
        let mut state = self.state();
        if !state.rates.iter().any(|r| r.id == rule.tax_rate_id) {
            return Err(RepositoryError::Conflict(format!(
                "tax rate {} does not exist",
                rule.tax_rate_id
            )));
        }
        let now = Utc::now();
        let created = TaxRule {
            id: state.next_id(),
            tax_rate_id: rule.tax_rate_id,
            entity: rule.entity,
            country_code: rule.country_code,
            region: rule.region,
            postal_code_from: rule.postal_code_from,
            postal_code_to: rule.postal_code_to,
            customer_type: rule.customer_type,
            order_amount_from: rule.order_amount_from,
            order_amount_to: rule.order_amount_to,
            priority: rule.priority,
            stop_processing: rule.stop_processing,
            date_from: rule.date_from,
            date_to: rule.date_to,
            is_active: rule.is_active,
            conditions: rule.conditions,
            description: rule.description,
            created_at: now,
            updated_at: now,
        };
        state.rules.push(created.clone());
        Ok(created)
    }

    async fn get_tax_rule(&self, id: i64) -> Result<TaxRule, RepositoryError> {
        self.state()
            .rules
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn list_tax_rules_for_rate(
        &self,
        tax_rate_id: i64,
    ) -> Result<Vec<TaxRule>, RepositoryError> {
        Ok(self
            .state()
            .rules
            .iter()
            .filter(|r| r.tax_rate_id == tax_rate_id)
            .cloned()
            .collect())
    }

    async fn update_tax_rule(&self, rule: &TaxRule) -> Result<(), RepositoryError> {
        replace(&mut self.state().rules, |r| r.id == rule.id, rule.clone())
    }

    async fn delete_tax_rule(&self, id: i64) -> Result<(), RepositoryError> {
        let mut state = self.state();
        let before = state.rules.len();
        state.rules.retain(|r| r.id != id);
        if state.rules.len() == before {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_candidate_rules(
        &self,
        country_code: Option<&str>,
    ) -> Result<Vec<BoundTaxRule>, RepositoryError> {
        self.rule_reads.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        let bound: Vec<_> = state
            .rules
            .iter()
            .filter(|rule| rule.is_active)
            .filter(|rule| country_code.is_none_or(|country| rule.country_code == country))
            .filter_map(|rule| {
                let rate = state.rates.iter().find(|r| r.id == rule.tax_rate_id)?;
                let tax_class = state.classes.iter().find(|c| c.id == rate.tax_class_id)?;
                Some(BoundTaxRule {
                    rule: rule.clone(),
                    rate: rate.clone(),
                    tax_class: tax_class.clone(),
                })
            })
            .collect();
        drop(state);

        if let Some(hook) = self.after_rule_read.lock().unwrap().as_ref() {
            hook();
        }
        Ok(bound)
    }
}
