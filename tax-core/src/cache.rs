//! Read-through cache for tax configuration.
//!
//! Entries expire after a fixed TTL and each family holds at most
//! `max_entries` keys, evicting the least recently used. Writes must call
//! [`TaxCache::invalidate`] with the scope of the entity they touched.
//!
//! Every invalidation bumps a generation counter. Readers capture
//! [`TaxCache::generation`] before going to storage and hand it back to the
//! `put_*` call; a put whose generation is stale is dropped, so a value read
//! before a concurrent write can never be cached after that write's
//! invalidation. [`crate::service::TaxService`] follows this protocol.
//!
//! | Scope      | Families dropped |
//! |------------|------------------|
//! | `TaxClass` | class list, class by id, Turkish rates, rule sets |
//! | `TaxRate`  | class by id, Turkish rates, rule sets |
//! | `TaxRule`  | rule sets |
//! | `All`      | everything |

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{BoundTaxRule, TaxClass, TaxRate};

pub const DEFAULT_TTL_SECS: u64 = 3600;
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    /// Per-family key limit. Zero is treated as one.
    pub max_entries: usize,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL_SECS,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// What a write touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    TaxClass,
    TaxRate,
    TaxRule,
    All,
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

struct TtlMap<K: Hash + Eq, V> {
    name: &'static str,
    entries: Mutex<LruCache<K, Entry<V>>>,
}

impl<K: Eq + Hash, V: Clone> TtlMap<K, V> {
    fn new(name: &'static str, capacity: NonZeroUsize) -> Self {
        Self {
            name,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<K, Entry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.lock();
        let hit = entries
            .get(key)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.value.clone());
        if hit.is_none() {
            // expired entries leave as soon as they are looked up
            entries.pop(key);
        }
        debug!(family = self.name, hit = hit.is_some(), "tax cache lookup");
        hit
    }

    /// Stores `value` unless `current` has moved past `seen`.
    ///
    /// The generation is compared under the map lock, and invalidation bumps
    /// it before taking that lock, so a stale put either loses the check or
    /// is cleared right after.
    fn insert(&self, key: K, value: V, ttl: Duration, current: &AtomicU64, seen: u64) {
        let mut entries = self.lock();
        if current.load(Ordering::SeqCst) != seen {
            debug!(family = self.name, seen, "dropping tax cache fill from a stale generation");
            return;
        }
        entries.put(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    fn clear(&self) {
        self.lock().clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// TTL cache over the four read paths the service needs.
///
/// Rule sets are keyed by the country they were loaded for (`None` means
/// every country) and shared behind an `Arc` so a hit does not copy them.
pub struct TaxCache {
    ttl: Duration,
    generation: AtomicU64,
    classes: TtlMap<(), Vec<TaxClass>>,
    class_by_id: TtlMap<i64, TaxClass>,
    turkish_rates: TtlMap<(), Vec<TaxRate>>,
    rule_sets: TtlMap<Option<String>, Arc<Vec<BoundTaxRule>>>,
}

impl TaxCache {
    pub fn new(config: CacheConfig) -> Self {
        let capacity = config.capacity();
        Self {
            ttl: config.ttl(),
            generation: AtomicU64::new(0),
            classes: TtlMap::new("tax_classes", capacity),
            class_by_id: TtlMap::new("tax_class", capacity),
            turkish_rates: TtlMap::new("turkish_rates", capacity),
            rule_sets: TtlMap::new("rule_sets", capacity),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current invalidation generation; capture it before a storage read.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn tax_classes(&self) -> Option<Vec<TaxClass>> {
        self.classes.get(&())
    }

    pub fn put_tax_classes(&self, classes: Vec<TaxClass>, generation: u64) {
        self.classes
            .insert((), classes, self.ttl, &self.generation, generation);
    }

    pub fn tax_class(&self, id: i64) -> Option<TaxClass> {
        self.class_by_id.get(&id)
    }

    pub fn put_tax_class(&self, class: TaxClass, generation: u64) {
        self.class_by_id
            .insert(class.id, class, self.ttl, &self.generation, generation);
    }

    pub fn turkish_rates(&self) -> Option<Vec<TaxRate>> {
        self.turkish_rates.get(&())
    }

    pub fn put_turkish_rates(&self, rates: Vec<TaxRate>, generation: u64) {
        self.turkish_rates
            .insert((), rates, self.ttl, &self.generation, generation);
    }

    pub fn rule_set(&self, country_code: Option<&str>) -> Option<Arc<Vec<BoundTaxRule>>> {
        self.rule_sets.get(&country_code.map(str::to_string))
    }

    pub fn put_rule_set(
        &self,
        country_code: Option<&str>,
        rules: Arc<Vec<BoundTaxRule>>,
        generation: u64,
    ) {
        self.rule_sets.insert(
            country_code.map(str::to_string),
            rules,
            self.ttl,
            &self.generation,
            generation,
        );
    }

    /// Drops every family that could hold data affected by a write to `scope`
    /// and refuses fills started before this call.
    pub fn invalidate(&self, scope: CacheScope) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(?scope, generation, "invalidating tax cache");
        match scope {
            CacheScope::TaxClass | CacheScope::All => {
                self.classes.clear();
                self.drop_rate_families();
            }
            CacheScope::TaxRate => self.drop_rate_families(),
            CacheScope::TaxRule => self.rule_sets.clear(),
        }
    }

    // a rate change can alter what a class lookup or a rule set resolves to
    fn drop_rate_families(&self) {
        self.class_by_id.clear();
        self.turkish_rates.clear();
        self.rule_sets.clear();
    }
}

impl Default for TaxCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl std::fmt::Debug for TaxCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaxCache")
            .field("ttl", &self.ttl)
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::models::TaxRateType;

    fn class(id: i64) -> TaxClass {
        TaxClass {
            id,
            name: format!("Class {id}"),
            code: format!("class-{id}"),
            description: None,
            default_rate: dec!(0.20),
            is_active: true,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    fn rate(id: i64) -> TaxRate {
        TaxRate {
            id,
            tax_class_id: 1,
            name: "KDV %20".to_string(),
            code: format!("tr-kdv-{id}"),
            rate: dec!(0.20),
            rate_type: TaxRateType::Percentage,
            country_code: "TR".to_string(),
            region: None,
            is_compound: false,
            priority: 0,
            effective_from: None,
            effective_until: None,
            is_active: true,
            metadata: BTreeMap::new(),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// Fills every family so invalidation tests can see what survived.
    fn warm(cache: &TaxCache) {
        let generation = cache.generation();
        cache.put_tax_classes(vec![class(1)], generation);
        cache.put_tax_class(class(1), generation);
        cache.put_turkish_rates(vec![rate(1)], generation);
        cache.put_rule_set(Some("TR"), Arc::new(Vec::new()), generation);
        cache.put_rule_set(None, Arc::new(Vec::new()), generation);
    }

    fn survivors(cache: &TaxCache) -> [bool; 5] {
        [
            cache.tax_classes().is_some(),
            cache.tax_class(1).is_some(),
            cache.turkish_rates().is_some(),
            cache.rule_set(Some("TR")).is_some(),
            cache.rule_set(None).is_some(),
        ]
    }

    #[test]
    fn default_ttl_is_one_hour() {
        assert_eq!(CacheConfig::default().ttl(), Duration::from_secs(3600));
        assert_eq!(TaxCache::default().ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: CacheConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CacheConfig::default());

        let config: CacheConfig = serde_json::from_str(r#"{"ttl_secs": 60}"#).unwrap();
        assert_eq!(config.ttl(), Duration::from_secs(60));
        assert_eq!(config.max_entries, DEFAULT_MAX_ENTRIES);
    }

    #[test]
    fn zero_max_entries_still_holds_one_key() {
        let config = CacheConfig {
            max_entries: 0,
            ..CacheConfig::default()
        };

        assert_eq!(config.capacity().get(), 1);
    }

    #[test]
    fn empty_cache_misses() {
        let cache = TaxCache::default();
        assert_eq!(survivors(&cache), [false; 5]);
    }

    #[test]
    fn stored_values_are_returned() {
        let cache = TaxCache::default();
        warm(&cache);

        assert_eq!(cache.tax_classes(), Some(vec![class(1)]));
        assert_eq!(cache.tax_class(1), Some(class(1)));
        assert_eq!(cache.tax_class(2), None);
        assert_eq!(cache.turkish_rates(), Some(vec![rate(1)]));
    }

    #[test]
    fn rule_sets_are_keyed_by_country() {
        let cache = TaxCache::default();
        cache.put_rule_set(Some("TR"), Arc::new(Vec::new()), cache.generation());

        assert!(cache.rule_set(Some("TR")).is_some());
        assert!(cache.rule_set(Some("DE")).is_none());
        assert!(cache.rule_set(None).is_none());
    }

    #[test]
    fn zero_ttl_expires_immediately() {
        let cache = TaxCache::new(CacheConfig {
            ttl_secs: 0,
            ..CacheConfig::default()
        });
        warm(&cache);

        assert_eq!(survivors(&cache), [false; 5]);
        // lookups evicted the expired entries
        assert_eq!(cache.rule_sets.len(), 0);
        assert_eq!(cache.class_by_id.len(), 0);
    }

    #[test]
    fn rule_sets_stay_within_max_entries() {
        let cache = TaxCache::new(CacheConfig {
            max_entries: 64,
            ..CacheConfig::default()
        });
        let generation = cache.generation();

        for n in 0..10_000 {
            let country = format!("C{n}");
            cache.put_rule_set(Some(&country), Arc::new(Vec::new()), generation);
        }

        assert_eq!(cache.rule_sets.len(), 64);
        assert!(cache.rule_set(Some("C9999")).is_some());
        assert!(cache.rule_set(Some("C0")).is_none());
    }

    #[test]
    fn class_lookups_evict_least_recently_used() {
        let cache = TaxCache::new(CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        });
        let generation = cache.generation();
        cache.put_tax_class(class(1), generation);
        cache.put_tax_class(class(2), generation);
        assert!(cache.tax_class(1).is_some());

        cache.put_tax_class(class(3), generation);

        assert!(cache.tax_class(1).is_some());
        assert!(cache.tax_class(2).is_none());
        assert!(cache.tax_class(3).is_some());
    }

    #[test]
    fn invalidation_advances_generation() {
        let cache = TaxCache::default();
        let before = cache.generation();

        cache.invalidate(CacheScope::TaxRule);

        assert_eq!(cache.generation(), before + 1);
    }

    #[test]
    fn fill_started_before_invalidation_is_dropped() {
        let cache = TaxCache::default();
        let seen = cache.generation();

        // a write lands while the reader is still at the database
        cache.invalidate(CacheScope::TaxRule);
        cache.put_rule_set(Some("TR"), Arc::new(Vec::new()), seen);
        cache.put_tax_class(class(1), seen);

        assert!(cache.rule_set(Some("TR")).is_none());
        assert!(cache.tax_class(1).is_none());

        cache.put_rule_set(Some("TR"), Arc::new(Vec::new()), cache.generation());
        assert!(cache.rule_set(Some("TR")).is_some());
    }

    #[test]
    fn tax_class_scope_drops_everything() {
        let cache = TaxCache::default();
        warm(&cache);

        cache.invalidate(CacheScope::TaxClass);

        assert_eq!(survivors(&cache), [false; 5]);
    }

    #[test]
    fn tax_rate_scope_keeps_class_list() {
        let cache = TaxCache::default();
        warm(&cache);

        cache.invalidate(CacheScope::TaxRate);

        assert_eq!(survivors(&cache), [true, false, false, false, false]);
    }

    #[test]
    fn tax_rule_scope_drops_only_rule_sets() {
        let cache = TaxCache::default();
        warm(&cache);

        cache.invalidate(CacheScope::TaxRule);

        assert_eq!(survivors(&cache), [true, true, true, false, false]);
    }

    #[test]
    fn all_scope_drops_everything() {
        let cache = TaxCache::default();
        warm(&cache);

        cache.invalidate(CacheScope::All);

        assert_eq!(survivors(&cache), [false; 5]);
    }

    #[test]
    fn refill_after_invalidation() {
        let cache = TaxCache::default();
        warm(&cache);
        cache.invalidate(CacheScope::All);

        cache.put_tax_class(class(7), cache.generation());

        assert_eq!(cache.tax_class(7), Some(class(7)));
    }
}
