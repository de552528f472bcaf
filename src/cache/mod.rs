//! Day-partitioned cache for computed indices, raw logs and point snapshots.
//!
//! Entries live in one container per local calendar date. Past dates never
//! change, so their entries are permanent; entries for "today" expire a fixed
//! TTL after they were written. Every container is persisted as one JSON
//! document under a versioned, namespaced key; only today's container and a
//! few recently used ones stay resident in memory.

use crate::clock::{self, Clock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use time::{Date, UtcOffset};
use tracing::{debug, warn};

pub mod store;

use store::CacheStore;

/// Bumped whenever the persisted layout or cached semantics change.
pub const CACHE_VERSION: u32 = 3;
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);
pub const DEFAULT_NAMESPACE: &str = "aqi-map";
pub const DEFAULT_RESIDENT_PARTITIONS: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Value,
    pub write_timestamp: i64,
    pub date_key: String,
    pub permanent: bool,
}

// entity -> qualifier -> entry; nesting keeps entity ids from colliding with
// qualifiers however either is spelled.
type Partition = HashMap<String, HashMap<String, CacheEntry>>;

#[derive(Debug)]
struct Resident {
    partition: Partition,
    last_used: u64,
}

#[derive(Debug, Default)]
struct Residents {
    partitions: HashMap<String, Resident>,
    tick: u64,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub namespace: String,
    pub ttl: Duration,
    pub offset: UtcOffset,
    /// Partitions kept in memory besides today's; the rest reload on demand.
    pub resident_partitions: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            ttl: DEFAULT_TTL,
            offset: UtcOffset::UTC,
            resident_partitions: DEFAULT_RESIDENT_PARTITIONS,
        }
    }
}

/// Cache service, constructed once at startup and shared by reference.
///
/// Writes are last-write-wins. Values handed out are snapshots that a later
/// write may supersede.
#[derive(Debug)]
pub struct DayCache {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    settings: CacheSettings,
    residents: Mutex<Residents>,
}

impl DayCache {
    pub fn new(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>, settings: CacheSettings) -> Self {
        Self {
            store,
            clock,
            settings,
            residents: Mutex::new(Residents::default()),
        }
    }

    pub fn today(&self) -> Date {
        clock::today(self.clock.as_ref(), self.settings.offset)
    }

    pub fn ttl(&self) -> Duration {
        self.settings.ttl
    }

    fn prefix(&self) -> String {
        format!("{}:v{CACHE_VERSION}:", self.settings.namespace)
    }

    fn partition_key(&self, date: Date) -> String {
        format!("{}{}", self.prefix(), clock::date_key(date))
    }

    fn lock(&self) -> MutexGuard<'_, Residents> {
        self.residents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of partitions currently held in memory.
    pub fn resident_count(&self) -> usize {
        self.lock().partitions.len()
    }

    fn load(&self, key: &str) -> Partition {
        let raw = match self.store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Partition::new(),
            Err(err) => {
                warn!(key, error = %err, "Failed to read cache partition");
                return Partition::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(partition) => partition,
            Err(err) => {
                warn!(key, error = %err, "Discarding unparsable cache partition");
                if let Err(err) = self.store.remove(key) {
                    warn!(key, error = %err, "Failed to remove corrupt cache partition");
                }
                Partition::new()
            }
        }
    }

    fn persist(&self, key: &str, partition: &Partition) {
        let result = serde_json::to_string(partition)
            .map_err(|err| err.to_string())
            .and_then(|json| self.store.set(key, &json).map_err(|err| err.to_string()));
        if let Err(err) = result {
            warn!(key, error = %err, "Failed to persist cache partition");
        }
    }

    fn with_partition<R>(&self, date: Date, f: impl FnOnce(&mut Partition) -> (R, bool)) -> R {
        let key = self.partition_key(date);
        let mut residents = self.lock();
        residents.tick += 1;
        let tick = residents.tick;
        if !residents.partitions.contains_key(&key) {
            let partition = self.load(&key);
            residents.partitions.insert(
                key.clone(),
                Resident {
                    partition,
                    last_used: tick,
                },
            );
            self.evict_excess(&mut residents, &key);
        }
        let resident = residents
            .partitions
            .entry(key.clone())
            .or_insert_with(|| Resident {
                partition: Partition::new(),
                last_used: tick,
            });
        resident.last_used = tick;
        let (result, dirty) = f(&mut resident.partition);
        if dirty {
            self.persist(&key, &resident.partition);
        }
        result
    }

    // Every write is persisted as it happens, so dropping a resident loses
    // nothing. Today's partition and the one in use are never dropped.
    fn evict_excess(&self, residents: &mut Residents, in_use: &str) {
        let today = self.partition_key(self.today());
        let limit = self.settings.resident_partitions.saturating_add(1);
        while residents.partitions.len() > limit {
            let oldest = residents
                .partitions
                .iter()
                .filter(|(key, _)| key.as_str() != in_use && **key != today)
                .min_by_key(|(_, resident)| resident.last_used)
                .map(|(key, _)| key.clone());
            let Some(oldest) = oldest else {
                break;
            };
            debug!(key = %oldest, "Dropping resident cache partition");
            residents.partitions.remove(&oldest);
        }
    }

    fn is_live(&self, entry: &CacheEntry, date: Date) -> bool {
        if date != self.today() {
            return true;
        }
        let ttl_ms = i64::try_from(self.settings.ttl.as_millis()).unwrap_or(i64::MAX);
        self.clock.now_ms() <= entry.write_timestamp.saturating_add(ttl_ms)
    }

    pub fn set<T: Serialize>(&self, date: Date, entity: &str, qualifier: &str, value: &T) {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(err) => {
                warn!(entity, qualifier, error = %err, "Failed to encode cache value");
                return;
            }
        };
        let entry = CacheEntry {
            value,
            write_timestamp: self.clock.now_ms(),
            date_key: clock::date_key(date),
            permanent: date < self.today(),
        };
        self.with_partition(date, |partition| {
            partition
                .entry(entity.to_string())
                .or_default()
                .insert(qualifier.to_string(), entry);
            ((), true)
        });
    }

    /// Raw entry, subject to TTL. Expired entries are evicted.
    pub fn entry(&self, date: Date, entity: &str, qualifier: &str) -> Option<CacheEntry> {
        self.with_partition(date, |partition| {
            let Some(entry) = partition.get(entity).and_then(|q| q.get(qualifier)) else {
                return (None, false);
            };
            if self.is_live(entry, date) {
                return (Some(entry.clone()), false);
            }
            debug!(entity, qualifier, "Cache entry expired");
            remove_entry(partition, entity, qualifier);
            (None, true)
        })
    }

    pub fn get<T: DeserializeOwned>(&self, date: Date, entity: &str, qualifier: &str) -> Option<T> {
        let entry = self.entry(date, entity, qualifier)?;
        match serde_json::from_value(entry.value) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(entity, qualifier, error = %err, "Discarding undecodable cache entry");
                self.remove(date, entity, qualifier);
                None
            }
        }
    }

    /// Most recently written live value for `entity` under any qualifier.
    pub fn latest<T: DeserializeOwned>(&self, date: Date, entity: &str) -> Option<T> {
        let candidates: Vec<(String, CacheEntry)> = self.with_partition(date, |partition| {
            let Some(qualifiers) = partition.get(entity) else {
                return (Vec::new(), false);
            };
            let mut live: Vec<(String, CacheEntry)> = qualifiers
                .iter()
                .filter(|(_, entry)| self.is_live(entry, date))
                .map(|(qualifier, entry)| (qualifier.clone(), entry.clone()))
                .collect();
            live.sort_by(|a, b| {
                b.1.write_timestamp
                    .cmp(&a.1.write_timestamp)
                    .then_with(|| a.0.cmp(&b.0))
            });
            (live, false)
        });
        candidates
            .into_iter()
            .find_map(|(_, entry)| serde_json::from_value(entry.value).ok())
    }

    pub fn remove(&self, date: Date, entity: &str, qualifier: &str) {
        self.with_partition(date, |partition| {
            let removed = remove_entry(partition, entity, qualifier);
            ((), removed)
        });
    }

    /// Delete persisted partitions written under another cache version of
    /// this namespace. Returns how many were removed.
    pub fn purge_foreign_versions(&self) -> usize {
        let keys = match self.store.keys() {
            Ok(keys) => keys,
            Err(err) => {
                warn!(error = %err, "Failed to list cache partitions");
                return 0;
            }
        };
        let namespace = format!("{}:v", self.settings.namespace);
        let current = self.prefix();
        let mut removed = 0;
        for key in keys {
            if key.starts_with(&namespace) && !key.starts_with(&current) {
                match self.store.remove(&key) {
                    Ok(()) => removed += 1,
                    Err(err) => warn!(key, error = %err, "Failed to remove stale cache partition"),
                }
            }
        }
        removed
    }

    /// Drop every partition of this namespace, in memory and persisted.
    /// Intended for test harnesses.
    pub fn reset(&self) {
        self.lock().partitions.clear();
        let namespace = format!("{}:", self.settings.namespace);
        if let Ok(keys) = self.store.keys() {
            for key in keys.iter().filter(|key| key.starts_with(&namespace)) {
                if let Err(err) = self.store.remove(key) {
                    warn!(key, error = %err, "Failed to remove cache partition");
                }
            }
        }
    }
}

fn remove_entry(partition: &mut Partition, entity: &str, qualifier: &str) -> bool {
    let Some(qualifiers) = partition.get_mut(entity) else {
        return false;
    };
    let removed = qualifiers.remove(qualifier).is_some();
    if qualifiers.is_empty() {
        partition.remove(entity);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryStore;
    use crate::clock::ManualClock;
    use time::Month;

    // 2024-03-02T12:00:00Z
    const NOW_SECS: i64 = 1_709_380_800;

    fn fixture() -> (DayCache, Arc<ManualClock>, Arc<MemoryStore>) {
        let clock = Arc::new(ManualClock::at_secs(NOW_SECS));
        let store = Arc::new(MemoryStore::new());
        let cache = DayCache::new(store.clone(), clock.clone(), CacheSettings::default());
        (cache, clock, store)
    }

    fn today() -> Date {
        Date::from_calendar_date(2024, Month::March, 2).expect("date")
    }

    fn yesterday() -> Date {
        Date::from_calendar_date(2024, Month::March, 1).expect("date")
    }

    #[test]
    fn past_dates_never_expire() {
        let (cache, clock, _) = fixture();
        cache.set(yesterday(), "s1", "aqi", &42u16);

        clock.advance(Duration::from_secs(30 * 86_400));

        assert_eq!(cache.get::<u16>(yesterday(), "s1", "aqi"), Some(42));
        let entry = cache.entry(yesterday(), "s1", "aqi").expect("entry");
        assert!(entry.permanent);
        assert_eq!(entry.date_key, "2024-03-01");
    }

    #[test]
    fn today_expires_after_ttl_and_is_evicted() {
        let (cache, clock, store) = fixture();
        cache.set(today(), "s1", "aqi", &42u16);
        assert_eq!(cache.get::<u16>(today(), "s1", "aqi"), Some(42));

        clock.advance(DEFAULT_TTL + Duration::from_secs(1));

        assert_eq!(cache.get::<u16>(today(), "s1", "aqi"), None);
        let persisted = store
            .get("aqi-map:v3:2024-03-02")
            .ok()
            .flatten()
            .unwrap_or_default();
        assert!(!persisted.contains("s1"));
    }

    #[test]
    fn latest_ignores_qualifier() {
        let (cache, clock, _) = fixture();
        cache.set(today(), "s1", "aqi:epa2024:a", &10u16);
        clock.advance(Duration::from_secs(1));
        cache.set(today(), "s1", "aqi:epa2024:b", &20u16);
        cache.set(today(), "s2", "aqi:epa2024:c", &99u16);

        assert_eq!(cache.latest::<u16>(today(), "s1"), Some(20));
        assert_eq!(cache.latest::<u16>(today(), "missing"), None);
    }

    #[test]
    fn last_write_wins() {
        let (cache, _, _) = fixture();
        cache.set(today(), "s1", "q", &1u16);
        cache.set(today(), "s1", "q", &2u16);
        assert_eq!(cache.get::<u16>(today(), "s1", "q"), Some(2));
    }

    #[test]
    fn entities_and_qualifiers_cannot_collide() {
        let (cache, _, _) = fixture();
        cache.set(today(), "a::b", "c", &1u16);
        cache.set(today(), "a", "b::c", &2u16);
        assert_eq!(cache.get::<u16>(today(), "a::b", "c"), Some(1));
        assert_eq!(cache.get::<u16>(today(), "a", "b::c"), Some(2));
    }

    #[test]
    fn survives_restart_through_store() {
        let (cache, clock, store) = fixture();
        cache.set(yesterday(), "points", "pm25", &vec![1.0, 2.0]);

        let reopened = DayCache::new(store, clock, CacheSettings::default());

        assert_eq!(
            reopened.get::<Vec<f64>>(yesterday(), "points", "pm25"),
            Some(vec![1.0, 2.0])
        );
    }

    #[test]
    fn corrupt_partition_is_a_miss_and_discarded() -> Result<(), store::StoreError> {
        let (cache, _, store) = fixture();
        store.set("aqi-map:v3:2024-03-01", "{not json")?;

        assert_eq!(cache.get::<u16>(yesterday(), "s1", "aqi"), None);
        assert_eq!(store.get("aqi-map:v3:2024-03-01")?, None);
        Ok(())
    }

    #[test]
    fn undecodable_value_is_a_miss_and_evicted() {
        let (cache, _, _) = fixture();
        cache.set(yesterday(), "s1", "aqi", &"not a number");

        assert_eq!(cache.get::<u16>(yesterday(), "s1", "aqi"), None);
        assert!(cache.entry(yesterday(), "s1", "aqi").is_none());
    }

    #[test]
    fn purge_removes_other_versions_only() -> Result<(), store::StoreError> {
        let (cache, _, store) = fixture();
        store.set("aqi-map:v2:2024-03-01", "{}")?;
        store.set("other:v1:2024-03-01", "{}")?;
        cache.set(yesterday(), "s1", "aqi", &1u16);

        assert_eq!(cache.purge_foreign_versions(), 1);
        assert_eq!(store.get("aqi-map:v2:2024-03-01")?, None);
        assert!(store.get("other:v1:2024-03-01")?.is_some());
        assert!(store.get("aqi-map:v3:2024-03-01")?.is_some());
        Ok(())
    }

    #[test]
    fn reset_clears_everything_in_namespace() {
        let (cache, _, _) = fixture();
        cache.set(yesterday(), "s1", "aqi", &1u16);
        cache.reset();
        assert_eq!(cache.get::<u16>(yesterday(), "s1", "aqi"), None);
    }

    #[test]
    fn resident_partitions_are_bounded_and_reload_from_store() {
        let clock = Arc::new(ManualClock::at_secs(NOW_SECS));
        let settings = CacheSettings {
            resident_partitions: 2,
            ..CacheSettings::default()
        };
        let cache = DayCache::new(Arc::new(MemoryStore::new()), clock, settings);
        cache.set(today(), "s0", "aqi", &7u16);
        for day in 1..=5u8 {
            let date = Date::from_calendar_date(2024, Month::February, day).expect("date");
            cache.set(date, "s1", "aqi", &u16::from(day));
        }

        assert_eq!(cache.resident_count(), 3);
        assert_eq!(cache.get::<u16>(today(), "s0", "aqi"), Some(7));
        let first = Date::from_calendar_date(2024, Month::February, 1).expect("date");
        assert_eq!(cache.get::<u16>(first, "s1", "aqi"), Some(1));
        assert_eq!(cache.resident_count(), 3);
    }
}
