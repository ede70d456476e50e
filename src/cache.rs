//! Bounded TTL cache with batched insertion-order eviction.
//!
//! Expiry is lazy: an entry stores its own deadline, is never returned once
//! that deadline has passed, and is physically removed on the next access or
//! by [`BoundedCache::purge_expired`]. Overwriting a key replaces the deadline,
//! so there is never more than one pending expiry per key.

use crate::clock::{deadline, Clock, SystemClock};
use crate::error::GuardResult;
use crate::metrics::{CacheMetrics, CacheSnapshot};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use validator::Validate;

/// Size and TTL settings for one cache namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CacheSettings {
    #[validate(range(min = 1))]
    pub max_size: usize,
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl: Duration::from_secs(5 * 60),
        }
    }
}

impl CacheSettings {
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            max_size,
            default_ttl,
        }
    }

    /// Number of entries dropped when a full namespace admits a new key.
    pub fn eviction_batch(&self) -> usize {
        self.max_size.div_ceil(10).max(1)
    }
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    expires_at: Instant,
    seq: u64,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

struct State<V> {
    entries: HashMap<String, Entry<V>>,
    // insertion sequence -> key, oldest first
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl<V> State<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
        }
    }

    fn remove(&mut self, key: &str) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }

    fn evict_oldest(&mut self, count: usize) -> Vec<Entry<V>> {
        let mut evicted = Vec::with_capacity(count);
        while evicted.len() < count {
            let Some((_, key)) = self.order.pop_first() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&key) {
                evicted.push(entry);
            }
        }
        evicted
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }
}

/// A named, size-bounded key/value store with per-entry TTL.
pub struct BoundedCache<V> {
    name: String,
    settings: CacheSettings,
    state: Mutex<State<V>>,
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    clock: Arc<dyn Clock>,
    metrics: CacheMetrics,
}

impl<V: Clone> BoundedCache<V> {
    pub fn new(name: impl Into<String>, settings: CacheSettings) -> Self {
        Self::with_clock(name, settings, Arc::new(SystemClock))
    }

    /// A `max_size` of zero is treated as one.
    pub fn with_clock(
        name: impl Into<String>,
        settings: CacheSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            settings: CacheSettings {
                max_size: settings.max_size.max(1),
                ..settings
            },
            state: Mutex::new(State::new()),
            inflight: Mutex::new(HashMap::new()),
            clock,
            metrics: CacheMetrics::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> CacheSettings {
        self.settings
    }

    /// Return the live value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<V> {
        let found = self.lookup(key);
        if found.is_some() {
            self.metrics.record_hit();
        } else {
            self.metrics.record_miss();
        }
        found
    }

    fn lookup(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let expired = match state.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };

        if expired {
            state.remove(key);
            self.metrics.record_expirations(1);
        }
        None
    }

    /// Store `value` under `key` for `ttl`.
    ///
    /// Overwriting keeps the key's original insertion position and replaces
    /// its deadline. A new key arriving at a full namespace first evicts the
    /// oldest `ceil(max_size / 10)` entries.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let now = self.clock.now();
        let expires_at = deadline(now, ttl);
        let mut state = self.state.lock();

        if let Some(entry) = state.entries.get_mut(&key) {
            entry.value = value;
            entry.inserted_at = now;
            entry.expires_at = expires_at;
            return;
        }

        if state.entries.len() >= self.settings.max_size {
            let evicted = state.evict_oldest(self.settings.eviction_batch());
            let oldest_age = evicted
                .first()
                .map(|entry| now.saturating_duration_since(entry.inserted_at));
            self.metrics.record_evictions(evicted.len());
            debug!(
                target: "storefront_guard::cache",
                namespace = %self.name,
                evicted = evicted.len(),
                oldest_age = ?oldest_age,
                "Capacity eviction"
            );
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.order.insert(seq, key.clone());
        state.entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                expires_at,
                seq,
            },
        );
    }

    /// Store `value` with the namespace's default TTL.
    pub fn set_default(&self, key: impl Into<String>, value: V) {
        self.set(key, value, self.settings.default_ttl);
    }

    pub fn delete(&self, key: &str) -> bool {
        self.state.lock().remove(key).is_some()
    }

    /// Return the cached value or run `producer`, store its output and return it.
    ///
    /// The producer only runs on a miss. Concurrent misses on the same key
    /// wait for the first producer instead of running their own. A failed
    /// producer stores nothing and its error is returned unchanged.
    pub async fn get_or_set<F, Fut, E>(&self, key: &str, ttl: Duration, producer: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let gate = self.gate(key);
        let permit = gate.clone().lock_owned().await;

        let result = match self.lookup(key) {
            Some(value) => Ok(value),
            None => match producer().await {
                Ok(value) => {
                    self.set(key, value.clone(), ttl);
                    Ok(value)
                }
                Err(err) => Err(err),
            },
        };

        drop(permit);
        self.release_gate(key, &gate);
        result
    }

    fn gate(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inflight
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    fn release_gate(&self, key: &str, gate: &Arc<tokio::sync::Mutex<()>>) {
        let mut inflight = self.inflight.lock();
        // map + caller: nobody else is waiting on this key
        if Arc::strong_count(gate) <= 2 {
            inflight.remove(key);
        }
    }

    /// Remove every entry whose key matches the regular expression `pattern`.
    pub fn delete_pattern(&self, pattern: &str) -> GuardResult<usize> {
        let regex = Regex::new(pattern)?;
        Ok(self.delete_matching(&regex))
    }

    pub fn delete_matching(&self, regex: &Regex) -> usize {
        let mut state = self.state.lock();
        let matched: Vec<String> = state
            .entries
            .keys()
            .filter(|key| regex.is_match(key))
            .cloned()
            .collect();
        for key in &matched {
            state.remove(key);
        }
        drop(state);

        self.metrics.record_invalidations(matched.len());
        debug!(
            target: "storefront_guard::cache",
            namespace = %self.name,
            pattern = %regex,
            removed = matched.len(),
            "Pattern invalidation"
        );
        matched.len()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.order.clear();
    }

    /// Number of live entries.
    pub fn size(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let expired = state.purge_expired(now);
        self.metrics.record_expirations(expired);
        state.entries.len()
    }

    /// Drop expired entries and orphaned single-flight gates.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let expired = self.state.lock().purge_expired(now);
        self.metrics.record_expirations(expired);

        self.inflight
            .lock()
            .retain(|_, gate| Arc::strong_count(gate) > 1);
        expired
    }

    pub fn stats(&self) -> CacheSnapshot {
        let size = self.state.lock().entries.len();
        self.metrics.snapshot(size, self.settings.max_size)
    }
}
