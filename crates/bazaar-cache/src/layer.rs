//! Fresh/stale cache layer
//!
//! Entries carry `(fresh_until, stale_until, tags)`:
//! - before `fresh_until` a lookup is [`Lookup::Fresh`]
//! - between the two it is [`Lookup::Stale`] and the caller should refresh
//! - after `stale_until` it is [`Lookup::Miss`]; the value is still kept as
//!   last-known data for upstream outages until evicted or invalidated
//!
//! # Invalidation ordering
//!
//! Every invalidation bumps a global epoch before removing keys. Loads
//! remember the epoch they started under and are dropped at insert time if
//! the epoch moved. The check and the insert happen under the key's shard
//! lock, so a value computed before an invalidation is never inserted after
//! it.

use crate::error::CacheError;
use crate::keys::CacheTtlTable;
use crate::pattern::KeyPattern;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Lookup result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    /// Within the fresh lifetime
    Fresh(V),
    /// Past fresh, within stale
    Stale(V),
    /// Absent or past stale
    Miss,
}

impl<V> Lookup<V> {
    /// Freshness label
    #[must_use]
    pub fn freshness(&self) -> Freshness {
        match self {
            Self::Fresh(_) => Freshness::Fresh,
            Self::Stale(_) => Freshness::Stale,
            Self::Miss => Freshness::Miss,
        }
    }
}

/// Where a served value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Freshness {
    /// Fresh cache hit
    Fresh,
    /// Stale cache hit; a refill was scheduled
    Stale,
    /// Computed for this request
    Miss,
}

impl Freshness {
    /// Metric label
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::Miss => "miss",
        }
    }
}

struct CacheEntry<V> {
    value: V,
    fresh_until: Instant,
    stale_until: Instant,
    tags: BTreeSet<String>,
}

/// Counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Fresh hits
    pub fresh_hits: u64,
    /// Stale hits
    pub stale_hits: u64,
    /// Misses
    pub misses: u64,
    /// Background refills started
    pub refills: u64,
    /// Background refills that failed
    pub refill_failures: u64,
    /// Keys removed by invalidation
    pub invalidated: u64,
    /// Inserts dropped because an invalidation overtook the load
    pub rejected_puts: u64,
    /// Entries evicted for capacity
    pub evictions: u64,
    /// Current entry count
    pub entries: u64,
}

#[derive(Debug, Default)]
struct Counters {
    fresh_hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    refills: AtomicU64,
    refill_failures: AtomicU64,
    invalidated: AtomicU64,
    rejected_puts: AtomicU64,
    evictions: AtomicU64,
}

/// Keyed TTL store with tag and pattern invalidation
pub struct CacheLayer<V> {
    entries: DashMap<String, CacheEntry<V>>,
    tag_index: DashMap<String, BTreeSet<String>>,
    refilling: DashMap<String, ()>,
    epoch: AtomicU64,
    ttl: CacheTtlTable,
    capacity: usize,
    counters: Counters,
}

impl<V> fmt::Debug for CacheLayer<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheLayer")
            .field("entries", &self.entries.len())
            .field("capacity", &self.capacity)
            .field("epoch", &self.epoch.load(Ordering::Relaxed))
            .finish()
    }
}

impl<V> CacheLayer<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create layer with a TTL table and entry capacity
    #[must_use]
    pub fn new(ttl: CacheTtlTable, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            tag_index: DashMap::new(),
            refilling: DashMap::new(),
            epoch: AtomicU64::new(0),
            ttl,
            capacity: capacity.max(1),
            counters: Counters::default(),
        }
    }

    /// TTL table
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> &CacheTtlTable {
        &self.ttl
    }

    /// Current invalidation epoch
    #[inline]
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Look up `key`
    pub fn get(&self, key: &str) -> Lookup<V> {
        let now = Instant::now();
        let lookup = match self.entries.get(key) {
            Some(entry) if now < entry.fresh_until => Lookup::Fresh(entry.value.clone()),
            Some(entry) if now < entry.stale_until => Lookup::Stale(entry.value.clone()),
            _ => Lookup::Miss,
        };
        let (counter, label) = match &lookup {
            Lookup::Fresh(_) => (&self.counters.fresh_hits, "fresh"),
            Lookup::Stale(_) => (&self.counters.stale_hits, "stale"),
            Lookup::Miss => (&self.counters.misses, "miss"),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("bazaar_cache_lookups_total", "result" => label).increment(1);
        lookup
    }

    /// Value for `key` regardless of expiry, unless invalidated or evicted
    #[must_use]
    pub fn last_known(&self, key: &str) -> Option<V> {
        self.entries.get(key).map(|e| e.value.clone())
    }

    /// Insert with the TTLs of the key's prefix
    pub fn put(&self, key: &str, value: V, tags: &[String]) {
        let ttl = self.ttl.for_key(key);
        self.insert(key, value, ttl.fresh(), ttl.stale(), tags, None);
    }

    /// Insert with explicit TTLs
    pub fn put_with_ttl(
        &self,
        key: &str,
        value: V,
        fresh: Duration,
        stale: Duration,
        tags: &[String],
    ) {
        self.insert(key, value, fresh, stale, tags, None);
    }

    /// Insert only if no invalidation happened since `epoch`
    ///
    /// Returns whether the value was stored.
    pub fn put_if_current(&self, key: &str, value: V, tags: &[String], epoch: u64) -> bool {
        let ttl = self.ttl.for_key(key);
        self.insert(key, value, ttl.fresh(), ttl.stale(), tags, Some(epoch))
    }

    fn insert(
        &self,
        key: &str,
        value: V,
        fresh: Duration,
        stale: Duration,
        tags: &[String],
        epoch: Option<u64>,
    ) -> bool {
        let now = Instant::now();
        let tags: BTreeSet<String> = tags.iter().cloned().collect();
        {
            let slot = self.entries.entry(key.to_string());
            if epoch.is_some_and(|started| started != self.epoch.load(Ordering::SeqCst)) {
                self.counters.rejected_puts.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key, "dropping load overtaken by invalidation");
                return false;
            }
            let entry = CacheEntry {
                value,
                fresh_until: now + fresh,
                stale_until: now + stale.max(fresh),
                tags: tags.clone(),
            };
            match slot {
                MapEntry::Occupied(mut occupied) => {
                    occupied.insert(entry);
                }
                MapEntry::Vacant(vacant) => {
                    vacant.insert(entry);
                }
            }
        }
        for tag in tags {
            self.tag_index
                .entry(tag)
                .or_default()
                .insert(key.to_string());
        }
        self.enforce_capacity();
        true
    }

    /// Remove every key matching `pattern`; returns the number removed
    ///
    /// After this returns no matching key is served from values inserted
    /// before the call.
    ///
    /// # Errors
    /// Malformed pattern.
    pub fn invalidate_by_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        let pattern = KeyPattern::parse(pattern)?;
        self.epoch.fetch_add(1, Ordering::SeqCst);

        let prefix = pattern.literal_prefix();
        let mut removed = 0usize;
        self.entries.retain(|key, _| {
            let hit = key.starts_with(&prefix) && pattern.matches(key);
            if hit {
                removed += 1;
            }
            !hit
        });

        self.record_invalidation(removed);
        tracing::debug!(pattern = %pattern, removed, "invalidated by pattern");
        Ok(removed)
    }

    /// Remove every key carrying `tag`; returns the number removed
    pub fn invalidate_by_tag(&self, tag: &str) -> usize {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let keys = self
            .tag_index
            .remove(tag)
            .map(|(_, keys)| keys)
            .unwrap_or_default();

        let mut removed = 0usize;
        for key in keys {
            if self
                .entries
                .remove_if(&key, |_, entry| entry.tags.contains(tag))
                .is_some()
            {
                removed += 1;
            }
        }
        self.record_invalidation(removed);
        tracing::debug!(tag, removed, "invalidated by tag");
        removed
    }

    /// Remove everything
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let removed = self.entries.len();
        self.entries.clear();
        self.tag_index.clear();
        self.record_invalidation(removed);
    }

    fn record_invalidation(&self, removed: usize) {
        self.counters
            .invalidated
            .fetch_add(removed as u64, Ordering::Relaxed);
        metrics::counter!("bazaar_cache_invalidated_total").increment(removed as u64);
    }

    fn enforce_capacity(&self) {
        if self.entries.len() <= self.capacity {
            return;
        }
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.stale_until > now);

        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.stale_until)
                .map(|e| e.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                    self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }
    }

    /// Counters snapshot
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            fresh_hits: c.fresh_hits.load(Ordering::Relaxed),
            stale_hits: c.stale_hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            refills: c.refills.load(Ordering::Relaxed),
            refill_failures: c.refill_failures.load(Ordering::Relaxed),
            invalidated: c.invalidated.load(Ordering::Relaxed),
            rejected_puts: c.rejected_puts.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            entries: self.entries.len() as u64,
        }
    }

    /// Whether a background refill is in flight for `key`
    #[must_use]
    pub fn is_refilling(&self, key: &str) -> bool {
        self.refilling.contains_key(key)
    }

    /// Serve `key` from cache or `load`
    ///
    /// - fresh hit: returned as is
    /// - stale hit: returned as is, and a single background refill is
    ///   scheduled for the key (no-op if one is already in flight)
    /// - miss: `load` runs inline and the result is stored unless an
    ///   invalidation overtook it
    ///
    /// Background refills run on their own task and are not cancelled when
    /// the request that triggered them goes away.
    ///
    /// # Errors
    /// The loader's error on a miss.
    pub async fn get_or_load<F, Fut, E>(
        self: &Arc<Self>,
        key: &str,
        tags: &[String],
        load: F,
    ) -> Result<(V, Freshness), E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        match self.get(key) {
            Lookup::Fresh(value) => Ok((value, Freshness::Fresh)),
            Lookup::Stale(value) => {
                self.spawn_refill(key, tags, load);
                Ok((value, Freshness::Stale))
            }
            Lookup::Miss => {
                let epoch = self.epoch();
                let value = load().await?;
                self.put_if_current(key, value.clone(), tags, epoch);
                Ok((value, Freshness::Miss))
            }
        }
    }

    /// Schedule a background refill for `key` unless one is in flight
    ///
    /// Returns whether a refill was started.
    pub fn spawn_refill<F, Fut, E>(self: &Arc<Self>, key: &str, tags: &[String], load: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        match self.refilling.entry(key.to_string()) {
            MapEntry::Occupied(_) => return false,
            MapEntry::Vacant(slot) => {
                slot.insert(());
            }
        }
        self.counters.refills.fetch_add(1, Ordering::Relaxed);

        let layer = Arc::clone(self);
        let key = key.to_string();
        let tags = tags.to_vec();
        let epoch = self.epoch();
        let guard = RefillGuard {
            layer: Arc::clone(self),
            key: key.clone(),
        };
        tokio::spawn(async move {
            let _guard = guard;
            match load().await {
                Ok(value) => {
                    layer.put_if_current(&key, value, &tags, epoch);
                }
                Err(err) => {
                    layer
                        .counters
                        .refill_failures
                        .fetch_add(1, Ordering::Relaxed);
                    let err = CacheError::RefillFailed {
                        key: key.clone(),
                        reason: err.to_string(),
                    };
                    tracing::warn!(error = %err, "background refill failed");
                }
            }
        });
        true
    }
}

/// Clears the in-flight mark however the refill task ends
struct RefillGuard<V> {
    layer: Arc<CacheLayer<V>>,
    key: String,
}

impl<V> Drop for RefillGuard<V> {
    fn drop(&mut self) {
        self.layer.refilling.remove(&self.key);
    }
}
