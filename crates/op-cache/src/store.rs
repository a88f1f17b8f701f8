//! Namespaced catalog cache with TTL, LRU eviction and integrity checks
//!
//! Keys are plain strings. Callers prefix them with their own namespace tag
//! (`primary:`, `secondary:`, `custom:`, `triple:`); the cache itself does
//! not interpret prefixes, which is what keeps `invalidate_pattern` scoped to
//! the keys that textually match.

use crate::record::{CacheRecord, Corruption};
use lru::LruCache;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default capacity when none is configured
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

const FALLBACK_CAPACITY: NonZeroUsize = match NonZeroUsize::new(DEFAULT_MAX_ENTRIES) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

/// Default TTL for `set` calls without an explicit TTL
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Construction options for [`CatalogCache`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheOptions {
    pub enabled: bool,
    pub max_entries: usize,
    #[serde(with = "duration_secs")]
    pub default_ttl: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: DEFAULT_MAX_ENTRIES,
            default_ttl: DEFAULT_TTL,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// One stored slot
#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub(crate) raw: String,
    pub(crate) ttl: Duration,
    pub(crate) inserted_at: Instant,
}

impl Slot {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }

    pub(crate) fn remaining(&self) -> Duration {
        self.ttl.saturating_sub(self.inserted_at.elapsed())
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub enabled: bool,
    pub count: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub corruptions: u64,
    pub bytes_approx: usize,
}

/// Shared key/value cache for catalog data
pub struct CatalogCache {
    pub(crate) entries: RwLock<LruCache<String, Slot>>,
    default_ttl: Duration,
    enabled: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    corruptions: AtomicU64,
}

impl CatalogCache {
    /// Create a new cache
    pub fn new(options: CacheOptions) -> Self {
        let capacity = NonZeroUsize::new(options.max_entries).unwrap_or(FALLBACK_CAPACITY);
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            default_ttl: options.default_ttl,
            enabled: AtomicBool::new(options.enabled),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            corruptions: AtomicU64::new(0),
        }
    }

    /// A cache that never stores anything
    pub fn disabled() -> Self {
        Self::new(CacheOptions {
            enabled: false,
            ..CacheOptions::default()
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Turn caching on or off globally. Existing entries survive a toggle and
    /// are invisible while disabled; deletes and invalidations still apply.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        info!(enabled, "Catalog cache toggled");
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a live, intact value. Expired, corrupt or undecodable records
    /// are purged and reported as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.is_enabled() {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let mut entries = self.entries.write().await;
        let raw = match entries.get(key).map(|slot| (slot.is_expired(), slot.raw.clone())) {
            Some((true, _)) => {
                entries.pop(key);
                debug!(key, "Cache entry expired");
                None
            }
            Some((false, raw)) => Some(raw),
            None => None,
        };

        let Some(raw) = raw else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let decoded = CacheRecord::decode(&raw)
            .and_then(CacheRecord::into_verified)
            .and_then(|value| {
                serde_json::from_value::<T>(value)
                    .map_err(|e| Corruption::Unparseable(e.to_string()))
            });

        match decoded {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Cache hit");
                Some(value)
            }
            Err(corruption) => {
                entries.pop(key);
                self.corruptions.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                warn!(key, %corruption, "Discarding corrupt cache entry");
                None
            }
        }
    }

    /// Store a value. Serialization failures are logged and swallowed.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        if !self.is_enabled() {
            return;
        }

        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "Value is not cacheable");
                return;
            }
        };
        let raw = match serde_json::to_string(&CacheRecord::wrap(value)) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "Failed to encode cache record");
                return;
            }
        };

        self.insert_raw(key.to_string(), raw, ttl.unwrap_or(self.default_ttl))
            .await;
    }

    pub(crate) async fn insert_raw(&self, key: String, raw: String, ttl: Duration) {
        let slot = Slot {
            raw,
            ttl,
            inserted_at: Instant::now(),
        };

        let mut entries = self.entries.write().await;
        if let Some((evicted, _)) = entries.push(key.clone(), slot) {
            if evicted != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %evicted, "Evicted least recently used cache entry");
            }
        }
    }

    /// Remove one key, returning how many entries were removed
    pub async fn delete(&self, key: &str) -> usize {
        usize::from(self.entries.write().await.pop(key).is_some())
    }

    /// Remove every key matching a glob where `*` matches any run of
    /// characters. The match is anchored at both ends.
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        let matcher = match glob_to_regex(pattern) {
            Ok(re) => re,
            Err(e) => {
                warn!(pattern, error = %e, "Invalid invalidation pattern");
                return 0;
            }
        };

        let mut entries = self.entries.write().await;
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, _)| matcher.is_match(key))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            entries.pop(key);
        }

        if !doomed.is_empty() {
            debug!(pattern, count = doomed.len(), "Invalidated cache entries");
        }
        doomed.len()
    }

    /// Remove a fixed set of keys
    pub async fn invalidate_keys<S: AsRef<str>>(&self, keys: &[S]) -> usize {
        let mut entries = self.entries.write().await;
        let mut removed = 0;
        for key in keys {
            if entries.pop(key.as_ref()).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Return the live value for `key`, or run `producer`, store its result
    /// and return it. Producer errors propagate and nothing is stored.
    pub async fn warm<T, E, F, Fut>(&self, key: &str, ttl: Option<Duration>, producer: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get::<T>(key).await {
            return Ok(value);
        }

        let value = producer().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    /// Live keys, most recently used first
    pub async fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|(_, slot)| !slot.is_expired())
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .await
            .peek(key)
            .map(|slot| !slot.is_expired())
            .unwrap_or(false)
    }

    /// Number of stored slots, including ones that expired but were not yet purged
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Clear all cached entries
    pub async fn clear(&self) {
        self.entries.write().await.clear();
        info!("Catalog cache cleared");
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        let bytes_approx = entries
            .iter()
            .map(|(key, slot)| key.len() + slot.raw.len())
            .sum();

        CacheStats {
            enabled: self.is_enabled(),
            count: entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            corruptions: self.corruptions.load(Ordering::Relaxed),
            bytes_approx,
        }
    }

    /// Evict expired entries
    pub async fn evict_expired(&self) -> usize {
        let mut entries = self.entries.write().await;

        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, slot)| slot.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            entries.pop(key);
        }

        let count = expired.len();
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
        if count > 0 {
            debug!("Evicted {} expired cache entries", count);
        }
        count
    }
}

impl Default for CatalogCache {
    fn default() -> Self {
        Self::new(CacheOptions::default())
    }
}

/// Compile a `*` glob into an anchored regex
pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", body))
}
