//! Two-tier profile lookup cache.
//!
//! A bounded in-memory map sits in front of a persistent key/value store. Both
//! tiers share one expiry rule: an entry older than `ttl` is never returned
//! and is deleted when found. Negative results are cached like positive ones.
//!
//! The memory tier evicts in insertion order (not LRU). The persistent tier is
//! best-effort: storage failures are logged and read as misses.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, LazyLock, Mutex};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use makerfeed_common::CacheStorageError;

use crate::store::KvStore;

pub const CACHE_KEY_PREFIX: &str = "profile_cache:";
pub const MAX_KEY_CHARS: usize = 50;

static DISALLOWED_KEY_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s\-.]").expect("valid regex"));
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Normalize a maker name into a cache key. Used for both reads and writes.
pub fn cache_key(name: &str) -> String {
    let lowered = name.to_lowercase();
    let stripped = DISALLOWED_KEY_CHARS.replace_all(&lowered, "");
    let collapsed = WHITESPACE_RE.replace_all(stripped.trim(), "_");
    collapsed.chars().take(MAX_KEY_CHARS).collect()
}

/// A memoized lookup outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedProfile {
    Found(String),
    /// Looked up, nothing matched. Distinct from "not cached".
    NotFound,
}

impl CachedProfile {
    pub fn from_lookup(url: Option<String>) -> Self {
        match url {
            Some(url) => CachedProfile::Found(url),
            None => CachedProfile::NotFound,
        }
    }

    pub fn into_url(self) -> Option<String> {
        match self {
            CachedProfile::Found(url) => Some(url),
            CachedProfile::NotFound => None,
        }
    }
}

/// Persistent-tier representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedEntry {
    maker_name: String,
    profile_url: Option<String>,
    last_checked: DateTime<Utc>,
}

impl PersistedEntry {
    fn value(&self) -> CachedProfile {
        CachedProfile::from_lookup(self.profile_url.clone())
    }
}

// --- Reports ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub checked: usize,
    pub removed: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearReport {
    pub memory_cleared: usize,
    pub persistent_cleared: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryTierStats {
    pub size: usize,
    pub max_size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentTierStats {
    pub total: usize,
    pub valid: usize,
    pub expired: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub in_memory: MemoryTierStats,
    pub persistent: PersistentTierStats,
    pub ttl_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntryView {
    pub key: String,
    pub maker_name: String,
    pub profile_url: Option<String>,
    pub last_checked: DateTime<Utc>,
    pub expired: bool,
}

// --- Memory tier ---

struct MemoryEntry {
    value: CachedProfile,
    last_checked: DateTime<Utc>,
}

struct MemoryTier {
    entries: HashMap<String, MemoryEntry>,
    /// Keys in insertion order; front is oldest.
    order: VecDeque<String>,
    max_size: usize,
}

impl MemoryTier {
    fn new(max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            max_size,
        }
    }

    fn insert(&mut self, key: String, value: CachedProfile, last_checked: DateTime<Utc>) {
        if self.max_size == 0 {
            return;
        }

        if let Some(existing) = self.entries.get_mut(&key) {
            existing.value = value;
            existing.last_checked = last_checked;
            return;
        }

        while self.entries.len() >= self.max_size {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }

        self.order.push_back(key.clone());
        self.entries.insert(key, MemoryEntry { value, last_checked });
    }

    fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
    }

    fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        self.order.clear();
        n
    }
}

enum MemoryLookup {
    Hit(CachedProfile),
    Expired,
    Miss,
}

// --- Cache ---

pub struct ProfileCache {
    ttl: chrono::Duration,
    memory: Mutex<MemoryTier>,
    store: Arc<dyn KvStore>,
}

impl ProfileCache {
    pub fn new(ttl: chrono::Duration, max_in_memory: usize, store: Arc<dyn KvStore>) -> Self {
        Self {
            ttl,
            memory: Mutex::new(MemoryTier::new(max_in_memory)),
            store,
        }
    }

    pub fn memory_len(&self) -> usize {
        self.memory().entries.len()
    }

    /// Keys resident in the memory tier, oldest first.
    pub fn memory_keys(&self) -> Vec<String> {
        self.memory().order.iter().cloned().collect()
    }

    fn memory(&self) -> std::sync::MutexGuard<'_, MemoryTier> {
        self.memory.lock().expect("profile cache lock poisoned")
    }

    /// Memory-tier half of `get`. Drops the entry if it has expired.
    fn memory_lookup(&self, key: &str, now: DateTime<Utc>) -> MemoryLookup {
        let mut memory = self.memory();
        let expired = match memory.entries.get(key) {
            Some(entry) if !self.is_expired(entry.last_checked, now) => {
                return MemoryLookup::Hit(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            memory.remove(key);
            MemoryLookup::Expired
        } else {
            MemoryLookup::Miss
        }
    }

    fn memory_stats(&self) -> MemoryTierStats {
        let memory = self.memory();
        MemoryTierStats {
            size: memory.entries.len(),
            max_size: memory.max_size,
        }
    }

    fn is_expired(&self, last_checked: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - last_checked > self.ttl
    }

    fn persistent_key(key: &str) -> String {
        format!("{CACHE_KEY_PREFIX}{key}")
    }

    /// Look up a maker. `None` means "not cached" (or expired), not "no profile".
    pub async fn get(&self, name: &str) -> Option<CachedProfile> {
        let key = cache_key(name);
        if key.is_empty() {
            return None;
        }
        let now = Utc::now();

        match self.memory_lookup(&key, now) {
            MemoryLookup::Hit(value) => {
                debug!(key = key.as_str(), "cache: memory hit");
                return Some(value);
            }
            MemoryLookup::Expired => debug!(key = key.as_str(), "cache: memory entry expired"),
            MemoryLookup::Miss => {}
        }

        let entry = match self.read_persisted(&key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "cache: persistent tier unavailable, treating as miss");
                return None;
            }
        };

        if self.is_expired(entry.last_checked, now) {
            debug!(key = key.as_str(), "cache: persistent entry expired");
            if let Err(e) = self.store.delete(&Self::persistent_key(&key)).await {
                warn!(key = key.as_str(), error = %e, "cache: failed to purge expired entry");
            }
            return None;
        }

        debug!(key = key.as_str(), "cache: persistent hit, promoting");
        let value = entry.value();
        self.memory().insert(key, value.clone(), entry.last_checked);
        Some(value)
    }

    /// Record a lookup outcome in both tiers with `last_checked = now`.
    pub async fn set(&self, name: &str, value: CachedProfile) {
        let key = cache_key(name);
        if key.is_empty() {
            return;
        }
        let now = Utc::now();

        let entry = PersistedEntry {
            maker_name: key.clone(),
            profile_url: value.clone().into_url(),
            last_checked: now,
        };

        self.memory().insert(key.clone(), value, now);

        if let Err(e) = self.write_persisted(&key, &entry).await {
            warn!(error = %e, "cache: persistent write failed");
        } else {
            debug!(
                key = key.as_str(),
                profile_url = entry.profile_url.as_deref().unwrap_or("none"),
                "cache: stored"
            );
        }
    }

    /// Sweep the persistent tier, removing expired and unreadable entries.
    /// The memory tier purges itself lazily and is left alone.
    pub async fn cleanup(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        let now = Utc::now();

        let keys = match self.store.keys_with_prefix(CACHE_KEY_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                report.errors.push(format!("Failed to list cache keys: {e}"));
                return report;
            }
        };
        report.checked = keys.len();

        for full_key in keys {
            let stale = match self.store.get(&full_key).await {
                Ok(Some(raw)) => match serde_json::from_value::<PersistedEntry>(raw) {
                    Ok(entry) => self.is_expired(entry.last_checked, now),
                    Err(_) => true,
                },
                Ok(None) => true,
                Err(e) => {
                    report.errors.push(format!("Failed to read {full_key}: {e}"));
                    continue;
                }
            };

            if !stale {
                continue;
            }

            match self.store.delete(&full_key).await {
                Ok(true) => report.removed += 1,
                Ok(false) => {}
                Err(e) => report.errors.push(format!("Failed to delete {full_key}: {e}")),
            }
        }

        info!(
            checked = report.checked,
            removed = report.removed,
            "cache: cleanup complete"
        );
        report
    }

    /// Drop every entry from both tiers.
    pub async fn clear(&self) -> ClearReport {
        let mut report = ClearReport {
            memory_cleared: self.memory().clear(),
            ..Default::default()
        };

        match self.store.keys_with_prefix(CACHE_KEY_PREFIX).await {
            Ok(keys) => {
                for key in keys {
                    match self.store.delete(&key).await {
                        Ok(true) => report.persistent_cleared += 1,
                        Ok(false) => {}
                        Err(e) => report.errors.push(format!("Failed to delete {key}: {e}")),
                    }
                }
            }
            Err(e) => report
                .errors
                .push(format!("Failed to clear persistent cache: {e}")),
        }

        info!(
            memory = report.memory_cleared,
            persistent = report.persistent_cleared,
            "cache: cleared"
        );
        report
    }

    pub async fn stats(&self) -> CacheStats {
        let in_memory = self.memory_stats();

        let mut persistent = PersistentTierStats::default();
        let now = Utc::now();
        match self.store.keys_with_prefix(CACHE_KEY_PREFIX).await {
            Ok(keys) => {
                persistent.total = keys.len();
                for key in keys {
                    let valid = match self.store.get(&key).await {
                        Ok(Some(raw)) => serde_json::from_value::<PersistedEntry>(raw)
                            .map(|e| !self.is_expired(e.last_checked, now))
                            .unwrap_or(false),
                        _ => false,
                    };
                    if valid {
                        persistent.valid += 1;
                    } else {
                        persistent.expired += 1;
                    }
                }
            }
            Err(e) => warn!(error = %e, "cache: failed to collect persistent stats"),
        }

        CacheStats {
            in_memory,
            persistent,
            ttl_hours: self.ttl.num_seconds() as f64 / 3600.0,
        }
    }

    /// Every readable persistent entry, for debugging.
    pub async fn entries(&self) -> Vec<CacheEntryView> {
        let now = Utc::now();
        let keys = match self.store.keys_with_prefix(CACHE_KEY_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "cache: failed to list entries");
                return Vec::new();
            }
        };

        let mut views = Vec::with_capacity(keys.len());
        for full_key in keys {
            let key = full_key
                .strip_prefix(CACHE_KEY_PREFIX)
                .unwrap_or(&full_key)
                .to_string();
            match self.read_persisted(&key).await {
                Ok(Some(entry)) => views.push(CacheEntryView {
                    expired: self.is_expired(entry.last_checked, now),
                    key,
                    maker_name: entry.maker_name,
                    profile_url: entry.profile_url,
                    last_checked: entry.last_checked,
                }),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "cache: skipping unreadable entry"),
            }
        }
        views
    }

    async fn read_persisted(&self, key: &str) -> Result<Option<PersistedEntry>, CacheStorageError> {
        let full_key = Self::persistent_key(key);
        let raw = self
            .store
            .get(&full_key)
            .await
            .map_err(|e| CacheStorageError::Read {
                key: full_key.clone(),
                message: e.to_string(),
            })?;

        raw.map(|value| {
            serde_json::from_value(value).map_err(|e| CacheStorageError::Malformed {
                key: full_key.clone(),
                message: e.to_string(),
            })
        })
        .transpose()
    }

    async fn write_persisted(&self, key: &str, entry: &PersistedEntry) -> Result<(), CacheStorageError> {
        let full_key = Self::persistent_key(key);
        let value = serde_json::to_value(entry).map_err(|e| CacheStorageError::Write {
            key: full_key.clone(),
            message: e.to_string(),
        })?;

        self.store
            .set(&full_key, &value)
            .await
            .map_err(|e| CacheStorageError::Write {
                key: full_key,
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;
    use std::time::Duration;

    fn cache_with(store: Arc<MemoryStore>, ttl: chrono::Duration, max: usize) -> ProfileCache {
        ProfileCache::new(ttl, max, store)
    }

    fn persisted(name: &str, url: Option<&str>, last_checked: DateTime<Utc>) -> serde_json::Value {
        serde_json::json!({
            "maker_name": name,
            "profile_url": url,
            "last_checked": last_checked,
        })
    }

    #[test]
    fn cache_key_normalizes_names() {
        assert_eq!(cache_key("John Smith"), "john_smith");
        assert_eq!(cache_key("  John   Smith!! "), "john_smith");
        assert_eq!(cache_key("Jean-Luc O'Brien Jr."), "jean-luc_obrien_jr.");
        assert_eq!(cache_key("@#$%"), "");
        assert_eq!(cache_key(&"a".repeat(80)).len(), MAX_KEY_CHARS);
        assert_eq!(cache_key("JOHN SMITH"), cache_key("john smith"));
    }

    #[tokio::test]
    async fn set_then_get_within_ttl_hits() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_with(store.clone(), chrono::Duration::hours(24), 10);

        cache
            .set("John Smith", CachedProfile::Found("https://linkedin.com/in/js".into()))
            .await;
        cache.set("Nobody Known", CachedProfile::NotFound).await;

        assert_eq!(
            cache.get("john smith").await,
            Some(CachedProfile::Found("https://linkedin.com/in/js".into()))
        );
        assert_eq!(cache.get("Nobody Known").await, Some(CachedProfile::NotFound));
        assert_eq!(cache.get("Someone Else").await, None);
        assert_eq!(store.kv_len(), 2);
    }

    #[tokio::test]
    async fn expired_entries_are_missed_and_purged_from_both_tiers() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_with(store.clone(), chrono::Duration::milliseconds(50), 10);

        cache.set("John Smith", CachedProfile::NotFound).await;
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(cache.get("John Smith").await, None);
        assert_eq!(cache.memory_len(), 0);
        assert_eq!(store.kv_len(), 0);
    }

    #[tokio::test]
    async fn cleanup_removes_expired_persistent_copies() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_with(store.clone(), chrono::Duration::milliseconds(50), 10);

        cache.set("John Smith", CachedProfile::NotFound).await;
        tokio::time::sleep(Duration::from_millis(120)).await;

        let report = cache.cleanup().await;
        assert_eq!(report.checked, 1);
        assert_eq!(report.removed, 1);
        assert!(report.errors.is_empty());
        assert_eq!(store.kv_len(), 0);
        // memory tier is untouched by cleanup
        assert_eq!(cache.memory_len(), 1);
        assert_eq!(cache.get("John Smith").await, None);
    }

    #[tokio::test]
    async fn cleanup_keeps_valid_and_drops_malformed() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_with(store.clone(), chrono::Duration::hours(24), 10);
        let now = Utc::now();

        store.put_kv("profile_cache:fresh", persisted("fresh", None, now));
        store.put_kv(
            "profile_cache:stale",
            persisted("stale", Some("https://linkedin.com/in/s"), now - chrono::Duration::hours(25)),
        );
        store.put_kv("profile_cache:junk", serde_json::json!("not an entry"));
        store.put_kv("unrelated:key", serde_json::json!(1));

        let report = cache.cleanup().await;
        assert_eq!(report.checked, 3);
        assert_eq!(report.removed, 2);
        assert_eq!(store.kv_len(), 2);
        assert_eq!(cache.get("fresh").await, Some(CachedProfile::NotFound));
    }

    #[tokio::test]
    async fn cleanup_only_counts_entries_it_actually_deleted() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_with(store.clone(), chrono::Duration::hours(24), 10);
        store.put_kv(
            "profile_cache:stale",
            persisted("stale", None, Utc::now() - chrono::Duration::hours(25)),
        );
        store.vanish_kv("profile_cache:gone");

        let report = cache.cleanup().await;
        assert_eq!(report.checked, 2);
        assert_eq!(report.removed, 1);
        assert!(report.errors.is_empty());
        assert_eq!(store.kv_len(), 0);
    }

    #[tokio::test]
    async fn memory_tier_evicts_oldest_inserted_first() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_with(store.clone(), chrono::Duration::hours(24), 3);

        for name in ["alpha", "bravo", "charlie"] {
            cache.set(name, CachedProfile::NotFound).await;
        }
        // touching alpha does not protect it: eviction is by insertion, not use
        cache.get("alpha").await;
        cache.set("delta", CachedProfile::NotFound).await;

        assert_eq!(cache.memory_len(), 3);
        assert_eq!(cache.memory_keys(), vec!["bravo", "charlie", "delta"]);
        // the persistent tier still has everything
        assert_eq!(store.kv_len(), 4);
    }

    #[tokio::test]
    async fn overwriting_a_resident_key_does_not_evict() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_with(store, chrono::Duration::hours(24), 2);

        cache.set("alpha", CachedProfile::NotFound).await;
        cache.set("bravo", CachedProfile::NotFound).await;
        cache
            .set("alpha", CachedProfile::Found("https://linkedin.com/in/a".into()))
            .await;

        assert_eq!(cache.memory_keys(), vec!["alpha", "bravo"]);
        assert_eq!(
            cache.get("alpha").await,
            Some(CachedProfile::Found("https://linkedin.com/in/a".into()))
        );
    }

    #[tokio::test]
    async fn persistent_hit_is_promoted_into_memory() {
        let store = Arc::new(MemoryStore::new());
        let first = cache_with(store.clone(), chrono::Duration::hours(24), 10);
        first
            .set("John Smith", CachedProfile::Found("https://linkedin.com/in/js".into()))
            .await;

        // fresh process, same backing store
        let second = cache_with(store.clone(), chrono::Duration::hours(24), 10);
        assert_eq!(second.memory_len(), 0);
        assert_eq!(
            second.get("John Smith").await,
            Some(CachedProfile::Found("https://linkedin.com/in/js".into()))
        );
        assert_eq!(second.memory_keys(), vec!["john_smith"]);
    }

    #[tokio::test]
    async fn persistent_failures_degrade_to_misses() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_with(store.clone(), chrono::Duration::hours(24), 10);
        store.fail_kv(true);

        cache.set("John Smith", CachedProfile::NotFound).await;
        // memory tier still serves it
        assert_eq!(cache.get("John Smith").await, Some(CachedProfile::NotFound));
        // a name only the broken tier could know is a miss, not an error
        assert_eq!(cache.get("Someone Else").await, None);

        let report = cache.cleanup().await;
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn clear_empties_both_tiers() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_with(store.clone(), chrono::Duration::hours(24), 10);
        cache.set("alpha", CachedProfile::NotFound).await;
        cache.set("bravo", CachedProfile::NotFound).await;
        store.put_kv("unrelated:key", serde_json::json!(1));

        let report = cache.clear().await;
        assert_eq!(report.memory_cleared, 2);
        assert_eq!(report.persistent_cleared, 2);
        assert_eq!(cache.memory_len(), 0);
        assert_eq!(store.kv_len(), 1);
    }

    #[tokio::test]
    async fn stats_split_valid_and_expired() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_with(store.clone(), chrono::Duration::hours(24), 10);
        let now = Utc::now();

        cache.set("alpha", CachedProfile::NotFound).await;
        store.put_kv(
            "profile_cache:old",
            persisted("old", None, now - chrono::Duration::hours(48)),
        );

        let stats = cache.stats().await;
        assert_eq!(stats.in_memory, MemoryTierStats { size: 1, max_size: 10 });
        assert_eq!(
            stats.persistent,
            PersistentTierStats {
                total: 2,
                valid: 1,
                expired: 1
            }
        );
        assert_eq!(stats.ttl_hours, 24.0);

        let entries = cache.entries().await;
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.key == "old" && e.expired));
        assert!(entries.iter().any(|e| e.key == "alpha" && !e.expired));
    }
}
