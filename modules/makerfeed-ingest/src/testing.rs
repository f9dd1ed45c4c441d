// Test mocks for the ingestion pipeline.
//
// One mock per trait boundary:
// - MockFeedSource (FeedSource): HashMap-based category -> feed
// - MockSearcher (WebSearcher): HashMap-based query -> results, with a call log
// - MemoryStore (RecordStore + KvStore): stateful in-memory storage with
//   failure injection
//
// Plus helpers for building raw feed entries.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use makerfeed_common::{ContentRecord, NormalizedRecord, ProfileState, RecordStats, ReviewStatus};

use crate::feed::{FeedSource, FetchedFeed, RawFeedEntry};
use crate::search::{SearchResult, WebSearcher};
use crate::store::{KvStore, RecordStore};

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// A raw entry with just a title and link.
pub fn raw_entry(title: &str, link: &str) -> RawFeedEntry {
    RawFeedEntry {
        title: Some(title.to_string()),
        link: Some(link.to_string()),
        ..Default::default()
    }
}

/// A raw entry crediting `creator`.
pub fn raw_entry_by(title: &str, link: &str, creator: &str) -> RawFeedEntry {
    RawFeedEntry {
        creator: Some(creator.to_string()),
        ..raw_entry(title, link)
    }
}

pub fn fetched(entries: Vec<RawFeedEntry>) -> FetchedFeed {
    FetchedFeed {
        title: Some("Test Feed".to_string()),
        entries,
    }
}

// ---------------------------------------------------------------------------
// MockFeedSource
// ---------------------------------------------------------------------------

/// Returns `Err` for unregistered categories.
/// Builder pattern: `.on_category()`, `.failing()`.
pub struct MockFeedSource {
    feeds: HashMap<String, FetchedFeed>,
    failures: HashMap<String, String>,
    fetches: Mutex<Vec<String>>,
}

impl MockFeedSource {
    pub fn new() -> Self {
        Self {
            feeds: HashMap::new(),
            failures: HashMap::new(),
            fetches: Mutex::new(Vec::new()),
        }
    }

    pub fn on_category(mut self, category: &str, feed: FetchedFeed) -> Self {
        self.feeds.insert(category.to_string(), feed);
        self
    }

    pub fn failing(mut self, category: &str, message: &str) -> Self {
        self.failures
            .insert(category.to_string(), message.to_string());
        self
    }

    /// Categories fetched so far, in order.
    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }
}

impl Default for MockFeedSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedSource for MockFeedSource {
    fn feed_url(&self, category: &str) -> String {
        format!("https://feeds.test/launches?category={category}")
    }

    async fn fetch(&self, category: &str) -> Result<FetchedFeed> {
        self.fetches.lock().unwrap().push(category.to_string());

        if let Some(message) = self.failures.get(category) {
            bail!("{message}");
        }
        self.feeds
            .get(category)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("MockFeedSource: no feed registered for {category}"))
    }
}

// ---------------------------------------------------------------------------
// MockSearcher
// ---------------------------------------------------------------------------

/// Unregistered queries return no results. Every call is logged.
pub struct MockSearcher {
    results: HashMap<String, Vec<SearchResult>>,
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl MockSearcher {
    pub fn new() -> Self {
        Self {
            results: HashMap::new(),
            failing: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn on_query(mut self, query: &str, results: Vec<SearchResult>) -> Self {
        self.results.insert(query.to_string(), results);
        self
    }

    pub fn failing_on(mut self, query: &str) -> Self {
        self.failing.insert(query.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn queries(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockSearcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebSearcher for MockSearcher {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        self.calls.lock().unwrap().push(query.to_string());

        if self.failing.contains(query) {
            bail!("MockSearcher: provider unavailable for {query}");
        }
        Ok(self
            .results
            .get(query)
            .map(|r| r.iter().take(max_results).cloned().collect())
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory records and key/value entries. Records keep insertion order.
pub struct MemoryStore {
    records: Mutex<Vec<ContentRecord>>,
    kv: Mutex<BTreeMap<String, serde_json::Value>>,
    failing_links: Mutex<HashSet<String>>,
    vanished_keys: Mutex<BTreeSet<String>>,
    hide_next_lookup: AtomicBool,
    fail_kv: AtomicBool,
    fail_profile_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            kv: Mutex::new(BTreeMap::new()),
            failing_links: Mutex::new(HashSet::new()),
            vanished_keys: Mutex::new(BTreeSet::new()),
            hide_next_lookup: AtomicBool::new(false),
            fail_kv: AtomicBool::new(false),
            fail_profile_writes: AtomicBool::new(false),
        }
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn records(&self) -> Vec<ContentRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn record_by_link(&self, source_link: &str) -> Option<ContentRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.source_link == source_link)
            .cloned()
    }

    /// Stand-in for the review workflow.
    pub fn set_status(&self, id: Uuid, status: ReviewStatus) {
        if let Some(r) = self.records.lock().unwrap().iter_mut().find(|r| r.id == id) {
            r.status = status;
        }
    }

    /// Seed a record directly, bypassing the persister.
    pub fn seed(&self, record: ContentRecord) {
        self.records.lock().unwrap().push(record);
    }

    /// The next `find_by_source_link` reports nothing, simulating a
    /// concurrent writer that inserted between lookup and insert.
    pub fn hide_next_lookup(&self) {
        self.hide_next_lookup.store(true, Ordering::SeqCst);
    }

    /// Inserts and refreshes for this link fail.
    pub fn fail_writes_for(&self, source_link: &str) {
        self.failing_links
            .lock()
            .unwrap()
            .insert(source_link.to_string());
    }

    pub fn fail_profile_writes(&self, fail: bool) {
        self.fail_profile_writes.store(fail, Ordering::SeqCst);
    }

    /// Every key/value operation fails while set.
    pub fn fail_kv(&self, fail: bool) {
        self.fail_kv.store(fail, Ordering::SeqCst);
    }

    pub fn put_kv(&self, key: &str, value: serde_json::Value) {
        self.kv.lock().unwrap().insert(key.to_string(), value);
    }

    /// A key that prefix scans still list but that reads and deletes no
    /// longer find, as if another process removed it mid-sweep.
    pub fn vanish_kv(&self, key: &str) {
        self.vanished_keys.lock().unwrap().insert(key.to_string());
    }

    pub fn kv_len(&self) -> usize {
        self.kv.lock().unwrap().len()
    }

    fn check_link(&self, source_link: &str) -> Result<()> {
        if self.failing_links.lock().unwrap().contains(source_link) {
            bail!("MemoryStore: write rejected for {source_link}");
        }
        Ok(())
    }

    fn check_kv(&self) -> Result<()> {
        if self.fail_kv.load(Ordering::SeqCst) {
            bail!("MemoryStore: key/value store unavailable");
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find_by_source_link(&self, source_link: &str) -> Result<Option<ContentRecord>> {
        if self.hide_next_lookup.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.record_by_link(source_link))
    }

    async fn insert(&self, record: &ContentRecord) -> Result<Option<ContentRecord>> {
        self.check_link(&record.source_link)?;

        let mut records = self.records.lock().unwrap();
        if records.iter().any(|r| r.source_link == record.source_link) {
            return Ok(None);
        }
        records.push(record.clone());
        Ok(Some(record.clone()))
    }

    async fn refresh(
        &self,
        id: Uuid,
        fields: &NormalizedRecord,
        updated_at: DateTime<Utc>,
    ) -> Result<ContentRecord> {
        self.check_link(&fields.source_link)?;

        let mut records = self.records.lock().unwrap();
        let Some(record) = records.iter_mut().find(|r| r.id == id) else {
            bail!("MemoryStore: no record {id}");
        };
        record.refresh_from(fields, updated_at);
        Ok(record.clone())
    }

    async fn set_profile(&self, id: Uuid, profile: &ProfileState) -> Result<ContentRecord> {
        if self.fail_profile_writes.load(Ordering::SeqCst) {
            bail!("MemoryStore: profile write rejected for {id}");
        }

        let mut records = self.records.lock().unwrap();
        let Some(record) = records.iter_mut().find(|r| r.id == id) else {
            bail!("MemoryStore: no record {id}");
        };
        record.profile = profile.clone();
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn needing_enrichment(&self) -> Result<Vec<ContentRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.needs_enrichment())
            .cloned()
            .collect())
    }

    async fn stats(&self) -> Result<RecordStats> {
        let records = self.records.lock().unwrap();
        let mut stats = RecordStats {
            total: records.len() as u64,
            ..Default::default()
        };
        for r in records.iter() {
            *stats.by_category.entry(r.category.clone()).or_default() += 1;
            *stats.by_status.entry(r.status.to_string()).or_default() += 1;
        }
        Ok(stats)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.check_kv()?;
        Ok(self.kv.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        self.check_kv()?;
        self.kv
            .lock()
            .unwrap()
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check_kv()?;
        Ok(self.kv.lock().unwrap().remove(key).is_some())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.check_kv()?;
        let listed: BTreeSet<String> = self
            .kv
            .lock()
            .unwrap()
            .keys()
            .chain(self.vanished_keys.lock().unwrap().iter())
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        Ok(listed.into_iter().collect())
    }
}
