//! Postgres store behaviour against a real database.
//!
//! Requirements:
//!   - Docker (for Postgres via testcontainers)

use std::sync::Arc;

use chrono::Utc;

use makerfeed_common::{ContentRecord, NormalizedRecord, ProfileState, ReviewStatus};
use makerfeed_ingest::store::{KvStore, RecordStore};
use makerfeed_ingest::testutil::postgres_container;
use makerfeed_ingest::{CachedProfile, Persister, ProfileCache, UpsertOutcome};

fn normalized(link: &str, name: &str, maker: Option<&str>) -> NormalizedRecord {
    NormalizedRecord {
        name: name.into(),
        description: "A tool".into(),
        category: "developer-tools".into(),
        published_at: Utc::now(),
        source_link: link.into(),
        maker_name: maker.map(String::from),
    }
}

#[tokio::test]
#[ignore] // requires Docker
async fn upsert_is_idempotent_on_source_link() {
    let (_container, store) = postgres_container().await;
    let store = Arc::new(store);
    let persister = Persister::new(store.clone());

    let first = persister
        .upsert(&normalized("https://launches.test/p/1", "Widgetron", Some("Ada")))
        .await
        .unwrap();
    assert_eq!(first.outcome, UpsertOutcome::Created);

    let second = persister
        .upsert(&normalized("https://launches.test/p/1", "Widgetron 2", Some("Ada")))
        .await
        .unwrap();
    assert_eq!(second.outcome, UpsertOutcome::Refreshed);
    assert_eq!(second.record.id, first.record.id);
    assert_eq!(second.record.name, "Widgetron 2");
    assert_eq!(second.record.status, ReviewStatus::Pending);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.by_category["developer-tools"], 1);
}

#[tokio::test]
#[ignore] // requires Docker
async fn conflicting_insert_returns_none() {
    let (_container, store) = postgres_container().await;

    let record = ContentRecord::create(
        &normalized("https://launches.test/p/1", "Widgetron", None),
        Utc::now(),
    );
    assert!(store.insert(&record).await.unwrap().is_some());

    let rival = ContentRecord::create(
        &normalized("https://launches.test/p/1", "Rival", None),
        Utc::now(),
    );
    assert!(store.insert(&rival).await.unwrap().is_none());

    let stored = store
        .find_by_source_link("https://launches.test/p/1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.id, record.id);
}

#[tokio::test]
#[ignore] // requires Docker
async fn profile_state_round_trips_and_filters_enrichment() {
    let (_container, store) = postgres_container().await;
    let now = Utc::now();

    let with_maker = ContentRecord::create(
        &normalized("https://launches.test/p/1", "Widgetron", Some("Ada")),
        now,
    );
    let without_maker = ContentRecord::create(
        &normalized("https://launches.test/p/2", "Gadgetron", None),
        now,
    );
    store.insert(&with_maker).await.unwrap();
    store.insert(&without_maker).await.unwrap();

    let pending = store.needing_enrichment().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, with_maker.id);

    let updated = store
        .set_profile(with_maker.id, &ProfileState::Absent)
        .await
        .unwrap();
    assert_eq!(updated.profile, ProfileState::Absent);
    assert!(store.needing_enrichment().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore] // requires Docker
async fn cache_persists_through_the_kv_table() {
    let (_container, store) = postgres_container().await;
    let store = Arc::new(store);

    store
        .set("profileXcache:other", &serde_json::json!({"unrelated": true}))
        .await
        .unwrap();

    let cache = ProfileCache::new(chrono::Duration::hours(24), 10, store.clone());
    cache
        .set("John Smith", CachedProfile::Found("https://linkedin.com/in/js".into()))
        .await;

    // `_` in the prefix must match literally
    let keys = store.keys_with_prefix("profile_cache:").await.unwrap();
    assert_eq!(keys, vec!["profile_cache:john_smith"]);

    let restarted = ProfileCache::new(chrono::Duration::hours(24), 10, store.clone());
    assert_eq!(
        restarted.get("john smith").await,
        Some(CachedProfile::Found("https://linkedin.com/in/js".into()))
    );

    let cleared = restarted.clear().await;
    assert_eq!(cleared.persistent_cleared, 1);
    assert!(store.get("profileXcache:other").await.unwrap().is_some());
}
