//! Deduplicating persister.
//!
//! `source_link` is the natural key. First sighting creates a record; every
//! later sighting refreshes the feed-derived fields of the existing one. The
//! caller is told which of the two happened, decided at the write itself.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use makerfeed_common::{ContentRecord, NormalizedRecord, PersistenceError};

use crate::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Refreshed,
}

#[derive(Debug, Clone)]
pub struct Upserted {
    pub record: ContentRecord,
    pub outcome: UpsertOutcome,
}

pub struct Persister {
    store: Arc<dyn RecordStore>,
}

impl Persister {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn upsert(&self, normalized: &NormalizedRecord) -> Result<Upserted, PersistenceError> {
        let link = normalized.source_link.as_str();

        let existing = self
            .store
            .find_by_source_link(link)
            .await
            .map_err(|e| PersistenceError::new(link, e))?;

        if let Some(existing) = existing {
            return self.refresh(&existing, normalized).await;
        }

        let now = Utc::now();
        let fresh = ContentRecord::create(normalized, now);
        let inserted = self
            .store
            .insert(&fresh)
            .await
            .map_err(|e| PersistenceError::new(link, e))?;

        match inserted {
            Some(record) => {
                debug!(source_link = link, id = %record.id, "persister: created");
                Ok(Upserted {
                    record,
                    outcome: UpsertOutcome::Created,
                })
            }
            None => {
                // Lost an insert race to another writer; the row exists now.
                let existing = self
                    .store
                    .find_by_source_link(link)
                    .await
                    .map_err(|e| PersistenceError::new(link, e))?
                    .ok_or_else(|| {
                        PersistenceError::new(link, "insert conflicted but no record was found")
                    })?;
                self.refresh(&existing, normalized).await
            }
        }
    }

    async fn refresh(
        &self,
        existing: &ContentRecord,
        normalized: &NormalizedRecord,
    ) -> Result<Upserted, PersistenceError> {
        let record = self
            .store
            .refresh(existing.id, normalized, Utc::now())
            .await
            .map_err(|e| PersistenceError::new(&normalized.source_link, e))?;

        debug!(source_link = %record.source_link, id = %record.id, "persister: refreshed");
        Ok(Upserted {
            record,
            outcome: UpsertOutcome::Refreshed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;
    use makerfeed_common::{ProfileState, ReviewStatus};

    fn normalized(link: &str, name: &str) -> NormalizedRecord {
        NormalizedRecord {
            name: name.into(),
            description: "desc".into(),
            category: "developer-tools".into(),
            published_at: Utc::now(),
            source_link: link.into(),
            maker_name: Some("Ada Lovelace".into()),
        }
    }

    #[tokio::test]
    async fn first_sighting_creates_pending_unchecked_record() {
        let store = Arc::new(MemoryStore::new());
        let persister = Persister::new(store.clone());

        let upserted = persister
            .upsert(&normalized("https://launches.test/p/1", "Widgetron"))
            .await
            .unwrap();

        assert_eq!(upserted.outcome, UpsertOutcome::Created);
        assert_eq!(upserted.record.status, ReviewStatus::Pending);
        assert_eq!(upserted.record.profile, ProfileState::Unchecked);
        assert_eq!(upserted.record.created_at, upserted.record.updated_at);
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn second_sighting_refreshes_without_touching_owned_fields() {
        let store = Arc::new(MemoryStore::new());
        let persister = Persister::new(store.clone());

        let first = persister
            .upsert(&normalized("https://launches.test/p/1", "Widgetron"))
            .await
            .unwrap();

        store.set_status(first.record.id, ReviewStatus::Approved);
        store
            .set_profile(first.record.id, &ProfileState::Found("https://linkedin.com/in/ada".into()))
            .await
            .unwrap();

        let second = persister
            .upsert(&normalized("https://launches.test/p/1", "Widgetron 2.0"))
            .await
            .unwrap();

        assert_eq!(second.outcome, UpsertOutcome::Refreshed);
        assert_eq!(second.record.id, first.record.id);
        assert_eq!(second.record.name, "Widgetron 2.0");
        assert_eq!(second.record.created_at, first.record.created_at);
        assert_eq!(second.record.status, ReviewStatus::Approved);
        assert_eq!(
            second.record.profile,
            ProfileState::Found("https://linkedin.com/in/ada".into())
        );
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn lost_insert_race_falls_back_to_refresh() {
        let store = Arc::new(MemoryStore::new());
        let persister = Persister::new(store.clone());

        persister
            .upsert(&normalized("https://launches.test/p/1", "Widgetron"))
            .await
            .unwrap();
        // Existing row is invisible to the next lookup, so the insert conflicts.
        store.hide_next_lookup();

        let upserted = persister
            .upsert(&normalized("https://launches.test/p/1", "Widgetron again"))
            .await
            .unwrap();

        assert_eq!(upserted.outcome, UpsertOutcome::Refreshed);
        assert_eq!(upserted.record.name, "Widgetron again");
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn storage_failure_is_a_persistence_error() {
        let store = Arc::new(MemoryStore::new());
        store.fail_writes_for("https://launches.test/broken");
        let persister = Persister::new(store.clone());

        let err = persister
            .upsert(&normalized("https://launches.test/broken", "Broken"))
            .await
            .unwrap_err();

        assert_eq!(err.source_link, "https://launches.test/broken");
        assert_eq!(store.record_count(), 0);
    }
}
