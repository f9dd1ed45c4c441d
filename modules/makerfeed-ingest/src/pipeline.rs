//! Ingestion pipeline: fetch -> normalize -> persist -> enrich, per category.
//!
//! Failures are contained at the smallest unit that can fail. A bad entry is
//! skipped, a bad category is recorded in the summary, and only a run that
//! cannot start at all returns an error.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use makerfeed_common::{
    CategorySummary, ContentRecord, EnrichmentError, EnrichmentSummary, FeedFetchError,
    FeedPreview, PipelineError, PreviewItem, ProfileState, RunSummary, StatusReport,
};

use crate::feed::FeedSource;
use crate::matcher::{ProfileLookup, ProfileMatcher};
use crate::normalizer::normalize;
use crate::persister::{Persister, UpsertOutcome};
use crate::store::RecordStore;

const PREVIEW_SAMPLE_SIZE: usize = 3;

pub struct IngestPipeline {
    feeds: Arc<dyn FeedSource>,
    store: Arc<dyn RecordStore>,
    persister: Persister,
    matcher: Arc<ProfileMatcher>,
    categories: Vec<String>,
    /// Held for the duration of any run that writes records.
    run_lock: Mutex<()>,
}

impl IngestPipeline {
    pub fn new(
        feeds: Arc<dyn FeedSource>,
        store: Arc<dyn RecordStore>,
        matcher: Arc<ProfileMatcher>,
        categories: Vec<String>,
    ) -> Self {
        Self {
            feeds,
            persister: Persister::new(store.clone()),
            store,
            matcher,
            categories,
            run_lock: Mutex::new(()),
        }
    }

    /// Ingest every configured category in order.
    pub async fn run_all(&self) -> Result<RunSummary, PipelineError> {
        if self.categories.is_empty() {
            return Err(PipelineError::NoCategories);
        }
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| PipelineError::RunInProgress)?;

        info!(categories = self.categories.len(), "ingest: run starting");
        let mut summary = RunSummary::default();

        for category in &self.categories {
            match self.ingest_category(category).await {
                Ok(category_summary) => summary.record(category_summary),
                Err(e) => {
                    error!(category = category.as_str(), error = %e, "ingest: category failed");
                    summary.record_error(category, e);
                }
            }
        }

        info!(
            processed = summary.total_processed,
            new = summary.total_new,
            duplicates = summary.total_duplicates,
            errors = summary.errors.len(),
            "ingest: run complete"
        );
        Ok(summary)
    }

    /// Ingest a single category. Unknown categories are rejected before any
    /// fetch.
    pub async fn run_category(&self, category: &str) -> Result<CategorySummary, PipelineError> {
        self.validate_category(category)?;
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| PipelineError::RunInProgress)?;

        Ok(self.ingest_category(category).await?)
    }

    /// Fetch and parse a category feed without writing anything.
    pub async fn preview_category(&self, category: &str) -> Result<FeedPreview, PipelineError> {
        self.validate_category(category)?;

        let feed = self
            .feeds
            .fetch(category)
            .await
            .map_err(|e| FeedFetchError::new(category, format!("{e:#}")))?;

        let sample_items = feed
            .entries
            .iter()
            .take(PREVIEW_SAMPLE_SIZE)
            .map(|e| PreviewItem {
                title: e.title.clone(),
                link: e.link.clone(),
                published: e.published,
                has_description: e.description.as_deref().is_some_and(|d| !d.trim().is_empty()),
                has_content: e.content.as_deref().is_some_and(|c| !c.trim().is_empty()),
            })
            .collect();

        Ok(FeedPreview {
            category: category.to_string(),
            url: self.feeds.feed_url(category),
            feed_title: feed.title,
            item_count: feed.entries.len(),
            sample_items,
        })
    }

    /// Look up profiles for every stored record that has a maker but was
    /// never checked. `successful` counts profiles found; `failed` counts
    /// makers with no profile plus records whose state could not be stored.
    /// Only the latter appear in `errors`.
    pub async fn enrich_pending(&self) -> Result<EnrichmentSummary, PipelineError> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| PipelineError::RunInProgress)?;

        let pending = self.store.needing_enrichment().await?;
        info!(count = pending.len(), "enrich: starting");

        let mut summary = EnrichmentSummary::default();
        for record in pending {
            summary.total_processed += 1;
            match self.enrich(&record).await {
                Ok(lookup) => {
                    if lookup.url.is_some() {
                        summary.successful += 1;
                    } else {
                        summary.failed += 1;
                    }
                    if lookup.from_cache {
                        summary.cache_hits += 1;
                    }
                }
                Err(e) => {
                    warn!(id = %record.id, error = %e, "enrich: record failed");
                    summary.failed += 1;
                    summary.errors.push(EnrichmentError {
                        record_id: record.id,
                        name: record.name.clone(),
                        maker_name: record.maker_name.clone(),
                        error: format!("{e:#}"),
                    });
                }
            }
        }

        info!(
            processed = summary.total_processed,
            successful = summary.successful,
            failed = summary.failed,
            cache_hits = summary.cache_hits,
            "enrich: complete"
        );
        Ok(summary)
    }

    pub async fn status(&self) -> Result<StatusReport, PipelineError> {
        Ok(StatusReport {
            categories: self.categories.clone(),
            records: self.store.stats().await?,
        })
    }

    fn validate_category(&self, category: &str) -> Result<(), PipelineError> {
        if self.categories.iter().any(|c| c == category) {
            return Ok(());
        }
        Err(PipelineError::InvalidCategory {
            category: category.to_string(),
            valid_categories: self.categories.clone(),
        })
    }

    async fn ingest_category(&self, category: &str) -> Result<CategorySummary, FeedFetchError> {
        let feed = self
            .feeds
            .fetch(category)
            .await
            .map_err(|e| FeedFetchError::new(category, format!("{e:#}")))?;

        info!(category, entries = feed.entries.len(), "ingest: feed fetched");

        let now = Utc::now();
        let mut summary = CategorySummary {
            category: category.to_string(),
            ..Default::default()
        };

        for entry in &feed.entries {
            let normalized = match normalize(entry, category, now) {
                Ok(n) => n,
                Err(e) => {
                    warn!(
                        category,
                        link = entry.link.as_deref().unwrap_or(""),
                        reason = %e,
                        "ingest: skipping invalid entry"
                    );
                    continue;
                }
            };

            let upserted = match self.persister.upsert(&normalized).await {
                Ok(u) => u,
                Err(e) => {
                    error!(category, error = %e, "ingest: failed to persist entry");
                    continue;
                }
            };

            summary.processed += 1;
            match upserted.outcome {
                UpsertOutcome::Created => summary.new_products += 1,
                UpsertOutcome::Refreshed => summary.duplicates += 1,
            }

            if upserted.record.needs_enrichment() {
                if let Err(e) = self.enrich(&upserted.record).await {
                    warn!(id = %upserted.record.id, error = %e, "ingest: enrichment failed");
                }
            }
        }

        info!(
            category,
            processed = summary.processed,
            new = summary.new_products,
            duplicates = summary.duplicates,
            "ingest: category complete"
        );
        Ok(summary)
    }

    async fn enrich(&self, record: &ContentRecord) -> anyhow::Result<ProfileLookup> {
        let maker = record.maker_name.as_deref().unwrap_or_default();
        let lookup = self.matcher.lookup(maker).await;

        self.store
            .set_profile(record.id, &ProfileState::from_lookup(lookup.url.clone()))
            .await?;
        Ok(lookup)
    }
}
