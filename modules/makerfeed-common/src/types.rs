use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Review Types ---

/// Review state of a record. Owned by the review workflow; ingestion only
/// ever sets `Pending` on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewStatus::Pending => write!(f, "pending"),
            ReviewStatus::Approved => write!(f, "approved"),
            ReviewStatus::Rejected => write!(f, "rejected"),
        }
    }
}

impl ReviewStatus {
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "approved" => ReviewStatus::Approved,
            "rejected" => ReviewStatus::Rejected,
            _ => ReviewStatus::Pending,
        }
    }
}

// --- Profile Types ---

/// Enrichment state of a record's maker profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", content = "url", rename_all = "snake_case")]
pub enum ProfileState {
    /// No lookup has been attempted yet.
    #[default]
    Unchecked,
    /// Looked up, nothing matched.
    Absent,
    Found(String),
}

impl ProfileState {
    pub fn from_lookup(url: Option<String>) -> Self {
        match url {
            Some(url) => ProfileState::Found(url),
            None => ProfileState::Absent,
        }
    }

    pub fn is_checked(&self) -> bool {
        !matches!(self, ProfileState::Unchecked)
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            ProfileState::Found(url) => Some(url),
            _ => None,
        }
    }
}

// --- Record Types ---

/// A feed entry after cleaning. Every field here can be re-derived from the
/// feed, so a re-ingest may overwrite them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub name: String,
    pub description: String,
    pub category: String,
    pub published_at: DateTime<Utc>,
    pub source_link: String,
    pub maker_name: Option<String>,
}

/// A persisted launch record. `source_link` is the natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: Uuid,
    pub source_link: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub published_at: DateTime<Utc>,
    pub maker_name: Option<String>,
    pub profile: ProfileState,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentRecord {
    /// Build a fresh record for a first sighting of `source_link`.
    pub fn create(normalized: &NormalizedRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_link: normalized.source_link.clone(),
            name: normalized.name.clone(),
            description: normalized.description.clone(),
            category: normalized.category.clone(),
            published_at: normalized.published_at,
            maker_name: normalized.maker_name.clone(),
            profile: ProfileState::Unchecked,
            status: ReviewStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite the feed-derived fields. Leaves identity, `created_at`,
    /// `status` and `profile` alone.
    pub fn refresh_from(&mut self, normalized: &NormalizedRecord, now: DateTime<Utc>) {
        self.name = normalized.name.clone();
        self.description = normalized.description.clone();
        self.published_at = normalized.published_at;
        self.maker_name = normalized.maker_name.clone();
        self.updated_at = now;
    }

    pub fn needs_enrichment(&self) -> bool {
        !self.profile.is_checked() && self.maker_name.as_deref().is_some_and(|m| !m.trim().is_empty())
    }
}

// --- Run Summaries ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySummary {
    pub category: String,
    pub processed: u32,
    pub new_products: u32,
    pub duplicates: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryError {
    pub category: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub categories: Vec<CategorySummary>,
    pub total_processed: u32,
    pub total_new: u32,
    pub total_duplicates: u32,
    pub errors: Vec<CategoryError>,
}

impl RunSummary {
    pub fn record(&mut self, summary: CategorySummary) {
        self.total_processed += summary.processed;
        self.total_new += summary.new_products;
        self.total_duplicates += summary.duplicates;
        self.categories.push(summary);
    }

    pub fn record_error(&mut self, category: &str, error: impl ToString) {
        self.errors.push(CategoryError {
            category: category.to_string(),
            error: error.to_string(),
        });
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} processed, {} new, {} duplicates, {} errors",
            self.total_processed,
            self.total_new,
            self.total_duplicates,
            self.errors.len()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentError {
    pub record_id: Uuid,
    pub name: String,
    pub maker_name: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentSummary {
    pub total_processed: u32,
    pub successful: u32,
    pub failed: u32,
    pub cache_hits: u32,
    pub errors: Vec<EnrichmentError>,
}

// --- Feed Preview ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub has_description: bool,
    pub has_content: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPreview {
    pub category: String,
    pub url: String,
    pub feed_title: Option<String>,
    pub item_count: usize,
    pub sample_items: Vec<PreviewItem>,
}

// --- Storage Stats ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordStats {
    pub total: u64,
    pub by_category: BTreeMap<String, u64>,
    pub by_status: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub categories: Vec<String>,
    pub records: RecordStats,
}
