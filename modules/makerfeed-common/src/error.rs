//! Typed errors for the ingestion pipeline.
//!
//! Everything below `PipelineError` is caught where it happens and folded into
//! a run summary; only `PipelineError` reaches the trigger.

use thiserror::Error;

/// A category's feed could not be fetched or parsed.
#[derive(Debug, Error)]
#[error("failed to fetch feed for {category}: {message}")]
pub struct FeedFetchError {
    pub category: String,
    pub message: String,
}

impl FeedFetchError {
    pub fn new(category: &str, err: impl std::fmt::Display) -> Self {
        Self {
            category: category.to_string(),
            message: err.to_string(),
        }
    }
}

/// A single feed entry that cannot become a record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidEntry {
    #[error("entry is missing its {0}")]
    MissingField(&'static str),

    #[error("title too short after cleaning ({0} chars)")]
    TitleTooShort(usize),
}

/// Storage failure while persisting one record.
#[derive(Debug, Error)]
#[error("persistence error for {source_link}: {message}")]
pub struct PersistenceError {
    pub source_link: String,
    pub message: String,
}

impl PersistenceError {
    pub fn new(source_link: &str, err: impl std::fmt::Display) -> Self {
        Self {
            source_link: source_link.to_string(),
            message: err.to_string(),
        }
    }
}

/// The search provider failed for a maker lookup.
#[derive(Debug, Error)]
#[error("profile lookup failed for {maker}: {message}")]
pub struct EnrichmentLookupError {
    pub maker: String,
    pub message: String,
}

/// The persistent cache tier failed. Never propagated past the cache.
#[derive(Debug, Error)]
pub enum CacheStorageError {
    #[error("cache read failed for {key}: {message}")]
    Read { key: String, message: String },

    #[error("cache write failed for {key}: {message}")]
    Write { key: String, message: String },

    #[error("cache entry {key} is malformed: {message}")]
    Malformed { key: String, message: String },
}

/// Failures that stop a run before it starts.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid category: {category} (valid: {})", .valid_categories.join(", "))]
    InvalidCategory {
        category: String,
        valid_categories: Vec<String>,
    },

    #[error("no categories configured")]
    NoCategories,

    #[error("another ingestion run is in progress")]
    RunInProgress,

    #[error(transparent)]
    FeedFetch(#[from] FeedFetchError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
