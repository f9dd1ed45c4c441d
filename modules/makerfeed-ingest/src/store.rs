// Storage seams for records and cache entries, plus the Postgres implementation.
//
// RecordStore: natural-key lookups and narrow writes on launch records.
// KvStore: generic JSON key/value storage backing the persistent cache tier.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use makerfeed_common::{ContentRecord, NormalizedRecord, ProfileState, RecordStats, ReviewStatus};

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_by_source_link(&self, source_link: &str) -> Result<Option<ContentRecord>>;

    /// Insert a new record. Returns `None` when a record with the same
    /// `source_link` already exists; nothing is written in that case.
    async fn insert(&self, record: &ContentRecord) -> Result<Option<ContentRecord>>;

    /// Overwrite the feed-derived fields of an existing record and bump
    /// `updated_at`. Never touches `created_at`, `status` or the profile.
    async fn refresh(
        &self,
        id: Uuid,
        fields: &NormalizedRecord,
        updated_at: DateTime<Utc>,
    ) -> Result<ContentRecord>;

    /// Record the outcome of a profile lookup.
    async fn set_profile(&self, id: Uuid, profile: &ProfileState) -> Result<ContentRecord>;

    /// Records with a maker whose profile has never been looked up.
    async fn needing_enrichment(&self) -> Result<Vec<ContentRecord>>;

    async fn stats(&self) -> Result<RecordStats>;
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    async fn set(&self, key: &str, value: &serde_json::Value) -> Result<()>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

pub struct PgStore {
    pool: PgPool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct RecordRow {
    id: Uuid,
    source_link: String,
    name: String,
    description: String,
    category: String,
    published_at: DateTime<Utc>,
    maker_name: Option<String>,
    profile_checked: bool,
    profile_url: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RecordRow> for ContentRecord {
    fn from(row: RecordRow) -> Self {
        let profile = match (row.profile_checked, row.profile_url) {
            (false, _) => ProfileState::Unchecked,
            (true, Some(url)) if !url.trim().is_empty() => ProfileState::Found(url),
            (true, _) => ProfileState::Absent,
        };

        Self {
            id: row.id,
            source_link: row.source_link,
            name: row.name,
            description: row.description,
            category: row.category,
            published_at: row.published_at,
            maker_name: row.maker_name,
            profile,
            status: ReviewStatus::from_str_loose(&row.status),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn find_by_source_link(&self, source_link: &str) -> Result<Option<ContentRecord>> {
        let row = sqlx::query_as::<_, RecordRow>(
            "SELECT * FROM content_records WHERE source_link = $1",
        )
        .bind(source_link)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn insert(&self, record: &ContentRecord) -> Result<Option<ContentRecord>> {
        let row = sqlx::query_as::<_, RecordRow>(
            r#"
            INSERT INTO content_records
                (id, source_link, name, description, category, published_at,
                 maker_name, profile_checked, profile_url, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (source_link) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(record.id)
        .bind(&record.source_link)
        .bind(&record.name)
        .bind(&record.description)
        .bind(&record.category)
        .bind(record.published_at)
        .bind(&record.maker_name)
        .bind(record.profile.is_checked())
        .bind(record.profile.url())
        .bind(record.status.to_string())
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn refresh(
        &self,
        id: Uuid,
        fields: &NormalizedRecord,
        updated_at: DateTime<Utc>,
    ) -> Result<ContentRecord> {
        let row = sqlx::query_as::<_, RecordRow>(
            r#"
            UPDATE content_records
            SET name = $2,
                description = $3,
                published_at = $4,
                maker_name = $5,
                updated_at = $6
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&fields.name)
        .bind(&fields.description)
        .bind(fields.published_at)
        .bind(&fields.maker_name)
        .bind(updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn set_profile(&self, id: Uuid, profile: &ProfileState) -> Result<ContentRecord> {
        let row = sqlx::query_as::<_, RecordRow>(
            r#"
            UPDATE content_records
            SET profile_checked = $2,
                profile_url = $3,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(profile.is_checked())
        .bind(profile.url())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn needing_enrichment(&self) -> Result<Vec<ContentRecord>> {
        let rows = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT * FROM content_records
            WHERE profile_checked = FALSE
              AND maker_name IS NOT NULL
              AND TRIM(maker_name) <> ''
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn stats(&self) -> Result<RecordStats> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_records")
            .fetch_one(&self.pool)
            .await?;

        let by_category: Vec<(String, i64)> = sqlx::query_as(
            "SELECT category, COUNT(*) FROM content_records GROUP BY category",
        )
        .fetch_all(&self.pool)
        .await?;

        let by_status: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM content_records GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        Ok(RecordStats {
            total: total as u64,
            by_category: to_counts(by_category),
            by_status: to_counts(by_status),
        })
    }
}

#[async_trait]
impl KvStore for PgStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let value = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT value FROM kv_store WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value)
    }

    async fn set(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        sqlx::query(
            "INSERT INTO kv_store (key, value) VALUES ($1, $2)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM kv_store WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let keys = sqlx::query_scalar::<_, String>(
            r"SELECT key FROM kv_store WHERE key LIKE $1 ESCAPE '\' ORDER BY key",
        )
        .bind(format!("{}%", escape_like(prefix)))
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }
}

fn to_counts(rows: Vec<(String, i64)>) -> BTreeMap<String, u64> {
    rows.into_iter().map(|(k, n)| (k, n as u64)).collect()
}

/// Escape LIKE wildcards so a prefix matches literally (`_` is common in keys).
fn escape_like(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
