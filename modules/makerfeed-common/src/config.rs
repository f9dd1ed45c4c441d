use anyhow::{ensure, Context, Result};

use crate::file_config::FileConfig;

pub const DEFAULT_FEED_BASE_URL: &str = "https://www.producthunt.com/feed";
pub const DEFAULT_PROFILE_SITE: &str = "linkedin.com/in";
pub const DEFAULT_CACHE_EXPIRY_HOURS: i64 = 24;
/// Ten years.
pub const MAX_CACHE_EXPIRY_HOURS: i64 = 24 * 365 * 10;
pub const DEFAULT_MAX_CACHE_SIZE: usize = 1000;
pub const DEFAULT_CATEGORIES: &[&str] = &[
    "artificial-intelligence",
    "developer-tools",
    "productivity",
    "saas",
    "design-tools",
    "marketing",
];

/// Application configuration loaded from environment variables.
/// Secrets come from env only; the optional TOML `FileConfig` can override
/// everything else.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,

    // Search provider
    pub serper_api_key: Option<String>,

    // Feeds
    pub feed_base_url: String,
    pub categories: Vec<String>,

    // Cache
    pub cache_expiry_hours: i64,
    pub max_cache_size: usize,

    // Enrichment
    pub profile_site: String,
    pub query_delay_ms: u64,
    pub max_results: usize,
}

impl Config {
    /// Load configuration from the process environment (after `.env`).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.log_keys();
        Ok(config)
    }

    /// Build a config from any key lookup. `from_env` is this over `std::env`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL is required")?;

        let categories = match lookup("MAKERFEED_CATEGORIES") {
            Some(raw) => parse_list(&raw),
            None => DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect(),
        };

        let cache_expiry_hours =
            parse_or(&lookup, "CACHE_EXPIRY_HOURS", DEFAULT_CACHE_EXPIRY_HOURS)?;
        check_expiry_hours(cache_expiry_hours)?;

        Ok(Self {
            database_url,
            serper_api_key: lookup("SERPER_API_KEY").filter(|k| !k.trim().is_empty()),
            feed_base_url: lookup("FEED_BASE_URL")
                .unwrap_or_else(|| DEFAULT_FEED_BASE_URL.to_string()),
            categories,
            cache_expiry_hours,
            max_cache_size: parse_or(&lookup, "MAX_CACHE_SIZE", DEFAULT_MAX_CACHE_SIZE)?,
            profile_site: lookup("PROFILE_SITE").unwrap_or_else(|| DEFAULT_PROFILE_SITE.to_string()),
            query_delay_ms: parse_or(&lookup, "QUERY_DELAY_MS", 500)?,
            max_results: parse_or(&lookup, "MAX_SEARCH_RESULTS", 5)?,
        })
    }

    /// Layer values from a TOML file over the env-derived config.
    pub fn with_file(mut self, file: &FileConfig) -> Result<Self> {
        if let Some(feed) = &file.feed {
            if let Some(base_url) = &feed.base_url {
                self.feed_base_url = base_url.clone();
            }
            if let Some(categories) = &feed.categories {
                self.categories = categories.clone();
            }
        }
        if let Some(cache) = &file.cache {
            if let Some(hours) = cache.expiry_hours {
                check_expiry_hours(hours).context("invalid [cache] expiry_hours")?;
                self.cache_expiry_hours = hours;
            }
            if let Some(size) = cache.max_in_memory {
                self.max_cache_size = size;
            }
        }
        if let Some(enrichment) = &file.enrichment {
            if let Some(site) = &enrichment.profile_site {
                self.profile_site = site.clone();
            }
            if let Some(delay) = enrichment.query_delay_ms {
                self.query_delay_ms = delay;
            }
            if let Some(max) = enrichment.max_results {
                self.max_results = max;
            }
        }
        Ok(self)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::try_hours(self.cache_expiry_hours).unwrap_or(chrono::Duration::MAX)
    }

    pub fn query_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.query_delay_ms)
    }

    fn log_keys(&self) {
        fn preview(val: &str) -> String {
            let head: String = val.chars().take(5).collect();
            format!("{head}...({} chars)", val.chars().count())
        }

        tracing::info!("Config loaded:");
        tracing::info!("  DATABASE_URL: {}", preview(&self.database_url));
        tracing::info!(
            "  SERPER_API_KEY: {}",
            self.serper_api_key
                .as_deref()
                .map(preview)
                .unwrap_or_else(|| "<not set>".to_string())
        );
        tracing::info!("  FEED_BASE_URL: {}", self.feed_base_url);
        tracing::info!("  categories: {}", self.categories.join(","));
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn check_expiry_hours(hours: i64) -> Result<()> {
    ensure!(
        (1..=MAX_CACHE_EXPIRY_HOURS).contains(&hours),
        "CACHE_EXPIRY_HOURS must be between 1 and {MAX_CACHE_EXPIRY_HOURS}, got {hours}"
    );
    Ok(())
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number, got {raw:?}")),
        None => Ok(default),
    }
}
