//! Maker name -> public profile URL.
//!
//! Consults the [`ProfileCache`] first; on a miss runs a single site-restricted
//! web search, scores the candidates, and caches whatever it concluded
//! (including "nothing found").

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use makerfeed_common::config::DEFAULT_PROFILE_SITE;
use makerfeed_common::EnrichmentLookupError;

use crate::cache::{CachedProfile, ProfileCache, MAX_KEY_CHARS};
use crate::search::{SearchResult, WebSearcher};

static DISALLOWED_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s\-.]").expect("valid regex"));
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

const EXACT_NAME_BONUS: u32 = 10;
const TOKEN_IN_TITLE: u32 = 2;
const TOKEN_IN_SNIPPET: u32 = 1;
const MIN_TOKEN_CHARS: usize = 3;

#[derive(Debug, Clone, TypedBuilder)]
pub struct MatcherSettings {
    /// Host + path prefix every accepted profile URL must live under.
    #[builder(default = DEFAULT_PROFILE_SITE.to_string(), setter(into))]
    pub profile_site: String,
    #[builder(default = 5)]
    pub max_results: usize,
    /// Minimum spacing between two provider queries.
    #[builder(default = Duration::from_millis(500))]
    pub query_delay: Duration,
}

impl Default for MatcherSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileLookup {
    pub url: Option<String>,
    pub from_cache: bool,
}

impl ProfileLookup {
    fn skipped() -> Self {
        Self {
            url: None,
            from_cache: false,
        }
    }
}

pub struct ProfileMatcher {
    searcher: Arc<dyn WebSearcher>,
    cache: Arc<ProfileCache>,
    settings: MatcherSettings,
    /// When the last provider query went out. Held across the query so
    /// concurrent lookups queue behind one another.
    last_query: Mutex<Option<Instant>>,
}

impl ProfileMatcher {
    pub fn new(
        searcher: Arc<dyn WebSearcher>,
        cache: Arc<ProfileCache>,
        settings: MatcherSettings,
    ) -> Self {
        Self {
            searcher,
            cache,
            settings,
            last_query: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &Arc<ProfileCache> {
        &self.cache
    }

    pub async fn find_profile(&self, maker_name: &str) -> Option<String> {
        self.lookup(maker_name).await.url
    }

    pub async fn lookup(&self, maker_name: &str) -> ProfileLookup {
        let name = clean_name(maker_name);
        if name.is_empty() {
            return ProfileLookup::skipped();
        }

        if let Some(cached) = self.cache.get(&name).await {
            debug!(maker = name.as_str(), "matcher: cache hit");
            return ProfileLookup {
                url: cached.into_url(),
                from_cache: true,
            };
        }

        let url = match self.search(&name).await {
            Ok(results) => best_candidate(&name, &results, &self.settings.profile_site),
            Err(e) => {
                warn!(error = %e, "matcher: provider failed, caching as not found");
                None
            }
        };

        self.cache
            .set(&name, CachedProfile::from_lookup(url.clone()))
            .await;

        match &url {
            Some(url) => info!(maker = name.as_str(), profile = url.as_str(), "matcher: profile found"),
            None => info!(maker = name.as_str(), "matcher: no profile found"),
        }

        ProfileLookup {
            url,
            from_cache: false,
        }
    }

    async fn search(&self, name: &str) -> Result<Vec<SearchResult>, EnrichmentLookupError> {
        let query = format!("\"{name}\" site:{}", self.settings.profile_site);

        let mut last_query = self.last_query.lock().await;
        if let Some(at) = *last_query {
            let wait = self.settings.query_delay.saturating_sub(at.elapsed());
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }

        let outcome = self.searcher.search(&query, self.settings.max_results).await;
        *last_query = Some(Instant::now());

        outcome.map_err(|e| EnrichmentLookupError {
            maker: name.to_string(),
            message: format!("{e:#}"),
        })
    }
}

/// Strip everything but word characters, whitespace, `-` and `.`; collapse
/// whitespace; cap length.
pub fn clean_name(name: &str) -> String {
    let stripped = DISALLOWED_NAME_CHARS.replace_all(name, "");
    let collapsed = WHITESPACE_RE.replace_all(stripped.trim(), " ");
    collapsed.chars().take(MAX_KEY_CHARS).collect()
}

/// Heuristic relevance of one search result to a cleaned maker name.
pub fn score_candidate(name: &str, result: &SearchResult) -> u32 {
    let name = name.to_lowercase();
    let title = result.title.to_lowercase();
    let snippet = result.snippet.to_lowercase();

    let mut score = 0;
    if title.contains(&name) {
        score += EXACT_NAME_BONUS;
    }

    for token in name
        .split_whitespace()
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
    {
        if title.contains(token) {
            score += TOKEN_IN_TITLE;
        }
        if snippet.contains(token) {
            score += TOKEN_IN_SNIPPET;
        }
    }
    score
}

/// Highest-scoring profile URL, if any scored above zero. Ties go to the
/// provider's earlier result.
pub fn best_candidate(name: &str, results: &[SearchResult], profile_site: &str) -> Option<String> {
    let marker = format!("{profile_site}/");

    let mut scored: Vec<(u32, &SearchResult)> = results
        .iter()
        .filter(|r| r.url.contains(&marker))
        .map(|r| (score_candidate(name, r), r))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    scored
        .into_iter()
        .next()
        .filter(|(score, _)| *score > 0)
        .map(|(_, r)| r.url.clone())
}
