// Category feed source. Fetches one RSS/Atom feed per category and hands back
// raw entries; cleaning happens in the normalizer.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

/// One feed item before normalization. Every field is optional because feeds
/// in the wild omit any of them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFeedEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
    /// Full body (`content:encoded` in RSS, `<content>` in Atom).
    pub content: Option<String>,
    /// Short description / summary.
    pub description: Option<String>,
    /// Explicit creator or author.
    pub creator: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FetchedFeed {
    pub title: Option<String>,
    pub entries: Vec<RawFeedEntry>,
}

#[async_trait]
pub trait FeedSource: Send + Sync {
    /// URL polled for a category.
    fn feed_url(&self, category: &str) -> String;

    /// Fetch and parse the feed for a category.
    async fn fetch(&self, category: &str) -> Result<FetchedFeed>;
}

/// Polls `{base_url}?category={category}` over HTTP.
pub struct HttpFeedSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpFeedSource {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("makerfeed/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build feed HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('?').to_string(),
            client,
        })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    fn feed_url(&self, category: &str) -> String {
        match url::Url::parse_with_params(&self.base_url, &[("category", category)]) {
            Ok(url) => url.to_string(),
            Err(_) => format!("{}?category={}", self.base_url, category),
        }
    }

    async fn fetch(&self, category: &str) -> Result<FetchedFeed> {
        let url = self.feed_url(category);
        info!(category, url = url.as_str(), "feed: fetching");

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("Feed request failed")?
            .error_for_status()
            .context("Feed returned an error status")?;

        let bytes = resp.bytes().await.context("Failed to read feed body")?;
        let feed = parse_feed(&bytes)?;

        info!(category, items = feed.entries.len(), "feed: parsed successfully");
        Ok(feed)
    }
}

/// Parse RSS/Atom/JSON feed bytes into raw entries, preserving feed order.
pub fn parse_feed(bytes: &[u8]) -> Result<FetchedFeed> {
    let feed = feed_rs::parser::parse(bytes).context("Failed to parse RSS/Atom feed")?;

    let entries = feed.entries.into_iter().map(raw_entry).collect();

    Ok(FetchedFeed {
        title: feed.title.map(|t| t.content),
        entries,
    })
}

fn raw_entry(entry: feed_rs::model::Entry) -> RawFeedEntry {
    let link = entry
        .links
        .first()
        .map(|l| l.href.clone())
        .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()));

    let creator = entry
        .authors
        .iter()
        .map(|p| p.name.trim())
        .find(|name| !name.is_empty())
        .map(|name| name.to_string());

    RawFeedEntry {
        title: entry.title.map(|t| t.content),
        link,
        published: entry.published.or(entry.updated),
        content: entry.content.and_then(|c| c.body),
        description: entry.summary.map(|t| t.content),
        creator,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"
     xmlns:content="http://purl.org/rss/1.0/modules/content/"
     xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Launches: Developer Tools</title>
    <link>https://launches.test</link>
    <description>Latest launches</description>
    <item>
      <title>Widgetron</title>
      <link>https://launches.test/posts/widgetron</link>
      <pubDate>Tue, 14 Oct 2025 09:00:00 GMT</pubDate>
      <description>&lt;p&gt;Build widgets faster&lt;/p&gt;</description>
      <dc:creator>Ada Lovelace</dc:creator>
    </item>
    <item>
      <title>Gizmo</title>
      <link>https://launches.test/posts/gizmo</link>
      <description>Gizmos for everyone</description>
      <content:encoded><![CDATA[<p>Gizmo by Grace Hopper</p>]]></content:encoded>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_rss_items_in_order() {
        let feed = parse_feed(RSS.as_bytes()).unwrap();

        assert_eq!(feed.title.as_deref(), Some("Launches: Developer Tools"));
        assert_eq!(feed.entries.len(), 2);

        let first = &feed.entries[0];
        assert_eq!(first.title.as_deref(), Some("Widgetron"));
        assert_eq!(first.link.as_deref(), Some("https://launches.test/posts/widgetron"));
        assert!(first.published.is_some());
        assert_eq!(first.creator.as_deref(), Some("Ada Lovelace"));

        let second = &feed.entries[1];
        assert_eq!(second.title.as_deref(), Some("Gizmo"));
        assert!(second.published.is_none());
        assert!(second
            .content
            .as_deref()
            .is_some_and(|c| c.contains("Grace Hopper")));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(parse_feed(b"this is not a feed").is_err());
    }

    #[test]
    fn feed_url_carries_category_param() {
        let source = HttpFeedSource::new("https://launches.test/feed").unwrap();
        assert_eq!(
            source.feed_url("developer-tools"),
            "https://launches.test/feed?category=developer-tools"
        );
    }
}
