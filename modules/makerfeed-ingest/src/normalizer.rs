//! Feed entry normalization: raw feed item in, canonical record out.
//!
//! Pure functions only. Anything that cannot become a record is reported as
//! [`InvalidEntry`] so the caller can skip it and keep going.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use makerfeed_common::{InvalidEntry, NormalizedRecord};

use crate::feed::RawFeedEntry;

pub const MIN_TITLE_CHARS: usize = 3;
pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_DESCRIPTION_CHARS: usize = 500;
pub const MAX_MAKER_CHARS: usize = 100;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static HANDLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[@#]").expect("valid regex"));

/// Feed-source boilerplate wrapped around launch titles.
static TITLE_BOILERPLATE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"(?i)^Product Hunt:\s*", r"(?i)\s*-\s*Product Hunt$"]
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
});

/// Entities decoded in descriptions. `&amp;` goes before `&lt;`/`&gt;`.
const ENTITIES: &[(&str, &str)] = &[
    ("&quot;", "\""),
    ("&amp;", "&"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&nbsp;", " "),
];

/// A free-text maker extraction rule. Lower priority runs first; the first
/// rule that matches wins.
pub struct MakerRule {
    pub name: &'static str,
    pub priority: u8,
    pub pattern: &'static str,
}

pub const MAKER_RULES: &[MakerRule] = &[
    MakerRule {
        name: "by",
        priority: 0,
        pattern: r"(?i)\bby\s+([^<>\n,]+)",
    },
    MakerRule {
        name: "maker",
        priority: 1,
        pattern: r"(?i)\bmaker[:\s]+([^<>\n,]+)",
    },
    MakerRule {
        name: "created_by",
        priority: 2,
        pattern: r"(?i)\bcreated by\s+([^<>\n,]+)",
    },
    MakerRule {
        name: "from",
        priority: 3,
        pattern: r"(?i)\bfrom\s+([^<>\n,]+)",
    },
];

static COMPILED_MAKER_RULES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    let mut rules: Vec<&MakerRule> = MAKER_RULES.iter().collect();
    rules.sort_by_key(|r| r.priority);
    rules
        .into_iter()
        .map(|r| (r.name, Regex::new(r.pattern).expect("valid maker rule")))
        .collect()
});

/// Turn a raw feed entry into a record for `category`, stamping entries
/// without a date with `now`.
pub fn normalize(
    entry: &RawFeedEntry,
    category: &str,
    now: DateTime<Utc>,
) -> Result<NormalizedRecord, InvalidEntry> {
    let raw_title = non_blank(entry.title.as_deref()).ok_or(InvalidEntry::MissingField("title"))?;
    let link = non_blank(entry.link.as_deref()).ok_or(InvalidEntry::MissingField("link"))?;

    let name = clean_title(raw_title);
    let title_len = name.chars().count();
    if title_len < MIN_TITLE_CHARS {
        return Err(InvalidEntry::TitleTooShort(title_len));
    }

    let raw_description = entry
        .description
        .as_deref()
        .or(entry.content.as_deref())
        .unwrap_or("");

    Ok(NormalizedRecord {
        name,
        description: clean_description(raw_description),
        category: category.to_string(),
        published_at: entry.published.unwrap_or(now),
        source_link: link.trim().to_string(),
        maker_name: extract_maker(entry),
    })
}

/// Strip feed boilerplate, trim, cap length.
pub fn clean_title(title: &str) -> String {
    let mut cleaned = title.to_string();
    for re in TITLE_BOILERPLATE.iter() {
        cleaned = re.replace_all(&cleaned, "").into_owned();
    }
    truncate_chars(cleaned.trim(), MAX_TITLE_CHARS)
}

/// Strip markup, decode common entities, collapse whitespace, cap length.
pub fn clean_description(description: &str) -> String {
    let mut text = TAG_RE.replace_all(description, "").into_owned();
    for (entity, replacement) in ENTITIES {
        text = text.replace(entity, replacement);
    }
    let collapsed = WHITESPACE_RE.replace_all(&text, " ");
    truncate_chars(collapsed.trim(), MAX_DESCRIPTION_CHARS)
}

/// Strip markup and handle sigils, trim, cap length.
pub fn clean_maker_name(maker: &str) -> String {
    let text = TAG_RE.replace_all(maker, "");
    let text = HANDLE_RE.replace_all(&text, "");
    truncate_chars(text.trim(), MAX_MAKER_CHARS)
}

/// Explicit creator wins; otherwise scan the body, then the description.
fn extract_maker(entry: &RawFeedEntry) -> Option<String> {
    let raw = match non_blank(entry.creator.as_deref()) {
        Some(creator) => Some(creator.to_string()),
        None => entry
            .content
            .as_deref()
            .or(entry.description.as_deref())
            .and_then(extract_maker_from_text),
    }?;

    let cleaned = clean_maker_name(&raw);
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Run the maker rules over free text in priority order.
pub fn extract_maker_from_text(text: &str) -> Option<String> {
    COMPILED_MAKER_RULES.iter().find_map(|(_, re)| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| clean_maker_name(m.as_str()))
            .filter(|name| !name.is_empty())
    })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str, link: &str) -> RawFeedEntry {
        RawFeedEntry {
            title: Some(title.to_string()),
            link: Some(link.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn rejects_missing_title_or_link() {
        let now = Utc::now();
        let no_title = RawFeedEntry {
            link: Some("https://launches.test/p/1".into()),
            ..Default::default()
        };
        assert_eq!(
            normalize(&no_title, "saas", now),
            Err(InvalidEntry::MissingField("title"))
        );

        let no_link = RawFeedEntry {
            title: Some("Widgetron".into()),
            link: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(
            normalize(&no_link, "saas", now),
            Err(InvalidEntry::MissingField("link"))
        );
    }

    #[test]
    fn rejects_titles_that_clean_down_to_nothing() {
        let e = entry("Product Hunt: ab", "https://launches.test/p/1");
        assert_eq!(
            normalize(&e, "saas", Utc::now()),
            Err(InvalidEntry::TitleTooShort(2))
        );
    }

    #[test]
    fn strips_title_boilerplate() {
        assert_eq!(clean_title("Product Hunt: Widgetron"), "Widgetron");
        assert_eq!(clean_title("  Widgetron - product hunt"), "Widgetron");
        assert_eq!(clean_title(&"x".repeat(300)).chars().count(), MAX_TITLE_CHARS);
    }

    #[test]
    fn cleans_description_markup_and_entities() {
        let raw = "<p>Fast &amp; <b>simple</b>&nbsp;&quot;widgets&quot;\n\n  for &lt;you&gt;</p>";
        assert_eq!(clean_description(raw), "Fast & simple \"widgets\" for <you>");
        assert_eq!(
            clean_description(&"word ".repeat(200)).chars().count(),
            MAX_DESCRIPTION_CHARS
        );
    }

    #[test]
    fn explicit_creator_wins_over_body_patterns() {
        let mut e = entry("Widgetron", "https://launches.test/p/1");
        e.creator = Some("@ada_l".into());
        e.content = Some("Made by Someone Else".into());

        let record = normalize(&e, "saas", Utc::now()).unwrap();
        assert_eq!(record.maker_name.as_deref(), Some("ada_l"));
    }

    #[test]
    fn maker_rules_run_in_priority_order() {
        assert_eq!(
            extract_maker_from_text("<p>Widgetron by Grace Hopper, launched today</p>").as_deref(),
            Some("Grace Hopper")
        );
        assert_eq!(
            extract_maker_from_text("Maker: #Linus\nmore text").as_deref(),
            Some("Linus")
        );
        assert_eq!(
            extract_maker_from_text("A new tool from Acme Labs").as_deref(),
            Some("Acme Labs")
        );
        assert_eq!(extract_maker_from_text("Nobody credited here"), None);
    }

    #[test]
    fn falls_back_to_description_for_maker_scan() {
        let mut e = entry("Widgetron", "https://launches.test/p/1");
        e.description = Some("Widgets by Ada Lovelace".into());

        let record = normalize(&e, "saas", Utc::now()).unwrap();
        assert_eq!(record.maker_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(record.description, "Widgets by Ada Lovelace");
    }

    #[test]
    fn missing_maker_is_not_an_error() {
        let e = entry("Widgetron", "https://launches.test/p/1");
        let record = normalize(&e, "saas", Utc::now()).unwrap();
        assert!(record.maker_name.is_none());
        assert_eq!(record.description, "");
    }

    #[test]
    fn missing_date_defaults_to_ingestion_time() {
        let now = Utc::now();
        let e = entry("Widgetron", "https://launches.test/p/1");
        let record = normalize(&e, "developer-tools", now).unwrap();
        assert_eq!(record.published_at, now);
        assert_eq!(record.category, "developer-tools");
        assert_eq!(record.source_link, "https://launches.test/p/1");
    }
}
