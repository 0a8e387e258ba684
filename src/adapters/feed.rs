//! Strict feed-document parsing: RSS 2.0, Atom, and JSON Feed.
//!
//! Entries map to [`CandidatePost`] with tolerant field handling: author
//! may arrive as `author`, `creator`, `dc:creator`, or a nested Atom
//! `<author><name>` structure, and timestamps in RFC 2822 or RFC 3339.
//! Zero parsed items counts as a parse failure so the caller can fall back
//! to HTML-as-feed extraction over the same bytes.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use crate::errors::AdapterError;
use crate::models::CandidatePost;

/// Parse feed bytes as RSS, Atom, or JSON Feed, in that order.
///
/// Returns `ParseFormat` when no format yields at least one entry.
pub fn parse_feed_document(
    bytes: &[u8],
    source_name: &str,
    feed_url: &str,
) -> Result<Vec<CandidatePost>, AdapterError> {
    let text = String::from_utf8_lossy(bytes);

    if looks_like_rss(&text) {
        if let Ok(posts) = parse_rss(&text, source_name, feed_url) {
            if !posts.is_empty() {
                return Ok(posts);
            }
        }
    }
    if looks_like_atom(&text) {
        if let Ok(posts) = parse_atom(&text, source_name, feed_url) {
            if !posts.is_empty() {
                return Ok(posts);
            }
        }
    }
    if let Ok(posts) = parse_json_feed(&text, source_name, feed_url) {
        if !posts.is_empty() {
            return Ok(posts);
        }
    }

    Err(AdapterError::ParseFormat {
        url: feed_url.to_string(),
        reason: "no RSS, Atom, or JSON Feed entries found".to_string(),
    })
}

fn looks_like_rss(text: &str) -> bool {
    text.contains("<rss") || text.contains("<channel>")
}

fn looks_like_atom(text: &str) -> bool {
    text.contains("<feed")
}

// ───────────────────────── RSS 2.0 ─────────────────────────

#[derive(Debug, Deserialize)]
struct Rss {
    channel: RssChannel,
}

#[derive(Debug, Deserialize)]
struct RssChannel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    // Text-content wrappers tolerate CDATA and nested markup that a bare
    // String would reject.
    description: Option<XmlText>,
    author: Option<XmlText>,
    #[serde(rename = "creator", alias = "dc:creator")]
    creator: Option<XmlText>,
    #[serde(rename = "category", default)]
    categories: Vec<XmlText>,
}

/// Element whose text content is all we keep (attributes ignored).
#[derive(Debug, Deserialize)]
struct XmlText {
    #[serde(rename = "$text")]
    value: Option<String>,
}

fn parse_rss(
    text: &str,
    source_name: &str,
    feed_url: &str,
) -> Result<Vec<CandidatePost>, quick_xml::de::DeError> {
    let rss: Rss = quick_xml::de::from_str(text)?;
    let mut posts = Vec::with_capacity(rss.channel.items.len());
    for item in rss.channel.items {
        let Some(url) = item.link.as_deref().and_then(|l| absolutize(l, feed_url)) else {
            continue;
        };
        let Some(title) = non_empty(item.title) else {
            continue;
        };
        posts.push(CandidatePost {
            source_name: source_name.to_string(),
            url,
            title,
            published_at: item.pub_date.as_deref().and_then(parse_feed_date),
            author: non_empty(item.author.and_then(|a| a.value))
                .or_else(|| non_empty(item.creator.and_then(|c| c.value))),
            summary: item
                .description
                .and_then(|d| d.value)
                .as_deref()
                .map(clean_summary)
                .filter(|s| !s.is_empty()),
            tags: item
                .categories
                .into_iter()
                .filter_map(|c| non_empty(c.value))
                .collect(),
        });
    }
    Ok(posts)
}

// ───────────────────────── Atom ─────────────────────────

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<XmlText>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    author: Option<AtomAuthor>,
    summary: Option<XmlText>,
    #[serde(rename = "category", default)]
    categories: Vec<AtomCategory>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomAuthor {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomCategory {
    #[serde(rename = "@term")]
    term: Option<String>,
    #[serde(rename = "@label")]
    label: Option<String>,
}

fn parse_atom(
    text: &str,
    source_name: &str,
    feed_url: &str,
) -> Result<Vec<CandidatePost>, quick_xml::de::DeError> {
    let feed: AtomFeed = quick_xml::de::from_str(text)?;
    let mut posts = Vec::with_capacity(feed.entries.len());
    for entry in feed.entries {
        // Prefer rel="alternate" (or rel-less) links over self/edit links.
        let href = entry
            .links
            .iter()
            .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
            .or(entry.links.first())
            .and_then(|l| l.href.as_deref());
        let Some(url) = href.and_then(|l| absolutize(l, feed_url)) else {
            continue;
        };
        let Some(title) = entry.title.and_then(|t| non_empty(t.value)) else {
            continue;
        };
        posts.push(CandidatePost {
            source_name: source_name.to_string(),
            url,
            title,
            published_at: entry
                .published
                .as_deref()
                .or(entry.updated.as_deref())
                .and_then(parse_feed_date),
            author: entry.author.and_then(|a| non_empty(a.name)),
            summary: entry
                .summary
                .and_then(|s| s.value)
                .as_deref()
                .map(clean_summary)
                .filter(|s| !s.is_empty()),
            tags: entry
                .categories
                .into_iter()
                .filter_map(|c| non_empty(c.term).or_else(|| non_empty(c.label)))
                .collect(),
        });
    }
    Ok(posts)
}

// ───────────────────────── JSON Feed ─────────────────────────

#[derive(Debug, Deserialize)]
struct JsonFeed {
    #[serde(default)]
    items: Vec<JsonFeedItem>,
}

#[derive(Debug, Deserialize)]
struct JsonFeedItem {
    url: Option<String>,
    external_url: Option<String>,
    title: Option<String>,
    summary: Option<String>,
    content_text: Option<String>,
    date_published: Option<String>,
    author: Option<JsonFeedAuthor>,
    #[serde(default)]
    authors: Vec<JsonFeedAuthor>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct JsonFeedAuthor {
    name: Option<String>,
}

fn parse_json_feed(
    text: &str,
    source_name: &str,
    feed_url: &str,
) -> Result<Vec<CandidatePost>, serde_json::Error> {
    let feed: JsonFeed = serde_json::from_str(text)?;
    let mut posts = Vec::with_capacity(feed.items.len());
    for item in feed.items {
        let Some(url) = item
            .url
            .as_deref()
            .or(item.external_url.as_deref())
            .and_then(|l| absolutize(l, feed_url))
        else {
            continue;
        };
        let Some(title) = non_empty(item.title) else {
            continue;
        };
        let author = item
            .author
            .and_then(|a| non_empty(a.name))
            .or_else(|| item.authors.into_iter().find_map(|a| non_empty(a.name)));
        posts.push(CandidatePost {
            source_name: source_name.to_string(),
            url,
            title,
            published_at: item.date_published.as_deref().and_then(parse_feed_date),
            author,
            summary: item
                .summary
                .or(item.content_text)
                .as_deref()
                .map(clean_summary)
                .filter(|s| !s.is_empty()),
            tags: item.tags,
        });
    }
    Ok(posts)
}

// ───────────────────────── shared helpers ─────────────────────────

/// Parse the timestamp formats feeds actually emit.
pub fn parse_feed_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    // Date-only fallback, midnight UTC.
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
}

/// Resolve a possibly-relative link against the feed URL.
fn absolutize(link: &str, feed_url: &str) -> Option<String> {
    let link = link.trim();
    if link.is_empty() {
        return None;
    }
    if let Ok(url) = Url::parse(link) {
        return Some(url.to_string());
    }
    Url::parse(feed_url).ok()?.join(link).ok().map(|u| u.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Strip markup from a feed summary and collapse whitespace, capped at 500
/// characters.
fn clean_summary(raw: &str) -> String {
    let text = if raw.contains('<') {
        let fragment = scraper::Html::parse_fragment(raw);
        fragment.root_element().text().collect::<Vec<_>>().join(" ")
    } else {
        raw.to_string()
    };
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(500).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS_FIXTURE: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Example Engineering</title>
    <item>
      <title>How we scaled to 1M QPS</title>
      <link>https://x.test/a</link>
      <pubDate>Mon, 01 Sep 2025 12:34:56 GMT</pubDate>
      <dc:creator>Ada Lovelace</dc:creator>
      <description>&lt;p&gt;Scaling &lt;b&gt;notes&lt;/b&gt;.&lt;/p&gt;</description>
      <category>infrastructure</category>
      <category>databases</category>
    </item>
    <item>
      <title>Postmortem: the cache stampede</title>
      <link>https://x.test/b?utm_source=foo</link>
      <pubDate>Tue, 02 Sep 2025 08:00:00 GMT</pubDate>
      <author>ops@x.test</author>
    </item>
  </channel>
</rss>"#;

    const ATOM_FIXTURE: &str = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Example</title>
  <entry>
    <title>Streaming joins at scale</title>
    <link rel="alternate" href="https://x.test/streaming-joins"/>
    <link rel="self" href="https://x.test/atom.xml"/>
    <published>2025-09-03T10:00:00Z</published>
    <author><name>Grace Hopper</name></author>
    <summary>Windowed join internals.</summary>
    <category term="streaming"/>
  </entry>
</feed>"#;

    const JSON_FIXTURE: &str = r#"{
      "version": "https://jsonfeed.org/version/1.1",
      "items": [
        {
          "url": "https://x.test/json-post",
          "title": "A JSON Feed post",
          "date_published": "2025-09-04T09:30:00Z",
          "authors": [{"name": "Alan Turing"}],
          "tags": ["compilers"]
        }
      ]
    }"#;

    #[test]
    fn test_rss_maps_items() {
        let posts = parse_feed_document(RSS_FIXTURE.as_bytes(), "example", "https://x.test/rss").unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].title, "How we scaled to 1M QPS");
        assert_eq!(posts[0].url, "https://x.test/a");
        assert_eq!(posts[0].author.as_deref(), Some("Ada Lovelace"));
        assert_eq!(posts[0].tags, vec!["infrastructure", "databases"]);
        assert!(posts[0].published_at.is_some());
        // HTML entities stripped from summary
        assert_eq!(posts[0].summary.as_deref(), Some("Scaling notes ."));
        assert_eq!(posts[1].author.as_deref(), Some("ops@x.test"));
    }

    #[test]
    fn test_atom_prefers_alternate_link_and_nested_author() {
        let posts =
            parse_feed_document(ATOM_FIXTURE.as_bytes(), "example", "https://x.test/atom").unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].url, "https://x.test/streaming-joins");
        assert_eq!(posts[0].author.as_deref(), Some("Grace Hopper"));
        assert_eq!(posts[0].tags, vec!["streaming"]);
    }

    #[test]
    fn test_json_feed() {
        let posts =
            parse_feed_document(JSON_FIXTURE.as_bytes(), "example", "https://x.test/feed.json")
                .unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].author.as_deref(), Some("Alan Turing"));
        assert_eq!(posts[0].tags, vec!["compilers"]);
    }

    #[test]
    fn test_malformed_bytes_is_parse_error() {
        let err = parse_feed_document(b"<html><body>not a feed</body></html>", "example", "https://x.test")
            .unwrap_err();
        assert!(matches!(err, AdapterError::ParseFormat { .. }));
    }

    #[test]
    fn test_empty_feed_is_parse_error() {
        let empty = r#"<rss version="2.0"><channel><title>t</title></channel></rss>"#;
        assert!(parse_feed_document(empty.as_bytes(), "example", "https://x.test").is_err());
    }

    #[test]
    fn test_entries_without_title_or_link_skipped() {
        let feed = r#"<rss version="2.0"><channel>
          <item><title>   </title><link>https://x.test/blank</link></item>
          <item><title>No link here</title></item>
          <item><title>Kept</title><link>/relative/post</link></item>
        </channel></rss>"#;
        let posts = parse_feed_document(feed.as_bytes(), "example", "https://x.test/rss").unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].url, "https://x.test/relative/post");
    }

    #[test]
    fn test_parse_feed_date_formats() {
        assert!(parse_feed_date("Mon, 01 Sep 2025 12:34:56 GMT").is_some());
        assert!(parse_feed_date("2025-09-01T12:34:56Z").is_some());
        assert!(parse_feed_date("2025-09-01T12:34:56+02:00").is_some());
        assert!(parse_feed_date("2025-09-01").is_some());
        assert!(parse_feed_date("last tuesday").is_none());
    }
}
