//! Article content extraction: HTML in, cleaned text and metadata out.
//!
//! The primary content subtree is chosen by a readability heuristic over
//! paragraph density, total text mass, and link density, then serialized
//! with decorative subtrees (scripts, styles, navigation, footers, forms,
//! comments) removed. Metadata prefers JSON-LD `Article` blocks, falling
//! back to OpenGraph, Twitter meta tags, and finally plain `<meta>` /
//! `<time>` elements. When both JSON-LD and OpenGraph carry an author the
//! JSON-LD value wins: it is authored per-article while `og:` tags are
//! routinely templated site-wide.
//!
//! Extraction is CPU-bound; [`extract_article`] runs the work on the
//! blocking pool so it never occupies the orchestrator's I/O budget.

use anyhow::Result;
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};

use crate::adapters::feed::parse_feed_date;
use crate::models::ArticleContent;

/// Elements that never contribute to article content.
const NOISE_ELEMENTS: [&str; 13] = [
    "script", "style", "nav", "footer", "header", "aside", "form", "button", "input", "noscript",
    "iframe", "svg", "template",
];

/// Minimum text mass for a subtree to be considered the article body.
const MIN_CONTENT_CHARS: usize = 140;

/// Extract cleaned content and metadata from raw page HTML, off the I/O
/// path.
pub async fn extract_article(html: String) -> Result<ArticleContent> {
    tokio::task::spawn_blocking(move || Ok(extract(&html))).await?
}

/// Synchronous extraction core. Exposed for tests and for callers already
/// on a worker thread.
pub fn extract(html: &str) -> ArticleContent {
    let document = Html::parse_document(html);

    let (clean_html, text) = match select_content_root(&document) {
        Some(root) => clean_subtree(root),
        None => (String::new(), String::new()),
    };
    let text = normalize_text(&text);
    let word_count = text.split_whitespace().count();

    let meta = extract_metadata(&document);
    let hero_image_url = extract_hero_image(&document, &meta);

    ArticleContent {
        text,
        html: clean_html,
        author: meta.author,
        published_at: meta.published_at,
        word_count,
        hero_image_url,
    }
}

// ───────────────────────── content selection ─────────────────────────

/// Pick the subtree most likely to hold the article body.
///
/// Candidates are `<article>`, `<main>`, and block containers; each is
/// scored by text mass weighted down by link density and up by paragraph
/// count. Falls back to `<body>` when nothing scores above the floor.
fn select_content_root(document: &Html) -> Option<ElementRef<'_>> {
    let candidate_sel = Selector::parse("article, main, section, div").ok()?;
    let body_sel = Selector::parse("body").ok()?;

    let mut best: Option<(f64, ElementRef)> = None;
    for el in document.select(&candidate_sel) {
        let score = readability_score(el);
        if score > best.as_ref().map(|(s, _)| *s).unwrap_or(0.0) {
            best = Some((score, el));
        }
    }

    match best {
        Some((score, el)) if score >= MIN_CONTENT_CHARS as f64 => Some(el),
        _ => document.select(&body_sel).next(),
    }
}

/// Text mass × (1 − link density) + paragraph bonus.
fn readability_score(el: ElementRef) -> f64 {
    let text_len: usize = el.text().map(str::len).sum();
    if text_len == 0 {
        return 0.0;
    }

    let link_sel = Selector::parse("a").expect("static selector");
    let para_sel = Selector::parse("p").expect("static selector");

    let link_text: usize = el
        .select(&link_sel)
        .map(|a| a.text().map(str::len).sum::<usize>())
        .sum();
    let paragraphs = el.select(&para_sel).count();

    let link_density = link_text as f64 / text_len as f64;
    text_len as f64 * (1.0 - link_density) + paragraphs as f64 * 25.0
}

/// Serialize a subtree to cleaned HTML and raw text, skipping noise
/// elements and comments.
fn clean_subtree(root: ElementRef) -> (String, String) {
    let mut html = String::new();
    let mut text = String::new();
    walk(*root, &mut html, &mut text);
    (html, text)
}

fn walk(node: ego_tree::NodeRef<scraper::node::Node>, html: &mut String, text: &mut String) {
    use scraper::node::Node;

    match node.value() {
        Node::Element(el) => {
            let name = el.name();
            if NOISE_ELEMENTS.contains(&name) {
                return;
            }
            html.push('<');
            html.push_str(name);
            for (attr, value) in el.attrs() {
                html.push(' ');
                html.push_str(attr);
                html.push_str("=\"");
                html.push_str(&value.replace('"', "&quot;"));
                html.push('"');
            }
            html.push('>');

            for child in node.children() {
                walk(child, html, text);
            }

            html.push_str("</");
            html.push_str(name);
            html.push('>');

            if is_block(name) {
                text.push('\n');
            }
        }
        Node::Text(t) => {
            html.push_str(&escape_text(t));
            text.push_str(t);
        }
        // Comments, doctypes, processing instructions drop out.
        _ => {
            for child in node.children() {
                walk(child, html, text);
            }
        }
    }
}

fn is_block(name: &str) -> bool {
    matches!(
        name,
        "p" | "div"
            | "section"
            | "article"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "li"
            | "ul"
            | "ol"
            | "br"
            | "blockquote"
            | "pre"
            | "table"
            | "tr"
    )
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Collapse horizontal whitespace within lines and runs of blank lines to
/// one.
fn normalize_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_blank = false;
    let mut started = false;

    for line in raw.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            pending_blank = started;
            continue;
        }
        if started {
            out.push('\n');
            if pending_blank {
                out.push('\n');
            }
        }
        out.push_str(&line);
        started = true;
        pending_blank = false;
    }

    out
}

// ───────────────────────── metadata ─────────────────────────

#[derive(Debug, Default)]
struct PageMetadata {
    author: Option<String>,
    published_at: Option<DateTime<Utc>>,
    jsonld_image: Option<String>,
    og_image: Option<String>,
}

fn extract_metadata(document: &Html) -> PageMetadata {
    let mut meta = PageMetadata::default();

    if let Some(jsonld) = extract_jsonld_article(document) {
        meta.author = jsonld_author(&jsonld);
        meta.published_at = jsonld
            .get("datePublished")
            .and_then(|v| v.as_str())
            .and_then(parse_feed_date);
        meta.jsonld_image = jsonld_image(&jsonld);
    }

    meta.og_image = meta_content(document, "meta[property=\"og:image\"]");

    if meta.author.is_none() {
        meta.author = meta_content(document, "meta[property=\"article:author\"]")
            .or_else(|| meta_content(document, "meta[name=\"twitter:creator\"]"))
            .or_else(|| meta_content(document, "meta[name=\"author\"]"))
            .or_else(|| itemprop_author(document))
            .filter(|a| !a.starts_with("http"));
    }

    if meta.published_at.is_none() {
        meta.published_at = meta_content(document, "meta[property=\"article:published_time\"]")
            .as_deref()
            .and_then(parse_feed_date)
            .or_else(|| first_time_datetime(document));
    }

    meta
}

/// First JSON-LD block describing an article.
fn extract_jsonld_article(document: &Html) -> Option<serde_json::Value> {
    let sel = Selector::parse("script[type=\"application/ld+json\"]").ok()?;
    for script in document.select(&sel) {
        let raw = script.text().collect::<String>();
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
            continue;
        };
        if let Some(article) = find_article_node(&value) {
            return Some(article.clone());
        }
    }
    None
}

fn find_article_node(value: &serde_json::Value) -> Option<&serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => {
            let is_article = map
                .get("@type")
                .and_then(|t| t.as_str())
                .is_some_and(|t| matches!(t, "Article" | "BlogPosting" | "NewsArticle" | "TechArticle"));
            if is_article {
                return Some(value);
            }
            map.get("@graph").and_then(find_article_node)
        }
        serde_json::Value::Array(items) => items.iter().find_map(find_article_node),
        _ => None,
    }
}

fn jsonld_author(article: &serde_json::Value) -> Option<String> {
    let author = article.get("author")?;
    let name = match author {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => map.get("name").and_then(|n| n.as_str()).map(String::from),
        serde_json::Value::Array(items) => items.iter().find_map(|item| match item {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(map) => {
                map.get("name").and_then(|n| n.as_str()).map(String::from)
            }
            _ => None,
        }),
        _ => None,
    };
    name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

fn jsonld_image(article: &serde_json::Value) -> Option<String> {
    match article.get("image")? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => map.get("url").and_then(|u| u.as_str()).map(String::from),
        serde_json::Value::Array(items) => items.first().and_then(|first| match first {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(map) => {
                map.get("url").and_then(|u| u.as_str()).map(String::from)
            }
            _ => None,
        }),
        _ => None,
    }
}

fn meta_content(document: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    document
        .select(&sel)
        .find_map(|el| el.value().attr("content"))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

fn itemprop_author(document: &Html) -> Option<String> {
    let sel = Selector::parse("[itemprop=\"author\"]").ok()?;
    let el = document.select(&sel).next()?;
    let name_sel = Selector::parse("[itemprop=\"name\"]").ok()?;
    let text = el
        .select(&name_sel)
        .next()
        .map(|n| n.text().collect::<String>())
        .unwrap_or_else(|| el.text().collect::<String>());
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn first_time_datetime(document: &Html) -> Option<DateTime<Utc>> {
    let sel = Selector::parse("time[datetime]").ok()?;
    document
        .select(&sel)
        .filter_map(|t| t.value().attr("datetime"))
        .find_map(parse_feed_date)
}

/// Hero image: `og:image`, then Schema.org `image`, then the largest
/// in-article `<img>` with explicit dimensions.
fn extract_hero_image(document: &Html, meta: &PageMetadata) -> Option<String> {
    if let Some(og) = &meta.og_image {
        return Some(og.clone());
    }
    if let Some(jsonld) = &meta.jsonld_image {
        return Some(jsonld.clone());
    }

    let sel = Selector::parse("img[width][height]").ok()?;
    document
        .select(&sel)
        .filter_map(|img| {
            let width: u64 = img.value().attr("width")?.trim().parse().ok()?;
            let height: u64 = img.value().attr("height")?.trim().parse().ok()?;
            let src = img.value().attr("src")?;
            Some((width * height, src.to_string()))
        })
        .max_by_key(|(area, _)| *area)
        .map(|(_, src)| src)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE_HTML: &str = r#"<html>
<head>
  <meta property="og:image" content="https://x.test/hero.png">
  <meta property="article:published_time" content="2025-09-01T10:00:00Z">
  <meta name="author" content="Meta Author">
  <script type="application/ld+json">
    {"@type": "BlogPosting", "author": {"name": "JsonLd Author"}, "datePublished": "2025-08-30T09:00:00Z"}
  </script>
</head>
<body>
  <nav><a href="/">Home</a><a href="/blog">Blog</a><a href="/about">About</a></nav>
  <article>
    <h1>Designing the ingest layer</h1>
    <p>We rebuilt the ingest layer around a single bounded queue. The first
    lesson was that backpressure must be end to end, or it is not
    backpressure at all.</p>
    <p>The second lesson was subtler: retries amplify load precisely when
    the system can least afford it, so the retry budget has to be global.</p>
    <script>analytics.track("view");</script>
  </article>
  <footer>Copyright Example Inc.</footer>
</body></html>"#;

    #[test]
    fn test_extracts_article_body_without_noise() {
        let content = extract(ARTICLE_HTML);
        assert!(content.text.contains("bounded queue"));
        assert!(content.text.contains("retry budget"));
        assert!(!content.text.contains("Copyright"));
        assert!(!content.html.contains("analytics.track"));
        assert!(!content.html.contains("<script"));
    }

    #[test]
    fn test_word_count_matches_text() {
        let content = extract(ARTICLE_HTML);
        assert_eq!(content.word_count, content.text.split_whitespace().count());
        assert!(content.word_count > 20);
    }

    #[test]
    fn test_jsonld_author_wins_over_meta() {
        let content = extract(ARTICLE_HTML);
        assert_eq!(content.author.as_deref(), Some("JsonLd Author"));
    }

    #[test]
    fn test_jsonld_date_wins_over_og() {
        let content = extract(ARTICLE_HTML);
        let date = content.published_at.unwrap();
        assert_eq!(date.to_rfc3339(), "2025-08-30T09:00:00+00:00");
    }

    #[test]
    fn test_og_image_preferred_for_hero() {
        let content = extract(ARTICLE_HTML);
        assert_eq!(content.hero_image_url.as_deref(), Some("https://x.test/hero.png"));
    }

    #[test]
    fn test_meta_fallbacks_without_jsonld() {
        let html = r#"<html><head>
          <meta name="author" content="Fallback Author">
        </head><body>
          <article><p>Body text long enough to be the content root, with a
          couple of sentences so the scorer has something to weigh. More
          filler text keeps the paragraph comfortably above the floor and
          the link density at zero for this fixture.</p>
          <time datetime="2025-07-04T12:00:00Z">July 4</time></article>
        </body></html>"#;
        let content = extract(html);
        assert_eq!(content.author.as_deref(), Some("Fallback Author"));
        assert!(content.published_at.is_some());
    }

    #[test]
    fn test_largest_dimensioned_img_as_hero_fallback() {
        let html = r#"<html><body><article>
          <p>Enough body text for the readability scorer to latch onto this
          subtree as the primary content area of the page, repeated once
          more for mass: enough body text for the readability scorer.</p>
          <img src="/small.png" width="100" height="50">
          <img src="/big.png" width="1200" height="630">
          <img src="/nodims.png">
        </article></body></html>"#;
        let content = extract(html);
        assert_eq!(content.hero_image_url.as_deref(), Some("/big.png"));
    }

    #[test]
    fn test_empty_html_is_empty_content() {
        let content = extract("");
        assert!(content.text.is_empty());
        assert_eq!(content.word_count, 0);
    }

    #[test]
    fn test_normalize_text_collapses_blank_runs() {
        let raw = "one  two\n\n\n\nthree\n   \n\nfour";
        assert_eq!(normalize_text(raw), "one two\n\nthree\n\nfour");
    }

    #[test]
    fn test_link_density_penalizes_nav_heavy_trees() {
        // A link farm with more text than the article must still lose.
        let html = r#"<html><body>
          <div class="links">
            <a href="/1">one long navigation label here</a>
            <a href="/2">two long navigation label here</a>
            <a href="/3">three long navigation label here</a>
            <a href="/4">four long navigation label here</a>
            <a href="/5">five long navigation label here</a>
            <a href="/6">six long navigation label here</a>
          </div>
          <article>
            <p>Actual prose of moderate length that says something concrete
            about the system under discussion and carries no links at all,
            which the density heuristic rewards over the louder link farm
            sitting beside it in the document.</p>
          </article>
        </body></html>"#;
        let content = extract(html);
        assert!(content.text.contains("Actual prose"));
        assert!(!content.text.contains("navigation label"));
    }
}
