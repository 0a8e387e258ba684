//! HTML-as-feed extraction for sources without a usable feed document.
//!
//! Three fixed tiers, each tried only when the previous one yields no
//! validated entries:
//!
//! 1. `<article>` subtrees — the longest-text anchor inside each article is
//!    the headline link (breadcrumbs are short), validated against
//!    publication-like path segments.
//! 2. Links under `<h2>`/`<h3>` inside elements whose class or id carries a
//!    post-list marker (`post`, `entry`, `card`, `article`).
//! 3. A bare anchor scan for article-shaped paths.
//!
//! Every extracted entry gets absolute URL resolution, whitespace-collapsed
//! anchor text as the title, best-effort byline and `<time datetime>`
//! extraction from the surrounding subtree, and canonical-URL dedupe.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

use crate::fingerprint::canonicalize_url;
use crate::models::CandidatePost;

use super::feed::parse_feed_date;

/// Path segments that mark a link as a publication page.
const PUBLICATION_SEGMENTS: [&str; 5] = ["/blog/", "/news/", "/post/", "/articles/", "/engineering/"];

/// Paths that are navigation, not articles.
const EXCLUDED_SEGMENTS: [&str; 7] = [
    "/categories/",
    "/tags/",
    "/authors/",
    "/platform",
    "/solutions/",
    "/pricing",
    "/about",
];

/// Class/id markers identifying post-list containers (tier 2).
const CONTAINER_MARKERS: [&str; 4] = ["post", "entry", "card", "article"];

const MIN_TITLE_LEN: usize = 5;
const MAX_TITLE_LEN: usize = 200;

/// Extract candidate posts from a blog index page.
pub fn extract_from_html(html: &str, source_name: &str, base_url: &str) -> Vec<CandidatePost> {
    let document = Html::parse_document(html);

    let tier1 = extract_article_elements(&document, source_name, base_url);
    if !tier1.is_empty() {
        return tier1;
    }
    let tier2 = extract_heading_links(&document, source_name, base_url);
    if !tier2.is_empty() {
        return tier2;
    }
    extract_anchor_scan(&document, source_name, base_url)
}

/// Whether a URL path looks like a publication page.
pub fn is_publication_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    if PUBLICATION_SEGMENTS.iter().any(|s| lower.contains(s)) {
        return true;
    }
    // /YYYY/MM/ shaped archive paths.
    date_path_re().is_match(&lower)
}

fn date_path_re() -> Regex {
    Regex::new(r"/\d{4}/\d{2}(/|$)").expect("static regex")
}

fn is_excluded(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    if lower.starts_with('#') || lower.starts_with("mailto:") {
        return true;
    }
    EXCLUDED_SEGMENTS.iter().any(|s| lower.contains(s))
}

// ───────────────────────── tiers ─────────────────────────

/// Tier 1: one entry per `<article>`, using its longest-text anchor.
fn extract_article_elements(
    document: &Html,
    source_name: &str,
    base_url: &str,
) -> Vec<CandidatePost> {
    let Ok(article_sel) = Selector::parse("article") else {
        return vec![];
    };
    let Ok(anchor_sel) = Selector::parse("a[href]") else {
        return vec![];
    };

    let mut seen = HashSet::new();
    let mut posts = Vec::new();

    for article in document.select(&article_sel) {
        // Longest visible text wins: headline links beat breadcrumbs.
        let best = article
            .select(&anchor_sel)
            .filter_map(|a| {
                let text = collapse_ws(&a.text().collect::<Vec<_>>().join(" "));
                let href = a.value().attr("href")?;
                if text.len() < MIN_TITLE_LEN || is_excluded(href) {
                    return None;
                }
                Some((a, href.to_string(), text))
            })
            .max_by_key(|(_, _, text)| text.len());

        let Some((anchor, href, title)) = best else {
            continue;
        };
        let Some(url) = resolve(&href, base_url) else {
            continue;
        };
        if !is_publication_path(Url::parse(&url).map(|u| u.path().to_string()).as_deref().unwrap_or("")) {
            continue;
        }
        if !seen.insert(canonicalize_url(&url)) {
            continue;
        }

        posts.push(build_post(source_name, url, title, Some(article), anchor));
    }

    posts
}

/// Tier 2: anchors under headings inside post-list containers.
fn extract_heading_links(document: &Html, source_name: &str, base_url: &str) -> Vec<CandidatePost> {
    let Ok(heading_sel) = Selector::parse("h2 a[href], h3 a[href]") else {
        return vec![];
    };

    let mut seen = HashSet::new();
    let mut posts = Vec::new();

    for anchor in document.select(&heading_sel) {
        let Some(container) = enclosing_marked_container(anchor) else {
            continue;
        };
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if is_excluded(href) {
            continue;
        }
        let title = collapse_ws(&anchor.text().collect::<Vec<_>>().join(" "));
        if title.len() < MIN_TITLE_LEN {
            continue;
        }
        let Some(url) = resolve(href, base_url) else {
            continue;
        };
        if !seen.insert(canonicalize_url(&url)) {
            continue;
        }

        posts.push(build_post(source_name, url, title, Some(container), anchor));
    }

    posts
}

/// Tier 3: every anchor whose path is article-shaped.
fn extract_anchor_scan(document: &Html, source_name: &str, base_url: &str) -> Vec<CandidatePost> {
    let Ok(anchor_sel) = Selector::parse("a[href]") else {
        return vec![];
    };

    let mut seen = HashSet::new();
    let mut posts = Vec::new();

    for anchor in document.select(&anchor_sel) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if is_excluded(href) {
            continue;
        }
        let Some(url) = resolve(href, base_url) else {
            continue;
        };
        let path = match Url::parse(&url) {
            Ok(u) => u.path().to_string(),
            Err(_) => continue,
        };
        if !is_publication_path(&path) {
            continue;
        }
        let title = collapse_ws(&anchor.text().collect::<Vec<_>>().join(" "));
        if title.len() < MIN_TITLE_LEN {
            continue;
        }
        if url == base_url || url.trim_end_matches('/') == base_url.trim_end_matches('/') {
            continue;
        }
        if !seen.insert(canonicalize_url(&url)) {
            continue;
        }

        posts.push(build_post(source_name, url, title, None, anchor));
    }

    posts
}

// ───────────────────────── shared pieces ─────────────────────────

fn build_post<'a>(
    source_name: &str,
    url: String,
    title: String,
    scope: Option<ElementRef<'a>>,
    anchor: ElementRef<'a>,
) -> CandidatePost {
    let scope = scope.or_else(|| enclosing_marked_container(anchor));
    let author = scope.and_then(extract_byline);
    let published_at = scope.and_then(extract_timestamp);

    CandidatePost {
        source_name: source_name.to_string(),
        url,
        title: title.chars().take(MAX_TITLE_LEN).collect(),
        published_at,
        author,
        summary: None,
        tags: vec![],
    }
}

/// Nearest ancestor that is an `<article>` or carries a post-list marker in
/// its class or id.
fn enclosing_marked_container(el: ElementRef) -> Option<ElementRef> {
    for node in el.ancestors() {
        let Some(ancestor) = ElementRef::wrap(node) else {
            continue;
        };
        if ancestor.value().name() == "article" {
            return Some(ancestor);
        }
        let class = ancestor.value().attr("class").unwrap_or_default();
        let id = ancestor.value().attr("id").unwrap_or_default();
        let haystack = format!("{} {}", class, id).to_ascii_lowercase();
        if CONTAINER_MARKERS.iter().any(|m| haystack.contains(m)) {
            return Some(ancestor);
        }
    }
    None
}

/// Byline from `class~=author`, `rel=author`, or Schema.org
/// `itemprop=author` nodes inside the entry's subtree.
fn extract_byline(scope: ElementRef) -> Option<String> {
    let Ok(sel) = Selector::parse("[class*=author], [rel=author], [itemprop=author]") else {
        return None;
    };
    for el in scope.select(&sel) {
        let text = collapse_ws(&el.text().collect::<Vec<_>>().join(" "));
        let text = text.trim_start_matches("By ").trim_start_matches("by ").trim();
        if !text.is_empty() && text.len() < 120 {
            return Some(text.to_string());
        }
    }
    None
}

/// Timestamp from a `<time datetime>` inside the entry's subtree.
fn extract_timestamp(scope: ElementRef) -> Option<chrono::DateTime<chrono::Utc>> {
    let Ok(sel) = Selector::parse("time[datetime]") else {
        return None;
    };
    scope
        .select(&sel)
        .filter_map(|t| t.value().attr("datetime"))
        .find_map(parse_feed_date)
}

/// Feed URL advertised by the page via `<link rel="alternate">`, if any.
///
/// Blog index pages frequently point at their own RSS or Atom document;
/// following that link recovers strict feed parsing for sources configured
/// with an HTML URL.
pub fn find_alternate_feed_link(html: &str, base_url: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let sel = Selector::parse(
        "link[rel=alternate][type=\"application/rss+xml\"], \
         link[rel=alternate][type=\"application/atom+xml\"], \
         link[rel=alternate][type=\"application/feed+json\"]",
    )
    .ok()?;
    document
        .select(&sel)
        .filter_map(|link| link.value().attr("href"))
        .find_map(|href| resolve(href, base_url))
}

fn resolve(href: &str, base_url: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    if let Ok(url) = Url::parse(href) {
        return Some(url.to_string());
    }
    Url::parse(base_url).ok()?.join(href).ok().map(|u| u.to_string())
}

pub(crate) fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
