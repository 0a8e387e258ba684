//! Content-addressed post identity.
//!
//! A post's fingerprint is `hex(sha256(source || 0x1F || canonical_url))`.
//! Titles are deliberately excluded so upstream headline edits do not create
//! duplicate records. Canonicalization is idempotent:
//! `canonicalize(canonicalize(u)) == canonicalize(u)`.

use sha2::{Digest, Sha256};
use url::Url;

/// Query parameters that never distinguish one article from another.
const TRACKING_PARAMS: [&str; 2] = ["gclid", "fbclid"];

/// Canonicalize a URL for fingerprinting and deduplication.
///
/// Lowercases scheme and host, strips default ports, strips the trailing
/// slash from non-root paths, drops the fragment, and removes tracking
/// query parameters (`utm_*`, `gclid`, `fbclid`). Returns the input
/// unchanged when it does not parse as an absolute URL.
pub fn canonicalize_url(raw: &str) -> String {
    let mut url = match Url::parse(raw.trim()) {
        Ok(u) => u,
        Err(_) => return raw.trim().to_string(),
    };

    // Url already lowercases scheme and host; explicit port equal to the
    // scheme default is dropped by set_port(None).
    if url.port() == url.port_or_known_default() {
        let _ = url.set_port(None);
    }

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            let k = k.to_ascii_lowercase();
            !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        let query = kept
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{}={}", k, v)
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&query));
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    url.to_string()
}

/// Derive the stable fingerprint for a post.
///
/// Two adapter runs that see the same article yield the same fingerprint
/// even if entry ordering, titles, or tags differ.
pub fn fingerprint(source_name: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_name.as_bytes());
    hasher.update([0x1f]);
    hasher.update(canonicalize_url(url).as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_lowercases_host() {
        assert_eq!(
            canonicalize_url("HTTPS://Example.COM/Blog/Post"),
            "https://example.com/Blog/Post"
        );
    }

    #[test]
    fn test_canonicalize_strips_default_port() {
        assert_eq!(
            canonicalize_url("https://example.com:443/a"),
            "https://example.com/a"
        );
        assert_eq!(
            canonicalize_url("http://example.com:80/a"),
            "http://example.com/a"
        );
        // Non-default port survives
        assert_eq!(
            canonicalize_url("https://example.com:8443/a"),
            "https://example.com:8443/a"
        );
    }

    #[test]
    fn test_canonicalize_strips_trailing_slash_except_root() {
        assert_eq!(
            canonicalize_url("https://example.com/blog/post/"),
            "https://example.com/blog/post"
        );
        assert_eq!(canonicalize_url("https://example.com/"), "https://example.com/");
    }

    #[test]
    fn test_canonicalize_drops_fragment_and_tracking() {
        assert_eq!(
            canonicalize_url("https://x.test/b?utm_source=foo&id=7&fbclid=zz#top"),
            "https://x.test/b?id=7"
        );
        assert_eq!(
            canonicalize_url("https://x.test/b?utm_source=foo"),
            "https://x.test/b"
        );
    }

    #[test]
    fn test_canonicalize_idempotent() {
        let inputs = [
            "https://Example.com:443/Blog/?utm_medium=rss#frag",
            "https://x.test/a",
            "http://y.test:8080/p/?gclid=1&q=2",
            "not a url",
        ];
        for raw in inputs {
            let once = canonicalize_url(raw);
            assert_eq!(canonicalize_url(&once), once, "not idempotent for {raw}");
        }
    }

    #[test]
    fn test_fingerprint_ignores_tracking_params() {
        let a = fingerprint("example", "https://x.test/b");
        let b = fingerprint("example", "https://x.test/b?utm_source=foo");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_distinguishes_sources() {
        let a = fingerprint("alpha", "https://x.test/b");
        let b = fingerprint("beta", "https://x.test/b");
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_stable() {
        assert_eq!(
            fingerprint("example", "https://x.test/a"),
            fingerprint("example", "https://x.test/a/")
        );
    }
}
