//! Configuration loading and validation.
//!
//! Settings are read from a TOML file and then overridden by environment
//! variables using `__` as the nesting separator (`CACHE__BACKEND`,
//! `FEEDS__0__URL`, `VECTOR_DB__TEXT_VECTOR_DIMENSION`, ...). Invalid
//! configuration is a startup-only failure: `load_config` bails and the
//! process exits with code 1.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Indexed similarity search in the backing store caps vector width.
pub const MAX_INDEXED_DIMENSION: usize = 2000;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub vector_db: VectorDbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub article: ArticleConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
}

/// A single publication source. Created once at startup, read-only after.
#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    /// Unique, stable identifier.
    pub name: String,
    /// Origin endpoint (feed URL or blog index page).
    pub url: String,
    /// Minimum minutes between ticks for this source.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_minutes: u64,
    /// Cap on candidates accepted per tick.
    #[serde(default = "default_max_posts")]
    pub max_posts_per_tick: usize,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Optional adapter selection hint overriding host rules.
    #[serde(default)]
    pub hints: Option<AdapterHint>,
}

/// Adapter selection hints recognized in `FeedConfig::hints`.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterHint {
    /// Single-page-application site; initial HTML lacks content.
    Spa,
    /// Host sits behind an anti-bot CDN; prefer the render capability.
    PrefersBrowser,
    /// Endpoint serves an HTML index rather than a feed document.
    PrefersHtml,
}

fn default_poll_interval() -> u64 {
    60
}
fn default_max_posts() -> usize {
    10
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    /// Hosts served behind anti-bot CDNs: 403/503 falls through to the
    /// challenge-aware path instead of failing permanently.
    #[serde(default = "default_bot_gated_hosts")]
    pub bot_gated_hosts: Vec<String>,
    /// Hosts with Next.js-style client-side rendering and `/YYYY/MM/slug`
    /// article URLs.
    #[serde(default = "default_spa_hosts")]
    pub spa_hosts: Vec<String>,
    /// Medium-family hosts requiring browser rendering for logged-out HTML.
    #[serde(default = "default_medium_hosts")]
    pub medium_hosts: Vec<String>,
    /// Hosts allowed to present broken certificate chains. Each use emits a
    /// warning event.
    #[serde(default)]
    pub insecure_tls_hosts: Vec<String>,
}

fn default_fetch_timeout() -> u64 {
    30
}
fn default_bot_gated_hosts() -> Vec<String> {
    vec![
        "blog.cloudflare.com".into(),
        "slack.engineering".into(),
        "eng.uber.com".into(),
    ]
}
fn default_spa_hosts() -> Vec<String> {
    vec!["engineering.atspotify.com".into()]
}
fn default_medium_hosts() -> Vec<String> {
    vec!["medium.com".into(), "netflixtechblog.com".into()]
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            bot_gated_hosts: default_bot_gated_hosts(),
            spa_hosts: default_spa_hosts(),
            medium_hosts: default_medium_hosts(),
            insecure_tls_hosts: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// `memory` | `postgres` | `filesystem`.
    #[serde(default = "default_cache_backend")]
    pub backend: String,
    /// Connection string for the postgres backend; falls back to
    /// `vector_db.connection_string` when unset.
    #[serde(default)]
    pub postgres_dsn: Option<String>,
    /// Default TTL for enrichment-cache entries.
    #[serde(default = "default_cache_ttl_hours")]
    pub ttl_hours: u64,
    /// Root directory for the filesystem backend.
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
}

fn default_cache_backend() -> String {
    "postgres".to_string()
}
fn default_cache_ttl_hours() -> u64 {
    24 * 7
}
fn default_cache_path() -> PathBuf {
    PathBuf::from("./data/cache")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            postgres_dsn: None,
            ttl_hours: default_cache_ttl_hours(),
            path: default_cache_path(),
        }
    }
}

impl CacheConfig {
    /// DSN for the postgres backend, shared with the vector store by default.
    pub fn dsn<'a>(&'a self, vector_db: &'a VectorDbConfig) -> &'a str {
        self.postgres_dsn
            .as_deref()
            .unwrap_or(&vector_db.connection_string)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorDbConfig {
    #[serde(default = "default_dsn")]
    pub connection_string: String,
    /// Suffix for the posts table (`posts_<collection>`).
    #[serde(default = "default_collection")]
    pub collection_name: String,
    /// D': vectors are truncated to this width before storage.
    #[serde(default = "default_dimension")]
    pub text_vector_dimension: usize,
}

fn default_dsn() -> String {
    "postgres://localhost:5432/blogwatch".to_string()
}
fn default_collection() -> String {
    "technical_blogs".to_string()
}
fn default_dimension() -> usize {
    1536
}

impl Default for VectorDbConfig {
    fn default() -> Self {
        Self {
            connection_string: default_dsn(),
            collection_name: default_collection(),
            text_vector_dimension: default_dimension(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `disabled` | `openai` | `ollama`.
    #[serde(default = "default_disabled")]
    pub model_type: String,
    #[serde(default)]
    pub model_name: Option<String>,
    /// Native dimension reported by the model.
    #[serde(default)]
    pub embedding_dimensions: Option<usize>,
    /// Base URL for the ollama provider.
    #[serde(default = "default_ollama_endpoint")]
    pub endpoint: String,
    /// Character budget for the canonical embed text.
    #[serde(default = "default_embed_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_ollama_endpoint() -> String {
    "http://localhost:11434".to_string()
}
fn default_embed_input_chars() -> usize {
    16_000
}
fn default_embed_timeout() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_type: default_disabled(),
            model_name: None,
            embedding_dimensions: None,
            endpoint: default_ollama_endpoint(),
            max_input_chars: default_embed_input_chars(),
            timeout_secs: default_embed_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.model_type != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `disabled` | `openai` | `ollama`.
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default = "default_ollama_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_llm_timeout() -> u64 {
    300
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model_name: None,
            endpoint: default_ollama_endpoint(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArticleConfig {
    /// When false, enrichment skips the full-text fetch and embeds the
    /// feed-provided summary only.
    #[serde(default = "default_true")]
    pub full_content_capture: bool,
    /// Gates the abstractive summary step.
    #[serde(default)]
    pub generate_summary: bool,
    /// Upper bound on tokens the summarizer may return.
    #[serde(default = "default_summary_tokens")]
    pub summary_max_tokens: usize,
    /// Per-tick candidate cap overriding each feed's `max_posts_per_tick`.
    #[serde(default)]
    pub max_articles_per_feed: Option<usize>,
    /// Global enrichment-semaphore size.
    #[serde(default = "default_article_tasks")]
    pub concurrent_article_tasks: usize,
}

fn default_summary_tokens() -> usize {
    256
}
fn default_article_tasks() -> usize {
    5
}

impl Default for ArticleConfig {
    fn default() -> Self {
        Self {
            full_content_capture: true,
            generate_summary: false,
            summary_max_tokens: default_summary_tokens(),
            max_articles_per_feed: None,
            concurrent_article_tasks: default_article_tasks(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Global cap on concurrently running source ticks.
    #[serde(default = "default_source_tasks")]
    pub max_concurrent_source_tasks: usize,
    /// Seconds between orchestrator wakeups to look for due sources.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Hard cap on a single source tick.
    #[serde(default = "default_tick_timeout")]
    pub tick_timeout_secs: u64,
    /// Grace period for in-flight work on shutdown.
    #[serde(default = "default_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_source_tasks() -> usize {
    10
}
fn default_tick_interval() -> u64 {
    60
}
fn default_tick_timeout() -> u64 {
    600
}
fn default_grace() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_source_tasks: default_source_tasks(),
            tick_interval_secs: default_tick_interval(),
            tick_timeout_secs: default_tick_timeout(),
            shutdown_grace_secs: default_grace(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrowserConfig {
    #[serde(default = "default_browsers")]
    pub max_concurrent_browsers: usize,
    #[serde(default = "default_render_timeout")]
    pub render_timeout_secs: u64,
}

fn default_browsers() -> usize {
    3
}
fn default_render_timeout() -> u64 {
    45
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            max_concurrent_browsers: default_browsers(),
            render_timeout_secs: default_render_timeout(),
        }
    }
}

/// Load configuration from a TOML file, apply environment overrides, and
/// validate. Missing file is not an error: all sections have defaults and
/// the environment alone can configure a deployment.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config: Config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config, std::env::vars())?;
    validate(&config)?;
    Ok(config)
}

/// Apply `SECTION__FIELD` environment overrides onto a parsed config.
///
/// Feed entries use a numeric index segment: `FEEDS__0__URL`. Unknown
/// variables are ignored; unparseable values for known variables are errors.
pub fn apply_env_overrides(
    config: &mut Config,
    vars: impl Iterator<Item = (String, String)>,
) -> Result<()> {
    for (key, value) in vars {
        let parts: Vec<&str> = key.split("__").collect();
        match parts.as_slice() {
            ["FEEDS", idx, field] => {
                let idx: usize = idx
                    .parse()
                    .with_context(|| format!("Invalid feed index in {key}"))?;
                while config.feeds.len() <= idx {
                    config.feeds.push(FeedConfig {
                        name: String::new(),
                        url: String::new(),
                        poll_interval_minutes: default_poll_interval(),
                        max_posts_per_tick: default_max_posts(),
                        enabled: true,
                        hints: None,
                    });
                }
                let feed = &mut config.feeds[idx];
                match *field {
                    "NAME" => feed.name = value,
                    "URL" => feed.url = value,
                    "POLL_INTERVAL" => {
                        feed.poll_interval_minutes =
                            value.parse().with_context(|| format!("Invalid {key}"))?
                    }
                    "MAX_POSTS" => {
                        feed.max_posts_per_tick =
                            value.parse().with_context(|| format!("Invalid {key}"))?
                    }
                    "ENABLED" => {
                        feed.enabled = value.parse().with_context(|| format!("Invalid {key}"))?
                    }
                    "HINTS" => {
                        feed.hints = Some(parse_hint(&value)?);
                    }
                    _ => {}
                }
            }
            ["CACHE", "BACKEND"] => config.cache.backend = value,
            ["CACHE", "POSTGRES_DSN"] => config.cache.postgres_dsn = Some(value),
            ["CACHE", "TTL_HOURS"] => {
                config.cache.ttl_hours = value.parse().with_context(|| format!("Invalid {key}"))?
            }
            ["VECTOR_DB", "CONNECTION_STRING"] => config.vector_db.connection_string = value,
            ["VECTOR_DB", "COLLECTION_NAME"] => config.vector_db.collection_name = value,
            ["VECTOR_DB", "TEXT_VECTOR_DIMENSION"] => {
                config.vector_db.text_vector_dimension =
                    value.parse().with_context(|| format!("Invalid {key}"))?
            }
            ["EMBEDDING", "MODEL_TYPE"] => config.embedding.model_type = value,
            ["EMBEDDING", "MODEL_NAME"] => config.embedding.model_name = Some(value),
            ["EMBEDDING", "EMBEDDING_DIMENSIONS"] => {
                config.embedding.embedding_dimensions =
                    Some(value.parse().with_context(|| format!("Invalid {key}"))?)
            }
            ["ARTICLE", "FULL_CONTENT_CAPTURE"] => {
                config.article.full_content_capture =
                    value.parse().with_context(|| format!("Invalid {key}"))?
            }
            ["ARTICLE", "GENERATE_SUMMARY"] => {
                config.article.generate_summary =
                    value.parse().with_context(|| format!("Invalid {key}"))?
            }
            ["ARTICLE", "MAX_ARTICLES_PER_FEED"] => {
                config.article.max_articles_per_feed =
                    Some(value.parse().with_context(|| format!("Invalid {key}"))?)
            }
            ["ARTICLE", "CONCURRENT_ARTICLE_TASKS"] => {
                config.article.concurrent_article_tasks =
                    value.parse().with_context(|| format!("Invalid {key}"))?
            }
            ["BROWSER", "MAX_CONCURRENT_BROWSERS"] => {
                config.browser.max_concurrent_browsers =
                    value.parse().with_context(|| format!("Invalid {key}"))?
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_hint(value: &str) -> Result<AdapterHint> {
    match value.to_ascii_lowercase().as_str() {
        "spa" => Ok(AdapterHint::Spa),
        "prefers-browser" | "browser" => Ok(AdapterHint::PrefersBrowser),
        "prefers-html" | "html" => Ok(AdapterHint::PrefersHtml),
        other => anyhow::bail!("Unknown adapter hint: '{other}'"),
    }
}

fn validate(config: &Config) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for feed in &config.feeds {
        if feed.name.trim().is_empty() {
            anyhow::bail!("Feed with url '{}' has an empty name", feed.url);
        }
        if feed.url.trim().is_empty() {
            anyhow::bail!("Feed '{}' has an empty url", feed.name);
        }
        if !seen.insert(feed.name.as_str()) {
            anyhow::bail!("Feed names must be unique: '{}'", feed.name);
        }
        if feed.poll_interval_minutes == 0 {
            anyhow::bail!("Feed '{}': poll_interval_minutes must be >= 1", feed.name);
        }
    }

    match config.cache.backend.as_str() {
        "memory" | "postgres" | "filesystem" => {}
        other => anyhow::bail!("Unknown cache backend: '{other}'. Must be memory, postgres, or filesystem."),
    }

    let dim = config.vector_db.text_vector_dimension;
    if dim == 0 || dim > MAX_INDEXED_DIMENSION {
        anyhow::bail!(
            "vector_db.text_vector_dimension must be in 1..={MAX_INDEXED_DIMENSION}, got {dim}"
        );
    }
    // Collection name lands in SQL identifiers.
    if !config
        .vector_db
        .collection_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        anyhow::bail!("vector_db.collection_name must be alphanumeric/underscore only");
    }

    match config.embedding.model_type.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!("Unknown embedding model_type: '{other}'"),
    }
    if config.embedding.is_enabled() && config.embedding.model_name.is_none() {
        anyhow::bail!(
            "embedding.model_name is required when model_type is '{}'",
            config.embedding.model_type
        );
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!("Unknown llm provider: '{other}'"),
    }

    if config.article.concurrent_article_tasks == 0 {
        anyhow::bail!("article.concurrent_article_tasks must be positive");
    }
    if config.scheduler.max_concurrent_source_tasks == 0 {
        anyhow::bail!("scheduler.max_concurrent_source_tasks must be positive");
    }
    if config.browser.max_concurrent_browsers == 0 {
        anyhow::bail!("browser.max_concurrent_browsers must be positive");
    }

    Ok(())
}

impl Config {
    pub fn feed_by_name(&self, name: &str) -> Option<&FeedConfig> {
        self.feeds.iter().find(|f| f.name == name)
    }

    /// Effective per-tick cap for a feed, honoring the global override.
    pub fn max_posts_for(&self, feed: &FeedConfig) -> usize {
        self.article
            .max_articles_per_feed
            .unwrap_or(feed.max_posts_per_tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Iterator<Item = (String, String)> + 'a {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
        assert_eq!(config.scheduler.max_concurrent_source_tasks, 10);
        assert_eq!(config.article.concurrent_article_tasks, 5);
        assert_eq!(config.browser.max_concurrent_browsers, 3);
    }

    #[test]
    fn test_env_overrides_feeds() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("FEEDS__0__NAME", "example"),
                ("FEEDS__0__URL", "https://x.test/rss.xml"),
                ("FEEDS__0__POLL_INTERVAL", "30"),
                ("FEEDS__0__MAX_POSTS", "5"),
                ("FEEDS__1__NAME", "spa-blog"),
                ("FEEDS__1__URL", "https://spa.test/blog"),
                ("FEEDS__1__HINTS", "spa"),
            ]),
        )
        .unwrap();

        assert_eq!(config.feeds.len(), 2);
        assert_eq!(config.feeds[0].name, "example");
        assert_eq!(config.feeds[0].poll_interval_minutes, 30);
        assert_eq!(config.feeds[0].max_posts_per_tick, 5);
        assert_eq!(config.feeds[1].hints, Some(AdapterHint::Spa));
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_env_overrides_sections() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("CACHE__BACKEND", "memory"),
                ("CACHE__TTL_HOURS", "48"),
                ("VECTOR_DB__TEXT_VECTOR_DIMENSION", "1920"),
                ("EMBEDDING__MODEL_TYPE", "ollama"),
                ("EMBEDDING__MODEL_NAME", "nomic-embed-text"),
                ("ARTICLE__GENERATE_SUMMARY", "true"),
                ("BROWSER__MAX_CONCURRENT_BROWSERS", "2"),
                ("UNRELATED_VAR", "ignored"),
            ]),
        )
        .unwrap();

        assert_eq!(config.cache.backend, "memory");
        assert_eq!(config.cache.ttl_hours, 48);
        assert_eq!(config.vector_db.text_vector_dimension, 1920);
        assert_eq!(config.embedding.model_type, "ollama");
        assert!(config.article.generate_summary);
        assert_eq!(config.browser.max_concurrent_browsers, 2);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_duplicate_feed_names_rejected() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("FEEDS__0__NAME", "dup"),
                ("FEEDS__0__URL", "https://a.test/rss"),
                ("FEEDS__1__NAME", "dup"),
                ("FEEDS__1__URL", "https://b.test/rss"),
            ]),
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_dimension_bound() {
        let mut config = Config::default();
        config.vector_db.text_vector_dimension = 4096;
        assert!(validate(&config).is_err());
        config.vector_db.text_vector_dimension = 2000;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_cache_dsn_falls_back_to_vector_db() {
        let config = Config::default();
        assert_eq!(
            config.cache.dsn(&config.vector_db),
            config.vector_db.connection_string
        );

        let mut with_own = Config::default();
        with_own.cache.postgres_dsn = Some("postgres://cache".into());
        assert_eq!(with_own.cache.dsn(&with_own.vector_db), "postgres://cache");
    }

    #[test]
    fn test_toml_round_trip() {
        let toml_src = r#"
            [[feeds]]
            name = "example"
            url = "https://x.test/feed.xml"
            poll_interval_minutes = 15

            [cache]
            backend = "memory"

            [vector_db]
            collection_name = "posts_test"
            text_vector_dimension = 768
        "#;
        let config: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(config.feeds.len(), 1);
        assert_eq!(config.feeds[0].poll_interval_minutes, 15);
        assert_eq!(config.vector_db.text_vector_dimension, 768);
        assert!(validate(&config).is_ok());
    }
}
