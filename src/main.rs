//! # blogwatch CLI
//!
//! | Command | Description |
//! |---------|-------------|
//! | `blogwatch init` | Create the schema (cache, posts collection, error log) |
//! | `blogwatch run` | Run the ingestion daemon until interrupted |
//! | `blogwatch tick` | Run a single pass over all due sources |
//! | `blogwatch search "<query>"` | Semantic search over ingested posts |
//! | `blogwatch sweep` | Reap expired cache entries |
//!
//! Exit codes: 0 normal exit; 1 configuration or initialization failure;
//! 2 runtime abort after the shutdown grace period.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use blogwatch::cache::{create_cache, CacheStore as _};
use blogwatch::config::{load_config, Config};
use blogwatch::context::AppContext;
use blogwatch::embedding::{create_embedding_client, truncate_to_dimension, EmbeddingClient as _};
use blogwatch::fetch::Fetcher;
use blogwatch::llm::create_summarizer;
use blogwatch::vectordb::memory::MemoryVectorStore;
use blogwatch::vectordb::postgres::PgVectorStore;
use blogwatch::vectordb::{SearchFilter, VectorStore};
use blogwatch::{db, migrate, scheduler};

#[derive(Parser)]
#[command(
    name = "blogwatch",
    about = "Periodic technical-blog ingestion engine",
    version
)]
struct Cli {
    /// Path to the TOML configuration file. Environment variables with
    /// `__` separators override file values.
    #[arg(long, global = true, default_value = "./config/blogwatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Run the ingestion daemon until SIGINT.
    Run,

    /// Run a single tick over all due sources, then exit.
    Tick,

    /// Embed a query and print the nearest posts.
    Search {
        query: String,

        /// Maximum results.
        #[arg(long, default_value = "10")]
        limit: usize,

        /// Restrict to one source.
        #[arg(long)]
        source: Option<String>,
    },

    /// Delete expired cache entries.
    Sweep,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&config.vector_db.connection_string).await?;
            migrate::run_migrations(&pool, &config).await?;
            pool.close().await;
            println!("Database initialized successfully.");
            Ok(0)
        }
        Commands::Tick => {
            let ctx = build_context(config).await?;
            let summary = scheduler::run_tick(&ctx).await?;
            println!("tick");
            println!("  sources run: {}", summary.sources_run);
            println!("  persisted: {}", summary.posts_persisted);
            println!("  duplicates: {}", summary.posts_duplicate);
            println!("  failed posts: {}", summary.posts_failed);
            if summary.store_unavailable {
                println!("  store unavailable during tick");
            }
            Ok(0)
        }
        Commands::Run => {
            let ctx = build_context(config).await?;

            let cancel = ctx.cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received, shutting down");
                    cancel.cancel();
                }
            });

            let graceful = scheduler::run_daemon(&ctx).await?;
            if let Some(pool) = &ctx.pool {
                pool.close().await;
            }
            Ok(if graceful { 0 } else { 2 })
        }
        Commands::Search {
            query,
            limit,
            source,
        } => {
            let ctx = build_context(config).await?;
            let native = ctx.embedder.embed(&query).await?;
            let vector = truncate_to_dimension(native, ctx.vectors.dimension())?;
            let filter = source.map(|source_name| SearchFilter {
                source_name: Some(source_name),
            });
            let hits = ctx.vectors.search(&vector, limit, filter.as_ref()).await?;

            for (record, distance) in hits {
                println!("{distance:.4}  {}  {}", record.title, record.url);
            }
            Ok(0)
        }
        Commands::Sweep => {
            let ctx = build_context(config).await?;
            let removed = ctx.cache.cleanup_expired().await?;
            println!("sweep removed {removed} expired entries");
            Ok(0)
        }
    }
}

/// Wire every shared handle from configuration.
///
/// The postgres cache backend brings up the shared pool and the pgvector
/// store; any other backend runs fully offline with the in-memory vector
/// store. The page renderer is an external capability and is not
/// constructed here; adapters that need it degrade per source.
async fn build_context(config: Config) -> Result<AppContext> {
    let cancel = CancellationToken::new();
    let config = Arc::new(config);

    let pool = if config.cache.backend == "postgres" {
        Some(db::connect(config.cache.dsn(&config.vector_db)).await?)
    } else {
        None
    };

    let cache = create_cache(&config, pool.clone()).await?;

    let vectors: Arc<dyn VectorStore> = match &pool {
        Some(pool) => Arc::new(PgVectorStore::new(
            pool.clone(),
            migrate::posts_table(&config),
            config.vector_db.text_vector_dimension,
        )),
        None => Arc::new(MemoryVectorStore::new(
            config.vector_db.text_vector_dimension,
        )),
    };

    let fetcher = Arc::new(Fetcher::new(config.fetch.clone(), cancel.clone())?);
    let embedder = Arc::from(create_embedding_client(&config.embedding)?);
    let summarizer = if config.llm.is_enabled() {
        Some(Arc::from(create_summarizer(&config.llm)?))
    } else {
        None
    };

    Ok(AppContext {
        config,
        pool,
        cache,
        vectors,
        fetcher,
        embedder,
        summarizer,
        renderer: None,
        cancel,
    })
}
