//! # blogwatch
//!
//! **A periodic technical-blog ingestion engine.**
//!
//! blogwatch discovers new articles across a curated set of publication
//! sources, fetches them resiliently in the face of anti-bot defenses,
//! extracts clean article content, embeds it, and persists metadata and
//! vectors for semantic retrieval. One shared PostgreSQL database backs
//! both a TTL-bounded key/value cache and a pgvector index over post
//! embeddings.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────┐
//! │   Adapters   │──▶│  Enrichment  │──▶│   Postgres    │
//! │ feed/html/   │   │ fetch+extract│   │ cache_entries │
//! │ spa/browser  │   │ +embed       │   │ posts (HNSW)  │
//! └──────┬───────┘   └──────────────┘   └───────────────┘
//!        │
//!  ┌─────┴──────┐
//!  │ Scheduler  │  per-source ticks, semaphores, shutdown
//!  └────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. The **scheduler** ([`scheduler`]) runs a tick per due source.
//! 2. A **source adapter** ([`adapters`]) turns the source's endpoint into
//!    [`models::CandidatePost`]s — strict feed parsing with HTML-as-feed,
//!    SPA, and browser-rendered fallbacks.
//! 3. The **enrichment pipeline** ([`enrich`]) dedupes by fingerprint,
//!    fetches the article, extracts content ([`extract`]), embeds it
//!    ([`embedding`]), and upserts into the vector store ([`vectordb`]).
//! 4. The **entry store** ([`cache`]) carries polling state, fingerprints,
//!    and the article body cache with TTL expiry.

pub mod adapters;
pub mod cache;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod enrich;
pub mod errors;
pub mod extract;
pub mod fetch;
pub mod fingerprint;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod render;
pub mod scheduler;
pub mod vectordb;
