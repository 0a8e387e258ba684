use anyhow::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Connect the shared pool used by both the entry store and the vector
/// store. Sized min 2 / max 10; connection loss surfaces to callers as a
/// retryable store error.
pub async fn connect(dsn: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .min_connections(2)
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(30))
        .connect(dsn)
        .await?;

    Ok(pool)
}
