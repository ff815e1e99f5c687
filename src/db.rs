//! Connection-pool bootstrap for the persistence surface (spec §6.3).

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Open a connection pool against `database_url`.
///
/// Mirrors the pool sizing used by the load-test harness
/// (`stress::setup_test_database` drives many concurrent connections);
/// callers embedding this crate in a request handler may want a larger
/// pool under real traffic.
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    tracing::info!("connecting to postgres");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    tracing::info!("connected to postgres");
    Ok(pool)
}
