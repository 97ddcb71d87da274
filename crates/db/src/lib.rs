//! Relational persistence for the reconciler.
//!
//! Row structs live in [`models`] and convert to/from the `vigil_core`
//! domain types; the query layer lives in [`repositories`]. Every
//! repository method takes a `&mut PgConnection`, so callers decide the
//! transaction scope — the reconciler runs its whole skeleton on one
//! transaction and passes `&mut *tx` down.

use sqlx::postgres::PgPoolOptions;

pub mod models;
pub mod repositories;

pub type DbPool = sqlx::PgPool;

/// Pool size used when the deployment does not configure one. Each
/// reconciliation holds one connection for the span of its transaction,
/// so this also caps concurrent reconciliations per process.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 20;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Cheap liveness probe used at startup.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
