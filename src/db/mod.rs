//! Database pool construction and embedded migrations.

use anyhow::{Context, Result};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection};
use diesel::sql_query;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

pub type DbPool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Applies per-connection PRAGMAs.
///
/// `busy_timeout` makes concurrent writers queue instead of failing; the
/// ledger's guarded transactions rely on it.
#[derive(Debug, Clone)]
struct PragmaCustomizer;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        sql_query("PRAGMA foreign_keys = ON;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        sql_query("PRAGMA busy_timeout = 5000;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        sql_query("PRAGMA synchronous = NORMAL;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        Ok(())
    }
}

/// Create the shared connection pool
pub fn create_pool(database_url: &str) -> Result<DbPool> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);

    let pool = r2d2::Pool::builder()
        .max_size(16)
        .connection_timeout(std::time::Duration::from_secs(30))
        .connection_customizer(Box::new(PragmaCustomizer))
        .build(manager)
        .context("Failed to create database connection pool")?;

    Ok(pool)
}

/// Run a blocking database closure off the async runtime.
///
/// Diesel work holds a pooled connection for the duration of the closure;
/// `spawn_blocking` keeps it from stalling the scheduler drivers.
pub async fn with_conn<T, F>(pool: &DbPool, f: F) -> crate::error::WalletResult<T>
where
    F: FnOnce(&mut SqliteConnection) -> crate::error::WalletResult<T> + Send + 'static,
    T: Send + 'static,
{
    let mut conn = pool.get()?;
    tokio::task::spawn_blocking(move || f(&mut conn)).await?
}

/// Run all pending embedded migrations
pub fn run_migrations(conn: &mut SqliteConnection) -> Result<()> {
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Migration error: {e}"))?;
    Ok(())
}
