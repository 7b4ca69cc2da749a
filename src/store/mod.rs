//! The shared relational store (§4.B): three tables behind a single
//! connection. A `SqlitePool` capped at one connection stands in for the
//! "one connection + one rw_lock" contract the design calls for — `sqlx`
//! serializes callers waiting on that one connection for us, so every call
//! sequence bracketed between acquiring and releasing it is already
//! serializable without a separate hand-rolled mutex.

pub mod devices;
pub mod flows;
pub mod hostnames;

use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

const INIT_MIGRATION: &str = include_str!("migrations/001_init.sql");

/// Open the store. `database_url` is either `sqlite::memory:` (ephemeral,
/// the default per §6) or a `sqlite://` file path when
/// `use_in_memory_db=false` routes to a debug DB file.
pub async fn init(database_url: &str) -> Result<SqlitePool> {
    let is_memory = database_url.contains(":memory:");

    let mut options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    if !is_memory {
        options = options
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;
    info!("store migrations applied");

    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS _migrations (\
         version INTEGER PRIMARY KEY, \
         applied_at TEXT NOT NULL DEFAULT (datetime('now')))",
    )
    .execute(pool)
    .await?;

    let applied: bool = sqlx::query("SELECT 1 FROM _migrations WHERE version = 1")
        .fetch_optional(pool)
        .await?
        .is_some();

    if !applied {
        for statement in INIT_MIGRATION.split(';') {
            let stmt = statement.trim();
            if stmt.is_empty() {
                continue;
            }
            sqlx::query(stmt).execute(pool).await?;
        }
        sqlx::query("INSERT INTO _migrations (version) VALUES (1)")
            .execute(pool)
            .await?;
        info!("applied migration 001_init.sql");
    }

    Ok(())
}

/// Current Unix-second timestamp, the store's canonical clock (§3).
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
