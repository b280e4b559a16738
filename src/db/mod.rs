//! SQLite persistence for missions, participations and users.
//!
//! SQLite is the source of truth; the search index and client caches are derived from it.

mod repository;
mod seed;

pub use repository::*;
pub use seed::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            schema_version INTEGER NOT NULL DEFAULT 1,
            revision_id INTEGER NOT NULL DEFAULT 0,
            generated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        INSERT OR IGNORE INTO meta (id, schema_version, revision_id, generated_at)
        VALUES (1, 1, 0, datetime('now'));
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS missions (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            category TEXT NOT NULL,
            date TEXT NOT NULL,
            location TEXT NOT NULL,
            spots_total INTEGER NOT NULL CHECK (spots_total >= 0),
            spots_taken INTEGER NOT NULL DEFAULT 0
                CHECK (spots_taken >= 0 AND spots_taken <= spots_total),
            image TEXT NOT NULL DEFAULT '',
            organizer TEXT NOT NULL DEFAULT '',
            duration TEXT NOT NULL DEFAULT ''
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            avatar TEXT NOT NULL DEFAULT '',
            missions_completed INTEGER NOT NULL DEFAULT 0,
            hours_volunteered INTEGER NOT NULL DEFAULT 0,
            trees_planted INTEGER NOT NULL DEFAULT 0
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS participations (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            mission_id TEXT NOT NULL REFERENCES missions(id) ON DELETE CASCADE,
            status TEXT NOT NULL CHECK (status IN ('confirmed', 'cancelled')),
            joined_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    // One confirmed participation per (user, mission)
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_participations_active
            ON participations(user_id, mission_id) WHERE status = 'confirmed';
        CREATE INDEX IF NOT EXISTS idx_participations_mission ON participations(mission_id);
        CREATE INDEX IF NOT EXISTS idx_missions_category ON missions(category);
        CREATE INDEX IF NOT EXISTS idx_missions_date ON missions(date);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
