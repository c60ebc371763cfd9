//! Versioned schema migrations
//!
//! Every pending version is applied inside one atomic unit together with its
//! `schema_migrations` bookkeeping row, so a crash mid-way leaves the schema at
//! the previous version.

use rusqlite::{params, OptionalExtension, Transaction};
use tracing::info;

use super::Database;
use crate::error::Result;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "users, bean ledger, game sessions",
        sql: r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                platform TEXT NOT NULL,
                platform_user_id TEXT NOT NULL,
                display_name TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(platform, platform_user_id)
            );

            CREATE TABLE IF NOT EXISTS bean_accounts (
                user_id INTEGER PRIMARY KEY,
                balance INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS bean_transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                delta INTEGER NOT NULL,
                reason TEXT NOT NULL,
                game_key TEXT,
                metadata TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_bean_transactions_user
                ON bean_transactions(user_id);

            CREATE TABLE IF NOT EXISTS game_sessions (
                id TEXT PRIMARY KEY,
                platform TEXT NOT NULL,
                location_id TEXT NOT NULL,
                thread_id TEXT,
                game_key TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                state BLOB NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                expires_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_game_sessions_lookup
                ON game_sessions(platform, location_id, thread_id, game_key, status);
        "#,
    },
    Migration {
        version: 2,
        description: "leaderboard posts, ledger period index",
        sql: r#"
            CREATE TABLE IF NOT EXISTS leaderboard_posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                platform TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                board_key TEXT NOT NULL,
                message_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(platform, channel_id, board_key)
            );

            CREATE INDEX IF NOT EXISTS idx_bean_transactions_period
                ON bean_transactions(created_at, game_key);
        "#,
    },
    Migration {
        version: 3,
        description: "game results",
        sql: r#"
            CREATE TABLE IF NOT EXISTS game_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                game_key TEXT NOT NULL,
                score INTEGER,
                beans_earned INTEGER NOT NULL,
                context TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_game_results_user
                ON game_results(user_id, game_key);
        "#,
    },
];

/// Latest schema version this build knows about
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

fn current_version(tx: &Transaction<'_>) -> Result<u32> {
    let version: Option<u32> = tx
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get::<_, Option<u32>>(0)
        })
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

/// Apply every migration newer than the stored version.
///
/// Returns the number of migrations applied.
pub async fn run_migrations(db: &Database) -> Result<usize> {
    info!("Running DB migrations (if needed)");

    let applied = db
        .transaction(|tx| {
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )?;

            let current = current_version(tx)?;
            let mut applied = 0;
            for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
                info!(
                    "Applying migration v{}: {}",
                    migration.version, migration.description
                );
                tx.execute_batch(migration.sql)?;
                tx.execute(
                    "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                    params![migration.version, chrono::Utc::now()],
                )?;
                applied += 1;
            }
            Ok(applied)
        })
        .await?;

    info!("DB migrations complete ({} applied)", applied);
    Ok(applied)
}

/// Version currently recorded in the database; 0 before the first migration
pub async fn schema_version(db: &Database) -> Result<u32> {
    let tracked: Option<i64> = db
        .fetch_one(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations'",
            vec![],
            |row| row.get(0),
        )
        .await?;
    if tracked.is_none() {
        return Ok(0);
    }

    let version = db
        .fetch_one(
            "SELECT MAX(version) FROM schema_migrations",
            vec![],
            |row| row.get::<_, Option<u32>>(0),
        )
        .await?
        .flatten();
    Ok(version.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let db = Database::open_in_memory().await.unwrap();
        assert_eq!(schema_version(&db).await.unwrap(), latest_version());

        // Second run finds nothing to do
        let applied = run_migrations(&db).await.unwrap();
        assert_eq!(applied, 0);
        assert_eq!(schema_version(&db).await.unwrap(), latest_version());
    }

    #[tokio::test]
    async fn test_unmigrated_database_reports_version_zero() {
        let db = Database::new(":memory:", crate::db::DEFAULT_BUSY_TIMEOUT);
        db.connect().await.unwrap();
        assert_eq!(schema_version(&db).await.unwrap(), 0);

        assert_eq!(run_migrations(&db).await.unwrap(), MIGRATIONS.len());
        assert_eq!(schema_version(&db).await.unwrap(), latest_version());
    }

    #[tokio::test]
    async fn test_fresh_database_gets_every_table() {
        let db = Database::open_in_memory().await.unwrap();
        let tables: Vec<String> = db
            .fetch_all(
                "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                vec![],
                |row| row.get(0),
            )
            .await
            .unwrap();

        for expected in [
            "bean_accounts",
            "bean_transactions",
            "game_results",
            "game_sessions",
            "leaderboard_posts",
            "schema_migrations",
            "users",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }
}
