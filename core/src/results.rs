//! Completed game results.
//!
//! One row per finished game per player, written once a round is decided.
//! Beans are paid separately through the ledger; `beans_earned` here is the
//! record of what the round paid, not a balance source.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::{ArcadeError, Result};
use crate::ledger::AccountId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameResult {
    pub id: i64,
    pub account: AccountId,
    pub game_key: String,
    /// Game-defined score; absent for games without one
    pub score: Option<i64>,
    pub beans_earned: i64,
    /// Caller-defined JSON, stored verbatim
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl GameResult {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            account: AccountId(row.get(1)?),
            game_key: row.get(2)?,
            score: row.get(3)?,
            beans_earned: row.get(4)?,
            context: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

/// Per-player totals for one game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GameSummary {
    pub played: u64,
    pub beans_earned: i64,
    pub best_score: Option<i64>,
}

#[derive(Clone)]
pub struct GameResultsRepository {
    db: Database,
}

impl GameResultsRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist one finished game for `account`. The user must exist.
    pub async fn record(
        &self,
        account: AccountId,
        game_key: &str,
        score: Option<i64>,
        beans_earned: i64,
        context: Option<&str>,
    ) -> Result<GameResult> {
        if game_key.trim().is_empty() {
            return Err(ArcadeError::validation("game key must not be empty"));
        }
        let game_key = game_key.to_string();
        let context = context.map(str::to_string);

        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO game_results (user_id, game_key, score, beans_earned, context, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![account.0, game_key, score, beans_earned, context, Utc::now()],
                )?;
                let id = conn.last_insert_rowid();
                Ok(conn.query_row(
                    "SELECT id, user_id, game_key, score, beans_earned, context, created_at
                     FROM game_results WHERE id = ?1",
                    params![id],
                    GameResult::from_row,
                )?)
            })
            .await
    }

    /// Most recent results first, optionally for one game only
    pub async fn recent(
        &self,
        account: AccountId,
        game_key: Option<&str>,
        limit: usize,
    ) -> Result<Vec<GameResult>> {
        let limit = limit.clamp(1, 500) as i64;
        let game_key = game_key.map(str::to_string);
        self.db
            .fetch_all(
                "SELECT id, user_id, game_key, score, beans_earned, context, created_at
                 FROM game_results
                 WHERE user_id = ?1 AND (?2 IS NULL OR game_key = ?2)
                 ORDER BY id DESC
                 LIMIT ?3",
                vec![account.0.into(), game_key.into(), limit.into()],
                GameResult::from_row,
            )
            .await
    }

    pub async fn summary(&self, account: AccountId, game_key: &str) -> Result<GameSummary> {
        let summary = self
            .db
            .fetch_one(
                "SELECT COUNT(*), COALESCE(SUM(beans_earned), 0), MAX(score)
                 FROM game_results
                 WHERE user_id = ?1 AND game_key = ?2",
                vec![account.0.into(), game_key.to_string().into()],
                |row| {
                    Ok(GameSummary {
                        played: row.get::<_, i64>(0)? as u64,
                        beans_earned: row.get(1)?,
                        best_score: row.get(2)?,
                    })
                },
            )
            .await?;
        Ok(summary.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::UsersRepository;

    async fn setup() -> (GameResultsRepository, AccountId) {
        let db = Database::open_in_memory().await.unwrap();
        let user = UsersRepository::new(db.clone())
            .get_or_create("discord", "7", Some("ana"))
            .await
            .unwrap();
        (GameResultsRepository::new(db), user.id)
    }

    #[tokio::test]
    async fn test_record_and_list() {
        let (results, account) = setup().await;

        let first = results
            .record(account, "wordle", Some(4), 20, Some(r#"{"guesses":4}"#))
            .await
            .unwrap();
        assert_eq!(first.account, account);
        assert_eq!(first.score, Some(4));
        assert_eq!(first.context.as_deref(), Some(r#"{"guesses":4}"#));

        results.record(account, "word_chain", None, 3, None).await.unwrap();
        results.record(account, "wordle", Some(2), 20, None).await.unwrap();

        let all = results.recent(account, None, 10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].score, Some(2));

        let wordle = results.recent(account, Some("wordle"), 10).await.unwrap();
        assert_eq!(wordle.len(), 2);
        assert!(wordle.iter().all(|r| r.game_key == "wordle"));
    }

    #[tokio::test]
    async fn test_summary() {
        let (results, account) = setup().await;
        assert_eq!(
            results.summary(account, "wordle").await.unwrap(),
            GameSummary::default()
        );

        results.record(account, "wordle", Some(4), 20, None).await.unwrap();
        results.record(account, "wordle", Some(6), 2, None).await.unwrap();
        results.record(account, "unscramble", Some(9), 5, None).await.unwrap();

        assert_eq!(
            results.summary(account, "wordle").await.unwrap(),
            GameSummary {
                played: 2,
                beans_earned: 22,
                best_score: Some(6),
            }
        );
    }

    #[tokio::test]
    async fn test_record_requires_known_user() {
        let (results, _) = setup().await;

        assert!(matches!(
            results.record(AccountId(999), "wordle", None, 0, None).await,
            Err(ArcadeError::Store(_))
        ));
        assert!(matches!(
            results.record(AccountId(1), " ", None, 0, None).await,
            Err(ArcadeError::Validation { .. })
        ));
    }
}
