//! Leaderboards
//!
//! - All-time: ranked by current balance
//! - Today / this week: ranked by beans *earned* (positive deltas only) in a
//!   set of games since the start of the UTC day / ISO week
//!
//! [`LeaderboardPublisher`] renders a board and keeps one chat message up to
//! date; it is the [`RefreshAction`](crate::scheduler::RefreshAction) behind
//! the coalescing scheduler.

mod posts;
mod publisher;

pub use posts::LeaderboardPostsRepository;
pub use publisher::{Board, LeaderboardPublisher, LeaderboardSink};

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::db::Database;
use crate::error::{ArcadeError, Result};
use crate::ledger::AccountId;

const MAX_ROWS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardTab {
    #[default]
    Today,
    Week,
    AllTime,
}

impl LeaderboardTab {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Week => "week",
            Self::AllTime => "all_time",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Today => "Beans earned today",
            Self::Week => "Beans earned this week",
            Self::AllTime => "Global beans, all time",
        }
    }

    /// Start of the counted period, `None` for all-time
    pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = Utc
            .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
            .single()?;
        match self {
            Self::Today => Some(today),
            Self::Week => {
                Some(today - Duration::days(i64::from(today.weekday().num_days_from_monday())))
            }
            Self::AllTime => None,
        }
    }

    /// Unknown names fall back to today's board
    pub fn parse_lenient(raw: &str) -> Self {
        raw.parse().unwrap_or_default()
    }
}

impl std::fmt::Display for LeaderboardTab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeaderboardTab {
    type Err = ArcadeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "today" => Ok(Self::Today),
            "week" => Ok(Self::Week),
            "all_time" | "all-time" | "alltime" => Ok(Self::AllTime),
            other => Err(ArcadeError::validation(format!(
                "unknown leaderboard tab '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub rank: usize,
    pub account: AccountId,
    pub display_name: String,
    /// Balance (all-time) or beans earned in the period
    pub beans: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRank {
    pub account: AccountId,
    pub balance: i64,
    pub rank: u64,
}

fn ranked(rows: Vec<(i64, String, i64)>) -> Vec<LeaderboardRow> {
    rows.into_iter()
        .enumerate()
        .map(|(i, (account, display_name, beans))| LeaderboardRow {
            rank: i + 1,
            account: AccountId(account),
            display_name,
            beans,
        })
        .collect()
}

#[derive(Clone, Debug)]
pub struct LeaderboardRepository {
    db: Database,
}

impl LeaderboardRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Top balances; ties broken by lowest account id
    pub async fn global(&self, limit: usize) -> Result<Vec<LeaderboardRow>> {
        let limit = limit.clamp(1, MAX_ROWS) as i64;
        let rows: Vec<(i64, String, i64)> = self
            .db
            .fetch_all(
                "SELECT a.user_id,
                        COALESCE(u.display_name, u.platform_user_id, 'Unknown'),
                        a.balance
                 FROM bean_accounts a
                 JOIN users u ON u.id = a.user_id
                 ORDER BY a.balance DESC, a.user_id ASC
                 LIMIT ?1",
                vec![limit.into()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .await?;
        Ok(ranked(rows))
    }

    /// 1-based rank by balance; ties share a rank. `None` for unknown accounts.
    pub async fn user_rank(&self, account: AccountId) -> Result<Option<UserRank>> {
        self.db
            .fetch_one(
                "SELECT a.user_id,
                        a.balance,
                        (SELECT COUNT(*) FROM bean_accounts a2 WHERE a2.balance > a.balance) + 1
                 FROM bean_accounts a
                 WHERE a.user_id = ?1",
                vec![account.0.into()],
                |row| {
                    Ok(UserRank {
                        account: AccountId(row.get(0)?),
                        balance: row.get(1)?,
                        rank: row.get::<_, i64>(2)? as u64,
                    })
                },
            )
            .await
    }

    /// Beans earned since `since` in the given games. Penalties do not
    /// reduce earnings. No game keys means an empty board.
    pub async fn earned_since(
        &self,
        since: DateTime<Utc>,
        game_keys: &[String],
        limit: usize,
    ) -> Result<Vec<LeaderboardRow>> {
        if game_keys.is_empty() {
            return Ok(Vec::new());
        }
        let limit = limit.clamp(1, MAX_ROWS) as i64;

        let placeholders = (0..game_keys.len())
            .map(|i| format!("?{}", i + 3))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT u.id,
                    COALESCE(u.display_name, u.platform_user_id, 'Unknown'),
                    SUM(CASE WHEN bt.delta > 0 THEN bt.delta ELSE 0 END) AS earned
             FROM bean_transactions bt
             JOIN users u ON u.id = bt.user_id
             WHERE bt.created_at >= ?1
               AND bt.game_key IN ({placeholders})
             GROUP BY u.id
             HAVING earned > 0
             ORDER BY earned DESC, u.id ASC
             LIMIT ?2"
        );

        let game_keys = game_keys.to_vec();
        let rows: Vec<(i64, String, i64)> = self
            .db
            .call(move |conn| {
                let mut params: Vec<&dyn ToSql> = vec![&since, &limit];
                params.extend(game_keys.iter().map(|key| key as &dyn ToSql));

                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params.as_slice(), |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        Ok(ranked(rows))
    }

    /// Rows for one tab
    pub async fn board(
        &self,
        tab: LeaderboardTab,
        game_keys: &[String],
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<LeaderboardRow>> {
        match tab.since(now) {
            None => self.global(limit).await,
            Some(since) => self.earned_since(since, game_keys, limit).await,
        }
    }
}
