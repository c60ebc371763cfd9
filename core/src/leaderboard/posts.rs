//! Message ids of published boards, so a restart edits the same message
//! instead of posting a new one.

use chrono::Utc;
use rusqlite::params;

use crate::db::Database;
use crate::error::Result;

#[derive(Clone, Debug)]
pub struct LeaderboardPostsRepository {
    db: Database,
}

impl LeaderboardPostsRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn get_message_id(
        &self,
        platform: &str,
        channel_id: &str,
        board_key: &str,
    ) -> Result<Option<String>> {
        self.db
            .fetch_one(
                "SELECT message_id FROM leaderboard_posts
                 WHERE platform = ?1 AND channel_id = ?2 AND board_key = ?3",
                vec![
                    platform.to_string().into(),
                    channel_id.to_string().into(),
                    board_key.to_string().into(),
                ],
                |row| row.get(0),
            )
            .await
    }

    pub async fn upsert_message_id(
        &self,
        platform: &str,
        channel_id: &str,
        board_key: &str,
        message_id: &str,
    ) -> Result<()> {
        let (platform, channel_id, board_key, message_id) = (
            platform.to_string(),
            channel_id.to_string(),
            board_key.to_string(),
            message_id.to_string(),
        );
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO leaderboard_posts
                        (platform, channel_id, board_key, message_id, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                     ON CONFLICT(platform, channel_id, board_key)
                     DO UPDATE SET message_id = excluded.message_id, updated_at = excluded.updated_at",
                    params![platform, channel_id, board_key, message_id, Utc::now()],
                )?;
                Ok(())
            })
            .await
    }
}
