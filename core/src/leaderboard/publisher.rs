use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::{LeaderboardPostsRepository, LeaderboardRepository, LeaderboardRow, LeaderboardTab};
use crate::config::LeaderboardConfig;
use crate::error::Result;
use crate::scheduler::RefreshAction;

/// A rendered-ready leaderboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub tab: LeaderboardTab,
    pub title: String,
    /// Start of the counted period (UTC); `None` for all-time
    pub since: Option<DateTime<Utc>>,
    pub rows: Vec<LeaderboardRow>,
}

impl Board {
    /// Plain-text rendering, one line per player
    pub fn render(&self) -> String {
        let mut out = self.title.clone();
        if let Some(since) = self.since {
            out.push_str(&format!(" (since {} UTC)", since.format("%Y-%m-%d %H:%M")));
        }
        out.push('\n');

        if self.rows.is_empty() {
            out.push_str(match self.tab {
                LeaderboardTab::AllTime => "No data yet.",
                _ => "Play a game to appear here!",
            });
            return out;
        }
        for row in &self.rows {
            out.push_str(&format!(
                "{}. {} - {} beans\n",
                row.rank, row.display_name, row.beans
            ));
        }
        out.trim_end().to_string()
    }
}

/// Chat-platform side of publishing: post a new message or edit one in place
#[async_trait]
pub trait LeaderboardSink: Send + Sync {
    /// Edit an existing message; an error means it must be recreated
    async fn edit(&self, channel_id: &str, message_id: &str, board: &Board) -> anyhow::Result<()>;

    /// Post a new message and return its id
    async fn post(&self, channel_id: &str, board: &Board) -> anyhow::Result<String>;
}

/// Keeps one leaderboard message per (platform, channel, board key) current
pub struct LeaderboardPublisher {
    config: LeaderboardConfig,
    boards: LeaderboardRepository,
    posts: LeaderboardPostsRepository,
    sink: Arc<dyn LeaderboardSink>,
    default_tab: LeaderboardTab,
}

impl LeaderboardPublisher {
    pub fn new(
        config: LeaderboardConfig,
        boards: LeaderboardRepository,
        posts: LeaderboardPostsRepository,
        sink: Arc<dyn LeaderboardSink>,
    ) -> Self {
        Self {
            config,
            boards,
            posts,
            sink,
            default_tab: LeaderboardTab::Today,
        }
    }

    /// Tab published by scheduled refreshes
    pub fn with_default_tab(mut self, tab: LeaderboardTab) -> Self {
        self.default_tab = tab;
        self
    }

    pub async fn build(&self, tab: LeaderboardTab) -> Result<Board> {
        let now = Utc::now();
        let rows = self
            .boards
            .board(
                tab,
                &self.config.game_keys,
                self.config.effective_limit(),
                now,
            )
            .await?;
        Ok(Board {
            tab,
            title: tab.title().to_string(),
            since: tab.since(now),
            rows,
        })
    }

    /// Build `tab` and edit the stored message, posting (and remembering) a
    /// new one when there is none or the edit fails. Returns the message id.
    pub async fn publish(&self, tab: LeaderboardTab) -> anyhow::Result<String> {
        if !self.config.is_enabled() {
            anyhow::bail!("leaderboard channel is not configured");
        }
        let board = self.build(tab).await?;
        let LeaderboardConfig {
            platform,
            channel_id,
            board_key,
            ..
        } = &self.config;

        if let Some(message_id) = self
            .posts
            .get_message_id(platform, channel_id, board_key)
            .await?
        {
            match self.sink.edit(channel_id, &message_id, &board).await {
                Ok(()) => {
                    info!("Leaderboard message updated (message_id={})", message_id);
                    return Ok(message_id);
                }
                Err(e) => {
                    warn!(
                        "Leaderboard message {} could not be edited; will recreate: {:#}",
                        message_id, e
                    );
                }
            }
        }

        let message_id = self.sink.post(channel_id, &board).await?;
        self.posts
            .upsert_message_id(platform, channel_id, board_key, &message_id)
            .await?;
        info!("Leaderboard message posted (message_id={})", message_id);
        Ok(message_id)
    }
}

#[async_trait]
impl RefreshAction for LeaderboardPublisher {
    async fn refresh(&self) -> anyhow::Result<()> {
        self.publish(self.default_tab).await.map(|_| ())
    }
}
