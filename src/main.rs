//! `arcade` - admin CLI for the arcade chat game host
//!
//! Operates directly on the arcade SQLite database: schema migrations, bean
//! balances and adjustments, ledger history, finished games, the payout table,
//! leaderboards and game sessions.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use console::Style;
use std::sync::Arc;

use arcade_core::config::ArcadeConfig;
use arcade_core::db::migrations;
use arcade_core::economy::EconomyService;
use arcade_core::leaderboard::{
    Board, LeaderboardPostsRepository, LeaderboardPublisher, LeaderboardRepository,
    LeaderboardSink, LeaderboardTab,
};
use arcade_core::users::{User, UsersRepository};
use arcade_core::{
    CoalescingScheduler, Database, GameResultsRepository, Ledger, RewardsService, SessionId,
    SessionStatus, SessionStore,
};

use crate::cli::{Cli, Commands, PlayerArgs, SessionCommand};

mod cli;
mod logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ArcadeConfig::resolve(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }
    if let Some(level) = &cli.log {
        config.logging.level = level.clone();
    }
    logging::init(&config.logging)?;
    tracing::debug!("Effective configuration: {:?}", config);

    let db = Database::new(&config.database.path, config.database.busy_timeout());
    db.connect()
        .await
        .with_context(|| format!("Failed to open {}", config.database.path.display()))?;

    let result = run(&cli, &config, &db).await;
    db.close().await?;
    result
}

async fn run(cli: &Cli, config: &ArcadeConfig, db: &Database) -> Result<()> {
    let bold = Style::new().bold();
    let dim = Style::new().dim();

    if let Commands::Migrate = cli.command {
        let applied = migrations::run_migrations(db).await?;
        println!(
            "{} schema v{} ({} migration(s) applied)",
            Style::new().green().apply_to("ok"),
            migrations::schema_version(db).await?,
            applied
        );
        return Ok(());
    }

    let version = migrations::schema_version(db).await?;
    if version < migrations::latest_version() {
        anyhow::bail!(
            "Database schema is v{version}, expected v{}. Run `arcade migrate` first.",
            migrations::latest_version()
        );
    }

    let users = UsersRepository::new(db.clone());
    let ledger = Ledger::new(db.clone());
    let economy = EconomyService::new(users.clone(), ledger.clone())
        .with_rewards(RewardsService::new(&config.rewards));
    let boards = LeaderboardRepository::new(db.clone());
    let sessions = SessionStore::new(db.clone());

    match &cli.command {
        Commands::Migrate => {}

        Commands::Balance { player } => {
            let user = resolve(&users, player).await?;
            let balance = economy.balance(user.id).await?;
            let rank = boards.user_rank(user.id).await?;
            println!(
                "{} ({}): {} beans{}",
                bold.apply_to(user.label()),
                dim.apply_to(format!("#{}", user.id)),
                balance,
                rank.map(|r| format!(", rank {}", r.rank)).unwrap_or_default()
            );
        }

        Commands::Award {
            player,
            amount,
            reason,
            game,
            name,
        } => {
            let user = users
                .get_or_create(&player.platform, &player.user, name.as_deref())
                .await?;
            let balance = economy
                .award(user.id, *amount, reason, game.as_deref(), None)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!(
                "{} {:+} beans -> {} beans",
                bold.apply_to(user.label()),
                amount,
                balance
            );
        }

        Commands::History {
            player,
            limit,
            json,
        } => {
            let user = resolve(&users, player).await?;
            for tx in ledger.transactions(user.id, *limit).await? {
                if *json {
                    println!("{}", serde_json::to_string(&tx)?);
                    continue;
                }
                println!(
                    "{}  {:>+6}  {}{}",
                    dim.apply_to(tx.created_at.format("%Y-%m-%d %H:%M:%S")),
                    tx.delta,
                    tx.reason,
                    tx.tag.map(|t| format!(" [{t}]")).unwrap_or_default()
                );
            }
        }

        Commands::Results {
            player,
            game,
            limit,
        } => {
            let user = resolve(&users, player).await?;
            let results = GameResultsRepository::new(db.clone())
                .recent(user.id, game.as_deref(), *limit)
                .await?;
            if results.is_empty() {
                println!("{}", dim.apply_to("No finished games."));
            }
            for result in results {
                println!(
                    "{}  {:<12}  score {:>4}  {:>+5} beans",
                    dim.apply_to(result.created_at.format("%Y-%m-%d %H:%M:%S")),
                    result.game_key,
                    result
                        .score
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    result.beans_earned
                );
            }
        }

        Commands::Rewards => {
            for (key, amount) in economy.rewards().snapshot() {
                let overridden = config.rewards.contains_key(key);
                println!(
                    "{:<32} {:>5}{}",
                    key,
                    amount,
                    if overridden { "  (config)" } else { "" }
                );
            }
        }

        Commands::Leaderboard { tab, limit } => {
            let tab = LeaderboardTab::from(*tab);
            let limit = limit.unwrap_or(config.leaderboard.effective_limit());
            let rows = boards
                .board(tab, &config.leaderboard.game_keys, limit, chrono::Utc::now())
                .await?;
            let board = Board {
                tab,
                title: tab.title().to_string(),
                since: tab.since(chrono::Utc::now()),
                rows,
            };
            println!("{}", board.render());
        }

        Commands::Sessions { command } => match command {
            SessionCommand::Active { limit } => {
                let active = sessions.list_active(*limit).await?;
                if active.is_empty() {
                    println!("{}", dim.apply_to("No active sessions."));
                }
                for session in active {
                    println!(
                        "{}  {}  {}{}",
                        bold.apply_to(&session.id),
                        session.scope,
                        dim.apply_to(session.updated_at.format("%Y-%m-%d %H:%M:%S")),
                        session
                            .expires_at
                            .map(|e| format!("  expires {}", e.format("%H:%M:%S")))
                            .unwrap_or_default()
                    );
                }
            }
            SessionCommand::End { id, expired } => {
                let status = if *expired {
                    SessionStatus::Expired
                } else {
                    SessionStatus::Ended
                };
                sessions.end(&SessionId::from(id.as_str()), status).await?;
                println!("Session {} -> {}", bold.apply_to(id), status);
            }
            SessionCommand::Sweep => {
                let expired = sessions.end_expired(chrono::Utc::now()).await?;
                println!("Expired {} session(s)", expired);
            }
        },

        Commands::RefreshNow { tab } => {
            // Preview under its own board key so the live message id is untouched
            let mut target = config.leaderboard.clone();
            if !target.is_enabled() {
                target.channel_id = "console".to_string();
            }
            target.board_key = format!("{}:console", target.board_key);

            let publisher = LeaderboardPublisher::new(
                target,
                boards.clone(),
                LeaderboardPostsRepository::new(db.clone()),
                Arc::new(ConsoleSink),
            )
            .with_default_tab(LeaderboardTab::from(*tab));
            let scheduler =
                CoalescingScheduler::new(Arc::new(publisher), config.leaderboard.debounce())?;
            scheduler.refresh_now().await;

            let stats = scheduler.stats();
            if stats.failures > 0 {
                anyhow::bail!("Leaderboard refresh failed (see log)");
            }
        }
    }

    Ok(())
}

async fn resolve(users: &UsersRepository, player: &PlayerArgs) -> Result<User> {
    users
        .find(&player.platform, &player.user)
        .await?
        .with_context(|| format!("No {} user with id {}", player.platform, player.user))
}

/// Renders boards to stdout instead of a chat channel
struct ConsoleSink;

#[async_trait]
impl LeaderboardSink for ConsoleSink {
    async fn edit(&self, _channel_id: &str, _message_id: &str, board: &Board) -> Result<()> {
        println!("{}", board.render());
        Ok(())
    }

    async fn post(&self, channel_id: &str, board: &Board) -> Result<String> {
        println!("{}", board.render());
        Ok(format!("{channel_id}:preview"))
    }
}
