//! CLI argument parsing using clap 4.x derive macros

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use arcade_core::leaderboard::LeaderboardTab;

/// Admin tool for the arcade game host
///
/// Inspects and adjusts the beans ledger, game sessions and the published
/// leaderboard directly in the arcade database.
#[derive(Parser, Debug)]
#[command(name = "arcade")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: <config dir>/arcade/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file (overrides config and ARCADE_DB_PATH)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Log filter, e.g. `debug` (overrides config and ARCADE_LOG)
    #[arg(long, global = true)]
    pub log: Option<String>,
}

/// A player as the chat platform knows them
#[derive(Args, Debug, Clone)]
pub struct PlayerArgs {
    /// Platform user id
    pub user: String,

    /// Chat platform
    #[arg(long, default_value = "discord")]
    pub platform: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create or upgrade the database schema
    Migrate,

    /// Show a player's bean balance and rank
    Balance {
        #[command(flatten)]
        player: PlayerArgs,
    },

    /// Add (or with a negative amount, remove) beans
    Award {
        #[command(flatten)]
        player: PlayerArgs,

        /// Beans to add; negative to remove
        #[arg(allow_negative_numbers = true)]
        amount: i64,

        /// Ledger reason
        #[arg(short, long, default_value = "admin.adjust")]
        reason: String,

        /// Game key to attribute the beans to
        #[arg(short, long)]
        game: Option<String>,

        /// Display name to store for a new player
        #[arg(long)]
        name: Option<String>,
    },

    /// Show a player's most recent ledger entries
    History {
        #[command(flatten)]
        player: PlayerArgs,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Print JSON lines instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show a player's recently finished games
    Results {
        #[command(flatten)]
        player: PlayerArgs,

        /// Only this game
        #[arg(short, long)]
        game: Option<String>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Print the effective bean payout table
    Rewards,

    /// Print a leaderboard
    Leaderboard {
        #[arg(short, long, value_enum, default_value_t = TabArg::Today)]
        tab: TabArg,

        /// Rows to show (1-50; default from config)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Inspect or end game sessions
    Sessions {
        #[command(subcommand)]
        command: SessionCommand,
    },

    /// Run the leaderboard refresh once, rendering to the terminal
    RefreshNow {
        #[arg(short, long, value_enum, default_value_t = TabArg::Today)]
        tab: TabArg,
    },
}

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    /// List active sessions, most recent first
    Active {
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    /// End one active session
    End {
        /// Session id
        id: String,

        /// Mark as expired instead of ended
        #[arg(long)]
        expired: bool,
    },

    /// Expire every active session past its deadline
    Sweep,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabArg {
    Today,
    Week,
    AllTime,
}

impl From<TabArg> for LeaderboardTab {
    fn from(tab: TabArg) -> Self {
        match tab {
            TabArg::Today => LeaderboardTab::Today,
            TabArg::Week => LeaderboardTab::Week,
            TabArg::AllTime => LeaderboardTab::AllTime,
        }
    }
}
