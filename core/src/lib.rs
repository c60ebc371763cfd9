//! Concurrency and ledger coordination for a chat game host.
//!
//! Games share four primitives:
//!
//! - [`ledger::Ledger`]: atomic append-only bean ledger
//! - [`session::SessionStore`]: durable per-scope round state
//! - [`lock::LockManager`]: per-key async mutual exclusion
//! - [`scheduler::CoalescingScheduler`]: debounced downstream refresh
//!
//! plus the services layered on them (users, economy, payout table, game
//! results, rounds, cooldowns, leaderboards).

pub mod config;
pub mod cooldown;
pub mod db;
pub mod economy;
pub mod error;
pub mod leaderboard;
pub mod ledger;
pub mod lock;
pub mod results;
pub mod rewards;
pub mod round;
pub mod scheduler;
pub mod session;
pub mod users;

#[cfg(test)]
mod integration_tests;

// Re-exports for convenience
pub use config::ArcadeConfig;
pub use db::Database;
pub use error::{ArcadeError, Result};
pub use ledger::{AccountId, Ledger};
pub use lock::{LockKey, LockManager};
pub use results::GameResultsRepository;
pub use rewards::{RewardKey, RewardsService};
pub use round::{RoundHost, StartPolicy};
pub use scheduler::{CoalescingScheduler, RefreshAction};
pub use session::{SessionId, SessionScope, SessionState, SessionStatus, SessionStore};
