//! Bean economy policy over the ledger.
//!
//! Games award, charge and pay out through [`EconomyService`]; the ledger
//! stays a dumb append-only log. Leaderboard refreshes are driven by ledger
//! listeners, not by this service.

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{ArcadeError, Result};
use crate::ledger::{AccountId, Ledger};
use crate::rewards::RewardsService;
use crate::users::{User, UsersRepository};

/// One winner's share of a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub account: AccountId,
    pub amount: i64,
}

impl Payout {
    pub fn new(account: AccountId, amount: i64) -> Self {
        Self { account, amount }
    }
}

/// Outcome of one payout; failures leave the round's outcome untouched
#[derive(Debug)]
pub struct PayoutResult {
    pub account: AccountId,
    pub amount: i64,
    pub balance: Result<i64>,
}

impl PayoutResult {
    pub fn is_ok(&self) -> bool {
        self.balance.is_ok()
    }
}

#[derive(Clone)]
pub struct EconomyService {
    users: UsersRepository,
    ledger: Ledger,
    rewards: RewardsService,
}

impl EconomyService {
    pub fn new(users: UsersRepository, ledger: Ledger) -> Self {
        Self {
            users,
            ledger,
            rewards: RewardsService::default(),
        }
    }

    /// Replace the built-in payout table
    pub fn with_rewards(mut self, rewards: RewardsService) -> Self {
        self.rewards = rewards;
        self
    }

    pub fn rewards(&self) -> &RewardsService {
        &self.rewards
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn users(&self) -> &UsersRepository {
        &self.users
    }

    /// Resolve (or register) a platform player
    pub async fn player(
        &self,
        platform: &str,
        platform_user_id: &str,
        display_name: Option<&str>,
    ) -> Result<User> {
        self.users
            .get_or_create(platform, platform_user_id, display_name)
            .await
    }

    pub async fn balance(&self, account: AccountId) -> Result<i64> {
        self.ledger.get_balance(account).await
    }

    /// Add (or with a negative amount, remove) beans. Zero is a plain read.
    pub async fn award(
        &self,
        account: AccountId,
        amount: i64,
        reason: &str,
        game_key: Option<&str>,
        metadata: Option<&str>,
    ) -> Result<i64> {
        if amount == 0 {
            return self.ledger.get_balance(account).await;
        }
        let balance = self
            .ledger
            .apply_transaction(account, amount, reason, game_key, metadata)
            .await?;
        debug!(
            "Awarded {} beans to account {} reason={}",
            amount, account, reason
        );
        Ok(balance)
    }

    /// Pay `units` times the table amount for `key`, recorded with `key` as
    /// the reason
    pub async fn reward(
        &self,
        account: AccountId,
        key: &str,
        units: i64,
        game_key: Option<&str>,
    ) -> Result<i64> {
        let amount = self.rewards.amount_for(key, units)?;
        self.award(account, amount, key, game_key, None).await
    }

    /// Award to a platform identity, registering it on first sight
    pub async fn award_player(
        &self,
        platform: &str,
        platform_user_id: &str,
        display_name: Option<&str>,
        amount: i64,
        reason: &str,
        game_key: Option<&str>,
    ) -> Result<i64> {
        let user = self.player(platform, platform_user_id, display_name).await?;
        self.award(user.id, amount, reason, game_key, None).await
    }

    /// Charge `price` beans; `InsufficientBeans` when the balance is short
    pub async fn spend(
        &self,
        account: AccountId,
        price: i64,
        reason: &str,
        game_key: Option<&str>,
    ) -> Result<i64> {
        if price < 0 {
            return Err(ArcadeError::validation(format!(
                "price must not be negative, got {price}"
            )));
        }
        if price == 0 {
            return self.ledger.get_balance(account).await;
        }
        self.ledger
            .debit(account, price, reason, game_key, None)
            .await
    }

    /// Credit every winner independently.
    ///
    /// A failed credit is logged as "payout failed" and reported in its
    /// result; the other winners are still paid and nothing already recorded
    /// about the round is undone.
    pub async fn payout_round(
        &self,
        payouts: &[Payout],
        reason: &str,
        game_key: Option<&str>,
    ) -> Vec<PayoutResult> {
        let mut results = Vec::with_capacity(payouts.len());
        for payout in payouts {
            let balance = self
                .award(payout.account, payout.amount, reason, game_key, None)
                .await;
            if let Err(e) = &balance {
                error!(
                    "payout failed: account={} amount={} reason={}: {}",
                    payout.account, payout.amount, reason, e
                );
            }
            results.push(PayoutResult {
                account: payout.account,
                amount: payout.amount,
                balance,
            });
        }
        results
    }
}
