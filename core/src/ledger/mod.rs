//! Bean Ledger
//!
//! Append-only transaction log plus a materialized balance per account.
//!
//! Every mutation goes through [`Ledger::apply_transaction`], which appends the
//! transaction row and moves the cached balance inside one atomic unit, so
//! `balance == SUM(delta)` holds for every account at every commit. Callers on
//! the same account are serialized by the store's write transaction; no
//! external lock is needed.
//!
//! Committed transactions are announced to registered [`LedgerListener`]s
//! (the leaderboard scheduler subscribes here).

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, info};

use crate::db::Database;
use crate::error::{ArcadeError, Result};

/// Ledger account identity (the internal user id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub i64);

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AccountId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Materialized balance row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub balance: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One immutable ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub account_id: AccountId,
    pub delta: i64,
    pub reason: String,
    /// Game key the beans were earned or spent in
    pub tag: Option<String>,
    /// Caller-defined payload, stored verbatim
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            account_id: AccountId(row.get(1)?),
            delta: row.get(2)?,
            reason: row.get(3)?,
            tag: row.get(4)?,
            metadata: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

/// Observer of committed ledger transactions.
///
/// Called after commit, on the task that applied the transaction. Must not
/// block; hand heavy work to a scheduler.
pub trait LedgerListener: Send + Sync {
    fn on_transaction(&self, transaction: &Transaction, new_balance: i64);
}

/// The bean ledger. Cheap to clone.
#[derive(Clone)]
pub struct Ledger {
    db: Database,
    listeners: Arc<RwLock<Vec<Arc<dyn LedgerListener>>>>,
}

impl Ledger {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register a listener for every future committed transaction
    pub fn subscribe(&self, listener: Arc<dyn LedgerListener>) {
        self.listeners.write().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Current balance; creates a zero account on first sight
    pub async fn get_balance(&self, account: AccountId) -> Result<i64> {
        self.db
            .call(move |conn| {
                let existing: Option<i64> = conn
                    .query_row(
                        "SELECT balance FROM bean_accounts WHERE user_id = ?1",
                        params![account.0],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(balance) = existing {
                    return Ok(balance);
                }

                let now = Utc::now();
                conn.execute(
                    "INSERT OR IGNORE INTO bean_accounts (user_id, balance, created_at, updated_at)
                     VALUES (?1, 0, ?2, ?2)",
                    params![account.0, now],
                )?;
                Ok(0)
            })
            .await
    }

    /// Append `delta` to the account and return the resulting balance.
    ///
    /// The balance is not clamped at zero; spending callers use
    /// [`Ledger::debit`], which checks sufficiency in the same unit.
    pub async fn apply_transaction(
        &self,
        account: AccountId,
        delta: i64,
        reason: &str,
        tag: Option<&str>,
        metadata: Option<&str>,
    ) -> Result<i64> {
        self.apply(account, delta, reason, tag, metadata, None).await
    }

    /// Take `amount` beans from the account, failing with
    /// `InsufficientBeans` (and writing nothing) when the balance is short
    pub async fn debit(
        &self,
        account: AccountId,
        amount: i64,
        reason: &str,
        tag: Option<&str>,
        metadata: Option<&str>,
    ) -> Result<i64> {
        if amount <= 0 {
            return Err(ArcadeError::validation(format!(
                "debit amount must be positive, got {amount}"
            )));
        }
        self.apply(account, -amount, reason, tag, metadata, Some(amount))
            .await
    }

    async fn apply(
        &self,
        account: AccountId,
        delta: i64,
        reason: &str,
        tag: Option<&str>,
        metadata: Option<&str>,
        required: Option<i64>,
    ) -> Result<i64> {
        let reason = reason.trim().to_string();
        if reason.is_empty() {
            return Err(ArcadeError::validation("transaction reason must not be empty"));
        }
        let tag = tag.map(str::to_string);
        let metadata = metadata.map(str::to_string);

        let (committed, balance) = self
            .db
            .transaction(move |tx| {
                let now = Utc::now();
                tx.execute(
                    "INSERT OR IGNORE INTO bean_accounts (user_id, balance, created_at, updated_at)
                     VALUES (?1, 0, ?2, ?2)",
                    params![account.0, now],
                )?;

                let current: i64 = tx.query_row(
                    "SELECT balance FROM bean_accounts WHERE user_id = ?1",
                    params![account.0],
                    |row| row.get(0),
                )?;
                if let Some(required) = required {
                    if current < required {
                        return Err(ArcadeError::InsufficientBeans {
                            account,
                            balance: current,
                            required,
                        });
                    }
                }
                if current.checked_add(delta).is_none() {
                    return Err(ArcadeError::validation(format!(
                        "balance overflow on account {account}: {current} + {delta}"
                    )));
                }

                tx.execute(
                    "INSERT INTO bean_transactions (user_id, delta, reason, game_key, metadata, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![account.0, delta, reason, tag, metadata, now],
                )?;
                let id = tx.last_insert_rowid();

                tx.execute(
                    "UPDATE bean_accounts
                     SET balance = balance + ?1, updated_at = ?2
                     WHERE user_id = ?3",
                    params![delta, now, account.0],
                )?;

                let balance: i64 = tx.query_row(
                    "SELECT balance FROM bean_accounts WHERE user_id = ?1",
                    params![account.0],
                    |row| row.get(0),
                )?;

                let committed = Transaction {
                    id,
                    account_id: account,
                    delta,
                    reason,
                    tag,
                    metadata,
                    created_at: now,
                };
                Ok((committed, balance))
            })
            .await?;

        info!(
            "Applied {} beans to account {} reason={} balance={}",
            delta, account, committed.reason, balance
        );
        self.notify(&committed, balance);
        Ok(balance)
    }

    fn notify(&self, committed: &Transaction, balance: i64) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                listener.on_transaction(committed, balance)
            }));
            if outcome.is_err() {
                error!(
                    "Ledger listener panicked handling transaction {}",
                    committed.id
                );
            }
        }
    }

    /// Strict fetch: `NotFound` when the account was never seen
    pub async fn account(&self, account: AccountId) -> Result<Account> {
        self.db
            .fetch_one(
                "SELECT user_id, balance, created_at, updated_at
                 FROM bean_accounts WHERE user_id = ?1",
                vec![account.0.into()],
                |row| {
                    Ok(Account {
                        id: AccountId(row.get(0)?),
                        balance: row.get(1)?,
                        created_at: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .await?
            .ok_or_else(|| ArcadeError::not_found("account", account))
    }

    /// Most recent transactions first
    pub async fn transactions(&self, account: AccountId, limit: usize) -> Result<Vec<Transaction>> {
        let limit = limit.clamp(1, 500) as i64;
        self.db
            .fetch_all(
                "SELECT id, user_id, delta, reason, game_key, metadata, created_at
                 FROM bean_transactions
                 WHERE user_id = ?1
                 ORDER BY id DESC
                 LIMIT ?2",
                vec![account.0.into(), limit.into()],
                Transaction::from_row,
            )
            .await
    }

    pub async fn transaction_count(&self, account: AccountId) -> Result<u64> {
        let count: Option<i64> = self
            .db
            .fetch_one(
                "SELECT COUNT(*) FROM bean_transactions WHERE user_id = ?1",
                vec![account.0.into()],
                |row| row.get(0),
            )
            .await?;
        Ok(count.unwrap_or(0) as u64)
    }

    /// Check the cached balance against the sum of the log
    pub async fn verify_account(&self, account: AccountId) -> Result<bool> {
        let (balance, total) = self
            .db
            .fetch_one(
                "SELECT a.balance,
                        (SELECT COALESCE(SUM(t.delta), 0) FROM bean_transactions t WHERE t.user_id = a.user_id)
                 FROM bean_accounts a
                 WHERE a.user_id = ?1",
                vec![account.0.into()],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .await?
            .ok_or_else(|| ArcadeError::not_found("account", account))?;
        Ok(balance == total)
    }
}
