//! Bean payout table.
//!
//! Games never hardcode amounts; they look them up by [`RewardKey`]. Some
//! entries are fixed payouts (`wordle.solve`), others are per-unit rates
//! (`unscramble.fail_per_revealed`) used through [`RewardsService::amount_for`].
//! Operators rebalance through the `[rewards]` config table:
//!
//! ```toml
//! [rewards]
//! "wordle.solve" = 30
//! "core.daily" = 50
//! ```

use std::collections::BTreeMap;

use crate::error::{ArcadeError, Result};

/// Well-known reward keys
pub struct RewardKey;

impl RewardKey {
    pub const WORDLE_SOLVE: &'static str = "wordle.solve";
    pub const WORDLE_FAIL_PER_GREEN: &'static str = "wordle.fail_per_green";
    pub const WORD_CHAIN_ROUND_PAYOUT: &'static str = "word_chain.round_payout";
    pub const UNSCRAMBLE_SOLVE: &'static str = "unscramble.solve";
    pub const UNSCRAMBLE_FAIL_PER_REVEALED: &'static str = "unscramble.fail_per_revealed";

    pub const CORE_DAILY: &'static str = "core.daily";
    pub const CORE_WORK: &'static str = "core.work";

    pub const GEO_LEARNING_CORRECT: &'static str = "geo_learning.correct";
    pub const GEO_LEARNING_COMPLETE: &'static str = "geo_learning.complete";
    pub const GEO_FLAGS_CORRECT: &'static str = "geo_flags.correct";
    pub const GEO_LANGUAGE_CORRECT: &'static str = "geo_language.correct";
}

/// Built-in payout table
pub fn default_rules() -> BTreeMap<String, i64> {
    [
        (RewardKey::WORDLE_SOLVE, 20),
        (RewardKey::WORDLE_FAIL_PER_GREEN, 2),
        (RewardKey::WORD_CHAIN_ROUND_PAYOUT, 1),
        (RewardKey::UNSCRAMBLE_SOLVE, 5),
        (RewardKey::UNSCRAMBLE_FAIL_PER_REVEALED, 2),
        (RewardKey::CORE_DAILY, 25),
        (RewardKey::CORE_WORK, 5),
        (RewardKey::GEO_LEARNING_CORRECT, 2),
        (RewardKey::GEO_LEARNING_COMPLETE, 10),
        (RewardKey::GEO_FLAGS_CORRECT, 3),
        (RewardKey::GEO_LANGUAGE_CORRECT, 4),
    ]
    .into_iter()
    .map(|(key, amount)| (key.to_string(), amount))
    .collect()
}

/// Check an override table: keys non-empty, amounts non-negative
pub fn validate_overrides(overrides: &BTreeMap<String, i64>) -> Result<()> {
    for (key, amount) in overrides {
        if key.trim().is_empty() {
            return Err(ArcadeError::Config {
                message: "rewards keys must not be empty".to_string(),
            });
        }
        if *amount < 0 {
            return Err(ArcadeError::Config {
                message: format!("rewards.\"{key}\" must not be negative, got {amount}"),
            });
        }
    }
    Ok(())
}

/// Source of truth for bean payouts. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardsService {
    rules: BTreeMap<String, i64>,
}

impl Default for RewardsService {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

impl RewardsService {
    /// Defaults merged with `overrides`; overrides may add new keys
    pub fn new(overrides: &BTreeMap<String, i64>) -> Self {
        Self::default().with_overrides(overrides)
    }

    pub fn with_overrides(mut self, overrides: &BTreeMap<String, i64>) -> Self {
        self.rules
            .extend(overrides.iter().map(|(k, v)| (k.clone(), *v)));
        self
    }

    /// Amount for `key`; an unknown key is an error so typos surface early
    pub fn amount(&self, key: &str) -> Result<i64> {
        self.rules
            .get(key)
            .copied()
            .ok_or_else(|| ArcadeError::not_found("reward key", key))
    }

    /// Per-unit rate times `units`
    pub fn amount_for(&self, key: &str, units: i64) -> Result<i64> {
        if units < 0 {
            return Err(ArcadeError::validation(format!(
                "reward units must not be negative, got {units}"
            )));
        }
        self.amount(key)?.checked_mul(units).ok_or_else(|| {
            ArcadeError::validation(format!("reward {key} x {units} overflows"))
        })
    }

    pub fn has(&self, key: &str) -> bool {
        self.rules.contains_key(key)
    }

    pub fn snapshot(&self) -> &BTreeMap<String, i64> {
        &self.rules
    }
}
