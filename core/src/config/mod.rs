//! Configuration management
//!
//! `ArcadeConfig` is read from a TOML file, falling back to defaults for
//! every missing section or key, then patched from the environment:
//!
//! - `ARCADE_DB_PATH` overrides `[database] path`
//! - `ARCADE_LOG` overrides `[logging] level`
//!
//! `[rewards]` maps quoted reward keys to bean amounts, overriding the
//! built-in payout table.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ArcadeError, Result};
use crate::rewards;

pub const ENV_DB_PATH: &str = "ARCADE_DB_PATH";
pub const ENV_LOG: &str = "ARCADE_LOG";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArcadeConfig {
    pub database: DatabaseConfig,
    pub leaderboard: LeaderboardConfig,
    pub logging: LoggingConfig,
    /// Payout overrides keyed by reward key
    pub rewards: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file; parent directories are created on connect
    pub path: PathBuf,
    /// How long a writer waits for the database lock
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/arcade.sqlite"),
            busy_timeout_ms: 5000,
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Where and how the single leaderboard message is published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderboardConfig {
    pub platform: String,
    pub channel_id: String,
    /// Distinguishes several boards in one channel
    pub board_key: String,
    /// Rows per board, clamped to 1..=50
    pub limit: usize,
    /// Quiet period before a refresh after the last bean movement
    pub debounce_secs: f64,
    /// Games counted by the today/week boards
    pub game_keys: Vec<String>,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            platform: "discord".to_string(),
            channel_id: String::new(),
            board_key: "english_dropdown_v1".to_string(),
            limit: 10,
            debounce_secs: 10.0,
            game_keys: vec![
                "wordle".to_string(),
                "word_chain".to_string(),
                "unscramble".to_string(),
            ],
        }
    }
}

impl LeaderboardConfig {
    /// Quiet period; out-of-range values fall back to the default.
    /// [`ArcadeConfig::validate`] rejects them up front.
    pub fn debounce(&self) -> Duration {
        Duration::try_from_secs_f64(self.debounce_secs)
            .unwrap_or(crate::scheduler::DEFAULT_DEBOUNCE)
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, 50)
    }

    /// A board can only be published with a target channel
    pub fn is_enabled(&self) -> bool {
        !self.channel_id.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `arcade_core=debug`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl ArcadeConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ArcadeError::Config {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ArcadeError::Config {
            message: e.to_string(),
        })
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ArcadeError::Config {
            message: e.to_string(),
        })?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("arcade").join("config.toml"))
    }

    /// Resolve the effective configuration.
    ///
    /// An explicit path must exist. Without one, the default location is used
    /// when present, else built-in defaults. Environment overrides and
    /// validation run last.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load(path)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup(ENV_DB_PATH).filter(|v| !v.trim().is_empty()) {
            self.database.path = PathBuf::from(path);
        }
        if let Some(level) = lookup(ENV_LOG).filter(|v| !v.trim().is_empty()) {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.busy_timeout_ms == 0 {
            return Err(ArcadeError::Config {
                message: "database.busy_timeout_ms must be greater than zero".to_string(),
            });
        }
        if self.database.path.as_os_str().is_empty() {
            return Err(ArcadeError::Config {
                message: "database.path must not be empty".to_string(),
            });
        }
        let debounce = self.leaderboard.debounce_secs;
        if debounce <= 0.0 || Duration::try_from_secs_f64(debounce).is_err() {
            return Err(ArcadeError::Config {
                message: format!(
                    "leaderboard.debounce_secs must be a positive duration, got {debounce}"
                ),
            });
        }
        rewards::validate_overrides(&self.rewards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = ArcadeConfig::from_toml(
            r#"
            [database]
            path = "/var/lib/arcade/beans.sqlite"

            [leaderboard]
            channel_id = "123"
            limit = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.database.path, PathBuf::from("/var/lib/arcade/beans.sqlite"));
        assert_eq!(config.database.busy_timeout(), Duration::from_secs(5));
        assert!(config.leaderboard.is_enabled());
        assert_eq!(config.leaderboard.effective_limit(), 50);
        assert_eq!(config.leaderboard.debounce(), Duration::from_secs(10));
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [(ENV_DB_PATH, "/tmp/x.sqlite"), (ENV_LOG, "debug")]
            .into_iter()
            .collect();
        let mut config = ArcadeConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.database.path, PathBuf::from("/tmp/x.sqlite"));
        assert_eq!(config.logging.level, "debug");

        // Blank values are ignored
        let mut config = ArcadeConfig::default();
        config.apply_env(|_| Some("  ".to_string()));
        assert_eq!(config, ArcadeConfig::default());
    }

    #[test]
    fn test_validation() {
        assert!(ArcadeConfig::default().validate().is_ok());

        let mut config = ArcadeConfig::default();
        config.leaderboard.debounce_secs = 0.0;
        assert!(matches!(config.validate(), Err(ArcadeError::Config { .. })));

        let mut config = ArcadeConfig::default();
        config.leaderboard.debounce_secs = 1e20;
        assert!(matches!(config.validate(), Err(ArcadeError::Config { .. })));
        assert_eq!(
            config.leaderboard.debounce(),
            crate::scheduler::DEFAULT_DEBOUNCE
        );

        let mut config = ArcadeConfig::default();
        config.leaderboard.debounce_secs = f64::NAN;
        assert!(matches!(config.validate(), Err(ArcadeError::Config { .. })));

        let mut config = ArcadeConfig::default();
        config.database.busy_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(ArcadeError::Config { .. })));

        assert!(matches!(
            ArcadeConfig::from_toml("[database]\nbusy_timeout_ms = \"soon\""),
            Err(ArcadeError::Config { .. })
        ));
    }

    #[test]
    fn test_rewards_table() {
        let config = ArcadeConfig::from_toml(
            r#"
            [rewards]
            "wordle.solve" = 30
            "trivia.correct" = 4
            "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.rewards.get("wordle.solve"), Some(&30));

        let rewards = crate::rewards::RewardsService::new(&config.rewards);
        assert_eq!(rewards.amount("wordle.solve").unwrap(), 30);
        assert_eq!(rewards.amount("core.daily").unwrap(), 25);

        let negative = ArcadeConfig::from_toml("[rewards]\n\"core.daily\" = -1").unwrap();
        assert!(matches!(negative.validate(), Err(ArcadeError::Config { .. })));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arcade").join("config.toml");

        let mut config = ArcadeConfig::default();
        config.leaderboard.channel_id = "42".to_string();
        config.rewards.insert("core.daily".to_string(), 40);
        config.save(&path).unwrap();

        assert_eq!(ArcadeConfig::load(&path).unwrap(), config);
        assert_eq!(ArcadeConfig::resolve(Some(&path)).unwrap().leaderboard.channel_id, "42");
        assert!(ArcadeConfig::resolve(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
