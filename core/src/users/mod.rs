//! Platform identity → internal account mapping.
//!
//! A user is created together with a zero bean account, so every known user
//! always has a ledger row.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::Database;
use crate::error::{ArcadeError, Result};
use crate::ledger::AccountId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: AccountId,
    pub platform: String,
    pub platform_user_id: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: AccountId(row.get(0)?),
            platform: row.get(1)?,
            platform_user_id: row.get(2)?,
            display_name: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    /// Display name, or the platform id when none is known
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .unwrap_or(self.platform_user_id.as_str())
    }
}

const USER_COLUMNS: &str = "id, platform, platform_user_id, display_name, created_at";

fn find_by_platform_id(
    conn: &Connection,
    platform: &str,
    platform_user_id: &str,
) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE platform = ?1 AND platform_user_id = ?2"),
        params![platform, platform_user_id],
        User::from_row,
    )
    .optional()
}

#[derive(Clone, Debug)]
pub struct UsersRepository {
    db: Database,
}

impl UsersRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Strict fetch by internal id
    pub async fn get(&self, id: AccountId) -> Result<User> {
        self.db
            .fetch_one(
                format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                vec![id.0.into()],
                User::from_row,
            )
            .await?
            .ok_or_else(|| ArcadeError::not_found("user", id))
    }

    pub async fn find(&self, platform: &str, platform_user_id: &str) -> Result<Option<User>> {
        let platform = platform.to_string();
        let platform_user_id = platform_user_id.to_string();
        self.db
            .call(move |conn| Ok(find_by_platform_id(conn, &platform, &platform_user_id)?))
            .await
    }

    /// Resolve a platform identity, creating the user and its zero account on
    /// first sight. A changed, non-empty display name is stored.
    pub async fn get_or_create(
        &self,
        platform: &str,
        platform_user_id: &str,
        display_name: Option<&str>,
    ) -> Result<User> {
        if platform.trim().is_empty() || platform_user_id.trim().is_empty() {
            return Err(ArcadeError::validation(
                "platform and platform user id must not be empty",
            ));
        }
        let platform = platform.to_string();
        let platform_user_id = platform_user_id.to_string();
        let display_name = display_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        let (user, created) = self
            .db
            .transaction(move |tx| {
                let now = Utc::now();
                if let Some(mut existing) = find_by_platform_id(tx, &platform, &platform_user_id)? {
                    if display_name.is_some() && display_name != existing.display_name {
                        tx.execute(
                            "UPDATE users SET display_name = ?1, updated_at = ?2 WHERE id = ?3",
                            params![display_name, now, existing.id.0],
                        )?;
                        existing.display_name = display_name;
                    }
                    return Ok((existing, false));
                }

                tx.execute(
                    "INSERT INTO users (platform, platform_user_id, display_name, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    params![platform, platform_user_id, display_name, now],
                )?;
                let id = tx.last_insert_rowid();
                tx.execute(
                    "INSERT OR IGNORE INTO bean_accounts (user_id, balance, created_at, updated_at)
                     VALUES (?1, 0, ?2, ?2)",
                    params![id, now],
                )?;

                Ok((
                    User {
                        id: AccountId(id),
                        platform,
                        platform_user_id,
                        display_name,
                        created_at: now,
                    },
                    true,
                ))
            })
            .await?;

        if created {
            info!(
                "Created new {} user id={} platform_id={}",
                user.platform, user.id, user.platform_user_id
            );
        }
        Ok(user)
    }

    pub async fn update_display_name(&self, id: AccountId, display_name: &str) -> Result<()> {
        let display_name = display_name.to_string();
        let changed = self
            .db
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE users SET display_name = ?1, updated_at = ?2 WHERE id = ?3",
                    params![display_name, Utc::now(), id.0],
                )?)
            })
            .await?;
        if changed == 0 {
            return Err(ArcadeError::not_found("user", id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;

    #[tokio::test]
    async fn test_get_or_create_is_stable() {
        let db = Database::open_in_memory().await.unwrap();
        let users = UsersRepository::new(db.clone());

        let first = users.get_or_create("discord", "1001", Some("ana")).await.unwrap();
        let again = users.get_or_create("discord", "1001", None).await.unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(again.display_name.as_deref(), Some("ana"));

        // Same platform id on another platform is another user
        let other = users.get_or_create("telegram", "1001", None).await.unwrap();
        assert_ne!(other.id, first.id);
        assert_eq!(other.label(), "1001");

        // The zero account exists right away
        let account = Ledger::new(db).account(first.id).await.unwrap();
        assert_eq!(account.balance, 0);
    }

    #[tokio::test]
    async fn test_display_name_refresh() {
        let db = Database::open_in_memory().await.unwrap();
        let users = UsersRepository::new(db);

        let user = users.get_or_create("discord", "7", Some("old")).await.unwrap();
        let renamed = users.get_or_create("discord", "7", Some("new")).await.unwrap();
        assert_eq!(renamed.display_name.as_deref(), Some("new"));
        assert_eq!(users.get(user.id).await.unwrap().label(), "new");

        users.update_display_name(user.id, "newer").await.unwrap();
        assert_eq!(
            users.find("discord", "7").await.unwrap().unwrap().label(),
            "newer"
        );
        assert!(matches!(
            users.update_display_name(AccountId(999), "x").await,
            Err(ArcadeError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejects_empty_identity() {
        let db = Database::open_in_memory().await.unwrap();
        let users = UsersRepository::new(db);
        assert!(matches!(
            users.get_or_create("discord", " ", None).await,
            Err(ArcadeError::Validation { .. })
        ));
    }
}
