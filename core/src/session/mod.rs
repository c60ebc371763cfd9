//! Session Store
//!
//! Durable round state keyed by a composite scope
//! `(platform, location, thread?, game_key)`.
//!
//! # Lifecycle
//!
//! `ACTIVE` (first upsert) → `ACTIVE` (upserts on the same id replace the
//! state in place) → `ENDED` / `EXPIRED` (terminal). Nothing leaves a
//! terminal status: re-activating or re-ending an id is a `Conflict`.
//!
//! The store never looks inside `state`; it is an opaque byte payload owned
//! by the game that wrote it (see [`SessionState`]). Mutations are expected
//! to happen under the lock manager's key for the scope.

mod state;

pub use state::SessionState;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, info};

use crate::db::Database;
use crate::error::{ArcadeError, Result};

/// Caller-assigned session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Fresh random id for a new round
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Where a round lives: one game in one channel (optionally one thread)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionScope {
    pub platform: String,
    pub location: String,
    #[serde(default)]
    pub thread: Option<String>,
    pub game_key: String,
}

impl SessionScope {
    pub fn new(
        platform: impl Into<String>,
        location: impl Into<String>,
        game_key: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            location: location.into(),
            thread: None,
            game_key: game_key.into(),
        }
    }

    pub fn in_thread(mut self, thread: impl Into<String>) -> Self {
        self.thread = Some(thread.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("platform", self.platform.as_str()),
            ("location", self.location.as_str()),
            ("game_key", self.game_key.as_str()),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(ArcadeError::validation(format!(
                    "session scope field '{name}' must not be empty"
                )));
            }
        }
        if matches!(&self.thread, Some(t) if t.trim().is_empty()) {
            return Err(ArcadeError::validation(
                "session scope thread must be absent or non-empty",
            ));
        }
        Ok(())
    }
}

impl std::fmt::Display for SessionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.thread {
            Some(thread) => write!(
                f,
                "{}:{}/{}:{}",
                self.platform, self.location, thread, self.game_key
            ),
            None => write!(f, "{}:{}:{}", self.platform, self.location, self.game_key),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
            SessionStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = ArcadeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(SessionStatus::Active),
            "ended" => Ok(SessionStatus::Ended),
            "expired" => Ok(SessionStatus::Expired),
            other => Err(ArcadeError::validation(format!(
                "unknown session status: {other}"
            ))),
        }
    }
}

impl ToSql for SessionStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for SessionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: ArcadeError| FromSqlError::Other(Box::new(e)))
    }
}

/// One persisted round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub scope: SessionScope,
    pub status: SessionStatus,
    /// Opaque payload; decode with [`Session::decode`]
    pub state: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Decode the payload into the game's own state type
    pub fn decode<S: SessionState>(&self) -> Result<S> {
        S::decode(&self.state)
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: SessionId(row.get(0)?),
            scope: SessionScope {
                platform: row.get(1)?,
                location: row.get(2)?,
                thread: row.get(3)?,
                game_key: row.get(4)?,
            },
            status: row.get(5)?,
            state: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            expires_at: row.get(9)?,
        })
    }
}

const SESSION_COLUMNS: &str = "id, platform, location_id, thread_id, game_key, status, state, \
                               created_at, updated_at, expires_at";

const SCOPE_FILTER: &str = "platform = ?1 AND location_id = ?2 AND thread_id IS ?3 AND game_key = ?4";

fn validate_id(id: &SessionId) -> Result<()> {
    if id.0.trim().is_empty() {
        return Err(ArcadeError::validation("session id must not be empty"));
    }
    Ok(())
}

fn find_by_id(conn: &Connection, id: &SessionId) -> Result<Option<Session>> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM game_sessions WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id.0], Session::from_row)
        .optional()?)
}

fn find_active(conn: &Connection, scope: &SessionScope) -> Result<Option<Session>> {
    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM game_sessions
         WHERE {SCOPE_FILTER} AND status = 'active'
         ORDER BY updated_at DESC
         LIMIT 1"
    );
    Ok(conn
        .query_row(
            &sql,
            params![scope.platform, scope.location, scope.thread, scope.game_key],
            Session::from_row,
        )
        .optional()?)
}

fn end_in_scope(
    conn: &Connection,
    scope: &SessionScope,
    status: SessionStatus,
    now: DateTime<Utc>,
) -> Result<usize> {
    let sql = format!(
        "UPDATE game_sessions
         SET status = ?5, updated_at = ?6
         WHERE {SCOPE_FILTER} AND status = 'active'"
    );
    Ok(conn.execute(
        &sql,
        params![
            scope.platform,
            scope.location,
            scope.thread,
            scope.game_key,
            status,
            now
        ],
    )?)
}

fn insert_active(
    conn: &Connection,
    id: &SessionId,
    scope: &SessionScope,
    state: &[u8],
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Session> {
    if find_by_id(conn, id)?.is_some() {
        return Err(ArcadeError::conflict(format!(
            "session {id} already exists"
        )));
    }
    conn.execute(
        "INSERT INTO game_sessions
            (id, platform, location_id, thread_id, game_key, status, state, created_at, updated_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6, ?7, ?7, ?8)",
        params![
            id.0,
            scope.platform,
            scope.location,
            scope.thread,
            scope.game_key,
            state,
            now,
            expires_at
        ],
    )?;
    Ok(Session {
        id: id.clone(),
        scope: scope.clone(),
        status: SessionStatus::Active,
        state: state.to_vec(),
        created_at: now,
        updated_at: now,
        expires_at,
    })
}

fn require_terminal(status: SessionStatus) -> Result<()> {
    if !status.is_terminal() {
        return Err(ArcadeError::validation(
            "sessions can only be ended with a terminal status",
        ));
    }
    Ok(())
}

/// Durable session CRUD. Cheap to clone.
#[derive(Clone, Debug)]
pub struct SessionStore {
    db: Database,
}

impl SessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The active session for `scope`, if any
    pub async fn get_active(&self, scope: &SessionScope) -> Result<Option<Session>> {
        scope.validate()?;
        let scope = scope.clone();
        self.db.call(move |conn| find_active(conn, &scope)).await
    }

    /// Strict fetch by id, any status
    pub async fn get(&self, id: &SessionId) -> Result<Session> {
        let id = id.clone();
        self.db
            .call(move |conn| {
                find_by_id(conn, &id)?.ok_or_else(|| ArcadeError::not_found("session", &id))
            })
            .await
    }

    /// Insert an active session, or replace the state of the active session
    /// with this id. Safe to retry with the same id.
    pub async fn upsert_active(
        &self,
        id: &SessionId,
        scope: &SessionScope,
        state: Vec<u8>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        validate_id(id)?;
        scope.validate()?;
        let id = id.clone();
        let scope = scope.clone();

        self.db
            .call(move |conn| {
                let now = Utc::now();
                let changed = conn.execute(
                    "INSERT INTO game_sessions
                        (id, platform, location_id, thread_id, game_key, status, state, created_at, updated_at, expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6, ?7, ?7, ?8)
                     ON CONFLICT(id) DO UPDATE SET
                        status = 'active',
                        state = excluded.state,
                        updated_at = excluded.updated_at,
                        expires_at = excluded.expires_at
                     WHERE game_sessions.status = 'active'
                       AND game_sessions.platform = excluded.platform
                       AND game_sessions.location_id = excluded.location_id
                       AND game_sessions.thread_id IS excluded.thread_id
                       AND game_sessions.game_key = excluded.game_key",
                    params![
                        id.0,
                        scope.platform,
                        scope.location,
                        scope.thread,
                        scope.game_key,
                        state,
                        now,
                        expires_at
                    ],
                )?;
                if changed > 0 {
                    debug!("Upserted session {} in {}", id, scope);
                    return Ok(());
                }

                // The id exists but the guarded update refused it
                match find_by_id(conn, &id)? {
                    Some(existing) if existing.status.is_terminal() => {
                        Err(ArcadeError::conflict(format!(
                            "session {id} is already {}",
                            existing.status
                        )))
                    }
                    Some(existing) => Err(ArcadeError::conflict(format!(
                        "session {id} belongs to {}, not {}",
                        existing.scope, scope
                    ))),
                    None => Err(ArcadeError::conflict(format!(
                        "session {id} vanished during upsert"
                    ))),
                }
            })
            .await
    }

    /// Mark exactly one active session as ended (or expired)
    pub async fn end(&self, id: &SessionId, status: SessionStatus) -> Result<()> {
        require_terminal(status)?;
        let id = id.clone();
        self.db
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE game_sessions
                     SET status = ?1, updated_at = ?2
                     WHERE id = ?3 AND status = 'active'",
                    params![status, Utc::now(), id.0],
                )?;
                if changed == 1 {
                    debug!("Session {} -> {}", id, status);
                    return Ok(());
                }
                match find_by_id(conn, &id)? {
                    None => Err(ArcadeError::not_found("session", &id)),
                    Some(existing) => Err(ArcadeError::conflict(format!(
                        "session {id} is already {}",
                        existing.status
                    ))),
                }
            })
            .await
    }

    /// End every active session in `scope`; returns how many were ended
    pub async fn end_active_in_scope(
        &self,
        scope: &SessionScope,
        status: SessionStatus,
    ) -> Result<usize> {
        require_terminal(status)?;
        scope.validate()?;
        let scope = scope.clone();
        self.db
            .transaction(move |tx| end_in_scope(tx, &scope, status, Utc::now()))
            .await
    }

    /// Return the scope's active session, creating one with `state` if none
    /// exists. The boolean is true when this call created it.
    pub async fn get_or_create_active(
        &self,
        id: &SessionId,
        scope: &SessionScope,
        state: Vec<u8>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(Session, bool)> {
        validate_id(id)?;
        scope.validate()?;
        let id = id.clone();
        let scope = scope.clone();
        self.db
            .transaction(move |tx| {
                if let Some(existing) = find_active(tx, &scope)? {
                    return Ok((existing, false));
                }
                let created = insert_active(tx, &id, &scope, &state, expires_at, Utc::now())?;
                Ok((created, true))
            })
            .await
    }

    /// Hard reset: end every active session in `scope` and create `id` as the
    /// new active one, all in one atomic unit. Returns how many were ended.
    pub async fn replace_active(
        &self,
        id: &SessionId,
        scope: &SessionScope,
        state: Vec<u8>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        validate_id(id)?;
        scope.validate()?;
        let id = id.clone();
        let scope = scope.clone();
        let ended = self
            .db
            .transaction(move |tx| {
                let now = Utc::now();
                let ended = end_in_scope(tx, &scope, SessionStatus::Ended, now)?;
                insert_active(tx, &id, &scope, &state, expires_at, now)?;
                Ok(ended)
            })
            .await?;
        if ended > 0 {
            info!("Hard reset ended {} active session(s)", ended);
        }
        Ok(ended)
    }

    /// Expire active sessions whose deadline is at or before `now`
    pub async fn end_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired = self
            .db
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE game_sessions
                     SET status = 'expired', updated_at = ?1
                     WHERE status = 'active'
                       AND expires_at IS NOT NULL
                       AND expires_at <= ?1",
                    params![now],
                )?)
            })
            .await?;
        if expired > 0 {
            info!("Expired {} stale session(s)", expired);
        }
        Ok(expired)
    }

    /// Active sessions, most recently touched first
    pub async fn list_active(&self, limit: usize) -> Result<Vec<Session>> {
        let limit = limit.clamp(1, 500) as i64;
        self.db
            .fetch_all(
                format!(
                    "SELECT {SESSION_COLUMNS} FROM game_sessions
                     WHERE status = 'active'
                     ORDER BY updated_at DESC
                     LIMIT ?1"
                ),
                vec![limit.into()],
                Session::from_row,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn store() -> SessionStore {
        SessionStore::new(Database::open_in_memory().await.unwrap())
    }

    fn scope() -> SessionScope {
        SessionScope::new("discord", "1001", "wordle")
    }

    async fn row_count(store: &SessionStore) -> i64 {
        store
            .db
            .fetch_one("SELECT COUNT(*) FROM game_sessions", vec![], |row| row.get(0))
            .await
            .unwrap()
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_upsert_twice_keeps_one_row_with_latest_state() {
        let store = store().await;
        let id = SessionId::from("round-1");

        store
            .upsert_active(&id, &scope(), b"first".to_vec(), None)
            .await
            .unwrap();
        let first = store.get(&id).await.unwrap();

        let deadline = Utc::now() + Duration::minutes(5);
        store
            .upsert_active(&id, &scope(), b"second".to_vec(), Some(deadline))
            .await
            .unwrap();
        let second = store.get(&id).await.unwrap();

        assert_eq!(row_count(&store).await, 1);
        assert_eq!(second.state, b"second".to_vec());
        assert_eq!(second.status, SessionStatus::Active);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert!(second.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_thread_matching_is_tri_state() {
        let store = store().await;
        let channel = scope();
        let thread_a = scope().in_thread("t-a");
        let thread_b = scope().in_thread("t-b");

        store
            .upsert_active(&"in-channel".into(), &channel, b"c".to_vec(), None)
            .await
            .unwrap();
        store
            .upsert_active(&"in-thread".into(), &thread_a, b"a".to_vec(), None)
            .await
            .unwrap();

        let found = store.get_active(&channel).await.unwrap().unwrap();
        assert_eq!(found.id.as_str(), "in-channel");
        let found = store.get_active(&thread_a).await.unwrap().unwrap();
        assert_eq!(found.id.as_str(), "in-thread");
        assert!(store.get_active(&thread_b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_end_active_in_scope_without_match_is_noop() {
        let store = store().await;
        let other = SessionScope::new("discord", "2002", "wordle");
        store
            .upsert_active(&"other".into(), &other, b"x".to_vec(), None)
            .await
            .unwrap();
        let before = store.get(&"other".into()).await.unwrap();

        let ended = store
            .end_active_in_scope(&scope(), SessionStatus::Ended)
            .await
            .unwrap();
        assert_eq!(ended, 0);

        let after = store.get(&"other".into()).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_end_active_in_scope_counts_rows() {
        let store = store().await;
        // Two actives in one scope can only come from callers skipping
        // end-then-create; the bulk end still sweeps both.
        store
            .upsert_active(&"a".into(), &scope(), b"1".to_vec(), None)
            .await
            .unwrap();
        store
            .upsert_active(&"b".into(), &scope(), b"2".to_vec(), None)
            .await
            .unwrap();

        let ended = store
            .end_active_in_scope(&scope(), SessionStatus::Ended)
            .await
            .unwrap();
        assert_eq!(ended, 2);
        assert!(store.get_active(&scope()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_terminal_status_is_final() {
        let store = store().await;
        let id = SessionId::from("round-1");
        store
            .upsert_active(&id, &scope(), b"s".to_vec(), None)
            .await
            .unwrap();
        store.end(&id, SessionStatus::Ended).await.unwrap();

        let err = store.end(&id, SessionStatus::Ended).await.unwrap_err();
        assert!(matches!(err, ArcadeError::Conflict { .. }));

        let err = store
            .upsert_active(&id, &scope(), b"again".to_vec(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ArcadeError::Conflict { .. }));
        assert_eq!(store.get(&id).await.unwrap().state, b"s".to_vec());

        let err = store.end(&id, SessionStatus::Active).await.unwrap_err();
        assert!(matches!(err, ArcadeError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_end_unknown_session_is_not_found() {
        let store = store().await;
        let err = store
            .end(&"ghost".into(), SessionStatus::Ended)
            .await
            .unwrap_err();
        assert!(matches!(err, ArcadeError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_upsert_rejects_scope_change() {
        let store = store().await;
        let id = SessionId::from("round-1");
        store
            .upsert_active(&id, &scope(), b"s".to_vec(), None)
            .await
            .unwrap();
        let moved = SessionScope::new("discord", "9999", "wordle");
        let err = store
            .upsert_active(&id, &moved, b"s".to_vec(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ArcadeError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_get_or_create_active_reuses_existing() {
        let store = store().await;
        let (created, fresh) = store
            .get_or_create_active(&"first".into(), &scope(), b"init".to_vec(), None)
            .await
            .unwrap();
        assert!(fresh);
        assert_eq!(created.state, b"init".to_vec());

        let (existing, fresh) = store
            .get_or_create_active(&"second".into(), &scope(), b"other".to_vec(), None)
            .await
            .unwrap();
        assert!(!fresh);
        assert_eq!(existing.id.as_str(), "first");
        assert_eq!(row_count(&store).await, 1);
    }

    #[tokio::test]
    async fn test_replace_active_is_atomic() {
        let store = store().await;
        store
            .upsert_active(&"old".into(), &scope(), b"old".to_vec(), None)
            .await
            .unwrap();

        let ended = store
            .replace_active(&"new".into(), &scope(), b"new".to_vec(), None)
            .await
            .unwrap();
        assert_eq!(ended, 1);
        assert_eq!(
            store.get_active(&scope()).await.unwrap().unwrap().id.as_str(),
            "new"
        );
        assert_eq!(
            store.get(&"old".into()).await.unwrap().status,
            SessionStatus::Ended
        );

        // Reusing an existing id fails and the end-all is rolled back
        let err = store
            .replace_active(&"old".into(), &scope(), b"dup".to_vec(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ArcadeError::Conflict { .. }));
        let still = store.get_active(&scope()).await.unwrap().unwrap();
        assert_eq!(still.id.as_str(), "new");
    }

    #[tokio::test]
    async fn test_end_expired_sweeps_only_past_deadlines() {
        let store = store().await;
        let now = Utc::now();
        let late = SessionScope::new("discord", "1", "quiz");
        let fresh = SessionScope::new("discord", "2", "quiz");
        let forever = SessionScope::new("discord", "3", "quiz");

        store
            .upsert_active(&"late".into(), &late, vec![], Some(now - Duration::seconds(30)))
            .await
            .unwrap();
        store
            .upsert_active(&"fresh".into(), &fresh, vec![], Some(now + Duration::minutes(30)))
            .await
            .unwrap();
        store
            .upsert_active(&"forever".into(), &forever, vec![], None)
            .await
            .unwrap();

        assert_eq!(store.end_expired(now).await.unwrap(), 1);
        assert_eq!(
            store.get(&"late".into()).await.unwrap().status,
            SessionStatus::Expired
        );
        assert_eq!(store.list_active(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_scope_validation() {
        let store = store().await;
        let bad = SessionScope::new("discord", " ", "wordle");
        assert!(matches!(
            store.get_active(&bad).await,
            Err(ArcadeError::Validation { .. })
        ));
        let err = store
            .upsert_active(&"".into(), &scope(), vec![], None)
            .await
            .unwrap_err();
        assert!(matches!(err, ArcadeError::Validation { .. }));
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("ended".parse::<SessionStatus>().unwrap(), SessionStatus::Ended);
        assert_eq!(" Active ".parse::<SessionStatus>().unwrap(), SessionStatus::Active);
        assert!("paused".parse::<SessionStatus>().is_err());
        assert!(SessionStatus::Expired.is_terminal());
    }
}
