//! Round hosting: the lock manager and the session store used together.
//!
//! Every read-modify-write of a round's state happens under the scope's lock,
//! and every start decides explicitly whether it supersedes a running round
//! ([`StartPolicy::HardReset`]) or joins it ([`StartPolicy::SoftCreate`]).

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::{ArcadeError, Result};
use crate::lock::{LockKey, LockManager};
use crate::session::{SessionId, SessionScope, SessionState, SessionStatus, SessionStore};

/// What `start` does when the scope already has an active round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPolicy {
    /// End the running round and start a fresh one (atomic)
    HardReset,
    /// Keep the running round; only create when none is active
    SoftCreate,
}

/// Result of [`RoundHost::start`]
#[derive(Debug)]
pub struct RoundStart<S> {
    pub session_id: SessionId,
    pub state: S,
    /// False when `SoftCreate` found a running round
    pub created: bool,
    /// Rounds ended by a hard reset
    pub ended: usize,
}

#[derive(Clone)]
pub struct RoundHost {
    sessions: SessionStore,
    locks: LockManager<LockKey>,
    ttl: Option<chrono::Duration>,
}

impl RoundHost {
    pub fn new(sessions: SessionStore, locks: LockManager<LockKey>) -> Self {
        Self {
            sessions,
            locks,
            ttl: None,
        }
    }

    /// Rounds expire `ttl` after their last update
    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn locks(&self) -> &LockManager<LockKey> {
        &self.locks
    }

    fn expiry(&self) -> Option<DateTime<Utc>> {
        self.ttl.map(|ttl| Utc::now() + ttl)
    }

    pub async fn start<S: SessionState>(
        &self,
        scope: &SessionScope,
        policy: StartPolicy,
        state: S,
    ) -> Result<RoundStart<S>> {
        scope.validate()?;
        let _guard = self.locks.lock(&LockKey::from(scope)).await;
        let id = SessionId::generate();
        let bytes = state.encode()?;

        match policy {
            StartPolicy::HardReset => {
                let ended = self
                    .sessions
                    .replace_active(&id, scope, bytes, self.expiry())
                    .await?;
                info!("Started round {} in {} (ended {})", id, scope, ended);
                Ok(RoundStart {
                    session_id: id,
                    state,
                    created: true,
                    ended,
                })
            }
            StartPolicy::SoftCreate => {
                let (session, created) = self
                    .sessions
                    .get_or_create_active(&id, scope, bytes, self.expiry())
                    .await?;
                if created {
                    info!("Started round {} in {}", id, scope);
                    return Ok(RoundStart {
                        session_id: session.id,
                        state,
                        created,
                        ended: 0,
                    });
                }
                Ok(RoundStart {
                    state: session.decode()?,
                    session_id: session.id,
                    created,
                    ended: 0,
                })
            }
        }
    }

    /// The running round's id and typed state
    pub async fn current<S: SessionState>(
        &self,
        scope: &SessionScope,
    ) -> Result<Option<(SessionId, S)>> {
        match self.sessions.get_active(scope).await? {
            Some(session) => {
                let state = session.decode()?;
                Ok(Some((session.id, state)))
            }
            None => Ok(None),
        }
    }

    /// Lock the scope, load its state, apply `f`, persist, unlock.
    ///
    /// `f` returning an error leaves the stored state untouched.
    pub async fn update<S, F, T>(&self, scope: &SessionScope, f: F) -> Result<T>
    where
        S: SessionState,
        F: FnOnce(&mut S) -> Result<T>,
    {
        scope.validate()?;
        let _guard = self.locks.lock(&LockKey::from(scope)).await;

        let session = self
            .sessions
            .get_active(scope)
            .await?
            .ok_or_else(|| ArcadeError::not_found("active round", scope))?;
        let mut state: S = session.decode()?;
        let value = f(&mut state)?;

        let expires_at = self.expiry().or(session.expires_at);
        self.sessions
            .upsert_active(&session.id, scope, state.encode()?, expires_at)
            .await?;
        Ok(value)
    }

    /// End the scope's running round(s). Returns how many were ended.
    pub async fn finish(&self, scope: &SessionScope) -> Result<usize> {
        scope.validate()?;
        let _guard = self.locks.lock(&LockKey::from(scope)).await;
        self.sessions
            .end_active_in_scope(scope, SessionStatus::Ended)
            .await
    }
}
