//! Key-Scoped Lock Manager
//!
//! Lazily-created async mutexes keyed by arbitrary hashable keys.
//!
//! # Design
//!
//! - The key → mutex map sits behind a `parking_lot::Mutex` held only for the
//!   lookup, never across an await
//! - Each key's mutex is a `tokio::sync::Mutex<()>`; waiters queue FIFO
//! - Entries live for the process lifetime (one per channel or player that
//!   ever played, which stays small)
//! - Locks are not reentrant: acquiring a key already held by the current task
//!   deadlocks. Distinct keys may nest.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;

use crate::session::SessionScope;

/// Lock identities used by the game host
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// Whole channel (one round per channel)
    Channel { platform: String, channel: String },
    /// One player inside a channel (per-player rounds)
    Player {
        platform: String,
        channel: String,
        player: String,
    },
    /// Exactly one session scope
    Scope(SessionScope),
}

impl LockKey {
    pub fn channel(platform: impl Into<String>, channel: impl Into<String>) -> Self {
        Self::Channel {
            platform: platform.into(),
            channel: channel.into(),
        }
    }

    pub fn player(
        platform: impl Into<String>,
        channel: impl Into<String>,
        player: impl Into<String>,
    ) -> Self {
        Self::Player {
            platform: platform.into(),
            channel: channel.into(),
            player: player.into(),
        }
    }
}

impl From<SessionScope> for LockKey {
    fn from(scope: SessionScope) -> Self {
        Self::Scope(scope)
    }
}

impl From<&SessionScope> for LockKey {
    fn from(scope: &SessionScope) -> Self {
        Self::Scope(scope.clone())
    }
}

/// Per-key mutual exclusion. Cheap to clone; clones share the lock table.
pub struct LockManager<K = LockKey> {
    locks: Arc<Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>>,
}

impl<K> Clone for LockManager<K> {
    fn clone(&self) -> Self {
        Self {
            locks: self.locks.clone(),
        }
    }
}

impl<K: Eq + Hash + Clone> Default for LockManager<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> LockManager<K> {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn mutex_for(&self, key: &K) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        if let Some(existing) = locks.get(key) {
            return existing.clone();
        }
        let created = Arc::new(tokio::sync::Mutex::new(()));
        locks.insert(key.clone(), created.clone());
        created
    }

    /// Acquire the key's lock and hold it until the guard drops
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        self.mutex_for(key).lock_owned().await
    }

    /// Run the future produced by `f` while holding the key's lock.
    ///
    /// The lock is released when the future completes or is dropped.
    pub async fn with_lock<F, Fut, T>(&self, key: &K, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.lock(key).await;
        f().await
    }

    /// Whether the key is currently held by someone
    pub fn is_locked(&self, key: &K) -> bool {
        self.locks
            .lock()
            .get(key)
            .map(|m| m.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of keys seen so far
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Minimum spacing between message edits, per key.
///
/// Double-checked: a lock-free peek at the last edit time rejects most calls
/// cheaply, and the authoritative re-check plus the edit itself run under the
/// key's lock so two racing callers cannot both edit.
pub struct EditThrottle<K = LockKey> {
    interval: Duration,
    last_edit: Arc<Mutex<HashMap<K, Instant>>>,
}

impl<K> Clone for EditThrottle<K> {
    fn clone(&self) -> Self {
        Self {
            interval: self.interval,
            last_edit: self.last_edit.clone(),
        }
    }
}

/// Default spacing between edits of one message
pub const DEFAULT_EDIT_INTERVAL: Duration = Duration::from_secs(1);

impl<K: Eq + Hash + Clone> EditThrottle<K> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_edit: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn is_due(&self, key: &K, now: Instant) -> bool {
        match self.last_edit.lock().get(key) {
            Some(last) => now.duration_since(*last) >= self.interval,
            None => true,
        }
    }

    /// Run `edit` unless the key was edited less than `interval` ago.
    ///
    /// Returns `None` when throttled. `force` skips both checks but still
    /// takes the lock.
    pub async fn run<F, Fut, T>(
        &self,
        locks: &LockManager<K>,
        key: &K,
        force: bool,
        edit: F,
    ) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !force && !self.is_due(key, Instant::now()) {
            return None;
        }

        let _guard = locks.lock(key).await;
        // Another caller may have edited while we waited for the lock
        if !force && !self.is_due(key, Instant::now()) {
            return None;
        }

        let value = edit().await;
        self.last_edit.lock().insert(key.clone(), Instant::now());
        Some(value)
    }

    /// Forget the last edit so the next call goes through
    pub fn reset(&self, key: &K) {
        self.last_edit.lock().remove(key);
    }
}
