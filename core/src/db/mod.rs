//! Durable Store
//!
//! Small async wrapper around one process-wide SQLite connection.
//!
//! # Design
//!
//! - One connection per process, shared behind a mutex
//! - Every call runs on the blocking pool via `spawn_blocking`
//! - WAL journal, foreign keys on, bounded busy wait for contending writers
//! - [`Database::transaction`] is the atomic-unit primitive: the closure's
//!   statements commit together or are rolled back on any error, including
//!   early returns through `?`

pub mod migrations;

use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ArcadeError, Result};

pub use migrations::run_migrations;

/// Default wait for a writer blocked by another writer
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

const MEMORY_PATH: &str = ":memory:";

struct DatabaseInner {
    path: PathBuf,
    busy_timeout: Duration,
    conn: Mutex<Option<Connection>>,
}

impl DatabaseInner {
    fn classify(&self, err: ArcadeError) -> ArcadeError {
        match err {
            ArcadeError::Store(e) => ArcadeError::from_store(e, self.busy_timeout),
            other => other,
        }
    }
}

/// Handle to the shared SQLite connection. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.inner.path)
            .field("busy_timeout", &self.inner.busy_timeout)
            .finish()
    }
}

impl Database {
    /// Create an unconnected handle for a database file
    pub fn new(path: impl AsRef<Path>, busy_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                path: path.as_ref().to_path_buf(),
                busy_timeout,
                conn: Mutex::new(None),
            }),
        }
    }

    /// Connect to a file database and bring its schema up to date
    pub async fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let db = Self::new(path, busy_timeout);
        db.connect().await?;
        run_migrations(&db).await?;
        Ok(db)
    }

    /// Migrated in-memory database (tests, dry runs)
    pub async fn open_in_memory() -> Result<Self> {
        Self::open(MEMORY_PATH, DEFAULT_BUSY_TIMEOUT).await
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn busy_timeout(&self) -> Duration {
        self.inner.busy_timeout
    }

    pub fn is_connected(&self) -> bool {
        self.inner.conn.lock().is_some()
    }

    /// Open the connection. No-op when already connected.
    pub async fn connect(&self) -> Result<()> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut slot = inner.conn.lock();
            if slot.is_some() {
                return Ok(());
            }

            info!("Connecting to SQLite: {}", inner.path.display());
            if let Some(parent) = inner.path.parent() {
                if !parent.as_os_str().is_empty() && inner.path.as_os_str() != MEMORY_PATH {
                    std::fs::create_dir_all(parent)?;
                }
            }

            let conn = if inner.path.as_os_str() == MEMORY_PATH {
                Connection::open_in_memory()?
            } else {
                Connection::open(&inner.path)?
            };
            conn.execute_batch(
                "PRAGMA foreign_keys = ON;
                 PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;",
            )?;
            conn.busy_timeout(inner.busy_timeout)?;

            *slot = Some(conn);
            Ok(())
        })
        .await?
    }

    /// Close the connection. Pending work already holding it finishes first.
    pub async fn close(&self) -> Result<()> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let Some(conn) = inner.conn.lock().take() else {
                return Ok(());
            };
            info!("Closing SQLite connection");
            conn.close().map_err(|(_, e)| ArcadeError::Store(e))
        })
        .await?
    }

    /// Run `f` against the connection on the blocking pool
    pub async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || -> Result<T> {
            let mut slot = inner.conn.lock();
            let conn = slot.as_mut().ok_or(ArcadeError::StoreClosed)?;
            f(conn).map_err(|e| inner.classify(e))
        })
        .await?
    }

    /// Atomic unit: every statement issued through `tx` commits together,
    /// or none does.
    ///
    /// The transaction is opened `IMMEDIATE`, so concurrent writers queue on
    /// the database write lock instead of failing at commit time.
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            // Dropping `tx` on the error path rolls back.
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await
    }

    /// Execute one statement outside any explicit transaction
    pub async fn execute(&self, sql: impl Into<String>, params: Vec<Value>) -> Result<usize> {
        let sql = sql.into();
        self.call(move |conn| {
            debug!(sql = %sql, "execute");
            Ok(conn.execute(&sql, params_from_iter(params))?)
        })
        .await
    }

    pub async fn fetch_one<T, F>(
        &self,
        sql: impl Into<String>,
        params: Vec<Value>,
        map: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sql = sql.into();
        self.call(move |conn| {
            Ok(conn
                .query_row(&sql, params_from_iter(params), map)
                .optional()?)
        })
        .await
    }

    pub async fn fetch_all<T, F>(
        &self,
        sql: impl Into<String>,
        params: Vec<Value>,
        map: F,
    ) -> Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sql = sql.into();
        self.call(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(params), map)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }
}
