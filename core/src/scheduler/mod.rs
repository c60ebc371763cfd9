//! Coalescing Scheduler
//!
//! Collapses bursts of "something changed" signals into one delayed
//! downstream refresh (typically re-rendering a leaderboard).
//!
//! # Design
//!
//! - [`CoalescingScheduler::schedule_refresh`] is synchronous and cheap: it
//!   bumps a generation counter, aborts the pending timer and arms a new one
//!   `delay` from now. Only the last call in a burst fires.
//! - A timer that wakes claims the firing slot only while its generation is
//!   still the current one, so a timer that lost an abort race does nothing.
//! - [`CoalescingScheduler::refresh_now`] serializes executions behind an
//!   async mutex. Errors and panics from the action are logged and counted,
//!   never propagated and never retried.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::error::{ArcadeError, Result};
use crate::ledger::{LedgerListener, Transaction};

/// Default quiet period before a refresh fires
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(10);

/// The downstream work a scheduler coalesces
#[async_trait]
pub trait RefreshAction: Send + Sync {
    async fn refresh(&self) -> anyhow::Result<()>;
}

/// Counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Refreshes attempted (timer fires plus direct calls)
    pub executions: u64,
    /// Attempts that returned an error or panicked
    pub failures: u64,
    /// Number of `schedule_refresh` calls so far
    pub generation: u64,
}

struct Pending {
    generation: u64,
    task: JoinHandle<()>,
}

struct Inner {
    action: Arc<dyn RefreshAction>,
    delay: Duration,
    handle: Handle,
    generation: AtomicU64,
    pending: Mutex<Option<Pending>>,
    running: tokio::sync::Mutex<()>,
    executions: AtomicU64,
    failures: AtomicU64,
}

impl Inner {
    /// Take the firing slot if `generation` is still the armed one
    fn claim_fire(&self, generation: u64) -> bool {
        let mut pending = self.pending.lock();
        let current = pending.as_ref().map(|p| p.generation);
        if current == Some(generation) && self.generation.load(Ordering::SeqCst) == generation {
            // Detaches our own handle; the task is already running
            pending.take();
            true
        } else {
            false
        }
    }

    async fn refresh_now(&self) {
        let _running = self.running.lock().await;
        self.executions.fetch_add(1, Ordering::SeqCst);

        match AssertUnwindSafe(self.action.refresh()).catch_unwind().await {
            Ok(Ok(())) => debug!("Refresh completed"),
            Ok(Err(e)) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                error!("Refresh failed: {:#}", e);
            }
            Err(_) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                error!("Refresh panicked");
            }
        }
    }
}

/// Debounced, serialized driver of one [`RefreshAction`]. Cheap to clone.
#[derive(Clone)]
pub struct CoalescingScheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CoalescingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoalescingScheduler")
            .field("delay", &self.inner.delay)
            .field("stats", &self.stats())
            .finish()
    }
}

impl CoalescingScheduler {
    /// Create a scheduler bound to the current Tokio runtime
    pub fn new(action: Arc<dyn RefreshAction>, delay: Duration) -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| ArcadeError::Config {
            message: format!("scheduler needs a running Tokio runtime: {e}"),
        })?;
        Ok(Self::with_handle(action, delay, handle))
    }

    /// Create a scheduler that spawns its timers on `handle`, so
    /// `schedule_refresh` works from threads outside the runtime
    pub fn with_handle(action: Arc<dyn RefreshAction>, delay: Duration, handle: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                action,
                delay,
                handle,
                generation: AtomicU64::new(0),
                pending: Mutex::new(None),
                running: tokio::sync::Mutex::new(()),
                executions: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
        }
    }

    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    /// Request a refresh `delay` from now, superseding any pending request
    pub fn schedule_refresh(&self) {
        let deadline = Instant::now() + self.inner.delay;
        let mut pending = self.inner.pending.lock();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = pending.take() {
            previous.task.abort();
        }

        let inner = self.inner.clone();
        let task = self.inner.handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if inner.claim_fire(generation) {
                inner.refresh_now().await;
            }
        });
        *pending = Some(Pending { generation, task });
        debug!("Refresh scheduled (generation {})", generation);
    }

    /// Run the action immediately, waiting for any in-flight run first
    pub async fn refresh_now(&self) {
        self.inner.refresh_now().await;
    }

    /// Drop the pending timer without firing it. Returns true if one was armed.
    pub fn cancel_pending(&self) -> bool {
        match self.inner.pending.lock().take() {
            Some(previous) => {
                previous.task.abort();
                info!("Cancelled pending refresh (generation {})", previous.generation);
                true
            }
            None => false,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.inner.pending.lock().is_some()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            executions: self.inner.executions.load(Ordering::SeqCst),
            failures: self.inner.failures.load(Ordering::SeqCst),
            generation: self.inner.generation.load(Ordering::SeqCst),
        }
    }
}

impl LedgerListener for CoalescingScheduler {
    fn on_transaction(&self, _transaction: &Transaction, _new_balance: i64) {
        self.schedule_refresh();
    }
}
