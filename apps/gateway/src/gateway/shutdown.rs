//! Graceful shutdown: drain local sessions, then correct the shared counter
//! for any that did not disconnect individually.
//!
//! The correction is a get-then-set and races with concurrent increments from
//! other processes. A few units of drift under heavy churn at shutdown time
//! are accepted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::store::CounterStore;

use super::events::CONNECTION_COUNT_KEY;
use super::tracker::{ConnectionTracker, LocalCounts};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    Draining,
    Closed,
}

/// What the reconciler did with the shared counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Every session disconnected on its own; nothing to correct.
    NotNeeded,
    Corrected { remaining: u64, before: i64, after: i64 },
    /// The store call failed or timed out. Not retried.
    Failed { remaining: u64 },
    /// Shutdown was already underway or finished.
    Skipped,
}

pub struct ShutdownReconciler {
    phase: Mutex<ShutdownPhase>,
    attempted: AtomicBool,
    tracker: Arc<ConnectionTracker>,
    store: Arc<dyn CounterStore>,
    drain: CancellationToken,
    grace: Duration,
    correction_timeout: Duration,
}

impl ShutdownReconciler {
    pub fn new(
        tracker: Arc<ConnectionTracker>,
        store: Arc<dyn CounterStore>,
        grace: Duration,
        correction_timeout: Duration,
    ) -> Self {
        Self {
            phase: Mutex::new(ShutdownPhase::Running),
            attempted: AtomicBool::new(false),
            tracker,
            store,
            drain: CancellationToken::new(),
            grace,
            correction_timeout,
        }
    }

    pub fn phase(&self) -> ShutdownPhase {
        *self.phase.lock()
    }

    pub fn is_running(&self) -> bool {
        self.phase() == ShutdownPhase::Running
    }

    /// Cancelled when draining begins. The transport stops accepting and
    /// closes every open session when it fires.
    pub fn drain_token(&self) -> CancellationToken {
        self.drain.clone()
    }

    /// `Running → Draining`. Returns the local session count observed at that
    /// instant, or `None` if shutdown had already started.
    pub fn begin_drain(&self) -> Option<u64> {
        {
            let mut phase = self.phase.lock();
            if *phase != ShutdownPhase::Running {
                return None;
            }
            *phase = ShutdownPhase::Draining;
        }

        let observed = self.tracker.local_session_count();
        tracing::info!(
            local_sessions = observed,
            grace_ms = self.grace.as_millis() as u64,
            "draining gateway sessions"
        );
        self.drain.cancel();
        Some(observed)
    }

    /// Wait until every local session is gone and its decrement has landed,
    /// or the grace delay elapses. Returns the sessions still live afterwards.
    pub async fn wait_for_drain(&self) -> u64 {
        let mut counts_rx = self.tracker.watch_local_counts();
        let drained = time::timeout(self.grace, counts_rx.wait_for(LocalCounts::is_settled))
            .await
            .is_ok();
        let remaining = self.tracker.local_session_count();
        if !drained {
            tracing::warn!(remaining, "grace delay elapsed with sessions still open");
        }
        remaining
    }

    /// `Draining → Closed`. Subtracts the sessions that could not be
    /// decremented individually, at most once per process lifetime.
    pub async fn reconcile(&self) -> Reconciliation {
        if self.phase() != ShutdownPhase::Draining || self.attempted.swap(true, Ordering::SeqCst) {
            return Reconciliation::Skipped;
        }

        let remaining = self.tracker.detach();
        self.settle_in_flight().await;
        let outcome = if remaining == 0 {
            tracing::info!("all sessions drained, no counter correction needed");
            Reconciliation::NotNeeded
        } else {
            match time::timeout(self.correction_timeout, self.subtract(remaining)).await {
                Ok(Ok((before, after))) => {
                    tracing::info!(remaining, before, after, "corrected shared connection counter");
                    self.tracker.announce(after).await;
                    Reconciliation::Corrected {
                        remaining,
                        before,
                        after,
                    }
                }
                Ok(Err(err)) => {
                    tracing::warn!(remaining, %err, "shared counter correction failed");
                    Reconciliation::Failed { remaining }
                }
                Err(_) => {
                    tracing::warn!(remaining, "shared counter correction timed out");
                    Reconciliation::Failed { remaining }
                }
            }
        };

        *self.phase.lock() = ShutdownPhase::Closed;
        outcome
    }

    /// Full shutdown sequence. A second call while draining or after closing
    /// returns `Skipped` without touching the counter.
    pub async fn run(&self) -> Reconciliation {
        let Some(observed) = self.begin_drain() else {
            tracing::warn!("shutdown already in progress");
            return Reconciliation::Skipped;
        };
        if observed > 0 {
            self.wait_for_drain().await;
        }
        self.reconcile().await
    }

    /// Detaching stops new updates; wait for the ones already started so the
    /// correction reads a counter they have landed in.
    async fn settle_in_flight(&self) {
        let mut counts_rx = self.tracker.watch_local_counts();
        let settled = time::timeout(
            self.correction_timeout,
            counts_rx.wait_for(|counts| counts.in_flight == 0),
        )
        .await
        .is_ok();
        if !settled {
            tracing::warn!(
                in_flight = self.tracker.local_counts().in_flight,
                "shared counter updates still pending at reconciliation"
            );
        }
    }

    async fn subtract(&self, remaining: u64) -> Result<(i64, i64), StoreError> {
        let before = self.store.get(CONNECTION_COUNT_KEY).await?.unwrap_or(0);
        let after = before.saturating_sub(remaining as i64).max(0);
        self.store.set(CONNECTION_COUNT_KEY, after).await?;
        Ok((before, after))
    }
}
