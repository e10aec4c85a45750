//! Refresh Coordinator: single-flight token refresh with fan-out.
//!
//! DESIGN
//! ======
//! Two states: `Idle` and `Refreshing { waiters }`. The first caller to
//! observe a rejected token starts the refresh; every caller, the starter
//! included, is queued as a waiter and receives the same outcome, success
//! or failure.
//!
//! The refresh runs on its own task, detached from the caller that started
//! it. Dropping any caller's future (a timeout, a closed screen) never
//! aborts the refresh request, so a pair the backend has already issued is
//! always persisted and delivered to the remaining waiters.
//!
//! The state sits behind a `std::sync::Mutex` that is only held for
//! synchronous check-and-set, never across an await. Settling swaps the
//! state back to `Idle` and takes the queue in the same critical section,
//! so a queue is drained exactly once and a caller arriving afterwards
//! starts a fresh episode instead of joining a finished one.
//!
//! TRADE-OFFS
//! ==========
//! Only a refresh task that panics or is torn down with the runtime settles
//! with [`RefreshError::Abandoned`]. A caller that gives up early still
//! spends the refresh it started.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

// =============================================================================
// ERROR
// =============================================================================

/// Why a refresh episode failed. `Clone` so one failure can reject every
/// queued request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("no refresh token available")]
    MissingRefreshToken,

    #[error("refresh rejected: status {status}")]
    Rejected { status: u16, body: String },

    #[error("refresh request failed: {0}")]
    Transport(String),

    #[error("refresh request timed out")]
    Timeout,

    #[error("refresh response parse failed: {0}")]
    Parse(String),

    #[error("refresh abandoned before completion")]
    Abandoned,
}

/// The new access token, or why none could be obtained.
pub type RefreshOutcome = Result<String, RefreshError>;

// =============================================================================
// STATE MACHINE
// =============================================================================

#[derive(Default)]
enum RefreshState {
    #[default]
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<RefreshOutcome>>,
    },
}

type SharedState = Arc<Mutex<RefreshState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, RefreshState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct RefreshCoordinator {
    state: SharedState,
}

impl RefreshCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        matches!(*lock(&self.state), RefreshState::Refreshing { .. })
    }

    /// Number of callers waiting on the in-flight refresh.
    #[must_use]
    pub fn pending(&self) -> usize {
        match &*lock(&self.state) {
            RefreshState::Idle => 0,
            RefreshState::Refreshing { waiters } => waiters.len(),
        }
    }

    /// Queue a waiter; true if the caller opened a new episode.
    fn join(&self) -> (bool, oneshot::Receiver<RefreshOutcome>) {
        let (tx, rx) = oneshot::channel();
        let mut state = lock(&self.state);
        if let RefreshState::Refreshing { waiters } = &mut *state {
            waiters.push(tx);
            tracing::debug!(waiters = waiters.len(), "refresh in flight; queued");
            return (false, rx);
        }
        *state = RefreshState::Refreshing { waiters: vec![tx] };
        (true, rx)
    }

    /// Run `refresh` at most once per episode.
    ///
    /// The first caller spawns `refresh` on its own task; callers arriving
    /// before it completes share its outcome without invoking their own
    /// closure. The spawned task always settles, even when every caller has
    /// stopped waiting.
    pub async fn run<F, Fut>(&self, refresh: F) -> RefreshOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RefreshOutcome> + Send + 'static,
    {
        let (started, rx) = self.join();
        if started {
            let guard = SettleGuard { state: Arc::clone(&self.state), settled: false };
            let task = refresh();
            tokio::spawn(async move {
                let outcome = task.await;
                guard.settle(&outcome);
            });
        }
        rx.await.unwrap_or(Err(RefreshError::Abandoned))
    }
}

fn settle(state: &SharedState, outcome: &RefreshOutcome) {
    let waiters = match std::mem::take(&mut *lock(state)) {
        RefreshState::Idle => Vec::new(),
        RefreshState::Refreshing { waiters } => waiters,
    };
    tracing::debug!(waiters = waiters.len(), ok = outcome.is_ok(), "refresh settled");
    for tx in waiters {
        // A caller that gave up has dropped its receiver.
        let _ = tx.send(outcome.clone());
    }
}

/// Owned by the refresh task. Dropping it unsettled (panic, runtime
/// shutdown) releases the flag and fails every waiter.
struct SettleGuard {
    state: SharedState,
    settled: bool,
}

impl SettleGuard {
    fn settle(mut self, outcome: &RefreshOutcome) {
        self.settled = true;
        settle(&self.state, outcome);
    }
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("refresh task ended before completion");
            settle(&self.state, &Err(RefreshError::Abandoned));
        }
    }
}

#[cfg(test)]
#[path = "refresh_test.rs"]
mod tests;
