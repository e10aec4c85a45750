//! Session model, session events, and teardown.
//!
//! ARCHITECTURE
//! ============
//! The rest of the application learns about session changes through
//! [`SessionEvents`], a broadcast channel standing in for the global state
//! store's `logout()` action. The request client is the only producer of
//! `SignedOut { RefreshFailed }`; UI code subscribes and navigates away.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::tokens::{TokenPair, TokenStore};

const EVENT_CHANNEL_CAPACITY: usize = 16;

// =============================================================================
// MODEL
// =============================================================================

/// User identity as returned by the backend. Fields beyond the common ones
/// are kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub tokens: TokenPair,
    pub user: Option<SessionUser>,
}

// =============================================================================
// EVENTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    /// Explicit logout.
    UserRequested,
    /// The refresh token was missing, rejected, or the refresh call failed.
    RefreshFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    Refreshed,
    SignedOut { reason: SignOutReason },
}

#[derive(Debug, Clone)]
pub struct SessionEvents {
    tx: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Publish `event`. Having no subscribers is not an error.
    pub fn emit(&self, event: SessionEvent) {
        let receivers = self.tx.send(event).unwrap_or(0);
        tracing::debug!(?event, receivers, "session event");
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TEARDOWN
// =============================================================================

/// Ends the local session: clears the Token Store and, when built with
/// events, dispatches `SignedOut`.
///
/// Runs from inside failing error paths, so it never returns an error;
/// store failures are already logged by [`TokenStore`].
#[derive(Clone)]
pub struct SessionTeardown {
    store: TokenStore,
    events: Option<SessionEvents>,
}

impl SessionTeardown {
    #[must_use]
    pub fn new(store: TokenStore, events: Option<SessionEvents>) -> Self {
        Self { store, events }
    }

    pub async fn run(&self, reason: SignOutReason) {
        tracing::info!(?reason, "tearing down session");
        self.store.clear_all().await;
        if let Some(events) = &self.events {
            events.emit(SessionEvent::SignedOut { reason });
        }
    }

    pub(crate) fn events(&self) -> Option<&SessionEvents> {
        self.events.as_ref()
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
