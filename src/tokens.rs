//! Token Store: persistence of the access/refresh pair and cached user.
//!
//! DESIGN
//! ======
//! Reads never fail from the caller's point of view: a backend error is
//! logged and treated as "no session", which the request path then handles
//! the same way as an expired token (the server answers 401).
//!
//! The pair is written as two keys. An async `RwLock` serializes writers
//! against readers so a reader never sees a new access token alongside the
//! old refresh token.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::session::SessionUser;
use crate::store::KeyValueStore;

const ACCESS_TOKEN_KEY: &str = "accessToken";
const REFRESH_TOKEN_KEY: &str = "refreshToken";
const USER_KEY: &str = "user";

/// Opaque bearer credentials. Never parsed or inspected client-side.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    #[must_use]
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self { access_token: access_token.into(), refresh_token: refresh_token.into() }
    }
}

// Tokens are secrets; keep them out of logs.
impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct TokenStore {
    backend: Arc<dyn KeyValueStore>,
    pair_lock: Arc<RwLock<()>>,
}

impl TokenStore {
    #[must_use]
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend, pair_lock: Arc::new(RwLock::new(())) }
    }

    /// Both tokens, or `None` when either half is missing or unreadable.
    pub async fn get_tokens(&self) -> Option<TokenPair> {
        let _read = self.pair_lock.read().await;
        let access_token = self.read_key(ACCESS_TOKEN_KEY).await?;
        let refresh_token = self.read_key(REFRESH_TOKEN_KEY).await?;
        Some(TokenPair { access_token, refresh_token })
    }

    pub async fn get_access_token(&self) -> Option<String> {
        let _read = self.pair_lock.read().await;
        self.read_key(ACCESS_TOKEN_KEY).await
    }

    pub async fn get_refresh_token(&self) -> Option<String> {
        let _read = self.pair_lock.read().await;
        self.read_key(REFRESH_TOKEN_KEY).await
    }

    pub async fn save_tokens(&self, pair: &TokenPair) {
        let _write = self.pair_lock.write().await;
        for (key, value) in [(ACCESS_TOKEN_KEY, &pair.access_token), (REFRESH_TOKEN_KEY, &pair.refresh_token)] {
            if let Err(e) = self.backend.set(key, value).await {
                tracing::error!(error = %e, key, "token store write failed");
            }
        }
    }

    pub async fn get_user(&self) -> Option<SessionUser> {
        let raw = self.read_key(USER_KEY).await?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::warn!(error = %e, "cached user unreadable; ignoring");
                None
            }
        }
    }

    pub async fn save_user(&self, user: &SessionUser) {
        let raw = match serde_json::to_string(user) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(error = %e, "cached user serialize failed");
                return;
            }
        };
        if let Err(e) = self.backend.set(USER_KEY, &raw).await {
            tracing::error!(error = %e, key = USER_KEY, "token store write failed");
        }
    }

    /// Remove tokens and cached user. Safe to call repeatedly.
    pub async fn clear_all(&self) {
        let _write = self.pair_lock.write().await;
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY] {
            if let Err(e) = self.backend.remove(key).await {
                tracing::error!(error = %e, key, "token store clear failed");
            }
        }
    }

    async fn read_key(&self, key: &str) -> Option<String> {
        match self.backend.get(key).await {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                tracing::error!(error = %e, key, "token store read failed; treating as signed out");
                None
            }
        }
    }
}

#[cfg(test)]
#[path = "tokens_test.rs"]
mod tests;
