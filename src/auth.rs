//! Session lifecycle: login, registration, restore, logout.
//!
//! Login and register responses carry the token pair and the user; both
//! are persisted before `SignedIn` is emitted. A 401 here means bad
//! credentials and is returned as-is: these routes never enter the refresh
//! path.

use serde::{Deserialize, Serialize};

use crate::client::{ApiClient, ApiRequest};
use crate::config::{LOGIN_PATH, LOGOUT_PATH, ME_PATH, REGISTER_PATH};
use crate::error::ClientError;
use crate::session::{Session, SessionEvent, SessionUser, SignOutReason};
use crate::tokens::TokenPair;

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

/// New-account fields sent to `POST /auth/register`.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionPayload {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    user: Option<SessionUser>,
}

#[derive(Clone)]
pub struct AuthApi {
    client: ApiClient,
}

impl AuthApi {
    #[must_use]
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    #[must_use]
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// # Errors
    ///
    /// [`ClientError::Status`] with 401 on bad credentials, or any transport error.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, ClientError> {
        let request = ApiRequest::post(LOGIN_PATH).with_json(json_body(&Credentials { email, password })?);
        let payload: SessionPayload = self.client.send_json(request).await?;
        Ok(self.establish(payload).await)
    }

    /// # Errors
    ///
    /// [`ClientError::Status`] on validation failures, or any transport error.
    pub async fn register(&self, registration: &Registration) -> Result<Session, ClientError> {
        let request = ApiRequest::post(REGISTER_PATH).with_json(json_body(registration)?);
        let payload: SessionPayload = self.client.send_json(request).await?;
        Ok(self.establish(payload).await)
    }

    /// Rebuild the session persisted by a previous run, if any.
    pub async fn restore(&self) -> Option<Session> {
        let tokens = self.client.store().get_tokens().await?;
        let user = self.client.store().get_user().await;
        tracing::debug!(has_user = user.is_some(), "session restored from store");
        Some(Session { tokens, user })
    }

    /// Fetch the current user through the authenticated path and cache it.
    ///
    /// # Errors
    ///
    /// Any [`ClientError`] from the request, including a failed refresh.
    pub async fn me(&self) -> Result<SessionUser, ClientError> {
        let user: SessionUser = self.client.send_json(ApiRequest::get(ME_PATH)).await?;
        self.client.store().save_user(&user).await;
        Ok(user)
    }

    /// End the session. The server-side revoke is best effort and never
    /// refreshes an expired token; local state is cleared regardless, with
    /// a single `SignedOut { UserRequested }`.
    pub async fn logout(&self) {
        if self.client.store().get_tokens().await.is_some() {
            if let Err(e) = self.client.send_unrecovered(&ApiRequest::post(LOGOUT_PATH)).await {
                tracing::warn!(error = %e, code = e.error_code(), "server logout failed; clearing local session");
            }
        }
        self.client
            .teardown()
            .run(SignOutReason::UserRequested)
            .await;
    }

    async fn establish(&self, payload: SessionPayload) -> Session {
        let tokens = TokenPair { access_token: payload.access_token, refresh_token: payload.refresh_token };
        let store = self.client.store();
        store.save_tokens(&tokens).await;
        if let Some(user) = &payload.user {
            store.save_user(user).await;
        }
        if let Some(events) = self.client.events() {
            events.emit(SessionEvent::SignedIn);
        }
        tracing::info!("signed in");
        Session { tokens, user: payload.user }
    }
}

fn json_body<T: Serialize>(body: &T) -> Result<serde_json::Value, ClientError> {
    serde_json::to_value(body).map_err(|e| ClientError::Decode(e.to_string()))
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
