//! Request Client: bearer attachment and transparent 401 recovery.
//!
//! ARCHITECTURE
//! ============
//! Every request reads the access token from the [`TokenStore`] and, when
//! present, sends it as `Authorization: Bearer <token>`. A missing token is
//! not special-cased: the server answers 401 and recovery runs exactly as
//! it would for an expired token.
//!
//! A 401 on a request that is neither an auth route nor already retried
//! enters recovery:
//! - if the stored access token differs from the one the request carried,
//!   a refresh finished in the meantime and the request replays with it;
//! - otherwise the request joins the [`RefreshCoordinator`], which performs
//!   at most one `POST /auth/refresh` per episode.
//!
//! Either way the request is replayed once. A second 401 is returned to
//! the caller as-is.
//!
//! A failed refresh tears the session down (clear store, dispatch
//! `SignedOut`) and rejects the triggering request and every queued one
//! with the refresh error. The refresh itself runs detached from the
//! request that triggered it, so cancelling that request never loses a
//! pair the backend has already issued.

use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{ClientConfig, LOGIN_PATH, REFRESH_PATH, REGISTER_PATH};
use crate::error::{ClientError, from_transport};
use crate::refresh::{RefreshCoordinator, RefreshError, RefreshOutcome};
use crate::session::{SessionEvent, SessionEvents, SessionTeardown, SignOutReason};
use crate::tokens::{TokenPair, TokenStore};

/// Routes whose 401 means "bad credentials", never "expired token".
const AUTH_ROUTES: [&str; 3] = [LOGIN_PATH, REGISTER_PATH, REFRESH_PATH];

/// True if a 401 from `path` must not trigger a refresh.
#[must_use]
pub fn is_auth_route(path: &str) -> bool {
    AUTH_ROUTES.iter().any(|route| path.contains(route))
}

// =============================================================================
// REQUEST / RESPONSE
// =============================================================================

/// A replayable request description.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    id: Uuid,
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    retried: bool,
}

impl ApiRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4(), method, path: path.into(), query: Vec::new(), body: None, retried: false }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    #[must_use]
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    #[must_use]
    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Whether this request has already been replayed after a 401.
    #[must_use]
    pub fn is_retried(&self) -> bool {
        self.retried
    }
}

/// The `{ "data": ... }` wrapper every backend payload arrives in.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the whole body as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Decode`] if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        serde_json::from_str(&self.body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Decode the `data` field of the response envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Decode`] if the envelope or payload does not match.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        self.json::<Envelope<T>>().map(|envelope| envelope.data)
    }

    fn into_result(self) -> Result<Self, ClientError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ClientError::Status { status: self.status, body: self.body })
        }
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshPayload {
    access_token: String,
    refresh_token: Option<String>,
}

/// Parse a refresh response. A backend that does not rotate the refresh
/// token keeps the one that was sent.
fn parse_refresh_response(json: &str, sent_refresh_token: &str) -> Result<TokenPair, RefreshError> {
    let envelope: Envelope<RefreshPayload> =
        serde_json::from_str(json).map_err(|e| RefreshError::Parse(e.to_string()))?;
    let payload = envelope.data;
    if payload.access_token.is_empty() {
        return Err(RefreshError::Parse("empty accessToken".into()));
    }
    let refresh_token = payload
        .refresh_token
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| sent_refresh_token.to_owned());
    Ok(TokenPair { access_token: payload.access_token, refresh_token })
}

// =============================================================================
// CLIENT
// =============================================================================

/// Authenticated HTTP client. Clones share the token store and the
/// refresh state, so one refresh serves every clone.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: reqwest::Client,
    config: ClientConfig,
    store: TokenStore,
    coordinator: RefreshCoordinator,
    teardown: SessionTeardown,
}

impl ApiClient {
    /// Build a client whose teardown only clears the token store.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn new(config: ClientConfig, store: TokenStore) -> Result<Self, ClientError> {
        Self::build(config, store, None)
    }

    /// Build a client that also dispatches session events, including
    /// `SignedOut` when a refresh fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn with_events(config: ClientConfig, store: TokenStore, events: SessionEvents) -> Result<Self, ClientError> {
        Self::build(config, store, Some(events))
    }

    fn build(config: ClientConfig, store: TokenStore, events: Option<SessionEvents>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ClientError::HttpClientBuild(e.to_string()))?;
        let teardown = SessionTeardown::new(store.clone(), events);
        Ok(Self {
            inner: Arc::new(ClientInner { http, config, store, coordinator: RefreshCoordinator::new(), teardown }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    #[must_use]
    pub fn events(&self) -> Option<&SessionEvents> {
        self.inner.teardown.events()
    }

    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.inner.coordinator.is_refreshing()
    }

    pub(crate) fn teardown(&self) -> &SessionTeardown {
        &self.inner.teardown
    }

    /// Send `request`, recovering once from an expired access token.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Network`] / [`ClientError::Timeout`] when no response arrived
    /// - [`ClientError::RefreshFailed`] when a 401 could not be recovered
    /// - [`ClientError::Status`] for any other non-2xx response
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let sent_with = self.inner.store.get_access_token().await;
        let response = self.dispatch(&request, sent_with.as_deref()).await?;

        if response.status != 401 || request.retried || is_auth_route(&request.path) {
            return response.into_result();
        }

        request.retried = true;
        let token = self.recover(sent_with.as_deref()).await?;
        tracing::debug!(request_id = %request.id, path = %request.path, "replaying with refreshed token");
        self.dispatch(&request, Some(&token))
            .await?
            .into_result()
    }

    /// Send `request` and decode the `data` field of a successful response.
    ///
    /// # Errors
    ///
    /// Same as [`ApiClient::send`], plus [`ClientError::Decode`].
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ClientError> {
        self.send(request).await?.data()
    }

    async fn dispatch(&self, request: &ApiRequest, token: Option<&str>) -> Result<ApiResponse, ClientError> {
        let url = self.inner.config.url(&request.path);
        let mut builder = self.inner.http.request(request.method.clone(), url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        tracing::debug!(
            request_id = %request.id,
            method = %request.method,
            path = %request.path,
            authenticated = token.is_some(),
            retry = request.retried,
            "sending request"
        );

        let response = builder.send().await.map_err(|e| {
            tracing::warn!(request_id = %request.id, path = %request.path, error = %e, "request failed");
            from_transport(&e)
        })?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| from_transport(&e))?;

        tracing::debug!(request_id = %request.id, status, "response received");
        Ok(ApiResponse { status, body })
    }

    async fn recover(&self, sent_with: Option<&str>) -> Result<String, ClientError> {
        if let Some(current) = self.inner.store.get_access_token().await {
            if sent_with != Some(current.as_str()) {
                return Ok(current);
            }
        }
        let client = self.clone();
        Ok(self
            .inner
            .coordinator
            .run(move || async move { client.refresh_session().await })
            .await?)
    }

    /// Send `request` with the stored token and no 401 recovery.
    pub(crate) async fn send_unrecovered(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        let token = self.inner.store.get_access_token().await;
        self.dispatch(request, token.as_deref())
            .await?
            .into_result()
    }

    /// Body of a refresh episode, run on its own task: call the refresh
    /// endpoint, persist the new pair, or tear the session down.
    async fn refresh_session(&self) -> RefreshOutcome {
        tracing::info!("access token rejected; refreshing session");
        match self.request_new_tokens().await {
            Ok(pair) => {
                self.inner.store.save_tokens(&pair).await;
                if let Some(events) = self.events() {
                    events.emit(SessionEvent::Refreshed);
                }
                tracing::info!("session refreshed");
                Ok(pair.access_token)
            }
            Err(e) => {
                tracing::warn!(error = %e, "session refresh failed");
                self.inner
                    .teardown
                    .run(SignOutReason::RefreshFailed)
                    .await;
                Err(e)
            }
        }
    }

    async fn request_new_tokens(&self) -> Result<TokenPair, RefreshError> {
        let refresh_token = self
            .inner
            .store
            .get_refresh_token()
            .await
            .ok_or(RefreshError::MissingRefreshToken)?;

        let response = self
            .inner
            .http
            .post(self.inner.config.url(REFRESH_PATH))
            .json(&RefreshRequest { refresh_token: &refresh_token })
            .send()
            .await
            .map_err(|e| refresh_transport_error(&e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| refresh_transport_error(&e))?;

        if !(200..300).contains(&status) {
            return Err(RefreshError::Rejected { status, body });
        }

        parse_refresh_response(&body, &refresh_token)
    }
}

fn refresh_transport_error(err: &reqwest::Error) -> RefreshError {
    if err.is_timeout() {
        RefreshError::Timeout
    } else {
        RefreshError::Transport(err.to_string())
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
