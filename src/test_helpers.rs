//! Test fixtures: an axum mock backend and instrumented stores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{Value, json};
use tokio::task::JoinHandle;

use crate::client::ApiClient;
use crate::config::ClientConfig;
use crate::session::SessionEvents;
use crate::store::{KeyValueStore, MemoryStore, StoreError};
use crate::tokens::{TokenPair, TokenStore};

pub const LOGIN_PASSWORD: &str = "hunter2";

/// `/auth/register` answers 401 for this address.
pub const BLOCKED_EMAIL: &str = "blocked@example.com";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// MOCK BACKEND
// =============================================================================

#[derive(Debug, Clone)]
pub enum RefreshBehavior {
    Issue { access_token: String, refresh_token: String },
    Reject(u16),
    Malformed,
}

/// One request seen by a protected route.
#[derive(Debug, Clone)]
pub struct Hit {
    pub path: String,
    pub authorization: Option<String>,
}

pub struct BackendState {
    valid_token: Mutex<String>,
    refresh: Mutex<RefreshBehavior>,
    refresh_delay: Mutex<Duration>,
    refresh_calls: AtomicUsize,
    refresh_tokens_seen: Mutex<Vec<String>>,
    logout_calls: AtomicUsize,
    hits: Mutex<Vec<Hit>>,
}

pub struct MockBackend {
    pub base_url: String,
    state: Arc<BackendState>,
    server: JoinHandle<()>,
}

impl MockBackend {
    /// Bind to an ephemeral port. Protected routes accept `Bearer {valid_token}`.
    pub async fn start(valid_token: &str) -> Self {
        let state = Arc::new(BackendState {
            valid_token: Mutex::new(valid_token.to_owned()),
            refresh: Mutex::new(RefreshBehavior::Issue { access_token: "new".into(), refresh_token: "r2".into() }),
            refresh_delay: Mutex::new(Duration::ZERO),
            refresh_calls: AtomicUsize::new(0),
            refresh_tokens_seen: Mutex::new(Vec::new()),
            logout_calls: AtomicUsize::new(0),
            hits: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/auth/refresh", post(refresh))
            .route("/auth/login", post(login))
            .route("/auth/register", post(register))
            .route("/auth/logout", post(logout))
            .route("/auth/me", get(me))
            .route("/wallet/balance", get(balance))
            .route("/payments/qr", post(pay_qr))
            .route("/always-401", get(always_unauthorized))
            .route("/slow", get(slow))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("mock backend should bind");
        let addr = listener.local_addr().expect("mock backend addr");
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { base_url: format!("http://{addr}"), state, server }
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(&self.base_url).expect("mock base url is valid")
    }

    pub fn client(&self, store: TokenStore) -> ApiClient {
        ApiClient::new(self.config(), store).expect("client should build")
    }

    pub fn client_with_events(&self, store: TokenStore, events: SessionEvents) -> ApiClient {
        ApiClient::with_events(self.config(), store, events).expect("client should build")
    }

    pub fn set_refresh(&self, behavior: RefreshBehavior) {
        *lock(&self.state.refresh) = behavior;
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *lock(&self.state.refresh_delay) = delay;
    }

    pub fn set_valid_token(&self, token: &str) {
        *lock(&self.state.valid_token) = token.to_owned();
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        lock(&self.state.refresh_tokens_seen).clone()
    }

    pub fn logout_calls(&self) -> usize {
        self.state.logout_calls.load(Ordering::SeqCst)
    }

    pub fn hits(&self, path: &str) -> Vec<Hit> {
        lock(&self.state.hits)
            .iter()
            .filter(|h| h.path == path)
            .cloned()
            .collect()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Record the hit and check the bearer token.
fn authorize(state: &BackendState, path: &str, headers: &HeaderMap) -> bool {
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let expected = format!("Bearer {}", lock(&state.valid_token));
    let ok = authorization.as_deref() == Some(expected.as_str());
    lock(&state.hits).push(Hit { path: path.to_owned(), authorization });
    ok
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "message": "token expired" }))).into_response()
}

fn session_payload(access: &str, refresh: &str, name: &str) -> Value {
    json!({
        "data": {
            "accessToken": access,
            "refreshToken": refresh,
            "user": { "id": 7, "name": name, "email": "ada@example.com", "points": 120 }
        }
    })
}

async fn refresh(State(state): State<Arc<BackendState>>, Json(body): Json<Value>) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    let sent = body
        .get("refreshToken")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    lock(&state.refresh_tokens_seen).push(sent);

    let delay = *lock(&state.refresh_delay);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let behavior = lock(&state.refresh).clone();
    match behavior {
        RefreshBehavior::Issue { access_token, refresh_token } => {
            *lock(&state.valid_token) = access_token.clone();
            Json(json!({ "data": { "accessToken": access_token, "refreshToken": refresh_token } })).into_response()
        }
        RefreshBehavior::Reject(status) => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::UNAUTHORIZED),
            Json(json!({ "message": "invalid refresh token" })),
        )
            .into_response(),
        RefreshBehavior::Malformed => Json(json!({ "data": {} })).into_response(),
    }
}

async fn login(State(state): State<Arc<BackendState>>, Json(body): Json<Value>) -> Response {
    if body.get("password").and_then(Value::as_str) != Some(LOGIN_PASSWORD) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "invalid credentials" }))).into_response();
    }
    *lock(&state.valid_token) = "login-access".into();
    Json(session_payload("login-access", "login-refresh", "Ada")).into_response()
}

async fn register(State(state): State<Arc<BackendState>>, Json(body): Json<Value>) -> Response {
    if body.get("email").and_then(Value::as_str) == Some(BLOCKED_EMAIL) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "registration not allowed" }))).into_response();
    }
    let Some(name) = body.get("name").and_then(Value::as_str) else {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "message": "name required" }))).into_response();
    };
    *lock(&state.valid_token) = "register-access".into();
    (StatusCode::CREATED, Json(session_payload("register-access", "register-refresh", name))).into_response()
}

async fn logout(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    state.logout_calls.fetch_add(1, Ordering::SeqCst);
    if !authorize(&state, "/auth/logout", &headers) {
        return unauthorized();
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn me(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    if !authorize(&state, "/auth/me", &headers) {
        return unauthorized();
    }
    Json(json!({ "data": { "id": 7, "name": "Ada", "email": "ada@example.com", "tier": "gold" } })).into_response()
}

async fn balance(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    if !authorize(&state, "/wallet/balance", &headers) {
        return unauthorized();
    }
    Json(json!({ "data": { "balance": 1250, "currency": "USD" } })).into_response()
}

async fn pay_qr(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    if !authorize(&state, "/payments/qr", &headers) {
        return unauthorized();
    }
    (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "message": "insufficient balance" }))).into_response()
}

async fn always_unauthorized(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    authorize(&state, "/always-401", &headers);
    unauthorized()
}

async fn slow() -> Response {
    tokio::time::sleep(Duration::from_millis(500)).await;
    Json(json!({ "data": "late" })).into_response()
}

// =============================================================================
// STORES
// =============================================================================

/// Token store over a fresh in-memory backend, seeded with `tokens`.
pub async fn memory_token_store(tokens: Option<TokenPair>) -> (TokenStore, Arc<MemoryStore>) {
    let backend = Arc::new(MemoryStore::new());
    let store = TokenStore::new(backend.clone());
    if let Some(pair) = tokens {
        store.save_tokens(&pair).await;
    }
    (store, backend)
}

/// Backend whose every operation fails.
pub struct FailingStore;

#[async_trait::async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Io(std::io::Error::other("keystore locked")))
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
        Err(StoreError::Io(std::io::Error::other("keystore locked")))
    }

    async fn remove(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Io(std::io::Error::other("keystore locked")))
    }
}
