//! Client configuration parsed from environment variables.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3000/api";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const ME_PATH: &str = "/auth/me";

/// Errors produced while building a [`ClientConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("config parse failed: {key}={value}")]
    Parse { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Backend root, without trailing slash (e.g. `https://api.example.com/api`).
    pub base_url: String,
    /// Whole-request timeout applied to every call, including refresh.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// File-backed token storage. `None` keeps tokens in memory only.
    pub token_file: Option<PathBuf>,
}

impl ClientConfig {
    /// Build a config for `base_url` with default timeouts and in-memory tokens.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] unless the URL is http(s).
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            token_file: None,
        })
    }

    /// Build typed client config from environment variables.
    ///
    /// Optional:
    /// - `API_BASE_URL`: default `http://127.0.0.1:3000/api`
    /// - `API_TIMEOUT_SECS`: default 10
    /// - `API_CONNECT_TIMEOUT_SECS`: default 5
    /// - `API_TOKEN_FILE`: path of the JSON token file; in-memory when absent
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is not http(s) or a timeout is not an integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = std::env::var("API_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned());
        let request_secs = env_parse_u64("API_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;
        let connect_secs = env_parse_u64("API_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)?;
        let token_file = std::env::var("API_TOKEN_FILE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            base_url: normalize_base_url(&base_url)?,
            request_timeout: Duration::from_secs(request_secs),
            connect_timeout: Duration::from_secs(connect_secs),
            token_file,
        })
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_file = Some(path.into());
        self
    }

    /// Join a request path onto the base URL.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}

fn env_parse_u64(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::Parse { key, value: raw }),
        Err(_) => Ok(default),
    }
}

pub(crate) fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .ok_or_else(|| ConfigError::InvalidBaseUrl(raw.to_owned()))?;
    if rest.is_empty() {
        return Err(ConfigError::InvalidBaseUrl(raw.to_owned()));
    }
    Ok(trimmed.to_owned())
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
