//! Errors surfaced by the request client.

use crate::refresh::RefreshError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The request URL could not be built.
    #[error("invalid request URL: {0}")]
    InvalidUrl(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),

    /// No response was received at all (DNS, refused connection, reset).
    #[error("network unreachable: {0}")]
    Network(String),

    /// The request exceeded the client-side timeout.
    #[error("request timed out")]
    Timeout,

    /// The server answered with a non-success status that was not recovered.
    #[error("server returned status {status}")]
    Status { status: u16, body: String },

    /// A 401 could not be recovered because the token refresh failed.
    #[error("session refresh failed: {0}")]
    RefreshFailed(#[from] RefreshError),

    /// The response body did not match the expected shape.
    #[error("response decode failed: {0}")]
    Decode(String),
}

impl ClientError {
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_) => "E_INVALID_URL",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
            Self::Network(_) => "E_NETWORK",
            Self::Timeout => "E_TIMEOUT",
            Self::Status { status: 401, .. } => "E_UNAUTHORIZED",
            Self::Status { .. } => "E_STATUS",
            Self::RefreshFailed(_) => "E_REFRESH_FAILED",
            Self::Decode(_) => "E_DECODE",
        }
    }

    /// True when the backend was never reached; the UI shows a connectivity
    /// message instead of an auth or business error.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }

    /// True when the session is unusable: an unrecovered 401 or a failed refresh.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status: 401, .. } | Self::RefreshFailed(_))
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Map a transport-level failure, keeping timeouts distinguishable.
pub(crate) fn from_transport(err: &reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout
    } else if err.is_builder() {
        ClientError::InvalidUrl(err.to_string())
    } else if err.is_decode() || err.is_body() {
        ClientError::Decode(err.to_string())
    } else {
        ClientError::Network(err.to_string())
    }
}
