//! Error types for the resilient network layer.

use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::path_safety::PathRejection;

/// Longest server-provided message kept inside an error value.
const MAX_SERVER_MESSAGE_CHARS: usize = 200;

/// Error codes in server bodies that mean "your token is (nearly) expired".
const EXPIRY_CODES: &[&str] = &[
    "token_expired",
    "token_expiring",
    "expiring_soon",
    "identity_expired",
    "jwt_expired",
];

/// Coarse classification of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Timeout,
    ConnectionRefused,
    ConnectionReset,
    Dns,
    Other,
}

impl TransportKind {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(self) -> bool {
        !matches!(self, TransportKind::Other)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Timeout => "timeout",
            TransportKind::ConnectionRefused => "connection refused",
            TransportKind::ConnectionReset => "connection reset",
            TransportKind::Dns => "dns failure",
            TransportKind::Other => "transport error",
        }
    }
}

/// Documented fields of a platform error body.
///
/// Only these fields survive; the raw body is never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiErrorBody {
    pub error: Option<String>,
    pub code: Option<String>,
    pub reasons: Vec<String>,
    pub tags: Vec<String>,
    pub retry_after: Option<u64>,
}

impl ApiErrorBody {
    /// Extract the documented fields from a raw body, tolerating garbage.
    pub fn from_body(body: &str) -> Self {
        let mut parsed: Self = serde_json::from_str(body).unwrap_or_default();
        if let Some(message) = parsed.error.as_mut() {
            truncate_chars(message, MAX_SERVER_MESSAGE_CHARS);
        }
        parsed
    }

    /// Whether the body hints that the presented token is expired or about to be.
    pub fn has_expiry_hint(&self) -> bool {
        if let Some(code) = &self.code
            && EXPIRY_CODES.contains(&code.to_ascii_lowercase().as_str())
        {
            return true;
        }
        self.error.as_deref().is_some_and(|message| {
            let lower = message.to_ascii_lowercase();
            lower.contains("expired") || lower.contains("expiring")
        })
    }
}

/// Errors produced by the resilient client.
#[derive(Debug, Clone, Error)]
pub enum NetError {
    #[error("request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("request to {url} was cancelled")]
    Aborted { url: String },

    #[error(
        "request to {url} failed after {attempts} attempts (last status: {})",
        last_status.map_or_else(|| "none".to_string(), |s| s.to_string())
    )]
    RetryExhausted {
        url: String,
        attempts: u32,
        last_status: Option<u16>,
        last_error: Option<String>,
        retry_after: Option<Duration>,
    },

    #[error("HTTP {status} from {url}{}", body.error.as_deref().map(|e| format!(": {e}")).unwrap_or_default())]
    Http {
        url: String,
        status: u16,
        body: ApiErrorBody,
        body_summary: String,
    },

    #[error("invalid JSON in HTTP {status} response from {url}: {message}")]
    Parse {
        url: String,
        status: u16,
        message: String,
    },

    #[error("empty HTTP {status} response from {url}")]
    EmptyResponse { url: String, status: u16 },

    #[error("{} while contacting {url}: {message}", kind.as_str())]
    Transport {
        url: String,
        kind: TransportKind,
        message: String,
    },

    #[error("refusing to send credentials to {url}: {reason}")]
    OriginNotAllowed { url: String, reason: String },

    #[error("unsafe path '{path}': {reason}")]
    UnsafePath { path: String, reason: PathRejection },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

impl NetError {
    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            NetError::Timeout { .. } => "FETCH_TIMEOUT",
            NetError::Aborted { .. } => "ABORTED",
            NetError::RetryExhausted { .. } => "FETCH_RETRY_EXHAUSTED",
            NetError::Http { .. } => "HTTP_ERROR",
            NetError::Parse { .. } => "JSON_PARSE_FAILED",
            NetError::EmptyResponse { .. } => "EMPTY_RESPONSE",
            NetError::Transport { .. } => "NETWORK_ERROR",
            NetError::OriginNotAllowed { .. } => "ORIGIN_NOT_ALLOWED",
            NetError::UnsafePath { .. } => "UNSAFE_PATH",
            NetError::InvalidRequest { .. } => "INVALID_REQUEST",
        }
    }

    /// The last HTTP status observed, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            NetError::Http { status, .. }
            | NetError::Parse { status, .. }
            | NetError::EmptyResponse { status, .. } => Some(*status),
            NetError::RetryExhausted { last_status, .. } => *last_status,
            _ => None,
        }
    }

    /// Structured error body for non-2xx responses.
    pub fn error_body(&self) -> Option<&ApiErrorBody> {
        match self {
            NetError::Http { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Whether the server rejected the bearer token (401, or an expiry hint).
    pub fn is_auth_failure(&self) -> bool {
        match self {
            NetError::Http { status, body, .. } => {
                *status == 401 || ((400..500).contains(status) && body.has_expiry_hint())
            }
            _ => false,
        }
    }

    /// Server-suggested wait before trying again, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            NetError::RetryExhausted { retry_after, .. } => *retry_after,
            NetError::Http { body, .. } => body.retry_after.map(Duration::from_secs),
            _ => None,
        }
    }

    /// Whether the platform rate-limited the call.
    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(429)
    }
}

/// Short non-reversible summary of a body for logs: length plus digest.
pub fn summarize_body(body: &str) -> String {
    let digest = Sha256::digest(body.as_bytes());
    let short: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    format!("len={},digest={short}", body.len())
}

fn truncate_chars(s: &mut String, max: usize) {
    if let Some((idx, _)) = s.char_indices().nth(max) {
        s.truncate(idx);
        s.push('…');
    }
}
