//! Resilient, security-hardened HTTP plumbing for every platform call.
//!
//! - [`ResilientClient`] bounds a call with a timeout, honours a caller's
//!   [`CancellationToken`](tokio_util::sync::CancellationToken) and retries
//!   transient failures with exponential backoff.
//! - [`OriginAllowlist`] decides where a bearer token may be sent.
//! - [`check_path`] decides whether a bundle-relative path is safe to put in a URL.

mod error;
mod origin;
mod path_safety;
mod resilience;
mod retry_after;

pub use error::ApiErrorBody;
pub use error::NetError;
pub use error::TransportKind;
pub use error::summarize_body;
pub use origin::DEFAULT_API_ORIGINS;
pub use origin::DEFAULT_PLAYER_ORIGINS;
pub use origin::OriginAllowlist;
pub use origin::OriginRole;
pub use origin::OriginValidation;
pub use origin::validate_api_base;
pub use path_safety::PathRejection;
pub use path_safety::check_path;
pub use path_safety::is_path_safe;
pub use resilience::ResilienceOptions;
pub use resilience::ResilientClient;
pub use resilience::USER_AGENT;
pub use resilience::classify_transport;
pub use resilience::display_url;
pub use retry_after::MAX_RETRY_AFTER;
pub use retry_after::parse_retry_after;

/// Reject `path` with a [`NetError::UnsafePath`] unless it passes [`check_path`].
pub fn ensure_safe_path(path: &str) -> Result<(), NetError> {
    check_path(path).map_err(|reason| NetError::UnsafePath {
        path: path.to_string(),
        reason,
    })
}
