use std::path::PathBuf;

use thiserror::Error;
use vibecodr_net::NetError;

/// Credential lifecycle failures.
///
/// `Clone` so one settled refresh can be handed to every waiter.
#[derive(Debug, Clone, Error)]
pub enum LoginError {
    #[error("not signed in: no credentials found at {}", path.display())]
    AuthRequired { path: PathBuf },

    #[error("session expired ({reason}); sign in again")]
    AuthExpired { reason: String },

    #[error("failed to read credentials at {}: {message}", path.display())]
    ConfigRead { path: PathBuf, message: String },

    #[error("failed to write credentials at {}: {message}", path.display())]
    ConfigWrite { path: PathBuf, message: String },

    #[error(
        "credentials at {} are accessible to other users ({detail}); restrict them to your account",
        path.display()
    )]
    InsecurePermissions { path: PathBuf, detail: String },

    #[error("invalid credentials path {}: {reason}", path.display())]
    ConfigPathInvalid { path: PathBuf, reason: String },

    #[error("token exchange failed: {0}")]
    Exchange(#[source] NetError),

    #[error("identity refresh failed: {message}")]
    IdentityRefresh {
        message: String,
        #[source]
        cause: Option<NetError>,
    },

    #[error("token refresh did not finish: {message}")]
    RefreshInterrupted { message: String },
}

impl LoginError {
    pub fn kind(&self) -> &'static str {
        match self {
            LoginError::AuthRequired { .. } => "AUTH_REQUIRED",
            LoginError::AuthExpired { .. } => "AUTH_EXPIRED",
            LoginError::ConfigRead { .. } => "CONFIG_READ_FAILED",
            LoginError::ConfigWrite { .. } => "CONFIG_WRITE_FAILED",
            LoginError::InsecurePermissions { .. } => "CONFIG_INSECURE_PERMISSIONS",
            LoginError::ConfigPathInvalid { .. } => "CONFIG_PATH_INVALID",
            LoginError::Exchange(_) => "EXCHANGE_FAILED",
            LoginError::IdentityRefresh { .. } => "IDENTITY_REFRESH_FAILED",
            LoginError::RefreshInterrupted { .. } => "TOKEN_REFRESH_FAILED",
        }
    }

    /// Whether the user has to sign in again to recover.
    pub fn requires_sign_in(&self) -> bool {
        matches!(
            self,
            LoginError::AuthRequired { .. } | LoginError::AuthExpired { .. }
        )
    }

    /// Network cause, when one exists.
    pub fn net_cause(&self) -> Option<&NetError> {
        match self {
            LoginError::Exchange(err) => Some(err),
            LoginError::IdentityRefresh { cause, .. } => cause.as_ref(),
            _ => None,
        }
    }
}
