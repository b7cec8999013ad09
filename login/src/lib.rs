//! Credential lifecycle for the vibecodr CLI.
//!
//! The persisted record holds a long-lived identity session and a short-lived
//! platform token minted from it. [`CredentialManager`] hands out platform
//! tokens, refreshing through the exchange endpoint (and, when the identity
//! session itself is stale, the identity provider) with at most one refresh
//! in flight per manager.

mod error;
mod exchange;
mod manager;
mod oidc;
mod permissions;
mod record;
mod storage;

use std::path::Path;

use tracing::info;
use vibecodr_net::OriginAllowlist;
use vibecodr_net::ResilienceOptions;
use vibecodr_net::ResilientClient;

pub use error::LoginError;
pub use exchange::EXCHANGE_PATH;
pub use exchange::exchange_identity_token;
pub use manager::CredentialManager;
pub use manager::CredentialStatus;
pub use manager::GetTokenOptions;
pub use manager::TokenSource;
pub use manager::credential_status;
pub use oidc::IdentityTokens;
pub use oidc::refresh_identity;
pub use permissions::PermissionCheck;
pub use permissions::check_owner_only;
pub use permissions::insecure_acl_entries;
pub use record::CredentialRecord;
pub use record::IDENTITY_STALE_WINDOW_SECS;
pub use record::MIN_FRESHNESS_FLOOR_SECS;
pub use record::PlatformToken;
pub use storage::CREDENTIALS_FILE;
pub use storage::ConfigPath;
pub use storage::CredentialStore;
pub use storage::default_credentials_path;
pub use storage::validate_config_path;

/// One-shot helper: a valid platform token for `api_base` from the credential
/// file at `config_path` (or the default location).
pub async fn ensure_auth(
    api_base: &str,
    config_path: Option<&Path>,
    verbose: bool,
    min_valid_seconds: i64,
) -> Result<PlatformToken, LoginError> {
    let store = CredentialStore::open(config_path)?;
    let client =
        ResilientClient::new(ResilienceOptions::default()).map_err(LoginError::Exchange)?;
    let manager = CredentialManager::new(store, client, OriginAllowlist::default());
    let token = manager
        .get_valid_token(&GetTokenOptions {
            api_base: Some(api_base.to_string()),
            min_valid_seconds,
            force_refresh: false,
        })
        .await?;
    if verbose {
        info!(
            api_base,
            expires_at = token.expires_at,
            "authenticated with the platform"
        );
    }
    Ok(token)
}

/// Status of the credential file at `config_path` (or the default location).
/// Never exposes a token.
pub fn stored_credential_status(config_path: Option<&Path>) -> Result<CredentialStatus, LoginError> {
    credential_status(&CredentialStore::open(config_path)?)
}
