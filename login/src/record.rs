//! The persisted two-tier credential.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Lower bound applied to every freshness window, in seconds.
pub const MIN_FRESHNESS_FLOOR_SECS: i64 = 10;

/// Identity tokens expiring sooner than this are treated as stale.
pub const IDENTITY_STALE_WINDOW_SECS: i64 = 120;

/// On-disk credential record (`cli.json`). All expiry values are epoch seconds.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub identity_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_refresh_token: Option<String>,
    pub identity_expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_expires_at: Option<i64>,
    pub issuer: String,
    pub client_id: String,
    pub api_base: String,
    pub updated_at: DateTime<Utc>,
}

// Tokens never reach logs.
impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("identity_token", &"<redacted>")
            .field(
                "identity_refresh_token",
                &self.identity_refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("identity_expires_at", &self.identity_expires_at)
            .field("platform_token", &self.platform_token.as_ref().map(|_| "<redacted>"))
            .field("platform_expires_at", &self.platform_expires_at)
            .field("issuer", &self.issuer)
            .field("client_id", &self.client_id)
            .field("api_base", &self.api_base)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// A platform access token and its expiry (epoch seconds).
#[derive(Clone, PartialEq, Eq)]
pub struct PlatformToken {
    pub token: String,
    pub expires_at: i64,
}

impl std::fmt::Debug for PlatformToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl CredentialRecord {
    /// The stored platform token, if it stays valid for more than
    /// `max(min_valid_seconds, 10)` seconds past `now`.
    pub fn usable_platform_token(&self, now: i64, min_valid_seconds: i64) -> Option<PlatformToken> {
        let token = self.platform_token.as_ref()?;
        let expires_at = self.platform_expires_at?;
        let window = min_valid_seconds.max(MIN_FRESHNESS_FLOOR_SECS);
        (expires_at.saturating_sub(now) > window).then(|| PlatformToken {
            token: token.clone(),
            expires_at,
        })
    }

    /// Whether the identity token is expired or about to be.
    pub fn identity_is_stale(&self, now: i64) -> bool {
        self.identity_expires_at.saturating_sub(now) <= IDENTITY_STALE_WINDOW_SECS
    }

    pub fn can_refresh_identity(&self) -> bool {
        self.identity_refresh_token
            .as_deref()
            .is_some_and(|token| !token.is_empty())
    }

    pub fn with_platform_token(mut self, token: &PlatformToken, now: DateTime<Utc>) -> Self {
        self.platform_token = Some(token.token.clone());
        self.platform_expires_at = Some(token.expires_at);
        self.updated_at = now;
        self
    }
}
