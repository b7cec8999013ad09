//! OpenID Connect discovery and the `refresh_token` grant.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;
use url::Url;
use vibecodr_net::NetError;
use vibecodr_net::ResilienceOptions;
use vibecodr_net::ResilientClient;

use crate::error::LoginError;

const DISCOVERY_PATH: &str = ".well-known/openid-configuration";

#[derive(Deserialize)]
struct Discovery {
    token_endpoint: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// A renewed identity session.
#[derive(Clone)]
pub struct IdentityTokens {
    pub access_token: String,
    /// Absent when the provider does not rotate refresh tokens.
    pub refresh_token: Option<String>,
    /// Epoch seconds.
    pub expires_at: i64,
}

/// Identity tokens default to one hour when the provider omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3_600;

/// Longest identity lifetime taken at face value.
const MAX_EXPIRES_IN_SECS: i64 = 30 * 24 * 3_600;

/// Renew the identity session at `issuer` using `refresh_token`.
///
/// Only a 4xx from the token endpoint means the session is gone
/// ([`LoginError::AuthExpired`]); discovery problems and transient failures
/// surface as [`LoginError::IdentityRefresh`].
pub async fn refresh_identity(
    client: &ResilientClient,
    issuer: &str,
    client_id: &str,
    refresh_token: &str,
    options: &ResilienceOptions,
    cancel: Option<&CancellationToken>,
) -> Result<IdentityTokens, LoginError> {
    let discovery_url = discovery_url(issuer).map_err(unavailable)?;
    debug!(url = %discovery_url, "fetching OIDC discovery document");
    let discovery: Discovery = client
        .request_json(
            ResilientClient::build(client.http().get(discovery_url)).map_err(unavailable)?,
            options,
            cancel,
        )
        .await
        .map_err(unavailable)?;

    let token_endpoint = checked_token_endpoint(&discovery.token_endpoint).map_err(unavailable)?;
    let shown = vibecodr_net::display_url(&token_endpoint);
    debug!(url = %shown, "refreshing identity token");

    let form = [
        ("grant_type", "refresh_token"),
        ("client_id", client_id),
        ("refresh_token", refresh_token),
    ];
    let body = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(form)
        .finish();
    let request = ResilientClient::build(
        client
            .http()
            .post(token_endpoint)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(body),
    )
    .map_err(unavailable)?;
    let response: TokenResponse = client
        .request_json(request, options, cancel)
        .await
        .map_err(token_endpoint_error)?;

    let lifetime = identity_lifetime(response.expires_in).ok_or_else(|| {
        unavailable(NetError::Parse {
            url: shown,
            status: 200,
            message: "expires_in must be a positive number of seconds".to_string(),
        })
    })?;
    let now = chrono::Utc::now().timestamp();
    Ok(IdentityTokens {
        access_token: response.access_token,
        refresh_token: response.refresh_token.filter(|token| !token.is_empty()),
        expires_at: now.saturating_add(lifetime),
    })
}

/// Seconds the renewed identity stays valid; `None` for a non-positive value.
fn identity_lifetime(expires_in: Option<i64>) -> Option<i64> {
    match expires_in {
        None => Some(DEFAULT_EXPIRES_IN_SECS),
        Some(secs) if secs > 0 => Some(secs.min(MAX_EXPIRES_IN_SECS)),
        Some(_) => None,
    }
}

fn unavailable(err: NetError) -> LoginError {
    LoginError::IdentityRefresh {
        message: err.to_string(),
        cause: Some(err),
    }
}

fn token_endpoint_error(err: NetError) -> LoginError {
    match err.status() {
        Some(status) if (400..500).contains(&status) && status != 429 => {
            warn!(status, "identity provider rejected the refresh token");
            LoginError::AuthExpired {
                reason: format!("identity provider rejected the refresh token (HTTP {status})"),
            }
        }
        _ => unavailable(err),
    }
}

fn discovery_url(issuer: &str) -> Result<Url, NetError> {
    let mut base = checked_endpoint(issuer, "issuer")?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(DISCOVERY_PATH)
        .map_err(|err| NetError::InvalidRequest {
            message: format!("invalid issuer URL: {err}"),
        })
}

fn checked_token_endpoint(raw: &str) -> Result<Url, NetError> {
    checked_endpoint(raw, "token endpoint")
}

/// Identity endpoints must be HTTPS (loopback excepted) and carry no credentials.
fn checked_endpoint(raw: &str, what: &str) -> Result<Url, NetError> {
    let reject = |reason: String| NetError::OriginNotAllowed {
        url: String::new(),
        reason,
    };
    if raw.contains('\\') {
        return Err(reject(format!("{what} URL contains a backslash")));
    }
    let url = Url::parse(raw).map_err(|_| reject(format!("{what} URL could not be parsed")))?;
    if !url.username().is_empty() || url.password().is_some() {
        return Err(reject(format!("{what} URL embeds credentials")));
    }
    let loopback = matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));
    match url.scheme() {
        "https" => Ok(url),
        "http" if loopback => Ok(url),
        _ => Err(reject(format!("{what} must use https"))),
    }
}
