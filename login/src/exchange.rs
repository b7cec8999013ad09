//! Identity token -> platform token exchange.

use chrono::DateTime;
use serde::Deserialize;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use vibecodr_net::NetError;
use vibecodr_net::OriginAllowlist;
use vibecodr_net::OriginRole;
use vibecodr_net::ResilienceOptions;
use vibecodr_net::ResilientClient;

use crate::record::PlatformToken;

pub const EXCHANGE_PATH: &str = "auth/cli/exchange";

/// Epoch values above this are taken to be milliseconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Platform tokens claiming to outlive this are rejected.
const MAX_PLATFORM_LIFETIME_SECS: i64 = 366 * 24 * 3_600;

#[derive(Serialize)]
struct ExchangeRequest<'a> {
    access_token: &'a str,
}

#[derive(Deserialize)]
struct ExchangeResponse {
    access_token: String,
    expires_at: ExpiresAt,
}

/// The platform reports expiry as epoch seconds, epoch milliseconds, or RFC 3339.
#[derive(Deserialize)]
#[serde(untagged)]
enum ExpiresAt {
    Epoch(i64),
    Fractional(f64),
    Text(String),
}

impl ExpiresAt {
    fn to_epoch_seconds(&self) -> Option<i64> {
        match self {
            ExpiresAt::Epoch(value) => Some(normalize_epoch(*value)),
            ExpiresAt::Fractional(value) if value.is_finite() => {
                Some(normalize_epoch(value.trunc() as i64))
            }
            ExpiresAt::Fractional(_) => None,
            ExpiresAt::Text(text) => match text.trim().parse::<i64>() {
                Ok(value) => Some(normalize_epoch(value)),
                Err(_) => DateTime::parse_from_rfc3339(text.trim())
                    .ok()
                    .map(|when| when.timestamp()),
            },
        }
    }
}

fn normalize_epoch(value: i64) -> i64 {
    if value > MILLIS_THRESHOLD {
        value / 1_000
    } else {
        value
    }
}

/// `expires_at` if it is positive and within a year of `now`.
fn plausible_expiry(expires_at: i64, now: i64) -> Option<i64> {
    (expires_at > 0 && expires_at <= now.saturating_add(MAX_PLATFORM_LIFETIME_SECS))
        .then_some(expires_at)
}

/// Exchange `identity_token` for a platform token at `api_base`.
pub async fn exchange_identity_token(
    client: &ResilientClient,
    allowlist: &OriginAllowlist,
    api_base: &str,
    identity_token: &str,
    options: &ResilienceOptions,
    cancel: Option<&CancellationToken>,
) -> Result<PlatformToken, NetError> {
    let url = allowlist.join(OriginRole::Api, api_base, EXCHANGE_PATH)?;
    debug!(url = %url, "exchanging identity token");

    let request = ResilientClient::build(client.http().post(url.clone()).json(&ExchangeRequest {
        access_token: identity_token,
    }))?;
    let response: ExchangeResponse = client.request_json(request, options, cancel).await?;

    let expires_at = response
        .expires_at
        .to_epoch_seconds()
        .ok_or_else(|| NetError::Parse {
            url: vibecodr_net::display_url(&url),
            status: 200,
            message: "unrecognised expires_at format".to_string(),
        })?;
    let expires_at = plausible_expiry(expires_at, chrono::Utc::now().timestamp()).ok_or_else(
        || NetError::Parse {
            url: vibecodr_net::display_url(&url),
            status: 200,
            message: format!("expires_at {expires_at} is out of range"),
        },
    )?;
    if response.access_token.is_empty() {
        return Err(NetError::Parse {
            url: vibecodr_net::display_url(&url),
            status: 200,
            message: "exchange returned an empty access_token".to_string(),
        });
    }

    Ok(PlatformToken {
        token: response.access_token,
        expires_at,
    })
}
