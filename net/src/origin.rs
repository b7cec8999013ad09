//! Destination allowlisting for bearer-carrying requests.

use url::Url;

use crate::error::NetError;

pub const DEFAULT_API_ORIGINS: &[&str] = &[
    "https://api.vibecodr.space",
    "https://api.staging.vibecodr.space",
    "http://localhost:8787",
    "http://127.0.0.1:8787",
];

pub const DEFAULT_PLAYER_ORIGINS: &[&str] = &[
    "https://vibecodr.space",
    "https://staging.vibecodr.space",
    "http://localhost:3000",
    "http://127.0.0.1:3000",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginRole {
    Api,
    Player,
}

/// Result of validating a configured base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginValidation {
    pub valid: bool,
    pub origin: Option<String>,
    pub reason: Option<String>,
}

/// Exact-match origin allowlist, one list per role. Unknown origins are denied.
#[derive(Debug, Clone)]
pub struct OriginAllowlist {
    api: Vec<String>,
    player: Vec<String>,
}

impl Default for OriginAllowlist {
    fn default() -> Self {
        Self {
            api: DEFAULT_API_ORIGINS.iter().map(ToString::to_string).collect(),
            player: DEFAULT_PLAYER_ORIGINS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl OriginAllowlist {
    /// An allowlist that denies everything; mostly useful in tests.
    pub fn empty() -> Self {
        Self {
            api: Vec::new(),
            player: Vec::new(),
        }
    }

    /// Allow an extra API origin. Invalid or credential-bearing URLs are ignored.
    pub fn with_api_origin(mut self, origin: &str) -> Self {
        if let Some(origin) = canonical_origin(origin) {
            tracing::debug!(%origin, "adding API origin to allowlist");
            self.api.push(origin);
        } else {
            tracing::warn!("ignoring invalid API origin in allowlist configuration");
        }
        self
    }

    pub fn with_player_origin(mut self, origin: &str) -> Self {
        if let Some(origin) = canonical_origin(origin) {
            tracing::debug!(%origin, "adding player origin to allowlist");
            self.player.push(origin);
        } else {
            tracing::warn!("ignoring invalid player origin in allowlist configuration");
        }
        self
    }

    fn origins(&self, role: OriginRole) -> &[String] {
        match role {
            OriginRole::Api => &self.api,
            OriginRole::Player => &self.player,
        }
    }

    /// Parse `raw` and verify its origin is allowed for `role`.
    pub fn check(&self, role: OriginRole, raw: &str) -> Result<Url, NetError> {
        let url = parse_strict(raw)?;
        let origin = url.origin().ascii_serialization();
        if self.origins(role).iter().any(|allowed| *allowed == origin) {
            Ok(url)
        } else {
            Err(NetError::OriginNotAllowed {
                url: origin,
                reason: "origin is not in the allowlist".to_string(),
            })
        }
    }

    /// Validate a configured base URL without raising.
    pub fn validate(&self, role: OriginRole, raw: &str) -> OriginValidation {
        match self.check(role, raw) {
            Ok(url) => OriginValidation {
                valid: true,
                origin: Some(url.origin().ascii_serialization()),
                reason: None,
            },
            Err(NetError::OriginNotAllowed { url, reason }) => OriginValidation {
                valid: false,
                origin: (!url.is_empty()).then_some(url),
                reason: Some(reason),
            },
            Err(other) => OriginValidation {
                valid: false,
                origin: None,
                reason: Some(other.to_string()),
            },
        }
    }

    /// Join `path` onto an allowed base, re-checking the result stays on the same origin.
    pub fn join(&self, role: OriginRole, base: &str, path: &str) -> Result<Url, NetError> {
        let base = self.check(role, base)?;
        let base_origin = base.origin();
        let mut base = base;
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        let joined = base
            .join(path.trim_start_matches('/'))
            .map_err(|err| NetError::InvalidRequest {
                message: format!("cannot build request URL: {err}"),
            })?;
        if joined.origin() != base_origin {
            return Err(NetError::OriginNotAllowed {
                url: joined.origin().ascii_serialization(),
                reason: "joined URL escaped the base origin".to_string(),
            });
        }
        Ok(joined)
    }
}

/// Validate an API base URL against the default allowlist.
pub fn validate_api_base(raw: &str) -> OriginValidation {
    OriginAllowlist::default().validate(OriginRole::Api, raw)
}

fn parse_strict(raw: &str) -> Result<Url, NetError> {
    let reject = |reason: &str| NetError::OriginNotAllowed {
        url: String::new(),
        reason: reason.to_string(),
    };

    if raw.contains('\\') {
        return Err(reject("URL contains a backslash"));
    }
    let url = Url::parse(raw.trim()).map_err(|_| reject("URL could not be parsed"))?;
    if !url.username().is_empty() || url.password().is_some() {
        return Err(reject("URL embeds credentials"));
    }
    if !matches!(url.scheme(), "http" | "https") {
        return Err(reject("URL scheme must be http or https"));
    }
    if url.host_str().is_none() {
        return Err(reject("URL has no host"));
    }
    Ok(url)
}

fn canonical_origin(raw: &str) -> Option<String> {
    parse_strict(raw)
        .ok()
        .map(|url| url.origin().ascii_serialization())
}
