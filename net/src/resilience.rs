//! Timeout, cancellation and retry around a single logical HTTP call.

use std::error::Error as _;
use std::time::Duration;

use reqwest::Request;
use reqwest::RequestBuilder;
use reqwest::Response;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;
use url::Url;
use vibecodr_async_utils::Aborted;
use vibecodr_async_utils::OrAbortExt;
use vibecodr_async_utils::sleep_or_abort;

use crate::error::ApiErrorBody;
use crate::error::NetError;
use crate::error::TransportKind;
use crate::error::summarize_body;
use crate::retry_after::parse_retry_after;

/// Largest exponent used for backoff; keeps the multiplication finite.
const MAX_BACKOFF_EXPONENT: u32 = 16;

pub const USER_AGENT: &str = concat!("vibecodr-cli/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResilienceOptions {
    /// Bound on the whole call, every attempt and backoff sleep included.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for ResilienceOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl ResilienceOptions {
    pub fn from_millis(timeout_ms: u64, max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms),
            max_retries,
            base_delay: Duration::from_millis(base_delay_ms),
        }
    }

    /// Delay before retry number `retry` (1-based): `base_delay * 2^(retry-1)`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 502 | 503 | 504)
}

/// HTTP client with a bounded, retrying, cancellable request path.
#[derive(Debug, Clone)]
pub struct ResilientClient {
    http: reqwest::Client,
    options: ResilienceOptions,
}

impl ResilientClient {
    /// Fails when the TLS backend cannot be initialised.
    pub fn new(options: ResilienceOptions) -> Result<Self, NetError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| NetError::InvalidRequest {
                message: format!("failed to build HTTP client: {err}"),
            })?;
        Ok(Self { http, options })
    }

    /// Underlying client, for building requests.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn options(&self) -> ResilienceOptions {
        self.options
    }

    /// Finish a request builder, mapping construction failures.
    pub fn build(builder: RequestBuilder) -> Result<Request, NetError> {
        builder.build().map_err(|err| NetError::InvalidRequest {
            message: err.to_string(),
        })
    }

    /// Send `request`, retrying transient failures until `options` are exhausted.
    ///
    /// Non-retryable responses (including 4xx and 500) are returned as-is for
    /// the caller to interpret.
    pub async fn request_with_resilience(
        &self,
        request: Request,
        options: &ResilienceOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<Response, NetError> {
        let deadline = Instant::now() + options.timeout;
        self.execute(request, options, cancel, deadline).await
    }

    /// Send `request` and decode a JSON body from a 2xx response.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        request: Request,
        options: &ResilienceOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, NetError> {
        let deadline = Instant::now() + options.timeout;
        let url = display_url(request.url());
        let response = self.execute(request, options, cancel, deadline).await?;
        let status = response.status();
        let retry_after_header = header_retry_after(&response);

        let text = response
            .text()
            .or_abort(deadline, cancel)
            .await
            .map_err(|aborted| abort_error(aborted, &url, options))?
            .map_err(|err| NetError::Transport {
                url: url.clone(),
                kind: classify_transport(&err),
                message: err.to_string(),
            })?;

        if !status.is_success() {
            let mut body = ApiErrorBody::from_body(&text);
            if body.retry_after.is_none() {
                body.retry_after = retry_after_header.map(|d| d.as_secs());
            }
            debug!(
                url = %url,
                status = status.as_u16(),
                body = %summarize_body(&text),
                "request failed"
            );
            return Err(NetError::Http {
                url,
                status: status.as_u16(),
                body,
                body_summary: summarize_body(&text),
            });
        }

        if text.trim().is_empty() {
            return Err(NetError::EmptyResponse {
                url,
                status: status.as_u16(),
            });
        }

        serde_json::from_str(&text).map_err(|err| NetError::Parse {
            url,
            status: status.as_u16(),
            message: err.to_string(),
        })
    }

    async fn execute(
        &self,
        request: Request,
        options: &ResilienceOptions,
        cancel: Option<&CancellationToken>,
        deadline: Instant,
    ) -> Result<Response, NetError> {
        let url = display_url(request.url());
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(NetError::Aborted { url });
        }

        // Streaming bodies cannot be replayed; such requests get one attempt.
        let mut original = Some(request);
        let mut attempt: u32 = 0;
        let mut last_status: Option<u16> = None;
        let mut last_error: Option<String> = None;
        let mut last_retry_after: Option<Duration> = None;

        loop {
            attempt += 1;
            let current = match original.as_ref().and_then(Request::try_clone) {
                Some(copy) => copy,
                None => match original.take() {
                    Some(request) => request,
                    None => {
                        return Err(NetError::RetryExhausted {
                            url,
                            attempts: attempt - 1,
                            last_status,
                            last_error,
                            retry_after: last_retry_after,
                        });
                    }
                },
            };

            debug!(url = %url, attempt, "sending request");
            let outcome = self
                .http
                .execute(current)
                .or_abort(deadline, cancel)
                .await
                .map_err(|aborted| abort_error(aborted, &url, options))?;

            let delay = match outcome {
                Ok(response) if is_retryable_status(response.status()) => {
                    let status = response.status();
                    last_status = Some(status.as_u16());
                    last_error = Some(format!("HTTP {status}"));
                    let hinted = if status == StatusCode::TOO_MANY_REQUESTS {
                        header_retry_after(&response)
                    } else {
                        None
                    };
                    last_retry_after = hinted.or(last_retry_after);
                    hinted.unwrap_or_else(|| options.backoff(attempt))
                }
                Ok(response) => return Ok(response),
                Err(err) => {
                    let kind = classify_transport(&err);
                    if !kind.is_transient() {
                        return Err(NetError::Transport {
                            url,
                            kind,
                            message: err.to_string(),
                        });
                    }
                    last_error = Some(format!("{}: {err}", kind.as_str()));
                    options.backoff(attempt)
                }
            };

            if attempt > options.max_retries {
                warn!(url = %url, attempts = attempt, ?last_status, "retries exhausted");
                return Err(NetError::RetryExhausted {
                    url,
                    attempts: attempt,
                    last_status,
                    last_error,
                    retry_after: last_retry_after,
                });
            }

            debug!(
                url = %url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                ?last_status,
                "retrying after transient failure"
            );
            sleep_or_abort(delay, deadline, cancel)
                .await
                .map_err(|aborted| abort_error(aborted, &url, options))?;
        }
    }
}

fn abort_error(aborted: Aborted, url: &str, options: &ResilienceOptions) -> NetError {
    match aborted {
        Aborted::TimedOut => NetError::Timeout {
            url: url.to_string(),
            timeout_ms: options.timeout.as_millis() as u64,
        },
        Aborted::Cancelled => NetError::Aborted {
            url: url.to_string(),
        },
    }
}

fn header_retry_after(response: &Response) -> Option<Duration> {
    let value = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?;
    parse_retry_after(value, chrono::Utc::now())
}

/// Classify a transport failure by walking its source chain.
pub fn classify_transport(err: &reqwest::Error) -> TransportKind {
    if err.is_timeout() {
        return TransportKind::Timeout;
    }

    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionRefused => return TransportKind::ConnectionRefused,
                std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof => return TransportKind::ConnectionReset,
                std::io::ErrorKind::TimedOut => return TransportKind::Timeout,
                _ => {}
            }
        }
        let text = inner.to_string().to_ascii_lowercase();
        if text.contains("dns error")
            || text.contains("failed to lookup address")
            || text.contains("name or service not known")
        {
            return TransportKind::Dns;
        }
        if text.contains("connection reset") || text.contains("connection closed") {
            return TransportKind::ConnectionReset;
        }
        source = inner.source();
    }

    if err.is_connect() {
        TransportKind::ConnectionRefused
    } else {
        TransportKind::Other
    }
}

/// URL as shown in errors and logs: no credentials, query or fragment.
pub fn display_url(url: &Url) -> String {
    let mut shown = url.clone();
    let _ = shown.set_username("");
    let _ = shown.set_password(None);
    shown.set_query(None);
    shown.set_fragment(None);
    shown.to_string()
}
