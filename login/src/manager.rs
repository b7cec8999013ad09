//! Produces valid platform tokens on demand, with at most one refresh in
//! flight per API base.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::Shared;
use tracing::debug;
use tracing::info;
use tracing::warn;
use vibecodr_net::NetError;
use vibecodr_net::OriginAllowlist;
use vibecodr_net::ResilienceOptions;
use vibecodr_net::ResilientClient;

use crate::error::LoginError;
use crate::exchange::exchange_identity_token;
use crate::oidc::refresh_identity;
use crate::record::CredentialRecord;
use crate::record::PlatformToken;
use crate::storage::CredentialStore;

type RefreshResult = Result<PlatformToken, LoginError>;
type RefreshFuture = Shared<BoxFuture<'static, RefreshResult>>;
type SlotMap = Arc<Mutex<HashMap<String, RefreshFuture>>>;

/// Per-call knobs for [`CredentialManager::get_valid_token`].
#[derive(Debug, Clone, Default)]
pub struct GetTokenOptions {
    /// API to mint the token for; defaults to the record's `apiBase`.
    pub api_base: Option<String>,
    /// Required remaining lifetime. Never below 10 seconds.
    pub min_valid_seconds: i64,
    /// Skip the freshness check and always exchange.
    pub force_refresh: bool,
}

/// What the credential file says, without exposing any token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialStatus {
    pub has_credentials: bool,
    pub expires_at: Option<i64>,
    pub is_expired: bool,
}

/// Anything that can hand out a platform bearer token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// A usable token; `force_refresh` bypasses any cached token.
    async fn token(&self, force_refresh: bool) -> Result<PlatformToken, LoginError>;
}

/// Owns the credential lifecycle for one credential file.
#[derive(Clone)]
pub struct CredentialManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: CredentialStore,
    client: ResilientClient,
    allowlist: OriginAllowlist,
    options: ResilienceOptions,
    defaults: GetTokenOptions,
    in_flight: RefreshSlots,
}

impl CredentialManager {
    pub fn new(store: CredentialStore, client: ResilientClient, allowlist: OriginAllowlist) -> Self {
        Self::with_defaults(store, client, allowlist, GetTokenOptions::default())
    }

    /// Like [`CredentialManager::new`], with the options the [`TokenSource`]
    /// implementation uses.
    pub fn with_defaults(
        store: CredentialStore,
        client: ResilientClient,
        allowlist: OriginAllowlist,
        defaults: GetTokenOptions,
    ) -> Self {
        let options = client.options();
        Self {
            inner: Arc::new(Inner {
                store,
                client,
                allowlist,
                options,
                defaults,
                in_flight: RefreshSlots::default(),
            }),
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    /// A platform token valid for at least `max(min_valid_seconds, 10)` seconds.
    ///
    /// The record is re-read on every call. A fresh stored token is returned
    /// without touching the network; otherwise the call joins (or starts) the
    /// in-flight refresh for its API base.
    pub async fn get_valid_token(
        &self,
        options: &GetTokenOptions,
    ) -> Result<PlatformToken, LoginError> {
        let record = self.inner.load_required()?;
        let api_base = options
            .api_base
            .clone()
            .unwrap_or_else(|| record.api_base.clone());

        if !options.force_refresh
            && api_base == record.api_base
            && let Some(token) =
                record.usable_platform_token(Utc::now().timestamp(), options.min_valid_seconds)
        {
            debug!("stored platform token is still fresh");
            return Ok(token);
        }

        self.refresh(api_base).await
    }

    /// Summary of the stored record.
    pub fn status(&self) -> Result<CredentialStatus, LoginError> {
        credential_status(&self.inner.store)
    }

    /// Forget the stored credentials.
    pub fn clear(&self) -> Result<bool, LoginError> {
        self.inner.store.clear()
    }

    fn refresh(&self, api_base: String) -> RefreshFuture {
        let inner = Arc::clone(&self.inner);
        let key = api_base.clone();
        self.inner.in_flight.join_or_start(&key, move || {
            async move { inner.run_refresh(&api_base).await }.boxed()
        })
    }
}

/// Summary of the record in `store`, without exposing any token.
pub fn credential_status(store: &CredentialStore) -> Result<CredentialStatus, LoginError> {
    let Some(record) = store.load()? else {
        return Ok(CredentialStatus {
            has_credentials: false,
            expires_at: None,
            is_expired: true,
        });
    };
    let now = Utc::now().timestamp();
    Ok(CredentialStatus {
        has_credentials: true,
        expires_at: record.platform_expires_at,
        is_expired: record.platform_expires_at.is_none_or(|at| at <= now),
    })
}

/// Refreshes in flight, keyed by the API base they exchange at.
#[derive(Default)]
struct RefreshSlots {
    slots: SlotMap,
}

impl RefreshSlots {
    /// Join the refresh running for `api_base`, or run `start()` as that refresh.
    fn join_or_start(
        &self,
        api_base: &str,
        start: impl FnOnce() -> BoxFuture<'static, RefreshResult>,
    ) -> RefreshFuture {
        let mut slots = lock(&self.slots);
        if let Some(existing) = slots.get(api_base) {
            debug!(api_base, "joining in-flight token refresh");
            return existing.clone();
        }

        let release = SlotRelease {
            slots: Arc::clone(&self.slots),
            api_base: api_base.to_string(),
        };
        let refresh = start();
        let shared = async move {
            let _release = release;
            AssertUnwindSafe(refresh)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    warn!("token refresh panicked");
                    Err(LoginError::RefreshInterrupted {
                        message: "the refresh task panicked".to_string(),
                    })
                })
        }
        .boxed()
        .shared();
        slots.insert(api_base.to_string(), shared.clone());
        shared
    }
}

/// Empties its slot when the refresh settles or is dropped.
struct SlotRelease {
    slots: SlotMap,
    api_base: String,
}

impl Drop for SlotRelease {
    fn drop(&mut self) {
        let settled = lock(&self.slots).remove(&self.api_base);
        // Released outside the lock.
        drop(settled);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl TokenSource for CredentialManager {
    async fn token(&self, force_refresh: bool) -> Result<PlatformToken, LoginError> {
        let options = GetTokenOptions {
            force_refresh,
            ..self.inner.defaults.clone()
        };
        self.get_valid_token(&options).await
    }
}

impl Inner {
    fn load_required(&self) -> Result<CredentialRecord, LoginError> {
        self.store
            .load()?
            .ok_or_else(|| LoginError::AuthRequired {
                path: self.store.path().to_path_buf(),
            })
    }

    async fn run_refresh(&self, api_base: &str) -> Result<PlatformToken, LoginError> {
        let mut record = self.load_required()?;
        info!(api_base, "refreshing platform token");

        let first = self.exchange(api_base, &record.identity_token).await;
        let err = match first {
            Ok(token) => return self.persist_platform_token(record, api_base, token),
            Err(err) => err,
        };

        let now = Utc::now().timestamp();
        if !err.is_auth_failure() && !record.identity_is_stale(now) {
            return Err(LoginError::Exchange(err));
        }
        debug!(status = ?err.status(), "identity token looks stale");

        let refresh_token = match record.identity_refresh_token.clone() {
            Some(token) if record.can_refresh_identity() => token,
            _ => {
                return Err(LoginError::AuthExpired {
                    reason: "identity token expired and no refresh token is stored".to_string(),
                });
            }
        };

        let identity = refresh_identity(
            &self.client,
            &record.issuer,
            &record.client_id,
            &refresh_token,
            &self.options,
            None,
        )
        .await?;

        record.identity_token = identity.access_token;
        if let Some(rotated) = identity.refresh_token {
            record.identity_refresh_token = Some(rotated);
        }
        record.identity_expires_at = identity.expires_at;
        record.updated_at = Utc::now();
        self.store.save(&record)?;
        info!("identity session renewed");

        match self.exchange(api_base, &record.identity_token).await {
            Ok(token) => self.persist_platform_token(record, api_base, token),
            Err(err) if err.is_auth_failure() => Err(LoginError::AuthExpired {
                reason: "platform rejected the renewed identity token".to_string(),
            }),
            Err(err) => Err(LoginError::Exchange(err)),
        }
    }

    async fn exchange(&self, api_base: &str, identity_token: &str) -> Result<PlatformToken, NetError> {
        exchange_identity_token(
            &self.client,
            &self.allowlist,
            api_base,
            identity_token,
            &self.options,
            None,
        )
        .await
    }

    fn persist_platform_token(
        &self,
        mut record: CredentialRecord,
        api_base: &str,
        token: PlatformToken,
    ) -> Result<PlatformToken, LoginError> {
        record.api_base = api_base.to_string();
        let record = record.with_platform_token(&token, Utc::now());
        self.store.save(&record)?;
        info!(expires_at = token.expires_at, "platform token refreshed");
        Ok(token)
    }
}
