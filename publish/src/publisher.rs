//! Create -> upload -> publish, with resumable failures.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;
use vibecodr_login::TokenSource;
use vibecodr_net::NetError;
use vibecodr_net::OriginAllowlist;
use vibecodr_net::OriginRole;

use crate::api::PlatformApi;
use crate::bundle::BundleLimits;
use crate::bundle::FileEntry;
use crate::bundle::Visibility;
use crate::bundle::check_entry;
use crate::bundle::validate_bundle;
use crate::error::PublishError;
use crate::error::PublishStep;
use crate::error::Recovery;

#[derive(Debug, Clone, Default)]
pub struct PublishRequest {
    pub title: String,
    pub files: Vec<FileEntry>,
    pub entry: Option<String>,
    pub runner: Option<String>,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    pub success: bool,
    pub post_id: String,
    pub capsule_id: String,
    pub url: String,
}

/// Runs the publish sequence for one bundle at a time.
pub struct Publisher {
    api: PlatformApi,
    tokens: Arc<dyn TokenSource>,
    limits: BundleLimits,
    player_origin: String,
}

impl Publisher {
    pub fn new(api: PlatformApi, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            api,
            tokens,
            limits: BundleLimits::default(),
            player_origin: vibecodr_common::DEFAULT_PLAYER_BASE.to_string(),
        }
    }

    /// Use `player_base` for result URLs. It must be an allowlisted player origin.
    pub fn with_player_base(
        mut self,
        allowlist: &OriginAllowlist,
        player_base: &str,
    ) -> Result<Self, NetError> {
        let url = allowlist.check(OriginRole::Player, player_base)?;
        self.player_origin = url.origin().ascii_serialization();
        Ok(self)
    }

    /// Publish a new capsule from `request`.
    pub async fn publish(&self, request: &PublishRequest) -> Result<PublishOutcome, PublishError> {
        self.validate(&request.files, request.entry.as_deref())?;

        let api = &self.api;
        let title = request.title.as_str();
        let entry = request.entry.as_deref();
        let runner = request.runner.as_deref();
        let capsule_id = self
            .call(PublishStep::CreateCapsule, None, move |token| async move {
                api.create_capsule(&token, title, entry, runner).await
            })
            .await
            .map_err(|cause| {
                PublishError::incomplete(
                    PublishStep::CreateCapsule,
                    None,
                    Vec::new(),
                    false,
                    Recovery::None,
                    cause,
                )
            })?;
        info!(%capsule_id, files = request.files.len(), "capsule created");

        self.upload_and_publish(&capsule_id, &request.files, &HashSet::new(), request.visibility)
            .await
    }

    /// Resume an interrupted upload into `capsule_id`, skipping files the
    /// server already confirmed, then publish.
    pub async fn retry_upload(
        &self,
        capsule_id: &str,
        files: &[FileEntry],
        skip_paths: &[String],
        visibility: Visibility,
    ) -> Result<PublishOutcome, PublishError> {
        self.validate(files, None)?;
        let skip: HashSet<&str> = skip_paths.iter().map(String::as_str).collect();
        info!(capsule_id, skipped = skip.len(), "resuming upload");
        self.upload_and_publish(capsule_id, files, &skip, visibility)
            .await
    }

    /// Publish a capsule whose files are all uploaded.
    pub async fn retry_publish(
        &self,
        capsule_id: &str,
        visibility: Visibility,
    ) -> Result<PublishOutcome, PublishError> {
        let post_id = self.finalize(capsule_id, visibility).await.map_err(|cause| {
            PublishError::incomplete(
                PublishStep::Publish,
                Some(capsule_id),
                Vec::new(),
                true,
                Recovery::RetryPublish,
                cause,
            )
        })?;
        Ok(self.outcome(capsule_id, post_id))
    }

    fn validate(&self, files: &[FileEntry], entry: Option<&str>) -> Result<(), PublishError> {
        let mut result = validate_bundle(files, &self.limits);
        result.issues.extend(check_entry(files, entry));
        if result.issues.is_empty() {
            Ok(())
        } else {
            Err(PublishError::Validation {
                issues: result.issues,
            })
        }
    }

    async fn upload_and_publish(
        &self,
        capsule_id: &str,
        files: &[FileEntry],
        skip: &HashSet<&str>,
        visibility: Visibility,
    ) -> Result<PublishOutcome, PublishError> {
        let mut uploaded: Vec<String> = Vec::with_capacity(files.len());

        for file in files {
            if skip.contains(file.path.as_str()) {
                debug!(path = %file.path, "already uploaded; skipping");
                uploaded.push(file.path.clone());
                continue;
            }

            let api = &self.api;
            let result = self
                .call(PublishStep::UploadFiles, Some(&file.path), move |token| async move {
                    api.upload_file(&token, capsule_id, file, None).await
                })
                .await;
            match result {
                Ok(receipt) => {
                    debug!(
                        path = %receipt.path,
                        size = receipt.size,
                        total_size = receipt.total_size,
                        "file uploaded"
                    );
                    uploaded.push(file.path.clone());
                }
                Err(cause) => {
                    warn!(
                        capsule_id,
                        path = %file.path,
                        uploaded = uploaded.len(),
                        "upload interrupted"
                    );
                    return Err(PublishError::incomplete(
                        PublishStep::UploadFiles,
                        Some(capsule_id),
                        uploaded,
                        false,
                        Recovery::RetryUpload,
                        cause,
                    ));
                }
            }
        }

        let post_id = self
            .finalize(capsule_id, visibility)
            .await
            .map_err(|cause| {
                warn!(capsule_id, "all files uploaded but publish failed");
                PublishError::incomplete(
                    PublishStep::Publish,
                    Some(capsule_id),
                    uploaded,
                    true,
                    Recovery::RetryPublish,
                    cause,
                )
            })?;
        Ok(self.outcome(capsule_id, post_id))
    }

    async fn finalize(&self, capsule_id: &str, visibility: Visibility) -> Result<String, PublishError> {
        let api = &self.api;
        let post_id = self
            .call(PublishStep::Publish, None, move |token| async move {
                api.publish_capsule(&token, capsule_id, visibility).await
            })
            .await?;
        info!(capsule_id, %post_id, %visibility, "capsule published");
        Ok(post_id)
    }

    fn outcome(&self, capsule_id: &str, post_id: String) -> PublishOutcome {
        PublishOutcome {
            success: true,
            url: format!(
                "{}/player/{}",
                self.player_origin,
                urlencoding::encode(&post_id)
            ),
            post_id,
            capsule_id: capsule_id.to_string(),
        }
    }

    /// Run one platform call. An authentication failure forces exactly one
    /// token refresh and one retry.
    async fn call<T, F, Fut>(
        &self,
        step: PublishStep,
        path: Option<&str>,
        mut operation: F,
    ) -> Result<T, PublishError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, NetError>>,
    {
        let token = self.tokens.token(false).await.map_err(PublishError::Auth)?;
        match operation(token.token).await {
            Ok(value) => Ok(value),
            Err(err) if err.is_auth_failure() => {
                debug!(%step, status = ?err.status(), "token rejected; refreshing once");
                let token = self.tokens.token(true).await.map_err(PublishError::Auth)?;
                operation(token.token)
                    .await
                    .map_err(|err| PublishError::from_net(step, path, err))
            }
            Err(err) => Err(PublishError::from_net(step, path, err)),
        }
    }
}
