use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use vibecodr_login::LoginError;
use vibecodr_net::NetError;

use crate::bundle::BundleIssue;

/// Step of the publish sequence a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStep {
    CreateCapsule,
    UploadFiles,
    Publish,
}

impl fmt::Display for PublishStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PublishStep::CreateCapsule => "capsule creation",
            PublishStep::UploadFiles => "file upload",
            PublishStep::Publish => "publish",
        })
    }
}

/// What the caller can do to resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    /// Start over.
    None,
    /// Call `retry_upload` with the same capsule and the uploaded paths as skip-list.
    RetryUpload,
    /// Every file is uploaded; only `retry_publish` is needed.
    RetryPublish,
}

#[derive(Debug, Clone, Error)]
pub enum PublishError {
    #[error("bundle is invalid: {}", join_issues(issues))]
    Validation { issues: Vec<BundleIssue> },

    #[error("failed to create capsule: {0}")]
    CapsuleCreate(#[source] NetError),

    #[error("failed to upload {path}: {source}")]
    FileUpload {
        path: String,
        #[source]
        source: NetError,
    },

    #[error("blocked by platform security checks: {}", describe_block(reasons, tags))]
    SecurityBlock {
        path: Option<String>,
        reasons: Vec<String>,
        tags: Vec<String>,
    },

    #[error(
        "rate limited by the platform{}",
        retry_after.map(|d| format!("; retry in {}s", d.as_secs())).unwrap_or_default()
    )]
    RateLimited { retry_after: Option<Duration> },

    #[error("failed to publish capsule: {0}")]
    CapsulePublish(#[source] NetError),

    #[error("could not obtain credentials: {0}")]
    Auth(#[source] LoginError),

    #[error("platform rejected the credentials: {0}")]
    Unauthorized(#[source] NetError),

    #[error("{0}")]
    Incomplete(#[source] Box<PublishFailure>),
}

/// A failure with the progress made so far.
#[derive(Debug, Clone)]
pub struct PublishFailure {
    pub step: PublishStep,
    pub capsule_id: Option<String>,
    /// Paths the server confirmed, in upload order.
    pub uploaded_paths: Vec<String>,
    pub all_files_uploaded: bool,
    pub recovery: Recovery,
    pub cause: PublishError,
}

impl fmt::Display for PublishFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "publish failed during {}: {}", self.step, self.cause)
    }
}

impl std::error::Error for PublishFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

impl PublishError {
    pub fn kind(&self) -> &'static str {
        match self {
            PublishError::Validation { .. } => "VALIDATION_FAILED",
            PublishError::CapsuleCreate(_) => "CAPSULE_CREATE_FAILED",
            PublishError::FileUpload { .. } => "FILE_UPLOAD_FAILED",
            PublishError::SecurityBlock { .. } => "SECURITY_BLOCK",
            PublishError::RateLimited { .. } => "RATE_LIMITED",
            PublishError::CapsulePublish(_) => "CAPSULE_PUBLISH_FAILED",
            PublishError::Auth(_) | PublishError::Unauthorized(_) => "AUTH_FAILED",
            PublishError::Incomplete(_) => "PUBLISH_FAILED",
        }
    }

    /// The root cause, looking through any progress wrapper.
    pub fn innermost(&self) -> &PublishError {
        match self {
            PublishError::Incomplete(failure) => failure.cause.innermost(),
            other => other,
        }
    }

    pub fn failure(&self) -> Option<&PublishFailure> {
        match self {
            PublishError::Incomplete(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn recovery(&self) -> Recovery {
        self.failure().map_or(Recovery::None, |failure| failure.recovery)
    }

    pub fn can_retry_upload(&self) -> bool {
        self.recovery() == Recovery::RetryUpload
    }

    pub fn can_retry_publish(&self) -> bool {
        self.recovery() == Recovery::RetryPublish
    }

    pub(crate) fn incomplete(
        step: PublishStep,
        capsule_id: Option<&str>,
        uploaded_paths: Vec<String>,
        all_files_uploaded: bool,
        recovery: Recovery,
        cause: PublishError,
    ) -> Self {
        PublishError::Incomplete(Box::new(PublishFailure {
            step,
            capsule_id: capsule_id.map(str::to_string),
            uploaded_paths,
            all_files_uploaded,
            recovery,
            cause,
        }))
    }

    /// Map a network failure in `step` to its publish-level meaning.
    pub(crate) fn from_net(step: PublishStep, path: Option<&str>, err: NetError) -> Self {
        if let Some(body) = err.error_body()
            && err.status() == Some(403)
            && (!body.reasons.is_empty() || !body.tags.is_empty())
        {
            return PublishError::SecurityBlock {
                path: path.map(str::to_string),
                reasons: body.reasons.clone(),
                tags: body.tags.clone(),
            };
        }
        if err.is_rate_limited() {
            return PublishError::RateLimited {
                retry_after: err.retry_after(),
            };
        }
        if err.is_auth_failure() {
            return PublishError::Unauthorized(err);
        }
        match step {
            PublishStep::CreateCapsule => PublishError::CapsuleCreate(err),
            PublishStep::UploadFiles => PublishError::FileUpload {
                path: path.unwrap_or_default().to_string(),
                source: err,
            },
            PublishStep::Publish => PublishError::CapsulePublish(err),
        }
    }
}

fn join_issues(issues: &[BundleIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn describe_block(reasons: &[String], tags: &[String]) -> String {
    let mut text = if reasons.is_empty() {
        "no reason given".to_string()
    } else {
        reasons.join(", ")
    };
    if !tags.is_empty() {
        text.push_str(&format!(" [{}]", tags.join(", ")));
    }
    text
}
