//! Typed wrappers for the capsule endpoints of the platform API.

use reqwest::header::CONTENT_TYPE;
use reqwest::header::IF_MATCH;
use serde::Deserialize;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;
use vibecodr_net::NetError;
use vibecodr_net::OriginAllowlist;
use vibecodr_net::OriginRole;
use vibecodr_net::ResilienceOptions;
use vibecodr_net::ResilientClient;
use vibecodr_net::ensure_safe_path;

use crate::bundle::FileEntry;
use crate::bundle::Visibility;
use crate::content_type::content_type_for;

#[derive(Serialize)]
struct CreateCapsuleBody<'a> {
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    entry: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    runner: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCapsuleResponse {
    #[serde(default = "default_true")]
    success: bool,
    capsule_id: String,
}

fn default_true() -> bool {
    true
}

/// Server acknowledgement of one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    #[serde(default)]
    pub ok: bool,
    pub path: String,
    pub size: u64,
    #[serde(default)]
    pub total_size: u64,
    #[serde(default)]
    pub etag: Option<String>,
}

#[derive(Serialize)]
struct PublishBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    visibility: Option<Visibility>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    post_id: String,
}

/// Client for `{apiBase}/capsules/...`. Every call carries a bearer token and
/// is checked against the API origin allowlist first.
#[derive(Debug, Clone)]
pub struct PlatformApi {
    client: ResilientClient,
    allowlist: OriginAllowlist,
    api_base: String,
    options: ResilienceOptions,
    cancel: Option<CancellationToken>,
}

impl PlatformApi {
    /// Fails when `api_base` is not an allowlisted API origin.
    pub fn new(
        client: ResilientClient,
        allowlist: OriginAllowlist,
        api_base: &str,
    ) -> Result<Self, NetError> {
        allowlist.check(OriginRole::Api, api_base)?;
        let options = client.options();
        Ok(Self {
            client,
            allowlist,
            api_base: api_base.to_string(),
            options,
            cancel: None,
        })
    }

    /// Abort in-flight calls when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn url(&self, path: &str) -> Result<Url, NetError> {
        self.allowlist.join(OriginRole::Api, &self.api_base, path)
    }

    /// `POST /capsules/empty` -> capsule id.
    pub async fn create_capsule(
        &self,
        token: &str,
        title: &str,
        entry: Option<&str>,
        runner: Option<&str>,
    ) -> Result<String, NetError> {
        let url = self.url("capsules/empty")?;
        debug!(url = %url, "creating capsule");
        let request = ResilientClient::build(
            self.client
                .http()
                .post(url.clone())
                .bearer_auth(token)
                .json(&CreateCapsuleBody {
                    title,
                    entry,
                    runner,
                }),
        )?;
        let response: CreateCapsuleResponse = self
            .client
            .request_json(request, &self.options, self.cancel.as_ref())
            .await?;
        if !response.success || response.capsule_id.is_empty() {
            return Err(NetError::Parse {
                url: vibecodr_net::display_url(&url),
                status: 200,
                message: "capsule creation did not return a capsule id".to_string(),
            });
        }
        Ok(response.capsule_id)
    }

    /// `PUT /capsules/{id}/files/{path}` with the raw file bytes.
    ///
    /// `if_match` makes the write conditional on the server's current ETag.
    pub async fn upload_file(
        &self,
        token: &str,
        capsule_id: &str,
        file: &FileEntry,
        if_match: Option<&str>,
    ) -> Result<UploadReceipt, NetError> {
        ensure_safe_path(&file.path)?;
        let url = self.url(&format!(
            "capsules/{}/files/{}",
            urlencoding::encode(capsule_id),
            urlencoding::encode(&file.path)
        ))?;
        debug!(url = %url, path = %file.path, size = file.size, "uploading file");

        let mut builder = self
            .client
            .http()
            .put(url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, content_type_for(&file.path, file.content_class))
            .body(file.content.clone());
        if let Some(etag) = if_match {
            builder = builder.header(IF_MATCH, quote_etag(etag));
        }

        let request = ResilientClient::build(builder)?;
        self.client
            .request_json(request, &self.options, self.cancel.as_ref())
            .await
    }

    /// `POST /capsules/{id}/publish` -> post id. Public is the server default,
    /// so no visibility is sent for it.
    pub async fn publish_capsule(
        &self,
        token: &str,
        capsule_id: &str,
        visibility: Visibility,
    ) -> Result<String, NetError> {
        let url = self.url(&format!(
            "capsules/{}/publish",
            urlencoding::encode(capsule_id)
        ))?;
        debug!(url = %url, %visibility, "publishing capsule");
        let body = PublishBody {
            visibility: (visibility != Visibility::Public).then_some(visibility),
        };
        let request = ResilientClient::build(
            self.client
                .http()
                .post(url)
                .bearer_auth(token)
                .json(&body),
        )?;
        let response: PublishResponse = self
            .client
            .request_json(request, &self.options, self.cancel.as_ref())
            .await?;
        Ok(response.post_id)
    }
}

fn quote_etag(etag: &str) -> String {
    let etag = etag.trim();
    if etag.starts_with('"') || etag.starts_with("W/\"") {
        etag.to_string()
    } else {
        format!("\"{etag}\"")
    }
}
