//! Mock of the capsule endpoints.

use std::sync::Arc;

use serde_json::json;
use vibecodr_login::TokenSource;
use vibecodr_net::OriginAllowlist;
use vibecodr_net::ResilienceOptions;
use vibecodr_net::ResilientClient;
use vibecodr_publish::PlatformApi;
use vibecodr_publish::Publisher;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;

pub async fn start_mock_platform() -> MockServer {
    MockServer::start().await
}

/// Fast client: no retries, short backoff.
pub fn test_client() -> ResilientClient {
    #[allow(clippy::expect_used)]
    ResilientClient::new(ResilienceOptions::from_millis(5_000, 0, 5)).expect("HTTP client builds")
}

pub fn allowlist_for(server: &MockServer) -> OriginAllowlist {
    OriginAllowlist::empty().with_api_origin(&server.uri())
}

pub fn publisher_for(server: &MockServer, tokens: Arc<dyn TokenSource>) -> Publisher {
    #[allow(clippy::expect_used)]
    let api = PlatformApi::new(test_client(), allowlist_for(server), &server.uri())
        .expect("mock server origin is allowlisted");
    Publisher::new(api, tokens)
}

pub fn upload_path(capsule_id: &str, file_path: &str) -> String {
    format!(
        "/capsules/{}/files/{}",
        urlencoding::encode(capsule_id),
        urlencoding::encode(file_path)
    )
}

pub fn publish_path(capsule_id: &str) -> String {
    format!("/capsules/{}/publish", urlencoding::encode(capsule_id))
}

pub fn create_ok(capsule_id: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "capsuleId": capsule_id,
    }))
}

pub fn upload_ok(file_path: &str, size: usize) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "ok": true,
        "path": file_path,
        "size": size,
        "totalSize": size,
        "etag": format!("\"etag-{size}\""),
    }))
}

pub fn publish_ok(post_id: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "postId": post_id }))
}

pub async fn mount_create(server: &MockServer, capsule_id: &str) {
    Mock::given(method("POST"))
        .and(path("/capsules/empty"))
        .respond_with(create_ok(capsule_id))
        .mount(server)
        .await;
}

pub async fn mount_upload(
    server: &MockServer,
    capsule_id: &str,
    file_path: &str,
    response: ResponseTemplate,
) {
    Mock::given(method("PUT"))
        .and(path(upload_path(capsule_id, file_path)))
        .respond_with(response)
        .mount(server)
        .await;
}

pub async fn mount_publish(server: &MockServer, capsule_id: &str, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path(publish_path(capsule_id)))
        .respond_with(response)
        .mount(server)
        .await;
}

/// Request paths the server saw, in arrival order.
pub async fn request_paths(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|request| format!("{} {}", request.method, request.url.path()))
        .collect()
}
