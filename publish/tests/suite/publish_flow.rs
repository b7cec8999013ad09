use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use vibecodr_login::CredentialManager;
use vibecodr_publish::FileEntry;
use vibecodr_publish::PlatformApi;
use vibecodr_publish::PublishOutcome;
use vibecodr_publish::PublishRequest;
use vibecodr_publish::Publisher;
use vibecodr_publish::Visibility;
use vibecodr_test_support::ScriptedTokens;
use vibecodr_test_support::platform::allowlist_for;
use vibecodr_test_support::platform::mount_create;
use vibecodr_test_support::platform::mount_publish;
use vibecodr_test_support::platform::mount_upload;
use vibecodr_test_support::platform::publish_ok;
use vibecodr_test_support::platform::publisher_for;
use vibecodr_test_support::platform::request_paths;
use vibecodr_test_support::platform::start_mock_platform;
use vibecodr_test_support::platform::test_client;
use vibecodr_test_support::platform::upload_ok;
use vibecodr_test_support::platform::upload_path;
use vibecodr_test_support::write_credentials;
use wiremock::Mock;
use wiremock::ResponseTemplate;
use wiremock::matchers::body_json;
use wiremock::matchers::header;
use wiremock::matchers::method;
use wiremock::matchers::path;

const APP: &str = "export default function App() { return <h1>hi</h1>; }";

fn demo_request() -> PublishRequest {
    PublishRequest {
        title: "Demo".to_string(),
        files: vec![FileEntry::text("App.tsx", APP)],
        entry: Some("App.tsx".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn publishes_single_file_bundle() {
    let server = start_mock_platform().await;
    Mock::given(method("POST"))
        .and(path("/capsules/empty"))
        .and(header("authorization", "Bearer token-1"))
        .and(body_json(json!({ "title": "Demo", "entry": "App.tsx" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "capsuleId": "cap-1",
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_upload(&server, "cap-1", "App.tsx", upload_ok("App.tsx", APP.len())).await;
    mount_publish(&server, "cap-1", publish_ok("post-1")).await;

    let tokens = ScriptedTokens::new("token-1", "token-2");
    let publisher = publisher_for(&server, tokens.clone());
    let outcome = publisher.publish(&demo_request()).await.unwrap();

    assert_eq!(
        PublishOutcome {
            success: true,
            post_id: "post-1".to_string(),
            capsule_id: "cap-1".to_string(),
            url: "https://vibecodr.space/player/post-1".to_string(),
        },
        outcome
    );
    assert_eq!(
        vec![
            "POST /capsules/empty".to_string(),
            "PUT /capsules/cap-1/files/App.tsx".to_string(),
            "POST /capsules/cap-1/publish".to_string(),
        ],
        request_paths(&server).await
    );
    assert_eq!(0, tokens.forced_refreshes());
}

#[tokio::test]
async fn uploads_carry_bytes_and_content_type() {
    let server = start_mock_platform().await;
    mount_create(&server, "cap-1").await;
    mount_upload(&server, "cap-1", "src/App.tsx", upload_ok("src/App.tsx", 6)).await;
    mount_upload(&server, "cap-1", "logo.png", upload_ok("logo.png", 3)).await;
    mount_publish(&server, "cap-1", publish_ok("post-1")).await;

    let publisher = publisher_for(&server, ScriptedTokens::new("token-1", "token-2"));
    let request = PublishRequest {
        title: "Nested".to_string(),
        files: vec![
            FileEntry::text("src/App.tsx", "export"),
            FileEntry::binary("logo.png", vec![0x89, 0x50, 0x4e]),
        ],
        ..Default::default()
    };
    publisher.publish(&request).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let uploads: Vec<_> = requests.iter().filter(|r| r.method.as_str() == "PUT").collect();
    assert_eq!(2, uploads.len());

    assert_eq!(upload_path("cap-1", "src/App.tsx"), uploads[0].url.path());
    assert_eq!(b"export".to_vec(), uploads[0].body);
    assert_eq!(
        "text/typescript; charset=utf-8",
        uploads[0].headers.get("content-type").unwrap().to_str().unwrap()
    );

    assert_eq!(vec![0x89, 0x50, 0x4e], uploads[1].body);
    assert_eq!(
        "image/png",
        uploads[1].headers.get("content-type").unwrap().to_str().unwrap()
    );
}

#[tokio::test]
async fn non_public_visibility_is_sent_on_publish() {
    let server = start_mock_platform().await;
    mount_create(&server, "cap-1").await;
    mount_upload(&server, "cap-1", "App.tsx", upload_ok("App.tsx", APP.len())).await;
    Mock::given(method("POST"))
        .and(path("/capsules/cap-1/publish"))
        .and(body_json(json!({ "visibility": "unlisted" })))
        .respond_with(publish_ok("post-9"))
        .expect(1)
        .mount(&server)
        .await;

    let publisher = publisher_for(&server, ScriptedTokens::new("token-1", "token-2"));
    let request = PublishRequest {
        visibility: Visibility::Unlisted,
        ..demo_request()
    };
    let outcome = publisher.publish(&request).await.unwrap();
    assert_eq!("post-9", outcome.post_id);
}

#[tokio::test]
async fn invalid_bundle_makes_no_network_calls() {
    let server = start_mock_platform().await;
    let tokens = ScriptedTokens::new("token-1", "token-2");
    let publisher = publisher_for(&server, tokens.clone());

    let request = PublishRequest {
        title: "Bad".to_string(),
        files: vec![
            FileEntry::text("../escape.js", ""),
            FileEntry::text("__vibecodr/meta.json", "{}"),
        ],
        entry: Some("main.tsx".to_string()),
        ..Default::default()
    };
    let err = publisher.publish(&request).await.unwrap_err();

    assert_eq!("VALIDATION_FAILED", err.kind());
    let message = err.to_string();
    assert!(message.contains("../escape.js"), "{message}");
    assert!(message.contains("reserved"), "{message}");
    assert!(message.contains("main.tsx"), "{message}");
    assert!(request_paths(&server).await.is_empty());
    assert_eq!(0, tokens.calls());
}

#[tokio::test]
async fn player_url_uses_configured_player_origin() {
    let server = start_mock_platform().await;
    mount_create(&server, "cap-1").await;
    mount_upload(&server, "cap-1", "App.tsx", upload_ok("App.tsx", APP.len())).await;
    mount_publish(&server, "cap-1", publish_ok("post 1")).await;

    let allowlist = allowlist_for(&server).with_player_origin("https://preview.vibecodr.test");
    let api = PlatformApi::new(test_client(), allowlist.clone(), &server.uri()).unwrap();
    let publisher = Publisher::new(api, ScriptedTokens::new("token-1", "token-2"))
        .with_player_base(&allowlist, "https://preview.vibecodr.test/some/path")
        .unwrap();

    let outcome = publisher.publish(&demo_request()).await.unwrap();
    assert_eq!("https://preview.vibecodr.test/player/post%201", outcome.url);
}

#[tokio::test]
async fn unlisted_player_origin_is_rejected() {
    let server = start_mock_platform().await;
    let allowlist = allowlist_for(&server);
    let api = PlatformApi::new(test_client(), allowlist.clone(), &server.uri()).unwrap();
    let err = Publisher::new(api, ScriptedTokens::new("token-1", "token-2"))
        .with_player_base(&allowlist, "https://evil.example")
        .err()
        .unwrap();
    assert_eq!("ORIGIN_NOT_ALLOWED", err.kind());
}

#[tokio::test]
async fn publishes_with_stored_credentials() {
    let server = start_mock_platform().await;
    Mock::given(method("POST"))
        .and(path("/capsules/empty"))
        .and(header("authorization", "Bearer stored-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "capsuleId": "cap-7",
        })))
        .mount(&server)
        .await;
    mount_upload(&server, "cap-7", "App.tsx", upload_ok("App.tsx", APP.len())).await;
    mount_publish(&server, "cap-7", publish_ok("post-7")).await;

    let dir = TempDir::new().unwrap();
    let store = write_credentials(dir.path(), &server.uri(), "stored-token", 900);
    let manager = CredentialManager::new(store, test_client(), allowlist_for(&server));
    let publisher = publisher_for(&server, Arc::new(manager));

    let outcome = publisher.publish(&demo_request()).await.unwrap();
    assert_eq!("cap-7", outcome.capsule_id);
    assert_eq!("post-7", outcome.post_id);
}
