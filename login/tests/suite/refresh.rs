use std::time::Duration;

use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use vibecodr_login::CredentialManager;
use vibecodr_login::CredentialRecord;
use vibecodr_login::CredentialStore;
use vibecodr_login::GetTokenOptions;
use vibecodr_login::TokenSource;
use vibecodr_net::OriginAllowlist;
use vibecodr_net::ResilienceOptions;
use vibecodr_net::ResilientClient;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::body_json;
use wiremock::matchers::body_string_contains;
use wiremock::matchers::method;
use wiremock::matchers::path;

struct Fixture {
    _dir: TempDir,
    server: MockServer,
    store: CredentialStore,
    manager: CredentialManager,
}

fn record_for(server: &MockServer) -> CredentialRecord {
    let now = Utc::now().timestamp();
    CredentialRecord {
        identity_token: "id-old".to_string(),
        identity_refresh_token: Some("refresh-1".to_string()),
        identity_expires_at: now + 3_600,
        platform_token: Some("platform-old".to_string()),
        platform_expires_at: Some(now + 600),
        issuer: server.uri(),
        client_id: "vibecodr-cli".to_string(),
        api_base: server.uri(),
        updated_at: Utc::now(),
    }
}

async fn fixture(edit: impl FnOnce(&mut CredentialRecord)) -> Fixture {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let store = CredentialStore::new(dir.path().join("cli.json"));
    let mut record = record_for(&server);
    edit(&mut record);
    store.save(&record).unwrap();

    let client = ResilientClient::new(ResilienceOptions::from_millis(5_000, 0, 5)).unwrap();
    let allowlist = OriginAllowlist::empty().with_api_origin(&server.uri());
    let manager = CredentialManager::new(store.clone(), client, allowlist);
    Fixture {
        _dir: dir,
        server,
        store,
        manager,
    }
}

fn expire_platform_token(record: &mut CredentialRecord) {
    record.platform_expires_at = Some(Utc::now().timestamp() - 5);
}

fn exchange_ok(identity: &str, platform: &str) -> Mock {
    Mock::given(method("POST"))
        .and(path("/auth/cli/exchange"))
        .and(body_json(json!({ "access_token": identity })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": platform,
            "expires_at": Utc::now().timestamp() + 900,
        })))
}

async fn mount_identity_provider(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_endpoint": format!("{}/oauth/token", server.uri()),
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .respond_with(response)
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn fresh_token_makes_no_network_calls() {
    let fx = fixture(|_| {}).await;

    let first = fx.manager.get_valid_token(&GetTokenOptions::default()).await.unwrap();
    let second = fx.manager.get_valid_token(&GetTokenOptions::default()).await.unwrap();

    assert_eq!("platform-old", first.token);
    assert_eq!(first, second);
    assert_eq!(0, fx.server.received_requests().await.unwrap().len());
}

#[tokio::test]
async fn concurrent_callers_share_one_exchange() {
    let fx = fixture(expire_platform_token).await;
    Mock::given(method("POST"))
        .and(path("/auth/cli/exchange"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "access_token": "platform-new",
                    "expires_at": Utc::now().timestamp() + 900,
                }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&fx.server)
        .await;

    let options = GetTokenOptions::default();
    let other = fx.manager.clone();
    let (a, b) = tokio::join!(
        fx.manager.get_valid_token(&options),
        other.get_valid_token(&options)
    );

    let a = a.unwrap();
    assert_eq!("platform-new", a.token);
    assert_eq!(a, b.unwrap());

    let saved = fx.store.load().unwrap().unwrap();
    assert_eq!(Some("platform-new".to_string()), saved.platform_token);
}

#[tokio::test]
async fn slot_clears_after_a_failed_refresh() {
    let fx = fixture(expire_platform_token).await;
    Mock::given(method("POST"))
        .and(path("/auth/cli/exchange"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "boom"})))
        .up_to_n_times(1)
        .mount(&fx.server)
        .await;
    exchange_ok("id-old", "platform-new").mount(&fx.server).await;

    let err = fx
        .manager
        .get_valid_token(&GetTokenOptions::default())
        .await
        .unwrap_err();
    assert_eq!("EXCHANGE_FAILED", err.kind());
    assert_eq!(Some(500), err.net_cause().and_then(|cause| cause.status()));

    let token = fx.manager.get_valid_token(&GetTokenOptions::default()).await.unwrap();
    assert_eq!("platform-new", token.token);
}

#[tokio::test]
async fn force_refresh_bypasses_a_fresh_token() {
    let fx = fixture(|_| {}).await;
    exchange_ok("id-old", "platform-forced")
        .expect(1)
        .mount(&fx.server)
        .await;

    let token = fx.manager.token(true).await.unwrap();
    assert_eq!("platform-forced", token.token);
}

#[tokio::test]
async fn stale_identity_is_refreshed_then_exchange_retried() {
    let fx = fixture(expire_platform_token).await;
    Mock::given(method("POST"))
        .and(path("/auth/cli/exchange"))
        .and(body_json(json!({ "access_token": "id-old" })))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "Identity token expired",
            "code": "token_expired",
        })))
        .expect(1)
        .mount(&fx.server)
        .await;
    mount_identity_provider(
        &fx.server,
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "id-new",
            "refresh_token": "refresh-2",
            "expires_in": 3600,
        })),
    )
    .await;
    exchange_ok("id-new", "platform-new")
        .expect(1)
        .mount(&fx.server)
        .await;

    let token = fx.manager.get_valid_token(&GetTokenOptions::default()).await.unwrap();
    assert_eq!("platform-new", token.token);

    let saved = fx.store.load().unwrap().unwrap();
    assert_eq!("id-new", saved.identity_token);
    assert_eq!(Some("refresh-2".to_string()), saved.identity_refresh_token);
    assert_eq!(Some("platform-new".to_string()), saved.platform_token);
}

#[tokio::test]
async fn stale_identity_without_refresh_token_requires_sign_in() {
    let fx = fixture(|record| {
        expire_platform_token(record);
        record.identity_refresh_token = None;
    })
    .await;
    Mock::given(method("POST"))
        .and(path("/auth/cli/exchange"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&fx.server)
        .await;

    let err = fx
        .manager
        .get_valid_token(&GetTokenOptions::default())
        .await
        .unwrap_err();
    assert_eq!("AUTH_EXPIRED", err.kind());
    assert!(err.requires_sign_in());
}

#[tokio::test]
async fn rejected_refresh_token_requires_sign_in() {
    let fx = fixture(expire_platform_token).await;
    Mock::given(method("POST"))
        .and(path("/auth/cli/exchange"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&fx.server)
        .await;
    mount_identity_provider(
        &fx.server,
        ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})),
    )
    .await;

    let err = fx
        .manager
        .get_valid_token(&GetTokenOptions::default())
        .await
        .unwrap_err();
    assert_eq!("AUTH_EXPIRED", err.kind());
}

#[tokio::test]
async fn expiring_identity_counts_as_stale_even_without_401() {
    let fx = fixture(|record| {
        expire_platform_token(record);
        record.identity_expires_at = Utc::now().timestamp() + 30;
        record.identity_refresh_token = None;
    })
    .await;
    Mock::given(method("POST"))
        .and(path("/auth/cli/exchange"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&fx.server)
        .await;

    let err = fx
        .manager
        .get_valid_token(&GetTokenOptions::default())
        .await
        .unwrap_err();
    assert_eq!("AUTH_EXPIRED", err.kind());
}

#[tokio::test]
async fn unlisted_api_base_is_refused() {
    let fx = fixture(expire_platform_token).await;
    let err = fx
        .manager
        .get_valid_token(&GetTokenOptions {
            api_base: Some("https://evil.example".to_string()),
            ..GetTokenOptions::default()
        })
        .await
        .unwrap_err();

    assert_eq!("EXCHANGE_FAILED", err.kind());
    assert_eq!(
        Some("ORIGIN_NOT_ALLOWED"),
        err.net_cause().map(vibecodr_net::NetError::kind)
    );
    assert_eq!(0, fx.server.received_requests().await.unwrap().len());
}

#[tokio::test]
async fn concurrent_refreshes_for_different_api_bases_stay_separate() {
    let fx = fixture(expire_platform_token).await;
    let other = MockServer::start().await;
    for (server, platform) in [(&fx.server, "platform-a"), (&other, "platform-b")] {
        Mock::given(method("POST"))
            .and(path("/auth/cli/exchange"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "access_token": platform,
                        "expires_at": Utc::now().timestamp() + 900,
                    }))
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(server)
            .await;
    }
    let manager = CredentialManager::new(
        fx.store.clone(),
        ResilientClient::new(ResilienceOptions::from_millis(5_000, 0, 5)).unwrap(),
        OriginAllowlist::empty()
            .with_api_origin(&fx.server.uri())
            .with_api_origin(&other.uri()),
    );

    let for_a = GetTokenOptions {
        api_base: Some(fx.server.uri()),
        ..GetTokenOptions::default()
    };
    let for_b = GetTokenOptions {
        api_base: Some(other.uri()),
        ..GetTokenOptions::default()
    };
    let (a, b) = tokio::join!(manager.get_valid_token(&for_a), manager.get_valid_token(&for_b));

    assert_eq!("platform-a", a.unwrap().token);
    assert_eq!("platform-b", b.unwrap().token);
}

#[tokio::test]
async fn abandoned_refresh_leaves_the_manager_usable() {
    let fx = fixture(expire_platform_token).await;
    Mock::given(method("POST"))
        .and(path("/auth/cli/exchange"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "access_token": "platform-new",
                    "expires_at": Utc::now().timestamp() + 900,
                }))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&fx.server)
        .await;

    let manager = fx.manager.clone();
    let abandoned =
        tokio::spawn(async move { manager.get_valid_token(&GetTokenOptions::default()).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    abandoned.abort();
    assert!(abandoned.await.unwrap_err().is_cancelled());

    let token = fx.manager.get_valid_token(&GetTokenOptions::default()).await.unwrap();
    assert_eq!("platform-new", token.token);
}

#[tokio::test]
async fn out_of_range_exchange_expiry_is_rejected_and_not_saved() {
    let fx = fixture(expire_platform_token).await;
    Mock::given(method("POST"))
        .and(path("/auth/cli/exchange"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "platform-bogus",
            "expires_at": i64::MIN,
        })))
        .expect(2)
        .mount(&fx.server)
        .await;

    for _ in 0..2 {
        let err = fx
            .manager
            .get_valid_token(&GetTokenOptions::default())
            .await
            .unwrap_err();
        assert_eq!("EXCHANGE_FAILED", err.kind());
        assert_eq!(
            Some("JSON_PARSE_FAILED"),
            err.net_cause().map(vibecodr_net::NetError::kind)
        );
    }
    let saved = fx.store.load().unwrap().unwrap();
    assert_eq!(Some("platform-old".to_string()), saved.platform_token);
}

#[tokio::test]
async fn huge_identity_lifetime_is_capped() {
    let fx = fixture(expire_platform_token).await;
    Mock::given(method("POST"))
        .and(path("/auth/cli/exchange"))
        .and(body_json(json!({ "access_token": "id-old" })))
        .respond_with(ResponseTemplate::new(401))
        .mount(&fx.server)
        .await;
    mount_identity_provider(
        &fx.server,
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "id-new",
            "expires_in": i64::MAX,
        })),
    )
    .await;
    exchange_ok("id-new", "platform-new").mount(&fx.server).await;

    let token = fx.manager.get_valid_token(&GetTokenOptions::default()).await.unwrap();
    assert_eq!("platform-new", token.token);

    let saved = fx.store.load().unwrap().unwrap();
    assert!(saved.identity_expires_at <= Utc::now().timestamp() + 30 * 24 * 3_600);
    assert!(saved.identity_expires_at > Utc::now().timestamp());
}

#[tokio::test]
async fn non_positive_identity_lifetime_is_a_refresh_failure() {
    let fx = fixture(expire_platform_token).await;
    Mock::given(method("POST"))
        .and(path("/auth/cli/exchange"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&fx.server)
        .await;
    mount_identity_provider(
        &fx.server,
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "id-new",
            "expires_in": 0,
        })),
    )
    .await;

    let err = fx
        .manager
        .get_valid_token(&GetTokenOptions::default())
        .await
        .unwrap_err();
    assert_eq!("IDENTITY_REFRESH_FAILED", err.kind());
    assert_eq!("id-old", fx.store.load().unwrap().unwrap().identity_token);
}

#[tokio::test]
async fn missing_discovery_document_is_not_a_rejected_session() {
    let fx = fixture(expire_platform_token).await;
    Mock::given(method("POST"))
        .and(path("/auth/cli/exchange"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&fx.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&fx.server)
        .await;

    let err = fx
        .manager
        .get_valid_token(&GetTokenOptions::default())
        .await
        .unwrap_err();
    assert_eq!("IDENTITY_REFRESH_FAILED", err.kind());
    assert!(!err.requires_sign_in());
    assert_eq!(Some(404), err.net_cause().and_then(|cause| cause.status()));
}
