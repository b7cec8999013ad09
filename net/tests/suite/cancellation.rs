use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use vibecodr_net::ResilienceOptions;
use vibecodr_net::ResilientClient;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;

async fn slow_server(delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(delay))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn whole_call_times_out() {
    let server = slow_server(Duration::from_millis(800)).await;
    let client = ResilientClient::new(ResilienceOptions::default()).unwrap();
    let request = client.http().get(server.uri()).build().unwrap();

    let err = client
        .request_with_resilience(request, &ResilienceOptions::from_millis(100, 3, 10), None)
        .await
        .unwrap_err();

    assert_eq!("FETCH_TIMEOUT", err.kind());
}

#[tokio::test]
async fn timeout_includes_backoff_sleeps() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let client = ResilientClient::new(ResilienceOptions::default()).unwrap();
    let request = client.http().get(server.uri()).build().unwrap();

    let err = client
        .request_with_resilience(request, &ResilienceOptions::from_millis(200, 3, 1_000), None)
        .await
        .unwrap_err();

    assert_eq!("FETCH_TIMEOUT", err.kind());
    assert_eq!(1, server.received_requests().await.unwrap().len());
}

#[tokio::test]
async fn caller_cancellation_is_reported_as_aborted() {
    let server = slow_server(Duration::from_secs(2)).await;
    let client = ResilientClient::new(ResilienceOptions::default()).unwrap();
    let request = client.http().get(server.uri()).build().unwrap();
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = client
        .request_with_resilience(request, &ResilienceOptions::default(), Some(&token))
        .await
        .unwrap_err();

    assert_eq!("ABORTED", err.kind());
}

#[tokio::test]
async fn already_cancelled_token_makes_no_request() {
    let server = slow_server(Duration::ZERO).await;
    let client = ResilientClient::new(ResilienceOptions::default()).unwrap();
    let request = client.http().get(server.uri()).build().unwrap();
    let token = CancellationToken::new();
    token.cancel();

    let err = client
        .request_with_resilience(request, &ResilienceOptions::default(), Some(&token))
        .await
        .unwrap_err();

    assert_eq!("ABORTED", err.kind());
    assert_eq!(0, server.received_requests().await.unwrap().len());
}
