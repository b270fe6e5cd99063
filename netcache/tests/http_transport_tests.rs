use mockito::{Matcher, Server, ServerGuard};
use netcache::cache::{AdaptiveCache, AdaptiveCacheConfig};
use netcache::core::{NetworkError, SharedClock, system_clock};
use netcache::network::{
    HttpTransport, NetworkRequest, Priority, RequestScheduler, SchedulerConfig, Transport,
};
use netcache::persistence::MemoryStore;
use std::sync::Arc;
use std::time::Duration;

async fn setup_scheduler() -> (RequestScheduler, ServerGuard) {
    let server = Server::new_async().await;
    let clock: SharedClock = system_clock();
    let cache = AdaptiveCache::new(
        AdaptiveCacheConfig::default(),
        Arc::new(MemoryStore::new()),
        Arc::clone(&clock),
    )
    .unwrap();
    let scheduler = RequestScheduler::new(
        SchedulerConfig {
            base_delay_ms: 10,
            default_timeout_ms: 5_000,
            ..Default::default()
        },
        cache,
        Arc::new(HttpTransport::new().unwrap()),
        clock,
    )
    .unwrap();
    (scheduler, server)
}

#[tokio::test]
async fn test_http_transport_sends_headers_and_body() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/items")
        .match_header("x-trace", "abc")
        .match_body(Matcher::Exact(r#"{"name":"widget"}"#.to_string()))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":7}"#)
        .create_async()
        .await;

    let transport = HttpTransport::new().unwrap();
    let request = NetworkRequest::post(
        format!("{}/api/items", server.url()),
        r#"{"name":"widget"}"#,
    )
    .with_header("x-trace", "abc");

    let response = transport.send(&request).await.unwrap();
    assert_eq!(response.status, 201);
    assert_eq!(response.body, r#"{"id":7}"#);
    assert_eq!(
        response.headers.get("content-type").map(String::as_str),
        Some("application/json")
    );

    mock.assert_async().await;
}

#[tokio::test]
async fn test_scheduler_caches_get_responses() {
    let (scheduler, mut server) = setup_scheduler().await;
    let mock = server
        .mock("GET", "/users/1")
        .with_status(200)
        .with_body(r#"{"id":1,"name":"ana"}"#)
        .expect(1)
        .create_async()
        .await;

    let url = format!("{}/users/1", server.url());
    let first = scheduler.submit(NetworkRequest::get(&url)).await.unwrap();
    assert!(!first.served_from_cache);

    let second = scheduler
        .submit(NetworkRequest::get(&url).with_priority(Priority::High))
        .await
        .unwrap();
    assert!(second.served_from_cache);
    let user: serde_json::Value = second.json().unwrap();
    assert_eq!(user["name"], "ana");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_scheduler_retries_server_errors() {
    let (scheduler, mut server) = setup_scheduler().await;
    let mock = server
        .mock("GET", "/flaky")
        .with_status(503)
        .with_body("unavailable")
        .expect(3)
        .create_async()
        .await;

    let err = scheduler
        .submit(NetworkRequest::get(format!("{}/flaky", server.url())).with_max_retries(2))
        .await
        .unwrap_err();
    match err {
        NetworkError::Status { status, message } => {
            assert_eq!(status, 503);
            assert_eq!(message, "unavailable");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(scheduler.stats().retries, 2);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_scheduler_does_not_retry_client_errors() {
    let (scheduler, mut server) = setup_scheduler().await;
    let mock = server
        .mock("GET", "/missing")
        .with_status(404)
        .expect(1)
        .create_async()
        .await;

    let err = scheduler
        .submit(NetworkRequest::get(format!("{}/missing", server.url())))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(404));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    let (scheduler, _server) = setup_scheduler().await;

    // Port 9 (discard) is not expected to be listening
    let err = scheduler
        .submit(
            NetworkRequest::get("http://127.0.0.1:9/")
                .with_max_retries(0)
                .with_timeout(Duration::from_secs(2)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, NetworkError::Transport(_) | NetworkError::Timeout(_)));

    let pools = scheduler.pool_stats();
    assert_eq!(pools[0].host, "127.0.0.1:9");
    assert_eq!(pools[0].current_connections, 0);
}
