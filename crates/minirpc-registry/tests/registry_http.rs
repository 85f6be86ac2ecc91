//! Registry HTTP contract and the heartbeat/discovery cycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use minirpc_core::{RpcError, DEFAULT_REGISTRY_PATH, SERVERS_HEADER, SERVER_HEADER};
use minirpc_registry::{heartbeat, Registry};
use minirpc_xclient::{Discovery, RegistryDiscovery, SelectMode};

/// Starts a registry on a random port; returns its endpoint URL.
async fn start_registry(timeout: Duration) -> String {
    let registry = Arc::new(Registry::new(timeout));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(registry.serve(listener));
    format!("http://{addr}{DEFAULT_REGISTRY_PATH}")
}

fn servers_header(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(SERVERS_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn test_get_empty_registry() {
    let url = start_registry(Duration::from_secs(60)).await;
    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(servers_header(&response), "");
}

#[tokio::test]
async fn test_post_then_get_sorted() {
    let url = start_registry(Duration::from_secs(60)).await;
    let http = reqwest::Client::new();

    for addr in ["tcp@zzz:1", "tcp@aaa:1"] {
        let response = http.post(&url).header(SERVER_HEADER, addr).send().await.unwrap();
        assert_eq!(response.status(), 200);
    }

    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(servers_header(&response), "tcp@aaa:1,tcp@zzz:1");
}

#[tokio::test]
async fn test_post_without_header_is_500() {
    let url = start_registry(Duration::from_secs(60)).await;
    let response = reqwest::Client::new().post(&url).send().await.unwrap();
    assert_eq!(response.status(), 500);
}

#[tokio::test]
async fn test_other_methods_are_405() {
    let url = start_registry(Duration::from_secs(60)).await;
    let response = reqwest::Client::new().delete(&url).send().await.unwrap();
    assert_eq!(response.status(), 405);
}

#[tokio::test]
async fn test_wrong_path_is_404() {
    let url = start_registry(Duration::from_secs(60)).await;
    let wrong = url.replace(DEFAULT_REGISTRY_PATH, "/elsewhere");
    let response = reqwest::get(&wrong).await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_expired_server_drops_off_the_list() {
    let url = start_registry(Duration::from_millis(150)).await;
    let http = reqwest::Client::new();

    http.post(&url)
        .header(SERVER_HEADER, "tcp@fleeting:1")
        .send()
        .await
        .unwrap();
    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(servers_header(&response), "tcp@fleeting:1");

    tokio::time::sleep(Duration::from_millis(300)).await;
    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(servers_header(&response), "");
}

#[tokio::test]
async fn test_heartbeat_keeps_server_alive_until_stopped() {
    let url = start_registry(Duration::from_millis(600)).await;
    let server_addr = "tcp@127.0.0.1:7777";

    let beats = heartbeat(&url, server_addr, Duration::from_millis(200)).await.unwrap();

    // A tight refresh window so every get_all really polls the registry.
    let discovery = RegistryDiscovery::new(url.clone(), Duration::from_millis(10));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        discovery.get_all().await.unwrap(),
        vec![server_addr.to_string()]
    );
    assert_eq!(
        discovery.get(SelectMode::RoundRobin).await.unwrap(),
        server_addr.to_string()
    );

    // Survives past the TTL while the heartbeat keeps running.
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(
        discovery.get_all().await.unwrap(),
        vec![server_addr.to_string()]
    );

    // Stop the heartbeat; the entry expires.
    beats.abort();
    tokio::time::sleep(Duration::from_millis(900)).await;
    match discovery.get_all().await {
        Err(RpcError::NoAvailableServers) => {}
        other => panic!("expected empty registry, got {other:?}"),
    }
}

#[tokio::test]
async fn test_first_heartbeat_failure_is_returned() {
    match heartbeat("http://127.0.0.1:1/none", "tcp@a:1", Duration::from_secs(1)).await {
        Err(RpcError::Registry(_)) => {}
        Ok(_) => panic!("heartbeat to a dead registry should fail"),
        Err(e) => panic!("unexpected error: {e}"),
    }
}
