//! Integration tests for the bridge HTTP endpoint

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use wsbridge::server::{ErrorResponse, HealthStatus};
use wsbridge::{BridgeServer, Config, ShutdownCoordinator};

fn test_config() -> Config {
    let mut config = Config::default();
    config.server.bind_addr = "127.0.0.1:0".parse().unwrap();
    config
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

/// Address that refuses connections
async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// TCP server that echoes everything it reads
async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    addr
}

#[tokio::test]
async fn test_missing_address_is_rejected_before_dialing() {
    let server = BridgeServer::new(test_config(), CancellationToken::new()).unwrap();
    let metrics = server.state().metrics.clone();

    let response = server
        .router()
        .oneshot(Request::builder().uri("/proxy").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: ErrorResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert!(error.msg.contains("address"));
    assert_eq!(metrics.connect_attempts(), 0);
    assert_eq!(metrics.validation_failures(), 1);
}

#[tokio::test]
async fn test_malformed_address_is_rejected() {
    let server = BridgeServer::new(test_config(), CancellationToken::new()).unwrap();

    for uri in ["/proxy?address=nohost", "/proxy?address=host:0", "/proxy?address="] {
        let response = server
            .router()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "uri {}", uri);
    }
}

#[tokio::test]
async fn test_unreachable_target_returns_dial_error() {
    let server = BridgeServer::new(test_config(), CancellationToken::new()).unwrap();
    let metrics = server.state().metrics.clone();
    let target = closed_port().await;

    let response = server
        .router()
        .oneshot(
            Request::builder()
                .uri(format!("/proxy?address={}", target))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error: ErrorResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert!(error.msg.contains(&target.to_string()));
    assert_eq!(metrics.connect_attempts(), 1);
    assert_eq!(metrics.connect_failures(), 1);
    assert_eq!(metrics.handshake_failures(), 0);
}

#[tokio::test]
async fn test_plain_request_to_reachable_target_fails_upgrade() {
    let server = BridgeServer::new(test_config(), CancellationToken::new()).unwrap();
    let metrics = server.state().metrics.clone();
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_addr = target.local_addr().unwrap();

    let response = server
        .router()
        .oneshot(
            Request::builder()
                .uri(format!("/proxy?address={}", target_addr))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(metrics.connect_failures(), 0);
    assert_eq!(metrics.handshake_failures(), 1);

    // The dialed connection was released
    let (mut accepted, _) = timeout(Duration::from_secs(2), target.accept())
        .await
        .unwrap()
        .unwrap();
    let mut buf = [0u8; 1];
    let n = timeout(Duration::from_secs(2), accepted.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = BridgeServer::new(test_config(), CancellationToken::new()).unwrap();

    let response = server
        .router()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let health: HealthStatus = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.active_sessions, 0);
}

#[tokio::test]
async fn test_metrics_endpoint_can_be_disabled() {
    let server = BridgeServer::new(test_config(), CancellationToken::new()).unwrap();
    let response = server
        .router()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(text.contains("wsbridge_connect_attempts_total"));

    let mut config = test_config();
    config.monitoring.metrics_enabled = false;
    let server = BridgeServer::new(config, CancellationToken::new()).unwrap();
    let response = server
        .router()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_end_to_end_echo_and_shutdown() {
    let echo_addr = spawn_echo_server().await;
    let shutdown = CancellationToken::new();
    let server = BridgeServer::new(test_config(), shutdown.clone()).unwrap();
    let metrics = server.state().metrics.clone();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let bridge_addr = listener.local_addr().unwrap();
    let server_handle = tokio::spawn(server.serve(listener));

    let url = format!("ws://{}/proxy?address={}", bridge_addr, echo_addr);
    let (mut ws, _) = timeout(Duration::from_secs(5), tokio_tungstenite::connect_async(url))
        .await
        .unwrap()
        .unwrap();

    ws.send(Message::binary(b"hello bridge".to_vec())).await.unwrap();

    let echoed = timeout(Duration::from_secs(5), async {
        let mut received = Vec::new();
        while received.len() < 12 {
            match ws.next().await {
                Some(Ok(Message::Binary(data))) => received.extend_from_slice(&data),
                Some(Ok(_)) => continue,
                other => panic!("unexpected websocket event: {:?}", other),
            }
        }
        received
    })
    .await
    .unwrap();
    assert_eq!(echoed, b"hello bridge");
    assert_eq!(metrics.active_sessions(), 1);

    // Shutdown fires every session's lifetime signal and drains them
    shutdown.cancel();
    timeout(Duration::from_secs(5), server_handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(metrics.active_sessions(), 0);
    assert_eq!(metrics.sessions_completed(), 1);
    assert_eq!(metrics.bytes_channel_to_stream(), 12);
    assert_eq!(metrics.bytes_stream_to_channel(), 12);
}

#[tokio::test]
async fn test_run_fails_and_shuts_down_when_bind_fails() {
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = test_config();
    config.server.bind_addr = occupied.local_addr().unwrap();

    let coordinator = ShutdownCoordinator::new();
    let server = BridgeServer::new(config, coordinator.token()).unwrap();

    let result = timeout(Duration::from_secs(5), server.run(coordinator.clone()))
        .await
        .unwrap();

    let err = result.unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to bind"));
    assert!(coordinator.is_shutting_down());
}

#[tokio::test]
async fn test_run_returns_after_trigger() {
    let coordinator = ShutdownCoordinator::new();
    let server = BridgeServer::new(test_config(), coordinator.token()).unwrap();
    let handle = tokio::spawn(server.run(coordinator.clone()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    coordinator.trigger();

    timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
