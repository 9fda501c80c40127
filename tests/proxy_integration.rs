//! Interactive (`/proxy`) endpoint integration tests
//!
//! Drives the running service over real websocket connections, playing
//! both the `ai_backend` and `frontend` roles against an ephemeral
//! listener, the way this lineage's own socket-driven tests do.

use std::net::SocketAddr;
use std::time::Duration;

use audio_proxy::{build_router, AppState, Config};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

async fn spawn_server(config: Config) -> SocketAddr {
    let state = AppState::new(config);
    let router = build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn test_config() -> Config {
    Config {
        proxy_upstream_chunk_bytes: 16 * 1024,
        ..Config::default()
    }
}

async fn recv_json(
    stream: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> Value {
    match stream.next().await.expect("stream closed").unwrap() {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected text frame, got {other:?}"),
    }
}

#[tokio::test]
async fn s1_interactive_round_trip() {
    let addr = spawn_server(test_config()).await;

    let (mut backend, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/proxy"))
        .await
        .expect("backend connect");
    backend
        .send(Message::Text(json!({"client_type": "ai_backend"}).to_string()))
        .await
        .unwrap();

    let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/proxy"))
        .await
        .expect("client connect");
    client
        .send(Message::Text(json!({"client_type": "frontend"}).to_string()))
        .await
        .unwrap();

    let info = recv_json(&mut client).await;
    assert_eq!(info["type"], "session_info");
    let session_id = info["content"]["session_id"].as_str().unwrap().to_string();

    // 32 KiB of binary in 1 KiB frames.
    for _ in 0..32 {
        client
            .send(Message::Binary(vec![0x11u8; 1024]))
            .await
            .unwrap();
    }

    // The 16 KiB threshold is crossed twice within 32 KiB; assert on
    // cumulative bytes and id rather than a single frame, matching the
    // documented threshold choice.
    let mut total = 0usize;
    while total < 32 * 1024 {
        match tokio::time::timeout(Duration::from_secs(2), backend.next())
            .await
            .expect("backend frame timed out")
            .unwrap()
            .unwrap()
        {
            Message::Binary(frame) => {
                assert!(frame.len() > 16, "frame must carry a non-empty payload");
                let id_bytes = &frame[..16];
                let id = uuid::Uuid::from_slice(id_bytes).unwrap().to_string();
                assert_eq!(id, session_id);
                total += frame.len() - 16;
            }
            other => panic!("expected binary frame, got {other:?}"),
        }
    }
    assert_eq!(total, 32 * 1024);

    // Downstream: backend addresses the client by session id.
    let id_bytes = uuid::Uuid::parse_str(&session_id).unwrap();
    let mut downstream = Vec::with_capacity(16 + 1024);
    downstream.extend_from_slice(id_bytes.as_bytes());
    downstream.extend_from_slice(&[0xAAu8; 1024]);
    backend.send(Message::Binary(downstream)).await.unwrap();

    match client.next().await.unwrap().unwrap() {
        Message::Binary(bytes) => {
            assert_eq!(bytes.len(), 1024);
            assert!(bytes.iter().all(|&b| b == 0xAA));
        }
        other => panic!("expected binary frame, got {other:?}"),
    }
}

#[tokio::test]
async fn s2_duplicate_backend_rejected() {
    let addr = spawn_server(test_config()).await;

    let (mut first, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/proxy"))
        .await
        .unwrap();
    first
        .send(Message::Text(json!({"client_type": "ai_backend"}).to_string()))
        .await
        .unwrap();

    let (mut second, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/proxy"))
        .await
        .unwrap();
    second
        .send(Message::Text(json!({"client_type": "ai_backend"}).to_string()))
        .await
        .unwrap();

    match second.next().await.unwrap().unwrap() {
        Message::Text(text) => {
            let body: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(body["type"], "error");
        }
        other => panic!("expected text error frame, got {other:?}"),
    }
    match second.next().await {
        None => {}
        Some(Err(_)) => {}
        Some(Ok(other)) => panic!("expected the connection to close, got {other:?}"),
    }

    // The first backend is unaffected: a client can still route through it.
    let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/proxy"))
        .await
        .unwrap();
    client
        .send(Message::Text(json!({"client_type": "frontend"}).to_string()))
        .await
        .unwrap();
    let info = recv_json(&mut client).await;
    assert_eq!(info["type"], "session_info");
}

#[tokio::test]
async fn s4_audio_complete_flushes_below_threshold() {
    let addr = spawn_server(test_config()).await;

    let (mut backend, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/proxy"))
        .await
        .unwrap();
    backend
        .send(Message::Text(json!({"client_type": "ai_backend"}).to_string()))
        .await
        .unwrap();

    let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/proxy"))
        .await
        .unwrap();
    client
        .send(Message::Text(json!({"client_type": "frontend"}).to_string()))
        .await
        .unwrap();
    recv_json(&mut client).await;

    client
        .send(Message::Binary(vec![0x22u8; 1024]))
        .await
        .unwrap();
    client
        .send(Message::Text(json!({"command": "audio_complete"}).to_string()))
        .await
        .unwrap();

    match tokio::time::timeout(Duration::from_secs(2), backend.next())
        .await
        .expect("flush timed out")
        .unwrap()
        .unwrap()
    {
        Message::Binary(frame) => assert_eq!(frame.len(), 16 + 1024),
        other => panic!("expected binary frame, got {other:?}"),
    }
}

#[tokio::test]
async fn s5_heartbeat_is_acked_with_no_side_effects() {
    let addr = spawn_server(test_config()).await;

    let (mut backend, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/proxy"))
        .await
        .unwrap();
    backend
        .send(Message::Text(json!({"client_type": "ai_backend"}).to_string()))
        .await
        .unwrap();

    backend
        .send(Message::Text(json!({"type": "heartbeat"}).to_string()))
        .await
        .unwrap();

    match tokio::time::timeout(Duration::from_secs(2), backend.next())
        .await
        .expect("heartbeat ack timed out")
        .unwrap()
        .unwrap()
    {
        Message::Text(text) => {
            let body: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(body["type"], "heartbeat_ack");
        }
        other => panic!("expected text frame, got {other:?}"),
    }
}
