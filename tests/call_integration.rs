//! Telephony (`/call`) endpoint integration tests: container merge,
//! welcome injection, and the admin HTTP surface.

use std::net::SocketAddr;
use std::time::Duration;

use audio_proxy::audio::{synthesize, AudioFormat};
use audio_proxy::{build_router, AppState, Config};
use base64::Engine;
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
        call_upstream_chunk_bytes: 16 * 1024,
        call_downstream_chunk_bytes: 640, // two 320-byte containers trip it
        welcome_sound_path: "/nonexistent/welcome.wav".into(),
        ..Config::default()
    }
}

#[tokio::test]
async fn s3_telephony_container_merge() {
    let addr = spawn_server(test_config()).await;

    let (mut backend, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/call"))
        .await
        .unwrap();
    backend
        .send(Message::Text(json!({"client_type": "ai_backend"}).to_string()))
        .await
        .unwrap();

    let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/call"))
        .await
        .unwrap();
    client
        .send(Message::Text(
            json!({
                "client_type": "freeswitch",
                "audio_config": {"sampleRate": 24000, "channels": 1, "bitDepth": 16},
            })
            .to_string(),
        ))
        .await
        .unwrap();

    let info: Value = match client.next().await.unwrap().unwrap() {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected session_info, got {other:?}"),
    };
    assert_eq!(info["type"], "session_info");
    let call_id = info["content"]["session_id"].as_str().unwrap().to_string();
    let call_id_bytes = uuid::Uuid::parse_str(&call_id).unwrap();

    let format = AudioFormat {
        sample_rate: 24_000,
        channels: 1,
        bit_depth: 16,
    };
    let first = synthesize(&format, &[0x01u8; 320]);
    let second = synthesize(&format, &[0x02u8; 320]);

    for container in [first, second] {
        let mut frame = Vec::with_capacity(16 + container.len());
        frame.extend_from_slice(call_id_bytes.as_bytes());
        frame.extend_from_slice(&container);
        backend.send(Message::Binary(frame)).await.unwrap();
    }

    let envelope: Value = match tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("stream audio timed out")
        .unwrap()
        .unwrap()
    {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected streamAudio text frame, got {other:?}"),
    };
    assert_eq!(envelope["type"], "streamAudio");
    let audio_data = envelope["data"]["audioData"].as_str().unwrap();
    let container = base64::engine::general_purpose::STANDARD
        .decode(audio_data)
        .unwrap();

    let declared_len = u32::from_le_bytes(container[40..44].try_into().unwrap()) as usize;
    assert_eq!(declared_len, 640);
    let raw = &container[44..44 + declared_len];
    let mut expected = vec![0x01u8; 320];
    expected.extend_from_slice(&[0x02u8; 320]);
    assert_eq!(raw, expected.as_slice());
}

#[tokio::test]
async fn welcome_absent_does_not_block_handshake() {
    // welcome_sound_path points nowhere; the call must still open cleanly.
    let addr = spawn_server(test_config()).await;

    let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/call"))
        .await
        .unwrap();
    client
        .send(Message::Text(json!({"client_type": "freeswitch"}).to_string()))
        .await
        .unwrap();

    match tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("session_info timed out")
        .unwrap()
        .unwrap()
    {
        Message::Text(text) => {
            let body: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(body["type"], "session_info");
        }
        other => panic!("expected session_info, got {other:?}"),
    }
}

#[tokio::test]
async fn unsupported_container_type_is_rejected() {
    let addr = spawn_server(test_config()).await;

    let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/call"))
        .await
        .unwrap();
    client
        .send(Message::Text(
            json!({
                "client_type": "freeswitch",
                "audio_config": {"audioDataType": "flac"},
            })
            .to_string(),
        ))
        .await
        .unwrap();

    match client.next().await.unwrap().unwrap() {
        Message::Text(text) => {
            let body: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(body["type"], "error");
            assert!(body["content"].as_str().unwrap().contains("flac"));
        }
        other => panic!("expected text error frame, got {other:?}"),
    }
}

#[tokio::test]
async fn admin_status_and_cleanup_over_http() {
    let addr = spawn_server(test_config()).await;
    let base = format!("http://{addr}");

    let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/call"))
        .await
        .unwrap();
    client
        .send(Message::Text(json!({"client_type": "freeswitch"}).to_string()))
        .await
        .unwrap();
    client.next().await.unwrap().unwrap(); // session_info

    // Give the handler a moment to register the session before we query it.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client_http = reqwest::Client::new();

    let status: Value = client_http
        .get(format!("{base}/admin/call/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["session_count"], 1);

    let cleanup: Value = client_http
        .post(format!("{base}/admin/call/cleanup"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cleanup["endpoint"], "call");
}
