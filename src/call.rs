//! `/call`: the telephony endpoint. FreeSwitch-like clients stream PCM
//! with a negotiated audio descriptor; downstream chunks are merged into
//! a single re-synthesized container per emission instead of forwarded
//! chunk-for-chunk.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::error::ProxyError;
use crate::handle::Handle;
use crate::protocol::{
    AudioConfig, BackendMessage, ClientCommand, Handshake, ServerMessage, SessionInfo,
    StreamAudioData,
};
use crate::state::AppState;
use crate::touch;

const UPSTREAM_RECV_TIMEOUT: Duration = Duration::from_secs(1);
const WRITER_CHANNEL_CAPACITY: usize = 64;
const WELCOME_SAMPLE_RATE: u32 = 24_000;
const WELCOME_CHANNELS: u16 = 1;
const WELCOME_BIT_DEPTH: u16 = 16;
const WELCOME_SETTLE: Duration = Duration::from_secs(1);

pub async fn call_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (msg_tx, mut msg_rx) = mpsc::channel::<Message>(WRITER_CHANNEL_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(message) = msg_rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    let handshake = match stream.next().await {
        Some(Ok(Message::Text(text))) => serde_json::from_str::<Handshake>(&text),
        _ => {
            let _ = msg_tx
                .send(error_message("expected a text handshake frame"))
                .await;
            drop(msg_tx);
            let _ = writer.await;
            return;
        }
    };

    let handshake = match handshake {
        Ok(h) => h,
        Err(err) => {
            let _ = msg_tx.send(error_message(&err.to_string())).await;
            drop(msg_tx);
            let _ = writer.await;
            return;
        }
    };

    match handshake.client_type.as_str() {
        "ai_backend" => serve_backend(stream, msg_tx, state).await,
        "freeswitch" => serve_telephony(stream, msg_tx, handshake, state).await,
        other => {
            let _ = msg_tx
                .send(error_message(&format!("unknown client_type: {other}")))
                .await;
            drop(msg_tx);
        }
    }

    // Every arm above drops (or hands off and lets drop) its copy of the
    // sender; once the last one goes, the writer task observes a closed
    // channel and finishes flushing whatever it was queued, in order,
    // before we tear down the socket.
    let _ = writer.await;
}

fn error_message(reason: &str) -> Message {
    let body = ServerMessage::Error {
        content: reason.to_string(),
    };
    Message::Text(serde_json::to_string(&body).unwrap_or_default())
}

async fn serve_backend(
    mut stream: futures_util::stream::SplitStream<WebSocket>,
    msg_tx: mpsc::Sender<Message>,
    state: AppState,
) {
    let backend_id = Handle::new();
    if state.call_registry.register_backend(backend_id).await.is_err() {
        let _ = msg_tx
            .send(error_message("an ai_backend is already registered"))
            .await;
        return;
    }
    state.call_backend.set(msg_tx.clone()).await;
    tracing::info!(%backend_id, "call backend registered");

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let Err(err) = handle_backend_text(&text, &msg_tx, &state).await {
                    tracing::warn!(%err, "dropping malformed backend text frame");
                }
            }
            Ok(Message::Binary(bytes)) => {
                if let Err(err) = route_downstream_binary(&bytes, &state).await {
                    tracing::warn!(%err, "dropping malformed backend binary frame");
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    state.call_backend.clear().await;
    state.call_registry.unregister_backend(backend_id).await;
    tracing::info!(%backend_id, "call backend disconnected");
}

async fn handle_backend_text(
    text: &str,
    backend_tx: &mpsc::Sender<Message>,
    state: &AppState,
) -> Result<(), ProxyError> {
    let message: BackendMessage = serde_json::from_str(text)?;
    match message {
        BackendMessage::Heartbeat => {
            let ack = serde_json::to_string(&ServerMessage::HeartbeatAck)?;
            let _ = backend_tx.send(Message::Text(ack)).await;
        }
        BackendMessage::Text {
            call_id, content, ..
        } => {
            let Some(call_id) = call_id else {
                return Err(ProxyError::UnknownSession("missing call_id".into()));
            };
            let session_id: Handle = call_id
                .parse()
                .map_err(|_| ProxyError::MalformedSessionId(call_id.clone()))?;
            let Some(client_tx) = state.call_registry.sender_for_session(session_id).await else {
                return Err(ProxyError::UnknownSession(session_id.to_string()));
            };
            let out = ServerMessage::Text {
                call_id: Some(session_id.to_string()),
                content,
            };
            let _ = client_tx.send(Message::Text(serde_json::to_string(&out)?)).await;
        }
    }
    Ok(())
}

async fn route_downstream_binary(bytes: &[u8], state: &AppState) -> Result<(), ProxyError> {
    if bytes.len() <= 16 {
        return Err(ProxyError::FrameTooShort(bytes.len()));
    }
    let mut id_bytes = [0u8; 16];
    id_bytes.copy_from_slice(&bytes[..16]);
    let call_id = Handle::from(uuid::Uuid::from_bytes(id_bytes));
    let chunk = &bytes[16..];

    let Some(client_tx) = state.call_registry.sender_for_session(call_id).await else {
        return Err(ProxyError::UnknownSession(call_id.to_string()));
    };

    if let Err(merge_err) = state
        .call_registry
        .with_extra_mut(call_id, |extra| extra.downstream.push_chunk(chunk))
        .await
        .unwrap_or(Ok(()))
    {
        tracing::warn!(%call_id, %merge_err, "container merge fell back to raw append");
    }

    let threshold = state.config.call_downstream_chunk_bytes;
    let ready = state
        .call_registry
        .with_extra_mut(call_id, |extra| {
            if extra.downstream.len() >= threshold {
                let format = extra.format.as_audio_format();
                let container = extra.downstream.take_container(&format);
                Some((container, extra.format.clone()))
            } else {
                None
            }
        })
        .await
        .flatten();

    if let Some((container, audio_config)) = ready {
        send_stream_audio(
            &client_tx,
            &container,
            &audio_config.container_type,
            audio_config.sample_rate,
            audio_config.channels,
            audio_config.bit_depth,
        )
        .await;
    }

    Ok(())
}

async fn send_stream_audio(
    client_tx: &mpsc::Sender<Message>,
    container: &[u8],
    container_type: &str,
    sample_rate: u32,
    channels: u16,
    bit_depth: u16,
) {
    let envelope = ServerMessage::StreamAudio {
        data: StreamAudioData {
            audio_data_type: container_type.to_string(),
            sample_rate,
            channels,
            bit_depth,
            audio_data: base64::engine::general_purpose::STANDARD.encode(container),
        },
    };
    if let Ok(json) = serde_json::to_string(&envelope) {
        let _ = client_tx.send(Message::Text(json)).await;
    }
}

async fn serve_telephony(
    mut stream: futures_util::stream::SplitStream<WebSocket>,
    msg_tx: mpsc::Sender<Message>,
    handshake: Handshake,
    state: AppState,
) {
    let call_id = handshake
        .call_id
        .as_deref()
        .and_then(|s| s.parse().ok())
        .unwrap_or_default();
    let client_id = Handle::new();

    let audio_config = match AudioConfig::from_partial(handshake.audio_config) {
        Ok(cfg) => cfg,
        Err(bad) => {
            let _ = msg_tx
                .send(error_message(&format!(
                    "unsupported container type: {bad} (supported: {})",
                    crate::protocol::SUPPORTED_CONTAINER_TYPES.join(", ")
                )))
                .await;
            return;
        }
    };

    state
        .call_registry
        .insert_session(call_id, client_id, msg_tx.clone())
        .await;
    state
        .call_registry
        .with_extra_mut(call_id, |extra| extra.format = audio_config)
        .await;
    tracing::info!(%call_id, %client_id, "call session opened");

    let info = ServerMessage::SessionInfo {
        content: SessionInfo {
            session_id: call_id.to_string(),
            client_id: client_id.to_string(),
        },
    };
    let _ = msg_tx
        .send(Message::Text(serde_json::to_string(&info).unwrap_or_default()))
        .await;

    send_welcome(&state, &msg_tx).await;

    let threshold = state.config.call_upstream_chunk_bytes;

    loop {
        let frame = tokio::time::timeout(UPSTREAM_RECV_TIMEOUT, stream.next()).await;
        let frame = match frame {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(_))) | Ok(None) => break,
            Err(_) => continue,
        };

        match frame {
            Message::Binary(bytes) => {
                dump_inbound_chunk(&state, call_id, &bytes).await;
                state.call_registry.append_bytes(call_id, &bytes).await;
                flush_if_ready(&state, call_id, threshold).await;
            }
            Message::Text(text) => handle_client_command(&text, &state, call_id, &msg_tx).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    final_flush_downstream(&state, call_id).await;
    state.call_registry.remove_session(call_id).await;
    tracing::info!(%call_id, %client_id, "call session closed");
}

/// Optional diagnostic tap: append raw inbound telephony bytes to a
/// per-call file under `debug_dump_dir` for offline inspection. A no-op on
/// the hot path whenever the directory isn't configured.
async fn dump_inbound_chunk(state: &AppState, call_id: Handle, bytes: &[u8]) {
    let Some(dir) = &state.config.debug_dump_dir else {
        return;
    };
    let path = dir.join(format!("{call_id}.raw"));
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await;
    match file {
        Ok(mut file) => {
            use tokio::io::AsyncWriteExt;
            if let Err(err) = file.write_all(bytes).await {
                tracing::warn!(%call_id, %err, path = %path.display(), "debug dump write failed");
            }
        }
        Err(err) => {
            tracing::warn!(%call_id, %err, path = %path.display(), "debug dump open failed");
        }
    }
}

async fn send_welcome(state: &AppState, client_tx: &mpsc::Sender<Message>) {
    let path = &state.config.welcome_sound_path;
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            send_stream_audio(
                client_tx,
                &bytes,
                "wav",
                WELCOME_SAMPLE_RATE,
                WELCOME_CHANNELS,
                WELCOME_BIT_DEPTH,
            )
            .await;
            tokio::time::sleep(WELCOME_SETTLE).await;
        }
        Err(err) => {
            tracing::warn!(%err, path = %path.display(), "welcome sound unavailable, continuing without it");
        }
    }
}

async fn handle_client_command(
    text: &str,
    state: &AppState,
    call_id: Handle,
    client_tx: &mpsc::Sender<Message>,
) {
    match serde_json::from_str::<ClientCommand>(text) {
        Ok(ClientCommand::AudioComplete) => {
            force_flush(state, call_id).await;
        }
        Ok(ClientCommand::Touch { amount }) => {
            if let Err(err) = touch::play(&state.config.touch_sound_dir, amount, client_tx).await {
                let _ = client_tx.send(error_message(&err.to_string())).await;
            }
        }
        Err(err) => tracing::warn!(%err, text, "unrecognized client text frame"),
    }
}

/// Flush the call's inbound buffer only if it has reached `threshold`, and
/// only once a backend is confirmed present to receive it — see
/// `BackendLink::send_with` for why this closes the drain-then-lose race.
async fn flush_if_ready(state: &AppState, call_id: Handle, threshold: usize) {
    let registry = &state.call_registry;
    let result = state
        .call_backend
        .send_with(|| async move {
            registry
                .maybe_flush(call_id, threshold)
                .await
                .map(|payload| upstream_frame(call_id, payload))
        })
        .await;
    log_flush_result(call_id, result);
}

/// Force-flush the call's inbound buffer regardless of threshold, used on
/// `audio_complete`.
async fn force_flush(state: &AppState, call_id: Handle) {
    let registry = &state.call_registry;
    let result = state
        .call_backend
        .send_with(|| async move {
            registry
                .take_inbound(call_id)
                .await
                .map(|payload| upstream_frame(call_id, payload))
        })
        .await;
    log_flush_result(call_id, result);
}

fn upstream_frame(call_id: Handle, payload: Vec<u8>) -> Message {
    let mut frame = Vec::with_capacity(16 + payload.len());
    frame.extend_from_slice(call_id.as_uuid().as_bytes());
    frame.extend_from_slice(&payload);
    Message::Binary(frame)
}

fn log_flush_result(call_id: Handle, result: Result<bool, mpsc::error::SendError<Message>>) {
    match result {
        Ok(true) => {}
        Ok(false) => tracing::debug!(%call_id, "no backend registered, buffering upstream audio"),
        Err(_) => tracing::warn!(%call_id, "backend writer task gone"),
    }
}

async fn final_flush_downstream(state: &AppState, call_id: Handle) {
    let Some(client_tx) = state.call_registry.sender_for_session(call_id).await else {
        return;
    };
    let ready = state
        .call_registry
        .with_extra_mut(call_id, |extra| {
            if extra.downstream.is_empty() {
                None
            } else {
                let format = extra.format.as_audio_format();
                let container = extra.downstream.take_container(&format);
                Some((container, extra.format.clone()))
            }
        })
        .await
        .flatten();
    if let Some((container, audio_config)) = ready {
        send_stream_audio(
            &client_tx,
            &container,
            &audio_config.container_type,
            audio_config.sample_rate,
            audio_config.channels,
            audio_config.bit_depth,
        )
        .await;
    }
}
