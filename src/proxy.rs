//! `/proxy`: the interactive endpoint. Browser-like frontends stream mic
//! PCM upstream; the backend's replies are forwarded straight back to the
//! originating client with no re-encapsulation.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::error::ProxyError;
use crate::handle::Handle;
use crate::protocol::{BackendMessage, ClientCommand, Handshake, ServerMessage, SessionInfo};
use crate::state::AppState;
use crate::touch;

const UPSTREAM_RECV_TIMEOUT: Duration = Duration::from_secs(1);
const WRITER_CHANNEL_CAPACITY: usize = 64;

pub async fn proxy_ws_handler(
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
        "frontend" => serve_frontend(stream, msg_tx, state).await,
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
    if state.proxy_registry.register_backend(backend_id).await.is_err() {
        let _ = msg_tx
            .send(error_message("an ai_backend is already registered"))
            .await;
        return;
    }
    state.proxy_backend.set(msg_tx.clone()).await;
    tracing::info!(%backend_id, "proxy backend registered");

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

    state.proxy_backend.clear().await;
    state.proxy_registry.unregister_backend(backend_id).await;
    tracing::info!(%backend_id, "proxy backend disconnected");
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
            session_id,
            content,
            ..
        } => {
            let Some(session_id) = session_id else {
                return Err(ProxyError::UnknownSession("missing session_id".into()));
            };
            let session_id: Handle = session_id
                .parse()
                .map_err(|_| ProxyError::MalformedSessionId(session_id.clone()))?;
            let Some(client_tx) = state.proxy_registry.sender_for_session(session_id).await else {
                return Err(ProxyError::UnknownSession(session_id.to_string()));
            };
            let out = ServerMessage::Text {
                call_id: None,
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
    let session_id = Handle::from(uuid::Uuid::from_bytes(id_bytes));
    let payload = &bytes[16..];

    let Some(client_tx) = state.proxy_registry.sender_for_session(session_id).await else {
        return Err(ProxyError::UnknownSession(session_id.to_string()));
    };
    let _ = client_tx.send(Message::Binary(payload.to_vec())).await;
    Ok(())
}

async fn serve_frontend(
    mut stream: futures_util::stream::SplitStream<WebSocket>,
    msg_tx: mpsc::Sender<Message>,
    state: AppState,
) {
    let session_id = Handle::new();
    let client_id = Handle::new();
    state
        .proxy_registry
        .insert_session(session_id, client_id, msg_tx.clone())
        .await;
    tracing::info!(%session_id, %client_id, "proxy session opened");

    let info = ServerMessage::SessionInfo {
        content: SessionInfo {
            session_id: session_id.to_string(),
            client_id: client_id.to_string(),
        },
    };
    let _ = msg_tx
        .send(Message::Text(serde_json::to_string(&info).unwrap_or_default()))
        .await;

    let threshold = state.config.proxy_upstream_chunk_bytes;

    loop {
        let frame = tokio::time::timeout(UPSTREAM_RECV_TIMEOUT, stream.next()).await;
        let frame = match frame {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(_))) | Ok(None) => break,
            Err(_) => continue, // recv timeout, loop back to give other sessions a turn
        };

        match frame {
            Message::Binary(bytes) => {
                state.proxy_registry.append_bytes(session_id, &bytes).await;
                flush_if_ready(&state, session_id, threshold).await;
            }
            Message::Text(text) => handle_client_command(&text, &state, session_id, &msg_tx).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.proxy_registry.remove_session(session_id).await;
    tracing::info!(%session_id, %client_id, "proxy session closed");
}

async fn handle_client_command(
    text: &str,
    state: &AppState,
    session_id: Handle,
    client_tx: &mpsc::Sender<Message>,
) {
    match serde_json::from_str::<ClientCommand>(text) {
        Ok(ClientCommand::AudioComplete) => {
            force_flush(state, session_id).await;
        }
        Ok(ClientCommand::Touch { amount }) => {
            if let Err(err) = touch::play(&state.config.touch_sound_dir, amount, client_tx).await {
                let _ = client_tx.send(error_message(&err.to_string())).await;
            }
        }
        Err(err) => tracing::warn!(%err, text, "unrecognized client text frame"),
    }
}

/// Flush the session's inbound buffer only if it has reached `threshold`,
/// and only once a backend is confirmed present to receive it — the drain
/// and the send happen atomically with respect to backend disconnection, so
/// a buffer that can't be delivered right now is left intact instead of
/// drained and dropped.
async fn flush_if_ready(state: &AppState, session_id: Handle, threshold: usize) {
    let registry = &state.proxy_registry;
    let result = state
        .proxy_backend
        .send_with(|| async move {
            registry
                .maybe_flush(session_id, threshold)
                .await
                .map(|payload| upstream_frame(session_id, payload))
        })
        .await;
    log_flush_result(session_id, result);
}

/// Force-flush the session's inbound buffer regardless of threshold, used
/// on `audio_complete`. Same no-backend-no-drain guarantee as `flush_if_ready`.
async fn force_flush(state: &AppState, session_id: Handle) {
    let registry = &state.proxy_registry;
    let result = state
        .proxy_backend
        .send_with(|| async move {
            registry
                .take_inbound(session_id)
                .await
                .map(|payload| upstream_frame(session_id, payload))
        })
        .await;
    log_flush_result(session_id, result);
}

fn upstream_frame(session_id: Handle, payload: Vec<u8>) -> Message {
    let mut frame = Vec::with_capacity(16 + payload.len());
    frame.extend_from_slice(session_id.as_uuid().as_bytes());
    frame.extend_from_slice(&payload);
    Message::Binary(frame)
}

fn log_flush_result(session_id: Handle, result: Result<bool, mpsc::error::SendError<Message>>) {
    match result {
        Ok(true) => {}
        Ok(false) => tracing::debug!(%session_id, "no backend registered, buffering upstream audio"),
        Err(_) => tracing::warn!(%session_id, "backend writer task gone"),
    }
}
