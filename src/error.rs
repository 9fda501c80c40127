//! Typed errors for the audio proxy.
//!
//! `ProxyError` covers everything that can go wrong while a client or backend
//! socket is being served; it is never propagated out to HTTP. `AdminError`
//! is the admin-surface counterpart and implements `IntoResponse` so the
//! admin routes can return it directly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("handshake missing client_type")]
    MissingClientType,

    #[error("handshake has unknown client_type: {0}")]
    UnknownClientType(String),

    #[error("an ai_backend is already registered for this endpoint")]
    BackendAlreadyRegistered,

    #[error("unsupported container type: {0}")]
    UnsupportedContainerType(String),

    #[error("malformed session id: {0}")]
    MalformedSessionId(String),

    #[error("binary frame too short to carry a session id ({0} bytes)")]
    FrameTooShort(usize),

    #[error("unknown session id: {0}")]
    UnknownSession(String),

    #[error("audio container error: {0}")]
    Container(#[from] crate::audio::ContainerError),

    #[error("no touch-sound files available in {0}")]
    NoTouchFiles(String),

    #[error("socket error: {0}")]
    Socket(#[from] axum::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self {
            AdminError::UnknownEndpoint(_) => StatusCode::BAD_REQUEST,
            AdminError::UnknownSession(_) => StatusCode::NOT_FOUND,
            AdminError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.to_string(),
            status: status.as_u16(),
        };
        (status, axum::Json(body)).into_response()
    }
}
