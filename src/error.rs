//! Unified error taxonomy for the HTTP and WebSocket planes.
//!
//! Every handler-level failure is represented as one `AppError` variant so the
//! wire representation (HTTP status + JSON body, or WS `error` envelope) is
//! derived in exactly one place instead of scattered across handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("room is full")]
    RoomFull,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("expired")]
    Expired,

    #[error("peer not in room")]
    PeerNotInRoom,

    #[error("peer not found")]
    PeerNotFound,

    #[error("delivery failed")]
    DeliveryFailed,

    #[error("upstream failure: {0}")]
    UpstreamFailure(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code, shared by the HTTP problem body and the
    /// WS `error` envelope.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthenticated => "UNAUTHENTICATED",
            AppError::Forbidden => "FORBIDDEN",
            AppError::NotFound => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::RoomFull => "ROOM_FULL",
            AppError::InvalidRequest(_) => "INVALID_REQUEST",
            AppError::Expired => "EXPIRED",
            AppError::PeerNotInRoom => "PEER_NOT_IN_ROOM",
            AppError::PeerNotFound => "PEER_NOT_FOUND",
            AppError::DeliveryFailed => "DELIVERY_FAILED",
            AppError::UpstreamFailure(_) => "UPSTREAM_FAILURE",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RoomFull => StatusCode::CONFLICT,
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Expired => StatusCode::GONE,
            AppError::PeerNotInRoom | AppError::PeerNotFound => StatusCode::NOT_FOUND,
            AppError::DeliveryFailed => StatusCode::BAD_GATEWAY,
            AppError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render as the `{type, ...}` envelope the WebSocket layer sends back.
    pub fn to_ws_envelope(&self) -> serde_json::Value {
        json!({ "type": "error", "code": self.code(), "message": self.to_string() })
    }
}

#[derive(Serialize)]
struct ProblemBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if matches!(self, AppError::Internal(_) | AppError::UpstreamFailure(_)) {
            tracing::error!(code = self.code(), "{}", self);
        }
        let status = self.status();
        let body = ProblemBody {
            code: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::UpstreamFailure(format!("store error: {e}"))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::UpstreamFailure(format!("upstream request failed: {e}"))
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(_: jsonwebtoken::errors::Error) -> Self {
        AppError::Unauthenticated
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::InvalidRequest(e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
