//! # error
//!
//! Error taxonomy ของทั้งระบบ: Ledger, Session handshake, Price feed, Persistence
//! และ [`AppError`] ที่ HTTP handler คืนให้ UI.
//!
//! Expected conditions (`NotReady`, `InvalidPrice`, close ของ position ที่ไม่มี)
//! ไม่ panic และไม่ข้าม boundary เป็น exception: คืนเป็น `Result` / `bool` เสมอ.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// ─── Ledger ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// Session ยังไม่อยู่ใน Ready / DemoReady
    #[error("trading channel is not ready")]
    NotReady,

    #[error("invalid entry price: {0}")]
    InvalidPrice(f64),

    #[error("invalid amount: {0}")]
    InvalidAmount(f64),

    #[error("invalid leverage: {0}")]
    InvalidLeverage(f64),
}

// ─── Session / Transport ──────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),
}

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

/// Frame จาก ClearNode ที่ decode ไม่ได้: ถือเป็น programmer/protocol error
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed frame: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// Counterparty ตอบ `auth_failure` หรือ error frame ระหว่าง verify
    #[error("authentication rejected: {0}")]
    Rejected(String),

    /// เรียก initiate ตอนที่ machine ไม่ได้อยู่ใน Disconnected
    #[error("session handshake already in progress or active")]
    AlreadyActive,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Protocol(#[from] FrameError),
}

// ─── Price Feed ───────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("feed returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid token data: {0}")]
    InvalidData(String),
}

// ─── Persistence ──────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

// ─── HTTP ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AppError {
    /// The request payload was syntactically correct but semantically invalid.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The requested position does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Trading is gated on session readiness.
    #[error("Not ready: {0}")]
    NotReady(String),

    /// Catch-all for unexpected failures.
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotReady => AppError::NotReady(err.to_string()),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::NotReady(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Internal(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal error: {err}"),
            ),
        };

        let body = Json(json!({
            "ok":    false,
            "error": message,
        }));

        (status, body).into_response()
    }
}
