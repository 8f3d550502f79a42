//! # routes::session
//!
//! Session lifecycle: UI ขอ connect / demo / disconnect ผ่าน command queue
//! ของ session task. Handler ไม่รอ handshake จบ: ผลจริงตามมาทาง
//! `SESSION_STATUS` บน `/ws/monitor`

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::json;

use crate::{
    auth::SessionCommand,
    error::AppError,
    state::SharedState,
};

// ─── GET /api/health ──────────────────────────────────────────────────────────

pub async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "ok":        true,
        "service":   env!("CARGO_PKG_NAME"),
        "version":   env!("CARGO_PKG_VERSION"),
        "readiness": state.status().readiness(),
        "time":      Utc::now(),
    }))
}

// ─── GET /api/session/status ──────────────────────────────────────────────────

pub async fn get_status(State(state): State<SharedState>) -> impl IntoResponse {
    let status = state.status();
    Json(json!({
        "ok":        true,
        "readiness": status.readiness(),
        "status":    status,
    }))
}

// ─── POST /api/session/{connect,demo,disconnect} ──────────────────────────────

pub async fn connect(State(state): State<SharedState>) -> Result<impl IntoResponse, AppError> {
    submit(&state, SessionCommand::Connect).await
}

pub async fn enter_demo(State(state): State<SharedState>) -> Result<impl IntoResponse, AppError> {
    submit(&state, SessionCommand::Demo).await
}

pub async fn disconnect(State(state): State<SharedState>) -> Result<impl IntoResponse, AppError> {
    submit(&state, SessionCommand::Disconnect).await
}

async fn submit(state: &SharedState, command: SessionCommand) -> Result<impl IntoResponse, AppError> {
    state
        .session_tx
        .send(command)
        .await
        .map_err(|_| anyhow::anyhow!("session task is not running"))?;

    tracing::info!(?command, "🔐 Session command queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "ok":      true,
            "command": format!("{command:?}"),
            "status":  state.status(),
        })),
    ))
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};

    use super::*;
    use crate::models::ConnectionStatus;
    use crate::routes::testing::{call, demo_status, harness};

    #[tokio::test]
    async fn test_health_and_status() {
        let h = harness(demo_status());

        let (status, body) = call(h.app(), Method::GET, "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["readiness"], "DEMO");

        let (_, body) = call(h.app(), Method::GET, "/api/session/status", None).await;
        assert_eq!(body["status"]["phase"], "DEMO_READY");
        assert_eq!(body["status"]["connected"], false);
    }

    #[tokio::test]
    async fn test_status_follows_watch_channel() {
        let h = harness(ConnectionStatus::disconnected());
        let (_, before) = call(h.app(), Method::GET, "/api/session/status", None).await;
        assert_eq!(before["readiness"], "NOT_READY");

        h.status_tx.send(demo_status()).unwrap();
        let (_, after) = call(h.app(), Method::GET, "/api/session/status", None).await;
        assert_eq!(after["readiness"], "DEMO");
    }

    #[tokio::test]
    async fn test_commands_reach_session_task() {
        let mut h = harness(ConnectionStatus::disconnected());

        for (uri, expected) in [
            ("/api/session/connect", SessionCommand::Connect),
            ("/api/session/demo", SessionCommand::Demo),
            ("/api/session/disconnect", SessionCommand::Disconnect),
        ] {
            let (status, body) = call(h.app(), Method::POST, uri, None).await;
            assert_eq!(status, StatusCode::ACCEPTED);
            assert_eq!(body["ok"], true);
            assert_eq!(h.commands.recv().await, Some(expected));
        }
    }

    #[tokio::test]
    async fn test_command_fails_when_session_task_gone() {
        let h = harness(ConnectionStatus::disconnected());
        let app = h.app();
        drop(h.commands);

        let (status, body) = call(app, Method::POST, "/api/session/connect", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["ok"], false);
    }
}
