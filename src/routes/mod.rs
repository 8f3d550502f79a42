//! # routes: HTTP / WebSocket surface ของ swipe UI
//!
//! | Method   | Path                             | Handler                       |
//! |----------|----------------------------------|-------------------------------|
//! | GET      | `/api/health`                    | [`session::health`]           |
//! | GET      | `/api/session/status`            | [`session::get_status`]       |
//! | POST     | `/api/session/connect`           | [`session::connect`]          |
//! | POST     | `/api/session/demo`              | [`session::enter_demo`]       |
//! | POST     | `/api/session/disconnect`        | [`session::disconnect`]       |
//! | POST     | `/api/positions`                 | [`positions::open_position`]  |
//! | GET      | `/api/positions`                 | [`positions::list_positions`] |
//! | GET      | `/api/positions/symbol/:symbol`  | [`positions::list_for_symbol`]|
//! | POST     | `/api/positions/:id/close`       | [`positions::close_position`] |
//! | POST     | `/api/prices`                    | [`positions::update_price`]   |
//! | GET      | `/api/pnl`                       | [`positions::total_pnl`]      |
//! | GET      | `/api/leverage`                  | [`positions::get_leverage`]   |
//! | POST     | `/api/leverage`                  | [`positions::set_leverage`]   |
//! | GET      | `/api/tokens`                    | [`monitor::get_tokens`]       |
//! | GET (WS) | `/ws/monitor`                    | [`monitor::ws_monitor`]       |

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::SharedState;

pub mod monitor;
pub mod positions;
pub mod session;

/// Router ทั้งหมด (ยังไม่ใส่ middleware: composition root ใส่เอง)
pub fn router(state: SharedState) -> Router {
    Router::new()
        // ── Session ──────────────────────────────────────────────────────────
        .route("/api/health",                    get(session::health))
        .route("/api/session/status",            get(session::get_status))
        .route("/api/session/connect",           post(session::connect))
        .route("/api/session/demo",              post(session::enter_demo))
        .route("/api/session/disconnect",        post(session::disconnect))
        // ── Ledger ───────────────────────────────────────────────────────────
        .route("/api/positions",                 post(positions::open_position).get(positions::list_positions))
        .route("/api/positions/symbol/:symbol",  get(positions::list_for_symbol))
        .route("/api/positions/:id/close",       post(positions::close_position))
        .route("/api/prices",                    post(positions::update_price))
        .route("/api/pnl",                       get(positions::total_pnl))
        .route("/api/leverage",                  get(positions::get_leverage).post(positions::set_leverage))
        // ── Monitor ──────────────────────────────────────────────────────────
        .route("/api/tokens",                    get(monitor::get_tokens))
        .route("/ws/monitor",                    get(monitor::ws_monitor))
        .with_state(state)
}

// ─── Test Support ─────────────────────────────────────────────────────────────
