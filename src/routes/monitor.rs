//! # routes::monitor
//!
//! **Monitor Loop**: stream สดให้ swipe UI
//!
//! | Method    | Path          | Description                                 |
//! |-----------|---------------|---------------------------------------------|
//! | GET (WS)  | `/ws/monitor` | Snapshot ตอนต่อ แล้วตามด้วย WsEvent ทุกตัว     |
//! | GET       | `/api/tokens` | Quote ล่าสุดของทุก token card                 |

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    Json,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::market::{format_compact, format_price};
use crate::models::TokenQuote;
use crate::state::SharedState;

// ─── WebSocket Handler ────────────────────────────────────────────────────────

/// Upgrade HTTP → WebSocket แล้ว subscribe broadcast channel
///
/// UI ต่อที่ `ws://localhost:3000/ws/monitor`
pub async fn ws_monitor(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// สภาพปัจจุบันทั้งหมดที่ client ใหม่ต้องใช้วาดจอแรก
pub async fn snapshot(state: &SharedState) -> Value {
    let (positions, total_pnl) = {
        let ledger = state.ledger.read().await;
        (ledger.list_open(), ledger.total_pnl())
    };

    json!({
        "event":     "SNAPSHOT",
        "status":    state.status(),
        "positions": positions,
        "total_pnl": total_pnl,
        "quotes":    state.book.quotes(),
    })
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    // subscribe ก่อนทำ snapshot: event ระหว่างนั้นจะไม่หาย
    let mut rx = state.broadcast_tx.subscribe();
    let (mut sender, mut receiver) = socket.split();

    info!("🔌 WebSocket client connected");

    let snapshot = snapshot(&state).await.to_string();
    if sender.send(Message::Text(snapshot)).await.is_err() {
        return; // Client ปิดก่อน snapshot ส่งได้
    }

    // ── Event Loop ────────────────────────────────────────────────────────────
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(json_str) => {
                        if sender.send(Message::Text(json_str)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!("WS client lagged, skipped {n} events");
                    }
                    Err(_) => break,
                }
            }

            result = receiver.next() => {
                match result {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("🔌 WebSocket client disconnected");
}

// ─── GET /api/tokens ──────────────────────────────────────────────────────────

/// Quote หนึ่งตัวพร้อมตัวเลขที่ format แล้วสำหรับ token card
#[derive(Debug, Serialize)]
pub struct TokenCard {
    #[serde(flatten)]
    pub quote:              TokenQuote,
    pub price_display:      String,
    pub volume_display:     String,
    pub market_cap_display: String,
}

impl From<TokenQuote> for TokenCard {
    fn from(quote: TokenQuote) -> Self {
        Self {
            price_display:      format_price(quote.price),
            volume_display:     format_compact(quote.volume_24h),
            market_cap_display: format_compact(quote.market_cap),
            quote,
        }
    }
}

/// Quote ล่าสุดของ watchlist: card ที่ยังไม่เคย fetch ได้ quote ศูนย์
pub async fn get_tokens(State(state): State<SharedState>) -> impl IntoResponse {
    let tokens: Vec<TokenCard> = state
        .watchlist
        .iter()
        .map(|config| {
            state
                .book
                .quote(config)
                .unwrap_or_else(|| TokenQuote::zeroed(config))
                .into()
        })
        .collect();

    Json(json!({
        "ok":     true,
        "count":  tokens.len(),
        "tokens": tokens,
    }))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
