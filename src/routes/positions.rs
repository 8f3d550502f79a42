//! # routes::positions
//!
//! Ledger endpoints: swipe เปิด position, ปิด, manual price tick, P&L รวม,
//! default leverage ของ swipe ถัดไป

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{
    error::AppError,
    events::WsEvent,
    models::OpenRequest,
    state::SharedState,
};

#[derive(Debug, Deserialize)]
pub struct CloseBody {
    pub price: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct PriceTick {
    pub symbol: String,
    pub price:  f64,
}

#[derive(Debug, Deserialize)]
pub struct LeverageBody {
    pub leverage: f64,
}

// ─── POST /api/positions ──────────────────────────────────────────────────────

/// Swipe → เปิด Position (409 ถ้า session ยังไม่พร้อม)
pub async fn open_position(
    State(state): State<SharedState>,
    Json(request): Json<OpenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let position = state.ledger.write().await.open(request)?;

    state.broadcast(&WsEvent::PositionOpened {
        position: Box::new(position.clone()),
    });

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "ok":       true,
            "position": position,
        })),
    ))
}

// ─── GET /api/positions ───────────────────────────────────────────────────────

pub async fn list_positions(State(state): State<SharedState>) -> impl IntoResponse {
    let ledger = state.ledger.read().await;
    let positions = ledger.list_open();

    Json(json!({
        "ok":        true,
        "count":     positions.len(),
        "positions": positions,
        "total_pnl": ledger.total_pnl(),
    }))
}

// ─── GET /api/positions/symbol/:symbol ────────────────────────────────────────

pub async fn list_for_symbol(
    State(state): State<SharedState>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    let positions = state.ledger.read().await.list_for_symbol(&symbol);

    Json(json!({
        "ok":        true,
        "symbol":    symbol,
        "count":     positions.len(),
        "positions": positions,
    }))
}

// ─── POST /api/positions/:id/close ────────────────────────────────────────────

/// ปิด Position ที่ราคา body → ราคาตลาดล่าสุด → current price ของ position
///
/// `closed: false` ถ้าปิดไปแล้ว (ไม่ใช่ error)
pub async fn close_position(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    body: Option<Json<CloseBody>>,
) -> Result<impl IntoResponse, AppError> {
    let requested = body.and_then(|Json(b)| b.price);

    let mut ledger = state.ledger.write().await;
    let (symbol, current) = ledger
        .get(id)
        .map(|p| (p.token_symbol.clone(), p.current_price()))
        .ok_or_else(|| AppError::NotFound(format!("position {id} does not exist")))?;

    if let Some(price) = requested.filter(|p| !p.is_finite() || *p <= 0.0) {
        return Err(AppError::BadRequest(format!("invalid close price {price}")));
    }

    let price = requested
        .or_else(|| state.book.latest_price(&symbol))
        .unwrap_or(current);

    let closed = ledger.close(id, price);
    let position = ledger.get(id).cloned();
    drop(ledger);

    if closed {
        if let Some(position) = &position {
            state.broadcast(&WsEvent::PositionClosed {
                position: Box::new(position.clone()),
            });
        }
    }

    Ok(Json(json!({
        "ok":       true,
        "closed":   closed,
        "position": position,
    })))
}

// ─── POST /api/prices ─────────────────────────────────────────────────────────

/// Manual price tick: บันทึกลง PriceBook แล้ว reprice Ledger
pub async fn update_price(
    State(state): State<SharedState>,
    Json(tick): Json<PriceTick>,
) -> Result<impl IntoResponse, AppError> {
    if !tick.price.is_finite() || tick.price <= 0.0 {
        return Err(AppError::BadRequest(format!("invalid price {}", tick.price)));
    }

    let repriced = state.observe_price(&tick.symbol, tick.price).await;

    info!(symbol = %tick.symbol, price = tick.price, repriced, "💱 Manual price tick");

    Ok(Json(json!({
        "ok":       true,
        "symbol":   tick.symbol,
        "price":    tick.price,
        "repriced": repriced,
    })))
}

// ─── GET /api/pnl ─────────────────────────────────────────────────────────────

pub async fn total_pnl(State(state): State<SharedState>) -> impl IntoResponse {
    let ledger = state.ledger.read().await;

    Json(json!({
        "ok":         true,
        "total_pnl":  ledger.total_pnl(),
        "open_count": ledger.list_open().len(),
    }))
}

// ─── GET/POST /api/leverage ───────────────────────────────────────────────────

pub async fn get_leverage(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "ok":       true,
        "leverage": state.ledger.read().await.leverage(),
    }))
}

/// ตั้ง default leverage: position ที่เปิดอยู่แล้วไม่เปลี่ยน
pub async fn set_leverage(
    State(state): State<SharedState>,
    Json(body): Json<LeverageBody>,
) -> Result<impl IntoResponse, AppError> {
    let leverage = state.ledger.write().await.set_leverage(body.leverage)?;
    state.broadcast(&WsEvent::LeverageChanged { leverage });

    Ok(Json(json!({
        "ok":       true,
        "leverage": leverage,
    })))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
