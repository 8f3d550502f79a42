//! # models::position
//!
//! [`Position`]: simulated leveraged bet บน token หนึ่งตัว (long / short)
//!
//! ## Mutability
//! `id`, `position_type`, `amount`, `leverage`, `entry_price`, `opened_at`
//! ถูก freeze ตั้งแต่ตอน open. สิ่งที่เปลี่ยนได้คือ `current_price` (ผ่าน
//! [`Position::reprice`]) และ `status` (open → closed ทางเดียว).
//! `pnl` / `pnl_percentage` เป็น derived field: ไม่มี setter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::ledger::pnl::{self, Pnl};

// ─── Enums ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionType {
    /// กำไรเมื่อราคาขึ้น (swipe right)
    Long,
    /// กำไรเมื่อราคาลง (swipe left)
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

// ─── OpenRequest ──────────────────────────────────────────────────────────────

/// Payload ของ swipe หนึ่งครั้ง: ราคาที่ UI เห็นตอน swipe อาจเก่าแล้ว
/// Ledger จะใช้ราคาล่าสุดจาก PriceBook ก่อนถ้ามี
#[derive(Debug, Clone, Deserialize)]
pub struct OpenRequest {
    pub token_symbol: String,
    pub token_name:   String,
    #[serde(rename = "type")]
    pub position_type: PositionType,
    /// USDC stake
    pub amount:      f64,
    pub entry_price: f64,
    /// ไม่ส่งมา = ใช้ default leverage ของ Ledger
    #[serde(default)]
    pub leverage:    Option<f64>,
}

// ─── Position ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub id:            Uuid,
    pub token_symbol:  String,
    pub token_name:    String,
    #[serde(rename = "type")]
    pub position_type: PositionType,
    pub amount:        f64,
    pub leverage:      f64,
    pub entry_price:   f64,
    current_price:     f64,
    pnl:               f64,
    pnl_percentage:    f64,
    pub opened_at:     DateTime<Utc>,
    status:            PositionStatus,
    closed_at:         Option<DateTime<Utc>>,
}

impl Position {
    /// สร้าง Position ใหม่ที่ `entry_price` (status = open, pnl = 0)
    pub(crate) fn open(request: OpenRequest, entry_price: f64, leverage: f64) -> Result<Self, LedgerError> {
        if !entry_price.is_finite() || entry_price <= 0.0 {
            return Err(LedgerError::InvalidPrice(entry_price));
        }
        if !request.amount.is_finite() || request.amount <= 0.0 {
            return Err(LedgerError::InvalidAmount(request.amount));
        }
        if !leverage.is_finite() || leverage <= 0.0 {
            return Err(LedgerError::InvalidLeverage(leverage));
        }

        Ok(Self {
            id:             Uuid::new_v4(),
            token_symbol:   request.token_symbol,
            token_name:     request.token_name,
            position_type:  request.position_type,
            amount:         request.amount,
            leverage,
            entry_price,
            current_price:  entry_price,
            pnl:            0.0,
            pnl_percentage: 0.0,
            opened_at:      Utc::now(),
            status:         PositionStatus::Open,
            closed_at:      None,
        })
    }

    /// Rebuild from persisted source-of-truth fields; P&L is recomputed here.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        id: Uuid,
        token_symbol: String,
        token_name: String,
        position_type: PositionType,
        amount: f64,
        leverage: f64,
        entry_price: f64,
        current_price: f64,
        opened_at: DateTime<Utc>,
        status: PositionStatus,
        closed_at: Option<DateTime<Utc>>,
    ) -> Self {
        let mut position = Self {
            id,
            token_symbol,
            token_name,
            position_type,
            amount,
            leverage,
            entry_price,
            current_price,
            pnl: 0.0,
            pnl_percentage: 0.0,
            opened_at,
            status,
            closed_at,
        };
        position.apply(current_price);
        position
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn current_price(&self) -> f64 { self.current_price }
    pub fn pnl(&self) -> f64 { self.pnl }
    pub fn pnl_percentage(&self) -> f64 { self.pnl_percentage }
    pub fn status(&self) -> PositionStatus { self.status }
    pub fn closed_at(&self) -> Option<DateTime<Utc>> { self.closed_at }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// P&L ที่ราคา `price` โดยไม่แตะ state
    pub fn pnl_at(&self, price: f64) -> Pnl {
        pnl::compute(
            self.position_type,
            self.amount,
            self.leverage,
            self.entry_price,
            price,
        )
    }

    // ── Mutations (Ledger only) ───────────────────────────────────────────────

    /// อัปเดตราคาปัจจุบันและคำนวณ P&L ใหม่: ไม่มีผลกับ position ที่ปิดแล้ว
    pub(crate) fn reprice(&mut self, price: f64) {
        if self.is_open() {
            self.apply(price);
        }
    }

    /// ปิด Position ที่ราคา `price` แล้ว freeze current_price / pnl
    pub(crate) fn close_at(&mut self, price: f64) {
        if !self.is_open() {
            return;
        }
        self.apply(price);
        self.status    = PositionStatus::Closed;
        self.closed_at = Some(Utc::now());
    }

    fn apply(&mut self, price: f64) {
        let Pnl { pnl, pnl_percentage } = self.pnl_at(price);
        self.current_price  = price;
        self.pnl            = pnl;
        self.pnl_percentage = pnl_percentage;
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn request(ty: PositionType, amount: f64) -> OpenRequest {
        OpenRequest {
            token_symbol:  "ETH".into(),
            token_name:    "Ethereum".into(),
            position_type: ty,
            amount,
            entry_price:   3000.0,
            leverage:      None,
        }
    }

    #[test]
    fn test_open_starts_flat() {
        let p = Position::open(request(PositionType::Long, 100.0), 3000.0, 2.0).unwrap();
        assert!(p.is_open());
        assert_eq!(p.current_price(), 3000.0);
        assert_eq!(p.pnl(), 0.0);
        assert_eq!(p.pnl_percentage(), 0.0);
    }

    #[test]
    fn test_open_rejects_bad_inputs() {
        let r = Position::open(request(PositionType::Long, 100.0), 0.0, 2.0);
        assert_eq!(r.unwrap_err(), LedgerError::InvalidPrice(0.0));

        let r = Position::open(request(PositionType::Long, 100.0), f64::NAN, 2.0);
        assert!(matches!(r, Err(LedgerError::InvalidPrice(_))));

        let r = Position::open(request(PositionType::Short, -5.0), 10.0, 2.0);
        assert_eq!(r.unwrap_err(), LedgerError::InvalidAmount(-5.0));

        let r = Position::open(request(PositionType::Short, 5.0), 10.0, 0.0);
        assert_eq!(r.unwrap_err(), LedgerError::InvalidLeverage(0.0));
    }

    #[test]
    fn test_leverage_field_is_optional() {
        let r: OpenRequest = serde_json::from_str(
            r#"{"token_symbol":"ETH","token_name":"Ethereum","type":"long","amount":10,"entry_price":3000}"#,
        )
        .unwrap();
        assert_eq!(r.leverage, None);
        assert_eq!(r.position_type, PositionType::Long);
    }

    #[test]
    fn test_close_freezes_pnl() {
        let mut p = Position::open(request(PositionType::Long, 100.0), 3000.0, 2.0).unwrap();
        p.close_at(3300.0);
        let frozen = p.pnl();
        assert_eq!(p.status(), PositionStatus::Closed);
        assert!(p.closed_at().is_some());

        p.reprice(6000.0);
        p.close_at(1.0);
        assert_eq!(p.pnl(), frozen);
        assert_eq!(p.current_price(), 3300.0);
    }

    #[test]
    fn test_restore_recomputes_pnl() {
        let p = Position::restore(
            Uuid::new_v4(),
            "SOL".into(),
            "Wrapped SOL".into(),
            PositionType::Short,
            50.0,
            5.0,
            20.0,
            18.0,
            Utc::now(),
            PositionStatus::Open,
            None,
        );
        assert!((p.pnl() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_serializes_type_and_status_lowercase() {
        let p = Position::open(request(PositionType::Short, 10.0), 5.0, 1.0).unwrap();
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["type"], "short");
        assert_eq!(v["status"], "open");
        assert_eq!(v["pnl"], 0.0);
    }
}
