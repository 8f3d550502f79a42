//! # ledger::pnl
//!
//! สูตร P&L ของ leveraged position: pure function ของ
//! (type, amount, leverage, entry_price, current_price) เท่านั้น
//!
//! ```text
//! long:  pnl = amount × leverage × (current/entry − 1)
//! short: pnl = amount × leverage × (1 − current/entry)
//! pnl_percentage = 100 × leverage × (same ratio term)
//! ```

use serde::Serialize;

use crate::models::PositionType;

/// Derived P&L pair. Never stored on its own: always recomputed from inputs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Pnl {
    pub pnl: f64,
    pub pnl_percentage: f64,
}

impl Pnl {
    pub const ZERO: Pnl = Pnl { pnl: 0.0, pnl_percentage: 0.0 };
}

/// คำนวณ P&L ตามทิศทางของ Position
///
/// `entry_price` ต้อง > 0: Ledger ปฏิเสธตั้งแต่ตอน open แล้ว
/// (ถ้าหลุดมาถึงนี่จะคืน [`Pnl::ZERO`] แทน NaN/Infinity)
#[inline]
pub fn compute(
    position_type: PositionType,
    amount: f64,
    leverage: f64,
    entry_price: f64,
    current_price: f64,
) -> Pnl {
    if entry_price <= 0.0 || !entry_price.is_finite() {
        return Pnl::ZERO;
    }

    let ratio = match position_type {
        PositionType::Long  => current_price / entry_price - 1.0,
        PositionType::Short => 1.0 - current_price / entry_price,
    };

    Pnl {
        pnl:            amount * leverage * ratio,
        pnl_percentage: 100.0 * leverage * ratio,
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
