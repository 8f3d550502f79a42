//! # ledger: Position Ledger & P&L Engine
//!
//! Source of truth เดียวของ "อะไรเปิดอยู่" และ "P&L ตอนนี้เท่าไหร่"
//!
//! ## Operations
//! ```text
//! open(request)            → Position | NotReady | InvalidPrice
//! close(id, price)         → bool  (false = ไม่มี / ปิดไปแล้ว / ราคาไม่ valid, ไม่แตะ state)
//! set_leverage(x)          → default leverage ของ position ใหม่ (ตัวที่เปิดอยู่ไม่เปลี่ยน)
//! update_price(sym, price) → reprice ทุก open position ของ symbol นั้น
//! total_pnl()              → Σ pnl ของ open positions (คำนวณสดทุกครั้ง)
//! ```
//!
//! Ledger เป็น single-owner, `&mut self` ทุก mutation: ไม่มี lock ภายใน.
//! ฝั่ง service ห่อด้วย `tokio::sync::RwLock` ที่ composition root.
//! ทุก mutation สั่งเขียน snapshot ทับทันที (write-through, ลงดิสก์นอก async
//! thread); ถ้าเขียนไม่ได้แค่ log แล้วทำงานต่อใน memory.

pub mod pnl;
pub mod store;

use std::collections::HashMap;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::market::PriceBook;
use crate::models::{ConnectionStatus, OpenRequest, Position, Readiness};

pub use pnl::Pnl;
pub use store::SnapshotStore;

pub const DEFAULT_LEVERAGE: f64 = 1.0;

// ─── Ledger ───────────────────────────────────────────────────────────────────

pub struct Ledger {
    /// insertion order: ไม่มีการลบ (close = mark closed)
    positions: Vec<Position>,
    index:     HashMap<Uuid, usize>,
    /// Readiness ของ session: อ่านใหม่ทุกครั้งที่ open
    status:    watch::Receiver<ConnectionStatus>,
    /// ราคาตลาดล่าสุด ใช้เป็น entry price ก่อนราคาที่ UI ส่งมา
    book:      PriceBook,
    store:     Option<SnapshotStore>,
    /// ใช้กับ swipe ที่ไม่ระบุ leverage
    leverage:  f64,
}

impl Ledger {
    pub fn new(status: watch::Receiver<ConnectionStatus>, book: PriceBook) -> Self {
        Self {
            positions: Vec::new(),
            index:     HashMap::new(),
            status,
            book,
            store:     None,
            leverage:  DEFAULT_LEVERAGE,
        }
    }

    /// ผูก store สำหรับ write-through (ยังไม่โหลดอะไร)
    pub fn with_store(mut self, store: SnapshotStore) -> Self {
        self.store = Some(store);
        self
    }

    /// โหลด snapshot ครั้งเดียวตอนเริ่ม: โหลดไม่ได้ก็เริ่มว่าง
    pub fn restore(mut self) -> Self {
        let Some(store) = self.store.as_ref() else {
            return self;
        };

        let loaded = match store.load() {
            Ok(positions) => positions,
            Err(e) => {
                error!(path = %store.path().display(), error = %e, "Snapshot load failed, starting empty");
                Vec::new()
            }
        };

        self.positions.clear();
        self.index.clear();
        info!(count = loaded.len(), "💾 Ledger restored from snapshot");
        for position in loaded {
            self.insert(position);
        }
        self
    }

    fn insert(&mut self, position: Position) {
        self.index.insert(position.id, self.positions.len());
        self.positions.push(position);
    }

    pub fn readiness(&self) -> Readiness {
        self.status.borrow().readiness()
    }

    pub fn leverage(&self) -> f64 {
        self.leverage
    }

    /// เปลี่ยน default leverage: มีผลกับ position ที่เปิดหลังจากนี้เท่านั้น
    pub fn set_leverage(&mut self, leverage: f64) -> Result<f64, LedgerError> {
        if !leverage.is_finite() || leverage <= 0.0 {
            return Err(LedgerError::InvalidLeverage(leverage));
        }
        if leverage != self.leverage {
            info!(from = self.leverage, to = leverage, "⚙️ Default leverage changed");
        }
        self.leverage = leverage;
        Ok(leverage)
    }

    // ─── Mutations ────────────────────────────────────────────────────────────

    /// เปิด Position ใหม่จาก swipe
    pub fn open(&mut self, request: OpenRequest) -> Result<Position, LedgerError> {
        let readiness = self.readiness();
        if readiness == Readiness::NotReady {
            debug!(symbol = %request.token_symbol, "Open rejected, channel not ready");
            return Err(LedgerError::NotReady);
        }

        // ── Entry price: ราคาตลาดล่าสุดก่อน ราคาจาก UI อาจเก่าแล้ว ─────────────
        let entry_price = match self.book.latest_price(&request.token_symbol) {
            Some(market) => {
                if market != request.entry_price {
                    debug!(
                        symbol    = %request.token_symbol,
                        requested = request.entry_price,
                        market,
                        "Using latest market price as entry"
                    );
                }
                market
            }
            None => request.entry_price,
        };

        let leverage = request.leverage.unwrap_or(self.leverage);
        let position = Position::open(request, entry_price, leverage)?;
        self.insert(position.clone());

        info!(
            position_id = %position.id,
            symbol      = %position.token_symbol,
            direction   = ?position.position_type,
            amount      = position.amount,
            leverage    = position.leverage,
            entry_price,
            mode        = ?readiness,
            "📈 Position opened"
        );

        self.persist();
        Ok(position)
    }

    /// ปิด Position ที่ `price`: คืน `false` ถ้าไม่มีหรือปิดไปแล้ว (no-op)
    pub fn close(&mut self, id: Uuid, price: f64) -> bool {
        if !price.is_finite() || price <= 0.0 {
            warn!(position_id = %id, price, "Close ignored, not a positive finite price");
            return false;
        }

        let Some(&slot) = self.index.get(&id) else {
            return false;
        };
        let position = &mut self.positions[slot];
        if !position.is_open() {
            return false;
        }

        position.close_at(price);
        info!(
            position_id = %id,
            symbol      = %position.token_symbol,
            close_price = price,
            pnl         = position.pnl(),
            "📉 Position closed"
        );

        self.persist();
        true
    }

    /// Broadcast ราคาใหม่ให้ทุก open position ของ `symbol`
    ///
    /// คืนจำนวน position ที่ถูก reprice (0 = no-op, ไม่เขียน snapshot)
    pub fn update_price(&mut self, symbol: &str, price: f64) -> usize {
        if !price.is_finite() || price <= 0.0 {
            warn!(symbol, price, "Price update ignored, not a positive finite price");
            return 0;
        }

        let mut touched = 0;
        for position in self
            .positions
            .iter_mut()
            .filter(|p| p.is_open() && p.token_symbol == symbol)
        {
            position.reprice(price);
            touched += 1;
        }

        if touched > 0 {
            debug!(symbol, price, touched, "Positions repriced");
            self.persist();
        }
        touched
    }

    // ─── Queries ──────────────────────────────────────────────────────────────

    /// Σ pnl ของ open positions: ไม่มี cached total ที่ drift ได้
    pub fn total_pnl(&self) -> f64 {
        self.positions
            .iter()
            .filter(|p| p.is_open())
            .map(Position::pnl)
            .sum()
    }

    pub fn list_open(&self) -> Vec<Position> {
        self.positions.iter().filter(|p| p.is_open()).cloned().collect()
    }

    /// ทุก status ของ symbol นี้ (รวมที่ปิดแล้ว)
    pub fn list_for_symbol(&self, symbol: &str) -> Vec<Position> {
        self.positions
            .iter()
            .filter(|p| p.token_symbol == symbol)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: Uuid) -> Option<&Position> {
        self.index.get(&id).map(|&slot| &self.positions[slot])
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    // ─── Persistence ──────────────────────────────────────────────────────────

    fn persist(&self) {
        if let Some(store) = &self.store {
            store.write_behind(&self.positions);
        }
    }

    /// รอ snapshot ที่ค้างอยู่ให้ลงดิสก์
    pub async fn flush(&self) {
        if let Some(store) = &self.store {
            store.flush().await;
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
