//! # state
//!
//! AppState: handle เดียวที่ composition root สร้างแล้วส่งให้ทุก handler
//! และ background task (ไม่มี global singleton)

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch, RwLock};

use crate::auth::SessionCommand;
use crate::events::WsEvent;
use crate::ledger::Ledger;
use crate::market::PriceBook;
use crate::models::{ConnectionStatus, TokenConfig};

// ─── AppState ─────────────────────────────────────────────────────────────────

/// Top-level shared state injected into every Axum handler.
#[derive(Clone)]
pub struct AppState {
    // ── Ledger ────────────────────────────────────────────────────────────────
    /// Source of truth ของ positions: ทุก mutation ผ่าน write lock นี้
    pub ledger: Arc<RwLock<Ledger>>,

    // ── Market ────────────────────────────────────────────────────────────────
    /// ราคาล่าสุดต่อ instrument (feed poller เขียน, Ledger อ่าน)
    pub book:      PriceBook,
    pub watchlist: Arc<Vec<TokenConfig>>,

    // ── Session ───────────────────────────────────────────────────────────────
    /// Status ที่ SessionClient publish
    pub status_rx:  watch::Receiver<ConnectionStatus>,
    /// คำสั่งเข้า session task (connect / demo / disconnect)
    pub session_tx: mpsc::Sender<SessionCommand>,

    // ── Monitor / WebSocket ───────────────────────────────────────────────────
    /// Broadcast channel สำหรับส่ง Event ไปยัง WebSocket clients
    /// ใช้ String (pre-serialized JSON) เพื่อหลีกเลี่ยง Clone constraints
    pub broadcast_tx: broadcast::Sender<String>,
}

impl AppState {
    pub fn new(
        ledger: Ledger,
        book: PriceBook,
        watchlist: Vec<TokenConfig>,
        status_rx: watch::Receiver<ConnectionStatus>,
        session_tx: mpsc::Sender<SessionCommand>,
        broadcast_tx: broadcast::Sender<String>,
    ) -> Self {
        Self {
            ledger:    Arc::new(RwLock::new(ledger)),
            book,
            watchlist: Arc::new(watchlist),
            status_rx,
            session_tx,
            broadcast_tx,
        }
    }

    // ── Helper Methods ────────────────────────────────────────────────────────

    /// Broadcast WsEvent ไปยัง WebSocket clients ทั้งหมด
    /// ไม่ panic ถ้าไม่มี listener (ปลอดภัยสำหรับ headless mode)
    pub fn broadcast(&self, event: &WsEvent) {
        // Err เกิดขึ้นเมื่อไม่มี receiver: ไม่ใช่ error จริงๆ
        let _ = self.broadcast_tx.send(event.to_json());
    }

    /// Snapshot ของ session status ณ ตอนนี้
    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    /// บันทึกราคาลง PriceBook แล้ว reprice Ledger ภายใต้ ledger write lock เดียวกัน
    pub async fn observe_price(&self, symbol: &str, price: f64) -> usize {
        let mut ledger = self.ledger.write().await;
        self.book.observe(symbol, price);
        self.reprice(&mut ledger, symbol, price)
    }

    /// Reprice ทุก open position ของ `symbol` แล้ว broadcast ถ้ามีตัวไหนขยับ
    ///
    /// Caller ต้องถือ ledger write lock ตั้งแต่ก่อนเขียนราคาลง book: ทุกคนที่เขียน
    /// ราคาผ่าน lock นี้ ลำดับราคาใน book กับใน Ledger จึงตรงกันเสมอ
    pub fn reprice(&self, ledger: &mut Ledger, symbol: &str, price: f64) -> usize {
        let repriced = ledger.update_price(symbol, price);
        if repriced > 0 {
            self.broadcast(&WsEvent::PricesUpdated {
                symbol: symbol.to_string(),
                price,
                repriced,
                total_pnl: ledger.total_pnl(),
            });
        }
        repriced
    }
}

/// Convenience type alias
pub type SharedState = Arc<AppState>;
