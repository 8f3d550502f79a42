//! # events
//!
//! Defines [`WsEvent`]: ทุก Event ที่ระบบ Broadcast ออกไปผ่าน WebSocket
//! ไปยัง swipe UI
//!
//! ใช้ `tokio::sync::broadcast::Sender<String>` โดยแปลง WsEvent เป็น JSON
//! String ก่อนส่ง เพื่อหลีกเลี่ยง Clone constraints ที่ซับซ้อน

use serde::Serialize;

use crate::models::{ConnectionStatus, Position, TokenQuote};

/// Event ทุกรูปแบบที่ UI จะได้รับแบบ Real-time
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WsEvent {
    /// Swipe สำเร็จ: Position ใหม่อยู่ใน Ledger แล้ว
    PositionOpened {
        position: Box<Position>,
    },

    /// Position ถูกปิด: P&L freeze แล้ว
    PositionClosed {
        position: Box<Position>,
    },

    /// ราคาใหม่ของ symbol ถูก broadcast เข้า Ledger
    PricesUpdated {
        symbol:    String,
        price:     f64,
        repriced:  usize,
        total_pnl: f64,
    },

    /// Feed poller ได้ quote ใหม่ของ token card
    QuoteUpdated {
        quote: Box<TokenQuote>,
    },

    /// Default leverage ของ swipe ถัดไปเปลี่ยน
    LeverageChanged {
        leverage: f64,
    },

    /// Coarse status ของ session เปลี่ยน
    SessionStatus {
        status: Box<ConnectionStatus>,
    },

    /// Handshake degrade ไป demo (timeout / connect fail / ไม่มี key)
    DemoFallback {
        reason: String,
    },

    /// ClearNode ปฏิเสธ auth: UI ต้อง initiate ใหม่เอง
    AuthFailed {
        reason: String,
    },
}

impl WsEvent {
    /// แปลงเป็น JSON String สำหรับส่งผ่าน WebSocket
    #[inline]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"event":"SERIALIZATION_ERROR"}"#.to_string())
    }
}
