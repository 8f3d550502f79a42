//! # models::session
//!
//! Session กับ ClearNode และ coarse status ที่ UI / Ledger ใช้ตัดสินว่า
//! "เทรดได้หรือยัง"

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── AuthPhase ────────────────────────────────────────────────────────────────

/// State ของ handshake: mirror ของ `auth::machine::AuthState` ที่ไม่มี payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthPhase {
    Disconnected,
    Connecting,
    AwaitingChallenge,
    Authenticating,
    Ready,
    DemoReady,
}

// ─── TradingSession ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Closed,
}

/// App session ที่ ClearNode สร้างให้หลัง auth สำเร็จ (หรือ session จำลองใน demo)
///
/// ไม่เก็บ position ซ้ำที่นี่: Ledger เป็น source of truth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSession {
    pub app_session_id: String,
    pub participants:   Vec<String>,
    pub status:         SessionStatus,
    pub opened_at:      DateTime<Utc>,
    pub demo:           bool,
}

impl TradingSession {
    pub fn live(app_session_id: String, participants: Vec<String>) -> Self {
        Self {
            app_session_id,
            participants,
            status: SessionStatus::Active,
            opened_at: Utc::now(),
            demo: false,
        }
    }

    pub fn demo(participant: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            app_session_id: format!("demo_{}", now.timestamp_millis()),
            participants:   participant.into_iter().collect(),
            status:         SessionStatus::Active,
            opened_at:      now,
            demo:           true,
        }
    }
}

// ─── Readiness ────────────────────────────────────────────────────────────────

/// "Real" readiness vs "demo" readiness: ทั้งสองแบบเปิด position ได้
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Readiness {
    Live,
    Demo,
    NotReady,
}

// ─── ConnectionStatus ─────────────────────────────────────────────────────────

/// Coarse status tuple ที่ publish ผ่าน `watch` channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub phase:           AuthPhase,
    pub connected:       bool,
    pub authenticated:   bool,
    pub session:         Option<TradingSession>,
    /// เหตุผลที่ degrade ไป demo (None ถ้าไม่ได้ fallback)
    pub fallback_reason: Option<String>,
    /// Error ล่าสุดที่ต้องแจ้ง UI เช่น auth rejected
    pub last_error:      Option<String>,
}

impl ConnectionStatus {
    pub fn disconnected() -> Self {
        Self {
            phase:           AuthPhase::Disconnected,
            connected:       false,
            authenticated:   false,
            session:         None,
            fallback_reason: None,
            last_error:      None,
        }
    }

    #[inline]
    pub fn session_active(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.status == SessionStatus::Active)
            .unwrap_or(false)
    }

    pub fn readiness(&self) -> Readiness {
        match self.phase {
            AuthPhase::Ready if self.connected && self.authenticated && self.session_active() => {
                Readiness::Live
            }
            AuthPhase::DemoReady if self.session_active() => Readiness::Demo,
            _ => Readiness::NotReady,
        }
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.readiness() != Readiness::NotReady
    }

    #[inline]
    pub fn is_demo(&self) -> bool {
        self.phase == AuthPhase::DemoReady
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self { Self::disconnected() }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
