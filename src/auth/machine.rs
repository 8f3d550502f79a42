//! # auth::machine: Session/Auth State Machine
//!
//! Pure state machine: รับ [`AuthEvent`] คืน [`AuthCommand`] ให้ driver
//! (`auth::client`) ไปทำ I/O. ไม่มี timer หรือ socket ในนี้
//!
//! ```text
//! Disconnected ─initiate─▶ Connecting ─opened─▶ AwaitingChallenge ─challenge─▶ Authenticating
//!      │                      │                       │                           │
//!      │ (no signer)          │ timeout / fail        │ timeout / error           │ auth_success
//!      ▼                      ▼                       ▼                           ▼
//!  DemoReady ◀────────────────┴───────────────────────┘                   Ready (session pending)
//!                                                                              │ create_app_session
//!  Authenticating ─auth_failure─▶ Disconnected (Rejected)                     ▼
//!  any ─transport closed─▶ Disconnected                                  Ready (session active)
//! ```
//!
//! Timeout → DemoReady เสมอ (ไม่ retry). Explicit reject → Disconnected + error.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::auth::frames::InboundFrame;
use crate::models::{AuthPhase, ConnectionStatus, TradingSession};

// ─── State ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    Disconnected,
    Connecting,
    AwaitingChallenge,
    Authenticating,
    /// auth ผ่านแล้ว; `session = None` ระหว่างรอ create_app_session
    Ready { session: Option<TradingSession> },
    DemoReady { session: TradingSession },
}

impl AuthState {
    pub fn phase(&self) -> AuthPhase {
        match self {
            AuthState::Disconnected      => AuthPhase::Disconnected,
            AuthState::Connecting        => AuthPhase::Connecting,
            AuthState::AwaitingChallenge => AuthPhase::AwaitingChallenge,
            AuthState::Authenticating    => AuthPhase::Authenticating,
            AuthState::Ready { .. }      => AuthPhase::Ready,
            AuthState::DemoReady { .. }  => AuthPhase::DemoReady,
        }
    }
}

/// Phase ที่มี deadline กำกับ: timeout ที่ phase ไม่ตรงกับปัจจุบันคือ stale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPhase {
    /// T_connect
    Connect,
    /// T_auth: รอ challenge
    Challenge,
    /// signing + auth_verify round trip
    Verify,
    /// รอ create_app_session หลัง auth_success
    SessionSetup,
}

impl std::fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutPhase::Connect      => write!(f, "connect"),
            TimeoutPhase::Challenge    => write!(f, "challenge"),
            TimeoutPhase::Verify       => write!(f, "verify"),
            TimeoutPhase::SessionSetup => write!(f, "session setup"),
        }
    }
}

// ─── Events / Commands ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    /// `participant = None` → ไม่มี signing capability → demo ทันที
    Initiate { participant: Option<String> },
    /// User ขอ demo ตรงๆ
    EnterDemo { reason: String },
    TransportOpened,
    TransportFailed { reason: String },
    TransportClosed,
    Frame(InboundFrame),
    SigningFailed { reason: String },
    Timeout(TimeoutPhase),
    /// User teardown
    Disconnect,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthCommand {
    OpenTransport,
    SendAuthRequest,
    /// เซ็น challenge แล้วส่ง auth_verify
    SignChallenge { challenge: String },
    CreateAppSession,
    CloseTransport,
    Notify(AuthNotice),
}

/// สิ่งที่ caller ต้องรู้: degrade ไป demo ต้อง observable เสมอ
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthNotice {
    Degraded { reason: String },
    Authenticated,
    SessionCreated { app_session_id: String },
    Rejected { reason: String },
    Disconnected,
}

// ─── Machine ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct AuthMachine {
    state:           AuthState,
    participant:     Option<String>,
    jwt:             Option<String>,
    fallback_reason: Option<String>,
    last_error:      Option<String>,
}

impl Default for AuthMachine {
    fn default() -> Self { Self::new() }
}

impl AuthMachine {
    pub fn new() -> Self {
        Self {
            state:           AuthState::Disconnected,
            participant:     None,
            jwt:             None,
            fallback_reason: None,
            last_error:      None,
        }
    }

    pub fn state(&self) -> &AuthState { &self.state }
    pub fn participant(&self) -> Option<&str> { self.participant.as_deref() }
    pub fn jwt(&self) -> Option<&str> { self.jwt.as_deref() }
    pub fn last_error(&self) -> Option<&str> { self.last_error.as_deref() }

    /// initiate ได้เฉพาะตอนยังไม่มี handshake ค้างหรือ session จริง
    pub fn can_initiate(&self) -> bool {
        matches!(self.state, AuthState::Disconnected | AuthState::DemoReady { .. })
    }

    /// Deadline ที่ควร arm อยู่ในตอนนี้
    pub fn pending_timeout(&self) -> Option<TimeoutPhase> {
        match self.state {
            AuthState::Connecting                => Some(TimeoutPhase::Connect),
            AuthState::AwaitingChallenge         => Some(TimeoutPhase::Challenge),
            AuthState::Authenticating            => Some(TimeoutPhase::Verify),
            AuthState::Ready { session: None }   => Some(TimeoutPhase::SessionSetup),
            _ => None,
        }
    }

    /// Coarse status tuple สำหรับ UI / Ledger
    pub fn status(&self) -> ConnectionStatus {
        let session = match &self.state {
            AuthState::Ready { session }     => session.clone(),
            AuthState::DemoReady { session } => Some(session.clone()),
            _ => None,
        };
        ConnectionStatus {
            phase: self.state.phase(),
            connected: matches!(
                self.state,
                AuthState::AwaitingChallenge | AuthState::Authenticating | AuthState::Ready { .. }
            ),
            authenticated:   matches!(self.state, AuthState::Ready { .. }),
            session,
            fallback_reason: self.fallback_reason.clone(),
            last_error:      self.last_error.clone(),
        }
    }

    // ─── Transitions ──────────────────────────────────────────────────────────

    pub fn handle(&mut self, event: AuthEvent) -> Vec<AuthCommand> {
        let from = self.state.phase();
        let commands = self.transition(event);
        let to = self.state.phase();
        if from != to {
            debug!(?from, ?to, "Auth state transition");
        }
        commands
    }

    fn transition(&mut self, event: AuthEvent) -> Vec<AuthCommand> {
        use AuthCommand::*;

        match event {
            // ── Initiate ──────────────────────────────────────────────────────
            AuthEvent::Initiate { participant } => {
                if !self.can_initiate() {
                    warn!(state = ?self.state.phase(), "Initiate ignored, handshake already running");
                    return Vec::new();
                }
                self.fallback_reason = None;
                self.last_error      = None;
                self.jwt             = None;
                self.participant     = participant;

                if self.participant.is_none() {
                    return self.degrade("no signing capability configured".into());
                }
                self.state = AuthState::Connecting;
                vec![OpenTransport]
            }

            AuthEvent::EnterDemo { reason } => {
                let mut commands = self.degrade(reason);
                commands.insert(0, CloseTransport);
                commands
            }

            // ── Transport ─────────────────────────────────────────────────────
            AuthEvent::TransportOpened => match self.state {
                AuthState::Connecting => {
                    self.state = AuthState::AwaitingChallenge;
                    vec![SendAuthRequest]
                }
                _ => vec![CloseTransport],
            },

            AuthEvent::TransportFailed { reason } => match self.state {
                AuthState::Connecting
                | AuthState::AwaitingChallenge
                | AuthState::Authenticating
                | AuthState::Ready { session: None } => self.fallback(reason),
                AuthState::Ready { session: Some(_) } => self.drop_to_disconnected(),
                _ => Vec::new(),
            },

            AuthEvent::TransportClosed => match self.state {
                AuthState::Disconnected | AuthState::DemoReady { .. } => Vec::new(),
                _ => self.drop_to_disconnected(),
            },

            AuthEvent::Timeout(phase) => {
                if self.pending_timeout() != Some(phase) {
                    debug!(%phase, state = ?self.state.phase(), "Stale timeout ignored");
                    return Vec::new();
                }
                self.fallback(format!("{phase} timeout"))
            }

            AuthEvent::SigningFailed { reason } => match self.state {
                AuthState::Authenticating | AuthState::Ready { session: None } => {
                    self.fallback(format!("signing failed: {reason}"))
                }
                _ => Vec::new(),
            },

            AuthEvent::Disconnect => {
                let was_idle = self.state == AuthState::Disconnected;
                self.state           = AuthState::Disconnected;
                self.jwt             = None;
                self.fallback_reason = None;
                if was_idle {
                    Vec::new()
                } else {
                    vec![CloseTransport, Notify(AuthNotice::Disconnected)]
                }
            }

            // ── Frames ────────────────────────────────────────────────────────
            AuthEvent::Frame(frame) => self.on_frame(frame),
        }
    }

    fn on_frame(&mut self, frame: InboundFrame) -> Vec<AuthCommand> {
        use AuthCommand::*;

        let session_pending = matches!(self.state, AuthState::Ready { session: None });

        match (self.state.phase(), frame) {
            (AuthPhase::AwaitingChallenge, InboundFrame::Challenge { challenge }) => {
                self.state = AuthState::Authenticating;
                vec![SignChallenge { challenge }]
            }

            (AuthPhase::Authenticating, InboundFrame::AuthSuccess { jwt }) => {
                info!("✅ Authenticated with ClearNode");
                self.jwt   = jwt;
                self.state = AuthState::Ready { session: None };
                vec![Notify(AuthNotice::Authenticated), CreateAppSession]
            }

            // node เพิกถอน auth ได้ทุกเมื่อที่ transport ยังเปิด รวมถึงหลัง auth_success
            (
                AuthPhase::AwaitingChallenge | AuthPhase::Authenticating | AuthPhase::Ready,
                InboundFrame::AuthFailure { reason },
            ) => self.reject(reason),

            (AuthPhase::Ready, InboundFrame::SessionCreated { app_session_id }) if session_pending => {
                info!(%app_session_id, "📈 App session created");
                let participants = self.participant.iter().cloned().collect();
                self.state = AuthState::Ready {
                    session: Some(TradingSession::live(app_session_id.clone(), participants)),
                };
                vec![Notify(AuthNotice::SessionCreated { app_session_id })]
            }

            // Generic error: ก่อนส่ง verify = connectivity (demo), ระหว่าง verify = reject
            (AuthPhase::AwaitingChallenge, InboundFrame::Error { code, message }) => {
                self.fallback(format!("ClearNode error {code}: {message}"))
            }
            (AuthPhase::Authenticating, InboundFrame::Error { code, message }) => {
                self.reject(format!("ClearNode error {code}: {message}"))
            }
            (AuthPhase::Ready, InboundFrame::Error { code, message }) if session_pending => {
                self.fallback(format!("app session setup failed {code}: {message}"))
            }

            (phase, frame) => {
                debug!(?phase, frame = frame.name(), "Frame ignored in current state");
                Vec::new()
            }
        }
    }

    // ─── Helpers ──────────────────────────────────────────────────────────────

    /// Connectivity failure → demo + ปิด transport
    fn fallback(&mut self, reason: String) -> Vec<AuthCommand> {
        let mut commands = vec![AuthCommand::CloseTransport];
        commands.extend(self.degrade(reason));
        commands
    }

    fn degrade(&mut self, reason: String) -> Vec<AuthCommand> {
        warn!(%reason, "🎮 Falling back to demo session");
        self.jwt             = None;
        self.fallback_reason = Some(reason.clone());
        self.state = AuthState::DemoReady {
            session: TradingSession::demo(self.participant.clone()),
        };
        vec![AuthCommand::Notify(AuthNotice::Degraded { reason })]
    }

    fn reject(&mut self, reason: String) -> Vec<AuthCommand> {
        warn!(%reason, "❌ Authentication rejected");
        self.jwt        = None;
        self.last_error = Some(reason.clone());
        self.state      = AuthState::Disconnected;
        vec![
            AuthCommand::CloseTransport,
            AuthCommand::Notify(AuthNotice::Rejected { reason }),
        ]
    }

    fn drop_to_disconnected(&mut self) -> Vec<AuthCommand> {
        info!(state = ?self.state.phase(), "🔌 Transport closed");
        self.jwt   = None;
        self.state = AuthState::Disconnected;
        vec![AuthCommand::CloseTransport, AuthCommand::Notify(AuthNotice::Disconnected)]
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
