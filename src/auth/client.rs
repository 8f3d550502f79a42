//! # auth::client: Session driver
//!
//! ขับ [`AuthMachine`] ด้วย I/O จริง: เปิด transport, ส่ง/รับ frame, เรียก signer
//! และคุม deadline ของแต่ละ phase ด้วย `tokio::time::timeout_at`
//!
//! ## Flow
//! ```text
//! SessionCommand::Connect → handshake()   (Demo / Disconnect ตัดกลางทางได้)
//!   OpenTransport     → Connector::connect      (T_connect)
//!   SendAuthRequest   → auth_request            (T_auth รอ challenge)
//!   SignChallenge     → Signer + auth_verify    (T_auth)
//!   CreateAppSession  → create_app_session      (T_auth)
//! ```
//!
//! Status ทุกครั้งที่เปลี่ยนถูก publish ลง `watch` (Ledger อ่าน) และ broadcast
//! เป็น `SESSION_STATUS` ให้ UI. Deadline ของ phase เก่าถูกทิ้งทันทีที่ phase เปลี่ยน.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{timeout_at, Instant};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::auth::frames::{self, AuthRequestParams};
use crate::auth::machine::{AuthCommand, AuthEvent, AuthMachine, AuthNotice, AuthState, TimeoutPhase};
use crate::auth::signer::{PolicyMessage, Signer};
use crate::error::{AuthError, TransportError};
use crate::events::WsEvent;
use crate::models::{ConnectionStatus, Readiness};

// ─── Transport Traits ─────────────────────────────────────────────────────────

/// Message-oriented duplex channel ไปยัง ClearNode
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// `None` = ปลายทางปิด connection แล้ว
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    async fn close(&mut self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    type Conn: Transport + 'static;

    async fn connect(&self, url: &str) -> Result<Self::Conn, TransportError>;
}

// ─── WebSocket ────────────────────────────────────────────────────────────────

/// Connector จริงบน `tokio-tungstenite`
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connector for WsConnector {
    type Conn = WsTransport;

    async fn connect(&self, url: &str) -> Result<WsTransport, TransportError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(WsTransport { stream })
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Ping(data)) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        debug!(error = %e, "Failed to answer ClearNode ping");
                    }
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "ClearNode sent close frame");
                    return None;
                }
                Ok(_) => {} // Binary / Pong: ไม่ใช้
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "ClearNode close handshake failed");
        }
    }
}

// ─── Settings / Commands ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub url:                String,
    pub app_name:           String,
    pub scope:              String,
    pub session_ttl:        Duration,
    pub initial_allocation: u64,
    pub connect_timeout:    Duration,
    pub auth_timeout:       Duration,
}

/// คำสั่งจาก HTTP handler เข้า session task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Connect,
    Demo,
    Disconnect,
}

// ─── SessionClient ────────────────────────────────────────────────────────────

pub struct SessionClient<C: Connector> {
    connector: C,
    signer:    Option<Arc<dyn Signer>>,
    settings:  SessionSettings,
    machine:   AuthMachine,
    transport: Option<C::Conn>,
    /// Deadline ของ phase ที่กำลังรอ
    deadline:  Option<(TimeoutPhase, Instant)>,
    /// `expire` ที่ส่งใน auth_request: policy ที่เซ็นต้องใช้ค่าเดียวกัน
    expire:    u64,
    next_id:   u64,
    rejection: Option<String>,
    status_tx: watch::Sender<ConnectionStatus>,
    events:    broadcast::Sender<String>,
}

impl<C: Connector> SessionClient<C> {
    pub fn new(
        connector: C,
        signer: Option<Arc<dyn Signer>>,
        settings: SessionSettings,
        status_tx: watch::Sender<ConnectionStatus>,
        events: broadcast::Sender<String>,
    ) -> Self {
        Self {
            connector,
            signer,
            settings,
            machine:   AuthMachine::new(),
            transport: None,
            deadline:  None,
            expire:    0,
            next_id:   0,
            rejection: None,
            status_tx,
            events,
        }
    }

    pub fn machine(&self) -> &AuthMachine {
        &self.machine
    }

    pub fn status(&self) -> ConnectionStatus {
        self.machine.status()
    }

    // ─── Handshake ────────────────────────────────────────────────────────────

    /// เดิน handshake จนจบ: `Live` / `Demo` หรือ error ถ้าถูกปฏิเสธ
    pub async fn handshake(&mut self) -> Result<Readiness, AuthError> {
        if !self.machine.can_initiate() {
            return Err(AuthError::AlreadyActive);
        }
        self.rejection = None;

        let participant = self.signer.as_ref().map(|s| s.address());
        info!(
            participant = participant.as_deref().unwrap_or("-"),
            url         = %self.settings.url,
            "🔐 Starting ClearNode handshake"
        );
        self.step(AuthEvent::Initiate { participant }).await;

        loop {
            match self.machine.state() {
                AuthState::Ready { session: Some(_) } => return Ok(Readiness::Live),
                AuthState::DemoReady { .. } => return Ok(Readiness::Demo),
                AuthState::Disconnected => {
                    return Err(match self.rejection.take() {
                        Some(reason) => AuthError::Rejected(reason),
                        None => AuthError::Transport(TransportError::Receive(
                            "transport closed during handshake".into(),
                        )),
                    });
                }
                _ => {}
            }
            let event = self.next_event().await;
            self.step(event).await;
        }
    }

    /// Event loop ของ session task: จบเมื่อได้ shutdown หรือ command channel ปิด
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        self.publish();

        loop {
            let listening = self.transport.is_some();
            tokio::select! {
                _ = shutdown.recv() => break,

                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.apply(command, &mut commands, &mut shutdown).await {
                        break;
                    }
                }

                // Session จริงยังต้องฟัง transport เพื่อรู้ตอนถูกปิด
                event = self.next_event(), if listening => {
                    self.step(event).await;
                }
            }
        }

        self.step(AuthEvent::Disconnect).await;
        info!("🛑 Session client stopped");
    }

    /// คืน `false` ถ้าได้ shutdown (หรือ command channel ปิด) ระหว่าง handshake
    ///
    /// ระหว่าง handshake ยังฟัง command ต่อ: Demo / Disconnect ทิ้ง handshake
    /// แล้วป้อนเข้า machine ทันที, Connect ซ้ำถูกข้าม
    async fn apply(
        &mut self,
        command: SessionCommand,
        commands: &mut mpsc::Receiver<SessionCommand>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> bool {
        debug!(?command, "Session command");

        let event = match control_event(command) {
            Some(event) => event,
            None => {
                let handshake = self.handshake();
                tokio::pin!(handshake);
                loop {
                    tokio::select! {
                        result = &mut handshake => {
                            report(result);
                            return true;
                        }
                        _ = shutdown.recv() => return false,
                        next = commands.recv() => {
                            let Some(next) = next else { return false };
                            match control_event(next) {
                                Some(event) => {
                                    info!(command = ?next, "⏹️ Handshake interrupted");
                                    break event;
                                }
                                None => warn!("Connect ignored, handshake already running"),
                            }
                        }
                    }
                }
            }
        };

        self.step(event).await;
        true
    }

    // ─── Event Pump ───────────────────────────────────────────────────────────

    /// ป้อน event เข้า machine แล้วทำ command จนไม่มี follow-up เหลือ
    async fn step(&mut self, event: AuthEvent) {
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            let commands = self.machine.handle(event);
            self.arm_deadline();

            for command in commands {
                // follow-up เปลี่ยน state แล้ว: command ที่เหลือของ batch นี้ stale
                if let Some(follow_up) = self.execute(command).await {
                    queue.push_back(follow_up);
                    break;
                }
            }
        }

        self.publish();
    }

    fn arm_deadline(&mut self) {
        match (self.machine.pending_timeout(), self.deadline) {
            (None, _) => self.deadline = None,
            (Some(phase), Some((armed, _))) if armed == phase => {}
            (Some(phase), _) => {
                let budget = match phase {
                    TimeoutPhase::Connect => self.settings.connect_timeout,
                    _ => self.settings.auth_timeout,
                };
                self.deadline = Some((phase, Instant::now() + budget));
            }
        }
    }

    async fn next_event(&mut self) -> AuthEvent {
        loop {
            let deadline = self.deadline;
            let Some(transport) = self.transport.as_mut() else {
                return AuthEvent::TransportClosed;
            };

            let received = match within(deadline, transport.recv()).await {
                Ok(received) => received,
                Err(phase) => return AuthEvent::Timeout(phase),
            };

            match received {
                None => return AuthEvent::TransportClosed,
                Some(Err(e)) => return AuthEvent::TransportFailed { reason: e.to_string() },
                Some(Ok(text)) => match frames::decode(&text) {
                    Ok(frame) => {
                        debug!(frame = frame.name(), "📨 ClearNode frame");
                        return AuthEvent::Frame(frame);
                    }
                    Err(e) => {
                        let preview: String = text.chars().take(200).collect();
                        error!(error = %e, frame = %preview, "Dropping malformed ClearNode frame");
                    }
                },
            }
        }
    }

    // ─── Commands ─────────────────────────────────────────────────────────────

    async fn execute(&mut self, command: AuthCommand) -> Option<AuthEvent> {
        match command {
            AuthCommand::OpenTransport                 => self.open_transport().await,
            AuthCommand::SendAuthRequest               => self.send_auth_request().await,
            AuthCommand::SignChallenge { challenge }   => self.answer_challenge(challenge).await,
            AuthCommand::CreateAppSession              => self.create_app_session().await,
            AuthCommand::CloseTransport => {
                self.close_transport().await;
                None
            }
            AuthCommand::Notify(notice) => {
                self.notify(notice);
                None
            }
        }
    }

    async fn open_transport(&mut self) -> Option<AuthEvent> {
        self.close_transport().await;

        let connect = self.connector.connect(&self.settings.url);
        match within(self.deadline, connect).await {
            Ok(Ok(conn)) => {
                info!(url = %self.settings.url, "🌐 Connected to ClearNode");
                self.transport = Some(conn);
                Some(AuthEvent::TransportOpened)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "ClearNode connect failed");
                Some(AuthEvent::TransportFailed { reason: e.to_string() })
            }
            Err(phase) => Some(AuthEvent::Timeout(phase)),
        }
    }

    async fn send_auth_request(&mut self) -> Option<AuthEvent> {
        let address = self.machine.participant().unwrap_or_default().to_string();
        self.expire = Utc::now().timestamp().max(0) as u64 + self.settings.session_ttl.as_secs();

        let params = AuthRequestParams {
            address:     address.clone(),
            session_key: address.clone(),
            app_name:    self.settings.app_name.clone(),
            allowances:  Vec::new(),
            expire:      self.expire,
            scope:       self.settings.scope.clone(),
            application: address,
        };
        let id = self.next_request_id();
        debug!(id, expire = self.expire, "📤 Sending auth_request");
        self.send(frames::auth_request(id, &params, now_ms())).await
    }

    async fn answer_challenge(&mut self, challenge: String) -> Option<AuthEvent> {
        let Some(signer) = self.signer.clone() else {
            return Some(AuthEvent::SigningFailed { reason: "no signer available".into() });
        };

        let participant = signer.address();
        let policy = PolicyMessage {
            challenge:   challenge.clone(),
            scope:       self.settings.scope.clone(),
            wallet:      participant.clone(),
            application: participant.clone(),
            participant,
            expire:      self.expire,
            allowances:  Vec::new(),
        };
        let typed = policy.typed_data(&self.settings.app_name);

        debug!("✍️ Signing auth challenge");
        let signature = match within(self.deadline, signer.sign_structured(&typed)).await {
            Ok(Ok(signature)) => signature,
            Ok(Err(e)) => return Some(AuthEvent::SigningFailed { reason: e.to_string() }),
            Err(phase) => return Some(AuthEvent::Timeout(phase)),
        };

        let id = self.next_request_id();
        debug!(id, "📤 Sending auth_verify");
        self.send(frames::auth_verify(id, &challenge, signature, now_ms())).await
    }

    async fn create_app_session(&mut self) -> Option<AuthEvent> {
        let Some(signer) = self.signer.clone() else {
            return Some(AuthEvent::SigningFailed { reason: "no signer available".into() });
        };

        let participant = signer.address();
        let params = frames::app_session_params(&participant, self.settings.initial_allocation, now_ms());
        let id = self.next_request_id();
        let payload = frames::request_payload(id, "create_app_session", params, now_ms());
        let bytes = payload.to_string().into_bytes();

        let signature = match within(self.deadline, signer.sign_payload(&bytes)).await {
            Ok(Ok(signature)) => signature,
            Ok(Err(e)) => return Some(AuthEvent::SigningFailed { reason: e.to_string() }),
            Err(phase) => return Some(AuthEvent::Timeout(phase)),
        };

        info!(
            id,
            %participant,
            allocation = self.settings.initial_allocation,
            "📈 Requesting app session"
        );
        self.send(frames::envelope(payload, vec![signature])).await
    }

    async fn send(&mut self, frame: String) -> Option<AuthEvent> {
        let Some(transport) = self.transport.as_mut() else {
            return Some(AuthEvent::TransportFailed { reason: "transport is not open".into() });
        };
        match transport.send(frame).await {
            Ok(()) => None,
            Err(e) => Some(AuthEvent::TransportFailed { reason: e.to_string() }),
        }
    }

    async fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
            debug!("Transport closed");
        }
    }

    fn next_request_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    // ─── Outputs ──────────────────────────────────────────────────────────────

    fn notify(&mut self, notice: AuthNotice) {
        match notice {
            AuthNotice::Degraded { reason } => {
                self.broadcast(&WsEvent::DemoFallback { reason });
            }
            AuthNotice::Rejected { reason } => {
                error!(%reason, "ClearNode rejected authentication");
                self.rejection = Some(reason.clone());
                self.broadcast(&WsEvent::AuthFailed { reason });
            }
            AuthNotice::SessionCreated { app_session_id } => {
                info!(%app_session_id, "🚀 Live trading session active");
            }
            AuthNotice::Authenticated => debug!("Authenticated, creating app session"),
            AuthNotice::Disconnected => info!("🔌 Session disconnected"),
        }
    }

    fn broadcast(&self, event: &WsEvent) {
        // Err = ไม่มี subscriber
        let _ = self.events.send(event.to_json());
    }

    fn publish(&self) {
        let status = self.machine.status();
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status.clone();
            true
        });
        if changed {
            self.broadcast(&WsEvent::SessionStatus { status: Box::new(status) });
        }
    }
}

/// รัน `fut` ภายใต้ deadline ของ phase ปัจจุบัน: `Err(phase)` ถ้าหมดเวลา
async fn within<F: Future>(
    deadline: Option<(TimeoutPhase, Instant)>,
    fut: F,
) -> Result<F::Output, TimeoutPhase> {
    match deadline {
        Some((phase, at)) => timeout_at(at, fut).await.map_err(|_| phase),
        None => Ok(fut.await),
    }
}

/// Command ที่แปลงเป็น event ของ machine ได้ตรง ๆ: `None` = Connect (ต้องเดิน handshake)
fn control_event(command: SessionCommand) -> Option<AuthEvent> {
    match command {
        SessionCommand::Connect    => None,
        SessionCommand::Demo       => Some(AuthEvent::EnterDemo { reason: "demo mode requested".into() }),
        SessionCommand::Disconnect => Some(AuthEvent::Disconnect),
    }
}

fn report(result: Result<Readiness, AuthError>) {
    match result {
        Ok(Readiness::Live) => info!("Session ready (live)"),
        Ok(readiness) => info!(?readiness, "Session ready"),
        Err(AuthError::AlreadyActive) => warn!("Connect ignored, session already active"),
        Err(e) => error!(error = %e, "Session handshake failed"),
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::Value;

    use super::*;
    use crate::error::{LedgerError, SignerError};
    use crate::ledger::Ledger;
    use crate::market::PriceBook;
    use crate::models::{AuthPhase, OpenRequest, PositionType};

    struct TestSigner;

    #[async_trait]
    impl Signer for TestSigner {
        fn address(&self) -> String {
            "0xabc".into()
        }

        async fn sign_structured(&self, typed_data: &Value) -> Result<String, SignerError> {
            assert_eq!(typed_data["primaryType"], "Policy");
            Ok("0xpolicy".into())
        }

        async fn sign_payload(&self, _payload: &[u8]) -> Result<String, SignerError> {
            Ok("0xpayload".into())
        }
    }

    struct MemoryTransport {
        tx: mpsc::UnboundedSender<String>,
        rx: mpsc::UnboundedReceiver<String>,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&mut self, text: String) -> Result<(), TransportError> {
            self.tx.send(text).map_err(|e| TransportError::Send(e.to_string()))
        }

        async fn recv(&mut self) -> Option<Result<String, TransportError>> {
            self.rx.recv().await.map(Ok)
        }

        async fn close(&mut self) {
            self.rx.close();
        }
    }

    /// Connector ที่คืน transport ในหน่วยความจำได้ครั้งเดียว; ว่าง = refuse
    struct MemoryConnector {
        slot: Mutex<Option<MemoryTransport>>,
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        type Conn = MemoryTransport;

        async fn connect(&self, _url: &str) -> Result<MemoryTransport, TransportError> {
            self.slot
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| TransportError::Connect("connection refused".into()))
        }
    }

    struct HangingConnector;

    #[async_trait]
    impl Connector for HangingConnector {
        type Conn = MemoryTransport;

        async fn connect(&self, _url: &str) -> Result<MemoryTransport, TransportError> {
            std::future::pending().await
        }
    }

    /// ฝั่ง ClearNode ของ memory transport
    struct Server {
        inbox:  mpsc::UnboundedReceiver<String>,
        outbox: mpsc::UnboundedSender<String>,
    }

    fn memory() -> (MemoryConnector, Server) {
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        let transport = MemoryTransport { tx: client_tx, rx: client_rx };
        (
            MemoryConnector { slot: Mutex::new(Some(transport)) },
            Server { inbox: server_rx, outbox: server_tx },
        )
    }

    fn settings() -> SessionSettings {
        SessionSettings {
            url:                "mem://clearnode".into(),
            app_name:           "TokenSwiper".into(),
            scope:              "trading".into(),
            session_ttl:        Duration::from_secs(3600),
            initial_allocation: 1_000_000,
            connect_timeout:    Duration::from_secs(8),
            auth_timeout:       Duration::from_secs(12),
        }
    }

    fn session<C: Connector>(
        connector: C,
        signer: Option<Arc<dyn Signer>>,
    ) -> (SessionClient<C>, watch::Receiver<ConnectionStatus>, broadcast::Receiver<String>) {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::disconnected());
        let (events_tx, events_rx) = broadcast::channel(64);
        let client = SessionClient::new(connector, signer, settings(), status_tx, events_tx);
        (client, status_rx, events_rx)
    }

    fn method(raw: &str) -> String {
        let v: Value = serde_json::from_str(raw).unwrap();
        v["req"][1].as_str().unwrap().to_string()
    }

    fn drain(events: &mut broadcast::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(raw) = events.try_recv() {
            out.push(raw);
        }
        out
    }

    fn open_request() -> OpenRequest {
        OpenRequest {
            token_symbol:  "ETH".into(),
            token_name:    "Ethereum".into(),
            position_type: PositionType::Long,
            amount:        100.0,
            entry_price:   3000.0,
            leverage:      Some(2.0),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_reaches_live_session() {
        let (connector, mut server) = memory();
        let (mut client, status_rx, _events) = session(connector, Some(Arc::new(TestSigner)));

        let clearnode = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(raw) = server.inbox.recv().await {
                let m = method(&raw);
                let reply = match m.as_str() {
                    "auth_request" => {
                        r#"{"res":[1,"auth_challenge",[{"challenge_message":"c-42"}],0]}"#
                    }
                    "auth_verify" => {
                        let v: Value = serde_json::from_str(&raw).unwrap();
                        assert_eq!(v["req"][2][0]["challenge"], "c-42");
                        assert_eq!(v["sig"][0], "0xpolicy");
                        r#"{"res":[2,"auth_success",[{"jwt_token":"jwt"}],0]}"#
                    }
                    "create_app_session" => {
                        let v: Value = serde_json::from_str(&raw).unwrap();
                        assert_eq!(v["sig"][0], "0xpayload");
                        r#"{"res":[3,"create_app_session",[{"app_session_id":"0xsession"}],0]}"#
                    }
                    other => panic!("unexpected request {other}"),
                };
                seen.push(m);
                server.outbox.send(reply.to_string()).unwrap();
                if seen.len() == 3 {
                    break;
                }
            }
            (seen, server)
        });

        assert_eq!(client.handshake().await.unwrap(), Readiness::Live);
        let (seen, _server) = clearnode.await.unwrap();
        assert_eq!(seen, ["auth_request", "auth_verify", "create_app_session"]);

        let status = status_rx.borrow().clone();
        assert_eq!(status.readiness(), Readiness::Live);
        assert_eq!(status.session.map(|s| s.app_session_id), Some("0xsession".to_string()));
        assert_eq!(client.machine().jwt(), Some("jwt"));

        assert!(matches!(client.handshake().await, Err(AuthError::AlreadyActive)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_challenge_timeout_falls_back_to_demo() {
        // server รับ auth_request แต่ไม่ตอบ
        let (connector, _server) = memory();
        let (mut client, status_rx, mut events) = session(connector, Some(Arc::new(TestSigner)));

        let started = Instant::now();
        assert_eq!(client.handshake().await.unwrap(), Readiness::Demo);
        assert!(started.elapsed() >= Duration::from_secs(12));

        let status = status_rx.borrow().clone();
        assert!(status.is_demo());
        assert!(status.fallback_reason.unwrap().contains("challenge"));
        assert!(drain(&mut events).iter().any(|e| e.contains("DEMO_FALLBACK")));

        // demo ก็เปิด position ได้
        let mut ledger = Ledger::new(status_rx.clone(), PriceBook::new());
        assert!(ledger.open(open_request()).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_falls_back_to_demo() {
        let (mut client, status_rx, _events) = session(HangingConnector, Some(Arc::new(TestSigner)));
        assert_eq!(client.handshake().await.unwrap(), Readiness::Demo);
        let reason = status_rx.borrow().fallback_reason.clone().unwrap();
        assert!(reason.contains("connect"), "{reason}");
    }

    #[tokio::test]
    async fn test_connect_refused_falls_back_to_demo() {
        let connector = MemoryConnector { slot: Mutex::new(None) };
        let (mut client, status_rx, _events) = session(connector, Some(Arc::new(TestSigner)));
        assert_eq!(client.handshake().await.unwrap(), Readiness::Demo);
        assert!(status_rx.borrow().is_ready());
    }

    #[tokio::test]
    async fn test_no_signer_skips_transport() {
        let (connector, _server) = memory();
        let (mut client, status_rx, _events) = session(connector, None);
        assert_eq!(client.handshake().await.unwrap(), Readiness::Demo);
        assert_eq!(status_rx.borrow().phase, AuthPhase::DemoReady);
        // transport ไม่ถูกแตะเลย
        assert!(client.connector.slot.lock().unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_is_surfaced_and_blocks_trading() {
        let (connector, mut server) = memory();
        let (mut client, status_rx, mut events) = session(connector, Some(Arc::new(TestSigner)));

        let clearnode = tokio::spawn(async move {
            while let Some(raw) = server.inbox.recv().await {
                let reply = match method(&raw).as_str() {
                    "auth_request" => r#"{"res":[1,"auth_challenge",[{"challenge_message":"c-1"}],0]}"#,
                    _ => r#"{"res":[2,"auth_failure",[{"reason":"invalid signature"}],0]}"#,
                };
                if server.outbox.send(reply.to_string()).is_err() {
                    break;
                }
            }
        });

        let err = client.handshake().await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected(ref r) if r == "invalid signature"));
        clearnode.abort();

        let status = status_rx.borrow().clone();
        assert_eq!(status.phase, AuthPhase::Disconnected);
        assert_eq!(status.last_error.as_deref(), Some("invalid signature"));
        assert!(drain(&mut events).iter().any(|e| e.contains("AUTH_FAILED")));

        let mut ledger = Ledger::new(status_rx.clone(), PriceBook::new());
        assert_eq!(ledger.open(open_request()).unwrap_err(), LedgerError::NotReady);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_closed_mid_handshake_disconnects() {
        let (connector, mut server) = memory();
        let (mut client, status_rx, _events) = session(connector, Some(Arc::new(TestSigner)));

        // รับ auth_request แล้วตัดสาย
        let clearnode = tokio::spawn(async move {
            let raw = server.inbox.recv().await.unwrap();
            assert_eq!(method(&raw), "auth_request");
            drop(server);
        });

        let started = Instant::now();
        let err = client.handshake().await.unwrap_err();
        clearnode.await.unwrap();

        assert!(matches!(err, AuthError::Transport(_)), "{err}");
        assert!(started.elapsed() < Duration::from_secs(12));
        let status = status_rx.borrow().clone();
        assert_eq!(status.phase, AuthPhase::Disconnected);
        assert!(!status.is_demo());
        assert_eq!(status.fallback_reason, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_while_session_pending_rejects() {
        let (connector, mut server) = memory();
        let (mut client, status_rx, mut events) = session(connector, Some(Arc::new(TestSigner)));

        let clearnode = tokio::spawn(async move {
            while let Some(raw) = server.inbox.recv().await {
                let reply = match method(&raw).as_str() {
                    "auth_request" => r#"{"res":[1,"auth_challenge",[{"challenge_message":"c-1"}],0]}"#,
                    "auth_verify"  => r#"{"res":[2,"auth_success",[{"jwt_token":"jwt"}],0]}"#,
                    _              => r#"{"res":[3,"auth_failure",[{"reason":"revoked"}],0]}"#,
                };
                if server.outbox.send(reply.to_string()).is_err() {
                    break;
                }
            }
        });

        let err = client.handshake().await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected(ref r) if r == "revoked"));
        clearnode.abort();

        // deadline ของ session setup ต้องไม่พากลับไป demo
        tokio::time::sleep(Duration::from_secs(30)).await;
        let status = status_rx.borrow().clone();
        assert_eq!(status.phase, AuthPhase::Disconnected);
        assert_eq!(status.last_error.as_deref(), Some("revoked"));
        assert_eq!(client.machine().jwt(), None);

        let seen = drain(&mut events);
        assert!(seen.iter().any(|e| e.contains("AUTH_FAILED")));
        assert!(!seen.iter().any(|e| e.contains("DEMO_FALLBACK")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_running_handshake() {
        // server รับ auth_request แต่ไม่เคยส่ง challenge
        let (connector, _server) = memory();
        let (client, mut status_rx, mut events) = session(connector, Some(Arc::new(TestSigner)));
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(client.run(cmd_rx, shutdown_rx));

        let started = Instant::now();
        cmd_tx.send(SessionCommand::Connect).await.unwrap();
        status_rx.wait_for(|s| s.phase == AuthPhase::AwaitingChallenge).await.unwrap();

        cmd_tx.send(SessionCommand::Disconnect).await.unwrap();
        status_rx.wait_for(|s| s.phase == AuthPhase::Disconnected).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(12));

        // challenge deadline เดิมไม่ถูกยิงภายหลัง
        tokio::time::sleep(Duration::from_secs(30)).await;
        let status = status_rx.borrow().clone();
        assert_eq!(status.phase, AuthPhase::Disconnected);
        assert_eq!(status.fallback_reason, None);
        assert!(!drain(&mut events).iter().any(|e| e.contains("DEMO_FALLBACK")));

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_demo_request_cancels_hanging_connect() {
        let (client, mut status_rx, _events) = session(HangingConnector, Some(Arc::new(TestSigner)));
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(client.run(cmd_rx, shutdown_rx));

        let started = Instant::now();
        cmd_tx.send(SessionCommand::Connect).await.unwrap();
        cmd_tx.send(SessionCommand::Connect).await.unwrap();
        cmd_tx.send(SessionCommand::Demo).await.unwrap();
        status_rx.wait_for(|s| s.is_demo()).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(8));
        assert_eq!(status_rx.borrow().fallback_reason.as_deref(), Some("demo mode requested"));

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_ws_transport_answers_ping_and_closes_quietly() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::Ping(b"hb".to_vec())).await.unwrap();
            ws.send(Message::Text(r#"{"res":[1,"pong",[],0]}"#.into())).await.unwrap();
            loop {
                match ws.next().await {
                    Some(Ok(Message::Pong(data))) => {
                        assert_eq!(data, b"hb");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    other => panic!("expected pong, got {other:?}"),
                }
            }
            // ตัดสายโดยไม่ทำ close handshake
            drop(ws);
        });

        let mut transport = WsConnector.connect(&format!("ws://{addr}")).await.unwrap();
        let text = transport.recv().await.unwrap().unwrap();
        assert!(text.contains("pong"));
        server.await.unwrap();

        // ปลายทางหายไปแล้ว: close แค่ log
        transport.close().await;
    }

    #[tokio::test]
    async fn test_run_loop_handles_commands_and_shutdown() {
        let (connector, _server) = memory();
        let (client, mut status_rx, _events) = session(connector, None);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = tokio::spawn(client.run(cmd_rx, shutdown_rx));

        cmd_tx.send(SessionCommand::Connect).await.unwrap();
        status_rx.wait_for(|s| s.is_demo()).await.unwrap();

        cmd_tx.send(SessionCommand::Disconnect).await.unwrap();
        status_rx.wait_for(|s| s.phase == AuthPhase::Disconnected).await.unwrap();

        cmd_tx.send(SessionCommand::Demo).await.unwrap();
        status_rx.wait_for(|s| s.is_ready()).await.unwrap();

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
        assert_eq!(status_rx.borrow().phase, AuthPhase::Disconnected);
    }
}
