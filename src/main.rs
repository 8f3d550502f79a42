//! # TokenSwiper: Swipe-Trading Backend
//!
//! ## Architecture Overview
//!
//! ```text
//!  ┌──────────────┐  POST /api/positions      ┌──────────────────────┐
//!  │  Swipe UI    │ ─────────────────────────▶│  AppState            │
//!  │              │ ◀─────────────────────────│   RwLock<Ledger>     │
//!  └──────────────┘  WS /ws/monitor           │   PriceBook          │
//!                                             │   watch<Status>      │
//!  ┌──────────────┐  wss (auth_request …)     └──────────────────────┘
//!  │  ClearNode   │ ◀──── SessionClient ───────────┤   ▲
//!  └──────────────┘       (demo fallback)          │   │ reprice
//!                                                  ▼   │
//!  ┌──────────────┐  GET /networks/…/tokens/…  ┌──────────────────────┐
//!  │ GeckoTerminal│ ◀──────────────────────────│  feed poller / jitter│
//!  └──────────────┘                            └──────────────────────┘
//! ```
//!
//! ดูตัวแปร env ทั้งหมดที่ [`tokenswiper::config::Config::from_env`]

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tokenswiper::{
    auth::{SessionClient, SessionCommand, Signer, WsConnector},
    config::{Config, FeedSource},
    ledger::{Ledger, SnapshotStore},
    market::{
        poller::{run_demo_jitter, run_feed_poller},
        GeckoTerminalFeed, MockFeed, PriceBook, PriceFeed,
    },
    models::{default_watchlist, ConnectionStatus},
    routes,
    state::AppState,
};

// ─── Entry Point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Load .env (optional: CI/prod can use real env vars) ──────────────
    dotenvy::dotenv().ok();

    // ── 2. Initialise structured logging ─────────────────────────────────────
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env()
            .add_directive("tokenswiper=debug".parse()?)
            .add_directive("tower_http=info".parse()?)
            .add_directive("reqwest=warn".parse()?))
        .init();

    info!(
        r#"

  ╔═══════════════════════════════════════════════╗
  ║        TOKENSWIPER · Trading Backend          ║
  ║        Rust + Axum  ·  Ledger & Session       ║
  ╚═══════════════════════════════════════════════╝"#
    );

    // ── 3. Config ─────────────────────────────────────────────────────────────
    let config = Config::from_env()?;
    info!(
        clearnode = %config.clearnode_url,
        feed      = ?config.feed,
        snapshot  = %config.snapshot_path.display(),
        "⚙️  Config loaded"
    );

    // ── 4. Shared handles ─────────────────────────────────────────────────────
    let book = PriceBook::new();
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::disconnected());
    let (broadcast_tx, _) = broadcast::channel::<String>(1024);
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (session_tx, session_rx) = mpsc::channel::<SessionCommand>(16);

    // ── 5. Ledger (โหลด snapshot ครั้งเดียว) ──────────────────────────────────
    let ledger = Ledger::new(status_rx.clone(), book.clone())
        .with_store(SnapshotStore::new(&config.snapshot_path))
        .restore();

    let state = Arc::new(AppState::new(
        ledger,
        book,
        default_watchlist(),
        status_rx,
        session_tx.clone(),
        broadcast_tx.clone(),
    ));

    // ── 6. Session task ───────────────────────────────────────────────────────
    let client = SessionClient::new(
        WsConnector,
        load_signer(&config)?,
        config.session_settings(),
        status_tx,
        broadcast_tx,
    );
    let session_task = tokio::spawn(client.run(session_rx, shutdown_tx.subscribe()));

    if config.auto_connect {
        session_tx.send(SessionCommand::Connect).await?;
    }

    // ── 7. Price feed + demo jitter ───────────────────────────────────────────
    let feed: Arc<dyn PriceFeed> = match &config.feed {
        FeedSource::Mock => Arc::new(MockFeed::new(default_watchlist())),
        FeedSource::GeckoTerminal { base_url } => {
            Arc::new(GeckoTerminalFeed::new(reqwest::Client::new(), base_url.clone()))
        }
    };
    let poller_task = tokio::spawn(run_feed_poller(
        state.clone(),
        feed,
        config.feed_poll,
        shutdown_tx.subscribe(),
    ));
    let jitter_task = tokio::spawn(run_demo_jitter(
        state.clone(),
        config.demo_jitter,
        shutdown_tx.subscribe(),
    ));

    // ── 8. Router ─────────────────────────────────────────────────────────────
    let cors = CorsLayer::new()
        .allow_origin(Any)   // Tighten in production!
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // ── 9. Serve until Ctrl-C ─────────────────────────────────────────────────
    info!(addr = ?config.bind_addr, "🚀 TokenSwiper server starting");

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let mut server_shutdown = shutdown_tx.subscribe();
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("🛑 Ctrl-C received, shutting down"),
            Err(e) => {
                warn!(error = %e, "Cannot listen for Ctrl-C, running until killed");
                return;
            }
        }
        let _ = signal_tx.send(());
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.recv().await;
        })
        .await?;

    // ── 10. Teardown ──────────────────────────────────────────────────────────
    let _ = tokio::join!(session_task, poller_task, jitter_task);
    state.ledger.read().await.flush().await;
    info!("👋 TokenSwiper stopped");

    Ok(())
}

/// Signing capability จาก `PRIVATE_KEY`: ไม่มี key = demo session
fn load_signer(config: &Config) -> anyhow::Result<Option<Arc<dyn Signer>>> {
    let Some(key) = config.private_key.as_deref() else {
        warn!("PRIVATE_KEY not set, sessions will run in demo mode");
        return Ok(None);
    };

    #[cfg(feature = "signing")]
    {
        let signer = tokenswiper::auth::LocalKeySigner::from_hex(key)?;
        info!(address = %signer.address(), "🔑 Local signer loaded");
        Ok(Some(Arc::new(signer)))
    }

    #[cfg(not(feature = "signing"))]
    {
        let _ = key;
        warn!("PRIVATE_KEY is set but the `signing` feature is disabled, sessions will run in demo mode");
        Ok(None)
    }
}
