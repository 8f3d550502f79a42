//! # market::poller
//!
//! Background tasks ฝั่งราคา:
//!
//! 1. **Feed poller**: ทุก `FEED_POLL_SECS` ดึงราคาทุก instrument ใน watchlist.
//!    แต่ละ fetch ถูก spawn แยก (fire-and-forget) ได้ ticket จาก [`PriceBook`](crate::market::PriceBook)
//!    ก่อนเริ่ม: ผลที่ตอบช้ากว่า fetch รุ่นใหม่จะถูกทิ้ง
//! 2. **Demo jitter**: เฉพาะตอน session อยู่ใน demo จะขยับราคา ±0.5% ทีละ
//!    instrument ตามรอบ ให้ P&L บนจอมีชีวิต
//!
//! ทั้งสอง task `select!` บน shutdown channel แล้วจบเอง

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::events::WsEvent;
use crate::market::book::FetchTicket;
use crate::market::feed::{fetch_or_fallback, PriceFeed};
use crate::models::TokenQuote;
use crate::state::SharedState;

// ─── Feed Poller ──────────────────────────────────────────────────────────────

pub async fn run_feed_poller(
    state: SharedState,
    feed: Arc<dyn PriceFeed>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        instruments = state.watchlist.len(),
        period_secs = period.as_secs(),
        "📡 Price feed poller started"
    );

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                refresh_all(&state, &feed);
            }
        }
    }

    info!("🛑 Price feed poller stopped");
}

/// เริ่ม fetch ทุก instrument: ไม่รอผล
pub fn refresh_all(state: &SharedState, feed: &Arc<dyn PriceFeed>) -> Vec<JoinHandle<bool>> {
    state
        .watchlist
        .iter()
        .map(|config| {
            let ticket = state.book.begin_fetch(config);
            let state  = state.clone();
            let feed   = feed.clone();
            let config = config.clone();
            tokio::spawn(async move {
                let quote = fetch_or_fallback(feed.as_ref(), &state.book, &config).await;
                apply_quote(&state, ticket, quote).await
            })
        })
        .collect()
}

/// รับผล fetch เข้า book → broadcast quote → reprice Ledger
///
/// คืน `false` ถ้า ticket stale (มี fetch ที่ใหม่กว่าเริ่มไปแล้ว)
///
/// ถือ ledger write lock ข้าม resolve → reprice: jitter / manual tick แทรกกลางไม่ได้
pub async fn apply_quote(state: &SharedState, ticket: FetchTicket, quote: TokenQuote) -> bool {
    let mut ledger = state.ledger.write().await;
    if !state.book.resolve(ticket, quote.clone()) {
        return false;
    }

    let (symbol, price) = (quote.symbol.clone(), quote.price);
    let has_price = quote.has_price();
    state.broadcast(&WsEvent::QuoteUpdated { quote: Box::new(quote) });

    // zeroed fallback ไม่มีราคา: ห้ามเอา 0 ไป reprice
    if has_price {
        state.reprice(&mut ledger, &symbol, price);
    }
    true
}

// ─── Demo Jitter ──────────────────────────────────────────────────────────────

/// ตัวคูณราคา ±0.5% แบบ deterministic ตาม tick (step 0.25%, กลับทิศทุก 7 tick)
pub fn jitter_factor(tick: u64) -> f64 {
    let step = (tick % 5) as f64 - 2.0;
    let direction = if (tick / 7) % 2 == 0 { 1.0 } else { -1.0 };
    1.0 + direction * step * 0.0025
}

pub async fn run_demo_jitter(state: SharedState, period: Duration, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                if state.status().is_demo() {
                    jitter_once(&state, tick).await;
                    tick = tick.wrapping_add(1);
                }
            }
        }
    }

    debug!("Demo jitter stopped");
}

/// ขยับราคาหนึ่ง instrument (วนตาม tick): คืน (symbol, ราคาใหม่)
pub async fn jitter_once(state: &SharedState, tick: u64) -> Option<(String, f64)> {
    let mut ledger = state.ledger.write().await;
    let prices = state.book.prices();
    if prices.is_empty() {
        return None;
    }

    let (symbol, price) = &prices[(tick % prices.len() as u64) as usize];
    let next = price * jitter_factor(tick);
    state.book.observe(symbol, next);
    state.reprice(&mut ledger, symbol, next);
    Some((symbol.clone(), next))
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::{mpsc, watch};

    use super::*;
    use crate::error::FeedError;
    use crate::ledger::Ledger;
    use crate::market::{MockFeed, PriceBook};
    use crate::models::{
        AuthPhase, ConnectionStatus, OpenRequest, PositionType, TokenConfig, TradingSession,
    };
    use crate::state::AppState;

    fn demo_state(watchlist: Vec<TokenConfig>) -> (SharedState, broadcast::Receiver<String>) {
        let status = ConnectionStatus {
            phase:   AuthPhase::DemoReady,
            session: Some(TradingSession::demo(None)),
            ..ConnectionStatus::disconnected()
        };
        let (_status_tx, status_rx) = watch::channel(status);
        let (session_tx, _session_rx) = mpsc::channel(1);
        let (events_tx, events_rx) = broadcast::channel(64);
        let book = PriceBook::new();
        let ledger = Ledger::new(status_rx.clone(), book.clone());
        let state = AppState::new(ledger, book, watchlist, status_rx, session_tx, events_tx);
        (Arc::new(state), events_rx)
    }

    fn eth() -> TokenConfig {
        TokenConfig::new("eth", "0x0", "ETH", "Ethereum")
    }

    struct DownFeed;

    #[async_trait]
    impl PriceFeed for DownFeed {
        async fn fetch_token(&self, _: &str, _: &str) -> Result<TokenQuote, FeedError> {
            Err(FeedError::Status { status: 503, body: "maintenance".into() })
        }
    }

    #[test]
    fn test_jitter_stays_within_half_percent() {
        for tick in 0..500 {
            let f = jitter_factor(tick);
            assert!((0.995..=1.005).contains(&f), "tick {tick} → {f}");
        }
        assert_ne!(jitter_factor(0), jitter_factor(1));
    }

    #[tokio::test]
    async fn test_refresh_reprices_open_positions() {
        let (state, mut events) = demo_state(vec![eth()]);
        let p = state
            .ledger
            .write()
            .await
            .open(OpenRequest {
                token_symbol:  "ETH".into(),
                token_name:    "Ethereum".into(),
                position_type: PositionType::Long,
                amount:        100.0,
                entry_price:   3000.0,
                leverage:      Some(2.0),
            })
            .unwrap();

        let feed: Arc<dyn PriceFeed> = Arc::new(MockFeed::new(vec![eth()]));
        for handle in refresh_all(&state, &feed) {
            assert!(handle.await.unwrap());
        }

        // MockFeed ETH = 3500
        let ledger = state.ledger.read().await;
        assert_eq!(ledger.get(p.id).unwrap().current_price(), 3500.0);
        assert_eq!(state.book.latest_price("ETH"), Some(3500.0));

        let mut kinds = Vec::new();
        while let Ok(raw) = events.try_recv() {
            kinds.push(raw);
        }
        assert!(kinds.iter().any(|e| e.contains("QUOTE_UPDATED")));
        assert!(kinds.iter().any(|e| e.contains("PRICES_UPDATED")));
    }

    #[tokio::test]
    async fn test_failed_fetch_never_zeroes_positions() {
        let (state, _events) = demo_state(vec![eth()]);
        let p = state
            .ledger
            .write()
            .await
            .open(OpenRequest {
                token_symbol:  "ETH".into(),
                token_name:    "Ethereum".into(),
                position_type: PositionType::Short,
                amount:        10.0,
                entry_price:   3000.0,
                leverage:      Some(1.0),
            })
            .unwrap();

        let feed: Arc<dyn PriceFeed> = Arc::new(DownFeed);
        for handle in refresh_all(&state, &feed) {
            handle.await.unwrap();
        }

        assert_eq!(state.ledger.read().await.get(p.id).unwrap().current_price(), 3000.0);
        // zeroed quote ถูกเก็บไว้ให้ card แสดงได้
        assert_eq!(state.book.quote(&eth()).map(|q| q.price), Some(0.0));
    }

    #[tokio::test]
    async fn test_stale_quote_is_dropped() {
        let (state, _events) = demo_state(vec![eth()]);
        let old = state.book.begin_fetch(&eth());
        let new = state.book.begin_fetch(&eth());

        let quote = |price| TokenQuote { price, ..TokenQuote::zeroed(&eth()) };
        assert!(apply_quote(&state, new, quote(3100.0)).await);
        assert!(!apply_quote(&state, old, quote(2900.0)).await);
        assert_eq!(state.book.latest_price("ETH"), Some(3100.0));
    }

    #[tokio::test]
    async fn test_quote_waits_for_ledger_before_touching_book() {
        let (state, _events) = demo_state(vec![eth()]);
        state.book.observe("ETH", 3000.0);
        let ticket = state.book.begin_fetch(&eth());

        let held = state.ledger.write().await;
        let pending = tokio::spawn({
            let state = state.clone();
            async move {
                let quote = TokenQuote { price: 3200.0, ..TokenQuote::zeroed(&eth()) };
                apply_quote(&state, ticket, quote).await
            }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        // ยังไม่ได้ lock: book ต้องยังเป็นราคาเดิม
        assert_eq!(state.book.latest_price("ETH"), Some(3000.0));

        drop(held);
        assert!(pending.await.unwrap());
        assert_eq!(state.book.latest_price("ETH"), Some(3200.0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ledger_tracks_book_under_concurrent_writers() {
        let (state, _events) = demo_state(vec![eth()]);
        state.book.observe("ETH", 3000.0);
        let p = state
            .ledger
            .write()
            .await
            .open(OpenRequest {
                token_symbol:  "ETH".into(),
                token_name:    "Ethereum".into(),
                position_type: PositionType::Long,
                amount:        10.0,
                entry_price:   3000.0,
                leverage:      None,
            })
            .unwrap();

        let mut tasks = Vec::new();
        for i in 0..50u64 {
            let state = state.clone();
            tasks.push(tokio::spawn(async move {
                match i % 3 {
                    0 => {
                        let ticket = state.book.begin_fetch(&eth());
                        let quote = TokenQuote { price: 3000.0 + i as f64, ..TokenQuote::zeroed(&eth()) };
                        apply_quote(&state, ticket, quote).await;
                    }
                    1 => {
                        jitter_once(&state, i).await;
                    }
                    _ => {
                        state.observe_price("ETH", 2900.0 + i as f64).await;
                    }
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let ledger = state.ledger.read().await;
        assert_eq!(Some(ledger.get(p.id).unwrap().current_price()), state.book.latest_price("ETH"));
    }

    #[tokio::test]
    async fn test_jitter_moves_known_prices_only() {
        let (state, _events) = demo_state(vec![eth()]);
        assert!(jitter_once(&state, 0).await.is_none());

        state.book.observe("ETH", 3000.0);
        let (symbol, next) = jitter_once(&state, 1).await.unwrap();
        assert_eq!(symbol, "ETH");
        assert!((next - 3000.0 * jitter_factor(1)).abs() < 1e-9);
        assert_eq!(state.book.latest_price("ETH"), Some(next));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tasks_stop_on_shutdown() {
        let (state, _events) = demo_state(vec![eth()]);
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let feed: Arc<dyn PriceFeed> = Arc::new(MockFeed::new(vec![eth()]));

        let poller = tokio::spawn(run_feed_poller(
            state.clone(),
            feed,
            Duration::from_secs(120),
            shutdown_tx.subscribe(),
        ));
        let jitter = tokio::spawn(run_demo_jitter(state, Duration::from_secs(3), shutdown_tx.subscribe()));

        tokio::time::sleep(Duration::from_secs(10)).await;
        shutdown_tx.send(()).unwrap();
        poller.await.unwrap();
        jitter.await.unwrap();
    }
}
