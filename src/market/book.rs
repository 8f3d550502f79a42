//! # market::book
//!
//! [`PriceBook`]: cache ราคาล่าสุดต่อ instrument ที่ feed poller เขียน และ
//! Ledger อ่านตอน open (entry price preference)
//!
//! ## Fetch generations
//! ทุกครั้งที่เริ่ม fetch จะได้ [`FetchTicket`] ที่มีเลข generation เพิ่มขึ้น
//! ต่อ instrument. ตอน fetch resolve จะรับเฉพาะ ticket ล่าสุดเท่านั้น;
//! fetch ที่เริ่มก่อนแต่ตอบช้ากว่าจะถูกทิ้ง ราคาจึงสดขึ้นเสมอ (monotonic freshness)

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::models::{TokenConfig, TokenQuote};

// ─── Ticket ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    key:        String,
    generation: u64,
}

impl FetchTicket {
    pub fn key(&self) -> &str { &self.key }
    pub fn generation(&self) -> u64 { self.generation }
}

// ─── Inner ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct BookInner {
    /// ticket ล่าสุดที่ออกไปต่อ instrument key
    generations: HashMap<String, u64>,
    /// quote ล่าสุดต่อ instrument key
    quotes:      HashMap<String, TokenQuote>,
    /// ราคาล่าสุดต่อ symbol (เฉพาะราคา > 0)
    prices:      HashMap<String, f64>,
}

// ─── PriceBook ────────────────────────────────────────────────────────────────

/// Cheap-to-clone handle; all clones share the same book.
#[derive(Debug, Clone, Default)]
pub struct PriceBook {
    inner: Arc<RwLock<BookInner>>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BookInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BookInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// ออก ticket ใหม่สำหรับ fetch ที่กำลังจะเริ่ม
    pub fn begin_fetch(&self, config: &TokenConfig) -> FetchTicket {
        let key = config.key();
        let mut inner = self.write();
        let generation = inner.generations.entry(key.clone()).or_insert(0);
        *generation += 1;
        FetchTicket { key, generation: *generation }
    }

    /// รับผล fetch: คืน `false` (และทิ้ง quote) ถ้ามี fetch ที่ใหม่กว่าเริ่มไปแล้ว
    pub fn resolve(&self, ticket: FetchTicket, quote: TokenQuote) -> bool {
        let mut inner = self.write();
        let newest = inner.generations.get(&ticket.key).copied().unwrap_or(0);
        if ticket.generation != newest {
            debug!(
                key        = %ticket.key,
                generation = ticket.generation,
                newest,
                "Discarding stale fetch result"
            );
            return false;
        }

        if quote.has_price() {
            inner.prices.insert(quote.symbol.clone(), quote.price);
        }
        inner.quotes.insert(ticket.key, quote);
        true
    }

    /// ราคาตลาดล่าสุดของ symbol (ไม่คืนราคา 0 ของ zeroed fallback)
    pub fn latest_price(&self, symbol: &str) -> Option<f64> {
        self.read().prices.get(symbol).copied()
    }

    /// Record an observed price outside the fetch path (manual tick, demo jitter).
    pub fn observe(&self, symbol: &str, price: f64) {
        if !price.is_finite() || price <= 0.0 {
            return;
        }
        let mut inner = self.write();
        inner.prices.insert(symbol.to_string(), price);
        for quote in inner.quotes.values_mut().filter(|q| q.symbol == symbol) {
            quote.price = price;
            quote.last_updated = chrono::Utc::now();
        }
    }

    pub fn quote(&self, config: &TokenConfig) -> Option<TokenQuote> {
        self.read().quotes.get(&config.key()).cloned()
    }

    pub fn quotes(&self) -> Vec<TokenQuote> {
        let mut quotes: Vec<TokenQuote> = self.read().quotes.values().cloned().collect();
        quotes.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        quotes
    }

    /// Snapshot ของ (symbol, price) ทั้งหมดที่รู้ราคา
    pub fn prices(&self) -> Vec<(String, f64)> {
        let mut prices: Vec<(String, f64)> = self
            .read()
            .prices
            .iter()
            .map(|(s, p)| (s.clone(), *p))
            .collect();
        prices.sort_by(|a, b| a.0.cmp(&b.0));
        prices
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn eth() -> TokenConfig {
        TokenConfig::new("eth", "0x0", "ETH", "Ethereum")
    }

    fn quote(price: f64) -> TokenQuote {
        TokenQuote { price, ..TokenQuote::zeroed(&eth()) }
    }

    #[test]
    fn test_newest_fetch_wins() {
        let book = PriceBook::new();
        let slow = book.begin_fetch(&eth());
        let fast = book.begin_fetch(&eth());

        assert!(book.resolve(fast, quote(3100.0)));
        // fetch แรกตอบกลับทีหลัง → ต้องถูกทิ้ง
        assert!(!book.resolve(slow, quote(2900.0)));
        assert_eq!(book.latest_price("ETH"), Some(3100.0));
    }

    #[test]
    fn test_stale_ticket_discarded_even_if_newest_not_resolved() {
        let book = PriceBook::new();
        let first = book.begin_fetch(&eth());
        let _second = book.begin_fetch(&eth());
        assert!(!book.resolve(first, quote(1.0)));
        assert_eq!(book.latest_price("ETH"), None);
    }

    #[test]
    fn test_generations_are_per_instrument() {
        let book = PriceBook::new();
        let pepe = TokenConfig::new("eth", "0x69", "PEPE", "Pepe");
        let a = book.begin_fetch(&eth());
        let b = book.begin_fetch(&pepe);
        assert_eq!(a.generation(), 1);
        assert_eq!(b.generation(), 1);
        assert!(book.resolve(a, quote(3000.0)));
    }

    #[test]
    fn test_zeroed_quote_does_not_set_price() {
        let book = PriceBook::new();
        let t = book.begin_fetch(&eth());
        assert!(book.resolve(t, TokenQuote::zeroed(&eth())));
        assert_eq!(book.latest_price("ETH"), None);
        assert!(book.quote(&eth()).is_some());
    }

    #[test]
    fn test_observe_updates_price_and_quote() {
        let book = PriceBook::new();
        let t = book.begin_fetch(&eth());
        book.resolve(t, quote(3000.0));
        book.observe("ETH", 3050.0);
        book.observe("ETH", -1.0);
        assert_eq!(book.latest_price("ETH"), Some(3050.0));
        assert_eq!(book.quote(&eth()).map(|q| q.price), Some(3050.0));
    }
}
