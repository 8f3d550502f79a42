//! # models::token
//!
//! Defines [`TokenQuote`], the market snapshot the price feed produces for one
//! instrument, and [`TokenConfig`], the (network, address) pair the feed polls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A market snapshot for one token card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenQuote {
    /// Symbol as reported by the feed, e.g. `"PEPE"`.
    pub symbol: String,

    pub name: String,

    /// USD price. `0.0` means "unknown" (zeroed fallback), never a real quote.
    pub price: f64,

    pub volume_24h: f64,

    pub market_cap: f64,

    /// 24h change in percent. The token endpoint does not provide it, so it
    /// stays `0.0` for live quotes.
    #[serde(default)]
    pub change_24h: f64,

    #[serde(default)]
    pub image_url: Option<String>,

    pub address: String,

    pub network: String,

    pub last_updated: DateTime<Utc>,
}

impl TokenQuote {
    /// Zeroed placeholder used when a fetch fails and nothing is known yet.
    pub fn zeroed(config: &TokenConfig) -> Self {
        Self {
            symbol:       config.fallback_symbol.clone(),
            name:         config.fallback_name.clone(),
            price:        0.0,
            volume_24h:   0.0,
            market_cap:   0.0,
            change_24h:   0.0,
            image_url:    None,
            address:      config.address.clone(),
            network:      config.network.clone(),
            last_updated: Utc::now(),
        }
    }

    #[inline]
    pub fn has_price(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}

/// One instrument on the swipe deck.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenConfig {
    pub network:         String,
    pub address:         String,
    pub fallback_symbol: String,
    pub fallback_name:   String,
}

impl TokenConfig {
    pub fn new(network: &str, address: &str, symbol: &str, name: &str) -> Self {
        Self {
            network:         network.to_string(),
            address:         address.to_string(),
            fallback_symbol: symbol.to_string(),
            fallback_name:   name.to_string(),
        }
    }

    /// Key ของ instrument ใน PriceBook (`network:address`)
    pub fn key(&self) -> String {
        format!("{}:{}", self.network, self.address)
    }
}

/// Deck เริ่มต้นของแอป
pub fn default_watchlist() -> Vec<TokenConfig> {
    vec![
        TokenConfig::new("eth",      "0x0000000000000000000000000000000000000000",   "ETH",   "Ethereum"),
        TokenConfig::new("flow-evm", "0x68eb683a393c8a1c816255b4fc4b89d73c52ad4b",   "PUMP",  "pump.flow"),
        TokenConfig::new("solana",   "So11111111111111111111111111111111111111112",  "SOL",   "Wrapped SOL"),
        TokenConfig::new("solana",   "EKpQGSJtjMFqKZ9KQanSqYXRcF8fBopzLHYxdM65zcjm", "WIF",   "dogwifhat"),
        TokenConfig::new("avax",     "0xb31f66aa3c1e785363f0875a1b74e27b85fd66c7",   "WAVAX", "Wrapped AVAX"),
        TokenConfig::new("avax",     "0x420fca0121dc28039145009570975747295f2329",   "COQ",   "Coq Inu"),
        TokenConfig::new("eth",      "0x6982508145454ce325ddbe47a25d4ec3d2311933",   "PEPE",  "Pepe"),
        TokenConfig::new("arbitrum", "0x912ce59144191c1204e64559fe8253a0e49e6548",   "ARB",   "Arbitrum"),
    ]
}
