//! # market::feed: Token Price Feed
//!
//! ดึงราคาของแต่ละ token card จาก GeckoTerminal
//!
//! ## Data Sources (เลือกได้)
//! 1. GeckoTerminal API: `FEED_BASE_URL` (default)
//! 2. Mock: `FEED_BASE_URL=mock` สำหรับ dev/test โดยไม่ต้องต่อเน็ต
//!
//! Feed ล้มได้เสมอ: [`fetch_or_fallback`] จะไม่โยน error ขึ้นไป UI แต่คืน
//! quote ล่าสุดที่รู้ หรือ quote ศูนย์จาก fallback symbol แทน

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::FeedError;
use crate::market::book::PriceBook;
use crate::models::{TokenConfig, TokenQuote};

pub const GECKO_ACCEPT: &str = "application/json;version=20230302";

// ─── Trait ────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn fetch_token(&self, network: &str, address: &str) -> Result<TokenQuote, FeedError>;
}

// ─── GeckoTerminal ────────────────────────────────────────────────────────────

/// Response format จาก `/networks/{network}/tokens/{address}`
#[derive(Debug, Deserialize)]
struct GeckoTokenResponse {
    data: Option<GeckoToken>,
}

#[derive(Debug, Deserialize)]
struct GeckoToken {
    attributes: Option<GeckoAttributes>,
}

#[derive(Debug, Deserialize)]
struct GeckoAttributes {
    address:        String,
    name:           Option<String>,
    symbol:         Option<String>,
    image_url:      Option<String>,
    price_usd:      Option<String>,
    fdv_usd:        Option<String>,
    market_cap_usd: Option<String>,
    volume_usd:     Option<GeckoVolume>,
}

#[derive(Debug, Deserialize)]
struct GeckoVolume {
    h24: Option<String>,
}

pub struct GeckoTerminalFeed {
    client:   reqwest::Client,
    base_url: String,
}

impl GeckoTerminalFeed {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PriceFeed for GeckoTerminalFeed {
    async fn fetch_token(&self, network: &str, address: &str) -> Result<TokenQuote, FeedError> {
        let url = format!("{}/networks/{network}/tokens/{address}", self.base_url);
        debug!(%url, "Fetching token data");

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, GECKO_ACCEPT)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::Status { status, body });
        }

        let body: GeckoTokenResponse = response.json().await?;
        parse_token(body, network)
    }
}

fn parse_number(raw: Option<&str>) -> f64 {
    raw.and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

fn parse_token(body: GeckoTokenResponse, network: &str) -> Result<TokenQuote, FeedError> {
    let attrs = body
        .data
        .and_then(|d| d.attributes)
        .ok_or_else(|| FeedError::InvalidData("missing data.attributes".into()))?;

    let market_cap = attrs
        .market_cap_usd
        .as_deref()
        .or(attrs.fdv_usd.as_deref());

    Ok(TokenQuote {
        symbol:       attrs.symbol.filter(|s| !s.is_empty()).unwrap_or_else(|| "UNKNOWN".into()),
        name:         attrs.name.filter(|s| !s.is_empty()).unwrap_or_else(|| "Unknown Token".into()),
        price:        parse_number(attrs.price_usd.as_deref()),
        volume_24h:   parse_number(attrs.volume_usd.as_ref().and_then(|v| v.h24.as_deref())),
        market_cap:   parse_number(market_cap),
        change_24h:   0.0,
        image_url:    attrs.image_url,
        address:      attrs.address,
        network:      network.to_string(),
        last_updated: Utc::now(),
    })
}

// ─── Mock ─────────────────────────────────────────────────────────────────────

/// Mock feed สำหรับ development: ราคาคงที่ต่อ symbol
pub struct MockFeed {
    watchlist: Vec<TokenConfig>,
}

impl MockFeed {
    pub fn new(watchlist: Vec<TokenConfig>) -> Self {
        Self { watchlist }
    }

    fn mock_price(symbol: &str) -> f64 {
        match symbol {
            "ETH"   => 3500.0,
            "SOL"   => 150.0,
            "WAVAX" => 35.0,
            "ARB"   => 0.85,
            "WIF"   => 2.4,
            "PUMP"  => 0.0042,
            "PEPE"  => 0.0000112,
            "COQ"   => 0.00000185,
            _       => 1.0,
        }
    }
}

#[async_trait]
impl PriceFeed for MockFeed {
    async fn fetch_token(&self, network: &str, address: &str) -> Result<TokenQuote, FeedError> {
        let config = self
            .watchlist
            .iter()
            .find(|c| c.network == network && c.address == address)
            .ok_or_else(|| FeedError::InvalidData(format!("unknown mock token {network}:{address}")))?;

        let price = Self::mock_price(&config.fallback_symbol);
        Ok(TokenQuote {
            price,
            volume_24h: price * 1_000_000.0,
            market_cap: price * 100_000_000.0,
            change_24h: 1.32,
            ..TokenQuote::zeroed(config)
        })
    }
}

// ─── Fallback ─────────────────────────────────────────────────────────────────

/// Fetch หนึ่ง instrument: ถ้าล้ม คืน last-known quote หรือ zeroed quote
pub async fn fetch_or_fallback<F: PriceFeed + ?Sized>(
    feed: &F,
    book: &PriceBook,
    config: &TokenConfig,
) -> TokenQuote {
    match feed.fetch_token(&config.network, &config.address).await {
        Ok(quote) => quote,
        Err(e) => {
            warn!(
                symbol  = %config.fallback_symbol,
                network = %config.network,
                error   = %e,
                "Price fetch failed, using fallback quote"
            );
            book.quote(config).unwrap_or_else(|| TokenQuote::zeroed(config))
        }
    }
}

// ─── Formatting ───────────────────────────────────────────────────────────────

/// ราคาสำหรับแสดงบน card: ≥1 → 2 ตำแหน่ง + comma, ≥0.01 → 4, ≥1e-6 → 8,
/// เล็กกว่านั้นเป็น scientific
pub fn format_price(price: f64) -> String {
    if price == 0.0 {
        return "0.00".to_string();
    }
    if price >= 1.0 {
        group_thousands(&format!("{price:.2}"))
    } else if price >= 0.01 {
        format!("{price:.4}")
    } else if price >= 0.000_001 {
        format!("{price:.8}")
    } else {
        format!("{price:.3e}").replace("e-", " × 10⁻")
    }
}

/// 1.5e9 → "1.50B", 2.5e6 → "2.50M", 1.2e3 → "1.20K"
pub fn format_compact(num: f64) -> String {
    if num >= 1e9 {
        format!("{:.2}B", num / 1e9)
    } else if num >= 1e6 {
        format!("{:.2}M", num / 1e6)
    } else if num >= 1e3 {
        format!("{:.2}K", num / 1e3)
    } else {
        format!("{num:.2}")
    }
}

fn group_thousands(fixed: &str) -> String {
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed, ""));
    let mut grouped = String::with_capacity(fixed.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if frac_part.is_empty() {
        grouped
    } else {
        format!("{grouped}.{frac_part}")
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
