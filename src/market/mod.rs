//! # market: ราคาของ token cards
//!
//! - [`feed`]  : แหล่งราคา (GeckoTerminal / mock) + fallback
//! - [`book`]  : cache ราคาล่าสุด พร้อม fetch generations
//! - [`poller`]: refresh ตามรอบ และ demo jitter

pub mod book;
pub mod feed;
pub mod poller;

pub use book::{FetchTicket, PriceBook};
pub use feed::{fetch_or_fallback, format_compact, format_price, GeckoTerminalFeed, MockFeed, PriceFeed};
