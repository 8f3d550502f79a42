//! # TokenSwiper: swipe-trading backend
//!
//! Core library: Position Ledger + P&L, ClearNode session handshake with demo
//! fallback, price feed, และ HTTP/WS surface. `main.rs` เป็นแค่ composition root.

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod market;
pub mod models;
pub mod routes;
pub mod state;
