//! # config: อ่าน Config จาก Environment Variables
//!
//! `.env` ถูกโหลดโดย `dotenvy` ใน `main` ก่อนเรียก [`Config::from_env`]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use crate::auth::client::SessionSettings;

pub const DEFAULT_CLEARNODE_URL: &str = "wss://clearnet.yellow.com/ws";
pub const DEFAULT_FEED_BASE_URL: &str = "https://api.geckoterminal.com/api/v2";

/// แหล่งราคาที่เลือกได้
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedSource {
    GeckoTerminal { base_url: String },
    /// `FEED_BASE_URL=mock`: ราคาคงที่ ไม่ต้องต่อเน็ต
    Mock,
}

/// Config ทั้งหมดที่ TokenSwiper ต้องการ
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr:          SocketAddr,
    pub clearnode_url:      String,
    pub feed:               FeedSource,
    /// รอบ refresh ราคาต่อ instrument
    pub feed_poll:          Duration,
    /// T_connect
    pub connect_timeout:    Duration,
    /// T_auth (challenge, verify, session setup)
    pub auth_timeout:       Duration,
    /// อายุของ auth policy (`expire`)
    pub session_ttl:        Duration,
    pub app_name:           String,
    pub auth_scope:         String,
    /// usdc allocation ของ app session
    pub initial_allocation: u64,
    pub snapshot_path:      PathBuf,
    pub demo_jitter:        Duration,
    /// None = ไม่มี signing capability → demo session
    pub private_key:        Option<String>,
    pub auto_connect:       bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr: SocketAddr = env_or("BIND_ADDR", "0.0.0.0:3000")
            .parse()
            .context("BIND_ADDR must be a socket address like 0.0.0.0:3000")?;

        let feed = match env_or("FEED_BASE_URL", DEFAULT_FEED_BASE_URL).as_str() {
            "mock" => FeedSource::Mock,
            url => FeedSource::GeckoTerminal { base_url: url.to_string() },
        };

        let initial_allocation: u64 = env_or("INITIAL_ALLOCATION", "1000000")
            .parse()
            .context("INITIAL_ALLOCATION must be a whole number")?;

        Ok(Self {
            bind_addr,
            clearnode_url:      env_or("CLEARNODE_URL", DEFAULT_CLEARNODE_URL),
            feed,
            feed_poll:          Duration::from_secs(env_u64("FEED_POLL_SECS", 120).max(1)),
            connect_timeout:    Duration::from_secs(env_u64("CONNECT_TIMEOUT_SECS", 8)),
            auth_timeout:       Duration::from_secs(env_u64("AUTH_TIMEOUT_SECS", 12)),
            session_ttl:        Duration::from_secs(env_u64("SESSION_TTL_SECS", 3600)),
            app_name:           env_or("APP_NAME", "TokenSwiper"),
            auth_scope:         env_or("AUTH_SCOPE", "trading"),
            initial_allocation,
            snapshot_path:      PathBuf::from(env_or("SNAPSHOT_PATH", "data/positions.json")),
            demo_jitter:        Duration::from_secs(env_u64("DEMO_JITTER_SECS", 3).max(1)),
            private_key:        std::env::var("PRIVATE_KEY").ok().filter(|k| !k.trim().is_empty()),
            auto_connect:       env_bool("AUTO_CONNECT", true),
        })
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            url:                self.clearnode_url.clone(),
            app_name:           self.app_name.clone(),
            scope:              self.auth_scope.clone(),
            session_ttl:        self.session_ttl,
            initial_allocation: self.initial_allocation,
            connect_timeout:    self.connect_timeout,
            auth_timeout:       self.auth_timeout,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).map(|v| v.to_lowercase()) {
        Ok(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Ok(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}
