//! Domain models shared across the whole TokenSwiper backend.

pub mod position;
pub mod session;
pub mod token;

pub use position::{OpenRequest, Position, PositionStatus, PositionType};
pub use session::{AuthPhase, ConnectionStatus, Readiness, SessionStatus, TradingSession};
pub use token::{default_watchlist, TokenConfig, TokenQuote};
