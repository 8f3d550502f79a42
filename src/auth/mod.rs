//! # auth: ClearNode session handshake
//!
//! - [`frames`] : decode/encode RPC envelope
//! - [`signer`] : signing capability (EIP-712 policy, raw payload)
//! - [`machine`]: pure state machine
//! - [`client`] : async driver (transport, timeouts, status publishing)

pub mod client;
pub mod frames;
pub mod machine;
pub mod signer;

pub use client::{Connector, SessionClient, SessionCommand, SessionSettings, Transport, WsConnector};
pub use machine::{AuthMachine, AuthState};
pub use signer::{PolicyMessage, Signer};

#[cfg(feature = "signing")]
pub use signer::LocalKeySigner;
