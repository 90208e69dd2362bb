//! # PSO Proxy
//!
//! A man-in-the-middle intercepting reverse proxy for the Phantasy Star
//! Online Blue Burst family of protocols. The proxy sits between an
//! unmodified game client and a set of backend PSO servers, decrypting both
//! directions of every session, logging annotated packet traces, and
//! rewriting server-issued redirects so the client stays inside the proxy's
//! address space across the multi-server login flow.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Supervisor                        │
//! │       (flags, port map, one listener per server)     │
//! ├─────────────────────────────────────────────────────┤
//! │                  Proxy Listener                      │
//! │   (accept, upstream dial, welcome/cipher bootstrap)  │
//! ├─────────────────────────────────────────────────────┤
//! │                  Half-Sessions                       │
//! │  (framing, stream-cipher decrypt, redirect rewrite)  │
//! ├─────────────────────────────────────────────────────┤
//! │                   Packet Bus                         │
//! │       (ordered logging + deferred forwarding)        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Each accepted client connection becomes a session of exactly two
//! half-sessions, one per direction, each owning one socket end and one
//! session cipher. Every intercepted frame is published to a single bounded
//! bus whose consumer logs it and then performs the forward, so log order
//! and wire order agree within each direction.

pub mod config;
pub mod crypto;
pub mod protocol;
pub mod proxy;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("Proxy error: {0}")]
    Proxy(#[from] proxy::ProxyError),

    #[error("Configuration error: {0}")]
    Config(String),
}
