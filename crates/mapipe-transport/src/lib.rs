//! Endpoint abstraction for mapipe
//!
//! Everything the relay can listen on or dial is named by an [`Address`]:
//! TCP (by IP or DNS name), Unix-domain sockets, or the process's own
//! stdin/stdout via the reserved `/unix/stdio` address.
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │        mapipe-lib (relay, pipe engine)     │
//! └────────────────────────────────────────────┘
//!                      │ EndpointProvider
//!                      ↓
//! ┌──────────────┬──────────────┬──────────────┐
//! │     TCP      │  Unix socket │ process stdio│
//! └──────────────┴──────────────┴──────────────┘
//! ```
//!
//! Connections support an idempotent `close` that can be called from any task
//! and immediately fails reads and writes blocked on the connection.

pub mod address;
pub mod connection;
pub mod listener;
pub mod provider;
pub mod stdio;

pub use address::{Address, DnsFamily, NetworkAddress, STDIO_ADDRESS};
pub use connection::{
    closed_error, is_closed_error, Closer, Connection, ConnectionClosed, ReadHalf, WriteHalf,
};
pub use listener::{Listener, StdioListener, TcpEndpointListener};
pub use provider::{EndpointProvider, Endpoints};
pub use stdio::ProcessStdio;

#[cfg(unix)]
pub use listener::UnixEndpointListener;

use thiserror::Error;

/// Transport-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("unsupported address on this platform: {0}")]
    Unsupported(String),

    #[error("no more connections")]
    NoMoreConnections,

    #[error("listener closed")]
    ListenerClosed,

    #[error("could not resolve {0}")]
    Resolve(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
