//! mapipe library - relay bytes between two endpoints
//!
//! This crate holds everything `mapipe` does between parsing its command
//! line and exiting: opening the two connections a [`Mode`] asks for,
//! piping them together with optional rate limiting, and reporting what
//! happened to a [`TraceSink`].
//!
//! # Quick Start
//!
//! ```ignore
//! use mapipe_lib::{Endpoints, Mode, PipeOptions, Relay, TraceSink};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mode = Mode::from_args(
//!     "fwd",
//!     vec![
//!         "/ip4/0.0.0.0/tcp/8080".parse()?,
//!         "/dns4/example.com/tcp/80".parse()?,
//!     ],
//! )?;
//!
//! let relay = Relay::new(Arc::new(Endpoints::new()), PipeOptions { bandwidth: 0 });
//! let mut trace = TraceSink::discard();
//! relay.run(&mode, &mut trace, &CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`relay`]: the four modes and how their connections are opened
//! - [`pipe`]: the bidirectional copy engine
//! - [`rate_limit`]: per-direction throughput cap
//! - [`discovery`]: the destination line read in proxy mode
//! - [`trace`]: control and payload mirror channels
//! - [`bandwidth`]: human-readable byte rates

pub mod bandwidth;
pub mod discovery;
pub mod pipe;
pub mod rate_limit;
pub mod relay;
pub mod trace;

pub use bandwidth::{format_bytes, parse_bandwidth, parse_bytes};
pub use discovery::{read_destination, MAX_DESTINATION_LEN};
pub use pipe::{copy_direction, pipe_connections, Transfer, TransferEnd};
pub use rate_limit::{RateLimiter, UNLIMITED_CHUNK_SIZE};
pub use relay::{Mode, PipeOptions, Relay};
pub use trace::{TraceChannel, TraceSink};

// Re-export the transport layer
pub use mapipe_transport::{
    Address, Connection, EndpointProvider, Endpoints, Listener, ProcessStdio, TransportError,
    STDIO_ADDRESS,
};

use std::io;
use thiserror::Error;

/// Relay errors
#[derive(Debug, Error)]
pub enum PipeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("{from} connection failed: {source}")]
    Transfer {
        from: Address,
        #[source]
        source: io::Error,
    },

    #[error("cannot allocate a {size}-byte copy buffer for the bandwidth cap")]
    BufferAllocation { size: usize },

    #[error("invalid bandwidth {0:?}: expected a rate such as 10MBps, 1Kbps or 1GB/s")]
    InvalidBandwidth(String),

    #[error("{0}")]
    InvalidMode(String),

    #[error("cancelled")]
    Cancelled,
}

pub type PipeResult<T> = Result<T, PipeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipeError::Transfer {
            from: "/ip4/127.0.0.1/tcp/80".parse().unwrap(),
            source: io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"),
        };
        assert_eq!(
            err.to_string(),
            "/ip4/127.0.0.1/tcp/80 connection failed: connection reset"
        );

        let err: PipeError = TransportError::NoMoreConnections.into();
        assert_eq!(err.to_string(), "no more connections");

        let err = PipeError::Protocol("bad line".to_string());
        assert_eq!(err.to_string(), "protocol violation: bad line");
    }
}
