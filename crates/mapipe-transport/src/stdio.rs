//! The process's standard streams as a connection

use crate::{Address, Connection, TransportError, TransportResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Handle on stdin/stdout that can be claimed as a [`Connection`] exactly once.
///
/// Clones share the claim, so every listener and dial created from the same
/// provider sees the streams as taken after the first claim.
#[derive(Debug, Clone, Default)]
pub struct ProcessStdio {
    claimed: Arc<AtomicBool>,
}

impl ProcessStdio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the stdio streams. Fails with `NoMoreConnections` after the first call.
    pub fn claim(&self) -> TransportResult<Connection> {
        if self.claimed.swap(true, Ordering::AcqRel) {
            return Err(TransportError::NoMoreConnections);
        }
        debug!("claimed process stdio");
        Ok(Connection::new(
            tokio::io::stdin(),
            tokio::io::stdout(),
            Address::ProcessStdio,
            Address::ProcessStdio,
        ))
    }
}
