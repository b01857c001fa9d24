//! Listeners for each address kind

use crate::stdio::ProcessStdio;
use crate::{Address, Connection, TransportError, TransportResult};
use async_trait::async_trait;
use std::fmt::Debug;
use tokio::net::TcpListener;
use tracing::debug;

#[cfg(unix)]
use std::path::PathBuf;
#[cfg(unix)]
use tokio::net::UnixListener;

/// Accepts incoming connections on one bound address
#[async_trait]
pub trait Listener: Send + Debug {
    /// Wait for the next incoming connection
    async fn accept(&mut self) -> TransportResult<Connection>;

    /// The address actually bound (ephemeral ports resolved)
    fn local_addr(&self) -> Address;

    /// Stop accepting. Idempotent.
    fn close(&mut self);
}

#[derive(Debug)]
pub struct TcpEndpointListener {
    inner: Option<TcpListener>,
    local: Address,
}

impl TcpEndpointListener {
    pub fn new(listener: TcpListener) -> TransportResult<Self> {
        let local = listener.local_addr()?.into();
        Ok(Self {
            inner: Some(listener),
            local,
        })
    }
}

#[async_trait]
impl Listener for TcpEndpointListener {
    async fn accept(&mut self) -> TransportResult<Connection> {
        let listener = self.inner.as_ref().ok_or(TransportError::ListenerClosed)?;
        let (stream, peer) = listener.accept().await?;
        let local = stream.local_addr()?;
        debug!(local = %local, peer = %peer, "accepted tcp connection");

        let (reader, writer) = stream.into_split();
        Ok(Connection::new(reader, writer, local.into(), peer.into()))
    }

    fn local_addr(&self) -> Address {
        self.local.clone()
    }

    fn close(&mut self) {
        if self.inner.take().is_some() {
            debug!(local = %self.local, "tcp listener closed");
        }
    }
}

/// Unix-domain socket listener; removes its socket file on close
#[cfg(unix)]
#[derive(Debug)]
pub struct UnixEndpointListener {
    inner: Option<UnixListener>,
    path: PathBuf,
}

#[cfg(unix)]
impl UnixEndpointListener {
    pub fn new(listener: UnixListener, path: PathBuf) -> Self {
        Self {
            inner: Some(listener),
            path,
        }
    }
}

#[cfg(unix)]
#[async_trait]
impl Listener for UnixEndpointListener {
    async fn accept(&mut self) -> TransportResult<Connection> {
        let listener = self.inner.as_ref().ok_or(TransportError::ListenerClosed)?;
        let (stream, peer) = listener.accept().await?;
        let local = Address::unix(&self.path);
        let remote = peer
            .as_pathname()
            .map(Address::unix)
            .unwrap_or_else(|| local.clone());
        debug!(local = %local, "accepted unix connection");

        let (reader, writer) = stream.into_split();
        Ok(Connection::new(reader, writer, local, remote))
    }

    fn local_addr(&self) -> Address {
        Address::unix(&self.path)
    }

    fn close(&mut self) {
        if self.inner.take().is_some() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                debug!(path = %self.path.display(), "failed to remove socket file: {}", e);
            }
            debug!(path = %self.path.display(), "unix listener closed");
        }
    }
}

#[cfg(unix)]
impl Drop for UnixEndpointListener {
    fn drop(&mut self) {
        self.close();
    }
}

/// One-shot listener over the process's stdio
#[derive(Debug)]
pub struct StdioListener {
    stdio: ProcessStdio,
}

impl StdioListener {
    pub fn new(stdio: ProcessStdio) -> Self {
        Self { stdio }
    }
}

#[async_trait]
impl Listener for StdioListener {
    async fn accept(&mut self) -> TransportResult<Connection> {
        self.stdio.claim()
    }

    fn local_addr(&self) -> Address {
        Address::ProcessStdio
    }

    fn close(&mut self) {}
}
