//! Byte-stream connections with idempotent, cross-task close
//!
//! A [`Connection`] is a read half and a write half plus a shared [`Closer`].
//! Closing through any clone of the closer wakes whichever half is blocked in
//! `read` or `write`, and that call fails with a "use of closed connection"
//! error. The underlying handle is released once a half observes the close or
//! is dropped.

use crate::Address;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Marker carried inside the `io::Error` returned by a closed connection
#[derive(Debug, Error)]
#[error("use of closed connection")]
pub struct ConnectionClosed;

pub fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, ConnectionClosed)
}

/// True when `err` was produced because the connection was closed locally
pub fn is_closed_error(err: &io::Error) -> bool {
    err.get_ref()
        .is_some_and(|inner| inner.is::<ConnectionClosed>())
}

/// Shared close switch for one connection
#[derive(Clone)]
pub struct Closer {
    state: Arc<CloseState>,
}

struct CloseState {
    closed: AtomicBool,
    token: CancellationToken,
    label: String,
}

impl Closer {
    fn new(label: String) -> Self {
        Self {
            state: Arc::new(CloseState {
                closed: AtomicBool::new(false),
                token: CancellationToken::new(),
                label,
            }),
        }
    }

    /// Close the connection. Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        if self.state.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.state.token.cancel();
        debug!(connection = %self.state.label, "connection closed");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    /// Resolves once the connection has been closed
    pub async fn closed(&self) {
        self.state.token.cancelled().await
    }
}

impl fmt::Debug for Closer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closer")
            .field("connection", &self.state.label)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Read side of a [`Connection`]
pub struct ReadHalf {
    inner: Option<BoxedReader>,
    closer: Closer,
}

impl ReadHalf {
    /// Read into `buf`. `Ok(0)` means end of stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closer.is_closed() {
            self.inner = None;
            return Err(closed_error());
        }
        let Some(inner) = self.inner.as_mut() else {
            return Err(closed_error());
        };

        let outcome = tokio::select! {
            biased;
            _ = self.closer.closed() => None,
            result = inner.read(buf) => Some(result),
        };

        match outcome {
            Some(result) => result,
            None => {
                self.inner = None;
                Err(closed_error())
            }
        }
    }

    pub fn closer(&self) -> Closer {
        self.closer.clone()
    }
}

/// Write side of a [`Connection`]
pub struct WriteHalf {
    inner: Option<BoxedWriter>,
    closer: Closer,
}

impl WriteHalf {
    /// Write all of `buf` and flush.
    ///
    /// Returns fewer than `buf.len()` bytes only if the sink stopped accepting
    /// data (a zero-length write); callers treat that as a short write.
    pub async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closer.is_closed() {
            self.inner = None;
            return Err(closed_error());
        }
        let Some(inner) = self.inner.as_mut() else {
            return Err(closed_error());
        };

        let outcome = tokio::select! {
            biased;
            _ = self.closer.closed() => None,
            result = async {
                let mut written = 0;
                while written < buf.len() {
                    let n = inner.write(&buf[written..]).await?;
                    if n == 0 {
                        break;
                    }
                    written += n;
                }
                inner.flush().await?;
                Ok::<usize, io::Error>(written)
            } => Some(result),
        };

        match outcome {
            Some(result) => result,
            None => {
                self.inner = None;
                Err(closed_error())
            }
        }
    }

    pub fn closer(&self) -> Closer {
        self.closer.clone()
    }
}

/// A live byte-stream connection to one endpoint
pub struct Connection {
    reader: ReadHalf,
    writer: WriteHalf,
    local: Address,
    remote: Address,
    closer: Closer,
}

impl Connection {
    pub fn new<R, W>(reader: R, writer: W, local: Address, remote: Address) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let closer = Closer::new(format!("{} <-> {}", local, remote));
        Self {
            reader: ReadHalf {
                inner: Some(Box::new(reader)),
                closer: closer.clone(),
            },
            writer: WriteHalf {
                inner: Some(Box::new(writer)),
                closer: closer.clone(),
            },
            local,
            remote,
            closer,
        }
    }

    /// Wrap a single duplex stream
    pub fn from_stream<S>(stream: S, local: Address, remote: Address) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer, local, remote)
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf).await
    }

    pub async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf).await
    }

    /// Idempotent; safe to call from several tasks at once.
    pub fn close(&self) -> bool {
        self.closer.close()
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    pub fn local_addr(&self) -> &Address {
        &self.local
    }

    pub fn remote_addr(&self) -> &Address {
        &self.remote
    }

    pub fn closer(&self) -> Closer {
        self.closer.clone()
    }

    pub fn into_split(self) -> (ReadHalf, WriteHalf) {
        (self.reader, self.writer)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn duplex_connection() -> (Connection, tokio::io::DuplexStream) {
        let (ours, theirs) = tokio::io::duplex(1024);
        let conn = Connection::from_stream(
            ours,
            "/ip4/127.0.0.1/tcp/1".parse().unwrap(),
            "/ip4/127.0.0.1/tcp/2".parse().unwrap(),
        );
        (conn, theirs)
    }

    #[tokio::test]
    async fn test_read_write_through_connection() {
        let (mut conn, mut peer) = duplex_connection();

        assert_eq!(conn.write(b"hello").await.unwrap(), 5);
        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        peer.write_all(b"world").await.unwrap();
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"world");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (conn, _peer) = duplex_connection();

        assert!(conn.close());
        assert!(!conn.close());
        assert!(!conn.closer().close());
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_read() {
        let (conn, _peer) = duplex_connection();
        let closer = conn.closer();
        let (mut reader, _writer) = conn.into_split();

        let read = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            reader.read(&mut buf).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        closer.close();

        let result = tokio::time::timeout(Duration::from_secs(1), read)
            .await
            .expect("read should be woken by close")
            .unwrap();
        let err = result.unwrap_err();
        assert!(is_closed_error(&err));
    }

    #[tokio::test]
    async fn test_io_after_close_fails() {
        let (mut conn, _peer) = duplex_connection();
        conn.close();

        let err = conn.write(b"x").await.unwrap_err();
        assert!(is_closed_error(&err));
        let mut buf = [0u8; 1];
        let err = conn.read(&mut buf).await.unwrap_err();
        assert!(is_closed_error(&err));
    }

    #[tokio::test]
    async fn test_concurrent_close_happens_once() {
        let (conn, _peer) = duplex_connection();
        let closers: Vec<Closer> = (0..8).map(|_| conn.closer()).collect();

        let handles: Vec<_> = closers
            .into_iter()
            .map(|c| tokio::spawn(async move { c.close() }))
            .collect();

        let mut performed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                performed += 1;
            }
        }
        assert_eq!(performed, 1);
    }

    #[test]
    fn test_closed_error_marker() {
        assert!(is_closed_error(&closed_error()));
        let other = io::Error::new(io::ErrorKind::NotConnected, "something else");
        assert!(!is_closed_error(&other));
    }
}
