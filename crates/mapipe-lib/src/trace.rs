//! Trace sink: control messages plus one payload mirror per direction
//!
//! The relay only writes to the channels it is given. Creating, prefixing and
//! closing the underlying writers is up to the caller.

use std::fmt;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::warn;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct TraceTarget {
    prefix: Option<Vec<u8>>,
    writer: BoxedWriter,
}

/// Fan-out writer for one trace channel. A channel without targets discards.
#[derive(Default)]
pub struct TraceChannel {
    targets: Vec<TraceTarget>,
}

impl TraceChannel {
    pub fn discard() -> Self {
        Self::default()
    }

    pub fn to<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::discard().tee(writer)
    }

    /// Add another writer that receives everything written to this channel
    pub fn tee<W>(mut self, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.targets.push(TraceTarget {
            prefix: None,
            writer: Box::new(writer),
        });
        self
    }

    /// Like [`tee`](Self::tee), but every write is preceded by `prefix`
    pub fn tee_prefixed<W>(mut self, prefix: &str, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.targets.push(TraceTarget {
            prefix: Some(prefix.as_bytes().to_vec()),
            writer: Box::new(writer),
        });
        self
    }

    /// Write `buf` to every target, stopping at the first failure
    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        for target in &mut self.targets {
            if let Some(prefix) = &target.prefix {
                target.writer.write_all(prefix).await?;
            }
            target.writer.write_all(buf).await?;
            target.writer.flush().await?;
        }
        Ok(())
    }

    /// Write one line of text. Failures are logged, never returned.
    pub async fn line(&mut self, line: impl AsRef<str>) {
        let mut text = String::with_capacity(line.as_ref().len() + 1);
        text.push_str(line.as_ref());
        text.push('\n');
        if let Err(e) = self.write_all(text.as_bytes()).await {
            warn!("Failed to write trace line: {}", e);
        }
    }
}

impl fmt::Debug for TraceChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceChannel")
            .field("targets", &self.targets.len())
            .finish()
    }
}

/// The three trace channels of one relay run
#[derive(Debug, Default)]
pub struct TraceSink {
    /// Lifecycle messages (listening, accepted, dialed, per-direction results)
    pub control: TraceChannel,
    /// Mirror of the payload of the first (A) direction
    pub forward: TraceChannel,
    /// Mirror of the payload of the second (B) direction
    pub reverse: TraceChannel,
}

impl TraceSink {
    pub fn new(control: TraceChannel, forward: TraceChannel, reverse: TraceChannel) -> Self {
        Self {
            control,
            forward,
            reverse,
        }
    }

    pub fn discard() -> Self {
        Self::default()
    }

    pub async fn control(&mut self, line: impl AsRef<str>) {
        self.control.line(line).await
    }
}
