//! Pipe engine: relay bytes between two connections until either side ends
//!
//! Two copy loops run concurrently, one per direction, plus a watcher. The
//! first loop to finish cancels the session; the watcher then closes both
//! connections, which wakes the other loop out of its blocked read. This is
//! the same shutdown behaviour as `nc`: either peer disconnecting ends the
//! whole session.

use crate::bandwidth::format_bytes;
use crate::rate_limit::RateLimiter;
use crate::trace::{TraceChannel, TraceSink};
use crate::{PipeError, PipeResult};
use mapipe_transport::{is_closed_error, Address, Connection, ReadHalf, WriteHalf};
use std::io;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How one direction of a session ended
#[derive(Debug)]
pub enum TransferEnd {
    /// The source reached end of stream
    Eof,
    /// The session was cancelled or the connection closed underneath the copy
    Cancelled,
    /// Any other I/O failure, including short writes
    Failed(io::Error),
}

impl TransferEnd {
    pub fn is_benign(&self) -> bool {
        !matches!(self, TransferEnd::Failed(_))
    }
}

/// Outcome of one copy direction
#[derive(Debug)]
pub struct Transfer {
    pub from: Address,
    pub to: Address,
    pub bytes: u64,
    pub end: TransferEnd,
}

/// Relay between `a` and `b` until either side ends or `cancel` fires.
///
/// The A direction reads `b` and writes `a`, mirroring into `trace.forward`;
/// the B direction reads `a` and writes `b`, mirroring into `trace.reverse`.
/// Returns the first non-benign failure, A direction first.
pub async fn pipe_connections(
    a: Connection,
    b: Connection,
    bandwidth: u64,
    trace: &mut TraceSink,
    cancel: &CancellationToken,
) -> PipeResult<()> {
    let a_remote = a.remote_addr().clone();
    let b_remote = b.remote_addr().clone();

    let (mut a_buf, mut b_buf) = match copy_buffers(bandwidth) {
        Ok(buffers) => buffers,
        Err(e) => {
            a.close();
            b.close();
            return Err(e);
        }
    };

    trace
        .control(format!("piping {} <--> {}", a_remote, b_remote))
        .await;
    if bandwidth > 0 {
        trace
            .control(format!("rate-limiting to {}/s", format_bytes(bandwidth)))
            .await;
    }
    info!(a = %a_remote, b = %b_remote, bandwidth, "Pipe started");

    let session = cancel.child_token();
    let a_closer = a.closer();
    let b_closer = b.closer();
    let (mut a_read, mut a_write) = a.into_split();
    let (mut b_read, mut b_write) = b.into_split();
    let TraceSink {
        control,
        forward,
        reverse,
    } = trace;

    let a_direction = async {
        let (bytes, end) =
            copy_direction(&mut b_read, &mut a_write, forward, &mut a_buf, bandwidth, &session)
                .await;
        session.cancel();
        Transfer {
            from: b_remote.clone(),
            to: a_remote.clone(),
            bytes,
            end,
        }
    };

    let b_direction = async {
        let (bytes, end) =
            copy_direction(&mut a_read, &mut b_write, reverse, &mut b_buf, bandwidth, &session)
                .await;
        session.cancel();
        Transfer {
            from: a_remote.clone(),
            to: b_remote.clone(),
            bytes,
            end,
        }
    };

    let watcher = async {
        session.cancelled().await;
        debug!("Session cancelled, closing both connections");
        a_closer.close();
        b_closer.close();
    };

    let (first, second, ()) = tokio::join!(a_direction, b_direction, watcher);

    let mut failure = None;
    for transfer in [first, second] {
        control
            .line(format!(
                "wrote {} bytes from {} to {}",
                transfer.bytes, transfer.from, transfer.to
            ))
            .await;
        if let TransferEnd::Failed(source) = transfer.end {
            control
                .line(format!("{} connection failed: {}", transfer.from, source))
                .await;
            if failure.is_none() {
                failure = Some(PipeError::Transfer {
                    from: transfer.from,
                    source,
                });
            }
        }
    }

    info!(a = %a_remote, b = %b_remote, failed = failure.is_some(), "Pipe finished");
    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// One copy buffer per direction, sized by the bandwidth budget
fn copy_buffers(bandwidth: u64) -> PipeResult<(Vec<u8>, Vec<u8>)> {
    let limiter = RateLimiter::new(bandwidth);
    let allocate = || {
        limiter.buffer().map_err(|_| PipeError::BufferAllocation {
            size: limiter.chunk_size(),
        })
    };
    Ok((allocate()?, allocate()?))
}

/// Copy `src` into `dst` and `mirror` until end of stream, failure or cancellation.
///
/// Each read fills at most `buf`; with a bandwidth budget that should be one
/// second's worth, as returned by [`RateLimiter::buffer`].
/// Returns the number of bytes written to `dst` and how the copy ended.
pub async fn copy_direction(
    src: &mut ReadHalf,
    dst: &mut WriteHalf,
    mirror: &mut TraceChannel,
    buf: &mut [u8],
    bandwidth: u64,
    session: &CancellationToken,
) -> (u64, TransferEnd) {
    let mut limiter = RateLimiter::new(bandwidth);

    loop {
        let n = match src.read(buf).await {
            Ok(0) => return (limiter.written(), TransferEnd::Eof),
            Ok(n) => n,
            Err(e) => return (limiter.written(), classify(e, session)),
        };

        let written = match dst.write(&buf[..n]).await {
            Ok(written) => written,
            Err(e) => return (limiter.written(), classify(e, session)),
        };
        let pause = limiter.record(written);
        if written != n {
            let short = io::Error::new(io::ErrorKind::WriteZero, "short write");
            return (limiter.written(), TransferEnd::Failed(short));
        }

        if let Err(e) = mirror.write_all(&buf[..n]).await {
            return (limiter.written(), classify(e, session));
        }

        if let Some(pause) = pause {
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = session.cancelled() => return (limiter.written(), TransferEnd::Cancelled),
            }
        }
    }
}

fn classify(err: io::Error, session: &CancellationToken) -> TransferEnd {
    if session.is_cancelled() || is_closed_error(&err) {
        TransferEnd::Cancelled
    } else if err.kind() == io::ErrorKind::UnexpectedEof {
        TransferEnd::Eof
    } else {
        TransferEnd::Failed(err)
    }
}
