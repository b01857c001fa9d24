//! Connection establishment for the four relay modes
//!
//! | mode     | addresses | what happens                                         |
//! |----------|-----------|------------------------------------------------------|
//! | `listen` | 2         | listen on both, accept one connection on each        |
//! | `dial`   | 2         | dial both, in order                                  |
//! | `fwd`    | 2         | accept one connection on the first, dial the second  |
//! | `proxy`  | 1         | accept one, read the destination from it, dial that  |
//!
//! Every mode hands its pair to [`pipe_connections`]. On any failure the
//! connections opened so far are closed before the error is returned.

use crate::discovery::read_destination;
use crate::pipe::pipe_connections;
use crate::trace::TraceSink;
use crate::{PipeError, PipeResult};
use mapipe_transport::{
    Address, Connection, EndpointProvider, Listener, TransportError, TransportResult,
};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A relay topology together with its addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Listen(Address, Address),
    Dial(Address, Address),
    Forward(Address, Address),
    Proxy(Address),
}

impl Mode {
    pub const NAMES: [&'static str; 4] = ["listen", "dial", "fwd", "proxy"];

    /// Build a mode from its command-line name, checking the address count
    pub fn from_args(name: &str, addrs: Vec<Address>) -> PipeResult<Self> {
        let arity = |expected: usize| {
            let noun = if expected == 1 { "address" } else { "addresses" };
            PipeError::InvalidMode(format!(
                "{} mode takes exactly {} {}",
                name, expected, noun
            ))
        };

        let mut addrs = addrs.into_iter();
        match (name, addrs.next(), addrs.next(), addrs.next()) {
            ("listen", Some(a), Some(b), None) => Ok(Mode::Listen(a, b)),
            ("dial", Some(a), Some(b), None) => Ok(Mode::Dial(a, b)),
            ("fwd", Some(a), Some(b), None) => Ok(Mode::Forward(a, b)),
            ("proxy", Some(a), None, None) => Ok(Mode::Proxy(a)),
            ("listen" | "dial" | "fwd", ..) => Err(arity(2)),
            ("proxy", ..) => Err(arity(1)),
            (other, ..) => Err(PipeError::InvalidMode(format!(
                "invalid mode {} (expected one of: {})",
                other,
                Self::NAMES.join(", ")
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mode::Listen(..) => "listen",
            Mode::Dial(..) => "dial",
            Mode::Forward(..) => "fwd",
            Mode::Proxy(..) => "proxy",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Listen(a, b) | Mode::Dial(a, b) | Mode::Forward(a, b) => {
                write!(f, "{} {} {}", self.name(), a, b)
            }
            Mode::Proxy(a) => write!(f, "{} {}", self.name(), a),
        }
    }
}

/// Per-run relay settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipeOptions {
    /// Bytes per second for each direction; 0 means unlimited
    pub bandwidth: u64,
}

/// Establishes connections for a [`Mode`] and pipes them together
#[derive(Debug, Clone)]
pub struct Relay {
    endpoints: Arc<dyn EndpointProvider>,
    options: PipeOptions,
}

impl Relay {
    pub fn new(endpoints: Arc<dyn EndpointProvider>, options: PipeOptions) -> Self {
        Self { endpoints, options }
    }

    /// Run one mode to completion.
    ///
    /// `cancel` is observed, never triggered: cancelling it aborts a pending
    /// accept or dial, or ends a running pipe benignly.
    pub async fn run(
        &self,
        mode: &Mode,
        trace: &mut TraceSink,
        cancel: &CancellationToken,
    ) -> PipeResult<()> {
        info!(mode = %mode, bandwidth = self.options.bandwidth, "Starting relay");
        match mode {
            Mode::Listen(first, second) => self.listen_pipe(first, second, trace, cancel).await,
            Mode::Dial(first, second) => self.dial_pipe(first, second, trace, cancel).await,
            Mode::Forward(listen, dial) => self.forward_pipe(listen, dial, trace, cancel).await,
            Mode::Proxy(listen) => self.proxy_pipe(listen, trace, cancel).await,
        }
    }

    /// Listen on both addresses, accept one connection on each, and pipe them.
    pub async fn listen_pipe(
        &self,
        first: &Address,
        second: &Address,
        trace: &mut TraceSink,
        cancel: &CancellationToken,
    ) -> PipeResult<()> {
        let first = self.listen(first, trace).await?;
        let second = match self.listen(second, trace).await {
            Ok(listener) => listener,
            Err(e) => {
                let mut first = first;
                first.close();
                return Err(e);
            }
        };

        let (tx, mut rx) = mpsc::channel::<TransportResult<Connection>>(2);
        let accepts: Vec<JoinHandle<()>> = [first, second]
            .into_iter()
            .map(|mut listener| {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let result = listener.accept().await;
                    listener.close();
                    let _ = tx.send(result).await;
                })
            })
            .collect();
        drop(tx);

        let abort = |accepted: &[Connection]| {
            for task in &accepts {
                task.abort();
            }
            for conn in accepted {
                conn.close();
            }
        };

        let mut accepted = Vec::with_capacity(2);
        while accepted.len() < 2 {
            let next = tokio::select! {
                next = rx.recv() => next,
                _ = cancel.cancelled() => {
                    abort(&accepted);
                    return Err(PipeError::Cancelled);
                }
            };
            match next {
                Some(Ok(conn)) => {
                    trace
                        .control(format!(
                            "accepted {} {}",
                            conn.local_addr(),
                            conn.remote_addr()
                        ))
                        .await;
                    accepted.push(conn);
                }
                Some(Err(e)) => {
                    abort(&accepted);
                    return Err(e.into());
                }
                None => {
                    abort(&accepted);
                    return Err(TransportError::ListenerClosed.into());
                }
            }
        }

        let [a, b]: [Connection; 2] = accepted
            .try_into()
            .map_err(|_| PipeError::from(TransportError::ListenerClosed))?;
        pipe_connections(a, b, self.options.bandwidth, trace, cancel).await
    }

    /// Dial both addresses in order and pipe them.
    pub async fn dial_pipe(
        &self,
        first: &Address,
        second: &Address,
        trace: &mut TraceSink,
        cancel: &CancellationToken,
    ) -> PipeResult<()> {
        let a = self.dial(first, trace, cancel).await?;
        let b = match self.dial(second, trace, cancel).await {
            Ok(conn) => conn,
            Err(e) => {
                a.close();
                return Err(e);
            }
        };

        pipe_connections(a, b, self.options.bandwidth, trace, cancel).await
    }

    /// Accept one connection on `listen`, dial `dial`, and pipe them.
    pub async fn forward_pipe(
        &self,
        listen: &Address,
        dial: &Address,
        trace: &mut TraceSink,
        cancel: &CancellationToken,
    ) -> PipeResult<()> {
        let listener = self.listen(listen, trace).await?;
        let a = self.accept_one(listener, trace, cancel).await?;
        let b = match self.dial(dial, trace, cancel).await {
            Ok(conn) => conn,
            Err(e) => {
                a.close();
                return Err(e);
            }
        };

        pipe_connections(a, b, self.options.bandwidth, trace, cancel).await
    }

    /// Accept one connection, read its destination line, dial that, and pipe them.
    pub async fn proxy_pipe(
        &self,
        listen: &Address,
        trace: &mut TraceSink,
        cancel: &CancellationToken,
    ) -> PipeResult<()> {
        let listener = self.listen(listen, trace).await?;
        let mut a = self.accept_one(listener, trace, cancel).await?;

        let destination = tokio::select! {
            result = read_destination(&mut a) => result,
            _ = cancel.cancelled() => Err(PipeError::Cancelled),
        };
        let destination = match destination {
            Ok(addr) => addr,
            Err(e) => {
                a.close();
                return Err(e);
            }
        };
        trace
            .control(format!("requested proxy to {}", destination))
            .await;

        let b = match self.dial(&destination, trace, cancel).await {
            Ok(conn) => conn,
            Err(e) => {
                a.close();
                return Err(e);
            }
        };

        pipe_connections(a, b, self.options.bandwidth, trace, cancel).await
    }

    async fn listen(&self, addr: &Address, trace: &mut TraceSink) -> PipeResult<Box<dyn Listener>> {
        let listener = self.endpoints.listen(addr).await?;
        trace
            .control(format!("listening on {}", listener.local_addr()))
            .await;
        Ok(listener)
    }

    /// Accept exactly one connection, closing the listener either way
    async fn accept_one(
        &self,
        mut listener: Box<dyn Listener>,
        trace: &mut TraceSink,
        cancel: &CancellationToken,
    ) -> PipeResult<Connection> {
        let result = tokio::select! {
            result = listener.accept() => result.map_err(PipeError::from),
            _ = cancel.cancelled() => Err(PipeError::Cancelled),
        };
        listener.close();

        let conn = result?;
        trace
            .control(format!(
                "accepted {} {}",
                conn.local_addr(),
                conn.remote_addr()
            ))
            .await;
        Ok(conn)
    }

    async fn dial(
        &self,
        addr: &Address,
        trace: &mut TraceSink,
        cancel: &CancellationToken,
    ) -> PipeResult<Connection> {
        trace.control(format!("dialing {}", addr)).await;
        let conn = tokio::select! {
            result = self.endpoints.dial(addr) => result?,
            _ = cancel.cancelled() => return Err(PipeError::Cancelled),
        };
        debug!(addr = %addr, "Dial succeeded");
        trace
            .control(format!(
                "dialed {} {}",
                conn.local_addr(),
                conn.remote_addr()
            ))
            .await;
        Ok(conn)
    }
}
