//! Listen/dial dispatch over address kinds

use crate::address::DnsFamily;
use crate::listener::{Listener, StdioListener, TcpEndpointListener};
use crate::stdio::ProcessStdio;
use crate::{Address, Connection, NetworkAddress, TransportError, TransportResult};
use async_trait::async_trait;
use std::fmt::Debug;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// Creates listeners and outgoing connections from addresses
///
/// Built once per process and handed to whatever establishes connections,
/// so tests can substitute in-memory endpoints.
#[async_trait]
pub trait EndpointProvider: Send + Sync + Debug {
    async fn listen(&self, addr: &Address) -> TransportResult<Box<dyn Listener>>;

    async fn dial(&self, addr: &Address) -> TransportResult<Connection>;
}

/// Real endpoints: TCP, Unix-domain sockets and the process's stdio
#[derive(Debug, Default)]
pub struct Endpoints {
    stdio: ProcessStdio,
}

impl Endpoints {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EndpointProvider for Endpoints {
    async fn listen(&self, addr: &Address) -> TransportResult<Box<dyn Listener>> {
        match addr {
            Address::ProcessStdio => Ok(Box::new(StdioListener::new(self.stdio.clone()))),
            Address::Network(NetworkAddress::Tcp(sa)) => {
                let listener = TcpListener::bind(sa).await?;
                Ok(Box::new(TcpEndpointListener::new(listener)?))
            }
            Address::Network(NetworkAddress::Dns { family, host, port }) => {
                let candidates = resolve(*family, host, *port).await?;
                let listener = TcpListener::bind(candidates.as_slice()).await?;
                Ok(Box::new(TcpEndpointListener::new(listener)?))
            }
            Address::Network(NetworkAddress::Unix(path)) => {
                #[cfg(unix)]
                {
                    let listener = tokio::net::UnixListener::bind(path)?;
                    Ok(Box::new(crate::listener::UnixEndpointListener::new(
                        listener,
                        path.clone(),
                    )))
                }
                #[cfg(not(unix))]
                {
                    let _ = path;
                    Err(TransportError::Unsupported(addr.to_string()))
                }
            }
        }
    }

    async fn dial(&self, addr: &Address) -> TransportResult<Connection> {
        match addr {
            Address::ProcessStdio => self.stdio.claim(),
            Address::Network(NetworkAddress::Tcp(sa)) => {
                let stream = TcpStream::connect(sa).await?;
                tcp_connection(stream)
            }
            Address::Network(NetworkAddress::Dns { family, host, port }) => {
                let candidates = resolve(*family, host, *port).await?;
                let stream = TcpStream::connect(candidates.as_slice()).await?;
                tcp_connection(stream)
            }
            Address::Network(NetworkAddress::Unix(path)) => {
                #[cfg(unix)]
                {
                    let stream = tokio::net::UnixStream::connect(path).await?;
                    let (reader, writer) = stream.into_split();
                    Ok(Connection::new(
                        reader,
                        writer,
                        Address::unix(path),
                        Address::unix(path),
                    ))
                }
                #[cfg(not(unix))]
                {
                    let _ = path;
                    Err(TransportError::Unsupported(addr.to_string()))
                }
            }
        }
    }
}

fn tcp_connection(stream: TcpStream) -> TransportResult<Connection> {
    let local = stream.local_addr()?;
    let peer = stream.peer_addr()?;
    debug!(local = %local, peer = %peer, "tcp connection established");

    let (reader, writer) = stream.into_split();
    Ok(Connection::new(reader, writer, local.into(), peer.into()))
}

async fn resolve(family: DnsFamily, host: &str, port: u16) -> TransportResult<Vec<SocketAddr>> {
    let candidates: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await?
        .filter(|sa| family.admits(&sa.ip()))
        .collect();

    if candidates.is_empty() {
        return Err(TransportError::Resolve(format!("{}:{}", host, port)));
    }
    Ok(candidates)
}
