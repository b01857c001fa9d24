//! Multiaddr-style endpoint addresses
//!
//! Supported forms:
//!
//! ```text
//! /ip4/127.0.0.1/tcp/8080
//! /ip6/::1/tcp/8080
//! /dns/example.com/tcp/443     (also /dns4 and /dns6)
//! /unix/tmp/relay.sock
//! /unix/stdio                  (the process's stdin/stdout)
//! /unix//stdio                 (a socket file at /stdio)
//! ```

use crate::{TransportError, TransportResult};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Textual form of the stdio pseudo-address
pub const STDIO_ADDRESS: &str = "/unix/stdio";

/// A listen or dial target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// A real network endpoint
    Network(NetworkAddress),
    /// The running process's standard input (read side) and standard output (write side)
    ProcessStdio,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NetworkAddress {
    Tcp(SocketAddr),
    Dns {
        family: DnsFamily,
        host: String,
        port: u16,
    },
    Unix(PathBuf),
}

/// Address family a `/dns*` name is allowed to resolve to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DnsFamily {
    Any,
    V4,
    V6,
}

impl DnsFamily {
    fn protocol(self) -> &'static str {
        match self {
            DnsFamily::Any => "dns",
            DnsFamily::V4 => "dns4",
            DnsFamily::V6 => "dns6",
        }
    }

    pub fn admits(self, ip: &IpAddr) -> bool {
        match self {
            DnsFamily::Any => true,
            DnsFamily::V4 => ip.is_ipv4(),
            DnsFamily::V6 => ip.is_ipv6(),
        }
    }
}

impl Address {
    pub fn tcp(addr: SocketAddr) -> Self {
        Address::Network(NetworkAddress::Tcp(addr))
    }

    pub fn unix(path: impl AsRef<Path>) -> Self {
        Address::Network(NetworkAddress::Unix(path.as_ref().to_path_buf()))
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::tcp(addr)
    }
}

impl FromStr for Address {
    type Err = TransportError;

    fn from_str(s: &str) -> TransportResult<Self> {
        let invalid = |reason: String| TransportError::InvalidAddress {
            address: s.to_string(),
            reason,
        };

        let body = s
            .strip_prefix('/')
            .ok_or_else(|| invalid("must begin with '/'".to_string()))?;
        let (protocol, rest) = body
            .split_once('/')
            .ok_or_else(|| invalid("missing protocol value".to_string()))?;

        match protocol {
            "unix" => {
                if rest.is_empty() {
                    return Err(invalid("empty unix path".to_string()));
                }
                if rest == "stdio" {
                    return Ok(Address::ProcessStdio);
                }
                Ok(Address::unix(format!("/{}", rest)))
            }
            "ip4" | "ip6" | "dns" | "dns4" | "dns6" => {
                let segments: Vec<&str> = rest.split('/').collect();
                let [host, transport, port] = segments.as_slice() else {
                    return Err(invalid(format!(
                        "expected /{}/<host>/tcp/<port>",
                        protocol
                    )));
                };
                if *transport != "tcp" {
                    return Err(invalid(format!("unsupported transport {:?}", transport)));
                }
                let port: u16 = port
                    .parse()
                    .map_err(|_| invalid(format!("invalid port {:?}", port)))?;

                let network = match protocol {
                    "ip4" => {
                        let ip: Ipv4Addr = host
                            .parse()
                            .map_err(|_| invalid(format!("invalid ip4 address {:?}", host)))?;
                        NetworkAddress::Tcp(SocketAddr::new(IpAddr::V4(ip), port))
                    }
                    "ip6" => {
                        let ip: Ipv6Addr = host
                            .parse()
                            .map_err(|_| invalid(format!("invalid ip6 address {:?}", host)))?;
                        NetworkAddress::Tcp(SocketAddr::new(IpAddr::V6(ip), port))
                    }
                    _ => {
                        if host.is_empty() {
                            return Err(invalid("empty host name".to_string()));
                        }
                        let family = match protocol {
                            "dns4" => DnsFamily::V4,
                            "dns6" => DnsFamily::V6,
                            _ => DnsFamily::Any,
                        };
                        NetworkAddress::Dns {
                            family,
                            host: host.to_string(),
                            port,
                        }
                    }
                };
                Ok(Address::Network(network))
            }
            other => Err(invalid(format!("unsupported protocol {:?}", other))),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::ProcessStdio => f.write_str(STDIO_ADDRESS),
            Address::Network(network) => network.fmt(f),
        }
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkAddress::Tcp(SocketAddr::V4(addr)) => {
                write!(f, "/ip4/{}/tcp/{}", addr.ip(), addr.port())
            }
            NetworkAddress::Tcp(SocketAddr::V6(addr)) => {
                write!(f, "/ip6/{}/tcp/{}", addr.ip(), addr.port())
            }
            NetworkAddress::Dns { family, host, port } => {
                write!(f, "/{}/{}/tcp/{}", family.protocol(), host, port)
            }
            NetworkAddress::Unix(path) => {
                let path = path.to_string_lossy();
                let relative = path.strip_prefix('/').unwrap_or(&path);
                if relative == "stdio" {
                    // `/unix/stdio` names the process's stdio, so a socket
                    // file called `stdio` keeps an extra separator
                    write!(f, "/unix//{}", relative)
                } else {
                    write!(f, "/unix/{}", relative)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ip4_tcp() {
        let addr: Address = "/ip4/127.0.0.1/tcp/9".parse().unwrap();
        assert_eq!(addr, Address::tcp("127.0.0.1:9".parse().unwrap()));
        assert_eq!(addr.to_string(), "/ip4/127.0.0.1/tcp/9");
    }

    #[test]
    fn test_parse_ip6_tcp() {
        let addr: Address = "/ip6/::1/tcp/4001".parse().unwrap();
        assert_eq!(addr, Address::tcp("[::1]:4001".parse().unwrap()));
        assert_eq!(addr.to_string(), "/ip6/::1/tcp/4001");
    }

    #[test]
    fn test_parse_zero_port() {
        let addr: Address = "/ip4/0.0.0.0/tcp/0".parse().unwrap();
        match addr {
            Address::Network(NetworkAddress::Tcp(sa)) => assert_eq!(sa.port(), 0),
            other => panic!("unexpected address {:?}", other),
        }
    }

    #[test]
    fn test_parse_stdio() {
        let addr: Address = STDIO_ADDRESS.parse().unwrap();
        assert_eq!(addr, Address::ProcessStdio);
        assert_eq!(addr.to_string(), STDIO_ADDRESS);
    }

    #[test]
    fn test_parse_unix_path() {
        let addr: Address = "/unix/tmp/relay.sock".parse().unwrap();
        assert_eq!(addr, Address::unix("/tmp/relay.sock"));
        assert_eq!(addr.to_string(), "/unix/tmp/relay.sock");
    }

    #[test]
    fn test_unix_socket_named_stdio_stays_a_socket() {
        let socket = Address::unix("/stdio");
        assert_eq!(socket.to_string(), "/unix//stdio");

        let reparsed: Address = socket.to_string().parse().unwrap();
        assert_eq!(reparsed, socket);
        assert_ne!(reparsed, Address::ProcessStdio);
        assert_eq!(reparsed.to_string(), "/unix//stdio");
    }

    #[test]
    fn test_parse_dns_families() {
        let addr: Address = "/dns4/localhost/tcp/80".parse().unwrap();
        assert_eq!(
            addr,
            Address::Network(NetworkAddress::Dns {
                family: DnsFamily::V4,
                host: "localhost".to_string(),
                port: 80,
            })
        );
        assert_eq!(addr.to_string(), "/dns4/localhost/tcp/80");

        let any: Address = "/dns/example.com/tcp/443".parse().unwrap();
        assert_eq!(any.to_string(), "/dns/example.com/tcp/443");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for input in [
            "",
            "127.0.0.1:80",
            "/ip4",
            "/ip4/127.0.0.1",
            "/ip4/127.0.0.1/udp/80",
            "/ip4/127.0.0.1/tcp/http",
            "/ip4/127.0.0.1/tcp/70000",
            "/ip4/::1/tcp/80",
            "/ip6/127.0.0.1/tcp/80",
            "/dns//tcp/80",
            "/unix/",
            "/quic/1.2.3.4",
        ] {
            let result: TransportResult<Address> = input.parse();
            assert!(
                matches!(result, Err(TransportError::InvalidAddress { .. })),
                "{:?} should be rejected",
                input
            );
        }
    }

    #[test]
    fn test_equality_is_canonical() {
        let a: Address = "/ip6/0:0:0:0:0:0:0:1/tcp/1".parse().unwrap();
        let b: Address = "/ip6/::1/tcp/1".parse().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, Address::ProcessStdio);
    }

    #[test]
    fn test_dns_family_admits() {
        let v4: IpAddr = "10.0.0.1".parse().unwrap();
        let v6: IpAddr = "::1".parse().unwrap();
        assert!(DnsFamily::V4.admits(&v4));
        assert!(!DnsFamily::V4.admits(&v6));
        assert!(DnsFamily::V6.admits(&v6));
        assert!(DnsFamily::Any.admits(&v4));
    }
}
