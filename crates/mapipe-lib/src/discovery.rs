//! Destination discovery for proxy mode
//!
//! The first line sent on a proxied connection names where to dial:
//!
//! ```text
//! /ip4/127.0.0.1/tcp/9\n<application bytes...>
//! ```
//!
//! The line is read one byte at a time so nothing past the newline is
//! consumed; those bytes belong to the relayed stream.

use crate::{PipeError, PipeResult};
use mapipe_transport::{Address, Connection};

/// Longest destination line accepted, newline included
pub const MAX_DESTINATION_LEN: usize = 2048;

pub async fn read_destination(conn: &mut Connection) -> PipeResult<Address> {
    let mut buf = [0u8; MAX_DESTINATION_LEN];

    for i in 0..buf.len() {
        match conn.read(&mut buf[i..i + 1]).await {
            Ok(0) => {
                return Err(PipeError::Protocol(
                    "connection ended before a destination address was sent".to_string(),
                ))
            }
            Ok(_) => {}
            Err(e) => {
                return Err(PipeError::Protocol(format!(
                    "failed to read destination address: {}",
                    e
                )))
            }
        }

        if buf[i] == b'\n' {
            let line = std::str::from_utf8(&buf[..i]).map_err(|_| {
                PipeError::Protocol("destination address is not valid UTF-8".to_string())
            })?;
            return line
                .parse()
                .map_err(|e| PipeError::Protocol(format!("invalid destination address: {}", e)));
        }
    }

    Err(PipeError::Protocol(format!(
        "did not find a destination address and newline within {} bytes",
        MAX_DESTINATION_LEN
    )))
}
