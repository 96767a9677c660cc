//! Minimal memcached client speaking the text protocol `set` command.
//!
//! The connection is opened lazily on the first write and dropped after any
//! failure, so the next attempt starts from a fresh socket.

use super::{KvStore, StoreError};
use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Longest key memcached accepts.
pub const MAX_KEY_LEN: usize = 250;

#[derive(Debug)]
struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

/// One memcached server.
#[derive(Debug)]
pub struct MemcacheStore {
    address: String,
    timeout: Duration,
    conn: Option<Connection>,
}

impl MemcacheStore {
    #[must_use]
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
            conn: None,
        }
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let connect_err = |source| StoreError::Connect {
            address: self.address.clone(),
            source,
        };
        let addrs: Vec<SocketAddr> = self
            .address
            .to_socket_addrs()
            .map_err(connect_err)?
            .collect();

        let mut last_err =
            io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout)).map_err(connect_err)?;
                    stream.set_write_timeout(Some(self.timeout)).map_err(connect_err)?;
                    stream.set_nodelay(true).map_err(connect_err)?;
                    let writer = stream.try_clone().map_err(connect_err)?;
                    return Ok(Connection {
                        reader: BufReader::new(stream),
                        writer,
                    });
                }
                Err(e) => last_err = e,
            }
        }
        Err(match last_err.kind() {
            io::ErrorKind::TimedOut => StoreError::Timeout {
                address: self.address.clone(),
            },
            _ => connect_err(last_err),
        })
    }

    fn exchange(conn: &mut Connection, request: &[u8]) -> io::Result<String> {
        conn.writer.write_all(request)?;
        conn.writer.flush()?;
        let mut reply = String::new();
        if conn.reader.read_line(&mut reply)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by server",
            ));
        }
        Ok(reply.trim_end().to_string())
    }
}

/// Keys must be 1..=250 bytes with no whitespace or control characters.
fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && !key.bytes().any(|b| b <= b' ' || b == 0x7f);
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

impl KvStore for MemcacheStore {
    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;

        let mut request = format!("set {key} 0 0 {}\r\n", value.len()).into_bytes();
        request.extend_from_slice(value);
        request.extend_from_slice(b"\r\n");

        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => self.connect()?,
        };
        let reply = Self::exchange(&mut conn, &request)
            .map_err(|e| StoreError::from_io(&self.address, e))?;

        if reply == "STORED" {
            self.conn = Some(conn);
            Ok(())
        } else {
            Err(StoreError::Rejected {
                address: self.address.clone(),
                reply,
            })
        }
    }

    fn address(&self) -> &str {
        &self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_validation() {
        assert!(validate_key("idfa:1rfw452y52g2gq4g").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("idfa:has space").is_err());
        assert!(validate_key(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
    }
}
