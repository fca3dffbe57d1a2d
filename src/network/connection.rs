use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};

use thiserror::Error;

use crate::parser::resp::{ParseError, Result as ParseResult};

pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed by peer")]
    Closed,
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Buffered wrapper around a `TcpStream`. Owns a growable read buffer so a
/// command frame that arrives across several `read()` calls can be
/// accumulated before parsing is retried (spec's "streaming/incomplete
/// frame detection" requirement).
pub struct Connection {
    pub stream: TcpStream,
    buffer: Vec<u8>,
    offset: usize,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buffer: vec![0; 4096],
            offset: 0,
        }
    }

    /// Seeds a fresh connection with bytes already read off the wire, e.g.
    /// the tail of a handshake response that ran past the frame we cared
    /// about.
    pub fn from_existing(stream: TcpStream, buffer: &[u8]) -> Self {
        let mut conn = Self::new(stream);
        conn.ensure_capacity(buffer.len());
        conn.buffer[..buffer.len()].copy_from_slice(buffer);
        conn.offset = buffer.len();
        conn
    }

    pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    pub fn try_clone(&self) -> std::io::Result<TcpStream> {
        self.stream.try_clone()
    }

    pub fn get_buffer(&self) -> &[u8] {
        &self.buffer[..self.offset]
    }

    fn ensure_capacity(&mut self, needed: usize) {
        if self.buffer.len() < needed {
            self.buffer.resize(needed, 0);
        }
    }

    /// Reads one `read()` worth of bytes from the socket, growing the
    /// buffer first if it's already full. Returns `ConnectionError::Closed`
    /// on EOF so callers can distinguish "no data yet" from "gone".
    pub fn read_message(&mut self) -> ConnectionResult<usize> {
        if self.offset == self.buffer.len() {
            self.buffer.resize(self.buffer.len() * 2, 0);
        }
        let read = self.stream.read(&mut self.buffer[self.offset..])?;
        if read == 0 {
            return Err(ConnectionError::Closed);
        }
        self.offset += read;
        Ok(read)
    }

    pub fn write_message(&mut self, message: &[u8]) -> ConnectionResult<()> {
        self.stream.write_all(message)?;
        Ok(())
    }

    /// Drops the first `n` bytes of the buffer, sliding the remainder down
    /// to the front. Called after a frame has been fully parsed and
    /// dispatched.
    pub fn consume(&mut self, n: usize) {
        self.buffer.copy_within(n..self.offset, 0);
        self.offset -= n;
    }

    /// Repeatedly tries `f` against the buffered bytes, reading more off
    /// the wire whenever it reports `ParseError::Incomplete`. Any other
    /// parse error is a protocol error and is propagated without retrying.
    pub fn try_parse<F, T>(&mut self, f: F) -> ConnectionResult<T>
    where
        F: Fn(&[u8]) -> ParseResult<T>,
    {
        loop {
            match f(&self.buffer[..self.offset]) {
                Ok(value) => return Ok(value),
                Err(ParseError::Incomplete) => {
                    self.read_message()?;
                }
                Err(e) => return Err(ConnectionError::Parse(e)),
            }
        }
    }
}
