use std::net::TcpStream;

use thiserror::Error;

use crate::common::log_info;
use crate::network::connection::{Connection, ConnectionError};
use crate::parser::rdb::parse_rdb_payload;
use crate::parser::resp::{parse_one, ParseError, Token};

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("could not reach master: {0}")]
    Connect(std::io::Error),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("unexpected reply from master during handshake: {0}")]
    UnexpectedReply(String),
}

pub struct HandshakeConfig {
    pub master_host: String,
    pub master_port: u16,
    pub replica_listening_port: u16,
}

/// Drives the four-step replica bootstrap sequence against a master:
/// PING, REPLCONF listening-port, REPLCONF capa psync2, PSYNC ? -1,
/// followed by receiving the RDB snapshot that accompanies FULLRESYNC.
/// Returns the still-open `Connection` so the caller can keep reading the
/// ongoing replicated command stream off the same socket.
pub struct Handshaker {
    config: HandshakeConfig,
}

impl Handshaker {
    pub fn new(config: HandshakeConfig) -> Self {
        Self { config }
    }

    pub fn perform_handshake(&self) -> Result<Connection, HandshakeError> {
        let stream = TcpStream::connect((self.config.master_host.as_str(), self.config.master_port))
            .map_err(HandshakeError::Connect)?;
        let mut conn = Connection::new(stream);

        log_info!(
            "connecting to master at {}:{}",
            self.config.master_host,
            self.config.master_port
        );

        self.send_array(&mut conn, &[b"PING"])?;
        self.expect_simple_string(&mut conn, "pong")?;

        self.send_array(
            &mut conn,
            &[
                b"REPLCONF",
                b"listening-port",
                self.config.replica_listening_port.to_string().as_bytes(),
            ],
        )?;
        self.expect_simple_string(&mut conn, "ok")?;

        self.send_array(&mut conn, &[b"REPLCONF", b"capa", b"psync2"])?;
        self.expect_simple_string(&mut conn, "ok")?;

        self.send_array(&mut conn, &[b"PSYNC", b"?", b"-1"])?;
        self.expect_fullresync(&mut conn)?;

        self.receive_rdb_payload(&mut conn)?;

        log_info!("handshake with master completed");
        Ok(conn)
    }

    fn send_array(&self, conn: &mut Connection, parts: &[&[u8]]) -> Result<(), HandshakeError> {
        let token = Token::Array(parts.iter().map(|p| Token::BulkString(p.to_vec())).collect());
        conn.write_message(&token.serialize())?;
        Ok(())
    }

    fn read_one_token(&self, conn: &mut Connection) -> Result<Token, HandshakeError> {
        let result = conn.try_parse(|buf| {
            let parsed = parse_one(buf)?;
            Ok(parsed)
        })?;
        conn.consume(result.len);
        result
            .tokens
            .into_iter()
            .next()
            .ok_or_else(|| HandshakeError::UnexpectedReply("empty reply".to_string()))
    }

    fn expect_simple_string(&self, conn: &mut Connection, expected: &str) -> Result<(), HandshakeError> {
        match self.read_one_token(conn)? {
            Token::SimpleString(data) if data.eq_ignore_ascii_case(expected) => Ok(()),
            other => Err(HandshakeError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    fn expect_fullresync(&self, conn: &mut Connection) -> Result<(), HandshakeError> {
        let data = match self.read_one_token(conn)? {
            Token::SimpleString(data) if data.to_uppercase().starts_with("FULLRESYNC") => data,
            other => return Err(HandshakeError::UnexpectedReply(format!("{other:?}"))),
        };
        let tokens: Vec<&str> = data.split_whitespace().collect();
        if tokens.len() < 3 {
            return Err(HandshakeError::UnexpectedReply(format!(
                "malformed FULLRESYNC reply: {data}"
            )));
        }
        if tokens[1].len() != 40 {
            return Err(HandshakeError::UnexpectedReply(format!(
                "FULLRESYNC replid has wrong length: {data}"
            )));
        }
        Ok(())
    }

    fn receive_rdb_payload(&self, conn: &mut Connection) -> Result<Vec<u8>, HandshakeError> {
        loop {
            match parse_rdb_payload(conn.get_buffer()) {
                Ok(result) => {
                    conn.consume(result.len);
                    return Ok(result.rdb);
                }
                Err(ParseError::Incomplete) => {
                    conn.read_message()?;
                }
                Err(err) => return Err(HandshakeError::UnexpectedReply(err.to_string())),
            }
        }
    }
}
