use std::sync::Arc;

use crate::common::{log_debug, log_warn};
use crate::network::connection::{Connection, ConnectionError};
use crate::network::listener::ConnectionRole;
use crate::parser::command::Command;
use crate::parser::resp::Token;
use crate::replication::rdb::{empty_rdb, serialize_rdb};
use crate::replication::replica_manager::Replica;
use crate::server::metadata::ReplicaInfo;

use super::data::Server;

/// Dispatches one already-parsed `Command` against shared server state and
/// writes the RESP reply (if any) back to `conn`. One `CommandHandler` is
/// constructed per connection; it borrows the connection for the duration
/// of a single command so it can both read (PSYNC's RDB transfer) and
/// write.
pub struct CommandHandler {
    server: Arc<Server>,
    role: ConnectionRole,
}

impl CommandHandler {
    pub fn new(server: Arc<Server>, role: ConnectionRole) -> Self {
        CommandHandler { server, role }
    }

    /// `raw` is the exact bytes the command frame occupied on the wire;
    /// SET propagation forwards these verbatim rather than re-serializing
    /// from `Command`, so a replica's copy is byte-identical to the
    /// master's (spec's replication-fidelity property).
    pub fn handle_command(
        &mut self,
        conn: &mut Connection,
        command: &Command,
        raw: &[u8],
    ) -> Result<(), ConnectionError> {
        match command {
            Command::Ping => self.handle_ping(conn),
            Command::Echo(data) => self.handle_echo(conn, data),
            Command::Get(key) => self.handle_get(conn, key),
            Command::Set { key, value, expiry } => self.handle_set(conn, key, value, *expiry, raw),
            Command::ConfigGet(name) => self.handle_config_get(conn, name),
            Command::Keys(glob) => self.handle_keys(conn, glob),
            Command::Info(section) => self.handle_info(conn, section.as_deref()),
            Command::ReplConf { name, value } => self.handle_replconf(conn, name, value),
            Command::Psync { .. } => self.handle_psync(conn),
            Command::Unknown(name) => self.write_error(
                conn,
                &format!("unknown command '{}'", String::from_utf8_lossy(name)),
            ),
            Command::Invalid(message) => self.write_error(conn, message),
        }
    }

    fn is_master(&self) -> bool {
        matches!(self.server.metadata.replica_info, ReplicaInfo::Master(_))
    }

    fn handle_ping(&mut self, conn: &mut Connection) -> Result<(), ConnectionError> {
        log_debug!("received PING");
        if self.role == ConnectionRole::MasterLink {
            self.server.record_heartbeat();
            Ok(())
        } else {
            self.write_token(conn, Token::SimpleString("PONG".to_string()))
        }
    }

    fn handle_echo(&mut self, conn: &mut Connection, data: &[u8]) -> Result<(), ConnectionError> {
        log_debug!("received ECHO");
        self.write_token(conn, Token::BulkString(data.to_vec()))
    }

    fn handle_get(&mut self, conn: &mut Connection, key: &[u8]) -> Result<(), ConnectionError> {
        log_debug!("received GET");
        let response = match self.server.get(key) {
            Some(value) => Token::BulkString(value),
            None => Token::NullBulkString,
        };
        self.write_token(conn, response)
    }

    fn handle_set(
        &mut self,
        conn: &mut Connection,
        key: &[u8],
        value: &[u8],
        expiry: Option<std::time::Duration>,
        raw: &[u8],
    ) -> Result<(), ConnectionError> {
        log_debug!("received SET");
        self.server.set(key, value, expiry);
        if self.role == ConnectionRole::MasterLink {
            self.server.advance_slave_offset(raw.len());
            Ok(())
        } else {
            if self.is_master() {
                self.server.propagate(raw);
            }
            self.write_token(conn, Token::SimpleString("OK".to_string()))
        }
    }

    fn handle_config_get(
        &mut self,
        conn: &mut Connection,
        name: &[u8],
    ) -> Result<(), ConnectionError> {
        log_debug!("received CONFIG GET");
        let response = match self.server.config_get(name) {
            Some(value) => Token::Array(vec![
                Token::BulkString(name.to_vec()),
                Token::BulkString(value.into_bytes()),
            ]),
            None => Token::NullBulkString,
        };
        self.write_token(conn, response)
    }

    fn handle_keys(&mut self, conn: &mut Connection, glob: &[u8]) -> Result<(), ConnectionError> {
        log_debug!("received KEYS");
        let keys = self.server.keys(glob);
        let response = Token::Array(keys.into_iter().map(Token::BulkString).collect());
        self.write_token(conn, response)
    }

    fn handle_info(
        &mut self,
        conn: &mut Connection,
        section: Option<&[u8]>,
    ) -> Result<(), ConnectionError> {
        log_debug!("received INFO");
        match section.map(|s| String::from_utf8_lossy(s).to_lowercase()) {
            None => {
                let offset = self.server.replication_offset();
                let body = self.server.metadata.replication_info_section(offset);
                self.write_token(conn, Token::BulkString(body))
            }
            Some(section) if section == "all" || section == "replication" => {
                let offset = self.server.replication_offset();
                let body = self.server.metadata.replication_info_section(offset);
                self.write_token(conn, Token::BulkString(body))
            }
            Some(other) => {
                self.write_error(conn, &format!("unsupported INFO section '{other}'"))
            }
        }
    }

    fn handle_replconf(
        &mut self,
        conn: &mut Connection,
        name: &[u8],
        value: &[u8],
    ) -> Result<(), ConnectionError> {
        log_debug!("received REPLCONF {}", String::from_utf8_lossy(name));
        let name_lower = String::from_utf8_lossy(name).to_lowercase();
        let value_str = String::from_utf8_lossy(value);
        if self.is_master() {
            self.server.record_replconf_option(&name_lower, &value_str);
            match name_lower.as_str() {
                "listening-port" | "capa" => self.write_token(conn, Token::SimpleString("OK".to_string())),
                "ack" => Ok(()),
                other => self.write_error(conn, &format!("unsupported REPLCONF option '{other}'")),
            }
        } else if name_lower == "getack" {
            let offset = self.server.replication_offset();
            let response = Token::Array(vec![
                Token::BulkString(b"REPLCONF".to_vec()),
                Token::BulkString(b"ACK".to_vec()),
                Token::BulkString(offset.to_string().into_bytes()),
            ]);
            self.write_token(conn, response)
        } else {
            Ok(())
        }
    }

    fn handle_psync(&mut self, conn: &mut Connection) -> Result<(), ConnectionError> {
        log_debug!("received PSYNC");
        let ReplicaInfo::Master(info) = &self.server.metadata.replica_info else {
            return self.write_error(conn, "PSYNC is not supported on a replica");
        };
        let offset = self.server.replication_offset();
        let fullresync = format!("FULLRESYNC {} {}", info.replication_id, offset);
        self.write_token(conn, Token::SimpleString(fullresync))?;

        let rdb_payload = serialize_rdb(&empty_rdb());
        conn.write_message(&rdb_payload)?;

        let stream = conn.try_clone()?;
        if let Err(err) = self.server.add_replica(Replica::new(stream)) {
            log_warn!("failed to register replica: {err}");
        }
        Ok(())
    }

    fn write_token(&mut self, conn: &mut Connection, token: Token) -> Result<(), ConnectionError> {
        conn.write_message(&token.serialize())
    }

    fn write_error(&mut self, conn: &mut Connection, message: &str) -> Result<(), ConnectionError> {
        self.write_token(conn, Token::SimpleError(format!("ERR {message}")))
    }
}
